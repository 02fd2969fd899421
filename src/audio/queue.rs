use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

use crate::error::{LinkError, LinkResult};
use crate::sources::QueueItem;

/// Pending-track storage consulted by a player.
///
/// Implementations may be backed by anything (memory, a database, another
/// service); the player only relies on FIFO `poll` semantics.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Número de elementos pendientes
    async fn size(&self) -> usize;

    /// Duración total en milisegundos
    async fn duration(&self) -> u64;

    async fn add(&self, item: QueueItem) -> LinkResult<()>;

    /// Saca el siguiente elemento (FIFO)
    async fn poll(&self) -> Option<QueueItem>;

    /// Descarta exactamente `n` elementos del frente
    async fn skip(&self, n: usize);

    async fn clear(&self);
}

/// In-memory FIFO queue.
#[derive(Debug)]
pub struct DefaultQueue {
    items: Mutex<VecDeque<QueueItem>>,
    max_size: Option<usize>,
}

impl Default for DefaultQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_size: None,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_size: Some(max_size),
        }
    }

    /// Agrega múltiples tracks (playlist), hasta llenar la cola
    pub fn add_all(&self, items: Vec<QueueItem>) -> usize {
        let mut queue = self.items.lock();
        let available = self
            .max_size
            .map(|max| max.saturating_sub(queue.len()))
            .unwrap_or(usize::MAX);
        let to_add = items.len().min(available);

        queue.extend(items.into_iter().take(to_add));
        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Mezcla la cola
    pub fn shuffle(&self) {
        let mut queue = self.items.lock();
        queue.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada");
    }

    /// Limpia duplicados, conservando la primera aparición
    pub fn remove_duplicates(&self) -> usize {
        let mut queue = self.items.lock();
        let mut seen = HashSet::new();
        let original_len = queue.len();

        queue.retain(|item| seen.insert(item.identity()));

        let removed = original_len - queue.len();
        if removed > 0 {
            info!("🗑️ Eliminados {} duplicados", removed);
        }
        removed
    }

    /// Limpia tracks de un usuario específico
    pub fn remove_by_requester(&self, user_id: UserId) -> usize {
        let mut queue = self.items.lock();
        let original_len = queue.len();
        queue.retain(|item| item.requester() != Some(user_id));
        original_len - queue.len()
    }

    /// Mueve un track a una nueva posición
    pub fn move_item(&self, from: usize, to: usize) -> LinkResult<()> {
        let mut queue = self.items.lock();
        if let Some(&index) = [from, to].iter().find(|&&i| i >= queue.len()) {
            return Err(LinkError::InvalidIndex(index));
        }

        if from != to {
            if let Some(item) = queue.remove(from) {
                queue.insert(to, item);
                debug!("📍 Track movido de posición {} a {}", from, to);
            }
        }
        Ok(())
    }

    /// Elimina un track específico
    pub fn remove(&self, index: usize) -> Option<QueueItem> {
        self.items.lock().remove(index)
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.items.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl Queue for DefaultQueue {
    async fn size(&self) -> usize {
        self.items.lock().len()
    }

    async fn duration(&self) -> u64 {
        self.items.lock().iter().map(QueueItem::duration).sum()
    }

    async fn add(&self, item: QueueItem) -> LinkResult<()> {
        let mut queue = self.items.lock();
        if let Some(max) = self.max_size {
            if queue.len() >= max {
                return Err(LinkError::QueueFull(max));
            }
        }
        debug!("➕ Agregado a la cola: {}", item.title());
        queue.push_back(item);
        Ok(())
    }

    async fn poll(&self) -> Option<QueueItem> {
        self.items.lock().pop_front()
    }

    async fn skip(&self, n: usize) {
        let mut queue = self.items.lock();
        let n = n.min(queue.len());
        queue.drain(..n);
    }

    async fn clear(&self) {
        self.items.lock().clear();
        info!("🗑️ Cola limpiada");
    }
}
