//! Per-guild playback session.
//!
//! A [`Player`] binds one guild to one node at a time. It owns the voice
//! handshake, the current track and the repeat flags, and reacts to the
//! player-scoped frames its node forwards. Queue advancement runs on
//! spawned tasks serialized by `advance_lock`, so two "poll next" loops
//! never overlap for the same guild.

use chrono::Utc;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::filters::{EqPreset, FilterOptions};
use super::queue::{DefaultQueue, Queue};
use super::voice::{VoiceHandshake, VoiceStateRequest};
use crate::error::{LinkError, LinkResult};
use crate::events::LinkEvent;
use crate::link::LinkShared;
use crate::node::protocol::{
    parse_user_id, Outgoing, PlayerEvent, PlayerStateUpdate, RecordOptions, SpeakingEvent, SpeakingKind,
    TrackEndReason,
};
use crate::node::Node;
use crate::sources::{QueueItem, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Options for [`crate::MusicLink::create_player`].
#[derive(Clone)]
pub struct PlayerOptions {
    pub guild_id: GuildId,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub self_deaf: bool,
    pub self_mute: bool,
    /// Cola propia; `DefaultQueue` si no se indica
    pub queue: Option<Arc<dyn Queue>>,
}

impl PlayerOptions {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            voice_channel_id: None,
            text_channel_id: None,
            self_deaf: false,
            self_mute: false,
            queue: None,
        }
    }

    pub fn with_voice_channel(mut self, channel_id: ChannelId) -> Self {
        self.voice_channel_id = Some(channel_id);
        self
    }

    pub fn with_text_channel(mut self, channel_id: ChannelId) -> Self {
        self.text_channel_id = Some(channel_id);
        self
    }

    pub fn self_deaf(mut self, deaf: bool) -> Self {
        self.self_deaf = deaf;
        self
    }

    pub fn self_mute(mut self, mute: bool) -> Self {
        self.self_mute = mute;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// Extra fields of a `play` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayOptions {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    /// Ignorar si ya hay algo sonando
    pub no_replace: bool,
    pub pause: Option<bool>,
}

#[derive(Debug, Default)]
struct RecorderState {
    options: Option<RecordOptions>,
    started: bool,
}

struct SessionState {
    voice_channel_id: Option<ChannelId>,
    text_channel_id: Option<ChannelId>,
    self_deaf: bool,
    self_mute: bool,

    node: Option<Arc<Node>>,
    connection: ConnectionState,
    handshake: VoiceHandshake,
    connect_timeout: Option<JoinHandle<()>>,

    current: Option<Track>,
    track_repeat: bool,
    queue_repeat: bool,
    playing: bool,
    paused: bool,
    /// Migración en curso: el próximo TrackStart es un replay
    moving: bool,

    position: u64,
    /// Epoch (ms) en que se muestreó `position`
    position_timestamp: i64,

    filters: FilterOptions,
    recorder: RecorderState,
}

pub struct Player {
    guild_id: GuildId,
    link: Weak<LinkShared>,
    state: Mutex<SessionState>,
    queue: Arc<dyn Queue>,
    advance_lock: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("node", &state.node.as_ref().map(|n| n.identifier().to_string()))
            .field("connection", &state.connection)
            .field("playing", &state.playing)
            .finish()
    }
}

impl Player {
    pub(crate) fn new(link: Weak<LinkShared>, options: PlayerOptions, node: Option<Arc<Node>>) -> Arc<Self> {
        let queue = options
            .queue
            .unwrap_or_else(|| Arc::new(DefaultQueue::new()) as Arc<dyn Queue>);

        Arc::new(Self {
            guild_id: options.guild_id,
            link,
            state: Mutex::new(SessionState {
                voice_channel_id: options.voice_channel_id,
                text_channel_id: options.text_channel_id,
                self_deaf: options.self_deaf,
                self_mute: options.self_mute,
                node,
                connection: ConnectionState::Disconnected,
                handshake: VoiceHandshake::default(),
                connect_timeout: None,
                current: None,
                track_repeat: false,
                queue_repeat: false,
                playing: false,
                paused: false,
                moving: false,
                position: 0,
                position_timestamp: 0,
                filters: FilterOptions::default(),
                recorder: RecorderState::default(),
            }),
            queue,
            advance_lock: tokio::sync::Mutex::new(()),
            destroyed: AtomicBool::new(false),
        })
    }

    // Getters

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.state.lock().node.clone()
    }

    pub fn is_bound_to(&self, node: &Arc<Node>) -> bool {
        self.state
            .lock()
            .node
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, node))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn voice_channel_id(&self) -> Option<ChannelId> {
        self.state.lock().voice_channel_id
    }

    pub fn text_channel_id(&self) -> Option<ChannelId> {
        self.state.lock().text_channel_id
    }

    pub fn set_text_channel(&self, channel_id: Option<ChannelId>) {
        self.state.lock().text_channel_id = channel_id;
    }

    pub fn current(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().moving
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn track_repeat(&self) -> bool {
        self.state.lock().track_repeat
    }

    pub fn queue_repeat(&self) -> bool {
        self.state.lock().queue_repeat
    }

    pub fn self_deaf(&self) -> bool {
        self.state.lock().self_deaf
    }

    pub fn self_mute(&self) -> bool {
        self.state.lock().self_mute
    }

    /// Last position reported by the node, in milliseconds.
    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    /// Position extrapolated from the last report, scaled by the active
    /// timescale and capped at the track duration.
    pub fn exact_position(&self) -> u64 {
        let state = self.state.lock();
        if state.paused {
            return state.position;
        }

        let duration = state.current.as_ref().map(Track::duration).unwrap_or(0);
        let elapsed = (Utc::now().timestamp_millis() - state.position_timestamp).max(0) as f64;
        let position = (state.position as f64 + elapsed) * state.filters.playback_rate();
        (position.max(0.0) as u64).min(duration)
    }

    pub fn filters(&self) -> FilterOptions {
        self.state.lock().filters.clone()
    }

    /// Volumen en porcentaje (100 = normal)
    pub fn volume(&self) -> f32 {
        self.state.lock().filters.volume_percent()
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recorder.started
    }

    fn ensure_alive(&self) -> LinkResult<Arc<LinkShared>> {
        if self.is_destroyed() {
            return Err(LinkError::PlayerDestroyed(self.guild_id.to_string()));
        }
        self.link
            .upgrade()
            .ok_or_else(|| LinkError::PlayerDestroyed(self.guild_id.to_string()))
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(link) = self.link.upgrade() {
            link.emit(event);
        }
    }

    fn voice_request(&self, state: &SessionState, channel_id: Option<ChannelId>) -> VoiceStateRequest {
        VoiceStateRequest {
            guild_id: self.guild_id,
            channel_id,
            self_mute: state.self_mute,
            self_deaf: state.self_deaf,
        }
    }

    fn send_voice_state(&self, request: VoiceStateRequest) {
        if let Some(link) = self.link.upgrade() {
            debug!(
                "🎙️ Voice state para guild {}: canal {:?} (mute: {}, deaf: {})",
                self.guild_id, request.channel_id, request.self_mute, request.self_deaf
            );
            link.voice.send_voice_state(request);
        }
    }

    /// Bound node, binding the best one first if needed.
    fn bound_node(&self, link: &LinkShared, state: &mut SessionState) -> LinkResult<Arc<Node>> {
        if let Some(node) = &state.node {
            return Ok(Arc::clone(node));
        }
        let node = link.pool.best_node()?;
        debug!("📌 Nodo {} asignado al player {}", node.identifier(), self.guild_id);
        state.node = Some(Arc::clone(&node));
        Ok(node)
    }

    // Conexión de voz

    /// Asks the host gateway to join the voice channel.
    ///
    /// No-op unless disconnected. If the handshake does not complete within
    /// the configured timeout the session falls back to disconnected and a
    /// [`LinkEvent::ConnectionTimeout`] is emitted.
    pub fn connect(self: &Arc<Self>) -> LinkResult<()> {
        let link = self.ensure_alive()?;

        let request = {
            let mut state = self.state.lock();
            let channel_id = state.voice_channel_id.ok_or(LinkError::MissingVoiceChannel)?;
            if state.connection != ConnectionState::Disconnected {
                return Ok(());
            }

            self.bound_node(&link, &mut state)?;
            state.connection = ConnectionState::Connecting;

            if let Some(timer) = state.connect_timeout.take() {
                timer.abort();
            }
            let player = Arc::clone(self);
            let timeout = link.config.connect_timeout();
            state.connect_timeout = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                player.on_connect_timeout();
            }));

            self.voice_request(&state, Some(channel_id))
        };

        info!("🔊 Conectando player {} al canal {:?}", self.guild_id, request.channel_id);
        self.send_voice_state(request);
        Ok(())
    }

    fn on_connect_timeout(&self) {
        {
            let mut state = self.state.lock();
            state.connect_timeout = None;
            if state.connection == ConnectionState::Connected {
                return;
            }
            state.connection = ConnectionState::Disconnected;
        }

        error!("⏱️ Timeout de conexión de voz en guild {}", self.guild_id);
        self.emit(LinkEvent::ConnectionTimeout {
            guild_id: self.guild_id,
        });
    }

    fn mark_connected(&self, state: &mut SessionState) {
        if let Some(timer) = state.connect_timeout.take() {
            timer.abort();
        }
        state.connection = ConnectionState::Connected;
    }

    /// Leaves the voice channel and forgets the handshake.
    pub fn disconnect(&self) {
        let request = {
            let mut state = self.state.lock();
            if let Some(timer) = state.connect_timeout.take() {
                timer.abort();
            }
            state.handshake.clear();
            state.connection = ConnectionState::Disconnected;
            self.voice_request(&state, None)
        };

        info!("🔇 Player {} desconectado del canal de voz", self.guild_id);
        self.send_voice_state(request);
    }

    /// Tears the session down: leaves voice, drops the node-side player and
    /// removes the session from the registry.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.disconnect();
        if let Some(node) = self.node() {
            node.send(Outgoing::Destroy {
                guild_id: self.guild_id.to_string(),
            });
        }

        if let Some(link) = self.link.upgrade() {
            link.players.remove(self);
            info!("🗑️ Player {} destruido", self.guild_id);
            link.emit(LinkEvent::PlayerDestroy {
                guild_id: self.guild_id,
            });
        }
    }

    /// Switches voice channel, reconnecting if it changed.
    pub fn set_voice_channel(self: &Arc<Self>, channel_id: ChannelId) -> LinkResult<()> {
        {
            let mut state = self.state.lock();
            if state.voice_channel_id == Some(channel_id) {
                return Ok(());
            }
            state.voice_channel_id = Some(channel_id);
            state.connection = ConnectionState::Disconnected;
        }
        self.connect()
    }

    pub fn set_self_deaf(&self, deaf: bool) {
        self.set_voice_flags(|state| std::mem::replace(&mut state.self_deaf, deaf) != deaf);
    }

    pub fn set_self_mute(&self, mute: bool) {
        self.set_voice_flags(|state| std::mem::replace(&mut state.self_mute, mute) != mute);
    }

    /// Applies `change`; resends the join request when a flag changed while
    /// the session is not disconnected.
    fn set_voice_flags(&self, change: impl FnOnce(&mut SessionState) -> bool) {
        let request = {
            let mut state = self.state.lock();
            if !change(&mut *state) || state.connection == ConnectionState::Disconnected {
                return;
            }
            let channel_id = state.voice_channel_id;
            self.voice_request(&state, channel_id)
        };
        self.send_voice_state(request);
    }

    /// Sends the voice update to the bound node if both halves of the
    /// handshake are present.
    pub fn send_voice_update(&self) -> LinkResult<()> {
        let link = self.ensure_alive()?;
        let mut state = self.state.lock();
        self.bound_node(&link, &mut state)?;
        self.send_voice_update_locked(&mut state);
        Ok(())
    }

    fn send_voice_update_locked(&self, state: &mut SessionState) -> bool {
        let Some(handshake) = state.handshake.complete() else {
            debug!("🤝 Handshake incompleto para guild {}", self.guild_id);
            return false;
        };
        let Some(node) = state.node.clone() else {
            return false;
        };

        self.mark_connected(state);
        node.send(handshake.into_command(self.guild_id));
        debug!("🤝 Voice update enviado a {} para guild {}", node.identifier(), self.guild_id);
        true
    }

    /// Session-id half of the handshake (bot's own voice state).
    pub(crate) fn on_voice_state(&self, session_id: String, channel_id: Option<ChannelId>) {
        let mut state = self.state.lock();
        let changed = state.handshake.session_id() != Some(session_id.as_str());
        state.handshake.set_session_id(session_id);

        if let Some(channel_id) = channel_id {
            if state.voice_channel_id != Some(channel_id) {
                debug!("🔀 Player {} movido al canal {}", self.guild_id, channel_id);
                state.voice_channel_id = Some(channel_id);
            }
        }

        if changed || state.connection == ConnectionState::Connecting {
            self.send_voice_update_locked(&mut state);
        }
    }

    /// Token/endpoint half of the handshake. Moves the session to a node in
    /// the endpoint's region first when the bound node is pinned elsewhere.
    pub(crate) fn on_voice_server(&self, token: String, endpoint: String) {
        let Some(link) = self.link.upgrade() else {
            return;
        };

        let mut state = self.state.lock();
        state.handshake.set_server(token, endpoint.clone());

        let wanted = link.config.regions.classify(&endpoint);
        let pinned = state.node.as_ref().and_then(|n| n.descriptor().region);
        if pinned.is_some_and(|region| region != wanted) {
            if let Some(target) = link.pool.best_node_in_region(wanted) {
                if let Some(from) = self.rebind(&mut state, &target) {
                    if state.handshake.is_complete() {
                        self.mark_connected(&mut state);
                    }
                    drop(state);

                    info!(
                        "🌍 Player {} movido a {} (región {:?})",
                        self.guild_id,
                        target.identifier(),
                        wanted
                    );
                    self.emit(LinkEvent::PlayerMoved {
                        guild_id: self.guild_id,
                        from,
                        to: target.identifier().to_string(),
                    });
                    return;
                }
            }
        }

        self.send_voice_update_locked(&mut state);
    }

    // Nodos

    /// Rebinds the session to `target`, replaying voice, filters, recorder
    /// and the current track there.
    pub fn move_node(&self, target: &Arc<Node>) -> LinkResult<()> {
        if !target.is_connected() {
            return Err(LinkError::NodeNotConnected(target.identifier().to_string()));
        }

        let from = {
            let mut state = self.state.lock();
            match self.rebind(&mut state, target) {
                Some(from) => from,
                None => return Ok(()),
            }
        };

        info!(
            "🔀 Player {} movido de {} a {}",
            self.guild_id,
            from.as_deref().unwrap_or("ninguno"),
            target.identifier()
        );
        self.emit(LinkEvent::PlayerMoved {
            guild_id: self.guild_id,
            from,
            to: target.identifier().to_string(),
        });
        Ok(())
    }

    /// `None` if already bound to `target`; otherwise the previous node id.
    fn rebind(&self, state: &mut SessionState, target: &Arc<Node>) -> Option<Option<String>> {
        if state.node.as_ref().is_some_and(|n| Arc::ptr_eq(n, target)) {
            return None;
        }

        let guild_id = self.guild_id.to_string();
        state.moving = true;
        let was_recording = state.recorder.started;

        let previous = state.node.take();
        if let Some(old) = &previous {
            if was_recording {
                old.send(Outgoing::Record {
                    guild_id: guild_id.clone(),
                    options: None,
                });
            }
            old.send(Outgoing::Destroy {
                guild_id: guild_id.clone(),
            });
        }
        state.node = Some(Arc::clone(target));

        if let Some(handshake) = state.handshake.complete() {
            state.connection = ConnectionState::Connecting;
            target.send(handshake.into_command(self.guild_id));
        }

        if state.filters.is_enabled() {
            target.send(Outgoing::Filters {
                guild_id: guild_id.clone(),
                filters: state.filters.clone(),
            });
        }

        if was_recording {
            if let Some(options) = state.recorder.options.clone() {
                target.send(Outgoing::Record {
                    guild_id: guild_id.clone(),
                    options: Some(options),
                });
            }
        }

        match (&state.current, state.playing) {
            (Some(track), true) => {
                let start_time = if track.is_stream() { 0 } else { state.position };
                target.send(Outgoing::Play {
                    guild_id,
                    track: track.encoded().to_string(),
                    start_time: Some(start_time),
                    end_time: None,
                    no_replace: None,
                    pause: state.paused.then_some(true),
                });
            }
            _ => state.moving = false,
        }

        Some(previous.map(|n| n.identifier().to_string()))
    }

    /// Round trip between the voice gateway and the node; `None` when not
    /// connected or when the node does not answer pings.
    pub async fn ping(&self) -> LinkResult<Option<Duration>> {
        let node = {
            let state = self.state.lock();
            match (&state.node, state.connection) {
                (Some(node), ConnectionState::Connected) => Arc::clone(node),
                _ => return Ok(None),
            }
        };
        node.ping(Some(self.guild_id.to_string())).await
    }

    // Reproducción

    /// Plays `current`, or the next queue item when nothing is loaded.
    ///
    /// Fails with [`LinkError::QueueEmpty`] when there is nothing to play.
    /// Items that cannot be resolved are reported as
    /// [`LinkEvent::TrackException`] and skipped.
    pub async fn play(self: &Arc<Self>, options: PlayOptions) -> LinkResult<()> {
        let link = self.ensure_alive()?;
        let _guard = self.advance_lock.lock().await;
        // destroy() pudo correr mientras se esperaba el lock
        self.ensure_alive()?;

        let has_current = {
            let mut state = self.state.lock();
            self.bound_node(&link, &mut state)?;
            state.current.is_some()
        };

        if !has_current {
            if self.queue.size().await == 0 {
                return Err(LinkError::QueueEmpty);
            }
            match self.next_track(&link).await {
                Some(track) => self.state.lock().current = Some(track),
                None => {
                    warn!("⚠️ Ningún track de la cola pudo resolverse en guild {}", self.guild_id);
                    return Ok(());
                }
            }
        }

        self.start_current(options)
    }

    fn start_current(&self, options: PlayOptions) -> LinkResult<()> {
        let (node, payload) = {
            let mut state = self.state.lock();
            if self.is_destroyed() {
                return Err(LinkError::PlayerDestroyed(self.guild_id.to_string()));
            }
            let track = state.current.as_ref().ok_or(LinkError::QueueEmpty)?;
            let node = state.node.clone().ok_or(LinkError::NoAvailableNode)?;

            info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.title());
            let payload = Outgoing::Play {
                guild_id: self.guild_id.to_string(),
                track: track.encoded().to_string(),
                start_time: options.start_time,
                end_time: options.end_time,
                no_replace: options.no_replace.then_some(true),
                pause: options.pause,
            };
            state.playing = true;
            (node, payload)
        };

        node.send(payload);
        Ok(())
    }

    /// Dequeues until something playable comes out. Each unresolvable item
    /// is reported and dropped, so an all-failing queue ends after one pass.
    async fn next_track(&self, link: &LinkShared) -> Option<Track> {
        while let Some(item) = self.queue.poll().await {
            if self.is_destroyed() {
                return None;
            }

            let stub = match item {
                QueueItem::Resolved(track) => return Some(track),
                QueueItem::Unresolved(stub) => stub,
            };

            match link.resolver.resolve(link, &stub).await {
                // Resultado descartado si el player murió mientras tanto
                Ok(_) if self.is_destroyed() => return None,
                Ok(track) => return Some(track),
                Err(e) => {
                    warn!("⚠️ No se pudo resolver '{}': {}", stub.title, e);
                    self.emit(LinkEvent::TrackException {
                        guild_id: self.guild_id,
                        track: Some(QueueItem::Unresolved(stub)),
                        message: e.to_string(),
                    });
                }
            }
        }
        None
    }

    /// Spawns queue advancement, optionally re-enqueueing a finished track
    /// first.
    fn advance(self: &Arc<Self>, requeue: Option<Track>) {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = player.advance_lock.lock().await;
            if let Some(track) = requeue {
                if let Err(e) = player.queue.add(track.into()).await {
                    warn!("⚠️ No se pudo re-encolar en guild {}: {}", player.guild_id, e);
                }
            }
            player.poll_next().await;
        });
    }

    fn requeue(self: &Arc<Self>, track: Track) {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = player.advance_lock.lock().await;
            if let Err(e) = player.queue.add(track.into()).await {
                warn!("⚠️ No se pudo re-encolar en guild {}: {}", player.guild_id, e);
            }
        });
    }

    async fn poll_next(&self) {
        let Some(link) = self.link.upgrade() else {
            return;
        };

        match self.next_track(&link).await {
            Some(track) => {
                self.state.lock().current = Some(track);
                if let Err(e) = self.start_current(PlayOptions::default()) {
                    warn!("⚠️ No se pudo iniciar el siguiente track en guild {}: {}", self.guild_id, e);
                }
            }
            None if self.is_destroyed() => {}
            None => {
                self.state.lock().current = None;
                info!("📭 Cola terminada en guild {}", self.guild_id);
                self.emit(LinkEvent::QueueEnd {
                    guild_id: self.guild_id,
                });
            }
        }
    }

    /// Skips the current track plus `amount - 1` queued ones. The node's
    /// resulting `TrackEnd` advances the queue.
    pub async fn skip(&self, amount: usize) -> LinkResult<()> {
        let node = {
            let state = self.state.lock();
            if !state.playing {
                return Ok(());
            }
            state.node.clone()
        };

        let size = self.queue.size().await;
        if amount > size {
            self.queue.clear().await;
        } else {
            self.queue.skip(amount.saturating_sub(1)).await;
        }

        let skipped = amount.max(1).min(size + 1);
        info!("⏭️ Saltando {} tracks en guild {}", skipped, self.guild_id);
        self.emit(LinkEvent::Skip {
            guild_id: self.guild_id,
            amount: skipped,
        });

        if let Some(node) = node {
            node.send(Outgoing::Stop {
                guild_id: self.guild_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn pause(&self, pause: bool) -> LinkResult<()> {
        let node = {
            let mut state = self.state.lock();
            if !state.playing {
                return Ok(());
            }
            let node = state.node.clone().ok_or(LinkError::NoAvailableNode)?;
            state.paused = pause;
            node
        };

        debug!("⏸️ Pausa = {} en guild {}", pause, self.guild_id);
        node.send(Outgoing::Pause {
            guild_id: self.guild_id.to_string(),
            pause,
        });
        Ok(())
    }

    /// Seeks within the current track. Past the end it skips instead.
    pub async fn seek(&self, position: u64) -> LinkResult<()> {
        let (node, duration) = {
            let state = self.state.lock();
            match &state.current {
                Some(track) if state.playing && track.is_seekable() => (state.node.clone(), track.duration()),
                _ => return Ok(()),
            }
        };

        if position > duration {
            return self.skip(1).await;
        }

        let from = self.exact_position();
        self.emit(LinkEvent::Seek {
            guild_id: self.guild_id,
            from,
            to: position,
        });

        if let Some(node) = node {
            node.send(Outgoing::Seek {
                guild_id: self.guild_id.to_string(),
                position,
            });
        }
        Ok(())
    }

    pub fn set_track_loop(&self, enabled: bool) {
        self.state.lock().track_repeat = enabled;
    }

    pub fn set_queue_loop(&self, enabled: bool) {
        self.state.lock().queue_repeat = enabled;
    }

    // Filtros

    /// Replaces the active filters and sends them to the node.
    pub fn set_filters(&self, filters: FilterOptions) -> LinkResult<()> {
        filters.validate()?;

        let node = {
            let mut state = self.state.lock();
            state.filters = filters.clone();
            state.node.clone()
        };

        if let Some(node) = node {
            debug!("🎛️ Filtros aplicados en guild {}", self.guild_id);
            node.send(Outgoing::Filters {
                guild_id: self.guild_id.to_string(),
                filters,
            });
        }
        Ok(())
    }

    /// Volumen en porcentaje (0 - 500)
    pub fn set_volume(&self, percent: u16) -> LinkResult<()> {
        let filters = self.filters().with_volume(f32::from(percent) / 100.0);
        self.set_filters(filters)
    }

    pub fn set_equalizer_preset(&self, preset: EqPreset) -> LinkResult<()> {
        let filters = self.filters().with_preset(preset);
        self.set_filters(filters)
    }

    pub fn clear_filters(&self) -> LinkResult<()> {
        self.set_filters(FilterOptions::default())
    }

    // Grabación

    pub fn start_recording(&self, options: RecordOptions) -> LinkResult<()> {
        let link = self.ensure_alive()?;
        if options.id.trim().is_empty() {
            return Err(LinkError::Recorder("id must be a non-empty string".into()));
        }

        let node = {
            let mut state = self.state.lock();
            if state.recorder.started {
                return Err(LinkError::Recorder("already recording".into()));
            }
            let node = self.bound_node(&link, &mut state)?;
            state.recorder.started = true;
            state.recorder.options = Some(options.clone());
            node
        };

        info!("⏺️ Grabación {} iniciada en guild {}", options.id, self.guild_id);
        node.send(Outgoing::Record {
            guild_id: self.guild_id.to_string(),
            options: Some(options),
        });
        Ok(())
    }

    /// Restarts recording with the options given to `start_recording`.
    pub fn resume_recording(&self) -> LinkResult<()> {
        let (node, options) = {
            let mut state = self.state.lock();
            let options = state
                .recorder
                .options
                .clone()
                .ok_or_else(|| LinkError::Recorder("cannot resume without starting first".into()))?;
            if state.recorder.started {
                return Err(LinkError::Recorder("already recording".into()));
            }
            state.recorder.started = true;
            (state.node.clone(), options)
        };

        if let Some(node) = node {
            node.send(Outgoing::Record {
                guild_id: self.guild_id.to_string(),
                options: Some(options),
            });
        }
        Ok(())
    }

    pub fn stop_recording(&self) -> LinkResult<()> {
        let node = {
            let mut state = self.state.lock();
            if !state.recorder.started {
                return Err(LinkError::Recorder("not recording".into()));
            }
            state.recorder.started = false;
            state.node.clone()
        };

        info!("⏹️ Grabación detenida en guild {}", self.guild_id);
        if let Some(node) = node {
            node.send(Outgoing::Record {
                guild_id: self.guild_id.to_string(),
                options: None,
            });
        }
        Ok(())
    }

    // Eventos del nodo

    pub(crate) fn update_state(&self, update: PlayerStateUpdate) {
        let mut state = self.state.lock();
        if let Some(position) = update.position {
            state.position = position;
        }
        if let Some(time) = update.time {
            state.position_timestamp = time;
        }

        if update.connected {
            if state.connection != ConnectionState::Connected {
                self.mark_connected(&mut state);
            }
        } else if state.connection == ConnectionState::Connected {
            debug!("🔌 Nodo reporta voz desconectada en guild {}", self.guild_id);
            state.connection = ConnectionState::Disconnected;
        }
    }

    pub(crate) fn handle_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::TrackStart { .. } => {
                let track = {
                    let mut state = self.state.lock();
                    state.playing = true;
                    state.paused = false;
                    if state.moving {
                        state.moving = false;
                        debug!("🔀 Replay tras migración en guild {}", self.guild_id);
                        return;
                    }
                    state.current.clone()
                };

                if let Some(track) = track {
                    debug!("▶️ TrackStart en guild {}: {}", self.guild_id, track.title());
                    self.emit(LinkEvent::TrackStart {
                        guild_id: self.guild_id,
                        track,
                    });
                }
            }
            PlayerEvent::TrackEnd { reason, .. } => self.on_track_end(reason),
            PlayerEvent::TrackStuck { threshold_ms, .. } => {
                warn!("⚠️ Track atascado en guild {} ({} ms)", self.guild_id, threshold_ms);
                self.emit(LinkEvent::TrackStuck {
                    guild_id: self.guild_id,
                    track: self.current(),
                    threshold_ms,
                });
            }
            PlayerEvent::TrackException { exception, .. } => {
                let message = exception
                    .message
                    .unwrap_or_else(|| "Unknown playback error".to_string());
                error!("❌ Excepción de reproducción en guild {}: {}", self.guild_id, message);
                self.emit(LinkEvent::TrackException {
                    guild_id: self.guild_id,
                    track: self.current().map(QueueItem::from),
                    message,
                });

                // Se decide con el estado actual, antes del TrackEnd que sigue
                let node = {
                    let state = self.state.lock();
                    state.node.clone().filter(|_| state.playing)
                };
                if let Some(node) = node {
                    info!("⏭️ Saltando track fallido en guild {}", self.guild_id);
                    self.emit(LinkEvent::Skip {
                        guild_id: self.guild_id,
                        amount: 1,
                    });
                    node.send(Outgoing::Stop {
                        guild_id: self.guild_id.to_string(),
                    });
                }
            }
            PlayerEvent::WebSocketClosed { code, reason, .. } => self.on_voice_closed(code, reason),
        }
    }

    fn on_track_end(self: &Arc<Self>, reason: TrackEndReason) {
        let (track, track_repeat, queue_repeat) = {
            let mut state = self.state.lock();
            if reason == TrackEndReason::Replaced {
                let requeue = state.current.clone().filter(|_| state.queue_repeat);
                drop(state);
                if let Some(track) = requeue {
                    self.requeue(track);
                }
                return;
            }
            state.playing = false;
            (state.current.clone(), state.track_repeat, state.queue_repeat)
        };

        debug!("⏹️ TrackEnd ({:?}) en guild {}", reason, self.guild_id);
        self.emit(LinkEvent::TrackEnd {
            guild_id: self.guild_id,
            track: track.clone(),
            reason,
        });

        if reason.is_failure() {
            self.advance(None);
            return;
        }

        match track {
            Some(_) if track_repeat => {
                if let Err(e) = self.start_current(PlayOptions::default()) {
                    warn!("⚠️ No se pudo repetir el track en guild {}: {}", self.guild_id, e);
                }
            }
            Some(track) if queue_repeat => self.advance(Some(track)),
            _ => self.advance(None),
        }
    }

    fn on_voice_closed(self: &Arc<Self>, code: u16, reason: String) {
        warn!("⚠️ Voz cerrada en guild {} (código {}): {}", self.guild_id, code, reason);
        self.emit(LinkEvent::PlayerDisconnect {
            guild_id: self.guild_id,
            code,
            reason,
        });

        match code {
            // Recuperables: reenviar la sesión de voz
            1001 | 1006 | 4015 => {
                let mut state = self.state.lock();
                self.send_voice_update_locked(&mut state);
            }
            // Sesión inválida: volver a unirse
            4006 | 4009 => {
                self.state.lock().connection = ConnectionState::Disconnected;
                if let Err(e) = self.connect() {
                    warn!("⚠️ No se pudo reconectar la voz en guild {}: {}", self.guild_id, e);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn handle_speaking(&self, event: SpeakingEvent) {
        let Some(user_id) = parse_user_id(&event.user_id) else {
            return;
        };
        let guild_id = self.guild_id;

        self.emit(match event.kind {
            SpeakingKind::Start => LinkEvent::SpeakingStart { guild_id, user_id },
            SpeakingKind::Stop => LinkEvent::SpeakingStop { guild_id, user_id },
            SpeakingKind::Disconnected => LinkEvent::UserDisconnect { guild_id, user_id },
        });
    }
}
