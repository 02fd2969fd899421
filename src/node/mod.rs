//! # Node Module
//!
//! One [`Node`] per configured backend. A node owns its socket, the
//! outbound buffer used while the socket is down, its latest stats and the
//! reconnection policy.
//!
//! ## Lifecycle
//!
//! ```text
//! DISCONNECTED --connect()--> CONNECTING --open--> CONNECTED
//!      ^                                              |
//!      +------------------ close ---------------------+
//! ```
//!
//! An abnormal close moves every player bound to the node to the best
//! remaining node, then schedules a reconnect (immediately after the first
//! failure, every `retry_interval` afterwards) until the attempt budget is
//! spent. An authentication failure spends the whole budget at once.
//!
//! Frames from one node are handled in arrival order on the node's read
//! task.

pub mod pool;
pub mod protocol;
pub mod rest;
pub mod stats;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use serenity::model::id::UserId;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::audio::player::Player;
use crate::config::{CommandChannel, NodeDescriptor};
use crate::error::{LinkError, LinkResult};
use crate::events::LinkEvent;
use crate::link::LinkShared;
use protocol::{parse_guild_id, Incoming, Outgoing, Ready, RequestCommand};
use rest::RestClient;
use stats::NodeStats;

pub use pool::NodePool;

/// Cuánto esperar un `pong` antes de asumir que el nodo no soporta `ping`
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Código de cierre cuando no llegó frame de cierre
const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Connecting,
    Connected,
    Disconnected,
}

struct NodeInner {
    state: NodeState,
    /// Se incrementa antes de cada intento y vuelve a 0 al abrir
    retry_attempts: u32,
    stats: NodeStats,
    penalty: i64,
    outbound: VecDeque<Outgoing>,
    writer: Option<mpsc::UnboundedSender<Message>>,
    /// Id de sesión del nodo (sólo tras `ready`)
    session_id: Option<String>,
    /// Cierre pedido por nosotros
    closing: bool,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    pings: Vec<(Instant, oneshot::Sender<Duration>)>,
}

/// Connection to one backend node.
pub struct Node {
    descriptor: NodeDescriptor,
    rest: RestClient,
    link: Weak<LinkShared>,
    inner: Mutex<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.identifier())
            .field("state", &self.state())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(descriptor: NodeDescriptor, rest: RestClient, link: Weak<LinkShared>) -> Self {
        Self {
            descriptor,
            rest,
            link,
            inner: Mutex::new(NodeInner {
                state: NodeState::Disconnected,
                retry_attempts: 0,
                stats: NodeStats::default(),
                penalty: 0,
                outbound: VecDeque::new(),
                writer: None,
                session_id: None,
                closing: false,
                connection: None,
                reconnect: None,
                pings: Vec::new(),
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        self.descriptor.identifier()
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    pub fn stats(&self) -> NodeStats {
        self.inner.lock().stats
    }

    pub fn retry_attempts(&self) -> u32 {
        self.inner.lock().retry_attempts
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// Mensajes pendientes de envío
    pub fn queued_commands(&self) -> usize {
        self.inner.lock().outbound.len()
    }

    /// Load penalty; `None` stands for "infinite" (not connected).
    pub fn total_penalty(&self) -> Option<i64> {
        let inner = self.inner.lock();
        if inner.state != NodeState::Connected || inner.writer.is_none() {
            return None;
        }
        Some(inner.penalty)
    }

    fn uses_requests(&self) -> bool {
        self.descriptor.command_channel == CommandChannel::DiscreteRequest
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(link) = self.link.upgrade() {
            link.emit(event);
        }
    }

    fn warn(&self, message: String) {
        warn!("⚠️ [{}] {}", self.identifier(), message);
        self.emit(LinkEvent::NodeWarn {
            node: self.identifier().to_string(),
            message,
        });
    }

    fn report_error(&self, message: String) {
        error!("❌ [{}] {}", self.identifier(), message);
        self.emit(LinkEvent::NodeError {
            node: self.identifier().to_string(),
            message,
        });
    }

    /// Opens the socket. No-op unless the node is disconnected.
    pub fn connect(self: &Arc<Self>) {
        let Some(link) = self.link.upgrade() else {
            return;
        };
        let Some(user_id) = link.user_id() else {
            warn!("⚠️ [{}] connect() antes de start(): falta el user id", self.identifier());
            return;
        };

        let mut inner = self.inner.lock();
        if inner.state != NodeState::Disconnected {
            return;
        }
        inner.retry_attempts = inner.retry_attempts.saturating_add(1);
        inner.state = NodeState::Connecting;
        inner.closing = false;

        info!(
            "🔌 Conectando a nodo {} (intento {})",
            self.identifier(),
            inner.retry_attempts
        );

        let node = Arc::clone(self);
        let client_name = link.config.client_name.clone();
        inner.connection = Some(tokio::spawn(async move {
            node.run(user_id, client_name).await;
        }));
    }

    /// Requests a clean close. Cancels any pending reconnect.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.reconnect.take() {
            task.abort();
        }
        if inner.state == NodeState::Disconnected {
            return;
        }

        inner.closing = true;
        match &inner.writer {
            Some(writer) => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "disconnect".into(),
                };
                // Si el writer ya cayó, el cierre llega igual por handle_close
                // y `closing` tiene que seguir en pie para verlo limpio
                let _ = writer.send(Message::Close(Some(frame)));
                return;
            }
            None => {
                // Todavía conectando: cancelar el intento
                if let Some(task) = inner.connection.take() {
                    task.abort();
                }
            }
        }

        inner.state = NodeState::Disconnected;
        inner.writer = None;
        inner.closing = false;
        drop(inner);

        info!("🔌 Nodo {} desconectado", self.identifier());
        self.emit(LinkEvent::NodeDisconnect {
            node: self.identifier().to_string(),
            code: u16::from(CloseCode::Normal),
            reason: "disconnect".into(),
        });
    }

    /// Sends a command, or buffers it until the node can take it.
    pub fn send(self: &Arc<Self>, payload: Outgoing) {
        let mut inner = self.inner.lock();
        let Err(payload) = self.dispatch(&inner, payload) else {
            return;
        };

        let message = format!(
            "Node is not connected. Queueing packet: {}",
            serde_json::to_string(&payload).unwrap_or_default()
        );
        inner.outbound.push_back(payload);
        drop(inner);
        self.warn(message);
    }

    /// Hands the command to the socket writer or the REST channel. Gives it
    /// back when neither can take it right now.
    fn dispatch(self: &Arc<Self>, inner: &NodeInner, payload: Outgoing) -> Result<(), Outgoing> {
        if inner.state != NodeState::Connected {
            return Err(payload);
        }

        if self.uses_requests() && !matches!(payload, Outgoing::Ping { .. } | Outgoing::Record { .. }) {
            let Some(session_id) = inner.session_id.clone() else {
                return Err(payload);
            };
            let node = Arc::clone(self);
            let command = payload.into_request();
            tokio::spawn(async move {
                node.execute(&session_id, command).await;
            });
            return Ok(());
        }

        let Some(writer) = &inner.writer else {
            return Err(payload);
        };
        let text = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(e) => {
                error!("❌ [{}] No se pudo serializar el comando: {}", self.identifier(), e);
                return Ok(());
            }
        };
        debug!("📤 [{}] {}", self.identifier(), text);
        writer.send(Message::Text(text)).map_err(|_| payload)
    }

    async fn execute(&self, session_id: &str, command: RequestCommand) {
        let result = match &command {
            RequestCommand::UpdatePlayer {
                guild_id,
                update,
                no_replace,
            } => {
                self.rest
                    .update_player(session_id, guild_id, update, *no_replace)
                    .await
            }
            RequestCommand::DestroyPlayer { guild_id } => {
                self.rest.destroy_player(session_id, guild_id).await
            }
            RequestCommand::UpdateSession { key, timeout } => {
                self.rest.update_session(session_id, key, *timeout).await
            }
            RequestCommand::SocketOnly(_) => Ok(()),
        };

        if let Err(e) = result {
            self.report_error(format!("Request failed: {}", e));
        }
    }

    /// Drains the outbound buffer in FIFO order while the node can take it.
    fn flush(self: &Arc<Self>, inner: &mut NodeInner) {
        let mut sent = 0;
        while let Some(payload) = inner.outbound.pop_front() {
            if let Err(payload) = self.dispatch(inner, payload) {
                inner.outbound.push_front(payload);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            debug!("📤 [{}] {} comandos pendientes enviados", self.identifier(), sent);
        }
    }

    /// Round-trip latency; `Ok(None)` when the node does not answer `ping`.
    pub async fn ping(self: &Arc<Self>, guild_id: Option<String>) -> LinkResult<Option<Duration>> {
        if !self.is_connected() {
            return Err(LinkError::NodeNotConnected(self.identifier().to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.inner.lock().pings.push((Instant::now(), tx));
        self.send(Outgoing::Ping { guild_id });

        match tokio::time::timeout(PING_TIMEOUT, rx).await {
            Ok(Ok(latency)) => Ok(Some(latency)),
            _ => {
                debug!("🏓 [{}] sin pong, ¿el nodo soporta ping?", self.identifier());
                Ok(None)
            }
        }
    }

    async fn run(self: Arc<Self>, user_id: UserId, client_name: String) {
        let request = match self.handshake_request(user_id, &client_name) {
            Ok(request) => request,
            Err(e) => {
                self.report_error(e.to_string());
                self.handle_close(ABNORMAL_CLOSE, e.to_string());
                return;
            }
        };

        let (stream, response) = match tokio_tungstenite::connect_async(request).await {
            Ok(ok) => ok,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                self.on_auth_failure();
                return;
            }
            Err(e) => {
                debug!("🔌 [{}] conexión fallida: {}", self.identifier(), e);
                self.handle_close(ABNORMAL_CLOSE, e.to_string());
                return;
            }
        };

        let resumed = response
            .headers()
            .get("session-resumed")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || is_close {
                    break;
                }
            }
        });

        self.on_open(tx, resumed);

        let mut close = None;
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_message(&text),
                Ok(Message::Close(frame)) => {
                    close = Some(
                        frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((u16::from(CloseCode::Status), String::new())),
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.report_error(e.to_string());
                    break;
                }
            }
        }

        writer.abort();
        let (code, reason) = close.unwrap_or((ABNORMAL_CLOSE, String::new()));
        self.handle_close(code, reason);
    }

    fn handshake_request(&self, user_id: UserId, client_name: &str) -> LinkResult<Request> {
        let scheme = if self.descriptor.secure { "wss" } else { "ws" };
        let mut url = format!("{}://{}:{}", scheme, self.descriptor.hostname, self.descriptor.port);
        if self.uses_requests() {
            url.push_str(&format!("/v{}/websocket", rest::API_VERSION));
        }

        let mut request = url.into_client_request()?;
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| LinkError::InvalidConfig(format!("invalid header value: {}", e)))
        };

        let headers = request.headers_mut();
        headers.insert("Authorization", header(&self.descriptor.password)?);
        headers.insert("User-Id", header(&user_id.to_string())?);
        headers.insert("Client-Name", header(client_name)?);
        headers.insert(
            "Speaking-Events",
            header(if self.descriptor.send_speaking_events { "true" } else { "false" })?,
        );
        if let Some(key) = &self.descriptor.resume_key {
            headers.insert("Resume-Key", header(key)?);
        }

        Ok(request)
    }

    /// Socket is open: attach the writer, configure resuming and drain the
    /// buffer.
    pub(crate) fn on_open(self: &Arc<Self>, writer: mpsc::UnboundedSender<Message>, resumed: bool) {
        {
            let mut inner = self.inner.lock();
            inner.state = NodeState::Connected;
            inner.retry_attempts = 0;
            inner.writer = Some(writer);

            if !self.uses_requests() {
                if let (false, Some(key)) = (resumed, &self.descriptor.resume_key) {
                    let configure = Outgoing::ConfigureResuming {
                        key: key.clone(),
                        timeout: self.descriptor.resume_timeout,
                    };
                    if let Err(payload) = self.dispatch(&inner, configure) {
                        inner.outbound.push_front(payload);
                    }
                }
                self.flush(&mut inner);
            }
        }

        info!("✅ Nodo {} conectado", self.identifier());
        self.emit(LinkEvent::NodeConnect {
            node: self.identifier().to_string(),
        });
        if resumed {
            info!("♻️ Sesión del nodo {} reanudada", self.identifier());
            self.emit(LinkEvent::NodeResume {
                node: self.identifier().to_string(),
            });
        }
    }

    fn on_auth_failure(self: &Arc<Self>) {
        self.inner.lock().retry_attempts = u32::MAX;
        self.report_error("Authentication failed!".to_string());
        self.handle_close(ABNORMAL_CLOSE, "authentication failed".to_string());
    }

    pub(crate) fn handle_close(self: &Arc<Self>, code: u16, reason: String) {
        let (clean, attempts) = {
            let mut inner = self.inner.lock();
            inner.state = NodeState::Disconnected;
            inner.writer = None;
            inner.session_id = None;
            inner.connection = None;
            inner.pings.clear();
            (std::mem::take(&mut inner.closing), inner.retry_attempts)
        };

        let Some(link) = self.link.upgrade() else {
            return;
        };

        if clean {
            info!("🔌 Nodo {} desconectado ({})", self.identifier(), code);
            link.emit(LinkEvent::NodeDisconnect {
                node: self.identifier().to_string(),
                code,
                reason,
            });
            return;
        }

        self.fail_over(&link);

        let mut message = format!("WebSocket closed abnormally with code {}.", code);
        if !reason.is_empty() {
            message.push(' ');
            message.push_str(&reason);
        }
        self.report_error(message);

        if attempts > self.descriptor.max_retry_attempts {
            error!(
                "❌ Nodo {} sin más reintentos ({} intentos)",
                self.identifier(),
                self.descriptor.max_retry_attempts
            );
            return;
        }

        if attempts == 0 {
            self.connect();
            return;
        }

        let node = Arc::clone(self);
        let interval = self.descriptor.retry_interval();
        debug!("⏳ [{}] reintento en {:?}", self.identifier(), interval);
        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            node.connect();
        });
        self.inner.lock().reconnect = Some(task);
    }

    /// Moves every player bound to this node to the best remaining node.
    fn fail_over(self: &Arc<Self>, link: &LinkShared) {
        let players = link.players.bound_to(self);
        if players.is_empty() {
            return;
        }

        match link.pool.best_node() {
            Ok(target) => {
                info!(
                    "🔀 Moviendo {} players de {} a {}",
                    players.len(),
                    self.identifier(),
                    target.identifier()
                );
                for player in players {
                    if let Err(e) = player.move_node(&target) {
                        warn!("⚠️ No se pudo mover el player {}: {}", player.guild_id(), e);
                    }
                }
            }
            Err(e) => {
                warn!(
                    "⚠️ {} players quedan en {} sin nodo disponible: {}",
                    players.len(),
                    self.identifier(),
                    e
                );
            }
        }
    }

    /// Player owning `guild_id`, only if it is still bound to this node.
    fn bound_player(self: &Arc<Self>, link: &LinkShared, guild_id: &str) -> Option<Arc<Player>> {
        let guild_id = parse_guild_id(guild_id)?;
        link.players.get(guild_id).filter(|player| player.is_bound_to(self))
    }

    pub(crate) fn handle_message(self: &Arc<Self>, text: &str) {
        let payload: Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                self.warn(format!("Invalid payload: {}", e));
                return;
            }
        };
        let Some(link) = self.link.upgrade() else {
            return;
        };

        match Incoming::parse(&payload) {
            Ok(Incoming::Ready(ready)) => self.on_ready(ready),
            Ok(Incoming::Stats(stats)) => {
                let mut inner = self.inner.lock();
                inner.penalty = stats.penalty();
                inner.stats = stats;
            }
            Ok(Incoming::Pong { ping }) => {
                let waiters = std::mem::take(&mut self.inner.lock().pings);
                for (sent_at, tx) in waiters {
                    let latency = ping.map(Duration::from_millis).unwrap_or_else(|| sent_at.elapsed());
                    let _ = tx.send(latency);
                }
                link.emit(LinkEvent::Pong {
                    node: self.identifier().to_string(),
                    ping,
                });
            }
            Ok(Incoming::PlayerUpdate(update)) => {
                if let Some(player) = self.bound_player(&link, &update.guild_id) {
                    player.update_state(update.state);
                }
            }
            Ok(Incoming::Event(event)) => {
                if let Some(player) = self.bound_player(&link, event.guild_id()) {
                    player.handle_event(event);
                }
            }
            Ok(Incoming::Speaking(event)) => {
                if let Some(player) = self.bound_player(&link, &event.guild_id) {
                    player.handle_speaking(event);
                }
            }
            Ok(Incoming::RecordFinished(record)) => {
                if let Some(guild_id) = parse_guild_id(&record.guild_id) {
                    link.emit(LinkEvent::RecordFinished {
                        node: self.identifier().to_string(),
                        guild_id,
                        id: record.id,
                    });
                }
            }
            Ok(Incoming::Unknown(op)) => self.warn(format!("Unknown payload op: {}", op)),
            Err(e) => self.warn(format!("Unhandled payload: {}", e)),
        }

        link.emit(LinkEvent::Raw {
            node: self.identifier().to_string(),
            payload,
        });
    }

    fn on_ready(self: &Arc<Self>, ready: Ready) {
        debug!("🆔 [{}] sesión {} (resumed: {})", self.identifier(), ready.session_id, ready.resumed);

        let mut inner = self.inner.lock();
        inner.session_id = Some(ready.session_id.clone());
        if !self.uses_requests() {
            return;
        }

        if let (false, Some(key)) = (ready.resumed, &self.descriptor.resume_key) {
            let node = Arc::clone(self);
            let command = RequestCommand::UpdateSession {
                key: key.clone(),
                timeout: self.descriptor.resume_timeout,
            };
            tokio::spawn(async move {
                node.execute(&ready.session_id, command).await;
            });
        }
        self.flush(&mut inner);
    }
}
