//! Error types shared by the node pool, the players and the sources.

use thiserror::Error;

/// Errores del cliente de nodos
#[derive(Error, Debug)]
pub enum LinkError {
    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No node in the pool (or in the requested region) is connected
    #[error("No available nodes")]
    NoAvailableNode,

    /// The target node exists but is not in the CONNECTED state
    #[error("Node {0} is not connected")]
    NodeNotConnected(String),

    /// `connect()` was called without a voice channel
    #[error("No voice channel id provided")]
    MissingVoiceChannel,

    /// The two-part voice handshake did not complete in time
    #[error("Voice connection timeout for guild {0}")]
    ConnectionTimeout(String),

    /// The node rejected our credentials (HTTP 401 on upgrade)
    #[error("Authentication failed for node {0}")]
    AuthenticationFailed(String),

    /// `play()` found nothing to play
    #[error("The queue is empty")]
    QueueEmpty,

    /// The queue refused a new item
    #[error("The queue is full (max {0} tracks)")]
    QueueFull(usize),

    /// A queue position outside the current bounds
    #[error("Queue index {0} is out of range")]
    InvalidIndex(usize),

    /// An unresolved track could not be turned into a playable one
    #[error("Failed to resolve track {0}")]
    TrackResolution(String),

    /// Filter values outside the accepted ranges
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The node answered a REST call with an error status
    #[error("Request failed with status code {status}. Path: {path}. {message}")]
    Rest {
        status: u16,
        path: String,
        message: String,
    },

    /// A frame from the node could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Recorder misuse (double start, resume before start, ...)
    #[error("Recorder: {0}")]
    Recorder(String),

    /// The player was destroyed while an operation was in flight
    #[error("Player for guild {0} was destroyed")]
    PlayerDestroyed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Errores transitorios que el pool recupera por sí mismo
    pub fn is_transient(&self) -> bool {
        match self {
            LinkError::WebSocket(_) | LinkError::ConnectionTimeout(_) => true,
            LinkError::Http(e) => e.is_timeout() || e.is_connect(),
            LinkError::Rest { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;
