//! Notifications broadcast to the host application.
//!
//! Every component reports through one `tokio::sync::broadcast` channel;
//! subscribers that fall behind lose the oldest notifications rather than
//! stalling a node's read loop.

use serde_json::Value;
use serenity::model::id::{GuildId, UserId};

use crate::node::protocol::TrackEndReason;
use crate::sources::{QueueItem, Track};

#[derive(Debug, Clone)]
pub enum LinkEvent {
    // Nodos
    NodeConnect { node: String },
    NodeResume { node: String },
    NodeDisconnect { node: String, code: u16, reason: String },
    NodeError { node: String, message: String },
    NodeWarn { node: String, message: String },
    Pong { node: String, ping: Option<u64> },
    /// Every inbound frame, after it was handled
    Raw { node: String, payload: Value },

    // Players
    PlayerCreate { guild_id: GuildId },
    PlayerDestroy { guild_id: GuildId },
    PlayerMoved { guild_id: GuildId, from: Option<String>, to: String },
    PlayerDisconnect { guild_id: GuildId, code: u16, reason: String },
    ConnectionTimeout { guild_id: GuildId },

    // Tracks
    TrackStart { guild_id: GuildId, track: Track },
    TrackEnd { guild_id: GuildId, track: Option<Track>, reason: TrackEndReason },
    TrackStuck { guild_id: GuildId, track: Option<Track>, threshold_ms: u64 },
    TrackException { guild_id: GuildId, track: Option<QueueItem>, message: String },
    QueueEnd { guild_id: GuildId },
    Seek { guild_id: GuildId, from: u64, to: u64 },
    Skip { guild_id: GuildId, amount: usize },

    // Voz entrante (backends con recepción de audio)
    SpeakingStart { guild_id: GuildId, user_id: UserId },
    SpeakingStop { guild_id: GuildId, user_id: UserId },
    UserDisconnect { guild_id: GuildId, user_id: UserId },
    RecordFinished { node: String, guild_id: GuildId, id: String },
}

impl LinkEvent {
    /// Guild the notification belongs to, if any.
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            LinkEvent::PlayerCreate { guild_id }
            | LinkEvent::PlayerDestroy { guild_id }
            | LinkEvent::PlayerMoved { guild_id, .. }
            | LinkEvent::PlayerDisconnect { guild_id, .. }
            | LinkEvent::ConnectionTimeout { guild_id }
            | LinkEvent::TrackStart { guild_id, .. }
            | LinkEvent::TrackEnd { guild_id, .. }
            | LinkEvent::TrackStuck { guild_id, .. }
            | LinkEvent::TrackException { guild_id, .. }
            | LinkEvent::QueueEnd { guild_id }
            | LinkEvent::Seek { guild_id, .. }
            | LinkEvent::Skip { guild_id, .. }
            | LinkEvent::SpeakingStart { guild_id, .. }
            | LinkEvent::SpeakingStop { guild_id, .. }
            | LinkEvent::UserDisconnect { guild_id, .. }
            | LinkEvent::RecordFinished { guild_id, .. } => Some(*guild_id),
            _ => None,
        }
    }

    /// Node identifier for node-scoped notifications.
    pub fn node(&self) -> Option<&str> {
        match self {
            LinkEvent::NodeConnect { node }
            | LinkEvent::NodeResume { node }
            | LinkEvent::NodeDisconnect { node, .. }
            | LinkEvent::NodeError { node, .. }
            | LinkEvent::NodeWarn { node, .. }
            | LinkEvent::Pong { node, .. }
            | LinkEvent::Raw { node, .. }
            | LinkEvent::RecordFinished { node, .. } => Some(node),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LinkEvent::NodeError { .. }
                | LinkEvent::ConnectionTimeout { .. }
                | LinkEvent::TrackException { .. }
        )
    }
}
