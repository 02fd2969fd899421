//! Voice gateway boundary.
//!
//! The host owns the gateway connection; a player only asks it to join or
//! leave a channel ([`VoiceGateway`]) and is fed the two halves of the
//! handshake back through [`crate::MusicLink::handle_voice_state`] and
//! [`crate::MusicLink::handle_voice_server`].

use serde_json::{json, Value};
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc;
use tracing::warn;

use crate::node::protocol::{Outgoing, VoiceServerEvent};

/// Join/leave request (gateway op 4) for the host to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStateRequest {
    pub guild_id: GuildId,
    /// `None` = salir del canal
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateRequest {
    /// Raw gateway payload, for hosts that write frames themselves.
    pub fn to_gateway_payload(&self) -> Value {
        json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id.to_string(),
                "channel_id": self.channel_id.map(|c| c.to_string()),
                "self_mute": self.self_mute,
                "self_deaf": self.self_deaf,
            }
        })
    }
}

/// Host-provided sink for voice state requests.
pub trait VoiceGateway: Send + Sync {
    fn send_voice_state(&self, request: VoiceStateRequest);
}

impl VoiceGateway for mpsc::UnboundedSender<VoiceStateRequest> {
    fn send_voice_state(&self, request: VoiceStateRequest) {
        if self.send(request).is_err() {
            warn!("⚠️ Canal de voz del host cerrado, solicitud descartada");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VoiceServer {
    token: String,
    endpoint: String,
}

/// The two halves of the voice handshake, in whatever order they arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceHandshake {
    session_id: Option<String>,
    server: Option<VoiceServer>,
}

impl VoiceHandshake {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.server.as_ref().map(|s| s.endpoint.as_str())
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn set_server(&mut self, token: impl Into<String>, endpoint: impl Into<String>) {
        self.server = Some(VoiceServer {
            token: token.into(),
            endpoint: endpoint.into(),
        });
    }

    pub fn clear(&mut self) {
        self.session_id = None;
        self.server = None;
    }

    pub fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.server.is_some()
    }

    /// Both halves, or nothing. This is the only way to obtain a
    /// [`CompleteHandshake`].
    pub fn complete(&self) -> Option<CompleteHandshake> {
        match (&self.session_id, &self.server) {
            (Some(session_id), Some(server)) => Some(CompleteHandshake {
                session_id: session_id.clone(),
                token: server.token.clone(),
                endpoint: server.endpoint.clone(),
            }),
            _ => None,
        }
    }
}

/// Proof that both halves of the handshake are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteHandshake {
    session_id: String,
    token: String,
    endpoint: String,
}

impl CompleteHandshake {
    pub(crate) fn into_command(self, guild_id: GuildId) -> Outgoing {
        let guild_id = guild_id.to_string();
        Outgoing::VoiceUpdate {
            guild_id: guild_id.clone(),
            session_id: self.session_id,
            event: VoiceServerEvent {
                token: self.token,
                guild_id,
                endpoint: self.endpoint,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_requires_both_halves() {
        let mut handshake = VoiceHandshake::default();
        assert!(handshake.complete().is_none());

        handshake.set_server("token", "rotterdam1.discord.media:443");
        assert!(handshake.complete().is_none());

        handshake.set_session_id("session");
        let complete = handshake.complete().unwrap();
        match complete.into_command(GuildId::new(5)) {
            Outgoing::VoiceUpdate { guild_id, session_id, event } => {
                assert_eq!(guild_id, "5");
                assert_eq!(session_id, "session");
                assert_eq!(event.token, "token");
                assert_eq!(event.guild_id, "5");
            }
            other => panic!("unexpected {:?}", other),
        }

        handshake.clear();
        assert!(!handshake.is_complete());
    }

    #[test]
    fn test_leave_payload_has_null_channel() {
        let request = VoiceStateRequest {
            guild_id: GuildId::new(1),
            channel_id: None,
            self_mute: false,
            self_deaf: true,
        };
        let payload = request.to_gateway_payload();
        assert_eq!(payload["op"], 4);
        assert!(payload["d"]["channel_id"].is_null());
        assert_eq!(payload["d"]["self_deaf"], true);
    }
}
