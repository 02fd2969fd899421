//! JSON frames exchanged with a node.
//!
//! Outbound frames are tagged by `op`; inbound frames are dispatched on
//! `op` first and, for `event`, on `type`. The same outbound commands can
//! be re-expressed as REST calls for nodes driven over discrete requests
//! (see [`Outgoing::into_request`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::{GuildId, UserId};
use std::num::NonZeroU64;

use super::stats::NodeStats;
use crate::audio::filters::FilterOptions;
use crate::error::{LinkError, LinkResult};
use crate::sources::LoadException;

/// `token` + `endpoint` half of the voice handshake, as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoiceServerEvent {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOptions {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encode_to_mp3: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Outgoing {
    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: String,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        no_replace: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pause: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Stop { guild_id: String },
    #[serde(rename_all = "camelCase")]
    Pause { guild_id: String, pause: bool },
    #[serde(rename_all = "camelCase")]
    Seek { guild_id: String, position: u64 },
    #[serde(rename_all = "camelCase")]
    Destroy { guild_id: String },
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: VoiceServerEvent,
    },
    #[serde(rename_all = "camelCase")]
    Filters {
        guild_id: String,
        #[serde(flatten)]
        filters: FilterOptions,
    },
    ConfigureResuming { key: String, timeout: u64 },
    #[serde(rename_all = "camelCase")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        guild_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Record {
        guild_id: String,
        #[serde(flatten)]
        options: Option<RecordOptions>,
    },
}

/// Body of `PATCH /sessions/{sid}/players/{gid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    /// `Some(None)` serializa `null` (detener)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceUpdateBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUpdateBody {
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// An outbound command re-expressed for the discrete-request channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestCommand {
    UpdatePlayer {
        guild_id: String,
        update: UpdatePlayer,
        no_replace: bool,
    },
    DestroyPlayer {
        guild_id: String,
    },
    UpdateSession {
        key: String,
        timeout: u64,
    },
    /// Sin equivalente REST: sólo viaja por el socket
    SocketOnly(Outgoing),
}

impl Outgoing {
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Outgoing::Play { guild_id, .. }
            | Outgoing::Stop { guild_id }
            | Outgoing::Pause { guild_id, .. }
            | Outgoing::Seek { guild_id, .. }
            | Outgoing::Destroy { guild_id }
            | Outgoing::VoiceUpdate { guild_id, .. }
            | Outgoing::Filters { guild_id, .. }
            | Outgoing::Record { guild_id, .. } => Some(guild_id),
            Outgoing::Ping { guild_id } => guild_id.as_deref(),
            Outgoing::ConfigureResuming { .. } => None,
        }
    }

    pub fn into_request(self) -> RequestCommand {
        match self {
            Outgoing::Play {
                guild_id,
                track,
                start_time,
                end_time,
                no_replace,
                pause,
            } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    encoded_track: Some(Some(track)),
                    position: Some(start_time.unwrap_or(0)),
                    end_time,
                    paused: pause,
                    ..UpdatePlayer::default()
                },
                no_replace: no_replace.unwrap_or(false),
            },
            Outgoing::Stop { guild_id } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    encoded_track: Some(None),
                    ..UpdatePlayer::default()
                },
                no_replace: false,
            },
            Outgoing::Pause { guild_id, pause } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    paused: Some(pause),
                    ..UpdatePlayer::default()
                },
                no_replace: false,
            },
            Outgoing::Seek { guild_id, position } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    position: Some(position),
                    ..UpdatePlayer::default()
                },
                no_replace: false,
            },
            Outgoing::Destroy { guild_id } => RequestCommand::DestroyPlayer { guild_id },
            Outgoing::VoiceUpdate {
                guild_id,
                session_id,
                event,
            } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    voice: Some(VoiceUpdateBody {
                        session_id,
                        token: event.token,
                        endpoint: event.endpoint,
                    }),
                    ..UpdatePlayer::default()
                },
                no_replace: false,
            },
            Outgoing::Filters { guild_id, filters } => RequestCommand::UpdatePlayer {
                guild_id,
                update: UpdatePlayer {
                    filters: Some(filters),
                    ..UpdatePlayer::default()
                },
                no_replace: false,
            },
            Outgoing::ConfigureResuming { key, timeout } => {
                RequestCommand::UpdateSession { key, timeout }
            }
            other @ (Outgoing::Ping { .. } | Outgoing::Record { .. }) => {
                RequestCommand::SocketOnly(other)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    #[serde(alias = "finished")]
    Finished,
    #[serde(alias = "loadFailed")]
    LoadFailed,
    #[serde(alias = "stopped")]
    Stopped,
    #[serde(alias = "replaced")]
    Replaced,
    #[serde(alias = "cleanup")]
    Cleanup,
}

impl TrackEndReason {
    /// El medio nunca llegó a sonar
    pub fn is_failure(self) -> bool {
        matches!(self, TrackEndReason::LoadFailed | TrackEndReason::Cleanup)
    }
}

/// Player-scoped `event` frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        exception: LoadException,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck { guild_id: String, threshold_ms: u64 },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        by_remote: bool,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            PlayerEvent::TrackStart { guild_id }
            | PlayerEvent::TrackEnd { guild_id, .. }
            | PlayerEvent::TrackException { guild_id, .. }
            | PlayerEvent::TrackStuck { guild_id, .. }
            | PlayerEvent::WebSocketClosed { guild_id, .. } => guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakingKind {
    Start,
    Stop,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingEvent {
    #[serde(rename = "type")]
    pub kind: SpeakingKind,
    pub guild_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PlayerStateUpdate {
    /// Epoch en milisegundos del muestreo
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerStateUpdate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    #[serde(default)]
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFinished {
    pub guild_id: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Ready(Ready),
    Stats(NodeStats),
    Pong { ping: Option<u64> },
    PlayerUpdate(PlayerUpdate),
    Event(PlayerEvent),
    Speaking(SpeakingEvent),
    RecordFinished(RecordFinished),
    Unknown(String),
}

impl Incoming {
    /// Decodes one inbound frame. Unknown `op`s are not an error.
    pub fn parse(payload: &Value) -> LinkResult<Self> {
        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| LinkError::Protocol(format!("no opcode in payload: {}", payload)))?;

        let frame = match op {
            "ready" => Incoming::Ready(serde_json::from_value(payload.clone())?),
            "stats" => Incoming::Stats(serde_json::from_value(payload.clone())?),
            "pong" => Incoming::Pong {
                ping: payload.get("ping").and_then(Value::as_u64),
            },
            "playerUpdate" => Incoming::PlayerUpdate(serde_json::from_value(payload.clone())?),
            "event" => Incoming::Event(serde_json::from_value(payload.clone())?),
            "speakingEvent" => Incoming::Speaking(serde_json::from_value(payload.clone())?),
            "recordFinished" => Incoming::RecordFinished(serde_json::from_value(payload.clone())?),
            other => Incoming::Unknown(other.to_string()),
        };

        Ok(frame)
    }
}

pub fn parse_guild_id(raw: &str) -> Option<GuildId> {
    raw.parse::<NonZeroU64>().ok().map(GuildId::from)
}

pub fn parse_user_id(raw: &str) -> Option<UserId> {
    raw.parse::<NonZeroU64>().ok().map(UserId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_play_frame_shape() {
        let frame = Outgoing::Play {
            guild_id: "81384788765712384".into(),
            track: "QAAAjQIAJFJpY2s=".into(),
            start_time: Some(1500),
            end_time: None,
            no_replace: None,
            pause: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "op": "play",
                "guildId": "81384788765712384",
                "track": "QAAAjQIAJFJpY2s=",
                "startTime": 1500
            })
        );
    }

    #[test]
    fn test_voice_update_and_resuming_frames() {
        let frame = Outgoing::VoiceUpdate {
            guild_id: "1".into(),
            session_id: "abc".into(),
            event: VoiceServerEvent {
                token: "tok".into(),
                guild_id: "1".into(),
                endpoint: "rotterdam1.discord.media:443".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "op": "voiceUpdate",
                "guildId": "1",
                "sessionId": "abc",
                "event": { "token": "tok", "guild_id": "1", "endpoint": "rotterdam1.discord.media:443" }
            })
        );

        let resume = Outgoing::ConfigureResuming {
            key: "resume-me".into(),
            timeout: 60,
        };
        assert_eq!(
            serde_json::to_value(&resume).unwrap(),
            json!({ "op": "configureResuming", "key": "resume-me", "timeout": 60 })
        );
    }

    #[test]
    fn test_stop_maps_to_null_track() {
        let cmd = Outgoing::Stop { guild_id: "7".into() }.into_request();
        match cmd {
            RequestCommand::UpdatePlayer { guild_id, update, .. } => {
                assert_eq!(guild_id, "7");
                assert_eq!(
                    serde_json::to_value(&update).unwrap(),
                    json!({ "encodedTrack": null })
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ping_has_no_request_form() {
        let cmd = Outgoing::Ping { guild_id: None }.into_request();
        assert!(matches!(cmd, RequestCommand::SocketOnly(Outgoing::Ping { .. })));
    }

    #[test]
    fn test_parse_track_end_event() {
        let frame = Incoming::parse(&json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "42",
            "track": "QAAA",
            "reason": "LOAD_FAILED"
        }))
        .unwrap();

        match frame {
            Incoming::Event(PlayerEvent::TrackEnd { guild_id, reason }) => {
                assert_eq!(guild_id, "42");
                assert!(reason.is_failure());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_websocket_closed_event() {
        let frame = Incoming::parse(&json!({
            "op": "event",
            "type": "WebSocketClosedEvent",
            "guildId": "42",
            "code": 4006,
            "reason": "Session is no longer valid.",
            "byRemote": true
        }))
        .unwrap();

        assert!(matches!(
            frame,
            Incoming::Event(PlayerEvent::WebSocketClosed { code: 4006, by_remote: true, .. })
        ));
    }

    #[test]
    fn test_unknown_op_is_not_an_error() {
        let frame = Incoming::parse(&json!({ "op": "somethingNew" })).unwrap();
        assert_eq!(frame, Incoming::Unknown("somethingNew".into()));
        assert!(Incoming::parse(&json!({ "d": 1 })).is_err());
    }

    #[test]
    fn test_guild_id_parsing() {
        assert_eq!(parse_guild_id("42"), Some(GuildId::new(42)));
        assert_eq!(parse_guild_id("0"), None);
        assert_eq!(parse_guild_id("abc"), None);
    }
}
