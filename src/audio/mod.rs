//! # Audio Module
//!
//! Guild-side playback state: sessions, queues, filters and the voice
//! handshake.
//!
//! ## Architecture
//!
//! ### [`player`] - Sessions
//! - One [`player::Player`] per guild, bound to one node at a time
//! - Reacts to track events and advances the queue
//! - Survives node failover and region moves
//!
//! ### [`queue`] - Queue Management
//! - Pluggable [`queue::Queue`] trait, [`queue::DefaultQueue`] FIFO
//! - Resolved tracks and metadata-only stubs side by side
//!
//! ### [`filters`] - Audio Filters
//! - Equalizer presets and the node-side DSP filters
//!
//! ### [`voice`] - Voice Handshake
//! - Joins/leaves through the host gateway
//! - Collects session id, token and endpoint for the node
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_link::audio::{PlayOptions, PlayerOptions};
//! use open_music_link::MusicLink;
//! use serenity::all::{ChannelId, GuildId};
//!
//! # async fn example(link: MusicLink) -> anyhow::Result<()> {
//! let player = link.create_player(
//!     PlayerOptions::new(GuildId::new(123456789)).with_voice_channel(ChannelId::new(42)),
//! )?;
//! player.connect()?;
//!
//! let result = link.search("daft punk", None).await?;
//! for item in result.tracks {
//!     player.queue().add(item).await?;
//! }
//! player.play(PlayOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod filters;
pub mod player;
pub mod queue;
pub mod registry;
pub mod voice;

pub use filters::{EqPreset, FilterOptions};
pub use player::{ConnectionState, PlayOptions, Player, PlayerOptions};
pub use queue::{DefaultQueue, Queue};
pub use registry::PlayerRegistry;
pub use voice::{VoiceGateway, VoiceStateRequest};
