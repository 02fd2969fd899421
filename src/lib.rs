//! # Open Music Link
//!
//! Control-plane client for a fleet of remote audio nodes. The nodes do the
//! decoding and streaming; this crate keeps a socket to each of them, picks
//! the least loaded one for every guild, moves guilds off nodes that die and
//! drives each guild's playback through the voice handshake and the track
//! lifecycle.
//!
//! ## Modules
//!
//! - [`node`]: one connection per backend, the wire protocol, REST calls
//!   and the load-balanced [`node::NodePool`]
//! - [`audio`]: per-guild [`audio::Player`] sessions, queues, filters and
//!   the voice handshake
//! - [`sources`]: track model, external catalogs and unresolved-track
//!   resolution
//! - [`cache`]: TTL cache for resolved tracks
//! - [`events`]: notifications broadcast to the host
//!
//! ## Example
//!
//! ```rust,no_run
//! use open_music_link::{LinkConfig, MusicLink, NodeDescriptor};
//! use serenity::all::UserId;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (voice_tx, _voice_rx) = tokio::sync::mpsc::unbounded_channel();
//! let config = LinkConfig::with_nodes(vec![NodeDescriptor::new("localhost", 2333, "youshallnotpass")]);
//!
//! let link = MusicLink::new(config, Arc::new(voice_tx))?;
//! link.start(UserId::new(123456789));
//!
//! let mut events = link.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod node;
pub mod sources;

pub use audio::{PlayOptions, Player, PlayerOptions};
pub use config::{LinkConfig, NodeDescriptor, Region};
pub use error::{LinkError, LinkResult};
pub use events::LinkEvent;
pub use link::MusicLink;
pub use node::{Node, NodePool};
