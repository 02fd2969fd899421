//! # Cache Module
//!
//! Concurrent TTL cache used to remember how unresolved tracks were
//! resolved, so a playlist that repeats the same stub does not query the
//! node again.
//!
//! ## Features
//!
//! - **TTL Support**: entries expire after the configured lifetime
//! - **Thread Safety**: backed by `DashMap`, shared freely between tasks
//! - **Memory Bounded**: the oldest entry is evicted when full
//! - **Metrics**: hit/miss/eviction counters
//!
//! ## Example Usage
//!
//! ```rust
//! use open_music_link::cache::ResolutionCache;
//! use std::time::Duration;
//!
//! let cache = ResolutionCache::with_ttl(100, Duration::from_secs(3600));
//! assert!(cache.get(&"Daft Punk - One More Time".to_string()).is_none());
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use tracing::info;

use crate::sources::Track;

pub use lru_cache::CacheMetrics;

/// Resolved tracks keyed by the unresolved stub's identity.
pub type ResolutionCache = LRUCache<String, Track>;

/// Entradas por defecto
pub const DEFAULT_CAPACITY: usize = 1000;

impl ResolutionCache {
    /// Removes expired entries and logs how many were dropped.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}
