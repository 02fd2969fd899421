use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{search_identifier, SearchResult, Track, UnresolvedTrack};
use crate::cache::{ResolutionCache, DEFAULT_CAPACITY};
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};

/// Anything that can run a node-side `loadtracks` query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load_tracks(&self, identifier: &str) -> LinkResult<SearchResult>;
}

/// Turns metadata-only stubs into playable tracks.
///
/// The ISRC query goes first when the stub carries one; an empty or failed
/// ISRC lookup falls back to the `"author - title"` query before giving up.
pub struct TrackResolver {
    source: String,
    use_isrc: bool,
    cache: ResolutionCache,
}

impl TrackResolver {
    pub fn new(source: impl Into<String>, use_isrc: bool, ttl: Duration) -> Self {
        Self {
            source: source.into(),
            use_isrc,
            cache: ResolutionCache::with_ttl(DEFAULT_CAPACITY, ttl),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.unresolved_search_source.clone(),
            config.use_isrc,
            config.resolve_cache_ttl(),
        )
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub async fn resolve(&self, loader: &dyn TrackLoader, stub: &UnresolvedTrack) -> LinkResult<Track> {
        let key = stub.text_query();
        if let Some(mut track) = self.cache.get(&key) {
            debug!("📦 Resolución en caché: {}", key);
            track.set_requester(stub.requester);
            return Ok(track);
        }

        let mut track = match self.lookup(loader, stub).await? {
            Some(track) => track,
            None => return Err(LinkError::TrackResolution(stub.title.clone())),
        };

        self.cache.insert(key, track.clone());
        track.set_requester(stub.requester);
        Ok(track)
    }

    async fn lookup(&self, loader: &dyn TrackLoader, stub: &UnresolvedTrack) -> LinkResult<Option<Track>> {
        if self.use_isrc {
            if let Some(isrc) = stub.isrc_query() {
                let identifier = search_identifier(&isrc, &self.source);
                match loader.load_tracks(&identifier).await {
                    Ok(result) => {
                        if let Some(track) = result.first_track() {
                            return Ok(Some(track.clone()));
                        }
                        debug!("🔎 ISRC sin resultados para {}, probando por texto", stub.title);
                    }
                    Err(e) => warn!("⚠️ Búsqueda por ISRC falló ({}), probando por texto", e),
                }
            }
        }

        let identifier = search_identifier(&stub.text_query(), &self.source);
        let result = loader.load_tracks(&identifier).await?;
        Ok(result.first_track().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{QueueItem, TrackInfo};
    use mockall::Sequence;
    use serenity::model::id::UserId;

    fn track(encoded: &str) -> Track {
        Track::new(
            encoded,
            TrackInfo {
                identifier: encoded.to_string(),
                is_seekable: true,
                author: "Daft Punk".into(),
                length: 320_000,
                is_stream: false,
                position: 0,
                title: "One More Time".into(),
                uri: None,
                source_name: Some("youtube".into()),
                thumbnail: None,
                isrc: None,
            },
        )
    }

    fn hit(encoded: &'static str) -> impl Fn(&str) -> LinkResult<SearchResult> + Send + 'static {
        move |_| Ok(SearchResult::single(QueueItem::Resolved(track(encoded))))
    }

    fn resolver() -> TrackResolver {
        TrackResolver::new("youtubemusic", true, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_isrc_first() {
        let mut loader = MockTrackLoader::new();
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:\"GBDUW0000059\"")
            .times(1)
            .returning(hit("isrc-hit"));

        let stub = UnresolvedTrack::new("One More Time", "Daft Punk")
            .with_isrc("GBDUW0000059")
            .with_requester(UserId::new(9));

        let resolved = resolver().resolve(&loader, &stub).await.unwrap();
        assert_eq!(resolved.encoded(), "isrc-hit");
        assert_eq!(resolved.requester(), Some(UserId::new(9)));
    }

    #[tokio::test]
    async fn test_empty_isrc_falls_back_to_text() {
        let mut loader = MockTrackLoader::new();
        let mut seq = Sequence::new();
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:\"GBDUW0000059\"")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(SearchResult::empty()));
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:Daft Punk - One More Time")
            .times(1)
            .in_sequence(&mut seq)
            .returning(hit("text-hit"));

        let stub = UnresolvedTrack::new("One More Time", "Daft Punk").with_isrc("GBDUW0000059");
        let resolved = resolver().resolve(&loader, &stub).await.unwrap();
        assert_eq!(resolved.encoded(), "text-hit");
    }

    #[tokio::test]
    async fn test_failed_isrc_lookup_falls_back_to_text() {
        let mut loader = MockTrackLoader::new();
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:\"GBDUW0000059\"")
            .returning(|_| Err(LinkError::NoAvailableNode));
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:Daft Punk - One More Time")
            .returning(hit("text-hit"));

        let stub = UnresolvedTrack::new("One More Time", "Daft Punk").with_isrc("GBDUW0000059");
        let resolved = resolver().resolve(&loader, &stub).await.unwrap();
        assert_eq!(resolved.encoded(), "text-hit");
    }

    #[tokio::test]
    async fn test_no_match_is_a_resolution_error() {
        let mut loader = MockTrackLoader::new();
        loader
            .expect_load_tracks()
            .returning(|_| Ok(SearchResult::empty()));
        let stub = UnresolvedTrack::new("Nothing", "Nobody");

        let err = resolver().resolve(&loader, &stub).await.unwrap_err();
        assert!(matches!(err, LinkError::TrackResolution(title) if title == "Nothing"));
    }

    #[tokio::test]
    async fn test_second_resolution_hits_cache() {
        let mut loader = MockTrackLoader::new();
        loader
            .expect_load_tracks()
            .withf(|identifier| identifier == "ytmsearch:Daft Punk - One More Time")
            .times(1)
            .returning(hit("text-hit"));

        let resolver = TrackResolver::new("youtubemusic", false, Duration::from_secs(60));
        let stub = UnresolvedTrack::new("One More Time", "Daft Punk");

        resolver.resolve(&loader, &stub).await.unwrap();
        let again = resolver
            .resolve(&loader, &stub.clone().with_requester(UserId::new(3)))
            .await
            .unwrap();

        assert_eq!(again.requester(), Some(UserId::new(3)));
        assert_eq!(resolver.cache().metrics().hits, 1);
    }
}
