use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{ExternalSource, LoadException, LoadType, QueueItem, SearchResult, UnresolvedTrack};
use crate::error::{LinkError, LinkResult};

const DEEZER_API: &str = "https://api.deezer.com";

const URL_PATTERN: &str = r"^(?:https?://|)?(?:www\.)?deezer\.com/(?:\w{2}/)?(track|album|playlist)/(\d+)";

#[derive(Debug, Deserialize)]
struct DeezerArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeezerTrack {
    title: String,
    artist: DeezerArtist,
    link: String,
    /// Segundos
    duration: u64,
    #[serde(default)]
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeezerTrackList {
    data: Vec<DeezerTrack>,
}

#[derive(Debug, Deserialize)]
struct DeezerCollection {
    title: String,
    tracks: DeezerTrackList,
}

#[derive(Debug, Deserialize)]
struct DeezerError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Resolves Deezer track, album and playlist links into unresolved tracks.
///
/// Deezer only provides metadata; each stub is later matched against the
/// node's own catalog (ISRC first when present).
pub struct DeezerSource {
    client: Client,
    base_url: String,
    pattern: Regex,
}

impl DeezerSource {
    pub fn new() -> LinkResult<Self> {
        Self::with_base_url(DEEZER_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> LinkResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("open-music-link/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let pattern = Regex::new(URL_PATTERN)
            .map_err(|e| LinkError::InvalidConfig(format!("deezer url pattern: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pattern,
        })
    }

    /// `(kind, id)` si la URL es de Deezer
    pub fn parse_url<'q>(&self, query: &'q str) -> Option<(&'q str, &'q str)> {
        let captures = self.pattern.captures(query)?;
        let kind = captures.get(1)?.as_str();
        let id = captures.get(2)?.as_str();
        Some((kind, id))
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> LinkResult<Result<T, DeezerError>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("🌐 Deezer: GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("❌ Deezer API error: {} - {}", status, message);
            return Err(LinkError::Rest {
                status: status.as_u16(),
                path: format!("/{}", endpoint),
                message,
            });
        }

        // Deezer responde 200 con `{"error": {...}}`
        let body: serde_json::Value = response.json().await?;
        if let Some(err) = body.get("error") {
            return Ok(Err(serde_json::from_value(err.clone())?));
        }
        Ok(Ok(serde_json::from_value(body)?))
    }

    fn build_track(track: DeezerTrack) -> QueueItem {
        let mut stub = UnresolvedTrack::new(track.title, track.artist.name)
            .with_duration(track.duration * 1000)
            .with_uri(track.link)
            .with_source("deezer");
        if let Some(isrc) = track.isrc {
            stub = stub.with_isrc(isrc);
        }
        stub.into()
    }

    fn failed(error: DeezerError) -> SearchResult {
        SearchResult {
            load_type: LoadType::LoadFailed,
            playlist_info: None,
            tracks: Vec::new(),
            exception: Some(LoadException {
                message: error.message,
                severity: Some("COMMON".into()),
                cause: error.kind,
            }),
        }
    }
}

#[async_trait]
impl ExternalSource for DeezerSource {
    async fn load_item(&self, query: &str) -> LinkResult<Option<SearchResult>> {
        let Some((kind, id)) = self.parse_url(query) else {
            return Ok(None);
        };

        let result = match kind {
            "track" => match self.fetch::<DeezerTrack>(&format!("track/{}", id)).await? {
                Ok(track) => SearchResult::single(Self::build_track(track)),
                Err(e) => Self::failed(e),
            },
            _ => match self.fetch::<DeezerCollection>(&format!("{}/{}", kind, id)).await? {
                Ok(collection) => {
                    let tracks: Vec<QueueItem> =
                        collection.tracks.data.into_iter().map(Self::build_track).collect();
                    info!("📋 Deezer {} '{}': {} canciones", kind, collection.title, tracks.len());
                    SearchResult::playlist(collection.title, tracks)
                }
                Err(e) => Self::failed(e),
            },
        };

        Ok(Some(result))
    }

    fn source_name(&self) -> &'static str {
        "deezer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_parsing() {
        let source = DeezerSource::with_base_url("http://127.0.0.1:9").unwrap();
        assert_eq!(
            source.parse_url("https://www.deezer.com/en/track/3135556"),
            Some(("track", "3135556"))
        );
        assert_eq!(
            source.parse_url("deezer.com/album/302127"),
            Some(("album", "302127"))
        );
        assert_eq!(
            source.parse_url("https://deezer.com/playlist/908622995"),
            Some(("playlist", "908622995"))
        );
        assert_eq!(source.parse_url("https://open.spotify.com/track/abc"), None);
        assert_eq!(source.parse_url("daft punk"), None);
    }

    #[tokio::test]
    async fn test_track_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/track/3135556"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3135556,
                "title": "Harder, Better, Faster, Stronger",
                "link": "https://www.deezer.com/track/3135556",
                "duration": 224,
                "isrc": "GBDUW0000053",
                "artist": { "name": "Daft Punk" }
            })))
            .mount(&server)
            .await;

        let source = DeezerSource::with_base_url(server.uri()).unwrap();
        let result = source
            .load_item("https://www.deezer.com/track/3135556")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.load_type, LoadType::TrackLoaded);
        match &result.tracks[0] {
            QueueItem::Unresolved(stub) => {
                assert_eq!(stub.author, "Daft Punk");
                assert_eq!(stub.duration, 224_000);
                assert_eq!(stub.isrc.as_deref(), Some("GBDUW0000053"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_album_lookup_sums_duration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/album/302127"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Discovery",
                "tracks": { "data": [
                    { "title": "One More Time", "link": "https://www.deezer.com/track/1", "duration": 320, "artist": { "name": "Daft Punk" } },
                    { "title": "Aerodynamic", "link": "https://www.deezer.com/track/2", "duration": 212, "artist": { "name": "Daft Punk" } }
                ]}
            })))
            .mount(&server)
            .await;

        let source = DeezerSource::with_base_url(server.uri()).unwrap();
        let result = source
            .load_item("https://www.deezer.com/album/302127")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.load_type, LoadType::PlaylistLoaded);
        let info = result.playlist_info.unwrap();
        assert_eq!(info.name.as_deref(), Some("Discovery"));
        assert_eq!(info.duration, 532_000);
        assert_eq!(result.tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_api_error_body_is_load_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/track/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": { "type": "DataException", "message": "no data", "code": 800 }
            })))
            .mount(&server)
            .await;

        let source = DeezerSource::with_base_url(server.uri()).unwrap();
        let result = source.load_item("https://deezer.com/track/1").await.unwrap().unwrap();
        assert_eq!(result.load_type, LoadType::LoadFailed);
        assert_eq!(result.exception.unwrap().message.as_deref(), Some("no data"));
    }

    #[tokio::test]
    async fn test_foreign_queries_are_not_claimed() {
        let source = DeezerSource::with_base_url("http://127.0.0.1:9").unwrap();
        assert!(source.load_item("ytsearch:daft punk").await.unwrap().is_none());
    }
}
