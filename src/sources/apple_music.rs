use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{ExternalSource, LoadException, LoadType, QueueItem, SearchResult, UnresolvedTrack};
use crate::error::{LinkError, LinkResult};

const CATALOG_API: &str = "https://api.music.apple.com/v1/catalog/us";
/// Página pública cuyo HTML trae el token anónimo del reproductor web
const TOKEN_PAGE: &str = "https://music.apple.com/us/album/%C3%ADgneo/1604813268";
const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/97.0.4692.99 Safari/537.36";

const URL_PATTERN: &str = r"^(?:https?://)?music\.apple\.com/(?:\w{2}/)?(album|playlist|artist|music-video|song)/(?:[^/?]+/)?([\w.-]+)(?:\?i=(\d+))?";
const TOKEN_PATTERN: &str = r#""desktop-music-app/config/environment" content="([^"]+)""#;

/// Tope de canciones al paginar álbumes y playlists
const MAX_COLLECTION_TRACKS: usize = 400;
const TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleTrack {
    name: String,
    artist_name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    duration_in_millis: u64,
    #[serde(default)]
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource<A> {
    attributes: A,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    next: Option<String>,
    data: Vec<Resource<AppleTrack>>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionRelationships {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct Collection {
    attributes: Named,
    relationships: CollectionRelationships,
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    data: Vec<T>,
}

/// What an Apple Music link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppleMusicLink {
    Song(String),
    MusicVideo(String),
    Album(String),
    Playlist(String),
    Artist(String),
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Resolves Apple Music songs, videos, albums, playlists and artist top
/// tracks into unresolved tracks.
///
/// The catalog API is queried with the anonymous token the web player
/// embeds in its HTML, so no developer credentials are needed. The token
/// is reused until it ages out or the API rejects it.
pub struct AppleMusicSource {
    client: Client,
    api_url: String,
    token_url: String,
    pattern: Regex,
    token_pattern: Regex,
    token: Mutex<Option<CachedToken>>,
}

impl AppleMusicSource {
    pub fn new() -> LinkResult<Self> {
        Self::with_urls(CATALOG_API, TOKEN_PAGE)
    }

    pub fn with_urls(api_url: impl Into<String>, token_url: impl Into<String>) -> LinkResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(BROWSER_AGENT)
            .build()?;
        let pattern = Regex::new(URL_PATTERN)
            .map_err(|e| LinkError::InvalidConfig(format!("apple music url pattern: {}", e)))?;
        let token_pattern = Regex::new(TOKEN_PATTERN)
            .map_err(|e| LinkError::InvalidConfig(format!("apple music token pattern: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            pattern,
            token_pattern,
            token: Mutex::new(None),
        })
    }

    pub fn parse_url(&self, query: &str) -> Option<AppleMusicLink> {
        let captures = self.pattern.captures(query)?;
        let id = captures.get(2)?.as_str().to_string();

        // `album/.../123?i=456` apunta a una canción del álbum
        if let Some(song) = captures.get(3) {
            return Some(AppleMusicLink::Song(song.as_str().to_string()));
        }

        match captures.get(1)?.as_str() {
            "album" => Some(AppleMusicLink::Album(id)),
            "playlist" => Some(AppleMusicLink::Playlist(id)),
            "artist" => Some(AppleMusicLink::Artist(id)),
            "music-video" => Some(AppleMusicLink::MusicVideo(id)),
            _ => Some(AppleMusicLink::Song(id)),
        }
    }

    async fn token(&self) -> LinkResult<String> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|t| t.fetched_at.elapsed() < TOKEN_TTL)
            .map(|t| t.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }

        debug!("🔑 Renovando token de Apple Music");
        let html = self.client.get(&self.token_url).send().await?.text().await?;
        let value = self.extract_token(&html)?;

        *self.token.lock() = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    fn extract_token(&self, html: &str) -> LinkResult<String> {
        let payload = self
            .token_pattern
            .captures(html)
            .and_then(|c| c.get(1))
            .ok_or_else(|| LinkError::TrackResolution("Could not get Apple Music token payload!".into()))?;
        let payload = urlencoding::decode(payload.as_str())
            .map_err(|e| LinkError::TrackResolution(format!("Apple Music token payload: {}", e)))?;

        let config: Value = serde_json::from_str(&payload)?;
        config
            .pointer("/MEDIA_API/token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LinkError::TrackResolution("Could not get Apple Music token!".into()))
    }

    /// `Ok(None)` si el catálogo no tiene el recurso.
    async fn fetch<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> LinkResult<Option<T>> {
        let url = format!("{}/{}", self.api_url, endpoint);

        for attempt in 0..2 {
            let token = self.token().await?;
            debug!("🌐 Apple Music: GET {}", url);
            let response = self.client.get(&url).bearer_auth(&token).send().await?;

            match response.status() {
                status if status.is_success() => return Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => return Ok(None),
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    warn!("⚠️ Token de Apple Music rechazado, renovando");
                    self.token.lock().take();
                }
                status => {
                    let message = response.text().await.unwrap_or_default();
                    error!("❌ Apple Music API error: {} - {}", status, message);
                    return Err(LinkError::Rest {
                        status: status.as_u16(),
                        path: format!("/{}", endpoint),
                        message,
                    });
                }
            }
        }

        Err(LinkError::TrackResolution("Apple Music token rejected".into()))
    }

    async fn collection(&self, endpoint: &str) -> LinkResult<Option<(String, Vec<QueueItem>)>> {
        let Some(response) = self.fetch::<Response<Collection>>(endpoint).await? else {
            return Ok(None);
        };
        let Some(collection) = response.data.into_iter().next() else {
            return Ok(None);
        };

        let mut page = collection.relationships.tracks;
        let mut tracks: Vec<QueueItem> = Vec::new();
        loop {
            tracks.extend(page.data.into_iter().map(|r| Self::build_track(r.attributes)));
            let Some(next) = page.next.filter(|_| tracks.len() < MAX_COLLECTION_TRACKS) else {
                break;
            };
            match self.fetch::<TrackPage>(&Self::catalog_path(&next)).await? {
                Some(next_page) => page = next_page,
                None => break,
            }
        }
        tracks.truncate(MAX_COLLECTION_TRACKS);

        Ok(Some((collection.attributes.name, tracks)))
    }

    async fn top_tracks(&self, id: &str) -> LinkResult<Option<(String, Vec<QueueItem>)>> {
        let Some(artist) = self.fetch::<Response<Resource<Named>>>(&format!("artists/{}", id)).await? else {
            return Ok(None);
        };
        let Some(artist) = artist.data.into_iter().next() else {
            return Ok(None);
        };
        let Some(songs) = self
            .fetch::<Response<Resource<AppleTrack>>>(&format!("artists/{}/view/top-songs", id))
            .await?
        else {
            return Ok(None);
        };

        let tracks = songs.data.into_iter().map(|r| Self::build_track(r.attributes)).collect();
        Ok(Some((format!("{}'s top tracks", artist.attributes.name), tracks)))
    }

    /// `/v1/catalog/us/playlists/x/tracks?offset=100` -> `playlists/x/tracks?offset=100`
    fn catalog_path(next: &str) -> String {
        next.trim_start_matches('/').splitn(4, '/').nth(3).unwrap_or(next).to_string()
    }

    fn build_track(track: AppleTrack) -> QueueItem {
        let mut stub = UnresolvedTrack::new(track.name, track.artist_name)
            .with_duration(track.duration_in_millis)
            .with_source("apple-music");
        if let Some(url) = track.url {
            stub = stub.with_uri(url);
        }
        if let Some(isrc) = track.isrc {
            stub = stub.with_isrc(isrc);
        }
        stub.into()
    }

    fn not_found(link: &AppleMusicLink) -> SearchResult {
        SearchResult {
            load_type: LoadType::LoadFailed,
            playlist_info: None,
            tracks: Vec::new(),
            exception: Some(LoadException {
                message: Some(format!("Apple Music resource not found: {:?}", link)),
                severity: Some("COMMON".into()),
                cause: None,
            }),
        }
    }
}

#[async_trait]
impl ExternalSource for AppleMusicSource {
    async fn load_item(&self, query: &str) -> LinkResult<Option<SearchResult>> {
        let Some(link) = self.parse_url(query) else {
            return Ok(None);
        };

        let found = match &link {
            AppleMusicLink::Song(id) | AppleMusicLink::MusicVideo(id) => {
                let kind = if matches!(link, AppleMusicLink::Song(_)) { "songs" } else { "music-videos" };
                self.fetch::<Response<Resource<AppleTrack>>>(&format!("{}/{}", kind, id))
                    .await?
                    .and_then(|r| r.data.into_iter().next())
                    .map(|r| SearchResult::single(Self::build_track(r.attributes)))
            }
            AppleMusicLink::Album(id) | AppleMusicLink::Playlist(id) => {
                let kind = if matches!(link, AppleMusicLink::Album(_)) { "albums" } else { "playlists" };
                self.collection(&format!("{}/{}", kind, id)).await?.map(|(title, tracks)| {
                    info!("📋 Apple Music '{}': {} canciones", title, tracks.len());
                    SearchResult::playlist(title, tracks)
                })
            }
            AppleMusicLink::Artist(id) => self
                .top_tracks(id)
                .await?
                .map(|(title, tracks)| SearchResult::playlist(title, tracks)),
        };

        Ok(Some(found.unwrap_or_else(|| Self::not_found(&link))))
    }

    fn source_name(&self) -> &'static str {
        "apple-music"
    }
}
