//! # Sources Module
//!
//! Track model and the boundary between lazy track stubs and playable
//! tracks.
//!
//! - [`Track`]: a track the node can play (backed by an encoded payload)
//! - [`UnresolvedTrack`]: metadata-only stub produced by external catalogs
//! - [`ExternalSource`]: catalogs consulted before the node's own search
//! - [`resolver::TrackResolver`]: ISRC-first resolution with textual fallback
//!
//! External sources are tried in registration order; the first one that
//! recognizes the query wins. Anything they do not claim falls through to
//! the node's `loadtracks` search with a source prefix.

pub mod apple_music;
pub mod deezer;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;

use crate::error::LinkResult;

pub use apple_music::AppleMusicSource;
pub use deezer::DeezerSource;
pub use resolver::TrackResolver;

/// Trait común para catálogos externos (Deezer, Apple Music, ...)
#[async_trait]
pub trait ExternalSource: Send + Sync {
    /// Devuelve `Ok(None)` si la consulta no pertenece a esta fuente
    async fn load_item(&self, query: &str) -> LinkResult<Option<SearchResult>>;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Track metadata as reported by the node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    #[serde(default)]
    pub is_seekable: bool,
    #[serde(default)]
    pub author: String,
    /// Duración en milisegundos
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default, alias = "artworkUrl")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
}

/// Raw `{track, info}` pair from `loadtracks` / `decodetracks`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackData {
    #[serde(alias = "encoded")]
    pub track: String,
    pub info: TrackInfo,
}

/// A playable track.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    encoded: String,
    info: TrackInfo,
    requester: Option<UserId>,
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        Self {
            encoded: data.track,
            info: data.info,
            requester: None,
        }
    }
}

impl Track {
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: encoded.into(),
            info,
            requester: None,
        }
    }

    // Getters
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }
    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }
    pub fn title(&self) -> &str {
        &self.info.title
    }
    pub fn author(&self) -> &str {
        &self.info.author
    }
    pub fn duration(&self) -> u64 {
        self.info.length
    }
    pub fn is_seekable(&self) -> bool {
        self.info.is_seekable
    }
    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }
    pub fn source(&self) -> &str {
        self.info.source_name.as_deref().unwrap_or("unknown")
    }
    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }
    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    /// Miniatura: la del nodo o la de YouTube derivada del identificador
    pub fn thumbnail(&self) -> Option<String> {
        if let Some(thumb) = &self.info.thumbnail {
            return Some(thumb.clone());
        }
        if self.source() == "youtube" {
            return Some(format!(
                "https://img.youtube.com/vi/{}/sddefault.jpg",
                self.info.identifier
            ));
        }
        None
    }

    pub fn set_requester(&mut self, requester: Option<UserId>) {
        self.requester = requester;
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// Lazy stub: metadata only, resolved through a node search before playing.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedTrack {
    pub title: String,
    pub author: String,
    /// Duración estimada en milisegundos
    pub duration: u64,
    pub uri: String,
    pub source: String,
    pub isrc: Option<String>,
    pub requester: Option<UserId>,
}

impl UnresolvedTrack {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            duration: 0,
            uri: String::new(),
            source: "Unknown".to_string(),
            isrc: None,
            requester: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration = duration_ms;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = Some(isrc.into());
        self
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Consulta textual `artista - título`
    pub fn text_query(&self) -> String {
        format!("{} - {}", self.author, self.title)
    }

    /// Consulta exacta por ISRC, si existe
    pub fn isrc_query(&self) -> Option<String> {
        self.isrc
            .as_deref()
            .filter(|isrc| !isrc.trim().is_empty())
            .map(|isrc| format!("\"{}\"", isrc))
    }
}

/// What a queue stores: either kind of track.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Resolved(Track),
    Unresolved(UnresolvedTrack),
}

impl QueueItem {
    pub fn title(&self) -> &str {
        match self {
            QueueItem::Resolved(track) => track.title(),
            QueueItem::Unresolved(track) => &track.title,
        }
    }

    pub fn duration(&self) -> u64 {
        match self {
            QueueItem::Resolved(track) => track.duration(),
            QueueItem::Unresolved(track) => track.duration,
        }
    }

    pub fn requester(&self) -> Option<UserId> {
        match self {
            QueueItem::Resolved(track) => track.requester(),
            QueueItem::Unresolved(track) => track.requester,
        }
    }

    pub fn identity(&self) -> String {
        match self {
            QueueItem::Resolved(track) => track.encoded().to_string(),
            QueueItem::Unresolved(track) => {
                if track.uri.is_empty() {
                    track.text_query()
                } else {
                    track.uri.clone()
                }
            }
        }
    }
}

impl From<Track> for QueueItem {
    fn from(track: Track) -> Self {
        QueueItem::Resolved(track)
    }
}

impl From<UnresolvedTrack> for QueueItem {
    fn from(track: UnresolvedTrack) -> Self {
        QueueItem::Unresolved(track)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selected_track: Option<i64>,
    /// Suma de las duraciones, calculada localmente
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoadException {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Raw `loadtracks` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTracksResponse {
    pub load_type: LoadType,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
    #[serde(default)]
    pub exception: Option<LoadException>,
}

/// Search outcome handed to callers.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub load_type: LoadType,
    pub playlist_info: Option<PlaylistInfo>,
    pub tracks: Vec<QueueItem>,
    pub exception: Option<LoadException>,
}

impl SearchResult {
    pub fn empty() -> Self {
        Self {
            load_type: LoadType::NoMatches,
            playlist_info: None,
            tracks: Vec::new(),
            exception: None,
        }
    }

    pub fn single(item: QueueItem) -> Self {
        Self {
            load_type: LoadType::TrackLoaded,
            playlist_info: None,
            tracks: vec![item],
            exception: None,
        }
    }

    pub fn playlist(name: impl Into<String>, tracks: Vec<QueueItem>) -> Self {
        let duration = tracks.iter().map(QueueItem::duration).sum();
        Self {
            load_type: LoadType::PlaylistLoaded,
            playlist_info: Some(PlaylistInfo {
                name: Some(name.into()),
                selected_track: Some(0),
                duration,
            }),
            tracks,
            exception: None,
        }
    }

    /// Primer track reproducible, si lo hay
    pub fn first_track(&self) -> Option<&Track> {
        self.tracks.iter().find_map(|item| match item {
            QueueItem::Resolved(track) => Some(track),
            QueueItem::Unresolved(_) => None,
        })
    }
}

impl From<LoadTracksResponse> for SearchResult {
    fn from(res: LoadTracksResponse) -> Self {
        let tracks: Vec<QueueItem> = res
            .tracks
            .into_iter()
            .map(|data| QueueItem::Resolved(Track::from(data)))
            .collect();

        let playlist_info = match res.load_type {
            LoadType::PlaylistLoaded => {
                let mut info = res.playlist_info.unwrap_or_default();
                info.duration = tracks.iter().map(QueueItem::duration).sum();
                Some(info)
            }
            _ => res.playlist_info,
        };

        Self {
            load_type: res.load_type,
            playlist_info,
            tracks,
            exception: res.exception,
        }
    }
}

/// Prefijo de búsqueda del nodo para cada fuente
pub fn search_prefix(source: &str) -> &'static str {
    match source {
        "youtube" => "ytsearch:",
        "youtubemusic" => "ytmsearch:",
        "soundcloud" => "scsearch:",
        "odysee" => "odsearch:",
        "yandex" => "ymsearch:",
        _ => "ytsearch:",
    }
}

/// Identificador para `loadtracks`: las URLs pasan tal cual
pub fn search_identifier(query: &str, source: &str) -> String {
    if query.starts_with("https://") || query.starts_with("http://") {
        query.to_string()
    } else {
        format!("{}{}", search_prefix(source), query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(identifier: &str, length: u64) -> TrackInfo {
        TrackInfo {
            identifier: identifier.to_string(),
            is_seekable: true,
            author: "Artist".to_string(),
            length,
            is_stream: false,
            position: 0,
            title: "Song".to_string(),
            uri: None,
            source_name: Some("youtube".to_string()),
            thumbnail: None,
            isrc: None,
        }
    }

    #[test]
    fn test_search_identifier_prefixes() {
        assert_eq!(search_identifier("daft punk", "youtube"), "ytsearch:daft punk");
        assert_eq!(search_identifier("daft punk", "youtubemusic"), "ytmsearch:daft punk");
        assert_eq!(search_identifier("daft punk", "soundcloud"), "scsearch:daft punk");
        assert_eq!(search_identifier("daft punk", "unknown"), "ytsearch:daft punk");
        assert_eq!(
            search_identifier("https://youtu.be/dQw4w9WgXcQ", "soundcloud"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_isrc_query_is_quoted() {
        let stub = UnresolvedTrack::new("One More Time", "Daft Punk").with_isrc("GBDUW0000059");
        assert_eq!(stub.isrc_query().as_deref(), Some("\"GBDUW0000059\""));
        assert_eq!(stub.text_query(), "Daft Punk - One More Time");

        let blank = UnresolvedTrack::new("x", "y").with_isrc("  ");
        assert_eq!(blank.isrc_query(), None);
    }

    #[test]
    fn test_youtube_thumbnail_fallback() {
        let track = Track::new("QAAA", info("dQw4w9WgXcQ", 1000));
        assert_eq!(
            track.thumbnail().as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/sddefault.jpg")
        );
    }

    #[test]
    fn test_playlist_duration_is_summed() {
        let raw: LoadTracksResponse = serde_json::from_value(serde_json::json!({
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": { "name": "Mix", "selectedTrack": -1 },
            "tracks": [
                { "track": "QAAA1", "info": { "identifier": "a", "length": 1000, "title": "A", "author": "X", "isSeekable": true, "isStream": false, "position": 0 } },
                { "encoded": "QAAA2", "info": { "identifier": "b", "length": 2500, "title": "B", "author": "X", "isSeekable": true, "isStream": false, "position": 0 } }
            ]
        }))
        .unwrap();

        let result = SearchResult::from(raw);
        assert_eq!(result.load_type, LoadType::PlaylistLoaded);
        assert_eq!(result.tracks.len(), 2);
        assert_eq!(result.playlist_info.as_ref().unwrap().duration, 3500);
        assert_eq!(result.first_track().unwrap().encoded(), "QAAA1");
    }
}
