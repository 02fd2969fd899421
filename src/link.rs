//! Entry point tying the node pool, the guild registry and the sources
//! together.
//!
//! The host owns a [`MusicLink`], forwards its gateway voice events to it
//! and drives playback through the [`Player`] handles it hands out. All
//! notifications go out on a broadcast channel (see [`MusicLink::subscribe`]).

use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::model::event::VoiceServerUpdateEvent;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::voice::VoiceState;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::player::{Player, PlayerOptions};
use crate::audio::registry::PlayerRegistry;
use crate::audio::voice::VoiceGateway;
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::events::LinkEvent;
use crate::node::rest::RestClient;
use crate::node::{Node, NodePool};
use crate::sources::resolver::TrackLoader;
use crate::sources::{
    search_identifier, AppleMusicSource, DeezerSource, ExternalSource, SearchResult, Track, TrackResolver,
};

/// Intervalo de limpieza del caché de resoluciones
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// State shared by the link handle, its nodes and its players.
pub struct LinkShared {
    pub(crate) config: LinkConfig,
    pub(crate) pool: NodePool,
    pub(crate) players: PlayerRegistry,
    pub(crate) voice: Arc<dyn VoiceGateway>,
    pub(crate) resolver: TrackResolver,
    sources: RwLock<Vec<Arc<dyn ExternalSource>>>,
    events: broadcast::Sender<LinkEvent>,
    user_id: OnceLock<UserId>,
}

impl LinkShared {
    pub(crate) fn emit(&self, event: LinkEvent) {
        if event.is_error() {
            debug!("📣 {:?}", event);
        }
        // Sin suscriptores no es un error
        let _ = self.events.send(event);
    }

    pub(crate) fn user_id(&self) -> Option<UserId> {
        self.user_id.get().copied()
    }
}

#[async_trait]
impl TrackLoader for LinkShared {
    async fn load_tracks(&self, identifier: &str) -> LinkResult<SearchResult> {
        let node = self.pool.first_connected()?;
        let response = node.rest().load_tracks(identifier).await?;
        Ok(SearchResult::from(response))
    }
}

/// Cheap-to-clone handle on the whole client.
#[derive(Clone)]
pub struct MusicLink(Arc<LinkShared>);

impl MusicLink {
    /// Validates `config` and builds one node per descriptor. Nothing is
    /// connected until [`MusicLink::start`].
    pub fn new(config: LinkConfig, voice: Arc<dyn VoiceGateway>) -> LinkResult<Self> {
        config.validate()?;

        let rests = config
            .nodes
            .iter()
            .map(|descriptor| RestClient::new(descriptor, &config.client_name))
            .collect::<LinkResult<Vec<_>>>()?;
        let sources: Vec<Arc<dyn ExternalSource>> =
            vec![Arc::new(DeezerSource::new()?), Arc::new(AppleMusicSource::new()?)];

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let resolver = TrackResolver::from_config(&config);

        let shared = Arc::new_cyclic(|weak: &Weak<LinkShared>| {
            let nodes = config
                .nodes
                .iter()
                .cloned()
                .zip(rests)
                .map(|(descriptor, rest)| Arc::new(Node::new(descriptor, rest, weak.clone())))
                .collect();

            LinkShared {
                pool: NodePool::new(nodes, config.selection_window()),
                players: PlayerRegistry::new(),
                voice,
                resolver,
                sources: RwLock::new(sources),
                events,
                user_id: OnceLock::new(),
                config,
            }
        });

        info!("🎼 Link creado: {}", shared.config.summary());
        Ok(Self(shared))
    }

    /// Records the bot's user id and opens every node.
    pub fn start(&self, user_id: UserId) {
        self.set_user_id(user_id);
        for node in self.nodes() {
            node.connect();
        }
        self.spawn_cache_cleanup();
        info!("🚀 Conectando {} nodos como {}", self.nodes().len(), user_id);
    }

    pub(crate) fn set_user_id(&self, user_id: UserId) {
        if self.0.user_id.set(user_id).is_err() && self.0.user_id() != Some(user_id) {
            warn!("⚠️ start() con otro user id ignorado: {}", user_id);
        }
    }

    fn spawn_cache_cleanup(&self) {
        let weak = Arc::downgrade(&self.0);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.resolver.cache().cleanup_old_entries();
            }
        });
    }

    /// Destroys every player and closes every node.
    pub fn shutdown(&self) {
        for player in self.0.players.all() {
            player.destroy();
        }
        for node in self.nodes() {
            node.disconnect();
        }
        info!("👋 Link detenido");
    }

    pub fn config(&self) -> &LinkConfig {
        &self.0.config
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.0.user_id()
    }

    pub fn pool(&self) -> &NodePool {
        &self.0.pool
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        self.0.pool.nodes()
    }

    pub fn node(&self, identifier: &str) -> Option<Arc<Node>> {
        self.0.pool.get(identifier)
    }

    pub fn best_node(&self) -> LinkResult<Arc<Node>> {
        self.0.pool.best_node()
    }

    pub fn resolver(&self) -> &TrackResolver {
        &self.0.resolver
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.0.events.subscribe()
    }

    /// Adds a catalog consulted by [`MusicLink::search`], after the ones
    /// already registered.
    pub fn register_source(&self, source: Arc<dyn ExternalSource>) {
        info!("🔌 Fuente externa registrada: {}", source.source_name());
        self.0.sources.write().push(source);
    }

    // Players

    /// Existing player for the guild, or a new one bound to the best node
    /// (unbound if none is up yet).
    pub fn create_player(&self, options: PlayerOptions) -> LinkResult<Arc<Player>> {
        let guild_id = options.guild_id;
        let shared = &self.0;

        let (player, created) = shared.players.get_or_insert_with(guild_id, || {
            Player::new(Arc::downgrade(shared), options, shared.pool.best_node().ok())
        });

        if created {
            info!("🎛️ Player creado para guild {}", guild_id);
            shared.emit(LinkEvent::PlayerCreate { guild_id });
        }
        Ok(player)
    }

    pub fn get_player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.0.players.get(guild_id)
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.0.players.all()
    }

    pub fn destroy_player(&self, guild_id: GuildId) -> bool {
        match self.0.players.get(guild_id) {
            Some(player) => {
                player.destroy();
                true
            }
            None => false,
        }
    }

    // Búsqueda

    /// External sources first, then the node's own search with the source
    /// prefix (`None` uses the configured default source).
    pub async fn search(&self, query: &str, source: Option<&str>) -> LinkResult<SearchResult> {
        let sources: Vec<_> = self.0.sources.read().clone();
        for external in sources {
            if let Some(result) = external.load_item(query).await? {
                debug!("🔎 '{}' resuelto por {}", query, external.source_name());
                return Ok(result);
            }
        }

        let source = source.unwrap_or(&self.0.config.default_search_source);
        let identifier = search_identifier(query, source);
        debug!("🔎 loadtracks: {}", identifier);
        self.0.load_tracks(&identifier).await
    }

    pub async fn decode_track(&self, encoded: &str) -> LinkResult<Track> {
        let node = self.0.pool.first_connected()?;
        let info = node.rest().decode_track(encoded).await?;
        Ok(Track::new(encoded, info))
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> LinkResult<Vec<Track>> {
        let node = self.0.pool.first_connected()?;
        node.rest().decode_tracks(encoded).await
    }

    // Gateway de voz

    /// Forwards the bot's own `VOICE_STATE_UPDATE`. Other users are ignored.
    pub fn handle_voice_state(&self, state: &VoiceState) {
        let Some(guild_id) = state.guild_id else {
            return;
        };
        if Some(state.user_id) != self.user_id() {
            return;
        }
        self.handle_voice_state_parts(guild_id, state.session_id.clone(), state.channel_id);
    }

    pub fn handle_voice_state_parts(&self, guild_id: GuildId, session_id: String, channel_id: Option<ChannelId>) {
        match self.0.players.get(guild_id) {
            Some(player) => player.on_voice_state(session_id, channel_id),
            None => debug!("🎙️ Voice state sin player para guild {}", guild_id),
        }
    }

    /// Forwards `VOICE_SERVER_UPDATE`. A missing endpoint means the voice
    /// server went away and a new update will follow.
    pub fn handle_voice_server(&self, event: &VoiceServerUpdateEvent) {
        let (Some(guild_id), Some(endpoint)) = (event.guild_id, event.endpoint.clone()) else {
            return;
        };
        self.handle_voice_server_parts(guild_id, event.token.clone(), endpoint);
    }

    pub fn handle_voice_server_parts(&self, guild_id: GuildId, token: String, endpoint: String) {
        match self.0.players.get(guild_id) {
            Some(player) => player.on_voice_server(token, endpoint),
            None => debug!("🎙️ Voice server sin player para guild {}", guild_id),
        }
    }
}

impl std::fmt::Debug for MusicLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicLink")
            .field("nodes", &self.nodes())
            .field("players", &self.0.players.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::ConnectionState;
    use crate::config::NodeDescriptor;
    use crate::node::tests::{frames, link_with, link_with_config, open};
    use crate::sources::{LoadType, QueueItem, UnresolvedTrack};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fuente que reclama las consultas con un prefijo dado
    struct PrefixSource(&'static str);

    #[async_trait]
    impl ExternalSource for PrefixSource {
        async fn load_item(&self, query: &str) -> LinkResult<Option<SearchResult>> {
            Ok(query.strip_prefix(self.0).map(|rest| {
                SearchResult::single(QueueItem::Unresolved(UnresolvedTrack::new(rest, self.0)))
            }))
        }

        fn source_name(&self) -> &'static str {
            "prefix"
        }
    }

    async fn node_server() -> (MockServer, MusicLink) {
        let server = MockServer::start().await;
        let address = server.address();
        let link = link_with(vec![NodeDescriptor::new(address.ip().to_string(), address.port(), "pw")]);
        (server, link)
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let (voice, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = MusicLink::new(LinkConfig::default(), Arc::new(voice));
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_create_player_is_idempotent() {
        let link = link_with(vec![NodeDescriptor::new("a", 2333, "pw")]);
        let mut events = link.subscribe();

        let first = link.create_player(PlayerOptions::new(GuildId::new(5))).unwrap();
        let second = link
            .create_player(PlayerOptions::new(GuildId::new(5)).with_voice_channel(ChannelId::new(1)))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(events.try_recv(), Ok(LinkEvent::PlayerCreate { .. })));
        assert!(events.try_recv().is_err());
        // Sin nodos conectados el player queda sin asignar
        assert!(first.node().is_none());
    }

    #[tokio::test]
    async fn test_destroy_player_then_recreate() {
        let link = link_with(vec![NodeDescriptor::new("a", 2333, "pw")]);
        let _rx = open(&link.nodes()[0]);
        let first = link.create_player(PlayerOptions::new(GuildId::new(5))).unwrap();

        assert!(link.destroy_player(GuildId::new(5)));
        assert!(!link.destroy_player(GuildId::new(5)));

        let second = link.create_player(PlayerOptions::new(GuildId::new(5))).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_destroyed());
    }

    #[tokio::test]
    async fn test_search_prefers_external_sources() {
        let link = link_with(vec![NodeDescriptor::new("a", 2333, "pw")]);
        link.register_source(Arc::new(PrefixSource("first:")));
        link.register_source(Arc::new(PrefixSource("second:")));

        let result = link.search("second:song", None).await.unwrap();
        assert_eq!(result.tracks[0].title(), "song");

        // Nadie la reclama y no hay nodo conectado
        assert!(matches!(link.search("song", None).await, Err(LinkError::NoAvailableNode)));
    }

    #[tokio::test]
    async fn test_search_falls_back_to_node() {
        let (server, link) = node_server().await;
        Mock::given(method("GET"))
            .and(path("/loadtracks"))
            .and(query_param("identifier", "scsearch:daft punk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "loadType": "SEARCH_RESULT",
                "playlistInfo": {},
                "tracks": [{
                    "track": "QAAAjQIAJERhZnQgUHVuaw==",
                    "info": {
                        "identifier": "abc",
                        "isSeekable": true,
                        "author": "Daft Punk",
                        "length": 320000,
                        "isStream": false,
                        "position": 0,
                        "title": "One More Time",
                        "uri": "https://soundcloud.com/daftpunk/one-more-time",
                        "sourceName": "soundcloud"
                    }
                }]
            })))
            .mount(&server)
            .await;
        let _rx = open(&link.nodes()[0]);

        let result = link.search("daft punk", Some("soundcloud")).await.unwrap();
        assert_eq!(result.load_type, LoadType::SearchResult);
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.tracks[0].title(), "One More Time");
    }

    #[tokio::test]
    async fn test_voice_events_route_by_guild() {
        let (link, mut voice) = link_with_config(LinkConfig::with_nodes(vec![NodeDescriptor::new("a", 2333, "pw")]));
        let mut socket = open(&link.nodes()[0]);
        let player = link
            .create_player(PlayerOptions::new(GuildId::new(7)).with_voice_channel(ChannelId::new(70)))
            .unwrap();
        player.connect().unwrap();
        assert_eq!(voice.try_recv().unwrap().guild_id, GuildId::new(7));

        // Guild sin player: ignorado
        link.handle_voice_server_parts(GuildId::new(8), "t".into(), "rotterdam.discord.media".into());

        link.handle_voice_state_parts(GuildId::new(7), "sess".into(), Some(ChannelId::new(70)));
        link.handle_voice_server_parts(GuildId::new(7), "tok".into(), "rotterdam.discord.media".into());

        let sent = frames(&mut socket);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["guildId"], "7");
        assert_eq!(player.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_players() {
        let link = link_with(vec![NodeDescriptor::new("a", 2333, "pw")]);
        let mut socket = open(&link.nodes()[0]);
        link.create_player(PlayerOptions::new(GuildId::new(1))).unwrap();
        link.create_player(PlayerOptions::new(GuildId::new(2))).unwrap();

        link.shutdown();
        assert!(link.players().is_empty());
        let ops: Vec<_> = frames(&mut socket).into_iter().map(|f| f["op"].clone()).collect();
        assert_eq!(ops, vec![json!("destroy"), json!("destroy")]);
    }
}
