use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{LinkError, LinkResult};

/// Region tag a node can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Region {
    #[serde(rename = "USA", alias = "usa")]
    Usa,
    #[serde(rename = "EU", alias = "eu")]
    Eu,
}

/// How player commands reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandChannel {
    /// Every command is a JSON frame on the persistent socket
    #[default]
    #[serde(alias = "websocket")]
    PersistentSocket,
    /// Commands are individual REST calls; the socket only carries events
    #[serde(alias = "rest")]
    DiscreteRequest,
}

/// Immutable description of one backend node.
#[derive(Clone, Deserialize, Serialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub resume_key: Option<String>,
    /// Segundos que el nodo conserva la sesión tras una caída
    #[serde(default = "default_resume_timeout")]
    pub resume_timeout: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Milisegundos entre reintentos
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default)]
    pub command_channel: CommandChannel,
    #[serde(default)]
    pub send_speaking_events: bool,
}

fn default_resume_timeout() -> u64 {
    60
}

fn default_max_retry_attempts() -> u32 {
    10
}

fn default_retry_interval() -> u64 {
    5000
}

impl NodeDescriptor {
    pub fn new(hostname: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            id: None,
            hostname: hostname.into(),
            port,
            secure: false,
            password: password.into(),
            region: None,
            resume_key: None,
            resume_timeout: default_resume_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval: default_retry_interval(),
            command_channel: CommandChannel::default(),
            send_speaking_events: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_resume_key(mut self, key: impl Into<String>, timeout_secs: u64) -> Self {
        self.resume_key = Some(key.into());
        self.resume_timeout = timeout_secs;
        self
    }

    pub fn with_command_channel(mut self, channel: CommandChannel) -> Self {
        self.command_channel = channel;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, interval_ms: u64) -> Self {
        self.max_retry_attempts = max_attempts;
        self.retry_interval = interval_ms;
        self
    }

    /// Identificador del nodo: id explícito o hostname
    pub fn identifier(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.hostname)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }

    fn validate(&self) -> LinkResult<()> {
        if self.hostname.trim().is_empty() {
            return Err(LinkError::InvalidConfig("node hostname is required".into()));
        }
        if self.port == 0 {
            return Err(LinkError::InvalidConfig(format!(
                "node {} has an invalid port",
                self.identifier()
            )));
        }
        if matches!(&self.resume_key, Some(key) if key.is_empty()) {
            return Err(LinkError::InvalidConfig(format!(
                "node {} has an empty resume key",
                self.identifier()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("id", &self.identifier())
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("password", &"[REDACTED]")
            .field("region", &self.region)
            .field("command_channel", &self.command_channel)
            .finish()
    }
}

/// Voice endpoint prefixes used to classify a voice server into a region.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegionTable {
    pub usa_prefixes: Vec<String>,
    /// Región asignada cuando ningún prefijo coincide
    pub fallback: Region,
}

impl Default for RegionTable {
    fn default() -> Self {
        Self {
            usa_prefixes: vec!["us".into(), "brazil".into(), "buenos-aires".into()],
            fallback: Region::Eu,
        }
    }
}

impl RegionTable {
    pub fn classify(&self, endpoint: &str) -> Region {
        if self.usa_prefixes.iter().any(|prefix| endpoint.starts_with(prefix.as_str())) {
            Region::Usa
        } else {
            self.fallback
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub nodes: Vec<NodeDescriptor>,

    /// Enviado en la cabecera `Client-Name`
    pub client_name: String,

    // Búsqueda
    pub default_search_source: String,
    pub unresolved_search_source: String,
    pub use_isrc: bool,

    // Tiempos (ms)
    pub selection_window_ms: u64,
    pub connect_timeout_ms: u64,
    pub resolve_cache_ttl_ms: u64,

    pub regions: RegionTable,

    /// Capacidad del canal de notificaciones
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            client_name: format!("OpenMusicLink/{}", env!("CARGO_PKG_VERSION")),
            default_search_source: "youtube".to_string(),
            unresolved_search_source: "youtubemusic".to_string(),
            use_isrc: true,
            selection_window_ms: 30_000,
            connect_timeout_ms: 10_000,
            resolve_cache_ttl_ms: 3_600_000,
            regions: RegionTable::default(),
            event_capacity: 512,
        }
    }
}

impl LinkConfig {
    pub fn with_nodes(nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Carga la configuración desde `.env`, un archivo opcional
    /// `open-music-link.{toml,json,yaml}` y variables `LINK__*`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use open_music_link::config::LinkConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = LinkConfig::load()?;
    /// println!("{}", config.summary());
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: LinkConfig = config::Config::builder()
            .add_source(config::File::with_name("open-music-link").required(false))
            .add_source(
                config::Environment::with_prefix("LINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Invalid configuration is a programmer error, so it fails at
    /// construction time instead of surfacing later as a node failure.
    pub fn validate(&self) -> LinkResult<()> {
        if self.nodes.is_empty() {
            return Err(LinkError::InvalidConfig(
                "at least one node must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.identifier().to_string()) {
                return Err(LinkError::InvalidConfig(format!(
                    "duplicate node identifier: {}",
                    node.identifier()
                )));
            }
        }

        if self.connect_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "connect timeout must be greater than 0".into(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "event capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn selection_window(&self) -> Duration {
        Duration::from_millis(self.selection_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn resolve_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.resolve_cache_ttl_ms)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Node credentials are never included.
    pub fn summary(&self) -> String {
        let nodes = self
            .nodes
            .iter()
            .map(|n| format!("{}@{}:{}", n.identifier(), n.hostname, n.port))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Link Summary:\n  \
            Nodes: [{}]\n  \
            Search: default={}, unresolved={}, isrc={}\n  \
            Timers: selection {}ms, connect {}ms",
            nodes,
            self.default_search_source,
            self.unresolved_search_source,
            self.use_isrc,
            self.selection_window_ms,
            self.connect_timeout_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_classification() {
        let table = RegionTable::default();
        assert_eq!(table.classify("us-east123.discord.media:443"), Region::Usa);
        assert_eq!(table.classify("brazil42.discord.media"), Region::Usa);
        assert_eq!(table.classify("buenos-aires7.discord.media"), Region::Usa);
        assert_eq!(table.classify("rotterdam11.discord.media"), Region::Eu);
        assert_eq!(table.classify("japan3.discord.media"), Region::Eu);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = LinkConfig::default();
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_identifiers() {
        let config = LinkConfig::with_nodes(vec![
            NodeDescriptor::new("10.0.0.1", 2333, "pw").with_id("main"),
            NodeDescriptor::new("10.0.0.2", 2333, "pw").with_id("main"),
        ]);
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let config = LinkConfig::with_nodes(vec![NodeDescriptor::new("localhost", 0, "pw")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let node: NodeDescriptor = serde_json::from_value(serde_json::json!({
            "hostname": "lava.example.com",
            "port": 2333,
            "region": "USA",
            "command_channel": "rest"
        }))
        .unwrap();

        assert_eq!(node.identifier(), "lava.example.com");
        assert_eq!(node.max_retry_attempts, 10);
        assert_eq!(node.retry_interval(), Duration::from_secs(5));
        assert_eq!(node.resume_timeout, 60);
        assert_eq!(node.region, Some(Region::Usa));
        assert_eq!(node.command_channel, CommandChannel::DiscreteRequest);
    }

    #[test]
    fn test_debug_redacts_password() {
        let node = NodeDescriptor::new("localhost", 2333, "youshallnotpass");
        let debug = format!("{:?}", node);
        assert!(!debug.contains("youshallnotpass"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_summary_hides_credentials() {
        let config = LinkConfig::with_nodes(vec![
            NodeDescriptor::new("localhost", 2333, "secret").with_id("local")
        ]);
        let summary = config.summary();
        assert!(summary.contains("local@localhost:2333"));
        assert!(!summary.contains("secret"));
    }
}
