//! HTTP side of a node: track loading, decoding, route planner and, for
//! nodes driven over discrete requests, player updates.

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::protocol::UpdatePlayer;
use crate::config::{CommandChannel, NodeDescriptor};
use crate::error::{LinkError, LinkResult};
use crate::sources::{LoadTracksResponse, Track, TrackData, TrackInfo};

/// Versión de la API para nodos en modo REST
pub const API_VERSION: u8 = 3;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerStatus {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemVer {
    pub semver: String,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

/// `/info` payload, only the parts worth logging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub version: Option<SemVer>,
    #[serde(default)]
    pub jvm: Option<String>,
    #[serde(default)]
    pub lavaplayer: Option<String>,
    #[serde(default)]
    pub source_managers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Per-node REST client.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    password: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl RestClient {
    pub fn new(descriptor: &NodeDescriptor, client_name: &str) -> LinkResult<Self> {
        let scheme = if descriptor.secure { "https" } else { "http" };
        let mut base_url = format!("{}://{}:{}", scheme, descriptor.hostname, descriptor.port);
        if descriptor.command_channel == CommandChannel::DiscreteRequest {
            base_url.push_str(&format!("/v{}", API_VERSION));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(client_name)
            .build()?;

        Ok(Self::with_base_url(http, base_url, descriptor.password.clone()))
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn load_tracks(&self, identifier: &str) -> LinkResult<LoadTracksResponse> {
        let path = format!("/loadtracks?identifier={}", urlencoding::encode(identifier));
        self.request_json(Method::GET, &path, None).await
    }

    pub async fn decode_track(&self, encoded: &str) -> LinkResult<TrackInfo> {
        let path = format!("/decodetrack?track={}", urlencoding::encode(encoded));
        let value: Value = self.request_json(Method::GET, &path, None).await?;

        // Algunas versiones envuelven la info en `{encoded, info}`
        let info = match value.get("info") {
            Some(info) => info.clone(),
            None => value,
        };
        Ok(serde_json::from_value(info)?)
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> LinkResult<Vec<Track>> {
        let body = serde_json::to_value(encoded)?;
        let data: Vec<TrackData> = self.request_json(Method::POST, "/decodetracks", Some(body)).await?;
        Ok(data.into_iter().map(Track::from).collect())
    }

    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: &str,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> LinkResult<()> {
        let mut path = format!("/sessions/{}/players/{}", session_id, guild_id);
        if no_replace {
            path.push_str("?noReplace=true");
        }
        let body = serde_json::to_value(update)?;
        self.request(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: &str) -> LinkResult<()> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn update_session(&self, session_id: &str, resume_key: &str, timeout: u64) -> LinkResult<()> {
        let path = format!("/sessions/{}", session_id);
        let body = serde_json::json!({ "resumeKey": resume_key, "timeout": timeout });
        self.request(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn route_planner_status(&self) -> LinkResult<RoutePlannerStatus> {
        self.request_json(Method::GET, "/routeplanner/status", None).await
    }

    pub async fn free_route_planner_address(&self, address: &str) -> LinkResult<()> {
        let body = serde_json::json!({ "address": address });
        self.request(Method::POST, "/routeplanner/free", Some(body)).await?;
        Ok(())
    }

    pub async fn free_all_route_planner_addresses(&self) -> LinkResult<()> {
        self.request(Method::POST, "/routeplanner/free/all", None).await?;
        Ok(())
    }

    /// Ids de las grabaciones guardadas para un guild
    pub async fn records(&self, guild_id: &str) -> LinkResult<Vec<String>> {
        self.request_json(Method::GET, &format!("/records/{}", guild_id), None).await
    }

    pub async fn delete_record(&self, guild_id: &str, id: &str) -> LinkResult<()> {
        let path = format!("/records/{}/{}", guild_id, id);
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn delete_records(&self, guild_id: &str) -> LinkResult<()> {
        self.request(Method::DELETE, &format!("/records/{}", guild_id), None).await?;
        Ok(())
    }

    pub async fn version(&self) -> LinkResult<String> {
        let response = self.request(Method::GET, "/version", None).await?;
        Ok(response.text().await?)
    }

    pub async fn info(&self) -> LinkResult<NodeInfo> {
        self.request_json(Method::GET, "/info", None).await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> LinkResult<T> {
        let response = self.request(method, path, body).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> LinkResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("🌐 {} {}", method, url);

        let mut builder = self
            .http
            .request(method, &url)
            .header(header::AUTHORIZATION, &self.password);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            let (err_path, message) = match serde_json::from_str::<RestErrorBody>(&text) {
                Ok(err) => (
                    err.path.unwrap_or_else(|| path.to_string()),
                    format!(
                        "{}: {}",
                        err.error.unwrap_or_else(|| status.to_string()),
                        err.message.unwrap_or_default()
                    ),
                ),
                Err(_) => (path.to_string(), text),
            };
            warn!("⚠️ Petición fallida ({}) en {}", status.as_u16(), err_path);
            return Err(LinkError::Rest {
                status: status.as_u16(),
                path: err_path,
                message,
            });
        }

        Ok(response)
    }
}
