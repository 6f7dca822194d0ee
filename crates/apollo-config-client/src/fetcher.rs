// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote retrieval of namespaces and releases from the Apollo server.
//!
//! The fetcher turns raw HTTP outcomes into domain results:
//! - `200` responses are decoded into namespace maps or [`Release`]s,
//! - any other status is reported as "unavailable" so callers use the cache,
//! - timeouts are reclassified through a TCP liveness check into
//!   [`FetchError::NamespaceNotFound`] (server reachable) or
//!   [`FetchError::ServerNotResponding`] (server unreachable).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{ClientConfig, DEFAULT_NAMESPACE};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::snapshot::{content_fingerprint, ConfigurationSnapshot};

/// Notification id used for namespaces whose change state is unknown.
pub const UNKNOWN_NOTIFICATION_ID: i64 = -1;

/// Error taxonomy of remote calls.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request timed out but the server accepts TCP connections.
    #[error("namespace not found: {url} timed out while {server} is reachable")]
    NamespaceNotFound { url: String, server: String },
    /// The request timed out and the liveness check could not connect.
    #[error("server {server} not responding: {reason}")]
    ServerNotResponding { server: String, reason: String },
    /// The connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A `200` response carried a payload that could not be decoded.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// The configured server URL cannot be used to build request URLs.
    #[error("invalid config server url {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether the failure means the server cannot be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, FetchError::Connection(_))
    }

    /// Whether the failure concerns a single response rather than the server.
    ///
    /// Malformed payloads and non-timeout transport errors fall in this class.
    pub fn is_request_scoped(&self) -> bool {
        matches!(self, FetchError::Decode { .. } | FetchError::Transport(_))
    }
}

/// A decoded release: the namespace snapshot and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub snapshot: ConfigurationSnapshot,
    pub fingerprint: String,
}

/// Result of a release request that completed at the HTTP level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Status `200` with a decodable release.
    Fetched(Release),
    /// Any other status; the caller should fall back to the local cache.
    Unavailable { status: u16 },
}

/// Entry of the namespace discovery response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceEntry {
    namespace_name: String,
    #[serde(default = "unknown_notification_id")]
    id: i64,
}

fn unknown_notification_id() -> i64 {
    UNKNOWN_NOTIFICATION_ID
}

/// Body of the latest-release response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseBody {
    #[serde(default)]
    release_key: Option<String>,
    configurations: ConfigurationsPayload,
}

/// `configurations` is documented as a JSON-encoded string map, but some
/// servers inline the object directly.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigurationsPayload {
    Encoded(String),
    Inline(BTreeMap<String, Value>),
}

impl ConfigurationsPayload {
    fn into_map(self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        let raw = match self {
            ConfigurationsPayload::Encoded(text) => serde_json::from_str(&text)?,
            ConfigurationsPayload::Inline(map) => map,
        };
        Ok(raw
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect())
    }
}

/// Performs namespace discovery and release retrieval.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    request_timeout: Duration,
    auth_token: Option<String>,
}

impl RemoteFetcher {
    /// Builds a fetcher for the server and credentials described by `config`.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.config_server_url)
            .map_err(|_| FetchError::InvalidUrl(config.config_server_url.clone()))?;
        if base_url.cannot_be_a_base() || base_url.host_str().is_none() {
            return Err(FetchError::InvalidUrl(config.config_server_url.clone()));
        }
        Ok(Self {
            transport,
            base_url,
            request_timeout: config.request_timeout(),
            auth_token: config.auth_token.clone(),
        })
    }

    /// Timeout bounding a single request or liveness check.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Queries the namespaces of `app_id`/`cluster`.
    ///
    /// A non-success status (or an empty list) yields `{"application": -1}`
    /// so callers always have at least one namespace to poll.
    pub async fn discover_namespaces(
        &self,
        app_id: &str,
        cluster: &str,
    ) -> Result<BTreeMap<String, i64>, FetchError> {
        let url = self.endpoint(&["apps", app_id, "clusters", cluster, "namespaces"])?;
        let response = self.send(self.request(url.clone())).await?;

        if !response.is_success() {
            warn!(
                app_id,
                cluster,
                status = response.status,
                "apollo namespace discovery failed; using default namespace"
            );
            return Ok(default_namespaces());
        }

        let entries: Vec<NamespaceEntry> = serde_json::from_slice(&response.body)
            .map_err(|source| FetchError::Decode { url, source })?;
        if entries.is_empty() {
            debug!(app_id, cluster, "apollo discovery returned no namespaces");
            return Ok(default_namespaces());
        }

        Ok(entries
            .into_iter()
            .map(|entry| (entry.namespace_name, entry.id))
            .collect())
    }

    /// Retrieves the latest release of `namespace`.
    ///
    /// `deploy_ip` is forwarded as the `ip` query parameter for grey releases.
    pub async fn fetch_namespace(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        deploy_ip: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.endpoint(&[
            "apps", app_id, "clusters", cluster, "namespaces", namespace, "releases", "latest",
        ])?;
        let mut request = self.request(url.clone());
        if let Some(ip) = deploy_ip {
            request = request.query("ip", ip);
        }
        let response = self.send(request).await?;

        if !response.is_success() {
            debug!(
                app_id,
                namespace,
                status = response.status,
                "apollo release unavailable"
            );
            return Ok(FetchOutcome::Unavailable {
                status: response.status,
            });
        }

        let body: ReleaseBody = serde_json::from_slice(&response.body).map_err(|source| {
            FetchError::Decode {
                url: url.clone(),
                source,
            }
        })?;
        let configurations = body
            .configurations
            .into_map()
            .map_err(|source| FetchError::Decode { url, source })?;
        let fingerprint = match body.release_key.filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => content_fingerprint(&configurations),
        };

        Ok(FetchOutcome::Fetched(Release {
            snapshot: ConfigurationSnapshot::new(
                app_id,
                namespace,
                fingerprint.clone(),
                configurations,
            ),
            fingerprint,
        }))
    }

    /// Opens (and immediately drops) a TCP connection to the server.
    pub async fn check_server_reachable(&self) -> Result<(), std::io::Error> {
        let (host, port) = self.server_address();
        match timeout(self.request_timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(result) => result.map(|_stream| ()),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("liveness check timed out after {:?}", self.request_timeout),
            )),
        }
    }

    fn request(&self, url: String) -> HttpRequest {
        let request = HttpRequest::get(url, self.request_timeout);
        match &self.auth_token {
            Some(token) => request.header("Authorization", token.clone()),
            None => request,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let url = request.url.clone();
        match self.transport.get(request).await {
            Ok(response) => Ok(response),
            Err(TransportError::Timeout(_)) => Err(self.classify_timeout(url).await),
            Err(TransportError::Connect(reason)) => Err(FetchError::Connection(reason)),
            Err(TransportError::Other(reason)) => Err(FetchError::Transport(reason)),
        }
    }

    /// Reclassifies a timed-out request using a TCP liveness check.
    async fn classify_timeout(&self, url: String) -> FetchError {
        let (host, port) = self.server_address();
        let server = format!("{host}:{port}");
        match self.check_server_reachable().await {
            Ok(()) => {
                debug!(%url, %server, "apollo server reachable after timeout");
                FetchError::NamespaceNotFound { url, server }
            }
            Err(err) => FetchError::ServerNotResponding {
                server,
                reason: err.to_string(),
            },
        }
    }

    /// Host (without IPv6 brackets) and port of the configured server.
    fn server_address(&self) -> (String, u16) {
        let host = self
            .base_url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = self.base_url.port_or_known_default().unwrap_or(80);
        (host, port)
    }

    /// Appends percent-encoded `segments` to the base URL path.
    fn endpoint(&self, segments: &[&str]) -> Result<String, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }
}

/// Namespace map used when discovery is not possible.
pub fn default_namespaces() -> BTreeMap<String, i64> {
    BTreeMap::from([(DEFAULT_NAMESPACE.to_string(), UNKNOWN_NOTIFICATION_ID)])
}
