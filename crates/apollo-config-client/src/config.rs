// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client configuration and environment-driven bootstrap helpers.
//!
//! [`ClientConfig`] captures the immutable startup parameters of a client. It
//! can be assembled through the builder-style `with_*` methods or derived from
//! the process environment via [`ClientConfig::from_os_env`].

use std::collections::HashMap;
use std::env;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

/// Cluster used when none is supplied.
pub const DEFAULT_CLUSTER: &str = "default";
/// Historical default namespace of every Apollo application.
pub const DEFAULT_NAMESPACE: &str = "application";
/// Server URL used when none is supplied.
pub const DEFAULT_CONFIG_SERVER_URL: &str = "http://localhost:8080";
/// Default client timeout; a single request is bounded by half of it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default delay between two refresh cycles.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_secs(300);
/// Smallest refresh cycle accepted by [`ClientConfig::sanitise`].
pub const MIN_CYCLE_TIME: Duration = Duration::from_secs(1);
/// Name of the cache directory created next to the running executable.
const DEFAULT_CACHE_DIR_NAME: &str = "config";
/// Public address used by the UDP "connect" trick to discover the outbound interface.
const IP_DISCOVERY_TARGET: (&str, u16) = ("8.8.8.8", 53);

const ENV_APP_ID: &str = "APOLLO_APP_ID";
const ENV_CLUSTER: &str = "APOLLO_CLUSTER";
const ENV_CONFIG_SERVER_URL: &str = "APOLLO_CONFIG_SERVER_URL";
const ENV_TIMEOUT_SECS: &str = "APOLLO_TIMEOUT_SECS";
const ENV_CYCLE_TIME_SECS: &str = "APOLLO_CYCLE_TIME_SECS";
const ENV_CACHE_DIR: &str = "APOLLO_CACHE_DIR";
const ENV_AUTH_TOKEN: &str = "APOLLO_AUTH_TOKEN";
const ENV_IP: &str = "APOLLO_IP";

/// Immutable startup parameters of an [`crate::ApolloClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    /// Apollo application id.
    pub app_id: String,
    /// Cluster name (defaults to `"default"`).
    pub cluster: String,
    /// Base URL of the Apollo server, without trailing slash.
    pub config_server_url: String,
    /// Client timeout; each request is bounded by half of it.
    pub timeout: Duration,
    /// Delay between two refresh cycles.
    pub cycle_time: Duration,
    /// Directory holding the local cache artifacts.
    pub cache_dir: PathBuf,
    /// Optional token sent in the `Authorization` header.
    pub auth_token: Option<String>,
    /// Deployment IP forwarded for grey-release targeting; detected when `None`.
    pub ip: Option<String>,
}

impl ClientConfig {
    /// Builds a configuration for `app_id` with every other field defaulted.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: DEFAULT_CLUSTER.to_string(),
            config_server_url: DEFAULT_CONFIG_SERVER_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            cycle_time: DEFAULT_CYCLE_TIME,
            cache_dir: default_cache_dir(),
            auth_token: None,
            ip: None,
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn with_config_server_url(mut self, url: impl Into<String>) -> Self {
        self.config_server_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = sanitize_non_empty(&token.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = sanitize_non_empty(&ip.into());
        self
    }

    /// Timeout applied to a single HTTP attempt or liveness check.
    pub fn request_timeout(&self) -> Duration {
        self.timeout / 2
    }

    /// Returns the configured deployment IP, detecting it when absent.
    pub fn deploy_ip(&self) -> String {
        match &self.ip {
            Some(ip) => ip.clone(),
            None => detect_local_ip(),
        }
    }

    /// Clamps values that would make the refresh loop misbehave.
    ///
    /// Zero timeouts and cycles fall back to the defaults; cycles below
    /// [`MIN_CYCLE_TIME`] are raised to it. Each adjustment logs a warning.
    pub fn sanitise(mut self) -> Self {
        self.config_server_url = self.config_server_url.trim_end_matches('/').to_string();

        if self.timeout.is_zero() {
            warn!(
                "apollo timeout must be > 0; using default {:?}",
                DEFAULT_TIMEOUT
            );
            self.timeout = DEFAULT_TIMEOUT;
        }

        if self.cycle_time.is_zero() {
            warn!(
                "apollo cycle time must be > 0; using default {:?}",
                DEFAULT_CYCLE_TIME
            );
            self.cycle_time = DEFAULT_CYCLE_TIME;
        } else if self.cycle_time < MIN_CYCLE_TIME {
            warn!(
                "apollo cycle time {:?} is below the minimum {:?}; clamping",
                self.cycle_time, MIN_CYCLE_TIME
            );
            self.cycle_time = MIN_CYCLE_TIME;
        }

        if self.cluster.trim().is_empty() {
            self.cluster = DEFAULT_CLUSTER.to_string();
        }

        self
    }

    /// Canonical string identifying this configuration (used as registry key).
    pub fn canonical_key(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Builds a configuration from the current process environment.
    ///
    /// Returns `None` when `APOLLO_APP_ID` is missing or blank.
    pub fn from_os_env() -> Option<Self> {
        Self::from_env_iter(env::vars())
    }

    /// Builds a configuration from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let app_id = map.get(ENV_APP_ID).and_then(|v| sanitize_non_empty(v))?;
        let mut config = Self::new(app_id);

        if let Some(cluster) = map.get(ENV_CLUSTER).and_then(|v| sanitize_non_empty(v)) {
            config.cluster = cluster;
        }
        if let Some(url) = map
            .get(ENV_CONFIG_SERVER_URL)
            .and_then(|v| sanitize_non_empty(v))
        {
            config = config.with_config_server_url(url);
        }
        if let Some(secs) = parse_secs(map.get(ENV_TIMEOUT_SECS).map(String::as_str)) {
            config.timeout = secs;
        }
        if let Some(secs) = parse_secs(map.get(ENV_CYCLE_TIME_SECS).map(String::as_str)) {
            config.cycle_time = secs;
        }
        if let Some(dir) = map.get(ENV_CACHE_DIR).and_then(|v| sanitize_non_empty(v)) {
            config.cache_dir = PathBuf::from(dir);
        }
        config.auth_token = map.get(ENV_AUTH_TOKEN).and_then(|v| sanitize_non_empty(v));
        config.ip = map.get(ENV_IP).and_then(|v| sanitize_non_empty(v));

        Some(config)
    }
}

/// Detects the address of the outbound network interface.
///
/// Connecting a UDP socket sends no packet but makes the OS pick a route, so
/// the socket's local address is the interface used to reach the internet.
/// Falls back to loopback on any failure.
pub fn detect_local_ip() -> String {
    let detected = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(IP_DISCOVERY_TARGET)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string());
    match detected {
        Ok(ip) => ip,
        Err(err) => {
            debug!(%err, "apollo: local ip detection failed; using loopback");
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

/// `config` directory next to the running executable, or `./config`.
fn default_cache_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CACHE_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR_NAME))
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a whole number of seconds; blank or malformed input yields `None`.
fn parse_secs(value: Option<&str>) -> Option<Duration> {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ensures defaults match the historical client defaults.
    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::new("demo");
        assert_eq!(config.cluster, DEFAULT_CLUSTER);
        assert_eq!(config.config_server_url, DEFAULT_CONFIG_SERVER_URL);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.cycle_time, Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.cache_dir.ends_with(DEFAULT_CACHE_DIR_NAME));
        assert!(config.auth_token.is_none());
        assert!(config.ip.is_none());
    }

    #[test]
    fn builder_trims_trailing_slash_and_blank_values() {
        let config = ClientConfig::new("demo")
            .with_config_server_url("http://apollo:8080/")
            .with_auth_token("   ")
            .with_ip(" 10.1.2.3 ");
        assert_eq!(config.config_server_url, "http://apollo:8080");
        assert!(config.auth_token.is_none());
        assert_eq!(config.deploy_ip(), "10.1.2.3");
    }

    /// Zero and sub-second values are replaced so the loop cannot spin.
    #[test]
    fn sanitise_clamps_timeouts_and_cycle() {
        let config = ClientConfig::new("demo")
            .with_timeout(Duration::ZERO)
            .with_cycle_time(Duration::ZERO)
            .with_cluster(" ")
            .sanitise();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.cycle_time, DEFAULT_CYCLE_TIME);
        assert_eq!(config.cluster, DEFAULT_CLUSTER);

        let config = ClientConfig::new("demo")
            .with_cycle_time(Duration::from_millis(10))
            .sanitise();
        assert_eq!(config.cycle_time, MIN_CYCLE_TIME);
    }

    #[test]
    fn from_env_requires_app_id() {
        assert!(ClientConfig::from_env_iter::<Vec<(String, String)>, _, _>(vec![]).is_none());
        assert!(ClientConfig::from_env_iter([(ENV_APP_ID, "  ")]).is_none());
    }

    /// Confirms environment-derived settings respect overrides.
    #[test]
    fn from_env_honours_overrides() {
        let config = ClientConfig::from_env_iter([
            (ENV_APP_ID, "demo"),
            (ENV_CLUSTER, "blue"),
            (ENV_CONFIG_SERVER_URL, "http://apollo.internal:8080/"),
            (ENV_TIMEOUT_SECS, "10"),
            (ENV_CYCLE_TIME_SECS, "30"),
            (ENV_CACHE_DIR, "/tmp/apollo-cache"),
            (ENV_AUTH_TOKEN, " secret "),
            (ENV_IP, "192.168.0.9"),
        ])
        .expect("app id present");
        assert_eq!(config.app_id, "demo");
        assert_eq!(config.cluster, "blue");
        assert_eq!(config.config_server_url, "http://apollo.internal:8080");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.cycle_time, Duration::from_secs(30));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/apollo-cache"));
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.ip.as_deref(), Some("192.168.0.9"));
    }

    #[test]
    fn from_env_ignores_malformed_numbers() {
        let config = ClientConfig::from_env_iter([
            (ENV_APP_ID, "demo"),
            (ENV_TIMEOUT_SECS, "soon"),
            (ENV_CYCLE_TIME_SECS, ""),
        ])
        .expect("app id present");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.cycle_time, DEFAULT_CYCLE_TIME);
    }

    #[test]
    fn canonical_key_distinguishes_configurations() {
        let a = ClientConfig::new("demo").with_ip("1.1.1.1");
        let b = ClientConfig::new("demo").with_ip("1.1.1.1");
        let c = ClientConfig::new("demo").with_cluster("blue").with_ip("1.1.1.1");
        assert_eq!(a.canonical_key().unwrap(), b.canonical_key().unwrap());
        assert_ne!(a.canonical_key().unwrap(), c.canonical_key().unwrap());
    }

    /// Detection never fails: either an interface address or loopback.
    #[test]
    fn detect_local_ip_returns_parseable_address() {
        let ip = detect_local_ip();
        assert!(ip.parse::<std::net::IpAddr>().is_ok(), "got {ip}");
    }
}
