// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures and utilities for client tests.
//!
//! Consolidating these helpers keeps individual test modules focused on their
//! assertions while avoiding duplication of setup logic.

#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use tempfile::TempDir;

use crate::config::ClientConfig;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Scripted outcome of a request.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Respond(u16, Vec<u8>),
    Timeout,
    Refused,
}

/// In-process transport replaying scripted outcomes per URL path.
///
/// Each path owns a queue; the last entry of a queue is sticky so a single
/// scripted response serves every later cycle. Unscripted paths answer `404`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn respond(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.script(path, Scripted::Respond(status, body.into()));
    }

    pub(crate) fn script(&self, path: &str, outcome: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Drops every scripted outcome of `path`.
    pub(crate) fn clear(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| url_path(&request.url) == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = url_path(&request.url);
        let timeout = request.timeout;
        self.requests.lock().unwrap().push(request);

        let next = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&path) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Scripted::Respond(status, body)) => Ok(HttpResponse::new(status, body)),
            Some(Scripted::Timeout) => Err(TransportError::Timeout(timeout)),
            Some(Scripted::Refused) => Err(TransportError::Connect("connection refused".into())),
            None => Ok(HttpResponse::new(404, Vec::new())),
        }
    }
}

fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Discovery endpoint path for `app`/`cluster`.
pub(crate) fn namespaces_path(app: &str, cluster: &str) -> String {
    format!("/apps/{app}/clusters/{cluster}/namespaces")
}

/// Latest-release endpoint path for `app`/`cluster`/`namespace`.
pub(crate) fn release_path(app: &str, cluster: &str, namespace: &str) -> String {
    format!("/apps/{app}/clusters/{cluster}/namespaces/{namespace}/releases/latest")
}

/// Discovery payload listing `(namespaceName, id)` pairs.
pub(crate) fn discovery_body(namespaces: &[(&str, i64)]) -> String {
    let entries: Vec<_> = namespaces
        .iter()
        .map(|(name, id)| json!({"namespaceName": name, "id": id, "format": "properties"}))
        .collect();
    serde_json::Value::Array(entries).to_string()
}

/// Release payload with `configurations` encoded as a JSON string, as the server sends it.
pub(crate) fn release_body(release_key: &str, pairs: &[(&str, &str)]) -> String {
    let configurations: serde_json::Map<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    json!({
        "releaseKey": release_key,
        "configurations": serde_json::Value::Object(configurations).to_string(),
    })
    .to_string()
}

/// Address on which nothing listens.
pub(crate) fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Client configuration pointing at a fake server with a temporary cache.
pub(crate) fn test_config(app: &str, cache: &TempDir) -> ClientConfig {
    ClientConfig::new(app)
        .with_config_server_url("http://apollo.test:8080")
        .with_timeout(Duration::from_secs(2))
        .with_cycle_time(Duration::from_secs(3600))
        .with_cache_dir(cache.path())
        .with_ip("10.0.0.1")
}

/// Transport scripted with one namespace and one release.
pub(crate) fn single_release_transport(
    app: &str,
    release_key: &str,
    pairs: &[(&str, &str)],
) -> Arc<ScriptedTransport> {
    let transport = Arc::new(ScriptedTransport::default());
    transport.respond(
        &namespaces_path(app, "default"),
        200,
        discovery_body(&[("application", 101)]),
    );
    transport.respond(
        &release_path(app, "default", "application"),
        200,
        release_body(release_key, pairs),
    );
    transport
}
