// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock Apollo server helpers shared across integration tests.

use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::time::Duration;

use apollo_config_client::ClientConfig;
use httptest::matchers::{eq, request};
use httptest::responders::{json_encoded, Responder};
use httptest::{Expectation, Server};
use serde_json::{json, Value};

/// Cluster used by every scenario.
pub const CLUSTER: &str = "default";

/// Base URL of `server` without the trailing slash.
pub fn base_url(server: &Server) -> String {
    server.url_str("").trim_end_matches('/').to_string()
}

/// Client configuration for `app` against `base_url`, caching into `cache_dir`.
///
/// The refresh interval is long so scenarios drive cycles explicitly.
pub fn client_config(app: &str, base_url: &str, cache_dir: &Path) -> ClientConfig {
    ClientConfig::new(app)
        .with_config_server_url(base_url)
        .with_timeout(Duration::from_secs(2))
        .with_cycle_time(Duration::from_secs(3600))
        .with_cache_dir(cache_dir)
        .with_ip("10.1.2.3")
}

/// Serves the namespace list of `app` for any number of requests.
pub fn mount_namespaces(server: &Server, app: &str, namespaces: &[(&str, i64)]) {
    let entries: Vec<Value> = namespaces
        .iter()
        .map(|(name, id)| json!({"namespaceName": name, "id": id, "format": "properties"}))
        .collect();
    server.expect(
        Expectation::matching(request::method_path(
            "GET",
            eq(format!("/apps/{app}/clusters/{CLUSTER}/namespaces")),
        ))
        .times(..)
        .respond_with(json_encoded(Value::Array(entries))),
    );
}

/// Serves `responder` for the latest release of `app`/`namespace`.
pub fn mount_release_with(
    server: &Server,
    app: &str,
    namespace: &str,
    responder: impl Responder + 'static,
) {
    server.expect(
        Expectation::matching(request::method_path(
            "GET",
            eq(format!(
                "/apps/{app}/clusters/{CLUSTER}/namespaces/{namespace}/releases/latest"
            )),
        ))
        .times(..)
        .respond_with(responder),
    );
}

/// Serves a release whose `configurations` is a JSON-encoded string, as Apollo does.
pub fn mount_release(
    server: &Server,
    app: &str,
    namespace: &str,
    release_key: &str,
    pairs: &[(&str, &str)],
) {
    mount_release_with(server, app, namespace, json_encoded(release_body(release_key, pairs)));
}

pub fn release_body(release_key: &str, pairs: &[(&str, &str)]) -> Value {
    let configurations: serde_json::Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    json!({
        "appId": "ignored",
        "releaseKey": release_key,
        "configurations": Value::Object(configurations).to_string(),
    })
}

/// Address on which nothing listens.
pub fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
