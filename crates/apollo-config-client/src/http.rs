// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport used to talk to the Apollo server.
//!
//! The synchronization engine only needs "GET this URL with these query
//! parameters and headers, give me the status and body". [`HttpTransport`]
//! captures that capability so tests (and embedders with their own HTTP stack)
//! can plug in a different implementation. [`ReqwestTransport`] is the default.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Headers whose values never appear in logs.
const SENSITIVE_HEADERS: [&str; 1] = ["authorization"];

/// Transport-level failure, before any HTTP status is known.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection could not be established (refused, unreachable, DNS).
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other transport issue (TLS, malformed request, body read).
    #[error("transport error: {0}")]
    Other(String),
}

/// A single GET request issued by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the headers with sensitive values redacted, for debug logging.
    pub fn redacted_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(name, value)| {
                let lower = name.to_ascii_lowercase();
                let display = if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                    "<redacted>".to_string()
                } else {
                    value.clone()
                };
                (lower, display)
            })
            .collect()
    }
}

/// Status and body of a completed request.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

impl fmt::Debug for HttpResponse {
    /// Prints the body length rather than the (possibly large) payload.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Pluggable "fetch(url, params) -> status + body" capability.
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Performs `request`, returning any completed response regardless of status.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the transport; fails only when the TLS backend cannot initialise.
    pub fn new() -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let user_agent = format!("apollo-config-client/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent).map_err(|e| TransportError::Other(e.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client (custom proxies, TLS roots, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(
            url = %request.url,
            query = ?request.query,
            headers = ?request.redacted_headers(),
            timeout = ?request.timeout,
            "apollo HTTP request"
        );

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| TransportError::Other(e.to_string()))?;
            headers.insert(name, value);
        }

        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .headers(headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(err, request.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_reqwest_error(err, request.timeout))?;

        debug!(
            url = %request.url,
            status,
            body_len = body.len(),
            "apollo HTTP response"
        );
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Maps a `reqwest` failure onto the transport error taxonomy.
fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
