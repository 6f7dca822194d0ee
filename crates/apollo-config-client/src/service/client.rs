// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application-facing client: construction, lookups and shutdown.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ClientConfig, DEFAULT_NAMESPACE};
use crate::fetcher::RemoteFetcher;
use crate::http::{HttpTransport, ReqwestTransport, TransportError};
use crate::store::{LocalCacheStore, StoreError};
use crate::table::ConfigTable;
use crate::telemetry::{NoopTelemetry, SyncTelemetry};

use super::controller::{CycleOutcome, SyncController, SyncState};

/// Errors that prevent a client from being constructed.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The cache directory could not be created.
    #[error("failed to prepare local cache: {0}")]
    Store(#[from] StoreError),
    /// The configuration cannot be used.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
    /// The default HTTP transport could not be built.
    #[error("failed to build http transport: {0}")]
    Transport(#[from] TransportError),
}

/// Apollo configuration client.
///
/// Reads are served synchronously from the in-memory table while a background
/// task keeps it fresh. Dropping the client stops the background task;
/// [`ApolloClient::shutdown`] additionally waits for it to finish.
pub struct ApolloClient {
    config: ClientConfig,
    table: Arc<ConfigTable>,
    controller: Arc<Mutex<SyncController>>,
    state: watch::Receiver<SyncState>,
    cancel: CancellationToken,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ApolloClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloClient")
            .field("app_id", &self.config.app_id)
            .field("cluster", &self.config.cluster)
            .field("namespaces", &self.table.namespaces())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ApolloClient {
    /// Builds a client using the default `reqwest` transport.
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::with_transport(config, transport).await
    }

    /// Builds a client on top of a caller-provided transport.
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ClientError> {
        Self::with_telemetry(config, transport, Arc::new(NoopTelemetry)).await
    }

    /// Builds a client reporting refresh events to `telemetry`.
    ///
    /// The cache directory is created first; failing to do so is fatal. When
    /// the table is still empty one refresh cycle runs before returning, so
    /// the first lookups already see server (or cached) values. Must be called
    /// within a tokio runtime.
    pub async fn with_telemetry(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        telemetry: Arc<dyn SyncTelemetry>,
    ) -> Result<Self, ClientError> {
        let config = config.sanitise();
        if config.app_id.trim().is_empty() {
            return Err(ClientError::InvalidConfig("app_id must not be empty".into()));
        }

        let store = Arc::new(LocalCacheStore::open(&config.cache_dir)?);
        let fetcher = RemoteFetcher::new(&config, transport)
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        let table = Arc::new(ConfigTable::new());
        let mut controller =
            SyncController::new(&config, fetcher, store, table.clone(), telemetry);

        if table.is_empty() {
            let outcome = controller.run_cycle().await;
            info!(
                app_id = %config.app_id,
                ?outcome,
                namespaces = table.len(),
                "apollo client initialised"
            );
        }

        let state = controller.subscribe_state();
        let controller = Arc::new(Mutex::new(controller));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(SyncController::run_shared(
            controller.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            config,
            table,
            controller,
            state,
            cancel,
            worker: StdMutex::new(Some(worker)),
        })
    }

    /// Returns `key` from `namespace`, or `default` when absent.
    pub fn get_value(&self, key: &str, default: &str, namespace: &str) -> String {
        self.table.get(namespace, key, default)
    }

    /// Returns `key` from the `application` namespace, or `default` when absent.
    pub fn get(&self, key: &str, default: &str) -> String {
        self.get_value(key, default, DEFAULT_NAMESPACE)
    }

    /// Runs a refresh cycle now, serialised with the background loop.
    pub async fn refresh_once(&self) -> CycleOutcome {
        self.controller.lock().await.run_cycle().await
    }

    /// Receiver observing the refresh loop state.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn table(&self) -> Arc<ConfigTable> {
        self.table.clone()
    }

    /// The sanitised configuration the client runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stops the background loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(app_id = %self.config.app_id, "apollo refresh task ended abnormally: {err}");
            }
        }
    }
}

impl Drop for ApolloClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
