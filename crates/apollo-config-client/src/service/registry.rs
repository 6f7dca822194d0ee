// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shares one client per distinct configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ClientConfig;
use crate::http::{HttpTransport, ReqwestTransport};

use super::client::{ApolloClient, ClientError};

/// Clients keyed by the canonical form of their (sanitised) configuration.
///
/// Asking twice for the same configuration returns the same `Arc`, so only one
/// refresh loop and one cache writer exist per application/cluster/server.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<ApolloClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client for `config`, building it with the default transport if needed.
    pub async fn get_or_create(
        &self,
        config: ClientConfig,
    ) -> Result<Arc<ApolloClient>, ClientError> {
        self.get_or_build(config, || {
            Ok(Arc::new(ReqwestTransport::new()?) as Arc<dyn HttpTransport>)
        })
        .await
    }

    /// Same as [`ClientRegistry::get_or_create`] with a caller-provided transport.
    ///
    /// The transport is only used when a new client has to be built.
    pub async fn get_or_create_with_transport(
        &self,
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Arc<ApolloClient>, ClientError> {
        self.get_or_build(config, || Ok(transport)).await
    }

    async fn get_or_build<F>(
        &self,
        config: ClientConfig,
        transport: F,
    ) -> Result<Arc<ApolloClient>, ClientError>
    where
        F: FnOnce() -> Result<Arc<dyn HttpTransport>, ClientError>,
    {
        let key = registry_key(&config)?;
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            debug!(app_id = %config.app_id, "reusing registered apollo client");
            return Ok(client.clone());
        }
        let client = Arc::new(ApolloClient::with_transport(config, transport()?).await?);
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Removes every client and waits for their refresh loops to stop.
    pub async fn shutdown_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            client.shutdown().await;
        }
    }
}

fn registry_key(config: &ClientConfig) -> Result<String, ClientError> {
    config
        .clone()
        .sanitise()
        .canonical_key()
        .map_err(|err| ClientError::InvalidConfig(err.to_string()))
}
