// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Namespace change tracking.
//!
//! The notifier keeps the registry of namespaces and their last-known
//! notification ids. Each refresh re-discovers the full namespace set and
//! replaces the registry; every known namespace is then re-fetched by the
//! controller, which is how this client approximates long polling.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::fetcher::{default_namespaces, FetchError, RemoteFetcher};

/// Mapping namespace → last-known notification id (`-1` when unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    ids: BTreeMap<String, i64>,
}

impl Default for NamespaceRegistry {
    /// Starts with the historical default namespace in an unknown state.
    fn default() -> Self {
        Self {
            ids: default_namespaces(),
        }
    }
}

impl NamespaceRegistry {
    /// Namespaces in a stable (sorted) order.
    pub fn namespaces(&self) -> Vec<String> {
        self.ids.keys().cloned().collect()
    }

    pub fn notification_id(&self, namespace: &str) -> Option<i64> {
        self.ids.get(namespace).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Replaces the registry, returning namespaces that are new or whose id moved.
    fn replace(&mut self, ids: BTreeMap<String, i64>) -> Vec<String> {
        let changed = ids
            .iter()
            .filter(|(namespace, id)| self.ids.get(*namespace) != Some(*id))
            .map(|(namespace, _)| namespace.clone())
            .collect();
        self.ids = ids;
        changed
    }
}

/// Refreshes the [`NamespaceRegistry`] from the server.
#[derive(Debug, Clone)]
pub struct LongPollNotifier {
    fetcher: RemoteFetcher,
    app_id: String,
    cluster: String,
    registry: NamespaceRegistry,
}

impl LongPollNotifier {
    pub fn new(
        fetcher: RemoteFetcher,
        app_id: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            app_id: app_id.into(),
            cluster: cluster.into(),
            registry: NamespaceRegistry::default(),
        }
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    /// Re-discovers namespaces and replaces the registry with the result.
    ///
    /// On error the registry is left untouched. Returns the namespaces that
    /// appeared or changed id since the previous refresh.
    pub async fn refresh_notification_state(&mut self) -> Result<Vec<String>, FetchError> {
        let discovered = self
            .fetcher
            .discover_namespaces(&self.app_id, &self.cluster)
            .await?;
        let changed = self.registry.replace(discovered);
        for namespace in &changed {
            info!(
                app_id = %self.app_id,
                namespace = %namespace,
                notification_id = self.registry.notification_id(namespace).unwrap_or_default(),
                "apollo namespace has changes"
            );
        }
        debug!(
            app_id = %self.app_id,
            namespaces = self.registry.len(),
            "apollo namespace registry refreshed"
        );
        Ok(changed)
    }
}
