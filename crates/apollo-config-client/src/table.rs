// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Live namespace → configuration table read by application code.
//!
//! Readers and the single writer share a `RwLock` around a map of
//! `Arc<ConfigurationSnapshot>`. Writers only ever swap whole `Arc`s, so the
//! lock is held for a map operation and never across I/O, and a reader sees
//! either the previous or the next snapshot of a namespace, never a blend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::snapshot::ConfigurationSnapshot;

/// Shared-read / single-writer configuration table.
#[derive(Debug, Default)]
pub struct ConfigTable {
    namespaces: RwLock<HashMap<String, Arc<ConfigurationSnapshot>>>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `key` from `namespace`, or `default` when either is unknown.
    pub fn get(&self, namespace: &str, key: &str, default: &str) -> String {
        self.read()
            .get(namespace)
            .and_then(|snapshot| snapshot.get(key))
            .unwrap_or(default)
            .to_string()
    }

    /// Current snapshot of `namespace`, if any.
    pub fn namespace(&self, namespace: &str) -> Option<Arc<ConfigurationSnapshot>> {
        self.read().get(namespace).cloned()
    }

    /// Names of the namespaces currently present, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Installs `snapshot` under its namespace, replacing any previous one.
    pub fn install(&self, snapshot: ConfigurationSnapshot) {
        let snapshot = Arc::new(snapshot);
        let namespace = snapshot.namespace().to_string();
        self.write().insert(namespace, snapshot);
    }

    /// Replaces the whole table with `snapshots`.
    ///
    /// Namespaces absent from `snapshots` disappear.
    pub fn replace_all(
        &self,
        snapshots: impl IntoIterator<Item = (String, ConfigurationSnapshot)>,
    ) {
        let next: HashMap<_, _> = snapshots
            .into_iter()
            .map(|(namespace, snapshot)| (namespace, Arc::new(snapshot)))
            .collect();
        *self.write() = next;
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ConfigurationSnapshot>>> {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ConfigurationSnapshot>>> {
        self.namespaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
