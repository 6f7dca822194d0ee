// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Immutable configuration snapshot for a single `(appId, namespace)` pair.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Key/value configuration of one namespace as published by one release.
///
/// Snapshots are never mutated after construction: a newer release replaces
/// the whole value in the table and in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSnapshot {
    app_id: String,
    namespace: String,
    release_key: String,
    configurations: BTreeMap<String, String>,
}

impl ConfigurationSnapshot {
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        release_key: impl Into<String>,
        configurations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            release_key: release_key.into(),
            configurations,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Release identifier used as the cache fingerprint.
    pub fn release_key(&self) -> &str {
        &self.release_key
    }

    pub fn configurations(&self) -> &BTreeMap<String, String> {
        &self.configurations
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.configurations.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

/// Computes the hexadecimal SHA-256 digest of the canonical JSON rendering of
/// `configurations`.
///
/// Used as the fingerprint when the server does not provide a release key.
/// `BTreeMap` keeps key order stable so equal maps always hash the same.
pub fn content_fingerprint(configurations: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(configurations) {
        Ok(bytes) => hasher.update(&bytes),
        // Serialising a string map cannot fail; hash the debug form regardless.
        Err(_) => hasher.update(format!("{configurations:?}").as_bytes()),
    }
    hex::encode(hasher.finalize())
}
