// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local-disk cache of namespace configurations.
//!
//! Every `(appId, namespace)` pair owns one JSON artifact inside the cache
//! directory. Artifacts are written to a temporary file first and atomically
//! renamed into place, so a reader never observes a half-written record. The
//! store remembers the last fingerprint written for each pair and skips writes
//! whose fingerprint did not change.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tempfile::Builder as TempFileBuilder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::snapshot::ConfigurationSnapshot;

/// Infix between the app id and the namespace in artifact names.
const ARTIFACT_INFIX: &str = "_configuration_";
/// Extension of cache artifacts.
const ARTIFACT_EXTENSION: &str = "json";
/// Prefix of in-flight temporary files.
const TEMP_PREFIX: &str = ".apollo-";

/// Errors emitted by the [`LocalCacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to parse cache artifact {path}: {source}")]
    CacheParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk representation of a cached namespace.
///
/// `appId` and `namespace` default to empty so that artifacts holding a bare
/// server response (`releaseKey` + `configurations`) still parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub release_key: String,
    pub configurations: BTreeMap<String, String>,
}

impl CacheRecord {
    fn into_snapshot(self) -> ConfigurationSnapshot {
        ConfigurationSnapshot::new(
            self.app_id,
            self.namespace,
            self.release_key,
            self.configurations,
        )
    }
}

/// Directory-backed cache of [`ConfigurationSnapshot`]s.
#[derive(Debug)]
pub struct LocalCacheStore {
    dir: PathBuf,
    /// Last fingerprint written per `(appId, namespace)`.
    fingerprints: Mutex<HashMap<(String, String), String>>,
}

impl LocalCacheStore {
    /// Opens the store, creating the cache directory (and parents) if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "apollo cache directory ready");
        Ok(Self {
            dir,
            fingerprints: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the directory backing the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the artifact path for `(app_id, namespace)`.
    pub fn artifact_path(&self, app_id: &str, namespace: &str) -> PathBuf {
        self.dir.join(artifact_name(app_id, namespace))
    }

    /// Persists `snapshot` unless `fingerprint` matches the last one written.
    ///
    /// Returns `true` when the artifact was (re)written and `false` on no-op.
    /// When this instance has not written the pair yet, the fingerprint stored
    /// inside the existing artifact is used for the comparison.
    pub fn write(
        &self,
        app_id: &str,
        namespace: &str,
        snapshot: &ConfigurationSnapshot,
        fingerprint: &str,
    ) -> Result<bool, StoreError> {
        let path = self.artifact_path(app_id, namespace);
        let key = (app_id.to_string(), namespace.to_string());
        let mut fingerprints = self.lock_fingerprints();

        let previous = match fingerprints.get(&key) {
            Some(known) => Some(known.clone()),
            None => stored_fingerprint(&path),
        };
        if previous.as_deref() == Some(fingerprint) {
            fingerprints.insert(key, fingerprint.to_string());
            debug!(app_id, namespace, fingerprint, "apollo cache unchanged; skipping write");
            return Ok(false);
        }

        let record = CacheRecord {
            app_id: app_id.to_string(),
            namespace: namespace.to_string(),
            release_key: fingerprint.to_string(),
            configurations: snapshot.configurations().clone(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let mut tmp = TempFileBuilder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| StoreError::Io(err.error))?;

        fingerprints.insert(key, fingerprint.to_string());
        debug!(
            app_id,
            namespace,
            fingerprint,
            path = %path.display(),
            "apollo cache artifact written"
        );
        Ok(true)
    }

    /// Returns the cached snapshot for `(app_id, namespace)`, if an artifact exists.
    pub fn read(
        &self,
        app_id: &str,
        namespace: &str,
    ) -> Result<Option<ConfigurationSnapshot>, StoreError> {
        let path = self.artifact_path(app_id, namespace);
        if !path.is_file() {
            return Ok(None);
        }
        let mut record = read_record(&path)?;
        if !record.app_id.is_empty() && record.app_id != app_id {
            return Ok(None);
        }
        record.app_id = app_id.to_string();
        record.namespace = namespace.to_string();
        Ok(Some(record.into_snapshot()))
    }

    /// Loads every cached namespace of `app_id`.
    ///
    /// Swap files, temporary files, other applications' artifacts and
    /// directories are skipped. Artifacts that fail to parse are logged and
    /// skipped as well; only a failure to list the directory is an error.
    pub fn load_all(
        &self,
        app_id: &str,
    ) -> Result<HashMap<String, ConfigurationSnapshot>, StoreError> {
        let prefix = format!("{}{ARTIFACT_INFIX}", file_component(app_id));
        let mut snapshots = HashMap::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(namespace) = namespace_from_file_name(file_name, &prefix) else {
                debug!(file = file_name, "apollo cache: skipping non-data file");
                continue;
            };

            match read_record(&path) {
                Ok(mut record) => {
                    // Distinct app ids can share a file prefix once sanitised.
                    if !record.app_id.is_empty() && record.app_id != app_id {
                        debug!(
                            file = file_name,
                            owner = %record.app_id,
                            "apollo cache: skipping another application's artifact"
                        );
                        continue;
                    }
                    if record.namespace.is_empty() {
                        record.namespace = namespace.to_string();
                    }
                    record.app_id = app_id.to_string();
                    snapshots.insert(record.namespace.clone(), record.into_snapshot());
                }
                Err(err) => {
                    warn!(%err, "apollo cache: skipping unreadable artifact");
                }
            }
        }

        Ok(snapshots)
    }

    /// Locks the fingerprint map, recovering from poisoning.
    fn lock_fingerprints(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.fingerprints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deterministic artifact file name for `(app_id, namespace)`.
///
/// Path separators are replaced so a namespace can never escape the directory.
fn artifact_name(app_id: &str, namespace: &str) -> String {
    format!(
        "{}{ARTIFACT_INFIX}{}.{ARTIFACT_EXTENSION}",
        file_component(app_id),
        file_component(namespace)
    )
}

fn file_component(value: &str) -> String {
    value.replace(['/', '\\'], "_")
}

/// Extracts the namespace from an artifact name belonging to `prefix`'s app.
fn namespace_from_file_name<'a>(file_name: &'a str, prefix: &str) -> Option<&'a str> {
    if file_name.starts_with('.') {
        return None;
    }
    let (stem, extension) = file_name.rsplit_once('.')?;
    // Also rejects editor swap files and in-flight temporaries.
    if extension != ARTIFACT_EXTENSION {
        return None;
    }
    stem.strip_prefix(prefix).filter(|ns| !ns.is_empty())
}

fn read_record(path: &Path) -> Result<CacheRecord, StoreError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| StoreError::CacheParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Fingerprint stored inside an existing artifact (best effort).
fn stored_fingerprint(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    read_record(path)
        .ok()
        .map(|record| record.release_key)
        .filter(|key| !key.is_empty())
}
