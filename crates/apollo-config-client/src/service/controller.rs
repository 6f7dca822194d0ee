// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Refresh loop driving namespace discovery, release retrieval and caching.
//!
//! A cycle walks `Idle → Polling → (Applying | Degraded) → Idle`:
//! - successful releases are installed into the table and persisted when
//!   their fingerprint changed,
//! - non-200 statuses restore the namespace from its cache artifact,
//! - malformed payloads restore only the affected namespace from its cache,
//! - connection failures rebuild the whole table from the cache directory,
//! - timeouts end the cycle without touching state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::fetcher::{FetchError, FetchOutcome, Release, RemoteFetcher};
use crate::notifier::LongPollNotifier;
use crate::store::LocalCacheStore;
use crate::table::ConfigTable;
use crate::telemetry::SyncTelemetry;

/// Observable state of the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for the next cycle.
    Idle,
    /// Discovering namespaces and requesting releases.
    Polling,
    /// Installing fetched or cached snapshots.
    Applying,
    /// Rebuilding the table from the local cache after a connection failure.
    Degraded,
}

/// Summary of a single refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every namespace was processed.
    Applied {
        /// Releases installed from the server.
        fetched: usize,
        /// Namespaces restored from their cache artifact (non-200 status or unusable payload).
        restored: usize,
        /// Cache artifacts rewritten because the fingerprint changed.
        persisted: usize,
    },
    /// The server was unreachable and the table was rebuilt from disk.
    Degraded { restored: usize },
    /// The cycle ended early; the table was left as it was.
    Aborted,
}

/// Owns the notifier and fetcher and is the single writer of the table and cache.
pub struct SyncController {
    notifier: LongPollNotifier,
    fetcher: RemoteFetcher,
    store: Arc<LocalCacheStore>,
    table: Arc<ConfigTable>,
    app_id: String,
    cluster: String,
    deploy_ip: String,
    cycle_time: Duration,
    telemetry: Arc<dyn SyncTelemetry>,
    state: watch::Sender<SyncState>,
}

impl fmt::Debug for SyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncController")
            .field("app_id", &self.app_id)
            .field("cluster", &self.cluster)
            .field("deploy_ip", &self.deploy_ip)
            .field("cycle_time", &self.cycle_time)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncController {
    /// Wires a controller for the application described by `config`.
    ///
    /// The deployment IP is resolved once here and reused for every request.
    pub fn new(
        config: &ClientConfig,
        fetcher: RemoteFetcher,
        store: Arc<LocalCacheStore>,
        table: Arc<ConfigTable>,
        telemetry: Arc<dyn SyncTelemetry>,
    ) -> Self {
        let notifier =
            LongPollNotifier::new(fetcher.clone(), config.app_id.clone(), config.cluster.clone());
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            notifier,
            fetcher,
            store,
            table,
            app_id: config.app_id.clone(),
            cluster: config.cluster.clone(),
            deploy_ip: config.deploy_ip(),
            cycle_time: config.cycle_time,
            telemetry,
            state,
        }
    }

    /// Receiver observing every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn table(&self) -> &Arc<ConfigTable> {
        &self.table
    }

    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// Runs one full refresh cycle and returns to `Idle`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.publish(SyncState::Polling);
        let outcome = match self.poll().await {
            Ok(outcome) => outcome,
            Err(err) if err.is_connection_failure() => self.degrade(&err),
            Err(err) => {
                warn!(
                    app_id = %self.app_id,
                    error = %err,
                    "apollo refresh cycle aborted; keeping current configuration"
                );
                self.telemetry.on_cycle_aborted(&err);
                CycleOutcome::Aborted
            }
        };
        self.publish(SyncState::Idle);
        debug!(app_id = %self.app_id, ?outcome, "apollo refresh cycle finished");
        outcome
    }

    /// Runs cycles every `cycle_time` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        Self::run_shared(Arc::new(Mutex::new(self)), cancel).await;
    }

    /// Loop body shared with [`ApolloClient`](super::ApolloClient), which also
    /// runs on-demand cycles through the same mutex.
    pub(crate) async fn run_shared(controller: Arc<Mutex<Self>>, cancel: CancellationToken) {
        let (app_id, cycle_time) = {
            let guard = controller.lock().await;
            (guard.app_id.clone(), guard.cycle_time)
        };
        info!(%app_id, ?cycle_time, "apollo refresh loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cycle_time) => {}
            }

            let mut guard = controller.lock().await;
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = guard.run_cycle() => false,
            };
            if cancelled {
                guard.publish(SyncState::Idle);
                break;
            }
        }

        info!(%app_id, "apollo refresh loop stopped");
    }

    async fn poll(&mut self) -> Result<CycleOutcome, FetchError> {
        match self.notifier.refresh_notification_state().await {
            Ok(_) => {}
            Err(err) if err.is_request_scoped() => {
                warn!(
                    app_id = %self.app_id,
                    error = %err,
                    "apollo namespace discovery failed; polling known namespaces"
                );
            }
            Err(err) => return Err(err),
        }
        let namespaces = self.notifier.registry().namespaces();

        let (mut fetched, mut restored, mut persisted) = (0, 0, 0);
        for namespace in namespaces {
            let result = self
                .fetcher
                .fetch_namespace(&self.app_id, &self.cluster, &namespace, Some(&self.deploy_ip))
                .await;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) if err.is_request_scoped() => {
                    warn!(
                        app_id = %self.app_id,
                        namespace = %namespace,
                        error = %err,
                        "apollo release unusable; falling back to cached configuration"
                    );
                    FetchOutcome::Unavailable { status: 200 }
                }
                Err(err) => return Err(err),
            };
            self.publish(SyncState::Applying);
            match outcome {
                FetchOutcome::Fetched(release) => {
                    fetched += 1;
                    if self.apply_release(release) {
                        persisted += 1;
                    }
                }
                FetchOutcome::Unavailable { status } => {
                    if self.apply_cached(&namespace, status) {
                        restored += 1;
                    }
                }
            }
        }

        Ok(CycleOutcome::Applied {
            fetched,
            restored,
            persisted,
        })
    }

    /// Installs a fetched release and persists it when new; returns whether it was written.
    fn apply_release(&self, release: Release) -> bool {
        let Release {
            snapshot,
            fingerprint,
        } = release;
        let namespace = snapshot.namespace().to_string();
        self.table.install(snapshot.clone());

        let persisted = match self
            .store
            .write(&self.app_id, &namespace, &snapshot, &fingerprint)
        {
            Ok(written) => written,
            Err(err) => {
                error!(
                    app_id = %self.app_id,
                    namespace = %namespace,
                    error = %err,
                    "failed to persist apollo cache artifact"
                );
                false
            }
        };

        if persisted {
            info!(
                app_id = %self.app_id,
                namespace = %namespace,
                release_key = %fingerprint,
                "apollo configuration updated"
            );
        }
        self.telemetry
            .on_namespace_applied(&namespace, &fingerprint, persisted);
        persisted
    }

    /// Restores `namespace` from its cache artifact; returns whether one existed.
    fn apply_cached(&self, namespace: &str, status: u16) -> bool {
        match self.store.read(&self.app_id, namespace) {
            Ok(Some(snapshot)) => {
                info!(
                    app_id = %self.app_id,
                    namespace,
                    status,
                    release_key = snapshot.release_key(),
                    "apollo release unavailable; serving cached configuration"
                );
                self.table.install(snapshot);
                self.telemetry.on_cache_fallback(namespace, true);
                true
            }
            Ok(None) => {
                warn!(
                    app_id = %self.app_id,
                    namespace,
                    status,
                    "apollo release unavailable and no cached configuration exists"
                );
                self.telemetry.on_cache_fallback(namespace, false);
                false
            }
            Err(err) => {
                warn!(
                    app_id = %self.app_id,
                    namespace,
                    status,
                    error = %err,
                    "apollo release unavailable and cached configuration is unreadable"
                );
                self.telemetry.on_cache_fallback(namespace, false);
                false
            }
        }
    }

    /// Replaces the table with every artifact found on disk.
    fn degrade(&self, cause: &FetchError) -> CycleOutcome {
        self.publish(SyncState::Degraded);
        warn!(
            app_id = %self.app_id,
            error = %cause,
            "apollo connection failed; restoring from local cache"
        );

        let restored = match self.store.load_all(&self.app_id) {
            Ok(snapshots) => {
                let restored = snapshots.len();
                self.table.replace_all(snapshots);
                restored
            }
            Err(err) => {
                error!(
                    app_id = %self.app_id,
                    path = %self.store.dir().display(),
                    error = %err,
                    "failed to list apollo cache directory; keeping current configuration"
                );
                0
            }
        };
        self.telemetry.on_degraded(restored);
        CycleOutcome::Degraded { restored }
    }

    fn publish(&self, state: SyncState) {
        self.state.send_replace(state);
    }
}
