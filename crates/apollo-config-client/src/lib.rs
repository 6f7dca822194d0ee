// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public entry points for the Apollo configuration client crate.
//!
//! The client keeps an in-memory table of namespace configurations fresh by
//! periodically re-fetching every namespace from the Apollo server, persists
//! each release to a local cache directory, and falls back to that cache when
//! the server cannot be reached.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod fetcher;
pub mod http;
pub mod notifier;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod telemetry;

pub use config::{detect_local_ip, ClientConfig, DEFAULT_CLUSTER, DEFAULT_NAMESPACE};
pub use fetcher::{FetchError, FetchOutcome, Release, RemoteFetcher};
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use notifier::{LongPollNotifier, NamespaceRegistry};
pub use service::{
    ApolloClient, ClientError, ClientRegistry, CycleOutcome, SyncController, SyncState,
};
pub use snapshot::ConfigurationSnapshot;
pub use store::{CacheRecord, LocalCacheStore, StoreError};
pub use table::ConfigTable;
pub use telemetry::{
    CountingTelemetry, NoopTelemetry, SyncTelemetry, TelemetryCounters, TelemetrySnapshot,
};
