// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client service module facade.
//!
//! Wires the refresh controller, the application-facing client and the
//! per-configuration client registry.

pub(crate) mod client;
pub(crate) mod controller;
pub(crate) mod registry;
#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ApolloClient, ClientError};
pub use controller::{CycleOutcome, SyncController, SyncState};
pub use registry::ClientRegistry;
