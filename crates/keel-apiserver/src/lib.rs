// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keel API Server
//!
//! Hosts the workflow record reconciliation of keel-core against a live
//! Kubernetes cluster:
//! - Configuration from environment variables
//! - Store selection (PostgreSQL or SQLite) by database URL
//! - Kubernetes cluster client for the core services
//! - Periodic workflow record sync

/// Server configuration.
pub mod config;

/// Server error types.
pub mod error;

/// Kubernetes implementation of the cluster client.
pub mod kube_client;

/// Background worker syncing unfinished workflow records.
pub mod record_sync_worker;

/// Store construction from configuration.
pub mod store;

pub use config::Config;
pub use error::Error;
