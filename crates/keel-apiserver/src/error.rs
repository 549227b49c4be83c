// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for keel-apiserver.

use thiserror::Error;

/// API server errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Store setup failed.
    #[error("Store error: {0}")]
    Store(#[from] keel_core::persistence::StoreError),

    /// Cluster client setup failed.
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// Domain operation failed.
    #[error(transparent)]
    Core(#[from] keel_core::Error),
}

/// Result type using the API server Error.
pub type Result<T> = std::result::Result<T, Error>;
