// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store construction from configuration.

use std::sync::Arc;

use tracing::info;

use keel_core::persistence::{DataStore, PostgresStore, SqliteStore};

use crate::config::{Config, DatabaseKind};
use crate::error::Result;

/// Connect the store selected by the database URL and run its migrations.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn DataStore>> {
    let kind = config.database_kind()?;
    let store: Arc<dyn DataStore> = match kind {
        DatabaseKind::Postgres => Arc::new(
            PostgresStore::connect(&config.database_url, config.database_max_connections).await?,
        ),
        DatabaseKind::Sqlite => Arc::new(
            SqliteStore::connect(&config.database_url, config.database_max_connections).await?,
        ),
    };
    info!(backend = ?kind, "Connected to database");
    Ok(store)
}
