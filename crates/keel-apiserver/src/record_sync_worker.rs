// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker reconciling unfinished workflow records.
//!
//! Every poll interval the worker runs one sync pass over all unfinished
//! records. A failed pass is logged and retried on the next tick; failures of
//! single records never abort the pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use keel_core::record::RecordManager;

/// Configuration for the record sync worker.
#[derive(Debug, Clone)]
pub struct RecordSyncWorkerConfig {
    /// How often to run a sync pass.
    pub poll_interval: Duration,
}

impl Default for RecordSyncWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Periodically syncs workflow records with the cluster.
pub struct RecordSyncWorker {
    manager: Arc<RecordManager>,
    config: RecordSyncWorkerConfig,
    shutdown: Arc<Notify>,
}

impl RecordSyncWorker {
    pub fn new(manager: Arc<RecordManager>, config: RecordSyncWorkerConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to trigger shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is notified.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Record sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Record sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    debug!("Running workflow record sync pass");
                    if let Err(e) = self.manager.sync_workflow_records().await {
                        error!(error = %e, "Failed to sync workflow records");
                    }
                }
            }
        }

        info!("Record sync worker stopped");
    }
}
