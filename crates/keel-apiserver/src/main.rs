// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keel API Server
//!
//! Connects the record store and the Kubernetes cluster, then keeps unfinished
//! workflow records in sync with their live runs until shut down.

use std::sync::Arc;
use tracing::{info, warn};

use keel_apiserver::config::Config;
use keel_apiserver::kube_client::KubeCluster;
use keel_apiserver::record_sync_worker::{RecordSyncWorker, RecordSyncWorkerConfig};
use keel_apiserver::store::connect_store;
use keel_core::record::RecordManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_apiserver=info,keel_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        record_sync_interval_secs = config.record_sync_interval.as_secs(),
        field_manager = %config.field_manager,
        "Starting Keel API server"
    );

    let store = connect_store(&config).await?;

    let cluster = Arc::new(KubeCluster::try_default(config.field_manager.clone()).await?);
    info!("Kubernetes client initialized");

    let manager = Arc::new(RecordManager::new(store, cluster));

    let worker = RecordSyncWorker::new(
        manager,
        RecordSyncWorkerConfig {
            poll_interval: config.record_sync_interval,
        },
    );
    let shutdown = worker.shutdown_handle();
    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.notify_one();
    worker_handle.await?;

    info!("Keel API server shut down");

    Ok(())
}
