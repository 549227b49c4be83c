// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keel Core - Workflow Run-State Reconciliation
//!
//! This crate keeps the history of workflow runs of orchestrated
//! applications. Every deployment of an application through one of its
//! workflows is captured as a workflow record; the record follows the run on
//! the cluster until it finishes and then stays as an immutable snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           keel-apiserver                                 │
//! │              (configuration, cluster client, sync worker)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        keel-core (this crate)                            │
//! │  WorkflowService  RecordManager  RevisionTracker  PipelineService        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                                              │
//!           │ DataStore                                    │ ClusterClient
//!           ▼                                              ▼
//! ┌───────────────────────┐                    ┌─────────────────────────────┐
//! │  SQLite / PostgreSQL  │                    │  Application, Revision,     │
//! │  (records, revisions, │                    │  WorkflowRun, ConfigMap     │
//! │   workflows, ...)     │                    │  objects                    │
//! └───────────────────────┘                    └─────────────────────────────┘
//! ```
//!
//! # Record Lifecycle
//!
//! ```text
//!   create_workflow_record
//!            │
//!            ▼
//!     ┌─────────────┐  sync (live or revision snapshot)  ┌──────────────┐
//!     │  unfinished │───────────────────────────────────►│   finished   │
//!     └─────────────┘                                    └──────────────┘
//!            │                                                  ▲
//!            │ newer record created / app deleted               │
//!            └───────────────── terminated ─────────────────────┘
//! ```
//!
//! At most one record per application and workflow is unfinished once a
//! creation returns; creating a record terminates the others.
//!
//! ## Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_workflow_record` | Snapshot a new run and sweep older active records |
//! | `sync_workflow_records` | Reconcile every unfinished record with the cluster |
//! | `resume_record` | Release suspend gates of a suspended run |
//! | `terminate_record` | Stop a run, failing its running steps |
//! | `rollback_record` | Redeploy an earlier revision as a new run |
//!
//! ## Revision Status
//!
//! | Workflow phase | Revision status |
//! |----------------|-----------------|
//! | `failed` | `failure` |
//! | `succeeded` | `complete` |
//! | `terminated` | `terminated` |
//! | anything else | `running` |
//!
//! # Modules
//!
//! - [`cluster`]: Cluster client contract, typed objects and an in-memory cluster
//! - [`error`]: Error types with API error codes
//! - [`model`]: Persisted entities
//! - [`persistence`]: Entity store contract with memory, SQLite and PostgreSQL backends
//! - [`pipeline`]: Pipelines, their contexts and runs
//! - [`record`]: Workflow record manager
//! - [`revision`]: Application revision lookups and status mapping
//! - [`step_data`]: Step outputs, inputs and logs
//! - [`workflow`]: Workflow definition store

/// Cluster object client and typed objects.
pub mod cluster;

/// Error types with API error code mapping.
pub mod error;

/// Persisted entities.
pub mod model;

/// Entity stores.
pub mod persistence;

/// Pipelines and pipeline runs.
pub mod pipeline;

/// Workflow records: creation, sync, sweep and operator actions.
pub mod record;

/// Application revisions.
pub mod revision;

/// Step outputs, inputs and logs read from workflow contexts.
pub mod step_data;

/// Workflow definitions.
pub mod workflow;

pub use error::{Error, Result};
