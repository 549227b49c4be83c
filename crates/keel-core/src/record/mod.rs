// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow record manager.
//!
//! A [`WorkflowRecord`] is the control-plane view of one execution attempt of
//! a workflow. Records are created when an application is published, kept in
//! step with the live Application object by the sync pass ([`sync`]) and
//! operated on by resume, terminate and rollback ([`operations`]).
//!
//! At most one record per (application, workflow) is unfinished at a time.
//! Every creation sweeps the others to Terminated ([`sweep`]); within one
//! process, creation and sweep are serialized per (application, workflow).

pub mod operations;
pub mod steps;
pub mod sweep;
pub mod sync;

pub use self::sync::StatusSource;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::cluster::{ANNOTATION_DEPLOY_VERSION, ANNOTATION_PUBLISH_VERSION, ApplicationObject, ClusterClient};
use crate::error::{Error, Result};
use crate::model::{Workflow, WorkflowRecord, WorkflowRunPhase};
use crate::persistence::{DataStore, DataStoreExt, Query};
use crate::revision::RevisionTracker;
use crate::step_data::{
    StepBase, StepInputs, StepLog, StepOutputs, collect_step_inputs, collect_step_outputs,
    context_vars, log_config_for_step, read_source_logs,
};

/// Version string `{prefix}-{timestamp}`, or the bare timestamp without a
/// prefix. The timestamp has millisecond resolution.
pub fn generate_version(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
    if prefix.is_empty() {
        timestamp
    } else {
        format!("{}-{}", prefix, timestamp)
    }
}

/// Outcome of [`RecordManager::create_workflow_record`].
///
/// The record is persisted even when the sweep of older records fails; the
/// failure is reported next to it.
#[derive(Debug)]
pub struct RecordCreation {
    pub record: WorkflowRecord,
    pub sweep_error: Option<Error>,
}

/// A record with the deployment details of its revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDetail {
    #[serde(flatten)]
    pub record: WorkflowRecord,
    pub deploy_time: DateTime<Utc>,
    pub deploy_user: String,
    pub note: String,
    pub trigger_type: String,
}

/// Creates, reads and reconciles workflow records.
#[derive(Clone)]
pub struct RecordManager {
    store: Arc<dyn DataStore>,
    cluster: Arc<dyn ClusterClient>,
    http: reqwest::Client,
    revisions: RevisionTracker,
    creation_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RecordManager {
    pub fn new(store: Arc<dyn DataStore>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self::with_http_client(store, cluster, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client for URL log sources.
    pub fn with_http_client(
        store: Arc<dyn DataStore>,
        cluster: Arc<dyn ClusterClient>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            revisions: RevisionTracker::new(store.clone()),
            store,
            cluster,
            http,
            creation_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn revisions(&self) -> &RevisionTracker {
        &self.revisions
    }

    async fn creation_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Drop the caller's handle and forget the lock once nobody else holds it.
    async fn release_creation_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.creation_locks.lock().await;
        if locks.get(key).is_some_and(|held| Arc::strong_count(held) == 1) {
            locks.remove(key);
        }
    }

    /// Record a new run of `workflow` published on `application`.
    ///
    /// The application must carry the publish version (the record name) and
    /// the deploy version (the revision) annotations. Every other unfinished
    /// record of the workflow and every other running revision of the
    /// application is terminated afterwards.
    #[instrument(skip(self, application, workflow), fields(workflow = %workflow.name))]
    pub async fn create_workflow_record(
        &self,
        app_primary_key: &str,
        application: &ApplicationObject,
        workflow: &Workflow,
    ) -> Result<RecordCreation> {
        let publish_version = application
            .metadata
            .annotation(ANNOTATION_PUBLISH_VERSION)
            .ok_or(Error::MissingAnnotation(ANNOTATION_PUBLISH_VERSION))?;
        let deploy_version = application
            .metadata
            .annotation(ANNOTATION_DEPLOY_VERSION)
            .ok_or(Error::MissingAnnotation(ANNOTATION_DEPLOY_VERSION))?;

        let mut record = WorkflowRecord {
            name: publish_version.to_string(),
            namespace: application.metadata.namespace.clone(),
            workflow_name: workflow.name.clone(),
            workflow_alias: workflow.alias.clone(),
            app_primary_key: app_primary_key.to_string(),
            revision_primary_key: deploy_version.to_string(),
            start_time: Utc::now(),
            finished: false,
            status: WorkflowRunPhase::Initializing,
            steps: steps::pending_steps(&workflow.steps),
            ..Default::default()
        };

        let key = format!("{}/{}", app_primary_key, workflow.name);
        let lock = self.creation_lock(&key).await;
        let created = {
            let _guard = lock.lock().await;
            self.add_and_sweep(app_primary_key, &mut record, deploy_version).await
        };
        self.release_creation_lock(&key, lock).await;
        let sweep_error = created?;

        Ok(RecordCreation { record, sweep_error })
    }

    /// Store a new record and terminate the other active runs of its
    /// workflow. A failed sweep is returned, not raised.
    async fn add_and_sweep(
        &self,
        app_primary_key: &str,
        record: &mut WorkflowRecord,
        deploy_version: &str,
    ) -> Result<Option<Error>> {
        self.store.add_entity(record).await?;
        info!(record = %record.name, revision = %deploy_version, "Created workflow record");

        let sweep_error = sweep::reset_revisions_and_records(
            self.store.as_ref(),
            app_primary_key,
            Some(&record.workflow_name),
            deploy_version,
            &record.name,
        )
        .await
        .err();
        if let Some(e) = &sweep_error {
            error!(error = %e, record = %record.name, "Failed to terminate previous workflow records");
        }
        Ok(sweep_error)
    }

    /// One page of a workflow's records with the total count.
    pub async fn list_workflow_records(
        &self,
        workflow: &Workflow,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<WorkflowRecord>, i64)> {
        let query = Query::new()
            .with_index("appPrimaryKey", workflow.app_primary_key.as_str())
            .with_index("workflowName", workflow.name.as_str());
        let total = self.store.count_entities::<WorkflowRecord>(&query).await?;
        let records = self.store.list_entities(&query.page(page, page_size)).await?;
        Ok((records, total))
    }

    pub async fn get_workflow_record(&self, workflow: &Workflow, record_name: &str) -> Result<WorkflowRecord> {
        let query = Query::new()
            .with_index("appPrimaryKey", workflow.app_primary_key.as_str())
            .with_index("workflowName", workflow.name.as_str())
            .with_index("name", record_name);
        let mut records: Vec<WorkflowRecord> = self.store.list_entities(&query).await?;
        records.pop().ok_or(Error::WorkflowRecordNotExist)
    }

    /// A record of the workflow together with who deployed it and when.
    pub async fn detail_workflow_record(&self, workflow: &Workflow, record_name: &str) -> Result<RecordDetail> {
        let record = self.get_workflow_record(workflow, record_name).await?;
        let revision = self
            .revisions
            .get_revision(&record.app_primary_key, &record.revision_primary_key)
            .await?;
        Ok(RecordDetail {
            record,
            deploy_time: revision.base.create_time,
            deploy_user: revision.deploy_user,
            note: revision.note,
            trigger_type: revision.trigger_type,
        })
    }

    pub async fn delete_workflow_record(&self, app_primary_key: &str, record_name: &str) -> Result<()> {
        match self
            .store
            .delete_entity::<WorkflowRecord>(&WorkflowRecord::key(app_primary_key, record_name))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_exist() => Err(Error::WorkflowRecordNotExist),
            Err(e) => Err(e.into()),
        }
    }

    /// Outputs of the record's steps, or of one step when named.
    pub async fn get_record_outputs(
        &self,
        workflow: &Workflow,
        record: &WorkflowRecord,
        step: Option<&str>,
    ) -> Result<Vec<StepOutputs>> {
        if record.context_value.is_empty() {
            return Ok(Vec::new());
        }
        let vars = context_vars(&record.context_value).inspect_err(|e| {
            error!(error = %e, record = %record.name, "Failed to read record context");
        })?;
        Ok(collect_step_outputs(&workflow.steps, &record.steps, &vars, step))
    }

    /// Inputs of the record's steps, or of one step when named.
    pub async fn get_record_inputs(
        &self,
        workflow: &Workflow,
        record: &WorkflowRecord,
        step: Option<&str>,
    ) -> Result<Vec<StepInputs>> {
        if record.context_value.is_empty() {
            return Ok(Vec::new());
        }
        let vars = context_vars(&record.context_value).inspect_err(|e| {
            error!(error = %e, record = %record.name, "Failed to read record context");
        })?;
        Ok(collect_step_inputs(&workflow.steps, &record.steps, &vars, step))
    }

    /// Log of a top-level step, read from the source its log config names.
    pub async fn get_record_log(&self, record: &WorkflowRecord, step: &str) -> Result<StepLog> {
        if record.context_value.is_empty() {
            return Ok(StepLog::default());
        }
        let step_base = record
            .step(step)
            .map(|s| StepBase::from(&s.step))
            .unwrap_or_default();
        let Some(config) = log_config_for_step(&record.context_value, step)? else {
            return Ok(StepLog {
                step: step_base,
                ..Default::default()
            });
        };
        let (log_source, log) = match &config.source {
            Some(source) => read_source_logs(self.cluster.as_ref(), &self.http, source).await?,
            None => Default::default(),
        };
        Ok(StepLog {
            log_source,
            step: step_base,
            log,
        })
    }
}
