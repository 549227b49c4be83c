// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of records with the cluster.
//!
//! Unfinished records follow the live Application while it still runs
//! their revision. Once the Application has moved on to a newer run, the
//! record is completed from the immutable ApplicationRevision object that
//! captured the end state of its run.

use std::collections::BTreeMap;

use tracing::{debug, error, info, instrument, warn};

use super::RecordManager;
use crate::cluster::{ApplicationObject, ApplicationRevisionObject, ClusterClientExt, ConfigMap};
use crate::error::{Error, Result};
use crate::model::{
    ApplicationRevision, EnvBinding, RevisionStatus, Workflow, WorkflowRecord,
    WorkflowRunPhase,
};
use crate::persistence::{DataStoreExt, Query};
use crate::revision::revision_status_for;

/// Where the workflow status of a sync comes from.
#[derive(Debug, Clone)]
pub enum StatusSource {
    /// The Application as it currently runs.
    Live(ApplicationObject),
    /// The Application rebuilt from an ApplicationRevision object.
    Snapshot {
        application: ApplicationObject,
        revision_cr_name: String,
        /// Workflow context captured with the revision.
        context: Option<BTreeMap<String, String>>,
    },
}

impl StatusSource {
    pub fn application(&self) -> &ApplicationObject {
        match self {
            StatusSource::Live(application) => application,
            StatusSource::Snapshot { application, .. } => application,
        }
    }

    fn context(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            StatusSource::Live(_) => None,
            StatusSource::Snapshot { context, .. } => context.as_ref(),
        }
    }

    /// Name of the object the status was read from.
    fn origin(&self) -> &str {
        match self {
            StatusSource::Live(application) => &application.metadata.name,
            StatusSource::Snapshot { revision_cr_name, .. } => revision_cr_name,
        }
    }
}

impl RecordManager {
    /// Reconcile every unfinished record.
    ///
    /// Records are handled one by one. A record that cannot be synced is
    /// logged and left for the next pass; only failing to list the records
    /// fails the pass.
    #[instrument(skip(self))]
    pub async fn sync_workflow_records(&self) -> Result<()> {
        let query = Query::new().with_index("finished", "false");
        let records: Vec<WorkflowRecord> = self.store.list_entities(&query).await?;
        debug!(count = records.len(), "Syncing unfinished workflow records");

        for record in records {
            if let Err(e) = self.sync_record(&record).await {
                error!(
                    error = %e,
                    app = %record.app_primary_key,
                    workflow = %record.workflow_name,
                    record = %record.name,
                    "Failed to sync workflow record"
                );
            }
        }
        Ok(())
    }

    async fn sync_record(&self, record: &WorkflowRecord) -> Result<()> {
        let workflow: Workflow = self
            .store
            .find_entity(&format!("{}-{}", record.app_primary_key, record.workflow_name))
            .await?
            .ok_or(Error::WorkflowNotExist)?;

        let binding = match self
            .store
            .find_entity::<EnvBinding>(&format!("{}-{}", record.app_primary_key, workflow.env_name))
            .await
        {
            Ok(binding) => binding,
            Err(e) => {
                error!(error = %e, app = %record.app_primary_key, env = %workflow.env_name, "Failed to get env binding");
                None
            }
        };
        let deploy_name = binding
            .as_ref()
            .map(EnvBinding::deploy_name)
            .unwrap_or(record.app_primary_key.as_str());

        let Some(application) = self
            .cluster
            .get_object::<ApplicationObject>(&record.namespace, deploy_name)
            .await?
        else {
            info!(record = %record.name, application = %deploy_name, "Application is gone, terminating record");
            return self
                .set_record_to_terminated(&record.app_primary_key, &record.name)
                .await;
        };

        let Some(status) = &application.status.workflow else {
            return Ok(());
        };
        if status.normalized_revision() == record.name {
            return self
                .sync_workflow_status(&record.app_primary_key, &record.name, StatusSource::Live(application))
                .await;
        }

        let Some(revision) = self
            .store
            .find_entity::<ApplicationRevision>(&ApplicationRevision::key(
                &record.app_primary_key,
                &record.revision_primary_key,
            ))
            .await?
        else {
            let mut failed = record.clone();
            failed.finished = true;
            failed.status = WorkflowRunPhase::Failed;
            warn!(record = %record.name, revision = %record.revision_primary_key, "Revision is gone, failing record");
            self.store.put_entity(&mut failed).await?;
            return Ok(());
        };

        let Some(snapshot) = self
            .cluster
            .get_object::<ApplicationRevisionObject>(&application.metadata.namespace, &revision.revision_cr_name)
            .await?
        else {
            info!(record = %record.name, revision = %revision.revision_cr_name, "Application revision is gone, terminating record");
            return self
                .set_record_to_terminated(&record.app_primary_key, &record.name)
                .await;
        };

        let ApplicationRevisionObject { spec, status, .. } = snapshot;
        let mut application = spec.application;
        if let Some(mut workflow_status) = status.workflow {
            if !workflow_status.finished {
                workflow_status.finished = true;
                workflow_status.terminated = true;
            }
            application.status.workflow = Some(workflow_status);
        }
        let context = Some(status.workflow_context).filter(|context| !context.is_empty());

        self.sync_workflow_status(
            &record.app_primary_key,
            &record.name,
            StatusSource::Snapshot {
                application,
                revision_cr_name: revision.revision_cr_name,
                context,
            },
        )
        .await
    }

    /// Copy a workflow status onto a record and its revision.
    ///
    /// A status that belongs to another run leaves both untouched. The
    /// record's step tree keeps its aliases; a record without steps adopts
    /// the live ones.
    pub async fn sync_workflow_status(
        &self,
        app_primary_key: &str,
        record_name: &str,
        source: StatusSource,
    ) -> Result<()> {
        let mut record: WorkflowRecord = self
            .store
            .find_entity(&WorkflowRecord::key(app_primary_key, record_name))
            .await?
            .ok_or(Error::WorkflowRecordNotExist)?;
        let mut revision = self
            .revisions
            .get_revision(app_primary_key, &record.revision_primary_key)
            .await?;

        if let Some(context) = source.context() {
            record.context_value = context.clone();
        }

        if let Some(status) = &source.application().status.workflow {
            if status.normalized_revision() != record.name {
                warn!(
                    application = %source.application().metadata.name,
                    record = %record.name,
                    revision = %status.app_revision,
                    "Application revision does not match the record, retrying next time"
                );
                return Ok(());
            }
            record.status = status.phase.clone();
            record.message = status.message.clone();
            record.mode = status.mode.clone();

            if let Some(backend) = &status.context_backend
                && source.context().is_none()
            {
                match self
                    .cluster
                    .get_object::<ConfigMap>(&backend.namespace, &backend.name)
                    .await
                {
                    Ok(Some(config_map)) => record.context_value = config_map.data,
                    Ok(None) => {
                        error!(
                            application = %source.application().metadata.name,
                            context = %backend.name,
                            "Context backend not found"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, application = %source.application().metadata.name, "Failed to load the context values");
                    }
                }
            }

            super::steps::overlay_live_steps(&mut record.steps, &status.steps);
            record.finished = status.finished;
            record.end_time = status.end_time;
            self.store.put_entity(&mut record).await?;

            revision.status = revision_status_for(&status.phase);
            self.store.put_entity(&mut revision).await?;
        }

        if record.finished {
            info!(
                application = %source.application().metadata.name,
                workflow = %record.workflow_name,
                record = %record.name,
                status = %record.status.as_str(),
                source = %source.origin(),
                "Synced workflow status"
            );
        }
        Ok(())
    }

    /// Force a record and its revision to Terminated.
    pub async fn set_record_to_terminated(&self, app_primary_key: &str, record_name: &str) -> Result<()> {
        let mut record: WorkflowRecord = self
            .store
            .find_entity(&WorkflowRecord::key(app_primary_key, record_name))
            .await?
            .ok_or(Error::WorkflowRecordNotExist)?;
        let mut revision = self
            .revisions
            .get_revision(app_primary_key, &record.revision_primary_key)
            .await?;

        record.status = WorkflowRunPhase::Terminated;
        record.finished = true;
        self.store.put_entity(&mut record).await?;

        revision.status = RevisionStatus::Terminated;
        self.store.put_entity(&mut revision).await?;
        Ok(())
    }
}
