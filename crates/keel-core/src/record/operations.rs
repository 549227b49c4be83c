// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator actions on a record's run: resume, terminate and rollback.
//!
//! Resume and terminate rewrite the workflow status of the live Application
//! with a merge patch on its status subresource, then sync the record from
//! the patched object. Concurrent patches are last-write-wins.

use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::steps::{resume_suspend_steps, terminate_steps};
use super::{RecordManager, StatusSource, generate_version};
use crate::cluster::{
    ANNOTATION_DEPLOY_VERSION, ANNOTATION_PUBLISH_VERSION, APPLICATION, ApplicationObject,
    ClusterClientExt, ClusterError, WorkflowStatus,
};
use crate::error::{Error, Result};
use crate::model::{Env, EnvBinding, RevisionStatus, Workflow, WorkflowRecord};
use crate::persistence::DataStoreExt;

impl RecordManager {
    /// Live Application of the app in `env_name`, provided its workflow is
    /// not actively executing.
    ///
    /// A workflow that is suspended, terminated or finished can be operated
    /// on; a running one fails with [`Error::WorkflowStillRunning`].
    pub async fn check_record_running(&self, app_primary_key: &str, env_name: &str) -> Result<ApplicationObject> {
        let application = self.deployed_application(app_primary_key, env_name).await?;
        if application
            .status
            .workflow
            .as_ref()
            .is_some_and(|status| status.is_running())
        {
            return Err(Error::WorkflowStillRunning);
        }
        Ok(application)
    }

    /// Resume a suspended run. Only running suspend gates are released.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name))]
    pub async fn resume_record(&self, app_primary_key: &str, workflow: &Workflow, record_name: &str) -> Result<()> {
        let application = self.check_record_running(app_primary_key, &workflow.env_name).await?;
        let mut status = application
            .status
            .workflow
            .clone()
            .ok_or_else(|| Error::NoWorkflowStatus(application.metadata.name.clone()))?;
        status.suspend = false;
        resume_suspend_steps(&mut status.steps);

        let patched = self.patch_workflow_status(&application, &status).await?;
        info!(record = %record_name, application = %application.metadata.name, "Resumed workflow");
        self.sync_workflow_status(app_primary_key, record_name, StatusSource::Live(patched))
            .await
    }

    /// Terminate a run, failing its running steps with reason `Terminate`.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name))]
    pub async fn terminate_record(&self, app_primary_key: &str, workflow: &Workflow, record_name: &str) -> Result<()> {
        let application = self.check_record_running(app_primary_key, &workflow.env_name).await?;
        let mut status = application
            .status
            .workflow
            .clone()
            .ok_or_else(|| Error::NoWorkflowStatus(application.metadata.name.clone()))?;
        status.terminated = true;
        status.suspend = false;
        terminate_steps(&mut status.steps);

        let patched = self.patch_workflow_status(&application, &status).await?;
        info!(record = %record_name, application = %application.metadata.name, "Terminated workflow");
        self.sync_workflow_status(app_primary_key, record_name, StatusSource::Live(patched))
            .await
    }

    /// Live Application of an app in an environment, honoring the binding's
    /// deploy name.
    async fn deployed_application(
        &self,
        app_primary_key: &str,
        env_name: &str,
    ) -> Result<ApplicationObject> {
        let env: Env = self
            .store
            .find_entity(env_name)
            .await?
            .ok_or(Error::EnvNotExist)?;
        let binding: EnvBinding = self
            .store
            .find_entity(&format!("{}-{}", app_primary_key, env_name))
            .await?
            .ok_or(Error::EnvBindingNotExist)?;
        let name = binding.deploy_name();
        self.cluster
            .get_object::<ApplicationObject>(&env.namespace, name)
            .await?
            .ok_or_else(|| ClusterError::not_found(&APPLICATION, &env.namespace, name).into())
    }

    async fn patch_workflow_status(
        &self,
        application: &ApplicationObject,
        status: &WorkflowStatus,
    ) -> Result<ApplicationObject> {
        Ok(self
            .cluster
            .patch_object_status::<ApplicationObject, _>(
                &application.metadata.namespace,
                &application.metadata.name,
                &json!({ "workflow": status }),
            )
            .await?)
    }

    /// Redeploy the configuration of an earlier revision as a new run.
    ///
    /// Without a version the newest complete revision of the workflow's
    /// environment is used. The record's revision is marked Rollback and a
    /// new record is created for the run. When applying the Application
    /// fails, the new record is deleted again; the Rollback mark stays.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name))]
    pub async fn rollback_record(
        &self,
        app_primary_key: &str,
        workflow: &Workflow,
        record_name: &str,
        version: Option<&str>,
    ) -> Result<WorkflowRecord> {
        let version = match version.filter(|v| !v.is_empty()) {
            Some(version) => version.to_string(),
            None => {
                let latest = self
                    .revisions
                    .latest_complete_revision(app_primary_key, &workflow.name, &workflow.env_name)
                    .await?
                    .ok_or(Error::ApplicationNoReadyRevision)?;
                info!(revision = %latest.version, "Selected latest complete revision");
                latest.version
            }
        };

        let record: WorkflowRecord = self
            .store
            .find_entity(&WorkflowRecord::key(app_primary_key, record_name))
            .await?
            .ok_or(Error::WorkflowRecordNotExist)?;
        let mut application = self.check_record_running(app_primary_key, &workflow.env_name).await?;

        let mut original = self
            .revisions
            .get_revision(app_primary_key, &record.revision_primary_key)
            .await?;
        let target = self.revisions.get_revision(app_primary_key, &version).await?;

        original.status = RevisionStatus::Rollback;
        original.rollback_version = version.clone();
        self.store.put_entity(&mut original).await?;

        let rollback_app: ApplicationObject = serde_json::from_str(&target.apply_app_config)?;
        application.spec.components = rollback_app.spec.components;
        application.spec.policies = rollback_app.spec.policies;

        let new_record_name = generate_version(&record.workflow_name);
        let annotations = &mut application.metadata.annotations;
        annotations.insert(ANNOTATION_DEPLOY_VERSION.to_string(), version.clone());
        annotations.insert(ANNOTATION_PUBLISH_VERSION.to_string(), new_record_name.clone());

        let created = self
            .create_workflow_record(app_primary_key, &application, workflow)
            .await?;
        if let Some(e) = &created.sweep_error {
            warn!(error = %e, record = %new_record_name, "Rollback continues after a failed sweep");
        }

        application.status = Default::default();
        if let Err(e) = self.cluster.apply_object(&application).await {
            if let Err(delete_error) = self
                .store
                .delete_entity::<WorkflowRecord>(&WorkflowRecord::key(app_primary_key, &new_record_name))
                .await
            {
                error!(error = %delete_error, record = %new_record_name, "Failed to delete record of failed rollback");
            }
            return Err(e.into());
        }

        info!(record = %new_record_name, revision = %version, "Rolled back application");
        Ok(created.record)
    }
}
