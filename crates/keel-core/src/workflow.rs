// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow definition store.
//!
//! Workflows are scoped by application; deleting one cascades to its
//! records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::{Error, Result};
use crate::model::{Workflow, WorkflowExecuteMode, WorkflowRecord, WorkflowStep};
use crate::persistence::{DataStore, DataStoreExt, Query};

/// Workflow creation or full replacement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub mode: WorkflowExecuteMode,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub env_name: String,
}

/// Partial update of an existing workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowRequest {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub mode: WorkflowExecuteMode,
    /// Left unchanged when absent.
    #[serde(default)]
    pub default: Option<bool>,
}

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn DataStore>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn list_application_workflows(&self, app_primary_key: &str) -> Result<Vec<Workflow>> {
        let query = Query::new().with_index("appPrimaryKey", app_primary_key);
        Ok(self.store.list_entities(&query).await?)
    }

    pub async fn get_workflow(&self, app_primary_key: &str, name: &str) -> Result<Workflow> {
        self.store
            .find_entity(&format!("{}-{}", app_primary_key, name))
            .await?
            .ok_or(Error::WorkflowNotExist)
    }

    /// First workflow flagged default. Several may carry the flag.
    pub async fn get_application_default_workflow(&self, app_primary_key: &str) -> Result<Workflow> {
        let query = Query::new()
            .with_index("appPrimaryKey", app_primary_key)
            .with_index("default", "true");
        let workflows: Vec<Workflow> = self.store.list_entities(&query).await?;
        workflows.into_iter().next().ok_or(Error::WorkflowNoDefault)
    }

    #[instrument(skip(self, request), fields(workflow = %request.name))]
    pub async fn create_or_update_workflow(
        &self,
        app_primary_key: &str,
        request: CreateWorkflowRequest,
    ) -> Result<Workflow> {
        if request.env_name.is_empty() {
            return Err(Error::WorkflowNoEnv);
        }
        if request.name.is_empty() {
            return Err(Error::Validation("workflow name is required".into()));
        }
        let mode = request.mode.with_defaults();

        match self.get_workflow(app_primary_key, &request.name).await {
            Ok(mut workflow) => {
                workflow.steps = request.steps;
                workflow.alias = request.alias;
                workflow.description = request.description;
                workflow.default = request.default;
                workflow.mode = mode;
                self.store.put_entity(&mut workflow).await?;
                Ok(workflow)
            }
            Err(Error::WorkflowNotExist) => {
                let mut workflow = Workflow {
                    name: request.name,
                    alias: request.alias,
                    description: request.description,
                    steps: request.steps,
                    mode,
                    default: request.default,
                    app_primary_key: app_primary_key.to_string(),
                    env_name: request.env_name,
                    base: Default::default(),
                };
                info!(app = %app_primary_key, "Creating workflow");
                self.store.add_entity(&mut workflow).await?;
                Ok(workflow)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_workflow(
        &self,
        mut workflow: Workflow,
        request: UpdateWorkflowRequest,
    ) -> Result<Workflow> {
        workflow.alias = request.alias;
        workflow.description = request.description;
        workflow.steps = request.steps;
        workflow.mode = request.mode.with_defaults();
        if let Some(default) = request.default {
            workflow.default = default;
        }
        self.store.put_entity(&mut workflow).await?;
        Ok(workflow)
    }

    /// Delete a workflow and every record of it.
    ///
    /// Record deletion is best-effort; only a missing workflow is an error.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, app_primary_key: &str, name: &str) -> Result<()> {
        let query = Query::new()
            .with_index("appPrimaryKey", app_primary_key)
            .with_index("workflowName", name);
        self.delete_records(&query).await;

        match self
            .store
            .delete_entity::<Workflow>(&format!("{}-{}", app_primary_key, name))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_exist() => Err(Error::WorkflowNotExist),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every workflow and record of an application.
    #[instrument(skip(self))]
    pub async fn delete_workflows_by_app(&self, app_primary_key: &str) -> Result<()> {
        for workflow in self.list_application_workflows(app_primary_key).await? {
            if let Err(e) = self
                .store
                .delete_entity::<Workflow>(&format!("{}-{}", app_primary_key, workflow.name))
                .await
            {
                error!(error = %e, workflow = %workflow.name, "Failed to delete workflow");
            }
        }
        self.delete_records(&Query::new().with_index("appPrimaryKey", app_primary_key))
            .await;
        Ok(())
    }

    pub async fn count_workflows(&self, app_primary_key: &str) -> Result<i64> {
        let query = Query::new().with_index("appPrimaryKey", app_primary_key);
        Ok(self.store.count_entities::<Workflow>(&query).await?)
    }

    async fn delete_records(&self, query: &Query) {
        let records: Vec<WorkflowRecord> = match self.store.list_entities(query).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to list workflow records");
                return;
            }
        };
        for record in records {
            let key = WorkflowRecord::key(&record.app_primary_key, &record.name);
            if let Err(e) = self.store.delete_entity::<WorkflowRecord>(&key).await {
                error!(error = %e, record = %key, "Failed to delete workflow record");
            }
        }
    }
}
