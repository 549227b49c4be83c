// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline runs, backed by WorkflowRun objects in the project namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::context::ContextService;
use crate::cluster::{
    ClusterClient, ClusterClientExt, ClusterError, ConfigMap, LABEL_PIPELINE,
    LABEL_PIPELINE_CONTEXT, WORKFLOW_RUN, WorkflowRun, WorkflowRunSpec, WorkflowRunStatus,
    WorkflowSpec,
};
use crate::error::{Error, Result};
use crate::model::{ContextValue, Pipeline, Project, WorkflowRunPhase};
use crate::persistence::{DataStore, DataStoreExt};
use crate::record::steps::{merge_declared_steps, resume_suspend_steps, terminate_steps};
use crate::step_data::{
    LOG_SOURCE_RESOURCE, LogResource, StepBase, StepInputs, StepLog, StepOutputs,
    collect_step_inputs, collect_step_outputs, context_vars, log_config_for_step,
    read_resource_logs, read_source_logs,
};

/// Namespace the workflow engine runs in.
pub const WORKFLOW_ENGINE_NAMESPACE: &str = "vela-system";
const WORKFLOW_ENGINE_LABEL: &str = "app.kubernetes.io/name";
const WORKFLOW_ENGINE_NAME: &str = "vela-workflow";
const DATA_LOG_MARKER: &str = "cue logs";

/// A WorkflowRun as presented for its pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub pipeline_name: String,
    pub project: String,
    pub pipeline_run_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_values: Vec<ContextValue>,
    pub spec: WorkflowRunSpec,
    pub status: WorkflowRunStatus,
}

/// Summary row of a run listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunBriefing {
    pub pipeline_run_name: String,
    pub finished: bool,
    pub phase: WorkflowRunPhase,
    pub message: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_values: Vec<ContextValue>,
}

fn pipeline_labels(pipeline: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_PIPELINE.to_string(), pipeline.to_string())])
}

#[derive(Clone)]
pub struct PipelineRunService {
    store: Arc<dyn DataStore>,
    cluster: Arc<dyn ClusterClient>,
    http: reqwest::Client,
    contexts: ContextService,
}

impl PipelineRunService {
    pub fn new(store: Arc<dyn DataStore>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self::with_http_client(store, cluster, reqwest::Client::new())
    }

    pub fn with_http_client(
        store: Arc<dyn DataStore>,
        cluster: Arc<dyn ClusterClient>,
        http: reqwest::Client,
    ) -> Self {
        let contexts = ContextService::new(store.clone());
        Self {
            store,
            cluster,
            http,
            contexts,
        }
    }

    pub(crate) fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    /// Every WorkflowRun object of a pipeline.
    pub(crate) async fn list_workflow_runs(&self, project: &Project, pipeline: &str) -> Result<Vec<WorkflowRun>> {
        Ok(self
            .cluster
            .list_objects::<WorkflowRun>(&project.namespace(), &pipeline_labels(pipeline))
            .await?)
    }

    async fn workflow_run(&self, project: &Project, run_name: &str) -> Result<WorkflowRun> {
        let namespace = project.namespace();
        self.cluster
            .get_object::<WorkflowRun>(&namespace, run_name)
            .await?
            .ok_or_else(|| ClusterError::not_found(&WORKFLOW_RUN, &namespace, run_name).into())
    }

    /// Context a run was started with. A context deleted since then shows up
    /// without values.
    async fn run_context(&self, project: &Project, run: &WorkflowRun) -> Result<(String, Vec<ContextValue>)> {
        let Some(context_name) = run.metadata.labels.get(LABEL_PIPELINE_CONTEXT) else {
            return Ok(Default::default());
        };
        let pipeline = run
            .metadata
            .labels
            .get(LABEL_PIPELINE)
            .map(String::as_str)
            .unwrap_or_default();
        match self
            .contexts
            .get_context(&project.name, pipeline, context_name)
            .await
        {
            Ok(context) => Ok((context.name, context.values)),
            Err(Error::ContextNotExist) => Ok((context_name.clone(), Vec::new())),
            Err(e) => Err(e),
        }
    }

    /// Present a WorkflowRun as a pipeline run: declared steps that have not
    /// run yet are listed as Pending and the run's context is attached.
    pub(crate) async fn to_pipeline_run(&self, project: &Project, mut run: WorkflowRun) -> Result<PipelineRun> {
        if let Some(spec) = &run.spec.workflow_spec {
            merge_declared_steps(&mut run.status.steps, &spec.steps);
        }
        let (context_name, context_values) = self.run_context(project, &run).await?;
        Ok(PipelineRun {
            pipeline_name: run
                .metadata
                .labels
                .get(LABEL_PIPELINE)
                .cloned()
                .unwrap_or_default(),
            project: project.name.clone(),
            pipeline_run_name: run.metadata.name,
            context_name,
            context_values,
            spec: run.spec,
            status: run.status,
        })
    }

    /// Load a run. Its declared steps come from the pipeline's current
    /// definition when the run belongs to one.
    pub async fn get_pipeline_run(&self, project: &Project, run_name: &str) -> Result<PipelineRun> {
        let mut run = self.workflow_run(project, run_name).await?;
        if let Some(pipeline_name) = run.metadata.labels.get(LABEL_PIPELINE) {
            let pipeline: Pipeline = self
                .store
                .find_entity(&Pipeline::key(&project.name, pipeline_name))
                .await?
                .ok_or(Error::PipelineNotExist)?;
            run.spec.workflow_spec = Some(WorkflowSpec {
                steps: pipeline.spec.steps,
            });
        }
        self.to_pipeline_run(project, run).await
    }

    pub async fn list_pipeline_runs(&self, project: &Project, pipeline: &str) -> Result<Vec<PipelineRunBriefing>> {
        let runs = self.list_workflow_runs(project, pipeline).await?;
        let mut briefings = Vec::with_capacity(runs.len());
        for run in runs {
            let (context_name, context_values) = match self.run_context(project, &run).await {
                Ok(context) => context,
                Err(e) => {
                    warn!(error = %e, run = %run.metadata.name, "Failed to load run context");
                    Default::default()
                }
            };
            briefings.push(PipelineRunBriefing {
                pipeline_run_name: run.metadata.name,
                finished: run.status.finished,
                phase: run.status.phase,
                message: run.status.message,
                start_time: run.status.start_time,
                end_time: run.status.end_time,
                context_name,
                context_values,
            });
        }
        Ok(briefings)
    }

    /// Delete a run. A run that is already gone is not an error.
    pub async fn delete_pipeline_run(&self, project: &Project, run_name: &str) -> Result<()> {
        match self
            .cluster
            .delete_object::<WorkflowRun>(&project.namespace(), run_name)
            .await
        {
            Err(e) if !e.is_not_found() => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Delete every run of a pipeline.
    pub async fn clean_pipeline_runs(&self, project: &Project, pipeline: &str) -> Result<()> {
        let runs = self.list_workflow_runs(project, pipeline).await?;
        for run in &runs {
            self.delete_pipeline_run(project, &run.metadata.name).await?;
        }
        info!(pipeline = %pipeline, count = runs.len(), "Cleaned pipeline runs");
        Ok(())
    }

    fn check_run_not_finished(run: &WorkflowRun) -> Result<()> {
        if run.status.terminated || run.status.finished {
            return Err(Error::PipelineRunFinished);
        }
        Ok(())
    }

    async fn patch_run_status(&self, run: &WorkflowRun) -> Result<WorkflowRun> {
        Ok(self
            .cluster
            .patch_object_status::<WorkflowRun, _>(&run.metadata.namespace, &run.metadata.name, &run.status)
            .await?)
    }

    /// Terminate a run, failing its running steps with reason `Terminate`.
    #[instrument(skip(self, project), fields(project = %project.name))]
    pub async fn stop_pipeline_run(&self, project: &Project, run_name: &str) -> Result<()> {
        let mut run = self.workflow_run(project, run_name).await?;
        Self::check_run_not_finished(&run)?;
        terminate_steps(&mut run.status.steps);
        run.status.terminated = true;
        run.status.suspend = false;
        self.patch_run_status(&run).await?;
        info!("Stopped pipeline run");
        Ok(())
    }

    /// Release the suspend gates of a run.
    #[instrument(skip(self, project), fields(project = %project.name))]
    pub async fn resume_pipeline_run(&self, project: &Project, run_name: &str) -> Result<()> {
        let mut run = self.workflow_run(project, run_name).await?;
        Self::check_run_not_finished(&run)?;
        run.status.suspend = false;
        resume_suspend_steps(&mut run.status.steps);
        self.patch_run_status(&run).await?;
        info!("Resumed pipeline run");
        Ok(())
    }

    /// Workflow context of a run, if the engine created one.
    async fn run_context_data(&self, run: &PipelineRun) -> Result<Option<BTreeMap<String, String>>> {
        let Some(backend) = &run.status.context_backend else {
            return Ok(None);
        };
        let config_map = self
            .cluster
            .get_object::<ConfigMap>(&backend.namespace, &backend.name)
            .await?
            .ok_or_else(|| {
                Error::GetContextBackendData(format!(
                    "context backend {}/{} not found",
                    backend.namespace, backend.name
                ))
            })?;
        Ok(Some(config_map.data))
    }

    fn declared_steps(run: &PipelineRun) -> &[crate::model::WorkflowStep] {
        run.spec
            .workflow_spec
            .as_ref()
            .map(|spec| spec.steps.as_slice())
            .unwrap_or_default()
    }

    pub async fn get_pipeline_run_outputs(&self, run: &PipelineRun, step: Option<&str>) -> Result<Vec<StepOutputs>> {
        let Some(data) = self.run_context_data(run).await? else {
            return Ok(Vec::new());
        };
        let vars = context_vars(&data)?;
        Ok(collect_step_outputs(
            Self::declared_steps(run),
            &run.status.steps,
            &vars,
            step,
        ))
    }

    pub async fn get_pipeline_run_inputs(&self, run: &PipelineRun, step: Option<&str>) -> Result<Vec<StepInputs>> {
        let Some(data) = self.run_context_data(run).await? else {
            return Ok(Vec::new());
        };
        let vars = context_vars(&data)?;
        Ok(collect_step_inputs(
            Self::declared_steps(run),
            &run.status.steps,
            &vars,
            step,
        ))
    }

    /// Log of a top-level step.
    ///
    /// Steps whose log config sets `data` show the workflow engine's own log
    /// lines for the step; others read their configured source.
    pub async fn get_pipeline_run_log(&self, project: &Project, run: &PipelineRun, step: &str) -> Result<StepLog> {
        let Some(data) = self.run_context_data(run).await? else {
            return Ok(StepLog::default());
        };
        let step_base = run
            .status
            .steps
            .iter()
            .find(|s| s.step.name == step)
            .map(|s| StepBase::from(&s.step))
            .unwrap_or_default();
        let Some(config) = log_config_for_step(&data, step)? else {
            return Ok(StepLog {
                step: step_base,
                ..Default::default()
            });
        };

        let (log_source, log) = if config.data {
            let engine = LogResource {
                namespace: WORKFLOW_ENGINE_NAMESPACE.to_string(),
                label_selector: BTreeMap::from([(
                    WORKFLOW_ENGINE_LABEL.to_string(),
                    WORKFLOW_ENGINE_NAME.to_string(),
                )]),
                ..Default::default()
            };
            let filters = vec![
                format!("step_name=\"{}\"", step),
                format!("{}/{}", project.namespace(), run.pipeline_run_name),
                DATA_LOG_MARKER.to_string(),
            ];
            let log = read_resource_logs(self.cluster.as_ref(), &[engine], &filters).await?;
            (LOG_SOURCE_RESOURCE.to_string(), log)
        } else if let Some(source) = &config.source {
            read_source_logs(self.cluster.as_ref(), &self.http, source).await?
        } else {
            Default::default()
        };

        Ok(StepLog {
            log_source,
            step: step_base,
            log,
        })
    }
}
