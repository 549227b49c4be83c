// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipelines: user-facing workflows run on demand.
//!
//! A pipeline is stored as an entity of its project. Every run becomes a
//! WorkflowRun object in the project namespace, labeled with the pipeline
//! name and, when started with one, the name of its context.

pub mod context;
pub mod run;
pub mod stats;

pub use self::context::{ContextService, NamedContext};
pub use self::run::{PipelineRun, PipelineRunBriefing, PipelineRunService};
pub use self::stats::{PipelineInfo, RunStat, RunStatInfo};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument};

use crate::cluster::{
    ClusterClientExt, LABEL_PIPELINE, LABEL_PIPELINE_CONTEXT, LABEL_SOURCE_OF_TRUTH, ObjectMeta,
    SOURCE_FROM_UX, WorkflowRun, WorkflowRunSpec, WorkflowSpec,
};
use crate::error::{Error, Result};
use crate::model::{Pipeline, PipelineSpec, Project, WorkflowExecuteMode};
use crate::persistence::{DataStore, DataStoreExt, Query, StoreError};
use crate::record::generate_version;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePipelineRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePipelineRequest {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPipelineRequest {
    #[serde(default)]
    pub mode: WorkflowExecuteMode,
    /// Context to start the run with, if any.
    #[serde(default)]
    pub context_name: String,
}

/// A pipeline with its run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDetail {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<PipelineInfo>,
}

fn check_pipeline_spec(spec: &PipelineSpec) -> Result<()> {
    if spec.steps.is_empty() {
        return Err(Error::NoSteps);
    }
    Ok(())
}

#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn DataStore>,
    contexts: ContextService,
    runs: PipelineRunService,
}

impl PipelineService {
    pub fn new(store: Arc<dyn DataStore>, runs: PipelineRunService) -> Self {
        Self {
            contexts: ContextService::new(store.clone()),
            store,
            runs,
        }
    }

    pub fn contexts(&self) -> &ContextService {
        &self.contexts
    }

    pub fn runs(&self) -> &PipelineRunService {
        &self.runs
    }

    #[instrument(skip(self, project, request), fields(project = %project.name, pipeline = %request.name))]
    pub async fn create_pipeline(&self, project: &Project, request: CreatePipelineRequest) -> Result<Pipeline> {
        check_pipeline_spec(&request.spec)?;
        if request.name.is_empty() {
            return Err(Error::Validation("pipeline name is required".into()));
        }
        let mut pipeline = Pipeline {
            name: request.name,
            project: project.name.clone(),
            alias: request.alias,
            description: request.description,
            spec: request.spec,
            base: Default::default(),
        };
        match self.store.add_entity(&mut pipeline).await {
            Ok(()) => {}
            Err(StoreError::RecordExist { .. }) => return Err(Error::PipelineExist),
            Err(e) => return Err(e.into()),
        }
        info!("Created pipeline");
        Ok(pipeline)
    }

    /// Pipelines of the given projects whose name, alias or description
    /// contains `query`. With `detailed`, each carries its run statistics;
    /// a pipeline whose statistics cannot be read is left out.
    pub async fn list_pipelines(
        &self,
        projects: &[Project],
        query: &str,
        detailed: bool,
    ) -> Result<Vec<PipelineDetail>> {
        let by_name: HashMap<&str, &Project> = projects.iter().map(|p| (p.name.as_str(), p)).collect();
        let filter = Query::new().with_in(
            "project",
            projects.iter().map(|p| p.name.clone()).collect(),
        );
        let pipelines: Vec<Pipeline> = self.store.list_entities(&filter).await?;

        let mut details = Vec::new();
        for pipeline in pipelines {
            if !pipeline.fuzzy_match(query) {
                continue;
            }
            let info = match by_name.get(pipeline.project.as_str()) {
                Some(project) if detailed => match self.pipeline_info(project, &pipeline).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        error!(error = %e, pipeline = %pipeline.name, "Failed to get pipeline info");
                        continue;
                    }
                },
                _ => None,
            };
            details.push(PipelineDetail { pipeline, info });
        }
        Ok(details)
    }

    pub async fn get_pipeline(&self, project: &Project, name: &str) -> Result<Pipeline> {
        self.store
            .find_entity(&Pipeline::key(&project.name, name))
            .await?
            .ok_or(Error::PipelineNotExist)
    }

    /// A pipeline, with its run statistics when `with_info` is set.
    pub async fn get_pipeline_detail(&self, project: &Project, name: &str, with_info: bool) -> Result<PipelineDetail> {
        let pipeline = self.get_pipeline(project, name).await?;
        let info = if with_info {
            Some(self.pipeline_info(project, &pipeline).await?)
        } else {
            None
        };
        Ok(PipelineDetail { pipeline, info })
    }

    /// Run counters of a pipeline and its most recent run.
    pub async fn pipeline_info(&self, project: &Project, pipeline: &Pipeline) -> Result<PipelineInfo> {
        let runs = self.runs.list_workflow_runs(project, &pipeline.name).await?;
        let run_stat = stats::run_stat(&runs, Utc::now());
        let last_run = match stats::last_run(&runs) {
            Some(run) => Some(self.runs.to_pipeline_run(project, run.clone()).await?),
            None => None,
        };
        Ok(PipelineInfo { last_run, run_stat })
    }

    pub async fn update_pipeline(
        &self,
        project: &Project,
        name: &str,
        request: UpdatePipelineRequest,
    ) -> Result<Pipeline> {
        check_pipeline_spec(&request.spec)?;
        let mut pipeline = self.get_pipeline(project, name).await?;
        pipeline.spec = request.spec;
        pipeline.description = request.description;
        pipeline.alias = request.alias;
        self.store.put_entity(&mut pipeline).await?;
        Ok(pipeline)
    }

    /// Delete a pipeline with its runs and contexts.
    #[instrument(skip(self, project), fields(project = %project.name))]
    pub async fn delete_pipeline(&self, project: &Project, name: &str) -> Result<()> {
        let pipeline = self.get_pipeline(project, name).await?;
        self.runs.clean_pipeline_runs(project, &pipeline.name).await?;
        self.contexts
            .delete_all_contexts(&project.name, &pipeline.name)
            .await?;
        self.store
            .delete_entity::<Pipeline>(&Pipeline::key(&project.name, &pipeline.name))
            .await?;
        info!("Deleted pipeline");
        Ok(())
    }

    /// Start a run of the pipeline's current steps.
    ///
    /// The run is named after the pipeline and a timestamp. With a context,
    /// its values become the run's workflow context.
    #[instrument(skip(self, project, pipeline, request), fields(project = %project.name, pipeline = %pipeline.name))]
    pub async fn run_pipeline(
        &self,
        project: &Project,
        pipeline: &Pipeline,
        request: RunPipelineRequest,
    ) -> Result<PipelineRun> {
        let run_name = format!("{}-{}", pipeline.name, generate_version(""));
        let mut metadata = ObjectMeta::new(project.namespace(), run_name.clone());
        metadata
            .labels
            .insert(LABEL_PIPELINE.to_string(), pipeline.name.clone());
        metadata
            .labels
            .insert(LABEL_SOURCE_OF_TRUTH.to_string(), SOURCE_FROM_UX.to_string());

        let mut spec = WorkflowRunSpec {
            mode: Some(request.mode.with_defaults()),
            workflow_spec: Some(WorkflowSpec {
                steps: pipeline.spec.steps.clone(),
            }),
            ..Default::default()
        };
        if !request.context_name.is_empty() {
            let context = self
                .contexts
                .get_context(&project.name, &pipeline.name, &request.context_name)
                .await?;
            metadata
                .labels
                .insert(LABEL_PIPELINE_CONTEXT.to_string(), context.name.clone());
            let values: Map<String, Value> = context
                .values
                .into_iter()
                .map(|v| (v.key, Value::String(v.value)))
                .collect();
            spec.context = Some(Value::Object(values));
        }

        let run = WorkflowRun {
            metadata,
            spec,
            status: Default::default(),
        };
        self.runs.cluster().create_object(&run).await?;
        info!(run = %run_name, "Started pipeline run");
        self.runs.get_pipeline_run(project, &run_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockCluster, WorkflowRunStatus};
    use crate::model::{ContextValue, StepPhase, WorkflowMode, WorkflowRunPhase, WorkflowStep};
    use crate::persistence::MemoryStore;

    struct Fixture {
        service: PipelineService,
        cluster: Arc<MockCluster>,
        project: Project,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(MockCluster::new());
        let runs = PipelineRunService::new(store.clone(), cluster.clone());
        Fixture {
            service: PipelineService::new(store, runs),
            cluster,
            project: Project::new("team"),
        }
    }

    fn request(name: &str) -> CreatePipelineRequest {
        CreatePipelineRequest {
            name: name.into(),
            alias: format!("{} alias", name),
            description: "builds things".into(),
            spec: PipelineSpec {
                steps: vec![
                    WorkflowStep::new("build", "build"),
                    WorkflowStep::new("deploy", "deploy"),
                ],
                mode: None,
            },
        }
    }

    #[tokio::test]
    async fn test_create_requires_steps() {
        let f = fixture();
        let mut req = request("ci");
        req.spec.steps.clear();
        let err = f.service.create_pipeline(&f.project, req).await.unwrap_err();
        assert!(matches!(err, Error::NoSteps));
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let f = fixture();
        f.service.create_pipeline(&f.project, request("ci")).await.unwrap();
        let err = f
            .service
            .create_pipeline(&f.project, request("ci"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PipelineExist));
    }

    #[tokio::test]
    async fn test_list_filters_by_project_and_query() {
        let f = fixture();
        let other = Project::new("other");
        f.service.create_pipeline(&f.project, request("ci")).await.unwrap();
        f.service.create_pipeline(&f.project, request("nightly")).await.unwrap();
        f.service.create_pipeline(&other, request("ci")).await.unwrap();

        let all = f
            .service
            .list_pipelines(std::slice::from_ref(&f.project), "", false)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|d| d.info.is_none()));

        let matched = f
            .service
            .list_pipelines(&[f.project.clone(), other], "night", true)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].pipeline.name, "nightly");
        assert_eq!(matched[0].info.as_ref().unwrap().run_stat.total.total, 0);
    }

    #[tokio::test]
    async fn test_update_pipeline() {
        let f = fixture();
        f.service.create_pipeline(&f.project, request("ci")).await.unwrap();

        let err = f
            .service
            .update_pipeline(&f.project, "ci", UpdatePipelineRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSteps));

        let update = UpdatePipelineRequest {
            alias: "CI".into(),
            description: "".into(),
            spec: PipelineSpec {
                steps: vec![WorkflowStep::new("test", "test")],
                mode: None,
            },
        };
        let err = f
            .service
            .update_pipeline(&f.project, "missing", update.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PipelineNotExist));

        let updated = f.service.update_pipeline(&f.project, "ci", update).await.unwrap();
        assert_eq!(updated.alias, "CI");
        assert_eq!(updated.spec.steps.len(), 1);
        let loaded = f.service.get_pipeline(&f.project, "ci").await.unwrap();
        assert_eq!(loaded, updated);
    }

    #[tokio::test]
    async fn test_run_pipeline_with_context() {
        let f = fixture();
        let pipeline = f.service.create_pipeline(&f.project, request("ci")).await.unwrap();
        f.service
            .contexts()
            .create_context(
                "team",
                "ci",
                NamedContext {
                    name: "prod".into(),
                    values: vec![ContextValue {
                        key: "region".into(),
                        value: "eu".into(),
                    }],
                },
            )
            .await
            .unwrap();

        let run = f
            .service
            .run_pipeline(
                &f.project,
                &pipeline,
                RunPipelineRequest {
                    mode: WorkflowExecuteMode::default(),
                    context_name: "prod".into(),
                },
            )
            .await
            .unwrap();

        assert!(run.pipeline_run_name.starts_with("ci-"));
        assert_eq!(run.pipeline_name, "ci");
        assert_eq!(run.context_name, "prod");
        assert_eq!(run.context_values.len(), 1);
        assert_eq!(run.spec.context, Some(serde_json::json!({"region": "eu"})));
        let mode = run.spec.mode.clone().unwrap();
        assert_eq!(mode.steps, Some(WorkflowMode::StepByStep));
        assert_eq!(run.status.steps.len(), 2);
        assert!(run.status.steps.iter().all(|s| s.step.phase == StepPhase::Pending));

        let stored: WorkflowRun = f
            .cluster
            .get_object("project-team", &run.pipeline_run_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.metadata.labels[LABEL_SOURCE_OF_TRUTH], SOURCE_FROM_UX);
        assert_eq!(stored.metadata.labels[LABEL_PIPELINE_CONTEXT], "prod");
    }

    #[tokio::test]
    async fn test_run_pipeline_unknown_context() {
        let f = fixture();
        let pipeline = f.service.create_pipeline(&f.project, request("ci")).await.unwrap();
        let err = f
            .service
            .run_pipeline(
                &f.project,
                &pipeline,
                RunPipelineRequest {
                    context_name: "missing".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContextNotExist));
        assert!(f.service.runs().list_pipeline_runs(&f.project, "ci").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detail_and_delete() {
        let f = fixture();
        let pipeline = f.service.create_pipeline(&f.project, request("ci")).await.unwrap();
        let mut done = WorkflowRun {
            metadata: ObjectMeta::new("project-team", "ci-1"),
            status: WorkflowRunStatus {
                finished: true,
                phase: WorkflowRunPhase::Succeeded,
                start_time: Some(Utc::now()),
                ..Default::default()
            },
            ..Default::default()
        };
        done.metadata.labels.insert(LABEL_PIPELINE.into(), "ci".into());
        f.cluster.insert(&done).await.unwrap();

        let detail = f
            .service
            .get_pipeline_detail(&f.project, &pipeline.name, true)
            .await
            .unwrap();
        let info = detail.info.unwrap();
        assert_eq!(info.run_stat.total.success, 1);
        assert_eq!(info.last_run.unwrap().pipeline_run_name, "ci-1");

        f.service
            .contexts()
            .create_context("team", "ci", NamedContext::default())
            .await
            .unwrap();
        f.service.delete_pipeline(&f.project, "ci").await.unwrap();

        let err = f.service.get_pipeline(&f.project, "ci").await.unwrap_err();
        assert!(matches!(err, Error::PipelineNotExist));
        assert!(f.service.runs().list_pipeline_runs(&f.project, "ci").await.unwrap().is_empty());
        assert!(f.service.contexts().list_contexts("team", "ci").await.unwrap().is_empty());
        let err = f.service.delete_pipeline(&f.project, "ci").await.unwrap_err();
        assert!(matches!(err, Error::PipelineNotExist));
    }
}
