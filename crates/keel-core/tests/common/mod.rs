// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for keel-core integration tests.
//!
//! Provides TestContext with a seeded store, an in-memory cluster and a
//! record manager wired to both.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;

use keel_core::cluster::{
    ANNOTATION_DEPLOY_VERSION, ANNOTATION_PUBLISH_VERSION, ApplicationObject, MockCluster,
    ObjectMeta, WorkflowStatus,
};
use keel_core::model::{
    ApplicationRevision, Env, EnvBinding, RevisionStatus, StepPhase, StepStatus, Workflow,
    WorkflowRecord, WorkflowStep, WorkflowStepBase, WorkflowStepStatus,
};
use keel_core::persistence::{DataStore, DataStoreExt, MemoryStore};
use keel_core::record::RecordManager;

pub const APP: &str = "shop";
pub const ENV: &str = "prod";
pub const NAMESPACE: &str = "shop-prod";
pub const WORKFLOW: &str = "deploy-prod";
/// Name of the Application object deployed for the app in ENV.
pub const DEPLOY_NAME: &str = "shop-live";

/// Store, cluster and record manager with an env, a binding and a workflow.
pub struct TestContext {
    pub store: Arc<dyn DataStore>,
    pub cluster: Arc<MockCluster>,
    pub manager: RecordManager,
    pub workflow: Workflow,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn DataStore>) -> Self {
        let cluster = Arc::new(MockCluster::new());
        let manager = RecordManager::new(store.clone(), cluster.clone());

        let mut env = Env {
            name: ENV.into(),
            namespace: NAMESPACE.into(),
            ..Default::default()
        };
        store.add_entity(&mut env).await.unwrap();
        let mut binding = EnvBinding {
            app_primary_key: APP.into(),
            name: ENV.into(),
            app_deploy_name: DEPLOY_NAME.into(),
            ..Default::default()
        };
        store.add_entity(&mut binding).await.unwrap();

        let mut workflow = workflow();
        store.add_entity(&mut workflow).await.unwrap();

        Self {
            store,
            cluster,
            manager,
            workflow,
        }
    }

    pub async fn add_revision(&self, version: &str, status: RevisionStatus, config: &ApplicationObject) {
        let mut revision = ApplicationRevision {
            app_primary_key: APP.into(),
            version: version.into(),
            revision_cr_name: format!("{}-{}", DEPLOY_NAME, version),
            status,
            apply_app_config: serde_json::to_string(config).unwrap(),
            workflow_name: WORKFLOW.into(),
            env_name: ENV.into(),
            ..Default::default()
        };
        self.store.add_entity(&mut revision).await.unwrap();
    }

    /// Create a record the way a deploy does.
    pub async fn create_record(&self, record: &str, version: &str) -> WorkflowRecord {
        let application = application(record, version, &["v-component"]);
        self.manager
            .create_workflow_record(APP, &application, &self.workflow)
            .await
            .unwrap()
            .record
    }

    pub async fn record(&self, name: &str) -> WorkflowRecord {
        self.store
            .get_entity(&WorkflowRecord::key(APP, name))
            .await
            .unwrap()
    }

    pub async fn find_record(&self, name: &str) -> Option<WorkflowRecord> {
        self.store
            .find_entity(&WorkflowRecord::key(APP, name))
            .await
            .unwrap()
    }

    pub async fn revision(&self, version: &str) -> ApplicationRevision {
        self.store
            .get_entity(&ApplicationRevision::key(APP, version))
            .await
            .unwrap()
    }

    /// Put the live Application on the cluster, running `record`.
    pub async fn deploy_live(&self, record: &str, version: &str, status: WorkflowStatus) -> ApplicationObject {
        let mut live = application(record, version, &["live-component"]);
        live.status.workflow = Some(WorkflowStatus {
            app_revision: record.to_string(),
            ..status
        });
        self.cluster.insert(&live).await.unwrap();
        live
    }
}

/// Workflow with a deploy step, a suspend gate and a grouped check.
pub fn workflow() -> Workflow {
    let mut group = WorkflowStep::new("verify", "step-group");
    group.sub_steps.push(WorkflowStepBase {
        name: "smoke".into(),
        step_type: "check".into(),
        alias: "Smoke test".into(),
        ..Default::default()
    });
    Workflow {
        name: WORKFLOW.into(),
        alias: "Deploy to prod".into(),
        app_primary_key: APP.into(),
        env_name: ENV.into(),
        default: true,
        steps: vec![
            WorkflowStep::new("deploy", "deploy"),
            WorkflowStep::new("approve", "suspend"),
            group,
        ],
        ..Default::default()
    }
}

/// Application object published as `record` for revision `version`.
pub fn application(record: &str, version: &str, components: &[&str]) -> ApplicationObject {
    let mut metadata = ObjectMeta::new(NAMESPACE, DEPLOY_NAME);
    metadata
        .annotations
        .insert(ANNOTATION_PUBLISH_VERSION.into(), record.into());
    metadata
        .annotations
        .insert(ANNOTATION_DEPLOY_VERSION.into(), version.into());
    let mut app = ApplicationObject {
        metadata,
        ..Default::default()
    };
    app.spec.components = components
        .iter()
        .map(|name| json!({"name": name, "type": "webservice"}))
        .collect();
    app.spec.policies = vec![json!({"name": format!("{}-topology", version), "type": "topology"})];
    app
}

pub fn step(name: &str, step_type: &str, phase: StepPhase) -> StepStatus {
    StepStatus {
        id: format!("id-{}", name),
        name: name.into(),
        step_type: step_type.into(),
        phase,
        ..Default::default()
    }
}

/// Live step tree of the workflow: deploy done, approval gate waiting.
pub fn suspended_steps() -> Vec<WorkflowStepStatus> {
    vec![
        WorkflowStepStatus {
            step: step("deploy", "deploy", StepPhase::Succeeded),
            sub_steps: vec![],
        },
        WorkflowStepStatus {
            step: step("approve", "suspend", StepPhase::Running),
            sub_steps: vec![],
        },
        WorkflowStepStatus {
            step: step("verify", "step-group", StepPhase::Running),
            sub_steps: vec![step("smoke", "check", StepPhase::Running)],
        },
    ]
}
