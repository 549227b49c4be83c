// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record creation, the single-active-record sweep, sync and the resume and
//! terminate operations, end to end over the in-memory store and cluster.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use keel_core::Error;
use keel_core::cluster::{
    APPLICATION, ApplicationObject, ApplicationRevisionObject, ClusterClient, ClusterClientExt,
    ConfigMap, ObjectMeta, ObjectReference, WorkflowStatus,
};
use keel_core::model::{
    RevisionStatus, StepPhase, WorkflowRecord, WorkflowRunPhase, WorkflowStepStatus,
};
use keel_core::persistence::{DataStoreExt, Query};

async fn unfinished_records(ctx: &TestContext) -> Vec<WorkflowRecord> {
    ctx.store
        .list_entities(&Query::new().with_index("finished", "false"))
        .await
        .unwrap()
}

async fn live(ctx: &TestContext) -> ApplicationObject {
    ctx.cluster
        .get_object(NAMESPACE, DEPLOY_NAME)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_new_record_mirrors_workflow_steps() {
    let ctx = TestContext::new().await;
    let record = ctx.create_record("r1", "v1").await;

    assert_eq!(record.status, WorkflowRunPhase::Initializing);
    assert!(!record.finished);
    assert_eq!(record.namespace, NAMESPACE);
    assert_eq!(record.revision_primary_key, "v1");
    assert_eq!(record.workflow_alias, "Deploy to prod");

    let names: Vec<_> = record.steps.iter().map(|s| s.step.name.as_str()).collect();
    assert_eq!(names, vec!["deploy", "approve", "verify"]);
    assert_eq!(record.steps[1].step.step_type, "suspend");
    let smoke = &record.steps[2].sub_steps[0];
    assert_eq!(smoke.name, "smoke");
    assert_eq!(smoke.alias, "Smoke test");
    assert!(
        record
            .steps
            .iter()
            .flat_map(|s| std::iter::once(&s.step).chain(s.sub_steps.iter()))
            .all(|s| s.phase == StepPhase::Pending)
    );
}

#[tokio::test]
async fn test_new_record_terminates_previous_run() {
    let ctx = TestContext::new().await;
    let config = application("r0", "v0", &[]);
    ctx.add_revision("v1", RevisionStatus::Running, &config).await;
    ctx.add_revision("v2", RevisionStatus::Running, &config).await;
    ctx.add_revision("v0", RevisionStatus::Complete, &config).await;

    ctx.create_record("r1", "v1").await;
    let mut r1 = ctx.record("r1").await;
    r1.steps[0].step.phase = StepPhase::Succeeded;
    r1.steps[2].step.phase = StepPhase::Running;
    r1.steps[2].sub_steps[0].phase = StepPhase::Running;
    ctx.store.put_entity(&mut r1).await.unwrap();

    ctx.create_record("r2", "v2").await;

    let r1 = ctx.record("r1").await;
    assert!(r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Terminated);
    assert_eq!(r1.steps[0].step.phase, StepPhase::Succeeded);
    assert_eq!(r1.steps[1].step.phase, StepPhase::Pending);
    assert_eq!(r1.steps[2].step.phase, StepPhase::Stopped);
    assert_eq!(r1.steps[2].sub_steps[0].phase, StepPhase::Stopped);

    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Terminated);
    assert_eq!(ctx.revision("v2").await.status, RevisionStatus::Running);
    assert_eq!(ctx.revision("v0").await.status, RevisionStatus::Complete);

    let open = unfinished_records(&ctx).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].name, "r2");
}

#[tokio::test]
async fn test_concurrent_creations_leave_one_active_record() {
    let ctx = TestContext::new().await;
    let manager = Arc::new(ctx.manager.clone());
    let workflow = Arc::new(ctx.workflow.clone());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move {
                let application = application(&format!("r{}", i), &format!("v{}", i), &[]);
                manager
                    .create_workflow_record(APP, &application, &workflow)
                    .await
                    .map(|created| created.record.name)
            })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;
    for result in results {
        assert!(result.unwrap().is_ok());
    }

    let open = unfinished_records(&ctx).await;
    assert_eq!(open.len(), 1);
    let (_, total) = ctx
        .manager
        .list_workflow_records(&ctx.workflow, 1, 20)
        .await
        .unwrap();
    assert_eq!(total, 8);
}

#[tokio::test]
async fn test_sync_terminates_record_of_deleted_application() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;

    ctx.manager.sync_workflow_records().await.unwrap();

    let r1 = ctx.record("r1").await;
    assert!(r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Terminated);
    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Terminated);
}

#[tokio::test]
async fn test_sync_follows_live_run_to_completion() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Init, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;

    let mut context = ConfigMap {
        metadata: ObjectMeta::new(NAMESPACE, "workflow-shop-live-context"),
        ..Default::default()
    };
    context.data.insert("vars".into(), r#"{"image":"shop:1.2"}"#.into());
    ctx.cluster.insert(&context).await.unwrap();

    ctx.deploy_live(
        "r1",
        "v1",
        WorkflowStatus {
            phase: WorkflowRunPhase::Suspending,
            mode: "StepByStep-DAG".into(),
            suspend: true,
            context_backend: Some(ObjectReference {
                name: "workflow-shop-live-context".into(),
                namespace: NAMESPACE.into(),
                ..Default::default()
            }),
            steps: suspended_steps(),
            ..Default::default()
        },
    )
    .await;

    ctx.manager.sync_workflow_records().await.unwrap();

    let r1 = ctx.record("r1").await;
    assert!(!r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Suspending);
    assert_eq!(r1.mode, "StepByStep-DAG");
    assert_eq!(r1.steps[1].step.phase, StepPhase::Running);
    assert_eq!(r1.steps[2].sub_steps[0].alias, "Smoke test");
    assert_eq!(r1.context_value["vars"], r#"{"image":"shop:1.2"}"#);
    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Running);

    let mut done = live(&ctx).await;
    let status = done.status.workflow.as_mut().unwrap();
    status.phase = WorkflowRunPhase::Succeeded;
    status.finished = true;
    status.suspend = false;
    status.end_time = Some(chrono::Utc::now());
    ctx.cluster.insert(&done).await.unwrap();

    ctx.manager.sync_workflow_records().await.unwrap();

    let r1 = ctx.record("r1").await;
    assert!(r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Succeeded);
    assert!(r1.end_time.is_some());
    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Complete);
    assert!(unfinished_records(&ctx).await.is_empty());
}

#[tokio::test]
async fn test_sync_completes_superseded_record_from_revision_snapshot() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;

    ctx.deploy_live(
        "r2",
        "v2",
        WorkflowStatus {
            phase: WorkflowRunPhase::Running,
            ..Default::default()
        },
    )
    .await;

    let mut snapshot = ApplicationRevisionObject {
        metadata: ObjectMeta::new(NAMESPACE, format!("{}-v1", DEPLOY_NAME)),
        ..Default::default()
    };
    snapshot.spec.application = application("r1", "v1", &[]);
    snapshot.status.workflow = Some(WorkflowStatus {
        app_revision: "r1".into(),
        phase: WorkflowRunPhase::Failed,
        steps: vec![WorkflowStepStatus {
            step: step("deploy", "deploy", StepPhase::Failed),
            sub_steps: vec![],
        }],
        ..Default::default()
    });
    snapshot.status.workflow_context = BTreeMap::from([("vars".to_string(), "{}".to_string())]);
    ctx.cluster.insert(&snapshot).await.unwrap();

    ctx.manager.sync_workflow_records().await.unwrap();

    let r1 = ctx.record("r1").await;
    assert!(r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Failed);
    assert_eq!(r1.steps[0].step.phase, StepPhase::Failed);
    assert_eq!(r1.context_value["vars"], "{}");
    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Fail);
}

#[tokio::test]
async fn test_sync_fails_superseded_record_without_revision() {
    let ctx = TestContext::new().await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live("r2", "v2", WorkflowStatus::default()).await;

    ctx.manager.sync_workflow_records().await.unwrap();

    let r1 = ctx.record("r1").await;
    assert!(r1.finished);
    assert_eq!(r1.status, WorkflowRunPhase::Failed);
}

#[tokio::test]
async fn test_sync_terminates_record_without_revision_snapshot() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live("r2", "v2", WorkflowStatus::default()).await;

    ctx.manager.sync_workflow_records().await.unwrap();

    assert_eq!(ctx.record("r1").await.status, WorkflowRunPhase::Terminated);
    assert_eq!(ctx.revision("v1").await.status, RevisionStatus::Terminated);
}

#[tokio::test]
async fn test_one_broken_record_does_not_block_the_pass() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;

    let mut orphan = WorkflowRecord {
        name: "o1".into(),
        namespace: NAMESPACE.into(),
        workflow_name: "removed-workflow".into(),
        app_primary_key: APP.into(),
        revision_primary_key: "v9".into(),
        ..Default::default()
    };
    ctx.store.add_entity(&mut orphan).await.unwrap();

    ctx.manager.sync_workflow_records().await.unwrap();

    assert!(ctx.record("r1").await.finished);
    assert!(!ctx.record("o1").await.finished);
}

#[tokio::test]
async fn test_resume_releases_only_suspend_gates() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live(
        "r1",
        "v1",
        WorkflowStatus {
            phase: WorkflowRunPhase::Suspending,
            suspend: true,
            steps: suspended_steps(),
            ..Default::default()
        },
    )
    .await;

    ctx.manager
        .resume_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap();

    let status = live(&ctx).await.status.workflow.unwrap();
    assert!(!status.suspend);
    assert_eq!(status.steps[0].step.phase, StepPhase::Succeeded);
    assert_eq!(status.steps[1].step.phase, StepPhase::Succeeded);
    assert_eq!(status.steps[2].step.phase, StepPhase::Running);
    assert_eq!(status.steps[2].sub_steps[0].phase, StepPhase::Running);

    let r1 = ctx.record("r1").await;
    assert_eq!(r1.steps[1].step.phase, StepPhase::Succeeded);
    assert_eq!(r1.steps[2].step.phase, StepPhase::Running);
}

#[tokio::test]
async fn test_terminate_cuts_steps_short() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;

    let mut steps = suspended_steps();
    let mut timed_out = step("notify", "notification", StepPhase::Failed);
    timed_out.reason = "Timeout".into();
    let mut errored = step("cleanup", "cleanup", StepPhase::Failed);
    errored.reason = "Execute".into();
    for s in [timed_out, errored] {
        steps.push(WorkflowStepStatus {
            step: s,
            sub_steps: vec![],
        });
    }
    ctx.deploy_live(
        "r1",
        "v1",
        WorkflowStatus {
            phase: WorkflowRunPhase::Suspending,
            suspend: true,
            steps,
            ..Default::default()
        },
    )
    .await;

    ctx.manager
        .terminate_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap();

    let status = live(&ctx).await.status.workflow.unwrap();
    assert!(status.terminated);
    assert!(!status.suspend);
    let by_name = |name: &str| {
        status
            .steps
            .iter()
            .find(|s| s.step.name == name)
            .unwrap()
            .clone()
    };
    assert_eq!(by_name("deploy").step.phase, StepPhase::Succeeded);
    assert!(by_name("deploy").step.reason.is_empty());
    assert_eq!(by_name("approve").step.phase, StepPhase::Failed);
    assert_eq!(by_name("approve").step.reason, "Terminate");
    assert_eq!(by_name("verify").sub_steps[0].phase, StepPhase::Failed);
    assert_eq!(by_name("verify").sub_steps[0].reason, "Terminate");
    assert_eq!(by_name("notify").step.reason, "Timeout");
    assert_eq!(by_name("cleanup").step.phase, StepPhase::Failed);
    assert_eq!(by_name("cleanup").step.reason, "Terminate");

    let r1 = ctx.record("r1").await;
    assert_eq!(r1.steps[1].step.phase, StepPhase::Failed);
    assert_eq!(r1.steps[1].step.reason, "Terminate");
}

/// Live status with a suspending gate and a phase this crate does not model.
fn status_with_foreign_phases() -> WorkflowStatus {
    serde_json::from_value(serde_json::json!({
        "phase": "suspending",
        "suspend": true,
        "steps": [
            {"id": "id-deploy", "name": "deploy", "type": "deploy", "phase": "running"},
            {"id": "id-approve", "name": "approve", "type": "suspend", "phase": "suspending"},
            {"id": "id-verify", "name": "verify", "type": "step-group", "phase": "waiting",
             "subSteps": [{"id": "id-smoke", "name": "smoke", "type": "check", "phase": "queued"}]}
        ]
    }))
    .unwrap()
}

async fn live_step_phases(ctx: &TestContext) -> Vec<serde_json::Value> {
    let raw = ctx
        .cluster
        .get(&APPLICATION, NAMESPACE, DEPLOY_NAME)
        .await
        .unwrap()
        .unwrap();
    raw["status"]["workflow"]["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["phase"].clone())
        .collect()
}

#[tokio::test]
async fn test_terminate_keeps_foreign_step_phases() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live("r1", "v1", status_with_foreign_phases()).await;

    ctx.manager
        .terminate_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap();

    assert_eq!(
        live_step_phases(&ctx).await,
        vec!["failed", "suspending", "waiting"]
    );
    let raw = ctx
        .cluster
        .get(&APPLICATION, NAMESPACE, DEPLOY_NAME)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw["status"]["workflow"]["phase"], "suspending");
    assert_eq!(
        raw["status"]["workflow"]["steps"][2]["subSteps"][0]["phase"],
        "queued"
    );

    let r1 = ctx.record("r1").await;
    assert_eq!(r1.steps[1].step.phase, StepPhase::Suspending);
    assert_eq!(r1.steps[2].step.phase, StepPhase::Other("waiting".into()));
    assert_eq!(r1.steps[2].sub_steps[0].phase, StepPhase::Other("queued".into()));
}

#[tokio::test]
async fn test_resume_keeps_foreign_step_phases() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live("r1", "v1", status_with_foreign_phases()).await;

    ctx.manager
        .resume_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap();

    assert_eq!(
        live_step_phases(&ctx).await,
        vec!["running", "suspending", "waiting"]
    );
    let r1 = ctx.record("r1").await;
    assert_eq!(r1.status, WorkflowRunPhase::Suspending);
    assert_eq!(r1.steps[2].step.phase, StepPhase::Other("waiting".into()));
}

#[tokio::test]
async fn test_operations_refuse_a_running_workflow() {
    let ctx = TestContext::new().await;
    ctx.add_revision("v1", RevisionStatus::Running, &application("r1", "v1", &[]))
        .await;
    ctx.create_record("r1", "v1").await;
    ctx.deploy_live(
        "r1",
        "v1",
        WorkflowStatus {
            phase: WorkflowRunPhase::Running,
            steps: suspended_steps(),
            ..Default::default()
        },
    )
    .await;

    let err = ctx
        .manager
        .resume_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkflowStillRunning));
    let err = ctx
        .manager
        .terminate_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkflowStillRunning));

    let status = live(&ctx).await.status.workflow.unwrap();
    assert!(!status.terminated);
}

#[tokio::test]
async fn test_operations_need_a_workflow_status() {
    let ctx = TestContext::new().await;
    ctx.cluster
        .insert(&application("r1", "v1", &[]))
        .await
        .unwrap();

    let err = ctx
        .manager
        .resume_record(APP, &ctx.workflow, "r1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoWorkflowStatus(name) if name == DEPLOY_NAME));
}

#[tokio::test]
async fn test_operations_need_env_and_binding() {
    let ctx = TestContext::new().await;
    let err = ctx
        .manager
        .check_record_running("other-app", ENV)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EnvBindingNotExist));

    let err = ctx
        .manager
        .check_record_running(APP, "staging")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EnvNotExist));

    let err = ctx.manager.check_record_running(APP, ENV).await.unwrap_err();
    assert!(err.is_not_found());
}
