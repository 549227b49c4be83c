// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Termination sweep keeping a single active record per workflow.

use tracing::warn;

use super::steps::stop_running_steps;
use crate::error::Result;
use crate::model::{ApplicationRevision, RevisionStatus, WorkflowRecord, WorkflowRunPhase};
use crate::persistence::{DataStore, DataStoreExt, Query};

/// Terminate every running revision of the application and every
/// unfinished record of the workflow, except `skip_revision` and
/// `skip_record`.
///
/// Without a workflow name the records of every workflow of the application
/// are swept. Running steps of swept records become Stopped. A row that
/// fails to save is logged and skipped; only listing failures are returned.
pub async fn reset_revisions_and_records(
    store: &dyn DataStore,
    app_primary_key: &str,
    workflow_name: Option<&str>,
    skip_revision: &str,
    skip_record: &str,
) -> Result<()> {
    let query = Query::new()
        .with_index("appPrimaryKey", app_primary_key)
        .with_index("status", RevisionStatus::Running.as_str());
    let revisions: Vec<ApplicationRevision> = store.list_entities(&query).await?;
    for mut revision in revisions {
        if revision.version == skip_revision {
            continue;
        }
        revision.status = RevisionStatus::Terminated;
        if let Err(e) = store.put_entity(&mut revision).await {
            warn!(
                error = %e,
                app = %app_primary_key,
                revision = %revision.version,
                "Failed to terminate running revision"
            );
        }
    }

    let mut query = Query::new()
        .with_index("appPrimaryKey", app_primary_key)
        .with_index("finished", "false");
    if let Some(workflow) = workflow_name {
        query = query.with_index("workflowName", workflow);
    }
    let records: Vec<WorkflowRecord> = store.list_entities(&query).await?;
    for mut record in records {
        if record.name == skip_record {
            continue;
        }
        record.status = WorkflowRunPhase::Terminated;
        record.finished = true;
        stop_running_steps(&mut record.steps);
        if let Err(e) = store.put_entity(&mut record).await {
            warn!(
                error = %e,
                app = %app_primary_key,
                workflow = %record.workflow_name,
                record = %record.name,
                "Failed to terminate unfinished record"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StepPhase, StepStatus, WorkflowStepStatus};
    use crate::persistence::{Entity, MemoryStore};

    fn record(name: &str, workflow: &str, finished: bool) -> WorkflowRecord {
        WorkflowRecord {
            name: name.into(),
            workflow_name: workflow.into(),
            app_primary_key: "shop".into(),
            finished,
            status: WorkflowRunPhase::Running,
            steps: vec![WorkflowStepStatus {
                step: StepStatus {
                    name: "deploy".into(),
                    phase: StepPhase::Running,
                    ..Default::default()
                },
                sub_steps: vec![StepStatus {
                    name: "check".into(),
                    phase: StepPhase::Succeeded,
                    ..Default::default()
                }],
            }],
            ..Default::default()
        }
    }

    fn revision(version: &str, status: RevisionStatus) -> ApplicationRevision {
        ApplicationRevision {
            app_primary_key: "shop".into(),
            version: version.into(),
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_terminates_all_but_skipped() {
        let store = MemoryStore::new();
        for mut r in [
            record("r1", "wf", false),
            record("r2", "wf", false),
            record("r0", "wf", true),
            record("o1", "other", false),
        ] {
            store.add_entity(&mut r).await.unwrap();
        }
        for mut rev in [
            revision("v1", RevisionStatus::Running),
            revision("v2", RevisionStatus::Running),
            revision("v0", RevisionStatus::Complete),
        ] {
            store.add_entity(&mut rev).await.unwrap();
        }

        reset_revisions_and_records(&store, "shop", Some("wf"), "v2", "r2")
            .await
            .unwrap();

        let r1: WorkflowRecord = store.get_entity(&WorkflowRecord::key("shop", "r1")).await.unwrap();
        assert!(r1.finished);
        assert_eq!(r1.status, WorkflowRunPhase::Terminated);
        assert_eq!(r1.steps[0].step.phase, StepPhase::Stopped);
        assert_eq!(r1.steps[0].sub_steps[0].phase, StepPhase::Succeeded);

        let r2: WorkflowRecord = store.get_entity(&WorkflowRecord::key("shop", "r2")).await.unwrap();
        assert!(!r2.finished);
        let o1: WorkflowRecord = store.get_entity(&WorkflowRecord::key("shop", "o1")).await.unwrap();
        assert!(!o1.finished);

        let v1: ApplicationRevision = store
            .get_entity(&ApplicationRevision::key("shop", "v1"))
            .await
            .unwrap();
        assert_eq!(v1.status, RevisionStatus::Terminated);
        let v2: ApplicationRevision = store
            .get_entity(&ApplicationRevision::key("shop", "v2"))
            .await
            .unwrap();
        assert_eq!(v2.status, RevisionStatus::Running);
        let v0: ApplicationRevision = store
            .get_entity(&ApplicationRevision::key("shop", "v0"))
            .await
            .unwrap();
        assert_eq!(v0.status, RevisionStatus::Complete);
    }

    #[tokio::test]
    async fn test_sweep_without_workflow_filter() {
        let store = MemoryStore::new();
        for mut r in [record("r1", "wf", false), record("o1", "other", false)] {
            store.add_entity(&mut r).await.unwrap();
        }
        reset_revisions_and_records(&store, "shop", None, "", "")
            .await
            .unwrap();
        let open: Vec<WorkflowRecord> = store
            .list_entities(&Query::new().with_index("finished", "false"))
            .await
            .unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_put_failures_are_swallowed() {
        let store = MemoryStore::new();
        let mut r1 = record("r1", "wf", false);
        store.add_entity(&mut r1).await.unwrap();
        store.fail_puts_on(WorkflowRecord::TABLE).await;

        reset_revisions_and_records(&store, "shop", Some("wf"), "v9", "r9")
            .await
            .unwrap();
        let r1: WorkflowRecord = store.get_entity(&WorkflowRecord::key("shop", "r1")).await.unwrap();
        assert!(!r1.finished);
    }
}
