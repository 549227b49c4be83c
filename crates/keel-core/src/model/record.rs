// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{BaseModel, bool_index};
use crate::persistence::{Entity, Index};

/// Phase of a workflow run, as reported by the orchestrated object.
///
/// Phases this crate does not know are kept verbatim in `Other` so that a
/// status read from the cluster is written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum WorkflowRunPhase {
    Initializing,
    Running,
    Suspending,
    Succeeded,
    Failed,
    Terminated,
    Skipped,
    /// Empty phase of a run that has not started.
    #[default]
    Unknown,
    Other(String),
}

impl WorkflowRunPhase {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowRunPhase::Initializing => "initializing",
            WorkflowRunPhase::Running => "executing",
            WorkflowRunPhase::Suspending => "suspending",
            WorkflowRunPhase::Succeeded => "succeeded",
            WorkflowRunPhase::Failed => "failed",
            WorkflowRunPhase::Terminated => "terminated",
            WorkflowRunPhase::Skipped => "skipped",
            WorkflowRunPhase::Unknown => "",
            WorkflowRunPhase::Other(phase) => phase,
        }
    }
}

impl From<String> for WorkflowRunPhase {
    fn from(phase: String) -> Self {
        match phase.as_str() {
            "initializing" => WorkflowRunPhase::Initializing,
            "executing" => WorkflowRunPhase::Running,
            "suspending" => WorkflowRunPhase::Suspending,
            "succeeded" => WorkflowRunPhase::Succeeded,
            "failed" => WorkflowRunPhase::Failed,
            "terminated" => WorkflowRunPhase::Terminated,
            "skipped" => WorkflowRunPhase::Skipped,
            "" => WorkflowRunPhase::Unknown,
            _ => WorkflowRunPhase::Other(phase),
        }
    }
}

impl Serialize for WorkflowRunPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkflowRunPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Phase of a single step. Unknown phases are kept verbatim in `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum StepPhase {
    #[default]
    Pending,
    Running,
    Suspending,
    Succeeded,
    Failed,
    Skipped,
    /// Running step cut short by a newer record.
    Stopped,
    Other(String),
}

impl StepPhase {
    pub fn as_str(&self) -> &str {
        match self {
            StepPhase::Pending => "pending",
            StepPhase::Running => "running",
            StepPhase::Suspending => "suspending",
            StepPhase::Succeeded => "succeeded",
            StepPhase::Failed => "failed",
            StepPhase::Skipped => "skipped",
            StepPhase::Stopped => "stopped",
            StepPhase::Other(phase) => phase,
        }
    }
}

impl From<String> for StepPhase {
    fn from(phase: String) -> Self {
        match phase.as_str() {
            "pending" => StepPhase::Pending,
            "running" => StepPhase::Running,
            "suspending" => StepPhase::Suspending,
            "succeeded" => StepPhase::Succeeded,
            "failed" => StepPhase::Failed,
            "skipped" => StepPhase::Skipped,
            "stopped" => StepPhase::Stopped,
            _ => StepPhase::Other(phase),
        }
    }
}

impl Serialize for StepPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Status of one step or sub-step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_execute_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execute_time: Option<DateTime<Utc>>,
}

/// Status of a top-level step together with its sub-steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepStatus {
    #[serde(flatten)]
    pub step: StepStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<StepStatus>,
}

impl WorkflowStepStatus {
    /// Find a sub-step by name.
    pub fn sub_step(&self, name: &str) -> Option<&StepStatus> {
        self.sub_steps.iter().find(|s| s.name == name)
    }
}

/// Snapshot of one execution attempt of a workflow.
///
/// `name` is the publish version of the run, `revision_primary_key` its
/// deploy version. Records are keyed by (application, name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_alias: String,
    pub app_primary_key: String,
    #[serde(default)]
    pub revision_primary_key: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub status: WorkflowRunPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStepStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_value: BTreeMap<String, String>,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl WorkflowRecord {
    /// Primary key of a record, without loading it.
    pub fn key(app_primary_key: &str, name: &str) -> String {
        format!("{}-{}", app_primary_key, name)
    }

    /// Find a top-level step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStepStatus> {
        self.steps.iter().find(|s| s.step.name == name)
    }
}

impl Entity for WorkflowRecord {
    const TABLE: &'static str = "workflow_record";

    fn primary_key(&self) -> String {
        Self::key(&self.app_primary_key, &self.name)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        index.insert("appPrimaryKey".into(), self.app_primary_key.clone());
        index.insert("workflowName".into(), self.workflow_name.clone());
        index.insert("finished".into(), bool_index(self.finished));
        index.insert("status".into(), self.status.as_str().to_string());
        if !self.revision_primary_key.is_empty() {
            index.insert(
                "revisionPrimaryKey".into(),
                self.revision_primary_key.clone(),
            );
        }
        index
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_phase_wire_names() {
        assert_eq!(
            serde_json::to_value(WorkflowRunPhase::Running).unwrap(),
            "executing"
        );
        let phase: WorkflowRunPhase = serde_json::from_value("succeeded".into()).unwrap();
        assert_eq!(phase, WorkflowRunPhase::Succeeded);
        let phase: WorkflowRunPhase = serde_json::from_value("".into()).unwrap();
        assert_eq!(phase, WorkflowRunPhase::Unknown);
        let phase: WorkflowRunPhase = serde_json::from_value("paused".into()).unwrap();
        assert_eq!(phase, WorkflowRunPhase::Other("paused".into()));
        assert_eq!(serde_json::to_value(&phase).unwrap(), "paused");
    }

    #[test]
    fn test_step_phases_keep_wire_value() {
        let steps: Vec<StepStatus> = serde_json::from_value(serde_json::json!([
            {"name": "approve", "type": "suspend", "phase": "suspending"},
            {"name": "canary", "type": "apply", "phase": "waiting"},
            {"name": "empty", "type": "apply", "phase": ""}
        ]))
        .unwrap();
        assert_eq!(steps[0].phase, StepPhase::Suspending);
        assert_eq!(steps[1].phase, StepPhase::Other("waiting".into()));

        let value = serde_json::to_value(&steps).unwrap();
        assert_eq!(value[0]["phase"], "suspending");
        assert_eq!(value[1]["phase"], "waiting");
        assert_eq!(value[2]["phase"], "");
    }

    #[test]
    fn test_step_status_flattened_shape() {
        let status: WorkflowStepStatus = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "name": "deploy",
            "type": "deploy",
            "phase": "running",
            "subSteps": [{"name": "approve", "type": "suspend", "phase": "pending"}]
        }))
        .unwrap();
        assert_eq!(status.step.name, "deploy");
        assert_eq!(status.step.phase, StepPhase::Running);
        assert_eq!(status.sub_step("approve").unwrap().step_type, "suspend");
        assert!(status.sub_step("missing").is_none());
    }

    #[test]
    fn test_record_index_renders_finished_flag() {
        let record = WorkflowRecord {
            name: "wf-20240101".into(),
            workflow_name: "wf".into(),
            app_primary_key: "shop".into(),
            finished: true,
            status: WorkflowRunPhase::Terminated,
            ..Default::default()
        };
        let index = record.index();
        assert_eq!(index["finished"], "true");
        assert_eq!(index["status"], "terminated");
        assert_eq!(record.primary_key(), "shop-wf-20240101");
    }
}
