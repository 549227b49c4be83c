// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed views of the cluster objects the control plane reads and writes.
//!
//! Only the fields the services use are modelled; everything else is
//! dropped on read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{APPLICATION, APPLICATION_REVISION, CONFIG_MAP, ClusterObject, POD, ResourceKind, WORKFLOW_RUN};
use crate::model::{WorkflowExecuteMode, WorkflowRunPhase, WorkflowStep, WorkflowStepStatus};

/// Publish version of a run; becomes the workflow record name.
pub const ANNOTATION_PUBLISH_VERSION: &str = "app.oam.dev/publishVersion";
/// Deploy version of a run; becomes the application revision version.
pub const ANNOTATION_DEPLOY_VERSION: &str = "app.oam.dev/deployVersion";

pub const LABEL_PIPELINE: &str = "pipeline.oam.dev/name";
pub const LABEL_PIPELINE_CONTEXT: &str = "pipeline.oam.dev/context";
pub const LABEL_SOURCE_OF_TRUTH: &str = "ux.oam.dev/source-of-truth";
pub const SOURCE_FROM_UX: &str = "from-UX";

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Annotation value, treating empty as absent.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Reference to another object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Workflow status block of an Application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Revision under execution; may carry a `name:version` colon form.
    #[serde(default)]
    pub app_revision: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub phase: WorkflowRunPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_backend: Option<ObjectReference>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowStatus {
    /// Revision with the first `:` replaced by `-`, the form record names use.
    pub fn normalized_revision(&self) -> String {
        self.app_revision.replacen(':', "-", 1)
    }

    /// Whether the workflow is actively executing.
    pub fn is_running(&self) -> bool {
        !self.suspend && !self.terminated && !self.finished
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationObjectSpec {
    #[serde(default)]
    pub components: Vec<Value>,
    #[serde(default)]
    pub policies: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationObjectStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowStatus>,
}

impl ApplicationObjectStatus {
    fn is_empty(&self) -> bool {
        self.workflow.is_none()
    }
}

/// The orchestrated Application object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationObjectSpec,
    #[serde(default, skip_serializing_if = "ApplicationObjectStatus::is_empty")]
    pub status: ApplicationObjectStatus,
}

impl ClusterObject for ApplicationObject {
    const KIND: ResourceKind = APPLICATION;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevisionSpec {
    #[serde(default)]
    pub application: ApplicationObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevisionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workflow_context: BTreeMap<String, String>,
}

/// Immutable snapshot of an Application kept by the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevisionObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationRevisionSpec,
    #[serde(default)]
    pub status: ApplicationRevisionStatus,
}

impl ClusterObject for ApplicationRevisionObject {
    const KIND: ResourceKind = APPLICATION_REVISION;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Inline workflow definition of a WorkflowRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WorkflowExecuteMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_spec: Option<WorkflowSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunStatus {
    #[serde(default)]
    pub mode: WorkflowExecuteMode,
    #[serde(default)]
    pub phase: WorkflowRunPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_backend: Option<ObjectReference>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// A standalone workflow execution, backing pipeline runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkflowRunSpec,
    #[serde(default)]
    pub status: WorkflowRunStatus,
}

impl ClusterObject for WorkflowRun {
    const KIND: ResourceKind = WORKFLOW_RUN;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Key/value blob; workflow contexts are stored in these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ClusterObject for ConfigMap {
    const KIND: ResourceKind = CONFIG_MAP;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// Pod, read only to locate containers for step logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

impl ClusterObject for Pod {
    const KIND: ResourceKind = POD;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
