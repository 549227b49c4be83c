// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{BaseModel, bool_index};
use crate::persistence::{Entity, Index};

/// How a list of steps is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowMode {
    #[serde(rename = "StepByStep")]
    StepByStep,
    #[serde(rename = "DAG")]
    Dag,
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowMode::StepByStep => write!(f, "StepByStep"),
            WorkflowMode::Dag => write!(f, "DAG"),
        }
    }
}

/// Execution mode for top-level steps and for sub-steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecuteMode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<WorkflowMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_steps: Option<WorkflowMode>,
}

impl WorkflowExecuteMode {
    /// Fill unset modes: steps run one by one, sub-steps as a DAG.
    pub fn with_defaults(mut self) -> Self {
        self.steps.get_or_insert(WorkflowMode::StepByStep);
        self.sub_steps.get_or_insert(WorkflowMode::Dag);
        self
    }
}

impl fmt::Display for WorkflowExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = self.clone().with_defaults();
        match (mode.steps, mode.sub_steps) {
            (Some(steps), Some(sub_steps)) => write!(f, "{}-{}", steps, sub_steps),
            _ => Ok(()),
        }
    }
}

/// Value a step reads from the workflow context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    pub from: String,
    #[serde(default)]
    pub parameter_key: String,
}

/// Value a step exports into the workflow context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub name: String,
    #[serde(default)]
    pub value_from: String,
}

/// Fields shared by steps and sub-steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepBase {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StepOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// A declared step, possibly grouping sub-steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[serde(flatten)]
    pub base: WorkflowStepBase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<WorkflowStepBase>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            base: WorkflowStepBase {
                name: name.into(),
                step_type: step_type.into(),
                ..Default::default()
            },
            sub_steps: Vec::new(),
        }
    }
}

/// Ordered step pipeline bound to one application and one environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
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
    pub app_primary_key: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Workflow {
    /// Every declared step and sub-step, in declaration order.
    pub fn all_steps(&self) -> impl Iterator<Item = &WorkflowStepBase> {
        self.steps
            .iter()
            .flat_map(|step| std::iter::once(&step.base).chain(step.sub_steps.iter()))
    }
}

impl Entity for Workflow {
    const TABLE: &'static str = "workflow";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        index.insert("appPrimaryKey".into(), self.app_primary_key.clone());
        index.insert("default".into(), bool_index(self.default));
        if !self.env_name.is_empty() {
            index.insert("envName".into(), self.env_name.clone());
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
