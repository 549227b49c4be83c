// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BaseModel, WorkflowExecuteMode, WorkflowStep};
use crate::persistence::{Entity, Index};

/// Declared steps of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WorkflowExecuteMode>,
}

/// User-facing pipeline, executed as WorkflowRun objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: PipelineSpec,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Pipeline {
    pub fn key(project: &str, name: &str) -> String {
        format!("{}-{}", project, name)
    }

    /// Case-sensitive match on name, alias or description.
    pub fn fuzzy_match(&self, query: &str) -> bool {
        self.name.contains(query) || self.alias.contains(query) || self.description.contains(query)
    }
}

impl Entity for Pipeline {
    const TABLE: &'static str = "pipeline";

    fn primary_key(&self) -> String {
        Self::key(&self.project, &self.name)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        index.insert("project".into(), self.project.clone());
        index
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

/// One key/value pair of a pipeline context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextValue {
    pub key: String,
    pub value: String,
}

/// Named value sets a pipeline run can be started with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineContext {
    pub project_name: String,
    pub pipeline_name: String,
    #[serde(default)]
    pub contexts: BTreeMap<String, Vec<ContextValue>>,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Entity for PipelineContext {
    const TABLE: &'static str = "pipeline_context";

    fn primary_key(&self) -> String {
        Pipeline::key(&self.project_name, &self.pipeline_name)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("projectName".into(), self.project_name.clone());
        index.insert("pipelineName".into(), self.pipeline_name.clone());
        index
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}
