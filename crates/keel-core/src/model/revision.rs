// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

use super::BaseModel;
use crate::persistence::{Entity, Index};

/// Summary status of a deployed revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    #[default]
    Init,
    Running,
    Complete,
    #[serde(rename = "failure")]
    Fail,
    Terminated,
    Rollback,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Init => "init",
            RevisionStatus::Running => "running",
            RevisionStatus::Complete => "complete",
            RevisionStatus::Fail => "failure",
            RevisionStatus::Terminated => "terminated",
            RevisionStatus::Rollback => "rollback",
        }
    }
}

/// Immutable configuration snapshot of one deploy, paired with the workflow
/// record whose `revision_primary_key` equals `version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevision {
    pub app_primary_key: String,
    pub version: String,
    /// Name of the ApplicationRevision object in the cluster.
    #[serde(default, rename = "revisionCRName")]
    pub revision_cr_name: String,
    #[serde(default)]
    pub status: RevisionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub deploy_user: String,
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub note: String,
    /// Serialized Application object as it was applied.
    #[serde(default)]
    pub apply_app_config: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rollback_version: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl ApplicationRevision {
    pub fn key(app_primary_key: &str, version: &str) -> String {
        format!("{}-{}", app_primary_key, version)
    }
}

impl Entity for ApplicationRevision {
    const TABLE: &'static str = "application_revision";

    fn primary_key(&self) -> String {
        Self::key(&self.app_primary_key, &self.version)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("appPrimaryKey".into(), self.app_primary_key.clone());
        index.insert("version".into(), self.version.clone());
        index.insert("status".into(), self.status.as_str().to_string());
        if !self.workflow_name.is_empty() {
            index.insert("workflowName".into(), self.workflow_name.clone());
        }
        if !self.env_name.is_empty() {
            index.insert("envName".into(), self.env_name.clone());
        }
        if !self.revision_cr_name.is_empty() {
            index.insert("revisionCRName".into(), self.revision_cr_name.clone());
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
