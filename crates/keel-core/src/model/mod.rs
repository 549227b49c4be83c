// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted domain entities.
//!
//! Every entity implements [`Entity`](crate::persistence::Entity) so it can be
//! stored through any [`DataStore`](crate::persistence::DataStore) backend.
//! Field names serialize in camelCase, matching the documents written by
//! earlier versions of the control plane.

mod application;
mod pipeline;
mod record;
mod revision;
mod workflow;

pub use application::{Application, Env, EnvBinding, Project};
pub use pipeline::{ContextValue, Pipeline, PipelineContext, PipelineSpec};
pub use record::{StepPhase, StepStatus, WorkflowRecord, WorkflowRunPhase, WorkflowStepStatus};
pub use revision::{ApplicationRevision, RevisionStatus};
pub use workflow::{
    StepInput, StepOutput, Workflow, WorkflowExecuteMode, WorkflowMode, WorkflowStep,
    WorkflowStepBase,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamps shared by all entities. Maintained by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModel {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
}

/// Render a boolean the way index values store it.
pub(crate) fn bool_index(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}
