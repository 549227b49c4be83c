// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application revision bookkeeping.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{ApplicationRevision, RevisionStatus, WorkflowRunPhase};
use crate::persistence::{DataStore, DataStoreExt, Query, SortOrder};

/// Summary status of a revision for the phase of its workflow run.
///
/// Total: every phase not explicitly mapped, the empty one included, is
/// still running.
pub fn revision_status_for(phase: &WorkflowRunPhase) -> RevisionStatus {
    match phase {
        WorkflowRunPhase::Failed => RevisionStatus::Fail,
        WorkflowRunPhase::Succeeded => RevisionStatus::Complete,
        WorkflowRunPhase::Terminated => RevisionStatus::Terminated,
        _ => RevisionStatus::Running,
    }
}

/// Filter for listing revisions of one application.
#[derive(Debug, Clone, Default)]
pub struct RevisionFilter {
    pub status: Option<RevisionStatus>,
    pub workflow_name: Option<String>,
    pub env_name: Option<String>,
}

/// Read access to [`ApplicationRevision`] entities.
#[derive(Clone)]
pub struct RevisionTracker {
    store: Arc<dyn DataStore>,
}

impl RevisionTracker {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn get_revision(&self, app_primary_key: &str, version: &str) -> Result<ApplicationRevision> {
        self.store
            .find_entity(&ApplicationRevision::key(app_primary_key, version))
            .await?
            .ok_or(Error::ApplicationRevisionNotExist)
    }

    /// Revisions of an application, newest first, with the unpaged total.
    pub async fn list_revisions(
        &self,
        app_primary_key: &str,
        filter: &RevisionFilter,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<ApplicationRevision>, i64)> {
        let mut query = Query::new().with_index("appPrimaryKey", app_primary_key);
        if let Some(status) = filter.status {
            query = query.with_index("status", status.as_str());
        }
        if let Some(workflow) = &filter.workflow_name {
            query = query.with_index("workflowName", workflow.as_str());
        }
        if let Some(env) = &filter.env_name {
            query = query.with_index("envName", env.as_str());
        }
        let total = self.store.count_entities::<ApplicationRevision>(&query).await?;
        let query = query
            .sort_by("createTime", SortOrder::Descending)
            .page(page, page_size);
        let revisions = self.store.list_entities(&query).await?;
        Ok((revisions, total))
    }

    /// Newest complete revision of (app, workflow, env), if any.
    ///
    /// Revisions created at the same instant are ordered by version, highest
    /// first.
    pub async fn latest_complete_revision(
        &self,
        app_primary_key: &str,
        workflow_name: &str,
        env_name: &str,
    ) -> Result<Option<ApplicationRevision>> {
        let query = Query::new()
            .with_index("appPrimaryKey", app_primary_key)
            .with_index("status", RevisionStatus::Complete.as_str())
            .with_index("workflowName", workflow_name)
            .with_index("envName", env_name)
            .sort_by("createTime", SortOrder::Descending)
            .sort_by("version", SortOrder::Descending)
            .page(1, 1);
        let mut revisions: Vec<ApplicationRevision> = self.store.list_entities(&query).await?;
        Ok(revisions.pop())
    }
}
