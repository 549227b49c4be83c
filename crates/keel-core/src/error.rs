// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for keel-core.
//!
//! Domain errors carry a stable [`Error::error_code`] that the API layer
//! maps onto its response bodies. Store and cluster failures are wrapped
//! unchanged so callers can still distinguish not-found conditions.

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::persistence::StoreError;

/// Result type using the keel-core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by keel-core services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The workflow does not exist for the application.
    #[error("workflow does not exist")]
    WorkflowNotExist,

    /// The application has no workflow marked as default.
    #[error("application has no default workflow")]
    WorkflowNoDefault,

    /// A workflow was created without an environment.
    #[error("workflow must be bound to an environment")]
    WorkflowNoEnv,

    /// The workflow record does not exist.
    #[error("workflow record does not exist")]
    WorkflowRecordNotExist,

    /// The application revision does not exist.
    #[error("application revision does not exist")]
    ApplicationRevisionNotExist,

    /// No complete revision is available to roll back to.
    #[error("application has no ready revision to roll back to")]
    ApplicationNoReadyRevision,

    /// The environment does not exist.
    #[error("environment does not exist")]
    EnvNotExist,

    /// The application is not bound to the environment.
    #[error("environment binding does not exist")]
    EnvBindingNotExist,

    /// The pipeline does not exist.
    #[error("pipeline does not exist")]
    PipelineNotExist,

    /// A pipeline with the same name already exists in the project.
    #[error("pipeline already exists")]
    PipelineExist,

    /// The pipeline run is already finished or terminated.
    #[error("pipeline run is already finished")]
    PipelineRunFinished,

    /// A pipeline was declared without any step.
    #[error("pipeline must contain at least one step")]
    NoSteps,

    /// The pipeline context does not exist.
    #[error("pipeline context does not exist")]
    ContextNotExist,

    /// The pipeline context set was already initialized.
    #[error("pipeline context already exists")]
    ContextAlreadyExist,

    /// The workflow context blob could not be decoded.
    #[error("failed to read data from the context backend: {0}")]
    GetContextBackendData(String),

    /// Reading a step log from its source failed.
    #[error("failed to read log from source: {0}")]
    ReadSourceLog(String),

    /// A required annotation is missing on the application object.
    #[error("application annotation {0} is missing or empty")]
    MissingAnnotation(&'static str),

    /// The live workflow is still running and cannot be operated on.
    #[error("workflow is still running, can not operate a running workflow")]
    WorkflowStillRunning,

    /// The live object carries no workflow status block.
    #[error("application {0} has no workflow status")]
    NoWorkflowStatus(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Entity store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Cluster API operation failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable code used by the API layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::WorkflowNotExist => "WORKFLOW_NOT_EXIST",
            Error::WorkflowNoDefault => "WORKFLOW_NO_DEFAULT",
            Error::WorkflowNoEnv => "WORKFLOW_NO_ENV",
            Error::WorkflowRecordNotExist => "WORKFLOW_RECORD_NOT_EXIST",
            Error::ApplicationRevisionNotExist => "APPLICATION_REVISION_NOT_EXIST",
            Error::ApplicationNoReadyRevision => "APPLICATION_NO_READY_REVISION",
            Error::EnvNotExist => "ENV_NOT_EXIST",
            Error::EnvBindingNotExist => "ENV_BINDING_NOT_EXIST",
            Error::PipelineNotExist => "PIPELINE_NOT_EXIST",
            Error::PipelineExist => "PIPELINE_EXIST",
            Error::PipelineRunFinished => "PIPELINE_RUN_FINISHED",
            Error::NoSteps => "NO_STEPS",
            Error::ContextNotExist => "CONTEXT_NOT_EXIST",
            Error::ContextAlreadyExist => "CONTEXT_ALREADY_EXIST",
            Error::GetContextBackendData(_) => "GET_CONTEXT_BACKEND_DATA",
            Error::ReadSourceLog(_) => "READ_SOURCE_LOG",
            Error::MissingAnnotation(_) => "MISSING_ANNOTATION",
            Error::WorkflowStillRunning => "WORKFLOW_STILL_RUNNING",
            Error::NoWorkflowStatus(_) => "NO_WORKFLOW_STATUS",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Store(StoreError::RecordNotExist { .. }) => "RECORD_NOT_EXIST",
            Error::Store(StoreError::RecordExist { .. }) => "RECORD_EXIST",
            Error::Store(_) => "STORE_ERROR",
            Error::Cluster(ClusterError::NotFound { .. }) => "RESOURCE_NOT_FOUND",
            Error::Cluster(_) => "CLUSTER_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether the error denotes a missing entity or object.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::WorkflowNotExist
                | Error::WorkflowRecordNotExist
                | Error::ApplicationRevisionNotExist
                | Error::EnvNotExist
                | Error::EnvBindingNotExist
                | Error::PipelineNotExist
                | Error::ContextNotExist
                | Error::Store(StoreError::RecordNotExist { .. })
                | Error::Cluster(ClusterError::NotFound { .. })
        )
    }
}
