// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster object client.
//!
//! [`ClusterClient`] is the untyped contract a cluster backend implements:
//! objects travel as JSON values addressed by [`ResourceKind`], namespace and
//! name. Services work with the typed objects of [`objects`] through
//! [`ClusterClientExt`].
//!
//! Status updates use JSON merge patches (RFC 7386) on the status
//! subresource. Concurrent patches are last-write-wins.

pub mod mock;
pub mod objects;

pub use self::mock::MockCluster;
pub use self::objects::{
    ANNOTATION_DEPLOY_VERSION, ANNOTATION_PUBLISH_VERSION, ApplicationObject,
    ApplicationObjectSpec, ApplicationObjectStatus, ApplicationRevisionObject, ConfigMap,
    Container, LABEL_PIPELINE, LABEL_PIPELINE_CONTEXT, LABEL_SOURCE_OF_TRUTH, ObjectMeta,
    ObjectReference, Pod, PodSpec, SOURCE_FROM_UX, WorkflowRun, WorkflowRunSpec,
    WorkflowRunStatus, WorkflowSpec, WorkflowStatus,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Group, version and kind of a cluster resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ResourceKind {
    /// `apiVersion` field value.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

pub const APPLICATION: ResourceKind = ResourceKind {
    group: "core.oam.dev",
    version: "v1beta1",
    kind: "Application",
    plural: "applications",
};

pub const APPLICATION_REVISION: ResourceKind = ResourceKind {
    group: "core.oam.dev",
    version: "v1beta1",
    kind: "ApplicationRevision",
    plural: "applicationrevisions",
};

pub const WORKFLOW_RUN: ResourceKind = ResourceKind {
    group: "core.oam.dev",
    version: "v1alpha1",
    kind: "WorkflowRun",
    plural: "workflowruns",
};

pub const CONFIG_MAP: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "ConfigMap",
    plural: "configmaps",
};

pub const POD: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "Pod",
    plural: "pods",
};

/// Cluster client errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The object is malformed (missing name, wrong shape).
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Object (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other API failure.
    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn not_found(kind: &ResourceKind, namespace: &str, name: &str) -> Self {
        ClusterError::NotFound {
            kind: kind.kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &ResourceKind, namespace: &str, name: &str) -> Self {
        ClusterError::AlreadyExists {
            kind: kind.kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Untyped cluster API contract.
///
/// `create`, `update` and `apply` read namespace and name from the object's
/// metadata. `get` maps a missing object to `Ok(None)`; every other call
/// reports it as [`ClusterError::NotFound`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, ClusterError>;

    /// Objects of a namespace carrying every given label.
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, ClusterError>;

    async fn create(&self, kind: &ResourceKind, object: Value) -> Result<Value, ClusterError>;

    async fn update(&self, kind: &ResourceKind, object: Value) -> Result<Value, ClusterError>;

    /// Create the object or replace its spec and metadata.
    async fn apply(&self, kind: &ResourceKind, object: Value) -> Result<Value, ClusterError>;

    /// Merge-patch the status subresource.
    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<Value, ClusterError>;

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str)
    -> Result<(), ClusterError>;

    /// Last `tail_lines` lines of a container log.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError>;
}

/// A typed cluster object.
pub trait ClusterObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

/// Serialize an object with its `apiVersion` and `kind` set.
pub fn to_object_value<T: ClusterObject>(object: &T) -> Result<Value, ClusterError> {
    let mut value = serde_json::to_value(object)?;
    let map = value
        .as_object_mut()
        .ok_or_else(|| ClusterError::InvalidObject(format!("{} is not an object", T::KIND.kind)))?;
    map.insert("apiVersion".into(), Value::String(T::KIND.api_version()));
    map.insert("kind".into(), Value::String(T::KIND.kind.to_string()));
    Ok(value)
}

/// Namespace and name of an untyped object.
pub fn object_key(object: &Value) -> Result<(String, String), ClusterError> {
    let metadata = &object["metadata"];
    let name = metadata["name"]
        .as_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ClusterError::InvalidObject("metadata.name is required".into()))?;
    let namespace = metadata["namespace"].as_str().unwrap_or_default();
    Ok((namespace.to_string(), name.to_string()))
}

/// Apply a JSON merge patch (RFC 7386) to `target` in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Typed helpers over any [`ClusterClient`].
#[async_trait]
pub trait ClusterClientExt: ClusterClient {
    async fn get_object<T: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<T>, ClusterError> {
        match self.get(&T::KIND, namespace, name).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn list_objects<T: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<T>, ClusterError> {
        self.list(&T::KIND, namespace, labels)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(ClusterError::from))
            .collect()
    }

    async fn create_object<T: ClusterObject>(&self, object: &T) -> Result<T, ClusterError> {
        let created = self.create(&T::KIND, to_object_value(object)?).await?;
        Ok(serde_json::from_value(created)?)
    }

    async fn update_object<T: ClusterObject>(&self, object: &T) -> Result<T, ClusterError> {
        let updated = self.update(&T::KIND, to_object_value(object)?).await?;
        Ok(serde_json::from_value(updated)?)
    }

    async fn apply_object<T: ClusterObject>(&self, object: &T) -> Result<T, ClusterError> {
        let applied = self.apply(&T::KIND, to_object_value(object)?).await?;
        Ok(serde_json::from_value(applied)?)
    }

    /// Merge-patch the status of an object with `{"status": status}`.
    async fn patch_object_status<T: ClusterObject, S: Serialize + Sync>(
        &self,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> Result<T, ClusterError> {
        let patch = serde_json::json!({ "status": status });
        let patched = self.patch_status(&T::KIND, namespace, name, patch).await?;
        Ok(serde_json::from_value(patched)?)
    }

    async fn delete_object<T: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.delete(&T::KIND, namespace, name).await
    }
}

impl<C: ClusterClient + ?Sized> ClusterClientExt for C {}
