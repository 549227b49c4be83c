// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes implementation of the cluster client.
//!
//! Objects are handled as [`DynamicObject`]s addressed through an
//! [`ApiResource`] built from the [`ResourceKind`] of the call, so one client
//! serves Applications, revisions, WorkflowRuns and ConfigMaps alike.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
    Patch, PatchParams, PostParams,
};
use serde_json::Value;
use tracing::{debug, instrument};

use keel_core::cluster::{ClusterClient, ClusterError, ResourceKind, object_key};

/// Cluster client backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Client from the in-cluster or kubeconfig environment.
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, field_manager))
    }

    fn api(&self, kind: &ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        if namespace.is_empty() {
            Api::default_namespaced_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        }
    }
}

pub(crate) fn api_resource(kind: &ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, kind.plural)
}

/// `k1=v1,k2=v2` selector matching every label.
pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn map_error(kind: &ResourceKind, namespace: &str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            ClusterError::not_found(kind, namespace, name)
        }
        kube::Error::Api(response) if response.code == 409 => {
            ClusterError::already_exists(kind, namespace, name)
        }
        other => ClusterError::Api(other.to_string()),
    }
}

fn to_dynamic(object: Value) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(object)?)
}

fn from_dynamic(object: DynamicObject) -> Result<Value, ClusterError> {
    Ok(serde_json::to_value(object)?)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    #[instrument(skip(self), fields(kind = kind.kind))]
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, ClusterError> {
        let object = self
            .api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error(kind, namespace, name, e))?;
        object.map(from_dynamic).transpose()
    }

    #[instrument(skip(self, labels), fields(kind = kind.kind))]
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, ClusterError> {
        let selector = label_selector(labels);
        let params = ListParams::default().labels(&selector);
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(kind, namespace, "", e))?;
        debug!(count = list.items.len(), selector = %selector, "Listed objects");
        list.items.into_iter().map(from_dynamic).collect()
    }

    #[instrument(skip(self, object), fields(kind = kind.kind))]
    async fn create(&self, kind: &ResourceKind, object: Value) -> Result<Value, ClusterError> {
        let (namespace, name) = object_key(&object)?;
        let created = self
            .api(kind, &namespace)
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(kind, &namespace, &name, e))?;
        from_dynamic(created)
    }

    #[instrument(skip(self, object), fields(kind = kind.kind))]
    async fn update(&self, kind: &ResourceKind, object: Value) -> Result<Value, ClusterError> {
        let (namespace, name) = object_key(&object)?;
        let updated = self
            .api(kind, &namespace)
            .replace(&name, &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(kind, &namespace, &name, e))?;
        from_dynamic(updated)
    }

    #[instrument(skip(self, object), fields(kind = kind.kind))]
    async fn apply(&self, kind: &ResourceKind, mut object: Value) -> Result<Value, ClusterError> {
        let (namespace, name) = object_key(&object)?;
        // Server-side apply rejects patches carrying a resourceVersion or status
        if let Some(map) = object.as_object_mut() {
            map.remove("status");
            if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.remove("resourceVersion");
                metadata.remove("managedFields");
            }
        }
        let params = PatchParams::apply(&self.field_manager).force();
        let applied = self
            .api(kind, &namespace)
            .patch(&name, &params, &Patch::Apply(&object))
            .await
            .map_err(|e| map_error(kind, &namespace, &name, e))?;
        from_dynamic(applied)
    }

    #[instrument(skip(self, patch), fields(kind = kind.kind))]
    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<Value, ClusterError> {
        let patched = self
            .api(kind, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(kind, namespace, name, e))?;
        from_dynamic(patched)
    }

    #[instrument(skip(self), fields(kind = kind.kind))]
    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(kind, namespace, name, e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        pods.logs(pod, &params)
            .await
            .map_err(|e| map_error(&keel_core::cluster::POD, namespace, pod, e))
    }
}
