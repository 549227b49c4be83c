// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory cluster used by tests and local runs.
//!
//! Objects are kept as JSON values. Applies can be made to fail to exercise
//! compensation paths, and container logs can be seeded per pod. Apply
//! bodies are recorded as sent, since a real server-side apply only touches
//! the fields present in the body.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ClusterClient, ClusterError, ClusterObject, ResourceKind, merge_patch, object_key, to_object_value};

type ObjectKey = (String, String, String);

/// In-memory [`ClusterClient`].
#[derive(Clone, Default)]
pub struct MockCluster {
    objects: Arc<RwLock<HashMap<ObjectKey, Value>>>,
    logs: Arc<RwLock<HashMap<(String, String, String), String>>>,
    fail_applies: Arc<RwLock<bool>>,
    applied: Arc<RwLock<Vec<Value>>>,
}

fn key(kind: &ResourceKind, namespace: &str, name: &str) -> ObjectKey {
    (kind.kind.to_string(), namespace.to_string(), name.to_string())
}

fn has_labels(object: &Value, labels: &BTreeMap<String, String>) -> bool {
    labels
        .iter()
        .all(|(k, v)| object["metadata"]["labels"][k].as_str() == Some(v.as_str()))
}

fn stamp(object: &mut Value) {
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(
            "resourceVersion".into(),
            Value::String(Uuid::new_v4().to_string()),
        );
        metadata
            .entry("uid")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed object as-is, status included.
    pub async fn insert<T: ClusterObject>(&self, object: &T) -> Result<(), ClusterError> {
        let mut value = to_object_value(object)?;
        let (namespace, name) = object_key(&value)?;
        stamp(&mut value);
        self.objects
            .write()
            .await
            .insert(key(&T::KIND, &namespace, &name), value);
        Ok(())
    }

    /// Remove an object without going through the API.
    pub async fn remove(&self, kind: &ResourceKind, namespace: &str, name: &str) {
        self.objects
            .write()
            .await
            .remove(&key(kind, namespace, name));
    }

    /// Make every subsequent `apply` fail.
    pub async fn fail_applies(&self) {
        *self.fail_applies.write().await = true;
    }

    /// Bodies passed to `apply`, oldest first, as the client sent them.
    pub async fn applied(&self) -> Vec<Value> {
        self.applied.read().await.clone()
    }

    /// Seed the log returned for a pod container.
    pub async fn set_pod_log(&self, namespace: &str, pod: &str, container: &str, log: &str) {
        self.logs.write().await.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            log.to_string(),
        );
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, ClusterError> {
        Ok(self
            .objects
            .read()
            .await
            .get(&key(kind, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, ClusterError> {
        let objects = self.objects.read().await;
        let mut found: Vec<(&ObjectKey, &Value)> = objects
            .iter()
            .filter(|((k, ns, _), object)| {
                k == kind.kind && (namespace.is_empty() || ns == namespace) && has_labels(object, labels)
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));
        Ok(found.into_iter().map(|(_, object)| object.clone()).collect())
    }

    async fn create(&self, kind: &ResourceKind, mut object: Value) -> Result<Value, ClusterError> {
        let (namespace, name) = object_key(&object)?;
        let mut objects = self.objects.write().await;
        let k = key(kind, &namespace, &name);
        if objects.contains_key(&k) {
            return Err(ClusterError::already_exists(kind, &namespace, &name));
        }
        stamp(&mut object);
        objects.insert(k, object.clone());
        Ok(object)
    }

    async fn update(&self, kind: &ResourceKind, mut object: Value) -> Result<Value, ClusterError> {
        let (namespace, name) = object_key(&object)?;
        let mut objects = self.objects.write().await;
        let k = key(kind, &namespace, &name);
        let Some(existing) = objects.get(&k) else {
            return Err(ClusterError::not_found(kind, &namespace, &name));
        };
        if let Some(status) = existing.get("status")
            && let Some(map) = object.as_object_mut()
        {
            map.insert("status".into(), status.clone());
        }
        stamp(&mut object);
        objects.insert(k, object.clone());
        Ok(object)
    }

    async fn apply(&self, kind: &ResourceKind, mut object: Value) -> Result<Value, ClusterError> {
        if *self.fail_applies.read().await {
            return Err(ClusterError::Api("injected apply failure".into()));
        }
        self.applied.write().await.push(object.clone());
        let (namespace, name) = object_key(&object)?;
        let mut objects = self.objects.write().await;
        let k = key(kind, &namespace, &name);
        if let Some(status) = objects.get(&k).and_then(|existing| existing.get("status"))
            && let Some(map) = object.as_object_mut()
        {
            map.insert("status".into(), status.clone());
        }
        stamp(&mut object);
        objects.insert(k, object.clone());
        Ok(object)
    }

    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<Value, ClusterError> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&key(kind, namespace, name))
            .ok_or_else(|| ClusterError::not_found(kind, namespace, name))?;
        let status_patch = patch.get("status").cloned().unwrap_or(Value::Null);
        match object.as_object_mut() {
            Some(map) => {
                let status = map.entry("status").or_insert(Value::Null);
                merge_patch(status, &status_patch);
            }
            None => return Err(ClusterError::InvalidObject(format!("{}/{}", namespace, name))),
        }
        stamp(object);
        Ok(object.clone())
    }

    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.objects
            .write()
            .await
            .remove(&key(kind, namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found(kind, namespace, name))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError> {
        let logs = self.logs.read().await;
        let log = logs
            .get(&(namespace.to_string(), pod.to_string(), container.to_string()))
            .ok_or_else(|| ClusterError::not_found(&super::POD, namespace, pod))?;
        let lines: Vec<&str> = log.lines().collect();
        let skip = lines.len().saturating_sub(tail_lines.max(0) as usize);
        let mut tail = lines[skip..].join("\n");
        if !tail.is_empty() {
            tail.push('\n');
        }
        Ok(tail)
    }
}
