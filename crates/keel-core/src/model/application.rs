// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::BaseModel;
use crate::persistence::{Entity, Index};

/// Application as managed by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Entity for Application {
    const TABLE: &'static str = "application";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        if !self.project.is_empty() {
            index.insert("project".into(), self.project.clone());
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

/// Deployment environment. Resolves to one cluster namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Entity for Env {
    const TABLE: &'static str = "env";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        index.insert("namespace".into(), self.namespace.clone());
        if !self.project.is_empty() {
            index.insert("project".into(), self.project.clone());
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

/// Binding of an application to an environment.
///
/// `app_deploy_name` overrides the name of the deployed Application object;
/// an empty value means the object carries the application's own name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvBinding {
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub app_deploy_name: String,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl EnvBinding {
    /// Name of the Application object deployed for this binding.
    pub fn deploy_name(&self) -> &str {
        if self.app_deploy_name.is_empty() {
            &self.app_primary_key
        } else {
            &self.app_deploy_name
        }
    }
}

impl Entity for EnvBinding {
    const TABLE: &'static str = "envbinding";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("appPrimaryKey".into(), self.app_primary_key.clone());
        index.insert("name".into(), self.name.clone());
        index
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

/// Project owning pipelines. Pipeline runs live in the project namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(flatten)]
    pub base: BaseModel,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Namespace holding the project's pipeline runs.
    pub fn namespace(&self) -> String {
        if self.namespace.is_empty() {
            format!("project-{}", self.name)
        } else {
            self.namespace.clone()
        }
    }
}

impl Entity for Project {
    const TABLE: &'static str = "project";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> Index {
        let mut index = Index::new();
        index.insert("name".into(), self.name.clone());
        index
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}
