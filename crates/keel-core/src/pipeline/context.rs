// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named key/value sets a pipeline can be run with.
//!
//! All contexts of a pipeline live in one [`PipelineContext`] entity.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{ContextValue, Pipeline, PipelineContext};
use crate::persistence::{DataStore, DataStoreExt};

/// One named context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub values: Vec<ContextValue>,
}

#[derive(Clone)]
pub struct ContextService {
    store: Arc<dyn DataStore>,
}

impl ContextService {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    async fn load(&self, project: &str, pipeline: &str) -> Result<Option<PipelineContext>> {
        Ok(self.store.find_entity(&Pipeline::key(project, pipeline)).await?)
    }

    /// Create the empty context set of a pipeline.
    pub async fn init_context(&self, project: &str, pipeline: &str) -> Result<PipelineContext> {
        if self.load(project, pipeline).await?.is_some() {
            return Err(Error::ContextAlreadyExist);
        }
        let mut contexts = PipelineContext {
            project_name: project.to_string(),
            pipeline_name: pipeline.to_string(),
            contexts: BTreeMap::new(),
            base: Default::default(),
        };
        self.store.add_entity(&mut contexts).await?;
        Ok(contexts)
    }

    pub async fn get_context(&self, project: &str, pipeline: &str, name: &str) -> Result<NamedContext> {
        let contexts = self
            .load(project, pipeline)
            .await?
            .ok_or(Error::ContextNotExist)?;
        let values = contexts
            .contexts
            .get(name)
            .cloned()
            .ok_or(Error::ContextNotExist)?;
        Ok(NamedContext {
            name: name.to_string(),
            values,
        })
    }

    /// Add a context, initializing the pipeline's set on first use.
    pub async fn create_context(
        &self,
        project: &str,
        pipeline: &str,
        context: NamedContext,
    ) -> Result<PipelineContext> {
        let mut contexts = match self.load(project, pipeline).await? {
            Some(contexts) => contexts,
            None => self.init_context(project, pipeline).await?,
        };
        if contexts.contexts.contains_key(&context.name) {
            warn!(context = %context.name, pipeline = %pipeline, "Context already exists");
            return Err(Error::ContextAlreadyExist);
        }
        contexts.contexts.insert(context.name, context.values);
        self.store.put_entity(&mut contexts).await?;
        Ok(contexts)
    }

    /// Replace the values of a context, creating it if needed.
    pub async fn update_context(
        &self,
        project: &str,
        pipeline: &str,
        context: NamedContext,
    ) -> Result<PipelineContext> {
        let mut contexts = self
            .load(project, pipeline)
            .await?
            .ok_or(Error::ContextNotExist)?;
        contexts.contexts.insert(context.name, context.values);
        self.store.put_entity(&mut contexts).await?;
        Ok(contexts)
    }

    /// Every context of a pipeline; none when the set was never created.
    pub async fn list_contexts(&self, project: &str, pipeline: &str) -> Result<BTreeMap<String, Vec<ContextValue>>> {
        Ok(self
            .load(project, pipeline)
            .await?
            .map(|contexts| contexts.contexts)
            .unwrap_or_default())
    }

    pub async fn delete_context(&self, project: &str, pipeline: &str, name: &str) -> Result<()> {
        let mut contexts = self
            .load(project, pipeline)
            .await?
            .ok_or(Error::ContextNotExist)?;
        contexts.contexts.remove(name);
        self.store.put_entity(&mut contexts).await?;
        Ok(())
    }

    /// Drop the whole context set of a pipeline. A missing set is not an
    /// error.
    pub async fn delete_all_contexts(&self, project: &str, pipeline: &str) -> Result<()> {
        match self
            .store
            .delete_entity::<PipelineContext>(&Pipeline::key(project, pipeline))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_exist() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
