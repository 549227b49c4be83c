// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory entity store.
//!
//! Used by tests and by single-process setups that do not need durability.
//! Writes can be made to fail per table to exercise best-effort paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DataStore, Document, Query, StoreError, query};

type Tables = HashMap<String, BTreeMap<String, Document>>;

/// In-memory [`DataStore`] backed by a map per table.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    failing_put_tables: Arc<RwLock<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` on `table` fail with a database error.
    pub async fn fail_puts_on(&self, table: &str) {
        self.failing_put_tables
            .write()
            .await
            .insert(table.to_string());
    }

    /// Number of documents stored in a table.
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn add(&self, document: Document) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(document.table.clone()).or_default();
        if table.contains_key(&document.primary_key) {
            return Err(StoreError::exist(&document.table, &document.primary_key));
        }
        table.insert(document.primary_key.clone(), document);
        Ok(())
    }

    async fn put(&self, mut document: Document) -> Result<(), StoreError> {
        if self
            .failing_put_tables
            .read()
            .await
            .contains(&document.table)
        {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "injected put failure on {}",
                document.table
            ))));
        }

        let mut tables = self.tables.write().await;
        let table = tables.entry(document.table.clone()).or_default();
        if let Some(existing) = table.get(&document.primary_key) {
            document.create_time = existing.create_time;
        }
        table.insert(document.primary_key.clone(), document);
        Ok(())
    }

    async fn get(&self, table: &str, primary_key: &str) -> Result<Document, StoreError> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(primary_key))
            .cloned()
            .ok_or_else(|| StoreError::not_exist(table, primary_key))
    }

    async fn delete(&self, table: &str, primary_key: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .get_mut(table)
            .and_then(|rows| rows.remove(primary_key))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_exist(table, primary_key))
    }

    async fn list(&self, table: &str, q: &Query) -> Result<Vec<Document>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables.get(table).into_iter().flat_map(|rows| rows.values().cloned());
        Ok(query::apply(rows, q))
    }

    async fn count(&self, table: &str, q: &Query) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|rows| query::count(rows.values(), q))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Application, Env};
    use crate::persistence::{DataStoreExt, Query};

    #[tokio::test]
    async fn test_add_get_delete() {
        let store = MemoryStore::new();
        let mut app = Application::new("shop");
        store.add_entity(&mut app).await.unwrap();

        let err = store.add_entity(&mut app).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordExist { .. }));

        let loaded: Application = store.get_entity("shop").await.unwrap();
        assert_eq!(loaded.name, "shop");
        assert_eq!(loaded.base.create_time, app.base.create_time);

        store.delete_entity::<Application>("shop").await.unwrap();
        let err = store.get_entity::<Application>("shop").await.unwrap_err();
        assert!(err.is_not_exist());
        assert!(store.find_entity::<Application>("shop").await.unwrap().is_none());

        let err = store.delete_entity::<Application>("shop").await.unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn test_put_is_upsert_and_keeps_create_time() {
        let store = MemoryStore::new();
        let mut env = Env {
            name: "prod".into(),
            namespace: "prod-ns".into(),
            ..Default::default()
        };
        store.put_entity(&mut env).await.unwrap();
        let created = store.get_entity::<Env>("prod").await.unwrap().base.create_time;

        let mut changed = Env {
            namespace: "other-ns".into(),
            ..env.clone()
        };
        changed.base = Default::default();
        store.put_entity(&mut changed).await.unwrap();

        let loaded: Env = store.get_entity("prod").await.unwrap();
        assert_eq!(loaded.namespace, "other-ns");
        assert_eq!(loaded.base.create_time, created);
        assert_eq!(store.len("env").await, 1);
    }

    #[tokio::test]
    async fn test_list_and_count_by_index() {
        let store = MemoryStore::new();
        for (name, project) in [("a", "red"), ("b", "blue"), ("c", "red")] {
            let mut app = Application {
                project: project.into(),
                ..Application::new(name)
            };
            store.add_entity(&mut app).await.unwrap();
        }

        let query = Query::new().with_index("project", "red");
        let apps: Vec<Application> = store.list_entities(&query).await.unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(store.count_entities::<Application>(&query).await.unwrap(), 2);
        assert_eq!(
            store
                .count_entities::<Application>(&Query::new())
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_injected_put_failure() {
        let store = MemoryStore::new();
        store.fail_puts_on("application").await;
        let mut app = Application::new("shop");
        assert!(store.put_entity(&mut app).await.is_err());
        store.add_entity(&mut app).await.unwrap();
    }
}
