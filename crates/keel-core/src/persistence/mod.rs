// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity store interfaces and backends.
//!
//! The store is document shaped: every entity is kept as a JSON body under
//! `(table, primary key)`, together with a flat string index used for
//! filtering. Backends only implement the untyped [`DataStore`] contract;
//! services use the typed helpers of [`DataStoreExt`].
//!
//! Listing semantics (filters, sort order, paging) live in [`query`] and are
//! shared by every backend.

pub mod memory;
pub mod postgres;
pub mod query;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::BaseModel;

/// Flat index of an entity: field name to rendered value.
pub type Index = BTreeMap<String, String>;

/// Entity store errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No entity exists under the primary key.
    #[error("record does not exist: {table}/{primary_key}")]
    RecordNotExist { table: String, primary_key: String },

    /// An entity already exists under the primary key.
    #[error("record already exists: {table}/{primary_key}")]
    RecordExist { table: String, primary_key: String },

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Running migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Entity body could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_exist(table: &str, primary_key: &str) -> Self {
        StoreError::RecordNotExist {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
        }
    }

    pub(crate) fn exist(table: &str, primary_key: &str) -> Self {
        StoreError::RecordExist {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
        }
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, StoreError::RecordNotExist { .. })
    }
}

/// A persisted entity type.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table (collection) name.
    const TABLE: &'static str;

    fn primary_key(&self) -> String;

    /// Index values used by list filters.
    fn index(&self) -> Index;

    fn base(&self) -> &BaseModel;

    fn base_mut(&mut self) -> &mut BaseModel;
}

/// Stored form of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub table: String,
    pub primary_key: String,
    pub index: Index,
    pub body: serde_json::Value,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Document {
    pub fn from_entity<E: Entity>(entity: &E) -> Result<Self, StoreError> {
        Ok(Self {
            table: E::TABLE.to_string(),
            primary_key: entity.primary_key(),
            index: entity.index(),
            body: serde_json::to_value(entity)?,
            create_time: entity.base().create_time,
            update_time: entity.base().update_time,
        })
    }

    /// Decode the body; timestamps come from the store, not the body.
    pub fn into_entity<E: Entity>(self) -> Result<E, StoreError> {
        let mut entity: E = serde_json::from_value(self.body)?;
        let base = entity.base_mut();
        base.create_time = self.create_time;
        base.update_time = self.update_time;
        Ok(entity)
    }
}

/// Row of the `keel_entities` table, shared by the SQL backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntityRow {
    pub kind: String,
    pub primary_key: String,
    pub index_values: String,
    pub body: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl EntityRow {
    pub(crate) fn into_document(self) -> Result<Document, StoreError> {
        Ok(Document {
            table: self.kind,
            primary_key: self.primary_key,
            index: serde_json::from_str(&self.index_values)?,
            body: serde_json::from_str(&self.body)?,
            create_time: self.create_time,
            update_time: self.update_time,
        })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort on an index field, or on `createTime` / `updateTime`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOption {
    pub key: String,
    pub order: SortOrder,
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

/// Index field must hold one of `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InQueryOption {
    pub key: String,
    pub values: Vec<String>,
}

/// Index field must contain `query` as a substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyQueryOption {
    pub key: String,
    pub query: String,
}

/// Filters beyond exact index matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub queries: Vec<FuzzyQueryOption>,
    pub in_queries: Vec<InQueryOption>,
    /// Index fields that must be absent.
    pub is_not_exist: Vec<String>,
}

/// List/count query: exact index matches, extra filters, ordering, paging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub index: Index,
    pub filter: FilterOptions,
    pub sort_by: Vec<SortOption>,
    pub page: Option<Page>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, key: &str, value: impl Into<String>) -> Self {
        self.index.insert(key.to_string(), value.into());
        self
    }

    pub fn with_in(mut self, key: &str, values: Vec<String>) -> Self {
        self.filter.in_queries.push(InQueryOption {
            key: key.to_string(),
            values,
        });
        self
    }

    pub fn with_fuzzy(mut self, key: &str, query: impl Into<String>) -> Self {
        self.filter.queries.push(FuzzyQueryOption {
            key: key.to_string(),
            query: query.into(),
        });
        self
    }

    pub fn with_not_exist(mut self, key: &str) -> Self {
        self.filter.is_not_exist.push(key.to_string());
        self
    }

    pub fn sort_by(mut self, key: &str, order: SortOrder) -> Self {
        self.sort_by.push(SortOption {
            key: key.to_string(),
            order,
        });
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(Page { page, page_size });
        self
    }
}

/// Untyped entity store contract.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Insert a new document. Fails with [`StoreError::RecordExist`].
    async fn add(&self, document: Document) -> Result<(), StoreError>;

    /// Insert or replace a document. The original create time is kept.
    async fn put(&self, document: Document) -> Result<(), StoreError>;

    /// Fetch a document. Fails with [`StoreError::RecordNotExist`].
    async fn get(&self, table: &str, primary_key: &str) -> Result<Document, StoreError>;

    /// Remove a document. Fails with [`StoreError::RecordNotExist`].
    async fn delete(&self, table: &str, primary_key: &str) -> Result<(), StoreError>;

    async fn list(&self, table: &str, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Number of documents matching the query, ignoring sort and paging.
    async fn count(&self, table: &str, query: &Query) -> Result<i64, StoreError>;
}

/// Typed helpers over any [`DataStore`].
#[async_trait]
pub trait DataStoreExt: DataStore {
    /// Add an entity, stamping both timestamps.
    async fn add_entity<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let now = Utc::now();
        let base = entity.base_mut();
        base.create_time = now;
        base.update_time = now;
        self.add(Document::from_entity(entity)?).await
    }

    /// Upsert an entity, stamping the update time.
    async fn put_entity<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let now = Utc::now();
        let base = entity.base_mut();
        if base.create_time == DateTime::<Utc>::default() {
            base.create_time = now;
        }
        base.update_time = now;
        self.put(Document::from_entity(entity)?).await
    }

    async fn get_entity<E: Entity>(&self, primary_key: &str) -> Result<E, StoreError> {
        self.get(E::TABLE, primary_key).await?.into_entity()
    }

    /// Like [`get_entity`](Self::get_entity), mapping not-found to `None`.
    async fn find_entity<E: Entity>(&self, primary_key: &str) -> Result<Option<E>, StoreError> {
        match self.get(E::TABLE, primary_key).await {
            Ok(document) => Ok(Some(document.into_entity()?)),
            Err(StoreError::RecordNotExist { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_entity<E: Entity>(&self, primary_key: &str) -> Result<(), StoreError> {
        self.delete(E::TABLE, primary_key).await
    }

    async fn list_entities<E: Entity>(&self, query: &Query) -> Result<Vec<E>, StoreError> {
        self.list(E::TABLE, query)
            .await?
            .into_iter()
            .map(Document::into_entity)
            .collect()
    }

    async fn count_entities<E: Entity>(&self, query: &Query) -> Result<i64, StoreError> {
        self.count(E::TABLE, query).await
    }
}

impl<T: DataStore + ?Sized> DataStoreExt for T {}
