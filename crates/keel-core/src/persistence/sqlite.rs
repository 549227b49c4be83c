// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed entity store.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::query::{self, SqlPaging};
use super::{DataStore, Document, EntityRow, Query, StoreError};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed [`DataStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations against a pool.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    /// Open (or create) a database file and run migrations.
    ///
    /// Parent directories are created as needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.into()))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Connect to a `sqlite:` URL and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Rows of a table narrowed by the exact index matches of the query,
    /// ordered and paged in the database when `paging` is given.
    async fn candidates(
        &self,
        table: &str,
        q: &Query,
        paging: Option<&SqlPaging>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT kind, primary_key, index_values, body, create_time, update_time \
             FROM keel_entities WHERE kind = ",
        );
        builder.push_bind(table.to_string());
        for (key, value) in &q.index {
            builder.push(" AND json_extract(index_values, ");
            builder.push_bind(format!("$.\"{}\"", key));
            builder.push(") = ");
            builder.push_bind(value.clone());
        }
        if let Some(paging) = paging {
            builder.push(" ORDER BY ");
            builder.push(&paging.order_by);
            if let Some((limit, offset)) = paging.limit_offset {
                builder.push(" LIMIT ");
                builder.push_bind(limit);
                builder.push(" OFFSET ");
                builder.push_bind(offset);
            }
        }

        let rows = builder
            .build_query_as::<EntityRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(EntityRow::into_document).collect()
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn add(&self, document: Document) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO keel_entities (kind, primary_key, index_values, body, create_time, update_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, primary_key) DO NOTHING
            "#,
        )
        .bind(&document.table)
        .bind(&document.primary_key)
        .bind(serde_json::to_string(&document.index)?)
        .bind(serde_json::to_string(&document.body)?)
        .bind(document.create_time)
        .bind(document.update_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::exist(&document.table, &document.primary_key));
        }
        Ok(())
    }

    async fn put(&self, document: Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO keel_entities (kind, primary_key, index_values, body, create_time, update_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, primary_key) DO UPDATE SET
                index_values = excluded.index_values,
                body = excluded.body,
                update_time = excluded.update_time
            "#,
        )
        .bind(&document.table)
        .bind(&document.primary_key)
        .bind(serde_json::to_string(&document.index)?)
        .bind(serde_json::to_string(&document.body)?)
        .bind(document.create_time)
        .bind(document.update_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, table: &str, primary_key: &str) -> Result<Document, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT kind, primary_key, index_values, body, create_time, update_time
            FROM keel_entities
            WHERE kind = ? AND primary_key = ?
            "#,
        )
        .bind(table)
        .bind(primary_key)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::not_exist(table, primary_key))?
            .into_document()
    }

    async fn delete(&self, table: &str, primary_key: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM keel_entities WHERE kind = ? AND primary_key = ?")
            .bind(table)
            .bind(primary_key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_exist(table, primary_key));
        }
        Ok(())
    }

    async fn list(&self, table: &str, q: &Query) -> Result<Vec<Document>, StoreError> {
        match query::sql_paging(q) {
            Some(paging) => self.candidates(table, q, Some(&paging)).await,
            None => Ok(query::apply(self.candidates(table, q, None).await?, q)),
        }
    }

    async fn count(&self, table: &str, q: &Query) -> Result<i64, StoreError> {
        let candidates = self.candidates(table, q, None).await?;
        Ok(query::count(&candidates, q))
    }
}
