// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed entity store.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::query::{self, SqlPaging};
use super::{DataStore, Document, EntityRow, Query, StoreError};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed [`DataStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Migrations must already be applied.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations against a pool.
    pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    /// Connect to a `postgres://` URL and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Rows of a table whose index contains every exact match of the query.
    async fn candidates(
        &self,
        table: &str,
        q: &Query,
        paging: Option<&SqlPaging>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT kind, primary_key, index_values, body, create_time, update_time \
             FROM keel_entities WHERE kind = ",
        );
        builder.push_bind(table.to_string());
        builder.push(" AND index_values::jsonb @> ");
        builder.push_bind(serde_json::to_string(&q.index)?);
        builder.push("::jsonb");
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
impl DataStore for PostgresStore {
    async fn add(&self, document: Document) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO keel_entities (kind, primary_key, index_values, body, create_time, update_time)
            VALUES ($1, $2, $3, $4, $5, $6)
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
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kind, primary_key) DO UPDATE SET
                index_values = EXCLUDED.index_values,
                body = EXCLUDED.body,
                update_time = EXCLUDED.update_time
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
            WHERE kind = $1 AND primary_key = $2
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
        let result = sqlx::query("DELETE FROM keel_entities WHERE kind = $1 AND primary_key = $2")
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
