// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxstore_config::PostgresMetaStore as PostgresMetaStoreConfig;
use fluxstore_error::{make_err, Code, Error};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::meta_store::{FileInfo, MetaStore};

const STATUS_PENDING: &str = "pending";
const STATUS_SUCCESS: &str = "success";

/// Stores file records in a Postgres table. The schema (owned by migration
/// tooling, out of this crate's scope) is expected to be roughly:
///
/// ```sql
/// CREATE TABLE files (
///     id UUID PRIMARY KEY,
///     name TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     status TEXT NOT NULL
/// );
/// ```
pub struct PostgresMetaStore {
    pool: PgPool,
}

impl PostgresMetaStore {
    pub async fn new(config: &PostgresMetaStoreConfig) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.dsn)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "Failed to connect to postgres: {e}"))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classifies a sqlx error as retryable or not, per spec section 4.5:
    /// an undefined-table code (a schema-absent failure) is user-fault and
    /// must not be retried.
    fn is_non_retryable(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("42P01"))
    }

    fn to_fluxstore_error(err: sqlx::Error, context: &str) -> Error {
        let code = if Self::is_non_retryable(&err) {
            Code::FailedPrecondition
        } else {
            Code::Unavailable
        };
        make_err!(code, "{context}: {err}")
    }
}

#[async_trait]
impl MetaStore for PostgresMetaStore {
    async fn save_file_info(
        &self,
        id: Uuid,
        name: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "INSERT INTO files (id, name, created_at, updated_at, status) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(name)
        .bind(created_at)
        .bind(updated_at)
        .bind(STATUS_PENDING)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::to_fluxstore_error(e, "save_file_info"))?;

        if result.rows_affected() == 0 {
            return Err(make_err!(Code::Internal, "save_file_info: no rows affected for {id}"));
        }
        Ok(())
    }

    async fn set_success_status(&self, id: Uuid) -> Result<(), Error> {
        let result = sqlx::query("UPDATE files SET status = $1 WHERE id = $2")
            .bind(STATUS_SUCCESS)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::to_fluxstore_error(e, "set_success_status"))?;

        if result.rows_affected() == 0 {
            return Err(make_err!(Code::NotFound, "set_success_status: no rows affected for {id}"));
        }
        Ok(())
    }

    async fn delete_file_info(&self, id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::to_fluxstore_error(e, "delete_file_info"))?;
        Ok(())
    }

    async fn get_file_name(&self, id: Uuid) -> Result<String, Error> {
        let row = sqlx::query("SELECT name FROM files WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(STATUS_SUCCESS)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::to_fluxstore_error(e, "get_file_name"))?;

        match row {
            Some(row) => Ok(row.get::<String, _>("name")),
            None => Err(make_err!(Code::NotFound, "No file record {id}")),
        }
    }

    async fn list_files_info(&self, limit: i64, offset: i64) -> Result<Vec<FileInfo>, Error> {
        let rows = sqlx::query(
            "SELECT name, created_at, updated_at FROM files WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(STATUS_SUCCESS)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::to_fluxstore_error(e, "list_files_info"))?;

        Ok(rows
            .into_iter()
            .map(|row| FileInfo {
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}
