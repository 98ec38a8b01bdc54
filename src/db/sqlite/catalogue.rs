use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, sqlite::SqliteRow};

use super::common::{MAX_BIND_PARAMS, file_scope_clause, placeholders};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{CatalogueRepo, CatalogueTx},
    },
    models::{DataFile, DeletionRequest, DeletionState, FileScope, Observation, RequestState},
};

const REQUEST_COLUMNS: &str = "id, created_at, cancelled_at, actioned_at, file_type_filter";
const FILE_COLUMNS: &str = "observation_id, filename, file_type, location, bucket, folder, \
                            size_bytes, remote_archived, deleted_at";

pub struct SqliteCatalogueRepo {
    pool: SqlitePool,
}

impl SqliteCatalogueRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn request_from_row(row: &SqliteRow) -> DbResult<DeletionRequest> {
        let state = RequestState::from_timestamps(row.get("cancelled_at"), row.get("actioned_at"))
            .map_err(|e| DbError::Internal(format!("request {}: {}", row.get::<i64, _>("id"), e)))?;

        Ok(DeletionRequest {
            id: row.get("id"),
            created_at: row.get("created_at"),
            file_type_filter: row.get("file_type_filter"),
            state,
        })
    }

    fn observation_from_row(row: &SqliteRow) -> Observation {
        Observation {
            id: row.get("id"),
            state: DeletionState::from_timestamp(row.get("deleted_at")),
        }
    }

    fn file_from_row(row: &SqliteRow) -> DataFile {
        DataFile {
            observation_id: row.get("observation_id"),
            filename: row.get("filename"),
            file_type: row.get("file_type"),
            location: row.get("location"),
            bucket: row.get("bucket"),
            folder: row.get("folder"),
            size_bytes: row.get("size_bytes"),
            remote_archived: row.get("remote_archived"),
            state: DeletionState::from_timestamp(row.get("deleted_at")),
        }
    }
}

#[async_trait]
impl CatalogueRepo for SqliteCatalogueRepo {
    async fn list_eligible_requests(&self, ids: Option<&[i64]>) -> DbResult<Vec<DeletionRequest>> {
        let rows = match ids {
            Some([]) => return Ok(Vec::new()),
            Some(ids) => {
                let mut rows = Vec::new();
                for chunk in ids.chunks(MAX_BIND_PARAMS) {
                    let sql = format!(
                        r#"
                        SELECT {REQUEST_COLUMNS}
                        FROM deletion_requests
                        WHERE approved_at IS NOT NULL AND cancelled_at IS NULL AND actioned_at IS NULL
                          AND id IN ({})
                        "#,
                        placeholders(chunk.len())
                    );
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(*id);
                    }
                    rows.extend(query.fetch_all(&self.pool).await?);
                }
                rows
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {REQUEST_COLUMNS}
                    FROM deletion_requests
                    WHERE approved_at IS NOT NULL AND cancelled_at IS NULL AND actioned_at IS NULL
                    "#
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut requests = rows
            .iter()
            .map(Self::request_from_row)
            .collect::<DbResult<Vec<_>>>()?;
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    async fn get_request(&self, id: i64) -> DbResult<Option<DeletionRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM deletion_requests WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::request_from_row).transpose()
    }

    async fn list_undeleted_observations(&self, request_id: i64) -> DbResult<Vec<Observation>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.deleted_at
            FROM observations o
            INNER JOIN deletion_request_observations dro ON dro.observation_id = o.id
            WHERE dro.request_id = ? AND o.deleted_at IS NULL
            ORDER BY o.id
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::observation_from_row).collect())
    }

    async fn get_observation(&self, id: i64) -> DbResult<Option<Observation>> {
        let row = sqlx::query("SELECT id, deleted_at FROM observations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::observation_from_row))
    }

    async fn list_pending_files(
        &self,
        observation_id: i64,
        location: Option<i32>,
        scope: &FileScope,
    ) -> DbResult<Vec<DataFile>> {
        let (scope_sql, scope_binds) = file_scope_clause(scope);
        let location_sql = if location.is_some() {
            "AND location = ?"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM data_files
            WHERE observation_id = ?
              AND remote_archived = TRUE
              AND deleted_at IS NULL
              AND {scope_sql}
              {location_sql}
            ORDER BY filename
            "#
        );

        let mut query = sqlx::query(&sql).bind(observation_id);
        for file_type in scope_binds {
            query = query.bind(file_type);
        }
        if let Some(location) = location {
            query = query.bind(location);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::file_from_row).collect())
    }

    async fn count_pending_files(&self, observation_id: i64, scope: &FileScope) -> DbResult<u64> {
        let (scope_sql, scope_binds) = file_scope_clause(scope);
        let sql = format!(
            r#"
            SELECT COUNT(*) AS pending
            FROM data_files
            WHERE observation_id = ?
              AND remote_archived = TRUE
              AND deleted_at IS NULL
              AND {scope_sql}
            "#
        );

        let mut query = sqlx::query(&sql).bind(observation_id);
        for file_type in scope_binds {
            query = query.bind(file_type);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("pending") as u64)
    }

    async fn get_file(&self, observation_id: i64, filename: &str) -> DbResult<Option<DataFile>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM data_files WHERE observation_id = ? AND filename = ?"
        ))
        .bind(observation_id)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::file_from_row))
    }

    async fn begin(&self) -> DbResult<Box<dyn CatalogueTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteCatalogueTx { tx: Some(tx) }))
    }
}

pub struct SqliteCatalogueTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteCatalogueTx {
    fn tx(&mut self) -> DbResult<&mut Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or(DbError::TransactionFinished)
    }
}

#[async_trait]
impl CatalogueTx for SqliteCatalogueTx {
    async fn mark_files_deleted(&mut self, files: &[DataFile]) -> DbResult<u64> {
        let now: DateTime<Utc> = Utc::now();
        let tx = self.tx()?;
        let mut changed = 0;

        // Files are addressed per observation so the composite key can use IN.
        let mut by_observation: Vec<(i64, Vec<&str>)> = Vec::new();
        for file in files {
            match by_observation
                .iter_mut()
                .find(|(id, _)| *id == file.observation_id)
            {
                Some((_, names)) => names.push(&file.filename),
                None => by_observation.push((file.observation_id, vec![&file.filename])),
            }
        }

        for (observation_id, filenames) in by_observation {
            for chunk in filenames.chunks(MAX_BIND_PARAMS) {
                let sql = format!(
                    r#"
                    UPDATE data_files
                    SET deleted_at = ?
                    WHERE deleted_at IS NULL
                      AND observation_id = ?
                      AND filename IN ({})
                    "#,
                    placeholders(chunk.len())
                );
                let mut query = sqlx::query(&sql).bind(now).bind(observation_id);
                for filename in chunk {
                    query = query.bind(*filename);
                }
                changed += query.execute(&mut **tx).await?.rows_affected();
            }
        }

        Ok(changed)
    }

    async fn mark_observation_deleted(&mut self, observation_id: i64) -> DbResult<bool> {
        let now: DateTime<Utc> = Utc::now();
        let tx = self.tx()?;
        let result =
            sqlx::query("UPDATE observations SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(observation_id)
                .execute(&mut **tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_request_actioned(&mut self, request_id: i64) -> DbResult<bool> {
        let now: DateTime<Utc> = Utc::now();
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE deletion_requests
            SET actioned_at = ?
            WHERE id = ? AND actioned_at IS NULL AND cancelled_at IS NULL
            "#,
        )
        .bind(now)
        .bind(request_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> DbResult<()> {
        let tx = self.tx.take().ok_or(DbError::TransactionFinished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let tx = self.tx.take().ok_or(DbError::TransactionFinished)?;
        tx.rollback().await?;
        Ok(())
    }
}
