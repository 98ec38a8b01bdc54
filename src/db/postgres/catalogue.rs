use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

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

/// Splits a scope into the `$only` / `$excluded` parameter pair used by the
/// file queries: `($n::INTEGER IS NULL OR file_type = $n) AND NOT (file_type = ANY($m))`.
fn scope_params(scope: &FileScope) -> (Option<i32>, Vec<i32>) {
    match scope {
        FileScope::Only(file_type) => (Some(*file_type), Vec::new()),
        FileScope::AllExcept(excluded) => (None, excluded.clone()),
    }
}

pub struct PostgresCatalogueRepo {
    pool: PgPool,
}

impl PostgresCatalogueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn request_from_row(row: &PgRow) -> DbResult<DeletionRequest> {
        let state = RequestState::from_timestamps(row.get("cancelled_at"), row.get("actioned_at"))
            .map_err(|e| DbError::Internal(format!("request {}: {}", row.get::<i64, _>("id"), e)))?;

        Ok(DeletionRequest {
            id: row.get("id"),
            created_at: row.get("created_at"),
            file_type_filter: row.get("file_type_filter"),
            state,
        })
    }

    fn observation_from_row(row: &PgRow) -> Observation {
        Observation {
            id: row.get("id"),
            state: DeletionState::from_timestamp(row.get("deleted_at")),
        }
    }

    fn file_from_row(row: &PgRow) -> DataFile {
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
impl CatalogueRepo for PostgresCatalogueRepo {
    async fn list_eligible_requests(&self, ids: Option<&[i64]>) -> DbResult<Vec<DeletionRequest>> {
        if let Some([]) = ids {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM deletion_requests
            WHERE approved_at IS NOT NULL AND cancelled_at IS NULL AND actioned_at IS NULL
              AND ($1::BIGINT[] IS NULL OR id = ANY($1))
            ORDER BY created_at, id
            "#
        ))
        .bind(ids.map(<[i64]>::to_vec))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::request_from_row).collect()
    }

    async fn get_request(&self, id: i64) -> DbResult<Option<DeletionRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM deletion_requests WHERE id = $1"
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
            WHERE dro.request_id = $1 AND o.deleted_at IS NULL
            ORDER BY o.id
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::observation_from_row).collect())
    }

    async fn get_observation(&self, id: i64) -> DbResult<Option<Observation>> {
        let row = sqlx::query("SELECT id, deleted_at FROM observations WHERE id = $1")
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
        let (only, excluded) = scope_params(scope);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM data_files
            WHERE observation_id = $1
              AND remote_archived = TRUE
              AND deleted_at IS NULL
              AND ($2::INTEGER IS NULL OR file_type = $2)
              AND NOT (file_type = ANY($3))
              AND ($4::INTEGER IS NULL OR location = $4)
            ORDER BY filename
            "#
        ))
        .bind(observation_id)
        .bind(only)
        .bind(excluded)
        .bind(location)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::file_from_row).collect())
    }

    async fn count_pending_files(&self, observation_id: i64, scope: &FileScope) -> DbResult<u64> {
        let (only, excluded) = scope_params(scope);
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS pending
            FROM data_files
            WHERE observation_id = $1
              AND remote_archived = TRUE
              AND deleted_at IS NULL
              AND ($2::INTEGER IS NULL OR file_type = $2)
              AND NOT (file_type = ANY($3))
            "#,
        )
        .bind(observation_id)
        .bind(only)
        .bind(excluded)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("pending") as u64)
    }

    async fn get_file(&self, observation_id: i64, filename: &str) -> DbResult<Option<DataFile>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM data_files WHERE observation_id = $1 AND filename = $2"
        ))
        .bind(observation_id)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::file_from_row))
    }

    async fn begin(&self) -> DbResult<Box<dyn CatalogueTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresCatalogueTx { tx: Some(tx) }))
    }
}

pub struct PostgresCatalogueTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresCatalogueTx {
    fn tx(&mut self) -> DbResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(DbError::TransactionFinished)
    }
}

#[async_trait]
impl CatalogueTx for PostgresCatalogueTx {
    async fn mark_files_deleted(&mut self, files: &[DataFile]) -> DbResult<u64> {
        if files.is_empty() {
            return Ok(0);
        }

        let observation_ids: Vec<i64> = files.iter().map(|f| f.observation_id).collect();
        let filenames: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();
        let tx = self.tx()?;

        let result = sqlx::query(
            r#"
            UPDATE data_files d
            SET deleted_at = NOW()
            FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS t(observation_id, filename)
            WHERE d.observation_id = t.observation_id
              AND d.filename = t.filename
              AND d.deleted_at IS NULL
            "#,
        )
        .bind(observation_ids)
        .bind(filenames)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_observation_deleted(&mut self, observation_id: i64) -> DbResult<bool> {
        let tx = self.tx()?;
        let result = sqlx::query(
            "UPDATE observations SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(observation_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_request_actioned(&mut self, request_id: i64) -> DbResult<bool> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE deletion_requests
            SET actioned_at = NOW()
            WHERE id = $1 AND actioned_at IS NULL AND cancelled_at IS NULL
            "#,
        )
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
