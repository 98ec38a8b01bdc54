use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("No catalogue driver compiled in for this database URL")]
    UnsupportedBackend,

    #[error("Transaction already finished")]
    TransactionFinished,

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
