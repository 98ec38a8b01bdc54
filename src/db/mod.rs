//! Catalogue persistence.
//!
//! `CatalogueDb` owns the connection pool picked by the configured URL and
//! hands out the matching [`CatalogueRepo`]. Everything above this module
//! talks to the trait only.

mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::{sync::Arc, time::Duration};

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::{CatalogueBackend, DatabaseConfig};

enum Driver {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _Unavailable(std::convert::Infallible),
}

/// An open catalogue database.
pub struct CatalogueDb {
    driver: Driver,
    repo: Arc<dyn CatalogueRepo>,
}

impl CatalogueDb {
    /// Open a pool for `config.url`.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let wait = Duration::from_secs(config.acquire_timeout_secs);

        match config.backend() {
            #[cfg(feature = "database-sqlite")]
            Some(CatalogueBackend::Sqlite) => {
                use std::str::FromStr;

                use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

                let options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(wait);
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.pool_size)
                    .acquire_timeout(wait)
                    .connect_with(options)
                    .await?;

                tracing::debug!(pool_size = config.pool_size, "Opened SQLite catalogue");
                Ok(Self {
                    repo: Arc::new(sqlite::SqliteCatalogueRepo::new(pool.clone())),
                    driver: Driver::Sqlite(pool),
                })
            }
            #[cfg(feature = "database-postgres")]
            Some(CatalogueBackend::Postgres) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.pool_size)
                    .acquire_timeout(wait)
                    .connect(&config.url)
                    .await?;

                tracing::debug!(pool_size = config.pool_size, "Opened PostgreSQL catalogue");
                Ok(Self {
                    repo: Arc::new(postgres::PostgresCatalogueRepo::new(pool.clone())),
                    driver: Driver::Postgres(pool),
                })
            }
            _ => Err(DbError::UnsupportedBackend),
        }
    }

    /// Bring the schema up to date with `migrations_sqlx/<engine>`.
    pub async fn migrate(&self) -> DbResult<()> {
        match &self.driver {
            #[cfg(feature = "database-sqlite")]
            Driver::Sqlite(pool) => {
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
            }
            #[cfg(feature = "database-postgres")]
            Driver::Postgres(pool) => {
                sqlx::migrate!("./migrations_sqlx/postgres").run(pool).await?;
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            Driver::_Unavailable(never) => match *never {},
        }
        tracing::info!("Catalogue schema is up to date");
        Ok(())
    }

    pub fn catalogue(&self) -> Arc<dyn CatalogueRepo> {
        Arc::clone(&self.repo)
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> DbResult<()> {
        match &self.driver {
            #[cfg(feature = "database-sqlite")]
            Driver::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            #[cfg(feature = "database-postgres")]
            Driver::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            Driver::_Unavailable(never) => match *never {},
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod connect_tests {
    use super::*;

    fn config(url: String) -> DatabaseConfig {
        DatabaseConfig {
            url,
            pool_size: 1,
            acquire_timeout_secs: 5,
            migrate_on_start: true,
        }
    }

    #[tokio::test]
    async fn test_sqlite_file_is_created_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogue.db");
        let db = CatalogueDb::connect(&config(format!("sqlite://{}", path.display())))
            .await
            .unwrap();

        db.migrate().await.unwrap();
        db.ping().await.unwrap();
        assert!(path.exists());
        assert!(db.catalogue().list_eligible_requests(None).await.unwrap().is_empty());

        // Migrations are recorded, so a second pass is a no-op
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_unsupported() {
        let result = CatalogueDb::connect(&config("mysql://db/archive".to_string())).await;
        assert!(matches!(result, Err(DbError::UnsupportedBackend)));
    }
}
