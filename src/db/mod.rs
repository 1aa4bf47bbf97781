//! Database related module.
use tracing::instrument;

use crate::db::errors::StoreError;

/// Database initialization.
pub mod init;

/// Typed store errors with stable status codes.
pub mod errors;

/// sqlx structs and managers for the database tables.
pub mod models;

/// Generic Database
pub struct Database;

/// Database connection.
///
/// The store is Postgres only: the watch facility is built on
/// LISTEN/NOTIFY and commit metadata is stored as JSONB.
#[derive(Clone, Debug)]
pub struct DatabaseConnection {
    /// Connection pool shared by all callers.
    pub pool: sqlx::PgPool,
}

/// A transaction on the database. All commit mutations happen inside one.
pub struct DatabaseTransaction {
    /// The underlying sqlx transaction.
    pub tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

impl Database {
    /// Connects to a database.
    ///
    /// # Errors
    /// Errors if connection to database fails.
    #[instrument(level = "trace")]
    pub async fn connect(db_url: &str) -> anyhow::Result<DatabaseConnection> {
        let connection = match db_url {
            url if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                let pool = sqlx::PgPool::connect(url).await?;
                DatabaseConnection { pool }
            }
            _ => anyhow::bail!("Unsupported database URL: {}", db_url),
        };

        Ok(connection)
    }
}

impl DatabaseConnection {
    /// Begin a transaction.
    ///
    /// # Errors
    /// Errors if a connection cannot be acquired from the pool.
    pub async fn begin(&self) -> Result<DatabaseTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(DatabaseTransaction { tx })
    }
}

impl DatabaseTransaction {
    /// Commit the transaction.
    ///
    /// # Errors
    /// Errors if the database rejects the commit.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll the transaction back, discarding its writes.
    ///
    /// # Errors
    /// Errors if the rollback cannot be delivered.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
