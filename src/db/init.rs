//! Use this module to initialize the database connection and apply the
//! embedded schema.
use std::env;

use crate::db::{Database, DatabaseConnection};

/// The embedded schema, applied idempotently on every connect.
const SCHEMA: &str = include_str!("schema.sql");

/// Resolve the database URL: an explicit override wins, otherwise the
/// `DATABASE_URL` environment variable is used.
///
/// # Errors
/// Errors if neither an override nor the environment variable is present.
pub fn database_url(override_url: Option<&str>) -> anyhow::Result<String> {
    if let Some(url) = override_url {
        return Ok(url.to_owned());
    }
    env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set and no --database-url was given"))
}

/// Connects to a database and applies the embedded schema.
///
/// # Errors
/// Errors if connection to database fails, or if the schema cannot be
/// applied. Connections can fail if the database is not running, or if the
/// database URL is invalid.
pub async fn connect(override_url: Option<&str>) -> anyhow::Result<DatabaseConnection> {
    let db_url = database_url(override_url)?;
    let connection = Database::connect(&db_url).await?;
    sqlx::raw_sql(SCHEMA).execute(&connection.pool).await?;
    tracing::debug!("schema applied");
    Ok(connection)
}
