//! The project model. Commits reference projects through their repo; only
//! the operations the commit core invokes live here.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::errors::StoreError;

pub mod manager;

/// Internal id of a project row.
pub type ProjectId = i64;

/// Trait for managing transactional projects.
#[async_trait]
pub trait TxManager {
    /// Insert a project, returning its id. Idempotent.
    async fn create_project(&mut self, name: &str) -> Result<ProjectId, StoreError>;
    /// Find a project by name.
    async fn get_project_by_name(&mut self, name: &str) -> Result<Project, StoreError>;
}

#[derive(sqlx::FromRow, Debug, Clone, Deserialize, Serialize)]
/// Model for a project row.
pub struct Project {
    /// Internal id.
    pub id: ProjectId,
    /// Unique project name.
    pub name: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
