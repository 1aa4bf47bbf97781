//! The repo model. Commits reference repos by foreign key; only the
//! operations the commit core invokes live here.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::errors::StoreError;

pub mod manager;

/// Internal id of a repo row.
pub type RepoId = i64;

/// Trait for managing transactional repos.
#[async_trait]
pub trait TxManager {
    /// Insert a repo, returning its id. Idempotent.
    async fn create_repo(
        &mut self,
        project: &str,
        name: &str,
        repo_type: &str,
    ) -> Result<RepoId, StoreError>;
    /// Find a repo by project, name, and type.
    async fn get_repo_by_name(
        &mut self,
        project: &str,
        name: &str,
        repo_type: &str,
    ) -> Result<Repo, StoreError>;
    /// Resolve a repo picker.
    async fn pick_repo(&mut self, picker: &RepoPicker) -> Result<Repo, StoreError>;
}

#[derive(sqlx::FromRow, Debug, Clone, Deserialize, Serialize)]
/// Model for a repo row.
pub struct Repo {
    /// Internal id.
    pub id: RepoId,
    /// Repo name, unique within a project and type.
    pub name: String,
    /// Repo type, e.g. `user`.
    #[sqlx(rename = "type")]
    pub repo_type: String,
    /// Foreign key reference to the project.
    pub project_id: i64,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Symbolic reference to a repo, resolvable inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoPicker {
    /// Project name.
    pub project: String,
    /// Repo name.
    pub name: String,
    /// Repo type.
    #[serde(rename = "type")]
    pub repo_type: String,
}
