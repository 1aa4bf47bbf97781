//! The branch model. A branch is a named mutable pointer to a commit; the
//! commit core resolves branch pickers and reads heads.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::errors::StoreError;
use crate::db::models::commit::CommitId;
use crate::db::models::repo::RepoPicker;

pub mod manager;

/// Internal id of a branch row.
pub type BranchId = i64;

/// Trait for managing transactional branches.
#[async_trait]
pub trait TxManager {
    /// Insert a branch, returning its id. Idempotent.
    async fn create_branch(&mut self, repo_id: i64, name: &str) -> Result<BranchId, StoreError>;
    /// Point a branch head at a commit.
    async fn update_branch_head(
        &mut self,
        branch_id: BranchId,
        head: CommitId,
    ) -> Result<(), StoreError>;
    /// Resolve a branch picker.
    async fn pick_branch(&mut self, picker: &BranchPicker) -> Result<Branch, StoreError>;
}

#[derive(sqlx::FromRow, Debug, Clone, Deserialize, Serialize)]
/// Model for a branch row.
pub struct Branch {
    /// Internal id.
    pub id: BranchId,
    /// Branch name, unique within a repo.
    pub name: String,
    /// Foreign key reference to the repo.
    pub repo_id: i64,
    /// The commit this branch points at, if any.
    pub head: Option<CommitId>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Symbolic reference to a branch, resolvable inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BranchPicker {
    /// The repo the branch belongs to.
    pub repo: RepoPicker,
    /// Branch name.
    pub name: String,
}
