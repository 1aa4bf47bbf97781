//! The provenance model: cross-repository dependency edges between
//! commits. Provenance is "depends on"; subvenance is the inverse. The
//! engine supports the full transitive closure; relative assembly only
//! reads the depth-1 view.
use async_trait::async_trait;

use crate::db::errors::StoreError;
use crate::db::models::commit::{Commit, CommitId};

pub mod manager;

/// Trait for managing transactional provenance edges.
#[async_trait]
pub trait TxManager {
    /// Record that `from` directly depends on `to`. Idempotent.
    async fn add_commit_provenance(
        &mut self,
        from: CommitId,
        to: CommitId,
    ) -> Result<(), StoreError>;
    /// Commits that `id` depends on, up to `max_depth` edges away.
    async fn get_provenant_commits(
        &mut self,
        id: CommitId,
        max_depth: u32,
    ) -> Result<Vec<Commit>, StoreError>;
    /// Commits depending on `id`, up to `max_depth` edges away.
    async fn get_subvenant_commits(
        &mut self,
        id: CommitId,
        max_depth: u32,
    ) -> Result<Vec<Commit>, StoreError>;
}
