//! Manager for the branch model.
use async_trait::async_trait;
use sqlx::PgConnection;

use crate::db::errors::StoreError;
use crate::db::models::commit::CommitId;
use crate::db::models::repo;
use crate::db::DatabaseTransaction;

use super::{Branch, BranchId, BranchPicker};

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Insert a branch into the database. Re-creating an existing branch
    /// returns the existing id.
    ///
    /// # Errors
    /// Errors if the branch cannot be inserted.
    async fn create_branch(&mut self, repo_id: i64, name: &str) -> Result<BranchId, StoreError> {
        let statement = "
            INSERT INTO branches ( name, repo_id )
            VALUES ( $1, $2 )
            ON CONFLICT ( name, repo_id ) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
        ";
        let id = sqlx::query_scalar::<_, BranchId>(statement)
            .bind(name)
            .bind(repo_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    /// Point a branch head at a commit.
    ///
    /// # Errors
    /// Errors with `BranchNotFound` if the branch does not exist.
    async fn update_branch_head(
        &mut self,
        branch_id: BranchId,
        head: CommitId,
    ) -> Result<(), StoreError> {
        let statement = "UPDATE branches SET head = $1 WHERE id = $2";
        let result = sqlx::query(statement)
            .bind(head)
            .bind(branch_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::BranchNotFound {
                repo_id: None,
                name: format!("id={branch_id}"),
            });
        }
        Ok(())
    }

    /// Resolve a branch picker.
    ///
    /// # Errors
    /// Errors with `BranchNotFound` if the repo exists but the branch does
    /// not; repo resolution errors propagate.
    async fn pick_branch(&mut self, picker: &BranchPicker) -> Result<Branch, StoreError> {
        pick_branch(&mut self.tx, picker).await
    }
}

/// Resolve a branch picker: resolve the repo first, then the branch within
/// it.
pub(crate) async fn pick_branch(
    conn: &mut PgConnection,
    picker: &BranchPicker,
) -> Result<Branch, StoreError> {
    let repo = repo::manager::get_repo_by_name(
        conn,
        &picker.repo.project,
        &picker.repo.name,
        &picker.repo.repo_type,
    )
    .await?;
    let statement = "
        SELECT *
        FROM branches
        WHERE name = $1 AND repo_id = $2
    ";
    let row = sqlx::query_as::<_, Branch>(statement)
        .bind(&picker.name)
        .bind(repo.id)
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or_else(|| StoreError::BranchNotFound {
        repo_id: Some(repo.id),
        name: picker.name.clone(),
    })
}
