//! Manager for the repo model.
use async_trait::async_trait;
use sqlx::PgConnection;

use crate::db::errors::StoreError;
use crate::db::DatabaseTransaction;

use super::{Repo, RepoId, RepoPicker};

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Insert a repo into the database. Re-creating an existing repo returns
    /// the existing id.
    ///
    /// # Errors
    /// Errors with `ProjectNotFound` if the project does not exist.
    async fn create_repo(
        &mut self,
        project: &str,
        name: &str,
        repo_type: &str,
    ) -> Result<RepoId, StoreError> {
        let statement = "
            INSERT INTO repos ( name, type, project_id )
            VALUES ( $1, $2, (SELECT id FROM projects WHERE name = $3) )
            ON CONFLICT ( name, type, project_id ) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
        ";
        let id = sqlx::query_scalar::<_, RepoId>(statement)
            .bind(name)
            .bind(repo_type)
            .bind(project)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| {
                if crate::db::errors::is_not_null_violation(&err, "project_id") {
                    StoreError::ProjectNotFound {
                        name: project.into(),
                    }
                } else {
                    err.into()
                }
            })?;
        Ok(id)
    }

    /// Find a repo by project, name, and type.
    ///
    /// # Errors
    /// Errors with `RepoNotFound` if no such repo exists, or
    /// `ProjectNotFound` if the project itself is absent.
    async fn get_repo_by_name(
        &mut self,
        project: &str,
        name: &str,
        repo_type: &str,
    ) -> Result<Repo, StoreError> {
        get_repo_by_name(&mut self.tx, project, name, repo_type).await
    }

    /// Resolve a repo picker.
    ///
    /// # Errors
    /// Errors as `get_repo_by_name` does.
    async fn pick_repo(&mut self, picker: &RepoPicker) -> Result<Repo, StoreError> {
        get_repo_by_name(&mut self.tx, &picker.project, &picker.name, &picker.repo_type).await
    }
}

/// Find a repo by project, name, and type, distinguishing a missing repo
/// from a missing project.
pub(crate) async fn get_repo_by_name(
    conn: &mut PgConnection,
    project: &str,
    name: &str,
    repo_type: &str,
) -> Result<Repo, StoreError> {
    let statement = "
        SELECT repo.*
        FROM repos repo
        JOIN projects project ON repo.project_id = project.id
        WHERE repo.name = $1 AND repo.type = $2 AND project.name = $3
    ";
    let row = sqlx::query_as::<_, Repo>(statement)
        .bind(name)
        .bind(repo_type)
        .bind(project)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(repo) = row {
        return Ok(repo);
    }
    let project_exists = sqlx::query_scalar::<_, i64>("SELECT id FROM projects WHERE name = $1")
        .bind(project)
        .fetch_optional(&mut *conn)
        .await?;
    if project_exists.is_none() {
        return Err(StoreError::ProjectNotFound {
            name: project.into(),
        });
    }
    Err(StoreError::RepoNotFound {
        project: project.into(),
        name: name.into(),
        repo_type: repo_type.into(),
    })
}
