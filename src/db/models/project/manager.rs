//! Manager for the project model.
use async_trait::async_trait;

use crate::db::errors::StoreError;
use crate::db::DatabaseTransaction;

use super::{Project, ProjectId};

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Insert a project into the database. Re-creating an existing project
    /// returns the existing id.
    ///
    /// # Errors
    /// Errors if the project cannot be inserted.
    async fn create_project(&mut self, name: &str) -> Result<ProjectId, StoreError> {
        let statement = "
            INSERT INTO projects ( name )
            VALUES ( $1 )
            ON CONFLICT ( name ) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
        ";
        let id = sqlx::query_scalar::<_, ProjectId>(statement)
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    /// Find a project by name.
    ///
    /// # Errors
    /// Errors with `ProjectNotFound` if no such project exists.
    async fn get_project_by_name(&mut self, name: &str) -> Result<Project, StoreError> {
        let statement = "
            SELECT *
            FROM projects
            WHERE name = $1
        ";
        let row = sqlx::query_as::<_, Project>(statement)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.ok_or_else(|| StoreError::ProjectNotFound { name: name.into() })
    }
}
