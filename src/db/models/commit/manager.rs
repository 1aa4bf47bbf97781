//! Manager for the commit model.
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgQueryResult;
use sqlx::types::Json;
use sqlx::{PgConnection, QueryBuilder};

use crate::db::errors::{is_not_null_violation, StoreError};
use crate::db::models::branch::BranchId;
use crate::db::models::principal::TxManager as PrincipalTxManager;
use crate::db::models::provenance::manager::{
    get_provenant_commit_rows, get_subvenant_commit_rows,
};
use crate::db::models::{repo, BATCH_SIZE};
use crate::db::{DatabaseConnection, DatabaseTransaction};

use super::iterator::{
    for_each_commit, for_each_commit_tx_by_filter, get_commit_query, CommitFilter, OrderBy,
};
use super::TxManager as TxManagerExt;
use super::{
    duration_to_nanos, validate_commit_info, AncestryOpt, Commit, CommitDetails, CommitHandle,
    CommitId, CommitInfo, CommitRow, RelatedCommits,
};

const CREATE_COMMIT: &str = "
    WITH repo_row_id AS (
        SELECT id FROM repos
        WHERE name = $1 AND type = $2
          AND project_id = (SELECT id FROM projects WHERE name = $3)
    )
    INSERT INTO commits
        (commit_id,
         commit_set_id,
         repo_id,
         branch_id,
         description,
         origin,
         start_time,
         finishing_time,
         finished_time,
         compacting_time_s,
         validating_time_s,
         size,
         error,
         metadata,
         created_by)
    VALUES
        ($4, $5,
         (SELECT id FROM repo_row_id),
         (SELECT id FROM branches WHERE name = $6 AND repo_id = (SELECT id FROM repo_row_id)),
         $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
    RETURNING int_id";

#[async_trait]
impl super::Manager for DatabaseConnection {
    /// Iterate all commits matching `filter` on a pooled connection. Pages
    /// are re-queried as the scan advances, so no snapshot-wide consistency
    /// is promised; callers needing it iterate inside a transaction.
    ///
    /// # Errors
    /// Errors if a page query fails or the callback returns an error.
    async fn for_each_commit<F>(
        &self,
        filter: &CommitFilter,
        order_bys: Vec<OrderBy>,
        cb: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(Commit) -> Result<ControlFlow<()>, StoreError> + Send,
    {
        for_each_commit(self, filter, &order_bys, cb).await
    }
}

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Create a commit. If the commit info names a parent or children, the
    /// ancestry edges are created in the same transaction unless the
    /// options skip them.
    ///
    /// # Errors
    /// Errors with `CommitAlreadyExists` when the key is taken,
    /// `CommitMissingInfo` when the info is incomplete, and
    /// `ParentCommitNotFound` / `ChildCommitNotFound` when a named relative
    /// is absent.
    async fn create_commit(
        &mut self,
        info: &CommitInfo,
        opts: AncestryOpt,
    ) -> Result<CommitId, StoreError> {
        validate_commit_info(info)?;
        match get_commit_row_by_key(&mut self.tx, &info.commit).await {
            Ok(row) => {
                return Err(StoreError::CommitAlreadyExists {
                    commit_key: row.commit_id,
                })
            }
            Err(StoreError::CommitNotFound { .. }) => {}
            Err(err) => return Err(err),
        }
        if let Some(creator) = info.created_by.as_deref() {
            if !creator.is_empty() {
                PrincipalTxManager::ensure_principal(self, creator).await?;
            }
        }
        let int_id = sqlx::query_scalar::<_, CommitId>(CREATE_COMMIT)
            .bind(&info.commit.repo.name)
            .bind(&info.commit.repo.repo_type)
            .bind(&info.commit.repo.project)
            .bind(info.commit.key())
            .bind(&info.commit.id)
            .bind(&info.commit.branch)
            .bind(&info.description)
            .bind(info.origin.as_str())
            .bind(info.started)
            .bind(info.finishing)
            .bind(info.finished)
            .bind(duration_to_nanos(info.details.compacting))
            .bind(duration_to_nanos(info.details.validating))
            .bind(info.details.size_bytes)
            .bind(&info.error)
            .bind(Json(&info.metadata))
            .bind(&info.created_by)
            .fetch_one(&mut *self.tx)
            .await?;
        if let Some(parent) = &info.parent_commit {
            if !opts.skip_parent {
                create_commit_parent(&mut self.tx, parent, int_id).await?;
            }
        }
        if !info.child_commits.is_empty() && !opts.skip_children {
            create_commit_children(&mut self.tx, int_id, &info.child_commits).await?;
        }
        Ok(int_id)
    }

    /// Delete a commit and repoint the ancestry around it: every child is
    /// re-parented onto the deleted commit's parent. The caller is
    /// responsible for updating branch heads.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when the commit is absent.
    async fn delete_commit(&mut self, handle: &CommitHandle) -> Result<(), StoreError> {
        let id = get_commit_row_by_key(&mut self.tx, handle).await?.int_id;
        let (parent, children) = get_commit_relative_rows(&mut self.tx, id).await?;
        // delete parent -> commit and commit -> children edges if they exist.
        if parent.is_some() || !children.is_empty() {
            sqlx::query("DELETE FROM commit_ancestry WHERE parent = $1 OR child = $1")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
        }
        // repoint parent -> children.
        if let Some(parent) = parent {
            if !children.is_empty() {
                let children_ids: Vec<CommitId> =
                    children.iter().map(|child| child.int_id).collect();
                create_commit_ancestries(&mut self.tx, parent.int_id, &children_ids).await?;
            }
        }
        let result = sqlx::query("DELETE FROM commits WHERE int_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CommitNotFound {
                int_id: Some(id),
                commit_key: None,
            });
        }
        Ok(())
    }

    /// Resolve the internal id of a commit by key.
    ///
    /// # Errors
    /// Errors with `CommitMissingInfo` when the handle is incomplete, or as
    /// the key probe does.
    async fn get_commit_id(&mut self, handle: &CommitHandle) -> Result<CommitId, StoreError> {
        if handle.repo.name.is_empty() {
            return Err(StoreError::CommitMissingInfo { field: "repo" });
        }
        Ok(get_commit_row_by_key(&mut self.tx, handle).await?.int_id)
    }

    /// Fetch a commit with relatives populated, by internal id.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn get_commit(&mut self, id: CommitId) -> Result<Commit, StoreError> {
        get_commit(&mut self.tx, id).await
    }

    /// Fetch just the commit info, by internal id.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn get_commit_info(&mut self, id: CommitId) -> Result<CommitInfo, StoreError> {
        Ok(get_commit(&mut self.tx, id).await?.info)
    }

    /// Fetch a commit with relatives populated, by key.
    ///
    /// # Errors
    /// Errors as the key probe does.
    async fn get_commit_by_key(&mut self, handle: &CommitHandle) -> Result<Commit, StoreError> {
        let row = get_commit_row_by_key(&mut self.tx, handle).await?;
        let (info, related) = get_commit_from_commit_row(&mut self.tx, &row).await?;
        Ok(Commit {
            id: row.int_id,
            info,
            revision: 0,
            related,
        })
    }

    /// Fetch just the commit info, by key.
    ///
    /// # Errors
    /// Errors as the key probe does.
    async fn get_commit_info_by_key(
        &mut self,
        handle: &CommitHandle,
    ) -> Result<CommitInfo, StoreError> {
        Ok(TxManagerExt::get_commit_by_key(self, handle).await?.info)
    }

    /// The parent of a commit.
    ///
    /// # Errors
    /// Errors with `ParentCommitNotFound` when the commit is a root.
    async fn get_commit_parent(&mut self, id: CommitId) -> Result<CommitHandle, StoreError> {
        Ok(get_commit_parent_row(&mut self.tx, id).await?.handle())
    }

    /// The children of a commit.
    ///
    /// # Errors
    /// Errors with `ChildCommitNotFound` when the commit has none.
    async fn get_commit_children(
        &mut self,
        id: CommitId,
    ) -> Result<Vec<CommitHandle>, StoreError> {
        let rows = get_commit_children_rows(&mut self.tx, id).await?;
        Ok(rows.iter().map(CommitRow::handle).collect())
    }

    /// Update only the branch association of a commit. Kept separate so
    /// branch-field updates stay easy to audit.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn update_commit_branch(
        &mut self,
        id: CommitId,
        branch_id: BranchId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE commits SET branch_id = $1 WHERE int_id = $2")
            .bind(branch_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        check_updated(&result, id)
    }

    /// Mark a commit as finishing.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn finishing_commit(
        &mut self,
        id: CommitId,
        finishing_time: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE commits SET finishing_time = $1, error = $2 WHERE int_id = $3")
                .bind(finishing_time)
                .bind(error)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
        check_updated(&result, id)
    }

    /// Mark a commit as finished, recording its details.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn finish_commit(
        &mut self,
        id: CommitId,
        finished_time: Option<DateTime<Utc>>,
        error: &str,
        details: &CommitDetails,
    ) -> Result<(), StoreError> {
        let statement = "
            UPDATE commits SET
                finished_time = $1,
                error = $2,
                compacting_time_s = $3,
                validating_time_s = $4,
                size = $5
            WHERE int_id = $6
        ";
        let result = sqlx::query(statement)
            .bind(finished_time)
            .bind(error)
            .bind(duration_to_nanos(details.compacting))
            .bind(duration_to_nanos(details.validating))
            .bind(details.size_bytes)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        check_updated(&result, id)
    }

    /// Replace the metadata map of a commit. No other field is touched.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn update_commit_metadata(
        &mut self,
        id: CommitId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE commits SET metadata = $1 WHERE int_id = $2")
            .bind(Json(metadata))
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        check_updated(&result, id)
    }

    /// Replace the description of a commit.
    ///
    /// # Errors
    /// Errors with `CommitNotFound` when no row matches.
    async fn update_description(
        &mut self,
        id: CommitId,
        description: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE commits SET description = $1 WHERE int_id = $2")
            .bind(description)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        check_updated(&result, id)
    }

    /// List all commits matching a non-empty `filter`.
    ///
    /// # Errors
    /// Errors as [`for_each_commit_tx_by_filter`] does.
    async fn list_commits(
        &mut self,
        filter: &CommitFilter,
        order_bys: Vec<OrderBy>,
    ) -> Result<Vec<Commit>, StoreError> {
        let mut commits = Vec::new();
        for_each_commit_tx_by_filter(self, filter, &order_bys, |commit| {
            commits.push(commit);
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        Ok(commits)
    }
}

fn check_updated(result: &PgQueryResult, id: CommitId) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::CommitNotFound {
            int_id: Some(id),
            commit_key: None,
        });
    }
    Ok(())
}

/// Insert a single ancestry edge where the child id is known and the
/// parent is derived by sub-select. Idempotent.
pub(crate) async fn create_commit_parent(
    conn: &mut PgConnection,
    parent: &CommitHandle,
    child: CommitId,
) -> Result<(), StoreError> {
    let statement = "
        INSERT INTO commit_ancestry ( parent, child )
        VALUES ( (SELECT int_id FROM commits WHERE commit_id = $1), $2 )
        ON CONFLICT DO NOTHING
    ";
    sqlx::query(statement)
        .bind(parent.key())
        .bind(child)
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            if is_not_null_violation(&err, "parent") {
                StoreError::ParentCommitNotFound { child_id: child }
            } else {
                err.into()
            }
        })?;
    Ok(())
}

/// Insert ancestry edges for all children of `parent` in one statement per
/// batch, deriving child ids by sub-select. Idempotent.
pub(crate) async fn create_commit_children(
    conn: &mut PgConnection,
    parent: CommitId,
    children: &[CommitHandle],
) -> Result<(), StoreError> {
    let mut query_builder = QueryBuilder::new("INSERT INTO commit_ancestry ( parent, child ) ");
    for chunk in children.chunks(BATCH_SIZE) {
        query_builder.push_values(chunk, |mut bindings, child| {
            bindings
                .push_bind(parent)
                .push("(SELECT int_id FROM commits WHERE commit_id = ")
                .push_bind_unseparated(child.key())
                .push_unseparated(")");
        });
        query_builder.push(" ON CONFLICT DO NOTHING");
        let query = query_builder.build();
        query.execute(&mut *conn).await.map_err(|err| {
            if is_not_null_violation(&err, "child") {
                StoreError::ChildCommitNotFound { parent_id: parent }
            } else {
                StoreError::from(err)
            }
        })?;
        query_builder.reset();
    }
    Ok(())
}

/// Insert ancestry edges where both sides are known ids. Used by the
/// delete repoint. Idempotent.
pub(crate) async fn create_commit_ancestries(
    conn: &mut PgConnection,
    parent: CommitId,
    children: &[CommitId],
) -> Result<(), StoreError> {
    let mut query_builder = QueryBuilder::new("INSERT INTO commit_ancestry ( parent, child ) ");
    for chunk in children.chunks(BATCH_SIZE) {
        query_builder.push_values(chunk, |mut bindings, child| {
            bindings.push_bind(parent).push_bind(*child);
        });
        query_builder.push(" ON CONFLICT DO NOTHING");
        let query = query_builder.build();
        query.execute(&mut *conn).await.map_err(|err| {
            if is_not_null_violation(&err, "child") {
                StoreError::ChildCommitNotFound { parent_id: parent }
            } else {
                StoreError::from(err)
            }
        })?;
        query_builder.reset();
    }
    Ok(())
}

/// Fetch a commit row by internal id.
pub(crate) async fn get_commit_row(
    conn: &mut PgConnection,
    id: CommitId,
) -> Result<CommitRow, StoreError> {
    let statement = format!("{}\n    WHERE commit.int_id = $1", get_commit_query());
    let row = sqlx::query_as::<_, CommitRow>(&statement)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or(StoreError::CommitNotFound {
        int_id: Some(id),
        commit_key: None,
    })
}

/// Fetch a commit row by key. A miss distinguishes an absent project or
/// repo from an absent commit.
pub(crate) async fn get_commit_row_by_key(
    conn: &mut PgConnection,
    handle: &CommitHandle,
) -> Result<CommitRow, StoreError> {
    let key = handle.key();
    let statement = format!("{}\n    WHERE commit.commit_id = $1", get_commit_query());
    let row = sqlx::query_as::<_, CommitRow>(&statement)
        .bind(&key)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = row {
        return Ok(row);
    }
    repo::manager::get_repo_by_name(
        conn,
        &handle.repo.project,
        &handle.repo.name,
        &handle.repo.repo_type,
    )
    .await?;
    Err(StoreError::CommitNotFound {
        int_id: None,
        commit_key: Some(key),
    })
}

/// Fetch the parent row of a commit via the ancestry relation.
pub(crate) async fn get_commit_parent_row(
    conn: &mut PgConnection,
    child: CommitId,
) -> Result<CommitRow, StoreError> {
    let statement = format!(
        "{}\n    JOIN commit_ancestry ancestry ON ancestry.parent = commit.int_id\n    WHERE ancestry.child = $1",
        get_commit_query()
    );
    let row = sqlx::query_as::<_, CommitRow>(&statement)
        .bind(child)
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or(StoreError::ParentCommitNotFound { child_id: child })
}

/// Fetch the child rows of a commit via the ancestry relation.
pub(crate) async fn get_commit_children_rows(
    conn: &mut PgConnection,
    parent: CommitId,
) -> Result<Vec<CommitRow>, StoreError> {
    let statement = format!(
        "{}\n    JOIN commit_ancestry ancestry ON ancestry.child = commit.int_id\n    WHERE ancestry.parent = $1\n    ORDER BY commit.int_id ASC",
        get_commit_query()
    );
    let rows = sqlx::query_as::<_, CommitRow>(&statement)
        .bind(parent)
        .fetch_all(&mut *conn)
        .await?;
    if rows.is_empty() {
        return Err(StoreError::ChildCommitNotFound { parent_id: parent });
    }
    Ok(rows)
}

/// Fetch the relatives of a commit, recovering the typed relative-miss
/// errors: a missing parent means the commit is the root of its repo, and
/// missing children mean it is the head of some branch. Error identity is
/// checked; anything else propagates.
pub(crate) async fn get_commit_relative_rows(
    conn: &mut PgConnection,
    id: CommitId,
) -> Result<(Option<CommitRow>, Vec<CommitRow>), StoreError> {
    let parent = match get_commit_parent_row(conn, id).await {
        Ok(row) => Some(row),
        Err(StoreError::ParentCommitNotFound { .. }) => None,
        Err(err) => return Err(err),
    };
    let children = match get_commit_children_rows(conn, id).await {
        Ok(rows) => rows,
        Err(StoreError::ChildCommitNotFound { .. }) => Vec::new(),
        Err(err) => return Err(err),
    };
    Ok((parent, children))
}

/// Compose a full commit info from a row: relatives from the ancestry
/// relation and the depth-1 provenance and subvenance views.
pub(crate) async fn get_commit_from_commit_row(
    conn: &mut PgConnection,
    row: &CommitRow,
) -> Result<(CommitInfo, RelatedCommits), StoreError> {
    let mut info = row.parse_commit_info()?;
    let mut related = RelatedCommits::default();
    let (parent, children) = get_commit_relative_rows(conn, row.int_id).await?;
    if let Some(parent) = parent {
        info.parent_commit = Some(parent.handle());
        related.parent_id = Some(parent.int_id);
    }
    for child in children {
        info.child_commits.push(child.handle());
        related.children_ids.push(child.int_id);
    }
    for provenant in get_provenant_commit_rows(conn, row.int_id, 1).await? {
        info.direct_provenance.push(provenant.handle());
        related.direct_provenant_ids.push(provenant.int_id);
    }
    for subvenant in get_subvenant_commit_rows(conn, row.int_id, 1).await? {
        info.direct_subvenance.push(subvenant.handle());
        related.direct_subvenant_ids.push(subvenant.int_id);
    }
    Ok((info, related))
}

/// Fetch a fully assembled commit by internal id.
pub(crate) async fn get_commit(
    conn: &mut PgConnection,
    id: CommitId,
) -> Result<Commit, StoreError> {
    let row = get_commit_row(conn, id).await?;
    let (info, related) = get_commit_from_commit_row(conn, &row).await?;
    Ok(Commit {
        id,
        info,
        revision: 0,
        related,
    })
}
