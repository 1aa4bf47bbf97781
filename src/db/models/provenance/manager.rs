//! Manager for the provenance model.
use async_trait::async_trait;
use sqlx::PgConnection;

use crate::db::errors::StoreError;
use crate::db::models::commit::ancestry::clamp_search_depth;
use crate::db::models::commit::iterator::{COMMIT_FIELDS, COMMIT_JOINS};
use crate::db::models::commit::{Commit, CommitId, CommitRow, RelatedCommits};
use crate::db::DatabaseTransaction;

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Record a direct provenance edge. Re-recording an existing edge is a
    /// no-op.
    ///
    /// # Errors
    /// Errors if either commit does not exist.
    async fn add_commit_provenance(
        &mut self,
        from: CommitId,
        to: CommitId,
    ) -> Result<(), StoreError> {
        let statement = "
            INSERT INTO commit_provenance ( from_id, to_id )
            VALUES ( $1, $2 )
            ON CONFLICT DO NOTHING
        ";
        sqlx::query(statement)
            .bind(from)
            .bind(to)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Commits that `id` depends on, up to `max_depth` edges away.
    ///
    /// # Errors
    /// Errors if the closure query fails.
    async fn get_provenant_commits(
        &mut self,
        id: CommitId,
        max_depth: u32,
    ) -> Result<Vec<Commit>, StoreError> {
        let rows = get_provenant_commit_rows(&mut self.tx, id, max_depth).await?;
        rows_to_commits(rows)
    }

    /// Commits depending on `id`, up to `max_depth` edges away.
    ///
    /// # Errors
    /// Errors if the closure query fails.
    async fn get_subvenant_commits(
        &mut self,
        id: CommitId,
        max_depth: u32,
    ) -> Result<Vec<Commit>, StoreError> {
        let rows = get_subvenant_commit_rows(&mut self.tx, id, max_depth).await?;
        rows_to_commits(rows)
    }
}

fn rows_to_commits(rows: Vec<CommitRow>) -> Result<Vec<Commit>, StoreError> {
    rows.into_iter()
        .map(|row| {
            Ok(Commit {
                id: row.int_id,
                info: row.parse_commit_info()?,
                revision: 0,
                related: RelatedCommits::default(),
            })
        })
        .collect()
}

/// Rows of commits that `id` transitively depends on, up to `max_depth`.
pub(crate) async fn get_provenant_commit_rows(
    conn: &mut PgConnection,
    id: CommitId,
    max_depth: u32,
) -> Result<Vec<CommitRow>, StoreError> {
    closure_rows(conn, id, max_depth, Direction::Provenance).await
}

/// Rows of commits transitively depending on `id`, up to `max_depth`.
pub(crate) async fn get_subvenant_commit_rows(
    conn: &mut PgConnection,
    id: CommitId,
    max_depth: u32,
) -> Result<Vec<CommitRow>, StoreError> {
    closure_rows(conn, id, max_depth, Direction::Subvenance).await
}

enum Direction {
    Provenance,
    Subvenance,
}

async fn closure_rows(
    conn: &mut PgConnection,
    id: CommitId,
    max_depth: u32,
    direction: Direction,
) -> Result<Vec<CommitRow>, StoreError> {
    // The closure walks from_id -> to_id for provenance and the reverse
    // for subvenance; the yielded side is the far end of each edge.
    let (seed, step, yielded) = match direction {
        Direction::Provenance => ("from_id", "prov.to_id", "to_id"),
        Direction::Subvenance => ("to_id", "prov.from_id", "from_id"),
    };
    let statement = format!(
        "
        WITH RECURSIVE prov AS (
            SELECT from_id, to_id, 1 AS depth
            FROM commit_provenance
            WHERE {seed} = $1
            UNION
            SELECT cp.from_id, cp.to_id, prov.depth + 1
            FROM commit_provenance cp
            JOIN prov ON cp.{seed} = {step}
            WHERE prov.depth < $2
        )
        SELECT DISTINCT {COMMIT_FIELDS}
        FROM prov
        JOIN commits commit ON commit.int_id = prov.{yielded}{COMMIT_JOINS}
        ORDER BY commit.int_id ASC"
    );
    let rows = sqlx::query_as::<_, CommitRow>(&statement)
        .bind(id)
        .bind(i64::from(clamp_search_depth(max_depth)))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}
