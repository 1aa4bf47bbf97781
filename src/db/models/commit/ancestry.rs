//! Ancestry engine: recursive ancestor walks over the `commit_ancestry`
//! edge relation.
//!
//! Each commit has at most one parent (enforced by the unique index on
//! `child`), so a walk from any commit is a chain. Walks are bounded by
//! [`MAX_SEARCH_DEPTH`] per query; [`for_each_commit_ancestor_until_root`]
//! batches queries to reach roots deeper than that.
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use sqlx::PgConnection;

use crate::db::errors::StoreError;

use super::CommitId;

/// Upper bound on the depth of a single recursive ancestry query.
pub const MAX_SEARCH_DEPTH: u32 = 1000;

/// A requested depth of 0, or one beyond the bound, means "as deep as a
/// single query may go".
pub(crate) const fn clamp_search_depth(max_depth: u32) -> u32 {
    if max_depth == 0 || max_depth > MAX_SEARCH_DEPTH {
        MAX_SEARCH_DEPTH
    } else {
        max_depth
    }
}

/// Walk the ancestors of `start_id` up to `max_depth` edges away, calling
/// `cb` with each `(parent, child)` edge. The callback may stop the walk
/// early by returning `ControlFlow::Break`, which is reported to the
/// caller without error.
///
/// # Errors
/// Errors if the ancestry query fails or the callback returns an error.
pub async fn for_each_commit_ancestor<F>(
    conn: &mut PgConnection,
    start_id: CommitId,
    max_depth: u32,
    mut cb: F,
) -> Result<ControlFlow<()>, StoreError>
where
    F: FnMut(CommitId, CommitId) -> Result<ControlFlow<()>, StoreError> + Send,
{
    let max_depth = clamp_search_depth(max_depth);
    let query = "
        WITH RECURSIVE ancestry AS (
            SELECT parent, child, 1 AS depth
            FROM commit_ancestry
            WHERE child = $1
            UNION
            SELECT ca.parent, ca.child, ancestry.depth + 1
            FROM commit_ancestry ca
            JOIN ancestry ON ca.child = ancestry.parent
            WHERE ancestry.depth < $2
        )
        SELECT ancestry.parent, ancestry.child, ancestry.depth
        FROM ancestry
        ORDER BY ancestry.depth ASC
    ";
    let rows = sqlx::query_as::<_, (CommitId, CommitId, i32)>(query)
        .bind(start_id)
        .bind(i64::from(max_depth))
        .fetch_all(&mut *conn)
        .await?;
    for (parent, child, _depth) in rows {
        if cb(parent, child)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// The ancestry of `start_id` as a child-to-parent map, up to `max_depth`.
///
/// # Errors
/// Errors if the ancestry query fails.
pub async fn get_commit_ancestry(
    conn: &mut PgConnection,
    start_id: CommitId,
    max_depth: u32,
) -> Result<BTreeMap<CommitId, CommitId>, StoreError> {
    let mut ancestry = BTreeMap::new();
    for_each_commit_ancestor(conn, start_id, max_depth, |parent, child| {
        ancestry.insert(child, parent);
        Ok(ControlFlow::Continue(()))
    })
    .await?;
    Ok(ancestry)
}

/// Walk ancestors in batches of [`MAX_SEARCH_DEPTH`] until the root is
/// reached. Each batch restarts from the earliest ancestor the previous
/// batch observed; a batch that reports its own starting id as earliest
/// has hit the root.
///
/// # Errors
/// Errors if any batched query fails or the callback returns an error.
pub(crate) async fn for_each_commit_ancestor_until_root<F>(
    conn: &mut PgConnection,
    start_id: CommitId,
    mut cb: F,
) -> Result<ControlFlow<()>, StoreError>
where
    F: FnMut(CommitId, CommitId) -> Result<ControlFlow<()>, StoreError> + Send,
{
    let mut commit_ptr = start_id;
    let mut earliest = commit_ptr;
    loop {
        let flow = for_each_commit_ancestor(conn, commit_ptr, MAX_SEARCH_DEPTH, |parent, child| {
            earliest = parent;
            cb(parent, child)
        })
        .await?;
        if flow.is_break() {
            return Ok(flow);
        }
        if earliest == commit_ptr {
            // root was found.
            return Ok(ControlFlow::Continue(()));
        }
        commit_ptr = earliest;
    }
}
