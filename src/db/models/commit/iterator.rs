//! Filtered, ordered, page-by-page iteration over commits.
//!
//! Iteration is offset/limit paged with a stable, deterministic ordering;
//! ties are always broken by `int_id`. Each yielded commit carries a
//! monotonically increasing revision reflecting its position in the scan.
//! No snapshot-wide consistency is promised across pages; callers needing
//! it iterate inside a transaction.
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::db::errors::StoreError;
use crate::db::models::repo::RepoId;
use crate::db::{DatabaseConnection, DatabaseTransaction};

use super::{manager, Commit, CommitRow};

/// Page size for transactional scans and watch snapshots.
pub const COMMITS_PAGE_SIZE: u64 = 1000;

/// Page size for open-ended iteration on a pooled connection.
pub(crate) const OPEN_ITERATION_PAGE_SIZE: u64 = 100;

/// Select list shared by every query that yields commit rows.
pub(crate) const COMMIT_FIELDS: &str = "
        commit.int_id,
        commit.commit_id,
        commit.commit_set_id,
        commit.repo_id,
        commit.branch_id,
        commit.origin,
        commit.description,
        commit.start_time,
        commit.finishing_time,
        commit.finished_time,
        commit.compacting_time_s,
        commit.validating_time_s,
        commit.size,
        commit.error,
        commit.metadata,
        commit.created_by,
        commit.created_at,
        commit.updated_at,
        repo.name AS repo_name,
        repo.type AS repo_type,
        project.name AS project_name,
        branch.name AS branch_name";

/// Joins resolving the repo, project, and branch names of a commit row.
pub(crate) const COMMIT_JOINS: &str = "
    JOIN repos repo ON commit.repo_id = repo.id
    JOIN projects project ON repo.project_id = project.id
    LEFT JOIN branches branch ON commit.branch_id = branch.id";

/// Base SELECT for commits, joined with repo, project, and branch names.
pub(crate) fn get_commit_query() -> String {
    format!("SELECT DISTINCT {COMMIT_FIELDS}\n    FROM commits commit{COMMIT_JOINS}")
}

/// Filter over the closed set of filterable commit fields. Non-empty
/// fields are conjuncted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommitFilter {
    /// Match `repo.name`.
    #[serde(default)]
    pub repo_name: Option<String>,
    /// Match `repo.type`.
    #[serde(default)]
    pub repo_type: Option<String>,
    /// Match `repo.project.name`.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Match the commit-set id.
    #[serde(default)]
    pub commit_set_id: Option<String>,
    /// Match `branch.name`.
    #[serde(default)]
    pub branch_name: Option<String>,
}

impl CommitFilter {
    /// Whether no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.repo_name.is_none()
            && self.repo_type.is_none()
            && self.project_name.is_none()
            && self.commit_set_id.is_none()
            && self.branch_name.is_none()
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// The closed set of orderable commit columns. Specific field names for
/// type safety, so a library user cannot misconfigure the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CommitColumn {
    /// `commit.int_id`
    IntId,
    /// `commit.commit_set_id`
    CommitSetId,
    /// `commit.repo_id`
    RepoId,
    /// `commit.origin`
    Origin,
    /// `commit.created_at`
    CreatedAt,
    /// `commit.updated_at`
    UpdatedAt,
}

impl CommitColumn {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::IntId => "commit.int_id",
            Self::CommitSetId => "commit.commit_set_id",
            Self::RepoId => "commit.repo_id",
            Self::Origin => "commit.origin",
            Self::CreatedAt => "commit.created_at",
            Self::UpdatedAt => "commit.updated_at",
        }
    }
}

/// One ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderBy {
    /// Column to order by.
    pub column: CommitColumn,
    /// Direction.
    pub order: SortOrder,
}

impl OrderBy {
    /// Ascending order on `column`.
    #[must_use]
    pub const fn asc(column: CommitColumn) -> Self {
        Self {
            column,
            order: SortOrder::Asc,
        }
    }

    /// Descending order on `column`.
    #[must_use]
    pub const fn desc(column: CommitColumn) -> Self {
        Self {
            column,
            order: SortOrder::Desc,
        }
    }
}

/// Render the ORDER BY clause. Defaults to `int_id ASC`; when the caller
/// orders by other columns, `int_id ASC` is appended as the tie-breaker so
/// the scan stays deterministic.
fn order_by_clause(order_bys: &[OrderBy]) -> String {
    if order_bys.is_empty() {
        return "ORDER BY commit.int_id ASC".to_owned();
    }
    let mut terms: Vec<String> = order_bys
        .iter()
        .map(|order_by| format!("{} {}", order_by.column.as_sql(), order_by.order.as_sql()))
        .collect();
    if !order_bys
        .iter()
        .any(|order_by| order_by.column == CommitColumn::IntId)
    {
        terms.push("commit.int_id ASC".to_owned());
    }
    format!("ORDER BY {}", terms.join(", "))
}

/// A bound query parameter.
#[derive(Debug, Clone)]
pub(crate) enum Bind {
    Text(String),
    Int(i64),
}

/// Offset/limit paging over a prepared commit query.
#[derive(Debug)]
pub(crate) struct PageIterator {
    query: String,
    binds: Vec<Bind>,
    page_size: u64,
    page: u64,
    buffer: std::vec::IntoIter<CommitRow>,
    revision: i64,
    exhausted: bool,
}

impl PageIterator {
    pub(crate) fn new(query: String, binds: Vec<Bind>, start_page: u64, page_size: u64) -> Self {
        Self {
            query,
            binds,
            page_size,
            page: start_page,
            buffer: Vec::new().into_iter(),
            revision: 0,
            exhausted: false,
        }
    }

    /// The next row and its revision, fetching the next page when the
    /// buffered one is drained.
    pub(crate) async fn next_row(
        &mut self,
        conn: &mut PgConnection,
    ) -> Result<Option<(CommitRow, i64)>, StoreError> {
        loop {
            if let Some(row) = self.buffer.next() {
                let revision = self.revision;
                self.revision += 1;
                return Ok(Some((row, revision)));
            }
            if self.exhausted {
                return Ok(None);
            }
            let statement = format!(
                "{} LIMIT {} OFFSET {}",
                self.query,
                self.page_size,
                self.page.saturating_mul(self.page_size)
            );
            let mut query = sqlx::query_as::<_, CommitRow>(&statement);
            for bind in &self.binds {
                query = match bind {
                    Bind::Text(value) => query.bind(value.clone()),
                    Bind::Int(value) => query.bind(*value),
                };
            }
            let rows = query.fetch_all(&mut *conn).await?;
            self.page += 1;
            if (rows.len() as u64) < self.page_size {
                self.exhausted = true;
            }
            if rows.is_empty() {
                return Ok(None);
            }
            self.buffer = rows.into_iter();
        }
    }
}

/// Iterator yielding fully assembled commits page by page.
#[derive(Debug)]
pub struct CommitIterator {
    paginator: PageIterator,
}

impl CommitIterator {
    /// The next commit in the scan, with relatives populated.
    ///
    /// # Errors
    /// Errors if a page query or relative assembly fails.
    pub async fn next(&mut self, conn: &mut PgConnection) -> Result<Option<Commit>, StoreError> {
        let Some((row, revision)) = self.paginator.next_row(conn).await? else {
            return Ok(None);
        };
        let (info, related) = manager::get_commit_from_commit_row(conn, &row).await?;
        Ok(Some(Commit {
            id: row.int_id,
            info,
            revision,
            related,
        }))
    }
}

/// Build an iterator over all commits matching `filter` in `order_bys`
/// order, starting from `start_page`.
#[must_use]
pub fn new_commits_iterator(
    filter: &CommitFilter,
    order_bys: &[OrderBy],
    start_page: u64,
    page_size: u64,
) -> CommitIterator {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();
    let mut condition = |column: &str, value: &Option<String>| {
        if let Some(value) = value {
            binds.push(Bind::Text(value.clone()));
            conditions.push(format!("{column} = ${}", binds.len()));
        }
    };
    condition("repo.name", &filter.repo_name);
    condition("repo.type", &filter.repo_type);
    condition("project.name", &filter.project_name);
    condition("commit.commit_set_id", &filter.commit_set_id);
    condition("branch.name", &filter.branch_name);
    let mut query = get_commit_query();
    if !conditions.is_empty() {
        query.push_str("\n    WHERE ");
        query.push_str(&conditions.join(" AND "));
    }
    query.push_str("\n    ");
    query.push_str(&order_by_clause(order_bys));
    CommitIterator {
        paginator: PageIterator::new(query, binds, start_page, page_size),
    }
}

/// Optimized iterator over the commits of a single repo, `int_id ASC`.
pub(crate) fn commits_in_repo_iterator(repo_id: RepoId, page_size: u64) -> CommitIterator {
    let query = format!(
        "{}\n    WHERE commit.repo_id = $1\n    ORDER BY commit.int_id ASC",
        get_commit_query()
    );
    CommitIterator {
        paginator: PageIterator::new(query, vec![Bind::Int(repo_id)], 0, page_size),
    }
}

/// Iterate commits matching `filter` on a pooled connection, page size
/// [`OPEN_ITERATION_PAGE_SIZE`].
///
/// # Errors
/// Errors if a page query fails or the callback returns an error.
pub async fn for_each_commit<F>(
    db: &DatabaseConnection,
    filter: &CommitFilter,
    order_bys: &[OrderBy],
    mut cb: F,
) -> Result<(), StoreError>
where
    F: FnMut(Commit) -> Result<ControlFlow<()>, StoreError> + Send,
{
    let mut iter = new_commits_iterator(filter, order_bys, 0, OPEN_ITERATION_PAGE_SIZE);
    let mut conn = db.pool.acquire().await?;
    while let Some(commit) = iter.next(&mut conn).await? {
        if cb(commit)?.is_break() {
            break;
        }
    }
    Ok(())
}

/// Iterate commits matching a non-empty `filter` inside a transaction,
/// page size [`COMMITS_PAGE_SIZE`].
///
/// # Errors
/// Errors with `CommitMissingInfo` when the filter is empty, and otherwise
/// as [`for_each_commit`] does.
pub async fn for_each_commit_tx_by_filter<F>(
    tx: &mut DatabaseTransaction,
    filter: &CommitFilter,
    order_bys: &[OrderBy],
    mut cb: F,
) -> Result<(), StoreError>
where
    F: FnMut(Commit) -> Result<ControlFlow<()>, StoreError> + Send,
{
    if filter.is_empty() {
        return Err(StoreError::CommitMissingInfo { field: "filter" });
    }
    let mut iter = new_commits_iterator(filter, order_bys, 0, COMMITS_PAGE_SIZE);
    while let Some(commit) = iter.next(&mut tx.tx).await? {
        if cb(commit)?.is_break() {
            break;
        }
    }
    Ok(())
}
