//! The commit model: the atomic unit of the commit graph, its key codec,
//! and the managers, engines, and services layered on top of it.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::db::errors::StoreError;
use crate::db::models::branch::BranchId;
use crate::db::models::repo::RepoId;

pub mod ancestry;
pub mod iterator;
pub mod manager;
pub mod picker;
pub mod watch;

use self::iterator::{CommitFilter, OrderBy};

/// Internal id of a commit row. Dense, assigned on insert, never reused.
pub type CommitId = i64;

/// Trait for managing commits on a pooled connection.
#[async_trait]
pub trait Manager {
    /// Iterate all commits matching `filter` in `order_bys` order, calling
    /// `cb` for each. The callback may stop iteration early by returning
    /// `ControlFlow::Break`.
    async fn for_each_commit<F>(
        &self,
        filter: &CommitFilter,
        order_bys: Vec<OrderBy>,
        cb: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(Commit) -> Result<ControlFlow<()>, StoreError> + Send;
}

/// Trait for managing transactional commits.
#[async_trait]
pub trait TxManager {
    /// Create a commit, linking its parent and children unless the ancestry
    /// options skip them. Returns the new internal id.
    async fn create_commit(
        &mut self,
        info: &CommitInfo,
        opts: AncestryOpt,
    ) -> Result<CommitId, StoreError>;
    /// Delete a commit, repointing its children at its parent.
    async fn delete_commit(&mut self, handle: &CommitHandle) -> Result<(), StoreError>;
    /// Resolve the internal id of a commit by key.
    async fn get_commit_id(&mut self, handle: &CommitHandle) -> Result<CommitId, StoreError>;
    /// Fetch a commit with relatives populated, by internal id.
    async fn get_commit(&mut self, id: CommitId) -> Result<Commit, StoreError>;
    /// Fetch just the commit info, by internal id.
    async fn get_commit_info(&mut self, id: CommitId) -> Result<CommitInfo, StoreError>;
    /// Fetch a commit with relatives populated, by key.
    async fn get_commit_by_key(&mut self, handle: &CommitHandle) -> Result<Commit, StoreError>;
    /// Fetch just the commit info, by key.
    async fn get_commit_info_by_key(
        &mut self,
        handle: &CommitHandle,
    ) -> Result<CommitInfo, StoreError>;
    /// The parent of a commit, by the child's internal id.
    async fn get_commit_parent(&mut self, id: CommitId) -> Result<CommitHandle, StoreError>;
    /// The children of a commit, by the parent's internal id.
    async fn get_commit_children(&mut self, id: CommitId)
        -> Result<Vec<CommitHandle>, StoreError>;
    /// Update only the branch association of a commit.
    async fn update_commit_branch(
        &mut self,
        id: CommitId,
        branch_id: BranchId,
    ) -> Result<(), StoreError>;
    /// Mark a commit as finishing.
    async fn finishing_commit(
        &mut self,
        id: CommitId,
        finishing_time: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<(), StoreError>;
    /// Mark a commit as finished, recording its details.
    async fn finish_commit(
        &mut self,
        id: CommitId,
        finished_time: Option<DateTime<Utc>>,
        error: &str,
        details: &CommitDetails,
    ) -> Result<(), StoreError>;
    /// Replace the metadata map of a commit.
    async fn update_commit_metadata(
        &mut self,
        id: CommitId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
    /// Replace the description of a commit.
    async fn update_description(
        &mut self,
        id: CommitId,
        description: &str,
    ) -> Result<(), StoreError>;
    /// List all commits matching `filter`, which must be non-empty.
    async fn list_commits(
        &mut self,
        filter: &CommitFilter,
        order_bys: Vec<OrderBy>,
    ) -> Result<Vec<Commit>, StoreError>;
}

/// Identity of a repo as carried inside commit handles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoHandle {
    /// Project name.
    pub project: String,
    /// Repo name.
    pub name: String,
    /// Repo type, e.g. `user`.
    #[serde(rename = "type")]
    pub repo_type: String,
}

impl RepoHandle {
    /// Create a new repo handle.
    #[must_use]
    pub fn new(project: &str, name: &str, repo_type: &str) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            repo_type: repo_type.into(),
        }
    }
}

/// Stable external identity of a commit. Two commits are the same commit
/// iff their keys are equal.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitHandle {
    /// The repo the commit lives in.
    pub repo: RepoHandle,
    /// The commit-set id, grouping commits created together across repos.
    pub id: String,
    /// The branch the commit was created on, if any.
    #[serde(default)]
    pub branch: Option<String>,
}

impl CommitHandle {
    /// Create a new commit handle.
    #[must_use]
    pub const fn new(repo: RepoHandle, id: String) -> Self {
        Self {
            repo,
            id,
            branch: None,
        }
    }

    /// The canonical key, `"<project>/<repo>.<type>@<commit-set-id>"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}.{}@{}",
            self.repo.project, self.repo.name, self.repo.repo_type, self.id
        )
    }

    /// Parse a canonical key back into a handle. The branch component is
    /// not part of the key and comes back as `None`.
    ///
    /// # Errors
    /// Errors with `InvalidCommitKey` when the key does not have the
    /// `"<project>/<repo>.<type>@<commit-set-id>"` shape.
    pub fn parse_key(key: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidCommitKey { key: key.into() };
        let (path, id) = key.rsplit_once('@').ok_or_else(invalid)?;
        let (project, repo_full) = path.split_once('/').ok_or_else(invalid)?;
        let (name, repo_type) = repo_full.rsplit_once('.').ok_or_else(invalid)?;
        if project.is_empty() || name.is_empty() || repo_type.is_empty() || id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            repo: RepoHandle::new(project, name, repo_type),
            id: id.into(),
            branch: None,
        })
    }
}

// Identity is the key; the branch a commit was created on is not part of
// it.
impl PartialEq for CommitHandle {
    fn eq(&self, other: &Self) -> bool {
        self.repo == other.repo && self.id == other.id
    }
}

impl Eq for CommitHandle {}

impl fmt::Display for CommitHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.key())
    }
}

/// Provenance tag of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Origin not recorded.
    #[default]
    Unknown,
    /// Created by a user action.
    User,
    /// Created by the system while processing.
    Auto,
    /// Created during repair.
    Fsck,
}

impl Origin {
    /// The storage spelling of the origin kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::User => "USER",
            Self::Auto => "AUTO",
            Self::Fsck => "FSCK",
        }
    }
}

impl FromStr for Origin {
    type Err = StoreError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind.to_uppercase().as_str() {
            "UNKNOWN" => Ok(Self::Unknown),
            "USER" => Ok(Self::User),
            "AUTO" => Ok(Self::Auto),
            "FSCK" => Ok(Self::Fsck),
            _ => Err(StoreError::InvalidOrigin { kind: kind.into() }),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.as_str())
    }
}

/// Sizing details recorded when a commit finishes. Absent details are the
/// zero-value record, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommitDetails {
    /// Time spent compacting.
    #[serde(default)]
    pub compacting: Duration,
    /// Time spent validating.
    #[serde(default)]
    pub validating: Duration,
    /// Total size of the commit in bytes.
    #[serde(default)]
    pub size_bytes: i64,
}

/// Full domain view of a commit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitInfo {
    /// Identity of the commit.
    pub commit: CommitHandle,
    /// Provenance tag.
    #[serde(default)]
    pub origin: Origin,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Parent commit, `None` when the commit is the root of its repo.
    #[serde(default)]
    pub parent_commit: Option<CommitHandle>,
    /// Child commits, empty when the commit is the head of a branch.
    #[serde(default)]
    pub child_commits: Vec<CommitHandle>,
    /// When the commit was started.
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    /// When the commit entered the finishing phase.
    #[serde(default)]
    pub finishing: Option<DateTime<Utc>>,
    /// When the commit finished.
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    /// Commits in other repos this commit directly depends on.
    #[serde(default)]
    pub direct_provenance: Vec<CommitHandle>,
    /// Commits in other repos directly depending on this commit.
    #[serde(default)]
    pub direct_subvenance: Vec<CommitHandle>,
    /// Sizing details.
    #[serde(default)]
    pub details: CommitDetails,
    /// Error recorded while finishing, empty when none.
    #[serde(default)]
    pub error: String,
    /// Opaque caller-owned metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// The principal that created the commit, if recorded.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Row creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Row update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CommitInfo {
    /// A started commit with everything else defaulted.
    #[must_use]
    pub fn new(commit: CommitHandle, origin: Origin) -> Self {
        Self {
            commit,
            origin,
            description: String::new(),
            parent_commit: None,
            child_commits: Vec::new(),
            started: None,
            finishing: None,
            finished: None,
            direct_provenance: Vec::new(),
            direct_subvenance: Vec::new(),
            details: CommitDetails::default(),
            error: String::new(),
            metadata: BTreeMap::new(),
            created_by: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Internal ids of a commit's relatives, populated by assembly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelatedCommits {
    /// Parent id, `None` for roots.
    pub parent_id: Option<CommitId>,
    /// Child ids.
    pub children_ids: Vec<CommitId>,
    /// Depth-1 provenance ids.
    pub direct_provenant_ids: Vec<CommitId>,
    /// Depth-1 subvenance ids.
    pub direct_subvenant_ids: Vec<CommitId>,
}

/// A commit together with its internal id and, when yielded by an
/// iterator, its position in the scan.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Commit {
    /// Internal id.
    pub id: CommitId,
    /// Full domain view.
    pub info: CommitInfo,
    /// Monotonically increasing scan position; 0 outside iteration.
    pub revision: i64,
    /// Relative ids.
    pub related: RelatedCommits,
}

/// Options to create commits without their ancestry, so that commits may be
/// created in an arbitrary order and linked later.
#[derive(Debug, Clone, Copy, Default)]
pub struct AncestryOpt {
    /// Do not link the children named by the commit info.
    pub skip_children: bool,
    /// Do not link the parent named by the commit info.
    pub skip_parent: bool,
}

/// Database row shape of a commit, joined with its repo, project, and
/// branch names.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CommitRow {
    /// Internal id.
    pub int_id: CommitId,
    /// Canonical key.
    pub commit_id: String,
    /// Commit-set id.
    pub commit_set_id: String,
    /// Foreign key reference to the repo.
    pub repo_id: RepoId,
    /// Foreign key reference to the branch, nullable.
    pub branch_id: Option<BranchId>,
    /// Origin kind as stored.
    pub origin: String,
    /// Description.
    pub description: String,
    /// Start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Finishing time.
    pub finishing_time: Option<DateTime<Utc>>,
    /// Finished time.
    pub finished_time: Option<DateTime<Utc>>,
    /// Compacting duration in nanoseconds.
    pub compacting_time_s: i64,
    /// Validating duration in nanoseconds.
    pub validating_time_s: i64,
    /// Size in bytes.
    pub size: i64,
    /// Recorded error.
    pub error: String,
    /// Metadata map.
    pub metadata: Json<BTreeMap<String, String>>,
    /// Creating principal, nullable.
    pub created_by: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row update time.
    pub updated_at: DateTime<Utc>,
    /// Joined repo name.
    pub repo_name: String,
    /// Joined repo type.
    pub repo_type: String,
    /// Joined project name.
    pub project_name: String,
    /// Joined branch name, nullable.
    pub branch_name: Option<String>,
}

impl CommitRow {
    /// The commit handle this row denotes.
    #[must_use]
    pub fn handle(&self) -> CommitHandle {
        CommitHandle {
            repo: RepoHandle::new(&self.project_name, &self.repo_name, &self.repo_type),
            id: self.commit_set_id.clone(),
            branch: self.branch_name.clone(),
        }
    }

    /// Decode the row into a commit info without relatives.
    ///
    /// # Errors
    /// Errors with `InvalidOrigin` when the stored origin kind is outside
    /// the enumerated set.
    pub fn parse_commit_info(&self) -> Result<CommitInfo, StoreError> {
        Ok(CommitInfo {
            commit: self.handle(),
            origin: self.origin.parse()?,
            description: self.description.clone(),
            parent_commit: None,
            child_commits: Vec::new(),
            started: self.start_time,
            finishing: self.finishing_time,
            finished: self.finished_time,
            direct_provenance: Vec::new(),
            direct_subvenance: Vec::new(),
            details: CommitDetails {
                compacting: duration_from_nanos(self.compacting_time_s),
                validating: duration_from_nanos(self.validating_time_s),
                size_bytes: self.size,
            },
            error: self.error.clone(),
            metadata: self.metadata.0.clone(),
            created_by: self.created_by.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        })
    }
}

/// Reject structurally incomplete commit infos. The commit-set id, repo
/// name, and project name are the identity of a commit; an empty one means
/// the caller never filled the handle in.
pub(crate) fn validate_commit_info(info: &CommitInfo) -> Result<(), StoreError> {
    if info.commit.id.is_empty() {
        return Err(StoreError::CommitMissingInfo { field: "commit" });
    }
    if info.commit.repo.name.is_empty() {
        return Err(StoreError::CommitMissingInfo { field: "repo" });
    }
    if info.commit.repo.project.is_empty() {
        return Err(StoreError::CommitMissingInfo { field: "project" });
    }
    Ok(())
}

/// Durations persist as nanosecond BIGINTs; negative stored values decode
/// to zero.
pub(crate) fn duration_from_nanos(nanos: i64) -> Duration {
    u64::try_from(nanos).map_or(Duration::ZERO, Duration::from_nanos)
}

/// Saturating inverse of [`duration_from_nanos`].
pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        duration_from_nanos, duration_to_nanos, validate_commit_info, CommitDetails, CommitHandle,
        CommitInfo, Origin, RepoHandle,
    };
    use crate::db::errors::StoreError;

    fn handle() -> CommitHandle {
        CommitHandle::new(RepoHandle::new("default", "images", "user"), "7f2c".into())
    }

    #[test]
    fn test_commit_key_when_formatted_expect_canonical_shape() {
        assert_eq!(handle().key(), "default/images.user@7f2c");
    }

    #[test]
    fn test_commit_key_when_parsed_expect_round_trip() {
        let parsed = CommitHandle::parse_key("default/images.user@7f2c").unwrap();
        assert_eq!(parsed, handle());
        assert_eq!(parsed.key(), "default/images.user@7f2c");
    }

    #[test]
    fn test_commit_handle_equality_when_branches_differ_expect_equal() {
        let mut on_branch = handle();
        on_branch.branch = Some("master".into());
        assert_eq!(on_branch, handle());
    }

    #[test]
    fn test_commit_key_when_malformed_expect_invalid_key() {
        for key in ["", "no-separators", "default/images.user", "a/b@c", "/x.y@z"] {
            let err = CommitHandle::parse_key(key).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidCommitKey { .. }),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn test_origin_when_known_kind_expect_round_trip() {
        for origin in [Origin::Unknown, Origin::User, Origin::Auto, Origin::Fsck] {
            assert_eq!(origin.as_str().parse::<Origin>().unwrap(), origin);
        }
        assert_eq!("user".parse::<Origin>().unwrap(), Origin::User);
    }

    #[test]
    fn test_origin_when_unknown_kind_expect_invalid_origin() {
        let err = "MERGE".parse::<Origin>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidOrigin { ref kind } if kind == "MERGE"));
    }

    #[test]
    fn test_commit_info_when_details_absent_expect_zero_value() {
        let json = r#"{"commit": {"repo": {"project": "default", "name": "images", "type": "user"}, "id": "7f2c"}, "origin": "USER"}"#;
        let info: CommitInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.details, CommitDetails::default());
        assert_eq!(info.origin, Origin::User);
    }

    #[test]
    fn test_validate_commit_info_when_identity_missing_expect_missing_field() {
        let mut info = CommitInfo::new(handle(), Origin::User);
        info.commit.repo.name = String::new();
        let err = validate_commit_info(&info).unwrap_err();
        assert!(matches!(err, StoreError::CommitMissingInfo { field: "repo" }));

        let mut info = CommitInfo::new(handle(), Origin::User);
        info.commit.id = String::new();
        let err = validate_commit_info(&info).unwrap_err();
        assert!(matches!(err, StoreError::CommitMissingInfo { field: "commit" }));
    }

    #[test]
    fn test_duration_nanos_when_converted_expect_round_trip() {
        let duration = Duration::from_millis(1500);
        assert_eq!(duration_from_nanos(duration_to_nanos(duration)), duration);
        assert_eq!(duration_from_nanos(-5), Duration::ZERO);
    }
}
