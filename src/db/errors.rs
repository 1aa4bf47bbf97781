//! Typed store errors. Every variant carries a stable status code so that
//! callers and transports can map failures without string matching.

use thiserror::Error;

use crate::db::models::commit::CommitId;

/// Stable status code attached to every [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The referenced commit, relative, repo, project, or branch is absent.
    NotFound,
    /// A commit with the same key already exists.
    AlreadyExists,
    /// The input is structurally incomplete or carries an invalid origin.
    FailedPrecondition,
    /// The picker is malformed.
    InvalidArgument,
    /// Everything else, including wrapped database errors.
    Internal,
}

impl Status {
    /// Stable wire name for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::FailedPrecondition => "failed_precondition",
            Self::InvalidArgument => "invalid_argument",
            Self::Internal => "internal",
        }
    }
}

/// Errors returned by the commit graph store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The commit does not exist.
    #[error("commit (int_id={int_id:?}, commit_id={commit_key:?}) not found")]
    CommitNotFound {
        /// Internal row id, when the lookup was by id.
        int_id: Option<CommitId>,
        /// Commit key, when the lookup was by key.
        commit_key: Option<String>,
    },

    /// The parent referenced while linking a child does not exist.
    #[error("parent commit of commit (int_id={child_id}) not found")]
    ParentCommitNotFound {
        /// The child whose parent was being linked.
        child_id: CommitId,
    },

    /// A child referenced while linking a parent does not exist.
    #[error("child commit of commit (int_id={parent_id}) not found")]
    ChildCommitNotFound {
        /// The parent whose children were being linked.
        parent_id: CommitId,
    },

    /// A required commit field is empty.
    #[error("commit.{field} is missing")]
    CommitMissingInfo {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A commit with the same key already exists.
    #[error("commit {commit_key} already exists")]
    CommitAlreadyExists {
        /// The conflicting key.
        commit_key: String,
    },

    /// The origin kind read from storage is outside the enumerated set.
    #[error("invalid origin: {kind}")]
    InvalidOrigin {
        /// The offending kind.
        kind: String,
    },

    /// The repo referenced by a commit key or picker does not exist.
    #[error("repo {project}/{name}.{repo_type} not found")]
    RepoNotFound {
        /// Project name.
        project: String,
        /// Repo name.
        name: String,
        /// Repo type.
        repo_type: String,
    },

    /// The project referenced by a commit key or picker does not exist.
    #[error("project {name} not found")]
    ProjectNotFound {
        /// Project name.
        name: String,
    },

    /// The branch referenced by a picker does not exist.
    #[error("branch {name} (repo_id={repo_id:?}) not found")]
    BranchNotFound {
        /// Internal id of the branch's repo, when known.
        repo_id: Option<i64>,
        /// Branch name or id descriptor.
        name: String,
    },

    /// The notification channel closed underneath a watcher.
    #[error("watcher closed")]
    WatcherClosed,

    /// An ancestry walk ended before reaching the requested offset.
    #[error(
        "invalid offset for commit {commit_key}: requested {requested}, traversable {traversable}"
    )]
    InvalidPickerOffset {
        /// Key of the commit the walk started from.
        commit_key: String,
        /// Offset the picker asked for.
        requested: u32,
        /// How far the walk actually got.
        traversable: u32,
    },

    /// The picker could not be decoded.
    #[error("invalid commit picker: {reason}")]
    InvalidPicker {
        /// Decoder diagnostic.
        reason: String,
    },

    /// A commit key string does not have the canonical shape.
    #[error("invalid commit key: {key}")]
    InvalidCommitKey {
        /// The offending key.
        key: String,
    },

    /// A notification event could not be understood.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the event.
        message: String,
    },

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// The stable status code for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::CommitNotFound { .. }
            | Self::ParentCommitNotFound { .. }
            | Self::ChildCommitNotFound { .. }
            | Self::RepoNotFound { .. }
            | Self::ProjectNotFound { .. }
            | Self::BranchNotFound { .. } => Status::NotFound,
            Self::CommitAlreadyExists { .. } => Status::AlreadyExists,
            Self::CommitMissingInfo { .. } | Self::InvalidOrigin { .. } => {
                Status::FailedPrecondition
            }
            Self::InvalidPicker { .. }
            | Self::InvalidPickerOffset { .. }
            | Self::InvalidCommitKey { .. } => Status::InvalidArgument,
            Self::WatcherClosed | Self::Protocol { .. } | Self::Database(_) => Status::Internal,
        }
    }
}

/// Whether `err` is a not-null violation on `column`. Ancestry inserts derive
/// relative ids by sub-select, so a missing relative surfaces as a NULL being
/// forced into the NOT NULL `parent` or `child` column.
#[must_use]
pub fn is_not_null_violation(err: &sqlx::Error, column: &str) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    if !matches!(db_err.kind(), sqlx::error::ErrorKind::NotNullViolation) {
        return false;
    }
    db_err
        .downcast_ref::<sqlx::postgres::PgDatabaseError>()
        .column()
        .is_some_and(|col| col == column)
}

#[cfg(test)]
mod tests {
    use super::{Status, StoreError};

    #[test]
    fn test_status_when_not_found_family_expect_not_found() {
        let errs = [
            StoreError::CommitNotFound {
                int_id: Some(7),
                commit_key: None,
            },
            StoreError::ParentCommitNotFound { child_id: 1 },
            StoreError::ChildCommitNotFound { parent_id: 1 },
            StoreError::ProjectNotFound {
                name: "default".into(),
            },
        ];
        for err in errs {
            assert_eq!(err.status(), Status::NotFound, "{err}");
        }
    }

    #[test]
    fn test_status_when_precondition_and_argument_expect_mapping() {
        assert_eq!(
            StoreError::CommitMissingInfo { field: "repo" }.status(),
            Status::FailedPrecondition
        );
        assert_eq!(
            StoreError::InvalidOrigin { kind: "BOGUS".into() }.status(),
            Status::FailedPrecondition
        );
        assert_eq!(
            StoreError::InvalidPicker {
                reason: "unknown variant".into()
            }
            .status(),
            Status::InvalidArgument
        );
        assert_eq!(
            StoreError::CommitAlreadyExists {
                commit_key: "default/images.user@7f2c".into()
            }
            .status(),
            Status::AlreadyExists
        );
        assert_eq!(StoreError::WatcherClosed.status(), Status::Internal);
    }

    #[test]
    fn test_status_names_expect_stable() {
        assert_eq!(Status::NotFound.as_str(), "not_found");
        assert_eq!(Status::FailedPrecondition.as_str(), "failed_precondition");
    }
}
