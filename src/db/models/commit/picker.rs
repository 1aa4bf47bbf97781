//! Picker resolver: symbolic commit references resolved against the
//! transaction's snapshot. Resolution is a pure function of the picker and
//! the database state.
use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::db::errors::StoreError;
use crate::db::models::branch::{self, BranchPicker};
use crate::db::models::repo::{self, RepoPicker};
use crate::db::DatabaseTransaction;

use super::ancestry::for_each_commit_ancestor_until_root;
use super::{manager, Commit, CommitHandle, CommitId, RepoHandle};

/// A symbolic reference to a commit. The enum is closed: the wire boundary
/// ([`CommitPicker::from_json`]) rejects unknown variants explicitly
/// instead of silently resolving to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPicker {
    /// A commit named by repo and commit-set id.
    GlobalId {
        /// The repo the commit lives in.
        repo: RepoPicker,
        /// The commit-set id.
        id: String,
    },
    /// The head commit of a branch.
    BranchHead(BranchPicker),
    /// The `offset`-th ancestor of another picked commit.
    AncestorOf {
        /// Picker for the commit the walk starts from.
        start: Box<CommitPicker>,
        /// How many parent edges to walk; 0 is the start commit itself.
        offset: u32,
    },
    /// The commit `offset` edges above the root of a branch.
    BranchRoot {
        /// The branch whose root anchors the walk.
        branch: BranchPicker,
        /// How many edges above the root; 0 is the root itself.
        offset: u32,
    },
}

impl CommitPicker {
    /// Decode a picker from its JSON wire form.
    ///
    /// # Errors
    /// Errors with `InvalidPicker` when the input is malformed or names an
    /// unknown picker variant.
    pub fn from_json(input: &str) -> Result<Self, StoreError> {
        serde_json::from_str(input).map_err(|err| StoreError::InvalidPicker {
            reason: err.to_string(),
        })
    }
}

/// Resolve a picker to a concrete commit within `tx`.
///
/// # Errors
/// Errors with `InvalidPickerOffset` when an ancestry walk ends before the
/// requested offset, and with the usual lookup errors otherwise.
pub fn pick_commit<'a>(
    tx: &'a mut DatabaseTransaction,
    picker: &'a CommitPicker,
) -> Pin<Box<dyn Future<Output = Result<Commit, StoreError>> + Send + 'a>> {
    Box::pin(async move {
        match picker {
            CommitPicker::GlobalId { repo, id } => pick_commit_global_id(tx, repo, id).await,
            CommitPicker::BranchHead(branch) => pick_commit_branch_head(tx, branch).await,
            CommitPicker::AncestorOf { start, offset } => {
                pick_commit_ancestor_of(tx, start, *offset).await
            }
            CommitPicker::BranchRoot { branch, offset } => {
                pick_commit_branch_root(tx, branch, *offset).await
            }
        }
    })
}

async fn pick_commit_global_id(
    tx: &mut DatabaseTransaction,
    picker: &RepoPicker,
    id: &str,
) -> Result<Commit, StoreError> {
    let repo = repo::manager::get_repo_by_name(
        &mut tx.tx,
        &picker.project,
        &picker.name,
        &picker.repo_type,
    )
    .await?;
    let handle = CommitHandle::new(
        RepoHandle::new(&picker.project, &repo.name, &repo.repo_type),
        id.to_owned(),
    );
    let row = manager::get_commit_row_by_key(&mut tx.tx, &handle).await?;
    let (info, related) = manager::get_commit_from_commit_row(&mut tx.tx, &row).await?;
    Ok(Commit {
        id: row.int_id,
        info,
        revision: 0,
        related,
    })
}

async fn pick_commit_branch_head(
    tx: &mut DatabaseTransaction,
    picker: &BranchPicker,
) -> Result<Commit, StoreError> {
    let branch = branch::manager::pick_branch(&mut tx.tx, picker).await?;
    let head = branch.head.ok_or(StoreError::CommitNotFound {
        int_id: None,
        commit_key: None,
    })?;
    manager::get_commit(&mut tx.tx, head).await
}

async fn pick_commit_ancestor_of(
    tx: &mut DatabaseTransaction,
    start: &CommitPicker,
    offset: u32,
) -> Result<Commit, StoreError> {
    let start_commit = pick_commit(tx, start).await?;
    if offset == 0 {
        return Ok(start_commit);
    }
    let mut walked: u32 = 0;
    let mut commit_ptr = start_commit.id;
    for_each_commit_ancestor_until_root(&mut tx.tx, start_commit.id, |parent, _child| {
        if walked == offset {
            return Ok(ControlFlow::Break(()));
        }
        commit_ptr = parent;
        walked += 1;
        Ok(ControlFlow::Continue(()))
    })
    .await?;
    if walked != offset {
        return Err(StoreError::InvalidPickerOffset {
            commit_key: start_commit.info.commit.key(),
            requested: offset,
            traversable: walked,
        });
    }
    manager::get_commit(&mut tx.tx, commit_ptr).await
}

async fn pick_commit_branch_root(
    tx: &mut DatabaseTransaction,
    branch: &BranchPicker,
    offset: u32,
) -> Result<Commit, StoreError> {
    let head_commit = pick_commit_branch_head(tx, branch).await?;
    let mut path_to_root: VecDeque<CommitId> = VecDeque::new();
    path_to_root.push_back(head_commit.id);
    let mut depth_to_root: u32 = 1;
    for_each_commit_ancestor_until_root(&mut tx.tx, head_commit.id, |parent, _child| {
        path_to_root.push_back(parent);
        depth_to_root = depth_to_root.saturating_add(1);
        // +1 here handles the case where offset is 0. When the window is
        // full, drop the first item.
        if path_to_root.len() as u64 > u64::from(offset) + 1 {
            path_to_root.pop_front();
        }
        Ok(ControlFlow::Continue(()))
    })
    .await?;
    // The walk visits depth_to_root nodes, so the deepest resolvable
    // offset is depth_to_root - 1 edges above the root.
    if depth_to_root <= offset {
        return Err(StoreError::InvalidPickerOffset {
            commit_key: head_commit.info.commit.key(),
            requested: offset,
            traversable: depth_to_root - 1,
        });
    }
    let Some(&root_id) = path_to_root.front() else {
        return Err(StoreError::CommitNotFound {
            int_id: None,
            commit_key: Some(head_commit.info.commit.key()),
        });
    };
    manager::get_commit(&mut tx.tx, root_id).await
}

#[cfg(test)]
mod tests {
    use super::CommitPicker;
    use crate::db::errors::{Status, StoreError};

    #[test]
    fn test_picker_from_json_when_ancestor_of_expect_nested_decode() {
        let input = r#"{
            "ancestor_of": {
                "start": {
                    "global_id": {
                        "repo": {"project": "default", "name": "images", "type": "user"},
                        "id": "7f2c"
                    }
                },
                "offset": 2
            }
        }"#;
        let picker = CommitPicker::from_json(input).unwrap();
        let CommitPicker::AncestorOf { start, offset } = picker else {
            panic!("wrong variant");
        };
        assert_eq!(offset, 2);
        assert!(matches!(*start, CommitPicker::GlobalId { .. }));
    }

    #[test]
    fn test_picker_from_json_when_branch_head_expect_decode() {
        let input = r#"{
            "branch_head": {
                "repo": {"project": "default", "name": "images", "type": "user"},
                "name": "master"
            }
        }"#;
        let picker = CommitPicker::from_json(input).unwrap();
        assert!(matches!(picker, CommitPicker::BranchHead(_)));
    }

    #[test]
    fn test_picker_from_json_when_unknown_variant_expect_invalid_argument() {
        let err = CommitPicker::from_json(r#"{"tag_head": {"name": "v1"}}"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPicker { .. }));
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    #[test]
    fn test_picker_from_json_when_garbage_expect_invalid_argument() {
        let err = CommitPicker::from_json("not json").unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
    }
}
