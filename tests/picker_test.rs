//! Picker resolution against a live database. These tests skip unless
//! `STRATA_TEST_DATABASE_URL` is set.
mod common;

use strata::db::errors::{Status, StoreError};
use strata::db::models::branch::{BranchPicker, TxManager as _};
use strata::db::models::commit::picker::{pick_commit, CommitPicker};
use strata::db::models::commit::{AncestryOpt, CommitHandle, TxManager as _};
use strata::db::models::repo::RepoPicker;
use strata::db::DatabaseConnection;

fn repo_picker(project: &str, repo: &str) -> RepoPicker {
    RepoPicker {
        project: project.into(),
        name: repo.into(),
        repo_type: "user".into(),
    }
}

/// Create the chain c1 <- c2 <- c3 in a fresh repo and point `master` at
/// c3. Returns the repo's project name, the commit ids, and the handles.
async fn seed_chain(db: &DatabaseConnection, project: &str) -> (Vec<i64>, Vec<CommitHandle>) {
    let repo_id = common::seed_repo(db, project, "data").await;
    let branch_id = common::seed_branch(db, repo_id, "master").await;
    let mut tx = db.begin().await.unwrap();
    let mut ids = Vec::new();
    let mut handles = Vec::new();
    let mut previous: Option<CommitHandle> = None;
    for set_id in ["c1", "c2", "c3"] {
        let mut info = common::commit_info(project, "data", set_id);
        info.parent_commit = previous.clone();
        let id = tx.create_commit(&info, AncestryOpt::default()).await.unwrap();
        ids.push(id);
        handles.push(info.commit.clone());
        previous = Some(info.commit);
    }
    tx.update_branch_head(branch_id, *ids.last().unwrap())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    (ids, handles)
}

#[tokio::test]
async fn test_pick_commit_when_global_id_expect_commit() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    let (ids, handles) = seed_chain(&db, &project).await;

    let picker = CommitPicker::GlobalId {
        repo: repo_picker(&project, "data"),
        id: "c2".into(),
    };
    let mut tx = db.begin().await.unwrap();
    let commit = pick_commit(&mut tx, &picker).await.unwrap();
    assert_eq!(commit.id, ids[1]);
    assert_eq!(commit.info.commit.key(), handles[1].key());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_global_id_repo_missing_expect_repo_not_found() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    seed_chain(&db, &project).await;

    let picker = CommitPicker::GlobalId {
        repo: repo_picker(&project, "no-such-repo"),
        id: "c1".into(),
    };
    let mut tx = db.begin().await.unwrap();
    let err = pick_commit(&mut tx, &picker).await.unwrap_err();
    assert!(matches!(err, StoreError::RepoNotFound { .. }));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_branch_head_expect_head() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    let (ids, _) = seed_chain(&db, &project).await;

    let picker = CommitPicker::BranchHead(BranchPicker {
        repo: repo_picker(&project, "data"),
        name: "master".into(),
    });
    let mut tx = db.begin().await.unwrap();
    let commit = pick_commit(&mut tx, &picker).await.unwrap();
    assert_eq!(commit.id, ids[2]);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_branch_missing_expect_branch_not_found() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    seed_chain(&db, &project).await;

    let picker = CommitPicker::BranchHead(BranchPicker {
        repo: repo_picker(&project, "data"),
        name: "develop".into(),
    });
    let mut tx = db.begin().await.unwrap();
    let err = pick_commit(&mut tx, &picker).await.unwrap_err();
    assert!(matches!(err, StoreError::BranchNotFound { .. }));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_ancestor_offset_zero_expect_identity() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    let (ids, _) = seed_chain(&db, &project).await;

    let picker = CommitPicker::AncestorOf {
        start: Box::new(CommitPicker::GlobalId {
            repo: repo_picker(&project, "data"),
            id: "c3".into(),
        }),
        offset: 0,
    };
    let mut tx = db.begin().await.unwrap();
    let commit = pick_commit(&mut tx, &picker).await.unwrap();
    assert_eq!(commit.id, ids[2]);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_ancestor_of_expect_walk() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    let (ids, _) = seed_chain(&db, &project).await;

    let start = CommitPicker::GlobalId {
        repo: repo_picker(&project, "data"),
        id: "c3".into(),
    };
    let mut tx = db.begin().await.unwrap();
    let commit = pick_commit(
        &mut tx,
        &CommitPicker::AncestorOf {
            start: Box::new(start.clone()),
            offset: 2,
        },
    )
    .await
    .unwrap();
    assert_eq!(commit.id, ids[0]);

    let err = pick_commit(
        &mut tx,
        &CommitPicker::AncestorOf {
            start: Box::new(start),
            offset: 3,
        },
    )
    .await
    .unwrap_err();
    let StoreError::InvalidPickerOffset {
        requested,
        traversable,
        ..
    } = err
    else {
        panic!("expected InvalidPickerOffset, got {err}");
    };
    assert_eq!(requested, 3);
    assert_eq!(traversable, 2);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_pick_commit_when_branch_root_expect_oldest_in_window() {
    let Some(db) = common::connect().await else {
        return;
    };
    let project = common::unique("default");
    let (ids, _) = seed_chain(&db, &project).await;

    let branch = BranchPicker {
        repo: repo_picker(&project, "data"),
        name: "master".into(),
    };
    let mut tx = db.begin().await.unwrap();
    let root = pick_commit(
        &mut tx,
        &CommitPicker::BranchRoot {
            branch: branch.clone(),
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(root.id, ids[0]);

    let above_root = pick_commit(
        &mut tx,
        &CommitPicker::BranchRoot {
            branch: branch.clone(),
            offset: 1,
        },
    )
    .await
    .unwrap();
    assert_eq!(above_root.id, ids[1]);

    // offset 2 is the head itself, the deepest resolvable offset on a
    // three-commit chain; offset 3 is one past it.
    let head = pick_commit(
        &mut tx,
        &CommitPicker::BranchRoot {
            branch: branch.clone(),
            offset: 2,
        },
    )
    .await
    .unwrap();
    assert_eq!(head.id, ids[2]);

    let err = pick_commit(
        &mut tx,
        &CommitPicker::BranchRoot {
            branch: branch.clone(),
            offset: 3,
        },
    )
    .await
    .unwrap_err();
    let StoreError::InvalidPickerOffset {
        requested,
        traversable,
        ..
    } = err
    else {
        panic!("expected InvalidPickerOffset, got {err}");
    };
    assert_eq!(requested, 3);
    assert_eq!(traversable, 2);

    let err = pick_commit(
        &mut tx,
        &CommitPicker::BranchRoot { branch, offset: 5 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::InvalidPickerOffset { .. }));
    assert_eq!(err.status(), Status::InvalidArgument);
    tx.rollback().await.unwrap();
}
