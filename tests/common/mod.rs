//! Shared helpers for the integration tests. The tests need a live
//! Postgres database; set `STRATA_TEST_DATABASE_URL` to run them, they
//! skip silently otherwise.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};

use strata::db::models::branch::TxManager as _;
use strata::db::models::commit::{CommitHandle, CommitInfo, Origin, RepoHandle};
use strata::db::models::project::TxManager as _;
use strata::db::models::repo::TxManager as _;
use strata::db::{init, DatabaseConnection};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// The test database URL, when configured.
pub fn test_database_url() -> Option<String> {
    std::env::var("STRATA_TEST_DATABASE_URL").ok()
}

/// Connect to the test database, or `None` to skip the test.
pub async fn connect() -> Option<DatabaseConnection> {
    let url = test_database_url()?;
    Some(
        init::connect(Some(&url))
            .await
            .expect("connecting to the test database"),
    )
}

/// A name that will not collide across test runs or parallel tests.
pub fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos}-{counter}")
}

/// Create a project and a `user`-typed repo inside their own transaction,
/// returning the repo's internal id.
pub async fn seed_repo(db: &DatabaseConnection, project: &str, repo: &str) -> i64 {
    let mut tx = db.begin().await.expect("begin");
    tx.create_project(project).await.expect("create project");
    let repo_id = tx
        .create_repo(project, repo, "user")
        .await
        .expect("create repo");
    tx.commit().await.expect("commit");
    repo_id
}

/// Create a branch in the given repo inside its own transaction.
pub async fn seed_branch(db: &DatabaseConnection, repo_id: i64, name: &str) -> i64 {
    let mut tx = db.begin().await.expect("begin");
    let branch_id = tx
        .create_branch(repo_id, name)
        .await
        .expect("create branch");
    tx.commit().await.expect("commit");
    branch_id
}

/// The handle `"<project>/<repo>.user@<set_id>"`.
pub fn handle(project: &str, repo: &str, set_id: &str) -> CommitHandle {
    CommitHandle::new(RepoHandle::new(project, repo, "user"), set_id.into())
}

/// A started USER commit for the given handle.
pub fn commit_info(project: &str, repo: &str, set_id: &str) -> CommitInfo {
    let mut info = CommitInfo::new(handle(project, repo, set_id), Origin::User);
    info.started = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    info
}
