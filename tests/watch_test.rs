//! Watch service behavior against a live database. These tests skip unless
//! `STRATA_TEST_DATABASE_URL` is set.
mod common;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use strata::db::errors::StoreError;
use strata::db::models::commit::watch::{
    watch_commit, watch_commits_in_repo, Listener, WatchHandler,
};
use strata::db::models::commit::{AncestryOpt, Commit, CommitId, TxManager as _};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Upsert(String),
    Delete(CommitId),
}

struct ChannelHandler(mpsc::UnboundedSender<Delivery>);

impl WatchHandler for ChannelHandler {
    fn on_upsert(&mut self, commit: Commit) -> Result<(), StoreError> {
        self.0
            .send(Delivery::Upsert(commit.info.commit.key()))
            .map_err(|_| StoreError::WatcherClosed)
    }

    fn on_delete(&mut self, id: CommitId) -> Result<(), StoreError> {
        self.0
            .send(Delivery::Delete(id))
            .map_err(|_| StoreError::WatcherClosed)
    }
}

async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a watch delivery")
        .expect("watch task ended")
}

#[tokio::test]
async fn test_watch_commits_in_repo_when_snapshot_then_delta_expect_order() {
    let Some(db) = common::connect().await else {
        return;
    };
    let url = common::test_database_url().unwrap();
    let project = common::unique("default");
    let repo_id = common::seed_repo(&db, &project, "data").await;

    // c1 exists before the subscription, c2 is created after it.
    let c1 = common::commit_info(&project, "data", "c1");
    let mut tx = db.begin().await.unwrap();
    tx.create_commit(&c1, AncestryOpt::default()).await.unwrap();
    tx.commit().await.unwrap();

    let listener = Listener::connect(&url).await.unwrap();
    let (deliveries, mut rx) = mpsc::unbounded_channel();
    let watcher_db = db.clone();
    let watcher = tokio::spawn(async move {
        let mut handler = ChannelHandler(deliveries);
        watch_commits_in_repo(&watcher_db, &listener, repo_id, &mut handler).await
    });

    assert_eq!(next_delivery(&mut rx).await, Delivery::Upsert(c1.commit.key()));

    let mut c2 = common::commit_info(&project, "data", "c2");
    c2.parent_commit = Some(c1.commit.clone());
    let mut tx = db.begin().await.unwrap();
    tx.create_commit(&c2, AncestryOpt::default()).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(next_delivery(&mut rx).await, Delivery::Upsert(c2.commit.key()));
    watcher.abort();
}

#[tokio::test]
async fn test_watch_commit_when_updated_and_deleted_expect_upsert_then_delete() {
    let Some(db) = common::connect().await else {
        return;
    };
    let url = common::test_database_url().unwrap();
    let project = common::unique("default");
    common::seed_repo(&db, &project, "data").await;

    let c1 = common::commit_info(&project, "data", "c1");
    let mut tx = db.begin().await.unwrap();
    let c1_id = tx.create_commit(&c1, AncestryOpt::default()).await.unwrap();
    tx.commit().await.unwrap();

    let listener = Listener::connect(&url).await.unwrap();
    let (deliveries, mut rx) = mpsc::unbounded_channel();
    let watcher_db = db.clone();
    let watcher = tokio::spawn(async move {
        let mut handler = ChannelHandler(deliveries);
        watch_commit(&watcher_db, &listener, c1_id, &mut handler).await
    });

    // Initial snapshot is the single commit.
    assert_eq!(next_delivery(&mut rx).await, Delivery::Upsert(c1.commit.key()));

    let mut tx = db.begin().await.unwrap();
    tx.update_description(c1_id, "updated").await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(next_delivery(&mut rx).await, Delivery::Upsert(c1.commit.key()));

    let mut tx = db.begin().await.unwrap();
    tx.delete_commit(&c1.commit).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(next_delivery(&mut rx).await, Delivery::Delete(c1_id));
    watcher.abort();
}
