//! Watch service: snapshot-plus-delta subscriptions over the commits
//! table.
//!
//! The row triggers publish `"<OP> <int_id>"` payloads to three channel
//! scopes: the whole table, one repo, and one commit. A watcher subscribes
//! to its channel BEFORE taking the snapshot so no event is missed, drains
//! the snapshot as upserts, then forwards decoded events until the
//! subscription closes or the future is dropped. The snapshot and the
//! event stream may jointly deliver a commit twice, so upsert handlers
//! must be idempotent.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::postgres::PgListener;
use tokio::sync::{mpsc, oneshot};

use crate::db::errors::StoreError;
use crate::db::models::repo::RepoId;
use crate::db::DatabaseConnection;

use super::iterator::{
    commits_in_repo_iterator, new_commits_iterator, CommitFilter, CommitIterator,
    COMMITS_PAGE_SIZE,
};
use super::{manager, Commit, CommitId};

/// Channel notified for every commit change.
pub const COMMITS_CHANNEL: &str = "pfs_commits";
/// Prefix of the per-repo channels.
pub const COMMITS_REPO_CHANNEL: &str = "pfs_commits_repo_";
/// Prefix of the per-commit channels.
pub const COMMIT_CHANNEL: &str = "pfs_commits_";

/// The channel notified when commits in repo `repo_id` change.
#[must_use]
pub fn commits_in_repo_channel(repo_id: RepoId) -> String {
    format!("{COMMITS_REPO_CHANNEL}{repo_id}")
}

/// The channel notified when commit `commit_id` changes.
#[must_use]
pub fn commit_channel(commit_id: CommitId) -> String {
    format!("{COMMIT_CHANNEL}{commit_id}")
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

/// A decoded notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The operation.
    pub op: EventOp,
    /// Internal id of the affected commit.
    pub id: CommitId,
}

/// Decode a `"<OP> <int_id>"` payload.
pub(crate) fn parse_event(payload: &str) -> Result<Event, StoreError> {
    let Some((op, id)) = payload.split_once(' ') else {
        return Err(StoreError::Protocol {
            message: format!("malformed event payload: {payload}"),
        });
    };
    let id: CommitId = id.parse().map_err(|_| StoreError::Protocol {
        message: format!("malformed event id: {payload}"),
    })?;
    let op = match op {
        "INSERT" => EventOp::Insert,
        "UPDATE" => EventOp::Update,
        "DELETE" => EventOp::Delete,
        other => {
            return Err(StoreError::Protocol {
                message: format!("unknown event type: {other}"),
            })
        }
    };
    Ok(Event { op, id })
}

/// Callbacks invoked by a watcher. An error from either aborts the watcher
/// with that error.
pub trait WatchHandler: Send {
    /// A commit exists or changed. Delivered for every snapshot row and for
    /// INSERT/UPDATE events; may see the same commit more than once.
    ///
    /// # Errors
    /// Any error aborts the watcher.
    fn on_upsert(&mut self, commit: Commit) -> Result<(), StoreError>;
    /// A commit was deleted.
    ///
    /// # Errors
    /// Any error aborts the watcher.
    fn on_delete(&mut self, id: CommitId) -> Result<(), StoreError>;
}

type Subscribers = Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>>;

enum Command {
    Listen(String, oneshot::Sender<Result<(), sqlx::Error>>),
    Unlisten(String),
}

/// A long-lived notification listener shared across watchers. One
/// background task owns the Postgres connection and routes notifications
/// by channel to per-subscription queues; each watcher owns its
/// subscription and releases it on drop.
pub struct Listener {
    subscribers: Arc<Subscribers>,
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
}

impl Listener {
    /// Connect the listener and spawn its routing task.
    ///
    /// # Errors
    /// Errors if the notification connection cannot be established.
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let pg_listener = PgListener::connect(db_url).await?;
        let subscribers: Arc<Subscribers> = Arc::new(Mutex::new(HashMap::new()));
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_listener(pg_listener, Arc::clone(&subscribers), command_rx));
        Ok(Self {
            subscribers,
            commands,
            next_id: AtomicU64::new(0),
        })
    }

    /// Subscribe to a channel. Returns once the LISTEN is active, so a
    /// snapshot taken afterwards cannot race ahead of the event stream.
    ///
    /// # Errors
    /// Errors with `WatcherClosed` if the listener connection is gone.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            subscribers
                .entry(channel.to_owned())
                .or_default()
                .push((id, tx));
        }
        let (ack, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Listen(channel.to_owned(), ack))
            .is_err()
        {
            self.remove(channel, id);
            return Err(StoreError::WatcherClosed);
        }
        match ack_rx.await {
            Ok(Ok(())) => Ok(Subscription {
                channel: channel.to_owned(),
                id,
                events: rx,
                subscribers: Arc::clone(&self.subscribers),
                commands: self.commands.clone(),
            }),
            Ok(Err(err)) => {
                self.remove(channel, id);
                Err(err.into())
            }
            Err(_) => {
                self.remove(channel, id);
                Err(StoreError::WatcherClosed)
            }
        }
    }

    fn remove(&self, channel: &str, id: u64) {
        remove_subscriber(&self.subscribers, channel, id);
    }
}

fn remove_subscriber(subscribers: &Arc<Subscribers>, channel: &str, id: u64) -> bool {
    let mut subscribers = subscribers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let Some(entries) = subscribers.get_mut(channel) else {
        return false;
    };
    entries.retain(|(entry_id, _)| *entry_id != id);
    if entries.is_empty() {
        subscribers.remove(channel);
        return true;
    }
    false
}

async fn run_listener(
    mut pg_listener: PgListener,
    subscribers: Arc<Subscribers>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Listen(channel, ack)) => {
                    let result = pg_listener.listen(&channel).await;
                    let _ = ack.send(result);
                }
                Some(Command::Unlisten(channel)) => {
                    if let Err(err) = pg_listener.unlisten(&channel).await {
                        tracing::warn!(%channel, %err, "unlisten failed");
                    }
                }
                // Listener dropped; no new subscriptions can arrive.
                None => break,
            },
            notification = pg_listener.recv() => match notification {
                Ok(notification) => {
                    let mut subscribers = subscribers
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if let Some(entries) = subscribers.get_mut(notification.channel()) {
                        entries.retain(|(_, tx)| {
                            tx.send(notification.payload().to_owned()).is_ok()
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "notification connection lost");
                    break;
                }
            },
        }
    }
    // Dropping the senders closes every subscription; watchers observe
    // WatcherClosed.
    subscribers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clear();
}

/// A live subscription to one notification channel. Dropping it releases
/// the channel on the shared listener.
pub struct Subscription {
    channel: String,
    id: u64,
    events: mpsc::UnboundedReceiver<String>,
    subscribers: Arc<Subscribers>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// The next raw event payload, or `None` when the listener closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if remove_subscriber(&self.subscribers, &self.channel, self.id) {
            let _ = self.commands.send(Command::Unlisten(self.channel.clone()));
        }
    }
}

/// Watch every commit in the store: full-table snapshot, then deltas.
///
/// # Errors
/// Errors with `WatcherClosed` when the listener goes away, `Protocol` on
/// an undecodable event, or whatever error a handler callback returns.
pub async fn watch_commits(
    db: &DatabaseConnection,
    listener: &Listener,
    handler: &mut dyn WatchHandler,
) -> Result<(), StoreError> {
    let subscription = listener.subscribe(COMMITS_CHANNEL).await?;
    let snapshot = new_commits_iterator(&CommitFilter::default(), &[], 0, COMMITS_PAGE_SIZE);
    watch_with_snapshot(db, Some(snapshot), subscription, handler).await
}

/// Watch the commits of one repo.
///
/// # Errors
/// As [`watch_commits`].
pub async fn watch_commits_in_repo(
    db: &DatabaseConnection,
    listener: &Listener,
    repo_id: RepoId,
    handler: &mut dyn WatchHandler,
) -> Result<(), StoreError> {
    let subscription = listener.subscribe(&commits_in_repo_channel(repo_id)).await?;
    let snapshot = commits_in_repo_iterator(repo_id, COMMITS_PAGE_SIZE);
    watch_with_snapshot(db, Some(snapshot), subscription, handler).await
}

/// Watch a single commit.
///
/// # Errors
/// Errors with `CommitNotFound` when the commit is absent at subscription
/// time, and otherwise as [`watch_commits`].
pub async fn watch_commit(
    db: &DatabaseConnection,
    listener: &Listener,
    commit_id: CommitId,
    handler: &mut dyn WatchHandler,
) -> Result<(), StoreError> {
    let subscription = listener.subscribe(&commit_channel(commit_id)).await?;
    let commit = {
        let mut tx = db.begin().await?;
        let commit = manager::get_commit(&mut tx.tx, commit_id).await?;
        tx.commit().await?;
        commit
    };
    handler.on_upsert(commit)?;
    watch_with_snapshot(db, None, subscription, handler).await
}

async fn watch_with_snapshot(
    db: &DatabaseConnection,
    snapshot: Option<CommitIterator>,
    mut subscription: Subscription,
    handler: &mut dyn WatchHandler,
) -> Result<(), StoreError> {
    // Handle snapshot.
    if let Some(mut snapshot) = snapshot {
        let mut conn = db.pool.acquire().await?;
        while let Some(commit) = snapshot.next(&mut conn).await? {
            handler.on_upsert(commit)?;
        }
    }
    // Handle delta.
    loop {
        let Some(payload) = subscription.recv().await else {
            return Err(StoreError::WatcherClosed);
        };
        let event = parse_event(&payload)?;
        match event.op {
            EventOp::Delete => handler.on_delete(event.id)?,
            EventOp::Insert | EventOp::Update => {
                let mut tx = db.begin().await?;
                let result = manager::get_commit(&mut tx.tx, event.id).await;
                tx.commit().await?;
                match result {
                    Ok(commit) => handler.on_upsert(commit)?,
                    // The commit vanished between the event and the lookup:
                    // surface it as a deletion instead of killing the
                    // watcher.
                    Err(StoreError::CommitNotFound { .. }) => handler.on_delete(event.id)?,
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{commit_channel, commits_in_repo_channel, parse_event, Event, EventOp};
    use crate::db::errors::StoreError;

    #[test]
    fn test_channel_names_expect_scoped_suffixes() {
        assert_eq!(commits_in_repo_channel(12), "pfs_commits_repo_12");
        assert_eq!(commit_channel(7), "pfs_commits_7");
    }

    #[test]
    fn test_parse_event_when_known_ops_expect_decoded() {
        assert_eq!(
            parse_event("INSERT 42").unwrap(),
            Event {
                op: EventOp::Insert,
                id: 42
            }
        );
        assert_eq!(parse_event("UPDATE 1").unwrap().op, EventOp::Update);
        assert_eq!(parse_event("DELETE 9").unwrap().op, EventOp::Delete);
    }

    #[test]
    fn test_parse_event_when_unknown_op_expect_protocol_error() {
        let err = parse_event("TRUNCATE 3").unwrap_err();
        assert!(matches!(err, StoreError::Protocol { .. }));
    }

    #[test]
    fn test_parse_event_when_malformed_expect_protocol_error() {
        for payload in ["", "INSERT", "INSERT x", "17"] {
            let err = parse_event(payload).unwrap_err();
            assert!(matches!(err, StoreError::Protocol { .. }), "{payload}");
        }
    }
}
