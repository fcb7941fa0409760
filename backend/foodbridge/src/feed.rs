//! Change feed: snapshot subscriptions over the record store.
//!
//! Writers call [`ChangeFeed::publish`] after a commit. Each subscription
//! runs on its own task: it sends an initial snapshot, then a fresh snapshot
//! after every change to its collection. Dropping or unsubscribing cancels
//! the task.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db;
use crate::errors::Result;
use crate::models::{Donation, Request};

/// Snapshots buffered per subscriber before the dispatch task waits.
const SNAPSHOT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Donations,
    Requests,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub collection: Collection,
    pub id: String,
}

/// A query whose result set is re-sent whenever its collection changes.
#[async_trait]
pub trait SnapshotFilter: Send + Sync + 'static {
    type Item: Send + 'static;

    fn collection(&self) -> Collection;

    async fn snapshot(&self, pool: &SqlitePool) -> Result<Vec<Self::Item>>;
}

/// Donation listings, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DonationFilter {
    Restaurant(String),
    Orphanage(String),
}

#[async_trait]
impl SnapshotFilter for DonationFilter {
    type Item = Donation;

    fn collection(&self) -> Collection {
        Collection::Donations
    }

    async fn snapshot(&self, pool: &SqlitePool) -> Result<Vec<Donation>> {
        match self {
            DonationFilter::Restaurant(id) => db::list_donations_for_restaurant(pool, id).await,
            DonationFilter::Orphanage(id) => db::list_donations_for_orphanage(pool, id).await,
        }
    }
}

/// Request listings, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFilter {
    Pending,
    Orphanage(String),
}

#[async_trait]
impl SnapshotFilter for RequestFilter {
    type Item = Request;

    fn collection(&self) -> Collection {
        Collection::Requests
    }

    async fn snapshot(&self, pool: &SqlitePool) -> Result<Vec<Request>> {
        match self {
            RequestFilter::Pending => db::list_pending_requests(pool).await,
            RequestFilter::Orphanage(id) => db::list_requests_for_orphanage(pool, id).await,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    pool: SqlitePool,
    sender: broadcast::Sender<Change>,
}

impl ChangeFeed {
    pub fn new(pool: SqlitePool, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { pool, sender }
    }

    /// Announce a committed write. Having no subscribers is not an error.
    pub fn publish(&self, collection: Collection, id: &str) {
        let _ = self.sender.send(Change {
            collection,
            id: id.to_string(),
        });
    }

    /// Number of live subscription tasks.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe<F: SnapshotFilter>(&self, filter: F) -> Subscription<F::Item> {
        // Attach before the first snapshot so no commit falls in between.
        let mut changes = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            if deliver(&pool, &filter, &tx).await {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        change = changes.recv() => match change {
                            Ok(change) if change.collection == filter.collection() => {
                                debug!(
                                    "{:?} {} changed, refreshing snapshot",
                                    change.collection, change.id
                                );
                                if !deliver(&pool, &filter, &tx).await {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("Subscription lagged by {skipped} changes, re-syncing");
                                if !deliver(&pool, &filter, &tx).await {
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
            }
            debug!("Subscription on {:?} closed", filter.collection());
        });

        Subscription { rx, cancel }
    }
}

/// Query and forward one snapshot. Returns `false` once the subscriber is gone.
async fn deliver<F: SnapshotFilter>(
    pool: &SqlitePool,
    filter: &F,
    tx: &mpsc::Sender<Vec<F::Item>>,
) -> bool {
    match filter.snapshot(pool).await {
        Ok(items) => tx.send(items).await.is_ok(),
        Err(e) => {
            warn!("Snapshot query failed: {e}");
            !tx.is_closed()
        }
    }
}

/// Stream of snapshots for one filter.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Vec<T>>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Wait for the next snapshot. `None` after the feed shuts down.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        // Cancellation happens in Drop.
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
