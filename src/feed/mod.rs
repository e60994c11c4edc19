// ============================================================================
// Change feed: push notifications of inserts/updates/deletes
// ============================================================================

pub mod subscription;

pub use subscription::{FeedNotice, SubscriptionHandle, open_subscription};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::{Result, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// One change-feed notification. For deletes `row` carries the old row
/// (at minimum its id and container reference), mirroring what the hosted
/// feed puts in `payload.old`.
///
/// Delivery is at-least-once. Per-row delivery order is an assumption of
/// the hosting platform, not a contract; the resubscribe refetch covers the
/// window where it breaks down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub kind: EventKind,
    pub table: String,
    pub row: Row,
}

impl FeedEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            kind: EventKind::Insert,
            table: row.table.clone(),
            row,
        }
    }

    pub fn update(row: Row) -> Self {
        Self {
            kind: EventKind::Update,
            table: row.table.clone(),
            row,
        }
    }

    pub fn delete(row: Row) -> Self {
        Self {
            kind: EventKind::Delete,
            table: row.table.clone(),
            row,
        }
    }
}

/// A feed event stamped with a local sequence number at the moment it
/// entered the screen's intake channel. The stamp is what makes "pending
/// mutation newer than event" a well-defined comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedEvent {
    pub seq: u64,
    pub event: FeedEvent,
}

/// The transport side of the change feed. Implemented by `MemoryBackend`
/// here; a hosted deployment implements it over the platform's realtime
/// channels.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a raw event stream for one table. Called again by the
    /// subscription worker after a drop.
    async fn subscribe(&self, table: &str) -> Result<broadcast::Receiver<FeedEvent>>;
}
