// ============================================================================
// In-memory backend
// ============================================================================
//
// Implements both the persistence contract and the change feed over plain
// in-process tables. Every committed write is published to the table's
// broadcast channel, the way the hosted store streams `postgres_changes`.
//
// Used by the integration tests and demos; it also carries the fault hooks
// (fail the next N calls, sever a feed channel) the rollback and
// resubscription paths are tested against.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::client::{Filter, PersistenceClient};
use crate::core::{Patch, Result, Row, RowId, SyncError};
use crate::feed::{ChangeFeed, FeedEvent};

const FEED_CAPACITY: usize = 256;

struct FailPlan {
    remaining: usize,
    error: SyncError,
}

struct Inner {
    /// Table handles with individual locks; the outer lock only guards the
    /// table map itself.
    tables: RwLock<HashMap<String, Arc<RwLock<Vec<Row>>>>>,
    /// One broadcast channel per table, created on first subscribe/publish.
    feeds: Mutex<HashMap<String, broadcast::Sender<FeedEvent>>>,
    fail_plan: Mutex<Option<FailPlan>>,
}

/// Cheap to clone; clones share the same tables and feeds, so one handle
/// can play the "other client" in tests while a screen holds another.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(HashMap::new()),
                feeds: Mutex::new(HashMap::new()),
                fail_plan: Mutex::new(None),
            }),
        }
    }

    pub async fn create_table(&self, name: impl Into<String>) {
        let mut tables = self.inner.tables.write().await;
        tables
            .entry(name.into())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())));
    }

    /// Load rows directly, without publishing feed events. Test fixtures
    /// and "data that existed before the screen mounted".
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        self.create_table(table).await;
        if let Ok(handle) = self.table_handle(table).await {
            let mut data = handle.write().await;
            data.extend(rows);
        }
    }

    /// Make the next `count` persistence calls fail with `error`.
    pub fn fail_next(&self, count: usize, error: SyncError) {
        let mut plan = self.inner.fail_plan.lock().expect("fail plan lock");
        *plan = Some(FailPlan {
            remaining: count,
            error,
        });
    }

    /// Drop a table's feed channel. Open receivers observe a close and the
    /// subscription worker resubscribes; events published in the gap are
    /// lost, exactly like a transport drop.
    pub fn sever_feed(&self, table: &str) {
        let mut feeds = self.inner.feeds.lock().expect("feeds lock");
        feeds.remove(table);
    }

    async fn table_handle(&self, name: &str) -> Result<Arc<RwLock<Vec<Row>>>> {
        let tables = self.inner.tables.read().await;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::TableNotFound(name.to_string()))
    }

    fn take_fault(&self) -> Option<SyncError> {
        let mut plan = self.inner.fail_plan.lock().expect("fail plan lock");
        match plan.as_mut() {
            Some(fail) if fail.remaining > 0 => {
                fail.remaining -= 1;
                let error = fail.error.clone();
                if fail.remaining == 0 {
                    *plan = None;
                }
                Some(error)
            }
            _ => None,
        }
    }

    fn publish(&self, table: &str, event: FeedEvent) {
        let mut feeds = self.inner.feeds.lock().expect("feeds lock");
        let sender = feeds
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0);
        // no receivers is fine
        let _ = sender.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceClient for MemoryBackend {
    async fn fetch(&self, table: &str, filter: Option<Filter>) -> Result<Vec<Row>> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let handle = self.table_handle(table).await?;
        let data = handle.read().await;
        Ok(data
            .iter()
            .filter(|row| filter.as_ref().is_none_or(|f| f.matches(row)))
            .cloned()
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let handle = self.table_handle(table).await?;
        let mut data = handle.write().await;
        if data.iter().any(|existing| existing.id == row.id) {
            return Err(SyncError::Validation(format!(
                "duplicate key value '{}' in table '{}'",
                row.id, table
            )));
        }
        data.push(row.clone());
        drop(data);

        self.publish(table, FeedEvent::insert(row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, id: &RowId, patch: Patch) -> Result<()> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let handle = self.table_handle(table).await?;
        let mut data = handle.write().await;
        let row = data
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| SyncError::RowNotFound(id.clone()))?;
        row.merge_fields(patch.fields(), &Default::default());
        let updated = row.clone();
        drop(data);

        self.publish(table, FeedEvent::update(updated));
        Ok(())
    }

    async fn delete(&self, table: &str, id: &RowId) -> Result<()> {
        if let Some(error) = self.take_fault() {
            return Err(error);
        }
        let handle = self.table_handle(table).await?;
        let mut data = handle.write().await;
        let Some(index) = data.iter().position(|row| &row.id == id) else {
            return Ok(());
        };
        let old = data.remove(index);
        drop(data);

        self.publish(table, FeedEvent::delete(old));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table: &str) -> Result<broadcast::Receiver<FeedEvent>> {
        // unknown table is a subscribe error, giving the resubscription
        // retry path something real to hit
        let tables = self.inner.tables.read().await;
        if !tables.contains_key(table) {
            return Err(SyncError::TableNotFound(table.to_string()));
        }
        drop(tables);

        let mut feeds = self.inner.feeds.lock().expect("feeds lock");
        let sender = feeds
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0);
        Ok(sender.subscribe())
    }
}
