pub mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Patch, Result, Row, RowId};

/// Equality filter for a fetch, the only shape the screens use
/// (`.eq(column, value)` against the hosted store).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub equals: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, equals: Value) -> Self {
        Self {
            field: field.into(),
            equals,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.field) == Some(&self.equals)
    }
}

/// Request/response CRUD against the remote table store. All calls may fail
/// with a transport or validation error; none of them block the caller's
/// event loop.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn fetch(&self, table: &str, filter: Option<Filter>) -> Result<Vec<Row>>;

    /// Returns the row as persisted (the server may fill defaults).
    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    async fn update(&self, table: &str, id: &RowId, patch: Patch) -> Result<()>;

    /// Deleting an absent row succeeds: the hosted store reports zero
    /// affected rows, not an error.
    async fn delete(&self, table: &str, id: &RowId) -> Result<()>;
}
