// ============================================================================
// syncview
// ============================================================================
//
// Client-side realtime state reconciliation for screens backed by a hosted
// table store: optimistic local mutations with rollback, change-feed
// merging under defined ordering rules, and subscription lifecycle
// management. The store, auth, and realtime transport stay external; the
// in-memory backend here stands in for them in tests and demos.
//
// ============================================================================

pub mod client;
pub mod config;
pub mod core;
pub mod feed;
pub mod reconcile;
pub mod screen;
pub mod session;
pub mod state;
pub mod status;

// Re-export main types for convenience
pub use client::{Filter, MemoryBackend, PersistenceClient};
pub use config::ScreenConfig;
pub use core::{Fields, Patch, Result, Row, RowId, SyncError};
pub use feed::{ChangeFeed, EventKind, FeedEvent, StampedEvent, SubscriptionHandle};
pub use reconcile::{Reconciler, SeqCounter};
pub use screen::Screen;
pub use session::{Role, SessionContext};
pub use state::{Container, ViewState};
