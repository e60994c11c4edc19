// ============================================================================
// Pending mutations and the local sequence counter
// ============================================================================
//
// Every local optimistic mutation takes a sequence number before it is
// applied; incoming feed events are stamped from the same counter when they
// enter the screen's intake channel. "Newer" between a pending mutation and
// an event is therefore a plain integer comparison, never wall-clock.
//
// The counter is owned by the screen that created it and passed down
// explicitly. It is deliberately not a process-wide static: two mounted
// screens must not share ordering state.
//
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::RowId;
use crate::reconcile::change::Undo;

/// Monotonic local sequence counter, cheap to clone and share between the
/// screen and its subscription tasks.
#[derive(Debug, Clone, Default)]
pub struct SeqCounter(Arc<AtomicU64>);

impl SeqCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Insert,
    Update,
    Delete,
    Reorder,
    Move,
}

/// An in-flight local change that has not been confirmed by the persistence
/// layer. Holds everything needed to reconcile a contradicting feed event:
/// the sequence number (ordering), the guarded fields (rule: a pending local
/// write on a field wins until it resolves), and the undo snapshot.
#[derive(Debug)]
pub struct PendingMutation {
    pub seq: u64,
    pub row_id: RowId,
    pub kind: PendingKind,
    pub guarded_fields: BTreeSet<String>,
    pub undo: Undo,
}

impl PendingMutation {
    pub fn new(seq: u64, row_id: RowId, kind: PendingKind, undo: Undo) -> Self {
        Self {
            seq,
            row_id,
            kind,
            guarded_fields: BTreeSet::new(),
            undo,
        }
    }

    pub fn guarding(mut self, fields: BTreeSet<String>) -> Self {
        self.guarded_fields = fields;
        self
    }
}
