// ============================================================================
// Reconciler: merges remote events and local mutation results
// ============================================================================
//
// Merge rules, in order:
//
// 1. An event whose row has an unresolved pending mutation with a newer
//    sequence number is deferred until that mutation resolves. On success
//    the deferred inserts/updates it superseded are dropped; deferred
//    deletes still apply (delete is terminal). On failure the optimistic
//    change is rolled back and the deferred events are applied as-is.
// 2. Insert for an unknown id: inserted, appended at its container's tail.
//    Insert for a known id: merged as an update (at-least-once delivery).
// 3. Update: field-level merge; a field guarded by any unresolved pending
//    mutation keeps its local value until the mutation resolves.
// 4. Delete: removes the row unconditionally, pending or not.
//
// The Reconciler owns the pending-mutation records; nothing else mutates
// them.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::core::RowId;
use crate::feed::{EventKind, StampedEvent};
use crate::reconcile::pending::{PendingKind, PendingMutation};
use crate::state::ViewState;

#[derive(Default)]
pub struct Reconciler {
    /// Unresolved mutations by sequence number, oldest first.
    pending: BTreeMap<u64, PendingMutation>,
    /// Events deferred under rule 1, per row, in arrival order.
    deferred: HashMap<RowId, VecDeque<StampedEvent>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight optimistic mutation. The caller has already
    /// applied the change to the view.
    pub fn begin(&mut self, mutation: PendingMutation) {
        tracing::debug!(seq = mutation.seq, row = %mutation.row_id, kind = ?mutation.kind,
            "pending mutation registered");
        self.pending.insert(mutation.seq, mutation);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.values().map(VecDeque::len).sum()
    }

    fn newest_pending_seq(&self, row: &RowId) -> Option<u64> {
        self.pending
            .values()
            .filter(|p| &p.row_id == row)
            .map(|p| p.seq)
            .max()
    }

    /// Fields currently guarded for a row: any unresolved local write on a
    /// field wins over a remote value until it resolves.
    fn guarded_fields(&self, row: &RowId) -> BTreeSet<String> {
        self.pending
            .values()
            .filter(|p| &p.row_id == row)
            .flat_map(|p| p.guarded_fields.iter().cloned())
            .collect()
    }

    /// Rows inserted locally but not yet confirmed. The reload merge must
    /// not discard these just because the server does not know them yet.
    pub fn pending_insert_ids(&self) -> HashSet<RowId> {
        self.pending
            .values()
            .filter(|p| p.kind == PendingKind::Insert)
            .map(|p| p.row_id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Remote events
    // ------------------------------------------------------------------

    /// Apply one stamped feed event to the view under the merge rules.
    pub fn apply_remote_event(&mut self, state: &mut ViewState, stamped: StampedEvent) {
        let row_id = stamped.event.row.id.clone();

        // rule 1: a newer unresolved local mutation wins for now
        if let Some(pending_seq) = self.newest_pending_seq(&row_id) {
            if pending_seq > stamped.seq {
                tracing::debug!(row = %row_id, event_seq = stamped.seq, pending_seq,
                    "deferring event behind newer pending mutation");
                self.deferred.entry(row_id).or_default().push_back(stamped);
                return;
            }
        }

        let is_container = stamped.event.table == state.config().container_table;
        match (stamped.event.kind, is_container) {
            (EventKind::Insert, false) | (EventKind::Update, false) => {
                let guarded = self.guarded_fields(&row_id);
                if state.row(&row_id).is_some() {
                    let _ = state.merge_row_fields(&row_id, &stamped.event.row.fields, &guarded);
                } else if let Err(err) = state.insert_row(stamped.event.row) {
                    // e.g. the owning container is not on this screen
                    tracing::warn!(row = %row_id, error = %err, "dropping remote row event");
                }
            }
            (EventKind::Insert, true) | (EventKind::Update, true) => {
                let guarded = self.guarded_fields(&row_id);
                if state.container(&row_id).is_some() {
                    let _ =
                        state.merge_container_fields(&row_id, &stamped.event.row.fields, &guarded);
                } else if let Err(err) = state.insert_container(stamped.event.row) {
                    tracing::warn!(container = %row_id, error = %err,
                        "dropping remote container event");
                }
            }
            (EventKind::Delete, false) => {
                // rule 4: terminal, regardless of pending mutations
                state.remove_row(&row_id);
                self.deferred.remove(&row_id);
            }
            (EventKind::Delete, true) => {
                state.remove_container(&row_id);
                self.deferred.remove(&row_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Pending resolution
    // ------------------------------------------------------------------

    /// The persistence call behind `seq` succeeded: the optimistic state is
    /// confirmed. Deferred inserts/updates older than the confirmation are
    /// stale and dropped; everything else is returned for re-application.
    #[must_use = "returned events must be re-applied through apply_remote_event"]
    pub fn resolve_success(&mut self, seq: u64) -> Vec<StampedEvent> {
        let Some(mutation) = self.pending.remove(&seq) else {
            return Vec::new();
        };

        let Some(queue) = self.deferred.remove(&mutation.row_id) else {
            return Vec::new();
        };

        let mut reapply = Vec::new();
        for event in queue {
            let stale = event.seq < mutation.seq && event.event.kind != EventKind::Delete;
            if stale {
                tracing::debug!(row = %mutation.row_id, event_seq = event.seq,
                    "dropping deferred event superseded by confirmation");
            } else {
                reapply.push(event);
            }
        }
        reapply
    }

    /// The persistence call behind `seq` failed: roll the optimistic change
    /// back (only the captured row/container) and hand back the deferred
    /// events so the caller applies them as-is against the restored state.
    #[must_use = "returned events must be re-applied through apply_remote_event"]
    pub fn resolve_failure(&mut self, seq: u64, state: &mut ViewState) -> Vec<StampedEvent> {
        let Some(mutation) = self.pending.remove(&seq) else {
            return Vec::new();
        };

        tracing::warn!(seq, row = %mutation.row_id, kind = ?mutation.kind,
            "persistence failed, rolling back optimistic mutation");
        let row_id = mutation.row_id;
        mutation.undo.revert(state);

        self.deferred
            .remove(&row_id)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default()
    }
}
