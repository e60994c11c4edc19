// ============================================================================
// Undo snapshots for optimistic mutations
// ============================================================================
//
// Command Pattern: before an optimistic mutation is applied, the affected
// slice of state is captured as an Undo. On persistence failure the Undo is
// reverted; on success it is dropped. A rollback touches only the captured
// row/container, never the rest of the view.
//
// ============================================================================

use std::collections::BTreeSet;

use im::Vector;

use crate::core::{Fields, Row, RowId};
use crate::state::{Container, ViewState};

#[derive(Debug)]
pub enum Undo {
    /// Reverse an optimistic insert: take the row back out.
    RemoveInserted { row_id: RowId },

    /// Reverse an optimistic update: write the prior values of the patched
    /// fields back (`present`), and delete fields the patch introduced
    /// (`absent`), restoring them bit-for-bit.
    RestoreFields {
        row_id: RowId,
        present: Fields,
        absent: BTreeSet<String>,
    },

    /// Same, for a container's own fields (e.g. a title rename).
    RestoreContainerFields {
        container_id: RowId,
        present: Fields,
        absent: BTreeSet<String>,
    },

    /// Reverse an optimistic delete: put the row back at its old index.
    RestoreRow {
        row: Row,
        membership: Option<(RowId, usize)>,
    },

    /// Reverse a container delete, members included.
    RestoreContainer {
        container: Container,
        members: Vec<Row>,
    },

    /// Reverse an optimistic insert of a whole container.
    RemoveInsertedContainer { container_id: RowId },

    /// Reverse ordering changes. A same-container reorder captures one
    /// entry; a cross-container move captures both sequences plus the row's
    /// prior container reference, undone as one atomic step.
    RestoreOrders {
        orders: Vec<(RowId, Vector<RowId>)>,
        /// `(row, prior reference fields)` when the move repointed the row.
        repoint: Option<(RowId, Fields)>,
    },
}

impl Undo {
    /// Apply the compensating action to the view. Tolerant of state that
    /// moved on underneath it: a row or container removed by a remote
    /// delete while the mutation was in flight stays removed.
    pub fn revert(self, state: &mut ViewState) {
        match self {
            Undo::RemoveInserted { row_id } => {
                state.remove_row(&row_id);
            }
            Undo::RestoreFields {
                row_id,
                present,
                absent,
            } => {
                state.restore_fields(&row_id, &present, &absent);
            }
            Undo::RestoreContainerFields {
                container_id,
                present,
                absent,
            } => {
                state.restore_container_fields(&container_id, &present, &absent);
            }
            Undo::RestoreRow { row, membership } => {
                state.restore_row(row, membership);
            }
            Undo::RestoreContainer { container, members } => {
                state.restore_container(container, members);
            }
            Undo::RemoveInsertedContainer { container_id } => {
                state.remove_container(&container_id);
            }
            Undo::RestoreOrders { orders, repoint } => {
                if let Some((row_id, fields)) = repoint {
                    state.restore_fields(&row_id, &fields, &BTreeSet::new());
                }
                for (container, order) in orders {
                    state.set_order(&container, order);
                }
            }
        }
    }

    /// Capture the prior values of the fields a patch is about to touch.
    /// Returns `(present, absent)`: values to write back, names to remove.
    pub fn capture_fields(row: &Row, touched: &BTreeSet<String>) -> (Fields, BTreeSet<String>) {
        let mut present = Fields::new();
        let mut absent = BTreeSet::new();
        for name in touched {
            match row.get(name) {
                Some(value) => {
                    present.insert(name.clone(), value.clone());
                }
                None => {
                    absent.insert(name.clone());
                }
            }
        }
        (present, absent)
    }
}
