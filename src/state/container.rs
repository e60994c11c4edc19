// ============================================================================
// Container: an ordered sequence of child row ids
// ============================================================================
//
// Ordering is client-maintained and user-adjustable (drag-and-drop). The
// sequence is an im::Vector so capturing a pre-mutation snapshot for undo is
// an O(1) structural clone.
//
// ============================================================================

use im::Vector;

use crate::core::{Result, Row, RowId, SyncError};

/// A row that owns an ordered sequence of child rows (a list owning items).
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    row: Row,
    items: Vector<RowId>,
}

impl Container {
    pub fn new(row: Row) -> Self {
        Self {
            row,
            items: Vector::new(),
        }
    }

    pub fn id(&self) -> &RowId {
        &self.row.id
    }

    /// The container's own persisted fields (title etc.).
    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn row_mut(&mut self) -> &mut Row {
        &mut self.row
    }

    pub fn items(&self) -> &Vector<RowId> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.items.iter().any(|item| item == id)
    }

    pub fn position(&self, id: &RowId) -> Option<usize> {
        self.items.iter().position(|item| item == id)
    }

    /// O(1) snapshot of the current order, captured before a mutation so it
    /// can be restored verbatim on persistence failure.
    pub fn order(&self) -> Vector<RowId> {
        self.items.clone()
    }

    /// Replace the whole order. Used by undo and by reload merging.
    pub fn set_order(&mut self, order: Vector<RowId>) {
        self.items = order;
    }

    /// Append at the tail. Remote inserts land here: they must never reorder
    /// existing local items.
    pub fn push_back(&mut self, id: RowId) {
        self.items.push_back(id);
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert_at(&mut self, index: usize, id: RowId) {
        let index = index.min(self.items.len());
        self.items.insert(index, id);
    }

    pub fn remove_at(&mut self, index: usize) -> Result<RowId> {
        if index >= self.items.len() {
            return Err(SyncError::IndexOutOfBounds {
                container: self.row.id.clone(),
                index,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(index))
    }

    /// Remove by id; returns the index it occupied. Idempotent.
    pub fn remove_item(&mut self, id: &RowId) -> Option<usize> {
        let index = self.position(id)?;
        self.items.remove(index);
        Some(index)
    }

    /// Move an item within this container: `remove_at` + `insert_at`
    /// composed, with the target index interpreted against the sequence
    /// after removal (drag-and-drop semantics).
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        let id = self.remove_at(from)?;
        self.insert_at(to, id);
        Ok(())
    }
}
