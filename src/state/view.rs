// ============================================================================
// Local View State
// ============================================================================
//
// The authoritative-for-this-screen copy of all visible rows and containers.
// One instance per mounted screen, owned exclusively by it; never shared
// across screens. Every mutating operation bumps a watch channel so the UI
// layer can re-render without this module knowing anything about it.
//
// Invariants maintained here:
// - no two rows with the same id in one collection
// - every row's container reference matches an existing container
//   (rows that would become orphans are dropped, not kept dangling)
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use im::Vector;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::ScreenConfig;
use crate::core::{Fields, Result, Row, RowId, SyncError};
use crate::state::Container;

pub struct ViewState {
    config: ScreenConfig,
    rows: HashMap<RowId, Row>,
    /// BTreeMap keeps container iteration stable for rendering and tests.
    containers: BTreeMap<RowId, Container>,
    version_tx: watch::Sender<u64>,
}

impl ViewState {
    pub fn new(config: ScreenConfig) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            config,
            rows: HashMap::new(),
            containers: BTreeMap::new(),
            version_tx,
        }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    /// Observers receive a monotonically increasing version on every change.
    pub fn observe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    fn notify(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn row(&self, id: &RowId) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn container(&self, id: &RowId) -> Option<&Container> {
        self.containers.get(id)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Which container holds `id`, if any.
    pub fn container_of(&self, id: &RowId) -> Option<&RowId> {
        self.containers
            .values()
            .find(|c| c.contains(id))
            .map(|c| c.id())
    }

    /// Read the container reference off an item row. The feed delivers ids
    /// as either strings or numbers depending on the column type.
    pub fn container_ref(&self, row: &Row) -> Option<RowId> {
        match row.get(&self.config.container_ref_field)? {
            Value::String(s) => Some(RowId::from(s.as_str())),
            Value::Number(n) => Some(RowId::from(n.to_string())),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------

    /// Replace the entire state after the initial fetch. Items arrive in
    /// fetch order and keep it; items referencing an unknown container are
    /// dropped.
    pub fn load(&mut self, containers: Vec<Row>, items: Vec<Row>) {
        self.rows.clear();
        self.containers.clear();

        for row in containers {
            let id = row.id.clone();
            self.containers.insert(id, Container::new(row));
        }

        for row in items {
            if let Err(err) = self.insert_row_silent(row) {
                tracing::warn!(error = %err, "dropping row on load");
            }
        }

        self.notify();
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.containers.clear();
        self.notify();
    }

    // ------------------------------------------------------------------
    // Item row mutations
    // ------------------------------------------------------------------

    fn insert_row_silent(&mut self, row: Row) -> Result<()> {
        if self.rows.contains_key(&row.id) {
            return Err(SyncError::DuplicateRow(row.id));
        }

        let container_id = self
            .container_ref(&row)
            .ok_or_else(|| SyncError::Validation(format!(
                "row '{}' has no '{}' reference",
                row.id, self.config.container_ref_field
            )))?;

        let container = self
            .containers
            .get_mut(&container_id)
            .ok_or(SyncError::ContainerNotFound(container_id))?;

        container.push_back(row.id.clone());
        self.rows.insert(row.id.clone(), row);
        Ok(())
    }

    /// Insert a row and append it to its container's sequence.
    pub fn insert_row(&mut self, row: Row) -> Result<()> {
        self.insert_row_silent(row)?;
        self.notify();
        Ok(())
    }

    /// Field-level merge into an existing row, honoring guarded fields.
    /// If the merge changes the container reference, membership follows:
    /// removed from the old sequence, appended to the new one.
    pub fn merge_row_fields(
        &mut self,
        id: &RowId,
        incoming: &Fields,
        skip: &BTreeSet<String>,
    ) -> Result<()> {
        {
            let row = self
                .rows
                .get_mut(id)
                .ok_or_else(|| SyncError::RowNotFound(id.clone()))?;
            row.merge_fields(incoming, skip);
        }

        let new_ref = self.rows.get(id).and_then(|row| self.container_ref(row));
        let current = self.container_of(id).cloned();

        if let Some(new_ref) = new_ref {
            if current.as_ref() != Some(&new_ref) {
                if let Some(old_id) = current {
                    if let Some(old) = self.containers.get_mut(&old_id) {
                        old.remove_item(id);
                    }
                }
                match self.containers.get_mut(&new_ref) {
                    Some(new) => new.push_back(id.clone()),
                    None => {
                        // moved to a container this screen does not have:
                        // keeping the row would orphan it
                        tracing::warn!(row = %id, container = %new_ref,
                            "row moved to unknown container, dropping");
                        self.rows.remove(id);
                    }
                }
            }
        }

        self.notify();
        Ok(())
    }

    /// Remove a row from its container sequence and the flat index.
    /// Idempotent: removing an absent row is a no-op returning `None`.
    pub fn remove_row(&mut self, id: &RowId) -> Option<Row> {
        let row = self.rows.remove(id)?;
        for container in self.containers.values_mut() {
            if container.remove_item(id).is_some() {
                break;
            }
        }
        self.notify();
        Some(row)
    }

    // ------------------------------------------------------------------
    // Container mutations
    // ------------------------------------------------------------------

    pub fn insert_container(&mut self, row: Row) -> Result<()> {
        if self.containers.contains_key(&row.id) {
            return Err(SyncError::DuplicateRow(row.id));
        }
        let id = row.id.clone();
        self.containers.insert(id, Container::new(row));
        self.notify();
        Ok(())
    }

    pub fn merge_container_fields(
        &mut self,
        id: &RowId,
        incoming: &Fields,
        skip: &BTreeSet<String>,
    ) -> Result<()> {
        let container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| SyncError::ContainerNotFound(id.clone()))?;
        container.row_mut().merge_fields(incoming, skip);
        self.notify();
        Ok(())
    }

    /// Remove a container and all rows it owns (no orphans). Returns the
    /// container and its member rows so a failed delete can restore both.
    pub fn remove_container(&mut self, id: &RowId) -> Option<(Container, Vec<Row>)> {
        let container = self.containers.remove(id)?;
        let members = container
            .items()
            .iter()
            .filter_map(|item| self.rows.remove(item))
            .collect();
        self.notify();
        Some((container, members))
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Move an item within one container. Returns the pre-mutation order so
    /// a failed persistence call can restore it exactly.
    pub fn reorder(&mut self, container: &RowId, from: usize, to: usize) -> Result<Vector<RowId>> {
        let c = self
            .containers
            .get_mut(container)
            .ok_or_else(|| SyncError::ContainerNotFound(container.clone()))?;
        let before = c.order();
        c.move_item(from, to)?;
        self.notify();
        Ok(before)
    }

    /// Cross-container move: remove from the source sequence, insert into
    /// the destination at `index`, repoint the row's container reference.
    /// The two steps plus the field write are undone together on failure
    /// (the caller holds the snapshots).
    pub fn move_between(&mut self, item: &RowId, dst: &RowId, index: usize) -> Result<()> {
        if !self.rows.contains_key(item) {
            return Err(SyncError::RowNotFound(item.clone()));
        }
        if !self.containers.contains_key(dst) {
            return Err(SyncError::ContainerNotFound(dst.clone()));
        }

        let src = self
            .container_of(item)
            .cloned()
            .ok_or_else(|| SyncError::RowNotFound(item.clone()))?;

        if let Some(source) = self.containers.get_mut(&src) {
            source.remove_item(item);
        }
        if let Some(dest) = self.containers.get_mut(dst) {
            dest.insert_at(index, item.clone());
        }

        let ref_field = self.config.container_ref_field.clone();
        if let Some(row) = self.rows.get_mut(item) {
            row.set(ref_field, Value::String(dst.to_string()));
        }

        self.notify();
        Ok(())
    }

    /// Restore a container's order verbatim. Missing containers are ignored:
    /// a remote delete may have won while the undo was pending.
    pub fn set_order(&mut self, container: &RowId, order: Vector<RowId>) {
        if let Some(c) = self.containers.get_mut(container) {
            c.set_order(order);
            self.notify();
        }
    }

    // ------------------------------------------------------------------
    // Undo primitives
    // ------------------------------------------------------------------

    /// Put a deleted row back, at its old index when the container still
    /// exists. A row whose container is gone stays gone (no orphans).
    pub fn restore_row(&mut self, row: Row, membership: Option<(RowId, usize)>) {
        if self.rows.contains_key(&row.id) {
            return;
        }
        let Some((container_id, index)) = membership else {
            return;
        };
        let Some(container) = self.containers.get_mut(&container_id) else {
            tracing::warn!(row = %row.id, "container gone, not restoring row");
            return;
        };
        container.insert_at(index, row.id.clone());
        self.rows.insert(row.id.clone(), row);
        self.notify();
    }

    /// Restore exact pre-mutation field values: `present` fields are written
    /// back, fields in `absent` did not exist before and are removed.
    pub fn restore_fields(&mut self, id: &RowId, present: &Fields, absent: &BTreeSet<String>) {
        if let Some(row) = self.rows.get_mut(id) {
            for (name, value) in present {
                row.fields.insert(name.clone(), value.clone());
            }
            for name in absent {
                row.fields.remove(name);
            }
            self.notify();
        }
    }

    pub fn restore_container_fields(
        &mut self,
        id: &RowId,
        present: &Fields,
        absent: &BTreeSet<String>,
    ) {
        if let Some(container) = self.containers.get_mut(id) {
            let row = container.row_mut();
            for (name, value) in present {
                row.fields.insert(name.clone(), value.clone());
            }
            for name in absent {
                row.fields.remove(name);
            }
            self.notify();
        }
    }

    pub fn restore_container(&mut self, container: Container, members: Vec<Row>) {
        for row in members {
            self.rows.insert(row.id.clone(), row);
        }
        self.containers.insert(container.id().clone(), container);
        self.notify();
    }

    // ------------------------------------------------------------------
    // Reload merging
    // ------------------------------------------------------------------

    /// Merge a fresh full fetch into the current state after a subscription
    /// gap. Survivors keep their local order; newcomers append at the tail;
    /// rows and containers the server no longer has are removed, except ids
    /// in `keep` (unconfirmed local inserts). Applying this after a feed
    /// drop leaves state identical to a fresh reload.
    pub fn merge_reload(
        &mut self,
        containers: Vec<Row>,
        items: Vec<Row>,
        keep: &HashSet<RowId>,
    ) {
        let fetched_containers: HashSet<RowId> =
            containers.iter().map(|r| r.id.clone()).collect();
        let fetched_items: HashSet<RowId> = items.iter().map(|r| r.id.clone()).collect();

        let stale_containers: Vec<RowId> = self
            .containers
            .keys()
            .filter(|id| !fetched_containers.contains(*id) && !keep.contains(*id))
            .cloned()
            .collect();
        for id in stale_containers {
            self.remove_container(&id);
        }

        for row in containers {
            match self.containers.get_mut(&row.id) {
                Some(existing) => {
                    existing.row_mut().merge_fields(&row.fields, &BTreeSet::new());
                }
                None => {
                    self.containers
                        .insert(row.id.clone(), Container::new(row));
                }
            }
        }

        let stale_items: Vec<RowId> = self
            .rows
            .keys()
            .filter(|id| !fetched_items.contains(*id) && !keep.contains(*id))
            .cloned()
            .collect();
        for id in stale_items {
            self.remove_row(&id);
        }

        for row in items {
            if self.rows.contains_key(&row.id) {
                // survivor: merge fields, keep local position
                let _ = self.merge_row_fields(&row.id.clone(), &row.fields.clone(), &BTreeSet::new());
            } else if let Err(err) = self.insert_row_silent(row) {
                tracing::warn!(error = %err, "dropping row on reload merge");
            }
        }

        self.notify();
    }
}
