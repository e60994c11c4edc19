// ============================================================================
// Screen facade
// ============================================================================
//
// One mounted screen: its view state, its reconciler, its subscriptions.
// Mount performs the initial bulk fetch and opens one subscription per
// watched table; unmount closes them. Actions follow the same shape
// throughout: reject locally if the session may not do it, apply the
// optimistic change, register the pending mutation, issue the persistence
// call, then confirm or roll back.
//
// The screen owns everything here exclusively. Dropping it cancels any
// in-flight action future, so a persistence response arriving "after
// unmount" has nowhere to write by construction.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use crate::client::PersistenceClient;
use crate::config::ScreenConfig;
use crate::core::{Patch, Result, Row, RowId, SyncError};
use crate::feed::{ChangeFeed, FeedNotice, SubscriptionHandle, open_subscription};
use crate::reconcile::{PendingKind, PendingMutation, Reconciler, SeqCounter, Undo};
use crate::session::SessionContext;
use crate::state::ViewState;

const INTAKE_CAPACITY: usize = 256;

pub struct Screen {
    client: Arc<dyn PersistenceClient>,
    feed: Arc<dyn ChangeFeed>,
    session: SessionContext,
    config: ScreenConfig,
    state: ViewState,
    reconciler: Reconciler,
    seq: SeqCounter,
    intake_tx: mpsc::Sender<FeedNotice>,
    intake_rx: mpsc::Receiver<FeedNotice>,
    subscriptions: HashMap<String, SubscriptionHandle>,
}

impl Screen {
    /// Mount: bulk-fetch both tables, then open one subscription per table.
    /// A failed fetch fails closed: the screen comes up empty rather than
    /// partially populated.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use serde_json::json;
    /// use syncview::{MemoryBackend, Role, Row, RowId, Screen, ScreenConfig, SessionContext};
    ///
    /// tokio_test::block_on(async {
    ///     let backend = MemoryBackend::new();
    ///     backend
    ///         .seed(
    ///             "lists",
    ///             vec![Row::new("lists", RowId::from("todo")).with("title", json!("Todo"))],
    ///         )
    ///         .await;
    ///     backend.create_table("items").await;
    ///
    ///     let mut screen = Screen::mount(
    ///         Arc::new(backend.clone()),
    ///         Arc::new(backend),
    ///         SessionContext::new("u1", "Sam", Role::Staff),
    ///         ScreenConfig::default(),
    ///     )
    ///     .await
    ///     .unwrap();
    ///
    ///     let id = screen.add_item(&RowId::from("todo"), "restock shelves").await.unwrap();
    ///     assert!(screen.state().row(&id).is_some());
    ///     screen.unmount().await.unwrap();
    /// });
    /// ```
    pub async fn mount(
        client: Arc<dyn PersistenceClient>,
        feed: Arc<dyn ChangeFeed>,
        session: SessionContext,
        config: ScreenConfig,
    ) -> Result<Self> {
        let mut state = ViewState::new(config.clone());

        let loaded = match try_join(
            client.fetch(&config.container_table, None),
            client.fetch(&config.item_table, None),
        )
        .await
        {
            Ok((containers, items)) => {
                state.load(containers, items);
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "initial fetch failed, mounting empty");
                false
            }
        };

        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
        let seq = SeqCounter::new();

        let mut screen = Self {
            client,
            feed,
            session,
            config,
            state,
            reconciler: Reconciler::new(),
            seq,
            intake_tx,
            intake_rx,
            subscriptions: HashMap::new(),
        };

        let container_table = screen.config.container_table.clone();
        let item_table = screen.config.item_table.clone();
        screen.open_table_subscription(&container_table).await?;
        screen.open_table_subscription(&item_table).await?;

        // a write landing between the bulk fetch and the subscribe produces
        // no event on the new channels; one merge after subscribing covers
        // that window
        if loaded {
            screen.refetch_merge().await;
        }

        tracing::info!(user = %screen.session.user_id, "screen mounted");
        Ok(screen)
    }

    /// At most one subscription per (table, screen): an existing handle is
    /// closed before a new one is opened.
    async fn open_table_subscription(&mut self, table: &str) -> Result<()> {
        if let Some(previous) = self.subscriptions.remove(table) {
            previous.close().await?;
        }
        let handle = open_subscription(
            self.feed.clone(),
            table,
            self.seq.clone(),
            self.intake_tx.clone(),
        )
        .await?;
        self.subscriptions.insert(table.to_string(), handle);
        Ok(())
    }

    /// Close subscriptions and discard state. Explicit teardown; Drop would
    /// abort the subscription tasks anyway, but an unmount that fails to
    /// close cleanly should be visible to the caller.
    pub async fn unmount(mut self) -> Result<()> {
        for (_, handle) in self.subscriptions.drain() {
            handle.close().await?;
        }
        tracing::info!(user = %self.session.user_id, "screen unmounted");
        Ok(())
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Version channel for the UI layer; bumped on every state change.
    pub fn observe(&self) -> watch::Receiver<u64> {
        self.state.observe()
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Drain everything the feed has delivered since the last call through
    /// the reconciler. Non-blocking; returns the number of notices handled.
    pub async fn process_events(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.intake_rx.try_recv() {
                Ok(FeedNotice::Event(stamped)) => {
                    self.reconciler.apply_remote_event(&mut self.state, stamped);
                    processed += 1;
                }
                Ok(FeedNotice::Resubscribed { table }) => {
                    tracing::debug!(table = %table, "resubscribed, merging refetch");
                    self.refetch_merge().await;
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// After a subscription gap: fetch both tables and merge, keeping
    /// unconfirmed local inserts. State is never discarded on a transient
    /// disconnect.
    async fn refetch_merge(&mut self) {
        match try_join(
            self.client.fetch(&self.config.container_table, None),
            self.client.fetch(&self.config.item_table, None),
        )
        .await
        {
            Ok((containers, items)) => {
                let keep = self.reconciler.pending_insert_ids();
                self.state.merge_reload(containers, items, &keep);
            }
            Err(err) => {
                tracing::warn!(error = %err, "refetch after resubscribe failed, keeping state");
            }
        }
    }

    /// Confirm or roll back a pending mutation, re-applying whatever events
    /// were deferred behind it.
    fn settle(&mut self, seq: u64, outcome: Result<()>) -> Result<()> {
        let deferred = match &outcome {
            Ok(()) => self.reconciler.resolve_success(seq),
            Err(_) => self.reconciler.resolve_failure(seq, &mut self.state),
        };
        for event in deferred {
            self.reconciler.apply_remote_event(&mut self.state, event);
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Item actions
    // ------------------------------------------------------------------

    /// Optimistically add an item to a container and persist it. The new
    /// row is stamped with the session's identity.
    pub async fn add_item(&mut self, container: &RowId, name: &str) -> Result<RowId> {
        if self.state.container(container).is_none() {
            return Err(SyncError::ContainerNotFound(container.clone()));
        }

        let row = Row::new(self.config.item_table.clone(), RowId::random())
            .with("name", json!(name))
            .with(
                self.config.container_ref_field.clone(),
                Value::String(container.to_string()),
            )
            .with(self.config.owner_field.clone(), json!(self.session.user_id))
            .with("user_name", json!(self.session.user_name))
            .with("created_at", json!(Utc::now().to_rfc3339()));
        let id = row.id.clone();

        let seq = self.seq.next();
        self.state.insert_row(row.clone())?;
        self.reconciler.begin(PendingMutation::new(
            seq,
            id.clone(),
            PendingKind::Insert,
            Undo::RemoveInserted { row_id: id.clone() },
        ));

        match self.client.insert(&self.config.item_table, row).await {
            Ok(saved) => {
                self.settle(seq, Ok(()))?;
                // the server may have filled defaults; fold them in
                let _ = self
                    .state
                    .merge_row_fields(&id, &saved.fields, &Default::default());
                Ok(id)
            }
            Err(err) => {
                let _ = self.settle(seq, Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Optimistically patch an item's fields. The patched fields stay
    /// guarded against remote overwrites until the call resolves.
    pub async fn update_item(&mut self, id: &RowId, patch: Patch) -> Result<()> {
        let row = self
            .state
            .row(id)
            .ok_or_else(|| SyncError::RowNotFound(id.clone()))?;
        self.session
            .check_can_mutate(row, &self.config.owner_field)?;

        let touched = patch.field_names();
        let (present, absent) = Undo::capture_fields(row, &touched);

        let seq = self.seq.next();
        self.state
            .merge_row_fields(id, patch.fields(), &Default::default())?;
        self.reconciler.begin(
            PendingMutation::new(
                seq,
                id.clone(),
                PendingKind::Update,
                Undo::RestoreFields {
                    row_id: id.clone(),
                    present,
                    absent,
                },
            )
            .guarding(touched),
        );

        let outcome = self.client.update(&self.config.item_table, id, patch).await;
        self.settle(seq, outcome)
    }

    /// Optimistically delete an item. Only the creator or an admin may.
    pub async fn delete_item(&mut self, id: &RowId) -> Result<()> {
        let row = self
            .state
            .row(id)
            .ok_or_else(|| SyncError::RowNotFound(id.clone()))?;
        self.session
            .check_can_mutate(row, &self.config.owner_field)?;

        let membership = self.state.container_of(id).cloned().and_then(|c| {
            let index = self.state.container(&c)?.position(id)?;
            Some((c, index))
        });

        let seq = self.seq.next();
        let removed = self
            .state
            .remove_row(id)
            .ok_or_else(|| SyncError::RowNotFound(id.clone()))?;
        self.reconciler.begin(PendingMutation::new(
            seq,
            id.clone(),
            PendingKind::Delete,
            Undo::RestoreRow {
                row: removed,
                membership,
            },
        ));

        let outcome = self.client.delete(&self.config.item_table, id).await;
        self.settle(seq, outcome)
    }

    // ------------------------------------------------------------------
    // Ordering actions
    // ------------------------------------------------------------------

    /// Drag-and-drop within one container. Order is client-authoritative:
    /// the persistence call confirms the moved row still exists, and
    /// whatever order the mutation determined stands once it succeeds.
    pub async fn reorder(&mut self, container: &RowId, from: usize, to: usize) -> Result<()> {
        let before = self.state.reorder(container, from, to)?;
        let moved = before
            .get(from)
            .cloned()
            .ok_or_else(|| SyncError::IndexOutOfBounds {
                container: container.clone(),
                index: from,
                len: before.len(),
            })?;

        let seq = self.seq.next();
        self.reconciler.begin(PendingMutation::new(
            seq,
            moved.clone(),
            PendingKind::Reorder,
            Undo::RestoreOrders {
                orders: vec![(container.clone(), before)],
                repoint: None,
            },
        ));

        let patch = Patch::new().set(
            self.config.container_ref_field.clone(),
            Value::String(container.to_string()),
        );
        let outcome = self
            .client
            .update(&self.config.item_table, &moved, patch)
            .await;
        self.settle(seq, outcome)
    }

    /// Drag an item into another container at `index`. Remove-from-source
    /// and insert-into-destination are one atomic step: a failed persistence
    /// call restores both sequences and the row's container reference.
    pub async fn move_between_containers(
        &mut self,
        item: &RowId,
        dst: &RowId,
        index: usize,
    ) -> Result<()> {
        let row = self
            .state
            .row(item)
            .ok_or_else(|| SyncError::RowNotFound(item.clone()))?;
        let src = self
            .state
            .container_of(item)
            .cloned()
            .ok_or_else(|| SyncError::RowNotFound(item.clone()))?;
        if self.state.container(dst).is_none() {
            return Err(SyncError::ContainerNotFound(dst.clone()));
        }

        let ref_field = self.config.container_ref_field.clone();
        let touched = [ref_field.clone()].into();
        let (present, _) = Undo::capture_fields(row, &touched);
        let src_order = self
            .state
            .container(&src)
            .map(|c| c.order())
            .unwrap_or_default();
        let dst_order = self
            .state
            .container(dst)
            .map(|c| c.order())
            .unwrap_or_default();

        let seq = self.seq.next();
        self.state.move_between(item, dst, index)?;
        self.reconciler.begin(
            PendingMutation::new(
                seq,
                item.clone(),
                PendingKind::Move,
                Undo::RestoreOrders {
                    orders: vec![(src, src_order), (dst.clone(), dst_order)],
                    repoint: Some((item.clone(), present)),
                },
            )
            .guarding(touched),
        );

        let patch = Patch::new().set(ref_field, Value::String(dst.to_string()));
        let outcome = self.client.update(&self.config.item_table, item, patch).await;
        self.settle(seq, outcome)
    }

    // ------------------------------------------------------------------
    // Container actions (admin)
    // ------------------------------------------------------------------

    pub async fn add_container(&mut self, title: &str) -> Result<RowId> {
        self.session.check_admin()?;

        let row = Row::new(self.config.container_table.clone(), RowId::random())
            .with(self.config.title_field.clone(), json!(title))
            .with("created_at", json!(Utc::now().to_rfc3339()));
        let id = row.id.clone();

        let seq = self.seq.next();
        self.state.insert_container(row.clone())?;
        self.reconciler.begin(PendingMutation::new(
            seq,
            id.clone(),
            PendingKind::Insert,
            Undo::RemoveInsertedContainer {
                container_id: id.clone(),
            },
        ));

        let outcome = self
            .client
            .insert(&self.config.container_table, row)
            .await
            .map(|_| ());
        self.settle(seq, outcome)?;
        Ok(id)
    }

    pub async fn rename_container(&mut self, id: &RowId, title: &str) -> Result<()> {
        self.session.check_admin()?;
        let container = self
            .state
            .container(id)
            .ok_or_else(|| SyncError::ContainerNotFound(id.clone()))?;

        let patch = Patch::new().set(self.config.title_field.clone(), json!(title));
        let touched = patch.field_names();
        let (present, absent) = Undo::capture_fields(container.row(), &touched);

        let seq = self.seq.next();
        self.state
            .merge_container_fields(id, patch.fields(), &Default::default())?;
        self.reconciler.begin(
            PendingMutation::new(
                seq,
                id.clone(),
                PendingKind::Update,
                Undo::RestoreContainerFields {
                    container_id: id.clone(),
                    present,
                    absent,
                },
            )
            .guarding(touched),
        );

        let outcome = self
            .client
            .update(&self.config.container_table, id, patch)
            .await;
        self.settle(seq, outcome)
    }

    /// Delete a container and everything it owns. The container row and its
    /// items are separate server-side deletes; if any of them fails the
    /// whole optimistic removal is rolled back.
    pub async fn delete_container(&mut self, id: &RowId) -> Result<()> {
        self.session.check_admin()?;

        let seq = self.seq.next();
        let (container, members) = self
            .state
            .remove_container(id)
            .ok_or_else(|| SyncError::ContainerNotFound(id.clone()))?;
        let member_ids: Vec<RowId> = members.iter().map(|row| row.id.clone()).collect();
        self.reconciler.begin(PendingMutation::new(
            seq,
            id.clone(),
            PendingKind::Delete,
            Undo::RestoreContainer { container, members },
        ));

        let outcome = async {
            self.client
                .delete(&self.config.container_table, id)
                .await?;
            for member in &member_ids {
                self.client.delete(&self.config.item_table, member).await?;
            }
            Ok(())
        }
        .await;
        self.settle(seq, outcome)
    }
}
