// ============================================================================
// Subscription lifecycle
// ============================================================================
//
// One handle per (table, screen). The handle owns a forwarding task that
// stamps raw feed events with the screen's sequence counter and pushes them
// into the screen's intake channel. A dropped or lagged channel is treated
// as recoverable: the task silently resubscribes and tells the screen to
// refetch, so no event is double-applied and none is silently lost.
//
// Closing is explicit at unmount; Drop aborts the task as a backstop so an
// unmounted screen can never leak a live subscription.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::{Result, SyncError};
use crate::feed::{ChangeFeed, StampedEvent};
use crate::reconcile::SeqCounter;

/// Failures to resubscribe are logged at warn only after this many attempts;
/// a single transient drop stays silent.
const RESUBSCRIBE_QUIET_ATTEMPTS: u32 = 3;

/// What the forwarding task pushes into the screen's intake channel.
#[derive(Debug)]
pub enum FeedNotice {
    Event(StampedEvent),
    /// The channel dropped and was reopened. Events in the gap are unknown;
    /// the screen must refetch and merge.
    Resubscribed { table: String },
}

/// Owns one open change-feed channel.
pub struct SubscriptionHandle {
    table: String,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Signals the forwarding task to stop and waits for it to finish.
    pub async fn close(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                SyncError::SubscriptionClosed(format!("subscription task join: {}", err))
            })?;
        }
        Ok(())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Open a subscription for `table` and start forwarding its events into
/// `intake`, stamped from `seq`. Fails only if the initial subscribe fails;
/// later drops are handled inside the task.
pub async fn open_subscription(
    feed: Arc<dyn ChangeFeed>,
    table: &str,
    seq: SeqCounter,
    intake: mpsc::Sender<FeedNotice>,
) -> Result<SubscriptionHandle> {
    let mut rx = feed.subscribe(table).await?;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let table_owned = table.to_string();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let stamped = StampedEvent { seq: seq.next(), event };
                            if intake.send(FeedNotice::Event(stamped)).await.is_err() {
                                // screen gone
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::debug!(table = %table_owned, missed,
                                "feed lagged, resubscribing");
                            match resubscribe(feed.as_ref(), &table_owned, &intake).await {
                                Some(fresh) => rx = fresh,
                                None => break,
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!(table = %table_owned,
                                "feed channel closed, resubscribing");
                            match resubscribe(feed.as_ref(), &table_owned, &intake).await {
                                Some(fresh) => rx = fresh,
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    });

    Ok(SubscriptionHandle {
        table: table.to_string(),
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    })
}

/// Retry the subscribe until it sticks, then notify the screen to refetch.
/// Returns `None` when the screen's intake channel is gone.
async fn resubscribe(
    feed: &dyn ChangeFeed,
    table: &str,
    intake: &mpsc::Sender<FeedNotice>,
) -> Option<broadcast::Receiver<crate::feed::FeedEvent>> {
    let mut attempts: u32 = 0;
    loop {
        if intake.is_closed() {
            return None;
        }
        match feed.subscribe(table).await {
            Ok(rx) => {
                let notice = FeedNotice::Resubscribed {
                    table: table.to_string(),
                };
                if intake.send(notice).await.is_err() {
                    return None;
                }
                return Some(rx);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= RESUBSCRIBE_QUIET_ATTEMPTS {
                    tracing::warn!(table = %table, attempts, error = %err,
                        "resubscription keeps failing");
                }
                sleep(Duration::from_millis(50 * u64::from(attempts.min(20)))).await;
            }
        }
    }
}
