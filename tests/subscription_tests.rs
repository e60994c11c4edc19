/// Subscription lifecycle tests
///
/// Drops, resubscription, and the refetch-merge that keeps a screen from
/// double-applying or losing events across a feed gap (the per-row delivery
/// ordering of the transport is an assumption, not a contract).
/// Run with: cargo test --test subscription_tests
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncview::{
    Fields, MemoryBackend, Patch, PersistenceClient, Role, Row, RowId, Screen, ScreenConfig,
    SessionContext,
};

fn list(id: &str, title: &str) -> Row {
    Row::new("lists", RowId::from(id)).with("title", json!(title))
}

fn item(id: &str, list_id: &str, name: &str) -> Row {
    Row::new("items", RowId::from(id))
        .with("list_id", json!(list_id))
        .with("name", json!(name))
        .with("user_id", json!("u1"))
}

async fn mounted() -> (MemoryBackend, Screen) {
    let backend = MemoryBackend::new();
    backend.seed("lists", vec![list("todo", "Todo")]).await;
    backend
        .seed(
            "items",
            vec![
                item("a", "todo", "alpha"),
                item("b", "todo", "bravo"),
                item("c", "todo", "charlie"),
            ],
        )
        .await;

    let screen = Screen::mount(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionContext::new("u1", "Sam", Role::Staff),
        ScreenConfig::default(),
    )
    .await
    .unwrap();
    (backend, screen)
}

async fn settle_feed() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

/// Flat snapshot of the screen's rows for whole-state comparisons.
fn snapshot(screen: &Screen) -> BTreeMap<RowId, Fields> {
    screen
        .state()
        .rows()
        .map(|row| (row.id.clone(), row.fields.clone()))
        .collect()
}

#[tokio::test]
async fn test_scenario_d_drop_then_resubscribe_equals_fresh_reload() {
    let (backend, mut screen) = mounted().await;

    // transport drop: events published in the gap never reach the screen
    backend.sever_feed("items");
    backend.insert("items", item("d", "todo", "delta")).await.unwrap();
    backend.delete("items", &RowId::from("b")).await.unwrap();
    backend
        .update(
            "items",
            &RowId::from("a"),
            Patch::new().set("name", json!("alpha-v2")),
        )
        .await
        .unwrap();

    // the worker notices the close, resubscribes, and the screen refetches
    settle_feed().await;
    screen.process_events().await;

    // a second screen mounted fresh is the ground truth
    let fresh = Screen::mount(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionContext::new("u9", "Checker", Role::Staff),
        ScreenConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(snapshot(&screen), snapshot(&fresh));
    assert_eq!(screen.state().row_count(), 3);
    assert!(screen.state().row(&RowId::from("b")).is_none());
}

#[tokio::test]
async fn test_resubscribe_does_not_duplicate_events() {
    let (backend, mut screen) = mounted().await;

    backend.sever_feed("items");
    settle_feed().await;

    // events after the gap arrive exactly once through the new channel,
    // and the refetch must not double-apply them
    backend.insert("items", item("e", "todo", "echo")).await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    let todo: Vec<String> = screen
        .state()
        .container(&RowId::from("todo"))
        .unwrap()
        .items()
        .iter()
        .map(|id| id.to_string())
        .collect();
    let occurrences = todo.iter().filter(|id| *id == "e").count();
    assert_eq!(occurrences, 1);
    assert_eq!(screen.state().row_count(), 4);
}

#[tokio::test]
async fn test_state_survives_transient_disconnect() {
    let (backend, mut screen) = mounted().await;

    backend.sever_feed("items");
    settle_feed().await;
    screen.process_events().await;

    // nothing changed server-side; the refetch-merge is a no-op
    assert_eq!(screen.state().row_count(), 3);
    assert_eq!(screen.state().container_count(), 1);
}

#[tokio::test]
async fn test_events_flow_after_recovery() {
    let (backend, mut screen) = mounted().await;

    backend.sever_feed("items");
    settle_feed().await;
    screen.process_events().await;

    backend.insert("items", item("f", "todo", "foxtrot")).await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    assert!(screen.state().row(&RowId::from("f")).is_some());
}

#[tokio::test]
async fn test_unmount_tears_down_subscriptions() {
    let (backend, screen) = mounted().await;
    screen.unmount().await.unwrap();

    // publishing after unmount must not hang or panic; nobody is listening
    backend.insert("items", item("g", "todo", "golf")).await.unwrap();
}

#[tokio::test]
async fn test_observer_notified_on_remote_event() {
    let (backend, mut screen) = mounted().await;
    let observer = screen.observe();
    let before = *observer.borrow();

    backend.insert("items", item("h", "todo", "hotel")).await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    assert!(*observer.borrow() > before);
}
