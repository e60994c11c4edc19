/// Reconciliation scenario tests
///
/// Drives a mounted screen against the in-memory backend and checks the
/// merge rules end to end: remote events from a second client, ordering,
/// cross-container moves, duplicate suppression.
/// Run with: cargo test --test reconciliation_tests
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncview::{
    MemoryBackend, Patch, PersistenceClient, Role, Row, RowId, Screen, ScreenConfig,
    SessionContext,
};

fn list(id: &str, title: &str) -> Row {
    Row::new("lists", RowId::from(id)).with("title", json!(title))
}

fn item(id: &str, list_id: &str, name: &str, user: &str) -> Row {
    Row::new("items", RowId::from(id))
        .with("list_id", json!(list_id))
        .with("name", json!(name))
        .with("user_id", json!(user))
        .with("user_name", json!("Sam"))
}

async fn mounted(role: Role) -> (MemoryBackend, Screen) {
    let backend = MemoryBackend::new();
    backend
        .seed("lists", vec![list("todo", "Todo"), list("done", "Done")])
        .await;
    backend
        .seed(
            "items",
            vec![
                item("a", "todo", "alpha", "u1"),
                item("b", "todo", "bravo", "u1"),
                item("c", "todo", "charlie", "u2"),
            ],
        )
        .await;

    let screen = Screen::mount(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionContext::new("u1", "Sam", role),
        ScreenConfig::default(),
    )
    .await
    .unwrap();
    (backend, screen)
}

fn order(screen: &Screen, container: &str) -> Vec<String> {
    screen
        .state()
        .container(&RowId::from(container))
        .unwrap()
        .items()
        .iter()
        .map(|id| id.to_string())
        .collect()
}

/// Let the subscription forwarding tasks run.
async fn settle_feed() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_initial_load() {
    let (_backend, screen) = mounted(Role::Staff).await;
    assert_eq!(screen.state().container_count(), 2);
    assert_eq!(order(&screen, "todo"), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_remote_insert_from_second_client_appends() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    backend
        .insert("items", item("z", "todo", "zulu", "u2"))
        .await
        .unwrap();
    settle_feed().await;
    screen.process_events().await;

    assert_eq!(order(&screen, "todo"), vec!["a", "b", "c", "z"]);
}

#[tokio::test]
async fn test_remote_update_merges_fields() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    backend
        .update(
            "items",
            &RowId::from("b"),
            Patch::new().set("name", json!("bravo-v2")),
        )
        .await
        .unwrap();
    settle_feed().await;
    screen.process_events().await;

    let row = screen.state().row(&RowId::from("b")).unwrap();
    assert_eq!(row.text("name"), Some("bravo-v2"));
    // untouched fields survive the merge
    assert_eq!(row.text("user_id"), Some("u1"));
}

#[tokio::test]
async fn test_remote_delete_removes_everywhere() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    backend.delete("items", &RowId::from("b")).await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    assert!(screen.state().row(&RowId::from("b")).is_none());
    assert_eq!(order(&screen, "todo"), vec!["a", "c"]);
}

#[tokio::test]
async fn test_own_writes_echo_without_duplicates() {
    let (_backend, mut screen) = mounted(Role::Staff).await;

    let id = screen.add_item(&RowId::from("todo"), "new task").await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    let occurrences = order(&screen, "todo")
        .iter()
        .filter(|entry| *entry == &id.to_string())
        .count();
    assert_eq!(occurrences, 1);
    assert_eq!(screen.state().row_count(), 4);
}

#[tokio::test]
async fn test_scenario_a_reorder_revert() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    // container ["a","b","c"]: move "c" to index 0, then fail persistence
    backend.fail_next(1, syncview::SyncError::Transport("503".into()));
    let err = screen.reorder(&RowId::from("todo"), 2, 0).await.unwrap_err();
    assert!(matches!(err, syncview::SyncError::Transport(_)));

    assert_eq!(order(&screen, "todo"), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_reorder_success_is_authoritative() {
    let (_backend, mut screen) = mounted(Role::Staff).await;

    screen.reorder(&RowId::from("todo"), 2, 0).await.unwrap();
    settle_feed().await;
    screen.process_events().await;

    // echo of the confirming update must not disturb client ordering
    assert_eq!(order(&screen, "todo"), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_scenario_c_cross_container_move() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    screen
        .move_between_containers(&RowId::from("c"), &RowId::from("done"), 0)
        .await
        .unwrap();
    settle_feed().await;
    screen.process_events().await;

    assert_eq!(order(&screen, "todo"), vec!["a", "b"]);
    assert_eq!(order(&screen, "done"), vec!["c"]);

    // the backend agrees
    let rows = backend.fetch("items", None).await.unwrap();
    let moved = rows.iter().find(|row| row.id == RowId::from("c")).unwrap();
    assert_eq!(moved.text("list_id"), Some("done"));
}

#[tokio::test]
async fn test_cross_container_move_failure_restores_both() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    backend.fail_next(1, syncview::SyncError::Transport("503".into()));
    screen
        .move_between_containers(&RowId::from("c"), &RowId::from("done"), 0)
        .await
        .unwrap_err();

    assert_eq!(order(&screen, "todo"), vec!["a", "b", "c"]);
    assert!(order(&screen, "done").is_empty());
    let row = screen.state().row(&RowId::from("c")).unwrap();
    assert_eq!(row.text("list_id"), Some("todo"));
}

#[tokio::test]
async fn test_no_duplicate_ids_under_interleaving() {
    let (backend, mut screen) = mounted(Role::Staff).await;

    // local insert racing a burst of remote traffic on the same container
    let id = screen.add_item(&RowId::from("todo"), "mine").await.unwrap();
    backend
        .insert("items", item("r1", "todo", "remote one", "u2"))
        .await
        .unwrap();
    backend
        .update(
            "items",
            &RowId::from("a"),
            Patch::new().set("name", json!("alpha-v2")),
        )
        .await
        .unwrap();
    backend.delete("items", &RowId::from("b")).await.unwrap();
    settle_feed().await;
    screen.process_events().await;
    screen.process_events().await;

    let todo = order(&screen, "todo");
    let mut deduped = todo.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(todo.len(), deduped.len(), "duplicate ids in container: {todo:?}");
    assert!(todo.contains(&id.to_string()));
    assert!(!todo.contains(&"b".to_string()));
}
