// ============================================================================
// Todo board demo
// ============================================================================
//
// Two screens mounted on the same in-memory backend: actions on one arrive
// at the other through the change feed, and a simulated transport failure
// shows the optimistic rollback. Run with:
//
//   cargo run --example todo_board
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncview::{
    MemoryBackend, Role, Row, RowId, Screen, ScreenConfig, SessionContext, SyncError,
};

fn print_board(label: &str, screen: &Screen) {
    println!("--- {label} ---");
    for container in screen.state().containers() {
        let title = container.row().text("title").unwrap_or("?");
        println!("  [{title}]");
        for id in container.items().iter() {
            if let Some(row) = screen.state().row(id) {
                let name = row.text("name").unwrap_or("?");
                let by = row.text("user_name").unwrap_or("?");
                println!("    - {name} (by {by})");
            }
        }
    }
    println!();
}

async fn settle(screen: &mut Screen) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    screen.process_events().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let backend = MemoryBackend::new();
    backend
        .seed(
            "lists",
            vec![
                Row::new("lists", RowId::from("todo")).with("title", json!("Todo")),
                Row::new("lists", RowId::from("done")).with("title", json!("Done")),
            ],
        )
        .await;
    backend.create_table("items").await;

    let mut sam = Screen::mount(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionContext::new("u1", "Sam", Role::Admin),
        ScreenConfig::default(),
    )
    .await?;
    let mut dana = Screen::mount(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SessionContext::new("u2", "Dana", Role::Staff),
        ScreenConfig::default(),
    )
    .await?;

    // Sam adds two tasks; Dana sees them through the feed.
    sam.add_item(&RowId::from("todo"), "restock shelves").await?;
    let counted = sam.add_item(&RowId::from("todo"), "count drawer").await?;
    settle(&mut dana).await;
    print_board("Dana's screen after Sam's inserts", &dana);

    // Dana finishes a task by dragging it to Done.
    dana.move_between_containers(&counted, &RowId::from("done"), 0)
        .await?;
    settle(&mut sam).await;
    print_board("Sam's screen after Dana's move", &sam);

    // A transport failure rolls Sam's delete back in place.
    backend.fail_next(1, SyncError::Transport("connection reset".into()));
    match sam.delete_item(&counted).await {
        Ok(()) => println!("unexpected: delete went through"),
        Err(err) => println!("delete failed ({err}), board restored:\n"),
    }
    print_board("Sam's screen after the rollback", &sam);

    sam.unmount().await?;
    dana.unmount().await?;
    Ok(())
}
