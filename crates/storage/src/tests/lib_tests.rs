use super::*;
use shared::domain::FieldChange;

async fn stored(storage: &Storage, item_id: i64) -> Option<Item> {
    let id = ItemId::from(item_id);
    storage
        .list_items()
        .await
        .expect("list")
        .into_iter()
        .find(|item| item.id == id)
}

#[tokio::test]
async fn creates_and_lists_items_in_insertion_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let milk = storage
        .create_item(&NewItem::new("Buy milk").with_priority(Priority::Low))
        .await
        .expect("create");
    let bread = storage
        .create_item(&NewItem::new("Buy bread"))
        .await
        .expect("create");

    assert!(!milk.completed);
    assert_eq!(milk.priority, Priority::Low);
    assert_eq!(milk.created_at, milk.updated_at);
    assert!(!milk.id.is_temporary());

    let items = storage.list_items().await.expect("list");
    assert_eq!(items, vec![milk, bread]);
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("items.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage
        .create_item(&NewItem::new("persisted"))
        .await
        .expect("create");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn update_applies_partial_changes_and_keeps_timestamps_monotonic() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created = storage
        .create_item(
            &NewItem::new("Write report")
                .with_description("quarterly")
                .with_due_date(NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")),
        )
        .await
        .expect("create");
    let item_id: i64 = created.id.as_str().parse().expect("numeric id");

    let changes = ItemChanges {
        completed: FieldChange::Set(true),
        due_date: FieldChange::Cleared,
        ..ItemChanges::default()
    };
    let updated = storage
        .update_item(item_id, &changes)
        .await
        .expect("update")
        .expect("item exists");

    assert!(updated.completed);
    assert_eq!(updated.due_date, None);
    assert_eq!(updated.description.as_deref(), Some("quarterly"));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);

    let reloaded = stored(&storage, item_id).await.expect("item exists");
    assert_eq!(reloaded, updated);
}

#[tokio::test]
async fn update_and_delete_report_missing_items() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let missing = storage
        .update_item(404, &ItemChanges::completed(true))
        .await
        .expect("update");
    assert!(missing.is_none());
    assert!(!storage.delete_item(404).await.expect("delete"));
}

#[tokio::test]
async fn delete_removes_item() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let item = storage
        .create_item(&NewItem::new("Take out trash"))
        .await
        .expect("create");
    let item_id: i64 = item.id.as_str().parse().expect("numeric id");

    assert!(storage.delete_item(item_id).await.expect("delete"));
    assert!(stored(&storage, item_id).await.is_none());
    assert!(storage.list_items().await.expect("list").is_empty());
}

#[tokio::test]
async fn update_rejects_clearing_required_fields() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let item = storage
        .create_item(&NewItem::new("Keep me"))
        .await
        .expect("create");
    let item_id: i64 = item.id.as_str().parse().expect("numeric id");

    let changes = ItemChanges {
        title: FieldChange::Cleared,
        ..ItemChanges::default()
    };
    storage
        .update_item(item_id, &changes)
        .await
        .expect_err("title is required");
    let reloaded = stored(&storage, item_id).await.expect("item");
    assert_eq!(reloaded.title, "Keep me");
}

#[test]
fn memory_urls_have_no_parent_directory() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/items.db?mode=rwc"),
        Some(PathBuf::from("./data/items.db"))
    );
}
