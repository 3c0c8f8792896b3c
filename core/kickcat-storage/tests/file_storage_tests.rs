use kickcat_model::{Entity, EntitySchemaRegistry, EntityType};
use kickcat_storage::{
    EntityStorage, EntryState, FileStorage, FileStorageConfig, StorageError,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

fn schemas() -> Arc<EntitySchemaRegistry> {
    Arc::new(EntitySchemaRegistry::builtin().unwrap())
}

fn storage(dir: &Path) -> FileStorage {
    FileStorage::new(FileStorageConfig::new(dir), schemas())
}

fn entity(value: Value) -> Entity {
    Entity::from_value(value).unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Loading ──────────────────────────────────────────────────────

#[tokio::test]
async fn missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = storage(&dir.path().join("nowhere"));

    assert!(storage.all(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn loads_records_as_clean_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.json"),
        r#"[{ "hash": "abc", "entity": { "name": "bug", "color": "f00" } }]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    let ids = storage.all(Some(EntityType::Label)).await.unwrap();
    assert_eq!(ids.len(), 1);

    let entry = storage.registry().entry(ids[0]).unwrap();
    assert_eq!(entry.state(), EntryState::Clean);
    assert_eq!(entry.hash(), Some("abc"));
    assert!(entry.has_uncommitted_changes());
    assert_eq!(entry.cookie().position, Some(0));
}

#[tokio::test]
async fn skips_invalid_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.json"),
        r#"[
            { "hash": null, "entity": { "name": "bug", "color": "f00" } },
            { "hash": null, "entity": { "color": "0f0" } },
            { "entity": [1, 2] },
            "nonsense"
        ]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    let ids = storage.all(Some(EntityType::Label)).await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(storage.registry().entry(ids[0]).unwrap().hash(), None);
    assert_eq!(storage.skipped(), 3);
}

#[tokio::test]
async fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("issue.json"), "{ nope").unwrap();

    let mut storage = storage(dir.path());
    let err = storage.all(None).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

// ── Committing ───────────────────────────────────────────────────

#[tokio::test]
async fn commit_writes_records_in_schema_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = storage(dir.path());
    storage
        .new_entry(
            EntityType::Issue,
            entity(json!({ "description": "boom", "state": "open", "title": "Crash", "number": 4 })),
        )
        .await
        .unwrap();
    storage.commit().await.unwrap();

    let content = std::fs::read_to_string(dir.path().join("issue.json")).unwrap();
    let number = content.find("\"number\"").unwrap();
    let title = content.find("\"title\"").unwrap();
    let state = content.find("\"state\"").unwrap();
    let description = content.find("\"description\"").unwrap();
    assert!(number < title && title < state && state < description);

    let records = read_json(&dir.path().join("issue.json"));
    let expected_hash = entity(json!({ "number": 4, "title": "Crash", "state": "open", "description": "boom" })).hash();
    assert_eq!(records[0]["hash"], json!(expected_hash));
}

#[tokio::test]
async fn committed_records_reload_clean() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = storage(dir.path());
    first
        .new_entry(EntityType::Milestone, entity(json!({ "number": 1, "title": "v1" })))
        .await
        .unwrap();
    first.commit().await.unwrap();

    let mut second = storage(dir.path());
    let ids = second.all(Some(EntityType::Milestone)).await.unwrap();
    let entry = second.registry().entry(ids[0]).unwrap();
    assert_eq!(entry.state(), EntryState::Clean);
    assert!(!entry.has_uncommitted_changes());
    assert_eq!(entry.entity(), &entity(json!({ "number": 1, "title": "v1" })));
}

#[tokio::test]
async fn commit_rewrites_only_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    let labels = r#"[{"hash":null,"entity":{"name":"bug","color":"f00"}}]"#;
    std::fs::write(dir.path().join("label.json"), labels).unwrap();
    std::fs::write(
        dir.path().join("milestone.json"),
        r#"[{"hash":null,"entity":{"number":1,"title":"v1"}}]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    let filter = json!({ "number": 1 });
    let milestone = storage
        .one(EntityType::Milestone, filter.as_object().unwrap())
        .await
        .unwrap()
        .unwrap();
    let changes = json!({ "title": "v1.0" });
    storage
        .registry_mut()
        .update(milestone, |entry| entry.change(changes.as_object().unwrap()))
        .unwrap();
    storage.commit().await.unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("label.json")).unwrap(), labels);
    let records = read_json(&dir.path().join("milestone.json"));
    assert_eq!(records[0]["entity"]["title"], json!("v1.0"));
    assert!(records[0]["hash"].is_string());
}

#[tokio::test]
async fn keeps_record_positions() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.json"),
        r#"[
            { "hash": null, "entity": { "name": "zeta", "color": "000" } },
            { "hash": null, "entity": { "name": "alpha", "color": "fff" } }
        ]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    storage
        .new_entry(EntityType::Label, entity(json!({ "name": "mid", "color": "888" })))
        .await
        .unwrap();
    storage.commit().await.unwrap();

    let records = read_json(&dir.path().join("label.json"));
    let names: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["entity"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn removes_file_left_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("label.json");
    std::fs::write(&path, r#"[{ "hash": null, "entity": { "name": "bug", "color": "f00" } }]"#).unwrap();

    let mut storage = storage(dir.path());
    let ids = storage.all(Some(EntityType::Label)).await.unwrap();
    storage.registry_mut().update(ids[0], |entry| entry.delete()).unwrap();
    storage.commit().await.unwrap();

    assert!(!path.exists());
}

#[tokio::test]
async fn assigns_primary_keys_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("issue.json"),
        r#"[{ "hash": null, "entity": { "number": 41, "title": "Old" } }]"#,
    )
    .unwrap();

    let config = FileStorageConfig {
        assign_primary_keys: true,
        ..FileStorageConfig::new(dir.path())
    };
    let mut storage = FileStorage::new(config, schemas());
    let id = storage
        .new_entry(EntityType::Issue, entity(json!({ "title": "New" })))
        .await
        .unwrap();
    storage.commit().await.unwrap();

    assert_eq!(storage.registry().entry(id).unwrap().primary_key(), Some(&json!(42)));
    let records = read_json(&dir.path().join("issue.json"));
    assert_eq!(records[1]["entity"]["number"], json!(42));
}

// ── Rewriting ────────────────────────────────────────────────────

#[tokio::test]
async fn rewrite_all_drops_invalid_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.json"),
        r#"[
            { "hash": null, "entity": { "color": "0f0" } },
            { "hash": "abc", "entity": { "name": "bug", "color": "f00" } }
        ]"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("milestone.json"),
        r#"[{ "hash": null, "entity": { "title": "v1", "number": 1 } }]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    let written = storage.rewrite_all().await.unwrap();

    assert_eq!(written, 2);
    assert_eq!(storage.skipped(), 1);
    assert_eq!(
        read_json(&dir.path().join("label.json")),
        json!([{ "hash": "abc", "entity": { "name": "bug", "color": "f00" } }])
    );
    let milestones = std::fs::read_to_string(dir.path().join("milestone.json")).unwrap();
    assert!(milestones.find("\"number\"").unwrap() < milestones.find("\"title\"").unwrap());
    assert!(!dir.path().join("issue.json").exists());
}

#[tokio::test]
async fn rewrite_all_keeps_positions_of_valid_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.json"),
        r#"[
            { "hash": null, "entity": { "name": "b", "color": "1" } },
            "broken",
            { "hash": null, "entity": { "name": "a", "color": "2" } }
        ]"#,
    )
    .unwrap();

    let mut storage = storage(dir.path());
    storage.rewrite_all().await.unwrap();

    let records = read_json(&dir.path().join("label.json"));
    assert_eq!(records[0]["entity"]["name"], json!("b"));
    assert_eq!(records[1]["entity"]["name"], json!("a"));
}
