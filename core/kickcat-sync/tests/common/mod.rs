//! Shared test helpers for sync tests.

#![allow(dead_code)]

use kickcat_model::{Entity, EntitySchema, EntitySchemaRegistry, EntityType};
use kickcat_storage::{EntityStorage, EntryId, MemoryStorage, StorageEntry};
use kickcat_sync::SyncEngine;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub type Engine = SyncEngine<MemoryStorage, MemoryStorage>;

pub fn schemas() -> Arc<EntitySchemaRegistry> {
    Arc::new(EntitySchemaRegistry::builtin().unwrap())
}

/// Built-in schemas with an issue whose `milestone` is required.
pub fn schemas_with_required_milestone() -> Arc<EntitySchemaRegistry> {
    let mut registry = EntitySchemaRegistry::builtin().unwrap();
    registry.add(
        EntitySchema::parse(
            EntityType::Issue,
            &json!({
                "type": "object",
                "required": ["title", "milestone"],
                "properties": {
                    "number": { "type": "integer", "x-kickcat-primary-key": true },
                    "title": { "type": "string", "x-kickcat-new-unique": true },
                    "milestone": { "type": ["integer", "string"], "x-kickcat-reference": "milestone" },
                    "dependencies": {
                        "type": "array",
                        "items": { "type": ["integer", "string"] },
                        "x-kickcat-reference": "issue"
                    }
                }
            }),
        )
        .unwrap(),
    );
    Arc::new(registry)
}

/// Local memory storage plus a remote one that assigns primary keys.
pub fn engine() -> Engine {
    engine_with(schemas())
}

pub fn engine_with(schemas: Arc<EntitySchemaRegistry>) -> Engine {
    SyncEngine::new(
        MemoryStorage::new(schemas.clone()),
        MemoryStorage::new(schemas).assigning_primary_keys(),
    )
}

pub fn entity(value: Value) -> Entity {
    Entity::from_value(value).unwrap()
}

pub fn filter(key: &str, value: Value) -> Map<String, Value> {
    let mut filter = Map::new();
    filter.insert(key.to_string(), value);
    filter
}

/// A local entity that was never synced.
pub fn add_unsynced(storage: &mut MemoryStorage, entity_type: EntityType, value: Value) -> EntryId {
    storage.insert_with_hash(entity_type, entity(value), None).unwrap()
}

/// An entity synced as `saved` and edited to `current` since.
pub fn add_edited(
    storage: &mut MemoryStorage,
    entity_type: EntityType,
    saved: Value,
    current: Value,
) -> EntryId {
    let hash = entity(saved).hash();
    storage
        .insert_with_hash(entity_type, entity(current), Some(hash))
        .unwrap()
}

pub fn add_synced(storage: &mut MemoryStorage, entity_type: EntityType, value: Value) -> EntryId {
    storage.insert_clean(entity_type, entity(value)).unwrap()
}

pub fn entry(storage: &MemoryStorage, id: EntryId) -> &StorageEntry {
    storage.registry().entry(id).unwrap()
}

pub fn find<'a>(
    storage: &'a MemoryStorage,
    entity_type: EntityType,
    key: &str,
    value: Value,
) -> Option<&'a StorageEntry> {
    storage
        .registry()
        .one(entity_type, &filter(key, value))
        .map(|id| entry(storage, id))
}

// ── Log capture ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct LogBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct LogWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: self.buffer.clone(),
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }
}

/// Captures warnings on this thread until the guard is dropped.
pub fn capture_warnings() -> (LogBuffer, DefaultGuard) {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
