use async_trait::async_trait;
use kickcat_model::{Entity, EntitySchemaRegistry, EntityType};
use std::sync::Arc;
use tracing::debug;

use crate::{EntityRegistry, EntityStorage, EntryId, EntryState, StorageEntry, StorageResult};

/// In-memory adapter. Commits only update entry states; nothing is persisted.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    schemas: Arc<EntitySchemaRegistry>,
    registry: EntityRegistry<()>,
    assign_primary_keys: bool,
    commits: usize,
    writes: usize,
}

impl MemoryStorage {
    pub fn new(schemas: Arc<EntitySchemaRegistry>) -> Self {
        Self {
            registry: EntityRegistry::new(schemas.clone()),
            schemas,
            assign_primary_keys: false,
            commits: 0,
            writes: 0,
        }
    }

    /// Makes commits assign integer primary keys, like a remote tracker would.
    #[must_use]
    pub fn assigning_primary_keys(mut self) -> Self {
        self.assign_primary_keys = true;
        self
    }

    /// Adds an already committed entity.
    pub fn insert_clean(&mut self, entity_type: EntityType, entity: Entity) -> StorageResult<EntryId> {
        let hash = entity.hash();
        self.insert_with_hash(entity_type, entity, Some(hash))
    }

    /// Adds a CLEAN entry with an arbitrary saved hash, as if loaded from a
    /// store that was edited since the last sync.
    pub fn insert_with_hash(
        &mut self,
        entity_type: EntityType,
        entity: Entity,
        hash: Option<String>,
    ) -> StorageResult<EntryId> {
        let schema = self.schemas.require(entity_type)?.clone();
        let mut entry = StorageEntry::new(schema, entity, ()).with_hash(hash);
        entry.attach(EntryState::Clean)?;
        self.registry.set(entry)
    }

    /// Number of commits so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Entries created, changed or removed by all commits so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[async_trait]
impl EntityStorage for MemoryStorage {
    type Cookie = ();

    fn entity_schema_registry(&self) -> &Arc<EntitySchemaRegistry> {
        &self.schemas
    }

    fn registry(&self) -> &EntityRegistry<()> {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut EntityRegistry<()> {
        &mut self.registry
    }

    async fn load(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        let summary = self.registry.flush(self.assign_primary_keys)?;
        self.commits += 1;
        self.writes += summary.written;
        debug!("Memory commit: {} entries written", summary.written);
        Ok(())
    }
}
