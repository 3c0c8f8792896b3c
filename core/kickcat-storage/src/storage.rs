use async_trait::async_trait;
use kickcat_model::{Entity, EntitySchemaRegistry, EntityType};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{EntityRegistry, EntryId, EntryState, StorageEntry, StorageResult};

/// A place entities are read from and committed to.
///
/// Adapters keep their entries in an [`EntityRegistry`] and hand out
/// [`EntryId`]s. Mutations go through [`registry_mut`](Self::registry_mut)
/// and only reach the backing store on [`commit`](Self::commit).
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Where an entry lives in the backing store.
    type Cookie: Clone + Default + Send + Sync + 'static;

    fn entity_schema_registry(&self) -> &Arc<EntitySchemaRegistry>;

    /// Entries loaded so far. Call [`load`](Self::load) (or any async
    /// lookup) first.
    fn registry(&self) -> &EntityRegistry<Self::Cookie>;

    fn registry_mut(&mut self) -> &mut EntityRegistry<Self::Cookie>;

    /// Reads the backing store if not done yet.
    async fn load(&mut self) -> StorageResult<()>;

    /// Flushes staged changes: NEW and DIRTY entries become CLEAN, KILLED
    /// ones are removed.
    async fn commit(&mut self) -> StorageResult<()>;

    /// Point lookup by identity fields of `filter`.
    async fn one(
        &mut self,
        entity_type: EntityType,
        filter: &Map<String, Value>,
    ) -> StorageResult<Option<EntryId>> {
        self.load().await?;
        Ok(self.registry().one(entity_type, filter))
    }

    /// Every entry, optionally of one type.
    async fn all(&mut self, of: Option<EntityType>) -> StorageResult<Vec<EntryId>> {
        self.load().await?;
        Ok(self.registry().all(of))
    }

    /// Stages a new entity; it is written on the next commit.
    async fn new_entry(&mut self, entity_type: EntityType, entity: Entity) -> StorageResult<EntryId> {
        self.load().await?;
        let schema = self.entity_schema_registry().require(entity_type)?.clone();
        let mut entry = StorageEntry::new(schema, entity, Self::Cookie::default());
        entry.attach(EntryState::New)?;
        self.registry_mut().set(entry)
    }
}
