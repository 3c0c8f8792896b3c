use kickcat_model::{EntitySchemaRegistry, EntityType, PrimitiveType};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::entry::is_scalar;
use crate::{EntryId, EntryState, StorageEntry, StorageError, StorageResult};

/// Scalar identity value as an index key. Strings and numbers never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Text(String),
    Number(String),
}

impl IndexKey {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(IndexKey::Text(s.clone())),
            Value::Number(n) => Some(IndexKey::Number(n.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexSlot {
    entity_type: EntityType,
    property: String,
    key: IndexKey,
}

impl IndexSlot {
    fn of(entity_type: EntityType, property: &str, value: &Value) -> Option<Self> {
        IndexKey::of(value).map(|key| Self {
            entity_type,
            property: property.to_string(),
            key,
        })
    }
}

/// What a commit flushed out of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Types with at least one created, changed or removed entry.
    pub touched: BTreeSet<EntityType>,
    /// Number of entries created, changed or removed.
    pub written: usize,
}

/// Arena of storage entries with an identity index.
///
/// Entries are keyed by [`EntryId`], handed out in insertion order. The
/// identity index maps (type, property, scalar value) to an entry for every
/// primary key and unique property, and for new-unique properties while the
/// entry has no primary key. A new-unique key indexed before the primary key
/// was assigned stays indexed as long as its value does not change.
#[derive(Debug, Clone)]
pub struct EntityRegistry<C = ()> {
    schemas: Arc<EntitySchemaRegistry>,
    entries: BTreeMap<EntryId, StorageEntry<C>>,
    index: HashMap<IndexSlot, EntryId>,
    slots: HashMap<EntryId, Vec<IndexSlot>>,
    next_id: u64,
}

impl<C> EntityRegistry<C> {
    pub fn new(schemas: Arc<EntitySchemaRegistry>) -> Self {
        Self {
            schemas,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            slots: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn schemas(&self) -> &Arc<EntitySchemaRegistry> {
        &self.schemas
    }

    /// Adds an entry. Fails if its entity does not validate.
    pub fn set(&mut self, entry: StorageEntry<C>) -> StorageResult<EntryId> {
        entry.schema().check(entry.entity())?;

        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, entry);
        self.reindex(id);
        Ok(id)
    }

    pub fn get(&self, id: EntryId) -> Option<&StorageEntry<C>> {
        self.entries.get(&id)
    }

    /// Like [`get`](Self::get), but a missing entry is an error.
    pub fn entry(&self, id: EntryId) -> StorageResult<&StorageEntry<C>> {
        self.get(id).ok_or(StorageError::EntryNotFound(id))
    }

    /// First live entry whose identity matches `filter`. Identity properties
    /// are tried in priority order (primary key, unique, new-unique); other
    /// filter fields are ignored.
    pub fn one(&self, entity_type: EntityType, filter: &Map<String, Value>) -> Option<EntryId> {
        let schema = self.schemas.get(entity_type)?;
        schema.identity_properties().find_map(|property| {
            filter
                .get(&property.name)
                .and_then(|value| self.find(entity_type, &property.name, value))
        })
    }

    /// Live entry indexed under exactly (type, property, value).
    pub fn find(&self, entity_type: EntityType, property: &str, value: &Value) -> Option<EntryId> {
        let slot = IndexSlot::of(entity_type, property, value)?;
        self.index
            .get(&slot)
            .copied()
            .filter(|id| self.entries.get(id).is_some_and(is_live))
    }

    /// Ids of every entry, optionally of one type, in insertion order.
    pub fn all(&self, of: Option<EntityType>) -> Vec<EntryId> {
        self.iter()
            .filter(|(_, entry)| of.is_none_or(|t| entry.entity_type() == t))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &StorageEntry<C>)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Removes an entry and all its index slots.
    pub fn delete(&mut self, id: EntryId) -> StorageResult<StorageEntry<C>> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(StorageError::EntryNotFound(id))?;
        self.reindex(id);
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Reference resolution ─────────────────────────────────────

    /// Finds the `target` entry a reference value designates, trying the
    /// primary key, then unique, then new-unique properties whose type
    /// admits the value.
    pub fn resolve(&self, target: EntityType, value: &Value) -> StorageResult<Option<EntryId>> {
        if !is_scalar(value) {
            return Ok(None);
        }
        let schema = self.schemas.require(target)?;
        let primitive = PrimitiveType::of(value);

        if schema.can_value_of_type_be_only_primary_key(primitive) {
            return Ok(schema
                .primary_key_property()
                .and_then(|p| self.find(target, &p.name, value)));
        }

        Ok(schema
            .identity_properties()
            .filter(|p| p.admits_scalar(primitive))
            .find_map(|p| self.find(target, &p.name, value)))
    }

    /// Primary key of the `target` entry a reference value designates, if
    /// known. A value that can only be a primary key is its own answer.
    pub fn primary_key_of(&self, target: EntityType, value: &Value) -> StorageResult<Option<Value>> {
        if !is_scalar(value) {
            return Ok(None);
        }
        let schema = self.schemas.require(target)?;
        if schema.can_value_of_type_be_only_primary_key(PrimitiveType::of(value)) {
            return Ok(Some(value.clone()));
        }

        Ok(self
            .resolve(target, value)?
            .and_then(|id| self.get(id))
            .and_then(|entry| entry.primary_key().cloned()))
    }

    /// Whether a reference value already is a primary key of `target`.
    pub fn is_primary_key_reference(&self, target: EntityType, value: &Value) -> StorageResult<bool> {
        Ok(self.primary_key_of(target, value)?.as_ref() == Some(value))
    }

    fn next_primary_key(&self, entity_type: EntityType) -> Option<(String, i64)> {
        let property = self.schemas.get(entity_type)?.primary_key_property()?;
        if property.primitive_type() != Some(PrimitiveType::Integer) {
            return None;
        }

        let highest = self
            .entries
            .values()
            .filter(|entry| entry.entity_type() == entity_type)
            .filter_map(|entry| entry.entity().get_i64(&property.name))
            .max()
            .unwrap_or(0);
        Some((property.name.clone(), highest + 1))
    }

    // ── Indexing ─────────────────────────────────────────────────

    fn reindex(&mut self, id: EntryId) {
        let previous = self.slots.remove(&id).unwrap_or_default();
        let current = match self.entries.get(&id) {
            Some(entry) => index_slots(entry, &previous),
            None => Vec::new(),
        };

        for slot in &previous {
            if !current.contains(slot) && self.index.get(slot) == Some(&id) {
                self.index.remove(slot);
            }
        }
        for slot in &current {
            self.index.insert(slot.clone(), id);
        }
        if !current.is_empty() {
            self.slots.insert(id, current);
        }
    }
}

impl<C: Clone> EntityRegistry<C> {
    /// Runs `f` on one entry, then re-indexes it. If `f` fails or leaves the
    /// entity invalid, the entry is restored and the error returned.
    pub fn update<T>(
        &mut self,
        id: EntryId,
        f: impl FnOnce(&mut StorageEntry<C>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(StorageError::EntryNotFound(id))?;
        let before = entry.clone();

        let outcome = match f(entry) {
            Ok(outcome) => outcome,
            Err(err) => {
                *entry = before;
                return Err(err);
            }
        };
        if let Err(err) = entry.schema().check(entry.entity()) {
            *entry = before;
            return Err(err.into());
        }

        self.reindex(id);
        Ok(outcome)
    }

    /// Rewrites the references of one entry to primary keys where possible.
    /// Returns false while some reference is still unresolved.
    pub fn try_bring_dependencies_to_primary_keys(&mut self, id: EntryId) -> StorageResult<bool> {
        let entry = self.entry(id)?;
        let resolution = entry.resolve_dependencies(self)?;
        if &resolution.entity != entry.entity() {
            let entity = resolution.entity;
            self.update(id, |entry| match entry.state() {
                EntryState::New => {
                    entry.stage(entity);
                    Ok(())
                }
                _ => entry.substitute(entity),
            })?;
        }
        Ok(resolution.complete)
    }

    /// Removes references to entry `id` from every other entry. Either all
    /// referencing entries are repaired or, when one of them can't drop the
    /// reference, none is. Returns the repaired entries.
    pub fn free_of(&mut self, id: EntryId) -> StorageResult<Vec<EntryId>> {
        let removed = self.entry(id)?.clone();
        let removed_type = removed.entity_type();

        let mut repaired = Vec::new();
        for (other, entry) in &self.entries {
            if *other == id || !entry.schema().references().contains(&removed_type) {
                continue;
            }
            let mut copy = entry.clone();
            if copy.free_of(&removed)? {
                repaired.push((*other, copy));
            }
        }

        let ids = repaired.iter().map(|(other, _)| *other).collect();
        for (other, copy) in repaired {
            self.update(other, |entry| {
                *entry = copy;
                Ok(())
            })?;
        }
        Ok(ids)
    }

    /// Applies a commit in memory: KILLED and DETACHED entries are removed,
    /// NEW and DIRTY ones become CLEAN. With `assign_primary_keys`, NEW
    /// entries of a type with an integer primary key get the next free one.
    pub fn flush(&mut self, assign_primary_keys: bool) -> StorageResult<FlushSummary> {
        let mut summary = FlushSummary::default();
        let ids: Vec<EntryId> = self.entries.keys().copied().collect();

        for id in ids {
            let entry = self.entry(id)?;
            let entity_type = entry.entity_type();
            match entry.state() {
                EntryState::Clean => {}
                EntryState::Detached => {
                    self.delete(id)?;
                }
                EntryState::Killed => {
                    self.delete(id)?;
                    summary.touched.insert(entity_type);
                    summary.written += 1;
                }
                state @ (EntryState::New | EntryState::Dirty) => {
                    let mut entity = entry.entity().clone();
                    if assign_primary_keys && state == EntryState::New && entry.primary_key().is_none() {
                        if let Some((name, next)) = self.next_primary_key(entity_type) {
                            entity = entity.with(name, Value::from(next));
                        }
                    }
                    self.update(id, |entry| entry.clean(entity))?;
                    summary.touched.insert(entity_type);
                    summary.written += 1;
                }
            }
        }

        Ok(summary)
    }
}

fn is_live<C>(entry: &StorageEntry<C>) -> bool {
    !matches!(entry.state(), EntryState::Detached | EntryState::Killed)
}

fn index_slots<C>(entry: &StorageEntry<C>, previous: &[IndexSlot]) -> Vec<IndexSlot> {
    let entity_type = entry.entity_type();
    let has_primary_key = entry.primary_key().is_some();
    let mut slots = Vec::new();

    let schema = entry.schema();
    if let Some(property) = schema.primary_key_property() {
        if let Some(slot) = entry
            .primary_key()
            .and_then(|value| IndexSlot::of(entity_type, &property.name, value))
        {
            slots.push(slot);
        }
    }
    for (name, value) in entry.unique_keys() {
        slots.extend(IndexSlot::of(entity_type, name, value));
    }
    for (name, value) in entry.new_unique_keys() {
        if let Some(slot) = IndexSlot::of(entity_type, name, value) {
            if !has_primary_key || previous.contains(&slot) {
                slots.push(slot);
            }
        }
    }

    slots
}
