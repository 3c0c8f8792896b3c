//! Storage entry: one entity snapshot plus its lifecycle.
//!
//! ```text
//! DETACHED ──attach──▶ NEW ──commit──▶ CLEAN ◀──change/merge/substitute──▶ DIRTY
//!              │        │                 │                                  │
//!              │        └──delete──▶ DETACHED (dropped on commit)            │
//!              └──────▶ CLEAN             └────────────delete────────────▶ KILLED
//! ```
//!
//! Content mutators only work on CLEAN or DIRTY entries and always install a
//! new snapshot; the previous one is never touched.

use kickcat_model::{Entity, EntitySchema, EntityType, PropertySchema};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::{EntityRegistry, StorageError, StorageResult};

/// Handle of an entry inside one [`EntityRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a [`StorageEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Not owned by any adapter.
    Detached,
    /// Owned by an adapter, never committed.
    New,
    /// Matches the last commit.
    Clean,
    /// Changed since load or commit.
    Dirty,
    /// Marked for deletion; removed once a commit flushes it.
    Killed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryState::Detached => "detached",
            EntryState::New => "new",
            EntryState::Clean => "clean",
            EntryState::Dirty => "dirty",
            EntryState::Killed => "killed",
        })
    }
}

/// Result of trying to rewrite an entry's references as primary keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyResolution {
    /// The snapshot with every resolvable reference rewritten.
    pub entity: Entity,
    /// False when at least one reference could not be resolved yet.
    pub complete: bool,
}

/// One entity snapshot tracked by a storage adapter.
///
/// `C` is the adapter's cookie: an opaque token telling the adapter where
/// the entity lives (a file and position, a remote URL, nothing at all).
#[derive(Debug, Clone)]
pub struct StorageEntry<C = ()> {
    schema: Arc<EntitySchema>,
    entity: Entity,
    hash: Option<String>,
    pending_hash: Option<String>,
    state: EntryState,
    cookie: C,
}

impl<C> StorageEntry<C> {
    /// A detached entry with no saved hash.
    pub fn new(schema: Arc<EntitySchema>, entity: Entity, cookie: C) -> Self {
        Self {
            schema,
            entity,
            hash: None,
            pending_hash: None,
            state: EntryState::Detached,
            cookie,
        }
    }

    /// Sets the hash of the last committed content.
    #[must_use]
    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.hash = hash;
        self
    }

    /// Hands a detached entry to an adapter as NEW or CLEAN.
    pub fn attach(&mut self, state: EntryState) -> StorageResult<()> {
        if self.state != EntryState::Detached
            || !matches!(state, EntryState::New | EntryState::Clean)
        {
            return Err(StorageError::InvalidStateTransition {
                state: self.state,
                operation: "attached",
            });
        }
        self.state = state;
        Ok(())
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn entity_type(&self) -> EntityType {
        self.schema.entity_type()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Hash of the last committed content, if ever committed.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Hash of the current snapshot.
    pub fn current_hash(&self) -> String {
        self.entity.hash()
    }

    /// True when the current snapshot differs from the last committed one.
    pub fn has_uncommitted_changes(&self) -> bool {
        self.hash.as_deref() != Some(self.current_hash().as_str())
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Whether the next commit has something to write for this entry.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, EntryState::Clean)
    }

    pub fn cookie(&self) -> &C {
        &self.cookie
    }

    pub fn cookie_mut(&mut self) -> &mut C {
        &mut self.cookie
    }

    // ── Mutation ─────────────────────────────────────────────────

    fn ensure_mutable(&self, operation: &'static str) -> StorageResult<()> {
        match self.state {
            EntryState::Clean | EntryState::Dirty => Ok(()),
            state => Err(StorageError::InvalidStateTransition { state, operation }),
        }
    }

    fn install(&mut self, entity: Entity) {
        self.entity = entity;
        self.state = EntryState::Dirty;
    }

    /// Replaces the snapshot of a NEW entry before its first commit.
    pub(crate) fn stage(&mut self, entity: Entity) {
        self.entity = entity;
    }

    /// Shallow-merges `changes` into a new snapshot.
    pub fn change(&mut self, changes: &Map<String, Value>) -> StorageResult<()> {
        self.ensure_mutable("changed")?;
        let entity = self.entity.with_changes(changes);
        self.install(entity);
        Ok(())
    }

    /// Replaces the snapshot wholesale.
    pub fn substitute(&mut self, entity: Entity) -> StorageResult<()> {
        self.ensure_mutable("substituted")?;
        self.install(entity);
        Ok(())
    }

    /// Like [`substitute`](Self::substitute), but array-valued reference
    /// properties are unioned with the current ones, and a reference the
    /// incoming snapshot lacks keeps its current value.
    pub fn merge(&mut self, incoming: Entity) -> StorageResult<()> {
        self.ensure_mutable("merged")?;

        let mut merged = incoming.clone();
        for property in self.schema.reference_properties() {
            let name = property.name.as_str();
            match (self.entity.get(name), incoming.get(name)) {
                (Some(current), Some(next))
                    if current.is_array() || next.is_array() =>
                {
                    merged = merged.with(name, Value::Array(union(items(current), items(next))));
                }
                (Some(current), None) => {
                    merged = merged.with(name, current.clone());
                }
                _ => {}
            }
        }

        self.install(merged);
        Ok(())
    }

    /// Marks the entry for deletion. A NEW entry detaches instead and simply
    /// vanishes on commit.
    pub fn delete(&mut self) -> StorageResult<()> {
        match self.state {
            EntryState::New => self.state = EntryState::Detached,
            EntryState::Clean | EntryState::Dirty | EntryState::Killed => {
                self.state = EntryState::Killed;
            }
            EntryState::Detached => {
                return Err(StorageError::InvalidStateTransition {
                    state: self.state,
                    operation: "deleted",
                });
            }
        }
        Ok(())
    }

    /// Makes the next commit record `hash` as the saved hash instead of the
    /// hash of the committed snapshot. The entry then keeps counting as
    /// changed, for snapshots holding more than the other side received.
    pub fn save_hash_on_commit(&mut self, hash: String) {
        self.pending_hash = Some(hash);
    }

    /// Records a successful commit of `entity`.
    pub fn clean(&mut self, entity: Entity) -> StorageResult<()> {
        match self.state {
            EntryState::New | EntryState::Clean | EntryState::Dirty => {
                self.hash = Some(self.pending_hash.take().unwrap_or_else(|| entity.hash()));
                self.entity = entity;
                self.state = EntryState::Clean;
                Ok(())
            }
            state => Err(StorageError::InvalidStateTransition {
                state,
                operation: "cleaned",
            }),
        }
    }

    // ── Identity ─────────────────────────────────────────────────

    fn scalar_value(&self, property: &PropertySchema) -> Option<&Value> {
        self.entity.get(&property.name).filter(|v| is_scalar(v))
    }

    pub fn primary_key(&self) -> Option<&Value> {
        self.schema
            .primary_key_property()
            .and_then(|p| self.scalar_value(p))
    }

    pub fn unique_keys(&self) -> Vec<(&str, &Value)> {
        self.schema
            .unique_properties()
            .filter_map(|p| self.scalar_value(p).map(|v| (p.name.as_str(), v)))
            .collect()
    }

    pub fn new_unique_keys(&self) -> Vec<(&str, &Value)> {
        self.schema
            .new_unique_properties()
            .filter_map(|p| self.scalar_value(p).map(|v| (p.name.as_str(), v)))
            .collect()
    }

    /// Primary key, else first unique key, else first new-unique key.
    pub fn preferred_unique_key(&self) -> Option<(&str, &Value)> {
        self.schema
            .identity_properties()
            .find_map(|p| self.scalar_value(p).map(|v| (p.name.as_str(), v)))
    }

    /// Every scalar identity value this entry can be referenced by.
    pub fn identity_values(&self) -> Vec<&Value> {
        self.schema
            .identity_properties()
            .filter_map(|p| self.scalar_value(p))
            .collect()
    }

    // ── References ───────────────────────────────────────────────

    fn reference_target(&self, property: &str) -> StorageResult<EntityType> {
        self.schema
            .property(property)
            .and_then(|p| p.reference)
            .ok_or_else(|| StorageError::NotAReference {
                entity_type: self.entity_type(),
                property: property.to_string(),
            })
    }

    /// Resolves a scalar reference property to the referenced entry.
    pub fn reference<R>(
        &self,
        property: &str,
        registry: &EntityRegistry<R>,
    ) -> StorageResult<Option<EntryId>> {
        let target = self.reference_target(property)?;
        match self.entity.get(property) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(_)) => Err(StorageError::InvalidData(format!(
                "reference \"{property}\" of {} holds several values",
                self.entity_type()
            ))),
            Some(value) => registry.resolve(target, value),
        }
    }

    /// Resolves a scalar or array reference property to every referenced
    /// entry that can be found.
    pub fn references<R>(
        &self,
        property: &str,
        registry: &EntityRegistry<R>,
    ) -> StorageResult<Vec<EntryId>> {
        let target = self.reference_target(property)?;
        let mut found = Vec::new();
        for value in self.entity.get(property).map(items).unwrap_or_default() {
            if let Some(id) = registry.resolve(target, &value)? {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// Computes the snapshot with every reference rewritten to the
    /// referenced entity's primary key where that is already known.
    pub fn resolve_dependencies<R>(
        &self,
        registry: &EntityRegistry<R>,
    ) -> StorageResult<DependencyResolution> {
        let mut entity = self.entity.clone();
        let mut complete = true;

        for property in self.schema.reference_properties() {
            let Some(target) = property.reference else {
                continue;
            };
            let name = property.name.as_str();

            match self.entity.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(values)) => {
                    let mut rewritten = Vec::with_capacity(values.len());
                    for value in values {
                        match registry.primary_key_of(target, value)? {
                            Some(primary_key) => rewritten.push(primary_key),
                            None => {
                                complete = false;
                                rewritten.push(value.clone());
                            }
                        }
                    }
                    if &rewritten != values {
                        entity = entity.with(name, Value::Array(rewritten));
                    }
                }
                Some(value) => match registry.primary_key_of(target, value)? {
                    Some(primary_key) if &primary_key != value => {
                        entity = entity.with(name, primary_key);
                    }
                    Some(_) => {}
                    None => complete = false,
                },
            }
        }

        Ok(DependencyResolution { entity, complete })
    }

    /// The current snapshot without references that are not primary keys
    /// yet. Unresolved array items are dropped; an unresolved scalar drops
    /// the whole property, which is an error when the property is required.
    pub fn entity_free_of_non_primary_key_dependencies<R>(
        &self,
        registry: &EntityRegistry<R>,
    ) -> StorageResult<Entity> {
        let mut entity = self.entity.clone();

        for property in self.schema.reference_properties() {
            let Some(target) = property.reference else {
                continue;
            };
            let name = property.name.as_str();

            match self.entity.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(values)) => {
                    let mut kept = Vec::with_capacity(values.len());
                    for value in values {
                        if registry.is_primary_key_reference(target, value)? {
                            kept.push(value.clone());
                        }
                    }
                    if kept.len() != values.len() {
                        entity = entity.with(name, Value::Array(kept));
                    }
                }
                Some(value) => {
                    if !registry.is_primary_key_reference(target, value)? {
                        if property.required {
                            return Err(StorageError::RequiredReference {
                                entity_type: self.entity_type(),
                                property: property.name.clone(),
                            });
                        }
                        entity = entity.without(name);
                    }
                }
            }
        }

        Ok(entity)
    }

    /// Required scalar references that are not primary keys yet, each with
    /// the entry it designates in `registry`, if any.
    pub fn unresolved_required_references<R>(
        &self,
        registry: &EntityRegistry<R>,
    ) -> StorageResult<Vec<(String, Option<EntryId>)>> {
        let mut unresolved = Vec::new();
        for property in self.schema.reference_properties().filter(|p| p.required) {
            let Some(target) = property.reference else {
                continue;
            };
            let Some(value) = self.entity.get(&property.name).filter(|v| is_scalar(v)) else {
                continue;
            };
            if !registry.is_primary_key_reference(target, value)? {
                unresolved.push((property.name.clone(), registry.resolve(target, value)?));
            }
        }
        Ok(unresolved)
    }

    /// Removes every reference to `other` from this entry. Returns whether
    /// anything changed.
    pub fn free_of<R>(&mut self, other: &StorageEntry<R>) -> StorageResult<bool> {
        if !matches!(self.state, EntryState::Clean | EntryState::Dirty) {
            return Ok(false);
        }

        let other_type = other.entity_type();
        let identity = other.identity_values();
        if identity.is_empty() {
            return Ok(false);
        }

        let mut entity = self.entity.clone();
        let mut changed = false;

        for property in self
            .schema
            .reference_properties()
            .filter(|p| p.reference == Some(other_type))
        {
            let name = property.name.as_str();
            match self.entity.get(name) {
                Some(Value::Array(values)) => {
                    let kept: Vec<Value> = values
                        .iter()
                        .filter(|v| !identity.contains(v))
                        .cloned()
                        .collect();
                    if kept.len() != values.len() {
                        entity = entity.with(name, Value::Array(kept));
                        changed = true;
                    }
                }
                Some(value) if identity.contains(&value) => {
                    if property.required {
                        return Err(StorageError::RequiredReference {
                            entity_type: self.entity_type(),
                            property: property.name.clone(),
                        });
                    }
                    entity = entity.without(name);
                    changed = true;
                }
                _ => {}
            }
        }

        if changed {
            self.install(entity);
        }
        Ok(changed)
    }
}

pub(crate) fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_))
}

/// A reference value as a list: arrays as-is, null as empty, scalars as one.
fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn union(current: Vec<Value>, incoming: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(current.len() + incoming.len());
    for value in current.into_iter().chain(incoming) {
        if !merged.contains(&value) {
            merged.push(value);
        }
    }
    merged
}
