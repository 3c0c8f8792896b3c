//! Sync engine: pull, pull-all, push-all and delete between a local and a
//! remote storage.
//!
//! Change detection is three-way: the hash saved with a local entry at its
//! last sync, the hash of its current snapshot, and the hash of the remote
//! snapshot.
//!
//! | current == remote | saved == remote | outcome                      |
//! |-------------------|-----------------|------------------------------|
//! | yes               | -               | unchanged                    |
//! | no                | yes             | local changed, update remote |
//! | no                | no              | conflict, remote wins        |
//!
//! Push runs in two passes. Entities created remotely in the first pass only
//! get their primary keys on commit, so references to them are resolved and
//! pushed again in the second pass. An entity whose required reference
//! designates such a new entity can't be sent without it and waits for the
//! second pass entirely.
//!
//! A local entry still holding references the remote snapshot lacks is
//! saved with the remote hash, so the next push looks at it again.

use kickcat_model::{Entity, EntitySchema, EntityType};
use kickcat_storage::{EntityStorage, EntryId, EntryState, StorageEntry};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::{BindingBag, BindingStrategy, EntryBinding, SyncError, SyncResult};

/// Options of [`SyncEngine::push_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    /// Only push entities of this type; references to other types are
    /// stripped from outgoing snapshots.
    pub of: Option<EntityType>,
    /// Look at every entity, even those unchanged since the last sync.
    pub force: bool,
    /// Remove references to entities found obsolete.
    pub repair: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            of: None,
            force: false,
            repair: true,
        }
    }
}

/// What a push did, entity by entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Created remotely.
    pub created: usize,
    /// Local changes written over the remote snapshot.
    pub updated: usize,
    /// Nothing new to send remotely.
    pub unchanged: usize,
    /// Not looked at: unchanged since the last sync.
    pub skipped: usize,
    /// Changed on both sides; remote kept.
    pub conflicts: usize,
    /// Gone remotely; deleted locally.
    pub obsolete: usize,
    /// References still unresolved after the second pass; retried by the
    /// next push.
    pub deferred: usize,
}

impl PushReport {
    /// Entities created or updated remotely.
    pub fn remote_writes(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} skipped, {} conflicts, {} obsolete, {} deferred",
            self.created,
            self.updated,
            self.unchanged,
            self.skipped,
            self.conflicts,
            self.obsolete,
            self.deferred
        )
    }
}

/// A snapshot ready to be sent to the remote storage.
struct Outgoing {
    payload: Entity,
    complete: bool,
    strategy: BindingStrategy,
}

/// Moves entities between a local and a remote storage.
pub struct SyncEngine<L, R> {
    local: L,
    remote: R,
}

impl<L: EntityStorage, R: EntityStorage> SyncEngine<L, R> {
    pub fn new(local: L, remote: R) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut L {
        &mut self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    pub fn into_parts(self) -> (L, R) {
        (self.local, self.remote)
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Copies one remote entity into the local storage. Remote always wins;
    /// uncommitted local edits are overwritten with a warning.
    pub async fn pull(&mut self, of: EntityType, key: &str, value: &Value) -> SyncResult<EntryId> {
        info!("Pulling {} with {} equal to {} from the remote storage", of, key, value);

        let filter = single_filter(key, value);
        let Some(remote_id) = self.remote.one(of, &filter).await? else {
            return Err(SyncError::NotFound {
                entity_type: of,
                key: key.to_string(),
                value: value.clone(),
            });
        };
        let entity = self.remote.registry().entry(remote_id)?.entity().clone();

        let local_id = self.pull_entity(of, &filter, entity).await?;
        self.local.commit().await?;
        Ok(local_id)
    }

    /// Pulls every remote entity, optionally of one type. Returns how many
    /// were pulled.
    pub async fn pull_all(&mut self, of: Option<EntityType>) -> SyncResult<usize> {
        info!("Pulling all {} from the remote storage", scope(of));

        let mut pulled = 0;
        for remote_id in self.remote.all(of).await? {
            let entry = self.remote.registry().entry(remote_id)?;
            let entity_type = entry.entity_type();
            let Some((key, value)) = entry.preferred_unique_key() else {
                warn!("Skipping a remote {} without identity", entity_type);
                continue;
            };
            let filter = single_filter(key, value);
            let entity = entry.entity().clone();

            self.pull_entity(entity_type, &filter, entity).await?;
            pulled += 1;
        }

        self.local.commit().await?;
        info!("Pulled {} entities", pulled);
        Ok(pulled)
    }

    async fn pull_entity(
        &mut self,
        of: EntityType,
        filter: &Map<String, Value>,
        entity: Entity,
    ) -> SyncResult<EntryId> {
        let Some(local_id) = self.local.one(of, filter).await? else {
            debug!("{} {:?} not found in the local storage, adding", of, filter);
            return Ok(self.local.new_entry(of, entity).await?);
        };

        let entry = self.local.registry().entry(local_id)?;
        if entry.has_uncommitted_changes() {
            warn!(
                "Local {} has uncommitted changes (saved hash {}, current hash {}), overwriting them with the remote one",
                describe(entry),
                entry.hash().unwrap_or("none"),
                entry.current_hash()
            );
        }

        self.local
            .registry_mut()
            .update(local_id, |entry| entry.substitute(entity))?;
        Ok(local_id)
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Pushes local changes to the remote storage.
    pub async fn push_all(&mut self, options: &PushOptions) -> SyncResult<PushReport> {
        info!("Pushing all {} from the local to the remote storage", scope(options.of));

        let mut report = PushReport::default();
        let mut bindings = BindingBag::new();
        let mut postponed = Vec::new();

        for local_id in self.local.all(options.of).await? {
            self.push_entry(local_id, options, &mut bindings, &mut postponed, &mut report)
                .await?;
        }

        debug!(
            "Committing the first pass to the remote storage ({} bound, {} postponed)",
            bindings.len(),
            postponed.len()
        );
        self.remote.commit().await?;
        bindings.pull_all(self.local.registry_mut(), self.remote.registry())?;

        let mut resolved = BindingBag::new();
        for binding in bindings.iter() {
            let outgoing = self.outgoing(binding.local, options.of)?;
            if !outgoing.complete {
                let entry = self.local.registry().entry(binding.local)?;
                warn!("References of {} are still unresolved", describe(entry));
                report.deferred += 1;
                continue;
            }

            let remote_hash = self.remote.registry().entry(binding.remote)?.current_hash();
            if outgoing.payload.hash() == remote_hash {
                continue;
            }

            self.remote
                .registry_mut()
                .update(binding.remote, |entry| entry.substitute(outgoing.payload))?;
            resolved.add(EntryBinding::new(
                binding.local,
                binding.remote,
                outgoing.strategy,
            ));
        }

        for (local_id, remote_id) in postponed {
            self.push_postponed(local_id, remote_id, options, &mut resolved, &mut report)
                .await?;
        }

        if resolved.is_empty() {
            debug!("Nothing left for the second pass");
        } else {
            debug!("Committing the second pass to the remote storage");
            self.remote.commit().await?;
            resolved.pull_all(self.local.registry_mut(), self.remote.registry())?;
        }

        for binding in bindings.iter().chain(resolved.iter()) {
            self.keep_pending_if_ahead(binding)?;
        }

        self.local.commit().await?;
        info!("Push finished: {}", report);
        Ok(report)
    }

    async fn push_entry(
        &mut self,
        local_id: EntryId,
        options: &PushOptions,
        bindings: &mut BindingBag,
        postponed: &mut Vec<(EntryId, Option<EntryId>)>,
        report: &mut PushReport,
    ) -> SyncResult<()> {
        let entry = self.local.registry().entry(local_id)?;
        if !matches!(entry.state(), EntryState::Clean | EntryState::Dirty) {
            return Ok(());
        }

        let label = describe(entry);
        if !options.force && !entry.has_uncommitted_changes() {
            debug!("{} is unchanged since the last sync, skipping", label);
            report.skipped += 1;
            return Ok(());
        }

        let entity_type = entry.entity_type();
        if is_absent(entry) {
            if self.awaits_primary_keys(local_id)? {
                debug!("{} requires entities created by this push, postponing it", label);
                postponed.push((local_id, None));
                return Ok(());
            }
            info!("{} is new, adding it to the remote storage", label);
            let outgoing = self.outgoing(local_id, options.of)?;
            let remote_id = self.remote.new_entry(entity_type, outgoing.payload).await?;
            bindings.add(EntryBinding::new(local_id, remote_id, outgoing.strategy));
            report.created += 1;
            return Ok(());
        }

        let filter = entry.entity().fields().clone();
        let current_hash = entry.current_hash();
        let saved_hash = entry.hash().map(str::to_string);

        let Some(remote_id) = self.remote.one(entity_type, &filter).await? else {
            warn!("{} is not found in the remote storage, deleting it locally", label);
            let registry = self.local.registry_mut();
            if options.repair {
                let repaired = registry.free_of(local_id)?;
                if !repaired.is_empty() {
                    info!("Removed references to {} from {} entities", label, repaired.len());
                }
            }
            registry.update(local_id, |entry| entry.delete())?;
            report.obsolete += 1;
            return Ok(());
        };

        let remote_entry = self.remote.registry().entry(remote_id)?;
        let remote_hash = remote_entry.current_hash();

        if current_hash == remote_hash {
            debug!("{} has the same content remotely, skipping", label);
            report.unchanged += 1;
        } else if saved_hash.as_deref() == Some(remote_hash.as_str()) {
            if self.awaits_primary_keys(local_id)? {
                debug!("{} requires entities created by this push, postponing it", label);
                postponed.push((local_id, Some(remote_id)));
                return Ok(());
            }
            let outgoing = self.outgoing(local_id, options.of)?;
            if outgoing.payload.hash() == remote_hash {
                debug!("{} differs only by references the remote storage can't take yet", label);
                report.unchanged += 1;
            } else {
                info!("{} changed locally, updating the remote storage", label);
                self.remote
                    .registry_mut()
                    .update(remote_id, |entry| entry.substitute(outgoing.payload))?;
                report.updated += 1;
            }
            bindings.add(EntryBinding::new(local_id, remote_id, outgoing.strategy));
        } else {
            warn!(
                "{} changed on both sides (saved hash {}, local hash {}, remote hash {}), taking the remote one",
                label,
                saved_hash.as_deref().unwrap_or("none"),
                current_hash,
                remote_hash
            );
            let entity = remote_entry.entity().clone();
            self.local
                .registry_mut()
                .update(local_id, |entry| entry.substitute(entity))?;
            report.conflicts += 1;
        }

        Ok(())
    }

    /// Second-pass push of an entry postponed by the first pass, now that the
    /// entities it requires have primary keys.
    async fn push_postponed(
        &mut self,
        local_id: EntryId,
        remote_id: Option<EntryId>,
        options: &PushOptions,
        resolved: &mut BindingBag,
        report: &mut PushReport,
    ) -> SyncResult<()> {
        self.local
            .registry_mut()
            .try_bring_dependencies_to_primary_keys(local_id)?;
        let registry = self.local.registry();
        let entry = registry.entry(local_id)?;
        let unresolved = entry.unresolved_required_references(registry)?;
        if !unresolved.is_empty() {
            let names: Vec<&str> = unresolved.iter().map(|(name, _)| name.as_str()).collect();
            warn!(
                "Required references ({}) of {} are still unresolved, leaving it for the next push",
                names.join(", "),
                describe(entry)
            );
            report.deferred += 1;
            return Ok(());
        }

        let entity_type = entry.entity_type();
        let label = describe(entry);
        let outgoing = self.outgoing(local_id, options.of)?;
        let remote_id = match remote_id {
            Some(remote_id) => {
                info!("{} changed locally, updating the remote storage", label);
                self.remote
                    .registry_mut()
                    .update(remote_id, |entry| entry.substitute(outgoing.payload))?;
                report.updated += 1;
                remote_id
            }
            None => {
                info!("{} is new, adding it to the remote storage", label);
                report.created += 1;
                self.remote.new_entry(entity_type, outgoing.payload).await?
            }
        };
        resolved.add(EntryBinding::new(local_id, remote_id, outgoing.strategy));
        Ok(())
    }

    /// Whether a required reference of the entry designates a local entity
    /// without a primary key yet.
    fn awaits_primary_keys(&mut self, local_id: EntryId) -> SyncResult<bool> {
        self.local
            .registry_mut()
            .try_bring_dependencies_to_primary_keys(local_id)?;
        let registry = self.local.registry();
        let unresolved = registry
            .entry(local_id)?
            .unresolved_required_references(registry)?;
        Ok(!unresolved.is_empty() && unresolved.iter().all(|(_, target)| target.is_some()))
    }

    /// Saves a bound local entry with the remote hash when its snapshot
    /// holds more than the remote one, so it stays changed.
    fn keep_pending_if_ahead(&mut self, binding: &EntryBinding) -> SyncResult<()> {
        let remote_hash = self.remote.registry().entry(binding.remote)?.current_hash();
        let entry = self.local.registry().entry(binding.local)?;
        if entry.current_hash() == remote_hash {
            return Ok(());
        }

        debug!("{} is ahead of the remote storage, keeping it pending", describe(entry));
        self.local.registry_mut().update(binding.local, |entry| {
            entry.save_hash_on_commit(remote_hash);
            Ok(())
        })?;
        Ok(())
    }

    /// Resolves the references of a local entry as far as possible and
    /// builds the snapshot to send. The binding strategy is merge whenever
    /// the payload lacks something the local entry has.
    fn outgoing(&mut self, local_id: EntryId, of: Option<EntityType>) -> SyncResult<Outgoing> {
        let complete = self
            .local
            .registry_mut()
            .try_bring_dependencies_to_primary_keys(local_id)?;

        let registry = self.local.registry();
        let entry = registry.entry(local_id)?;
        let payload = isolate(
            entry.entity_free_of_non_primary_key_dependencies(registry)?,
            entry.schema(),
            of,
        );

        let strategy = if complete && &payload == entry.entity() {
            BindingStrategy::Substitute
        } else {
            BindingStrategy::Merge
        };
        Ok(Outgoing {
            payload,
            complete,
            strategy,
        })
    }

    // ── Delete ───────────────────────────────────────────────────

    /// Deletes one local entity. With `repair`, references to it are removed
    /// from every other local entity first; if one of them can't drop the
    /// reference, nothing is changed. Returns whether the entity was found.
    pub async fn delete(
        &mut self,
        of: EntityType,
        key: &str,
        value: &Value,
        repair: bool,
    ) -> SyncResult<bool> {
        info!("Deleting {} with {} equal to {} from the local storage", of, key, value);

        let filter = single_filter(key, value);
        let Some(local_id) = self.local.one(of, &filter).await? else {
            warn!("Skipping, {} with {} equal to {} is not found in the local storage", of, key, value);
            return Ok(false);
        };

        let registry = self.local.registry_mut();
        if repair {
            let repaired = registry.free_of(local_id)?;
            debug!("Removed references from {} entities", repaired.len());
        }
        registry.update(local_id, |entry| entry.delete())?;

        self.local.commit().await?;
        Ok(true)
    }
}

/// Never synced, or still waiting for its primary key.
fn is_absent<C>(entry: &StorageEntry<C>) -> bool {
    entry.hash().is_none()
        || (entry.schema().primary_key_property().is_some() && entry.primary_key().is_none())
}

/// Drops references to types other than `of`.
fn isolate(entity: Entity, schema: &EntitySchema, of: Option<EntityType>) -> Entity {
    let Some(of) = of else {
        return entity;
    };
    schema
        .reference_properties()
        .filter(|property| property.reference != Some(of))
        .fold(entity, |entity, property| entity.without(&property.name))
}

fn single_filter(key: &str, value: &Value) -> Map<String, Value> {
    let mut filter = Map::new();
    filter.insert(key.to_string(), value.clone());
    filter
}

fn scope(of: Option<EntityType>) -> String {
    match of {
        Some(entity_type) => format!("{entity_type} entities"),
        None => "entities".to_string(),
    }
}

fn describe<C>(entry: &StorageEntry<C>) -> String {
    match entry.preferred_unique_key() {
        Some((key, value)) => format!("{} {}={}", entry.entity_type(), key, value),
        None => entry.entity_type().to_string(),
    }
}
