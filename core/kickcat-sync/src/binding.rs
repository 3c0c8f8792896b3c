//! Local/remote entry pairs recorded during a push.
//!
//! Remote storages assign values (primary keys, server-side fields) on
//! commit. A binding remembers which local entry a remote one came from so
//! those values can be copied back once the remote commit is done.

use kickcat_storage::{EntityRegistry, EntryId, StorageResult};

/// How the remote snapshot is applied to the local entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Replace the local snapshot.
    Substitute,
    /// Replace it, but keep local references the remote side lacks.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryBinding {
    pub local: EntryId,
    pub remote: EntryId,
    pub strategy: BindingStrategy,
}

impl EntryBinding {
    pub fn new(local: EntryId, remote: EntryId, strategy: BindingStrategy) -> Self {
        Self {
            local,
            remote,
            strategy,
        }
    }

    /// Copies the remote snapshot into the local entry.
    pub fn pull<L: Clone, R>(
        &self,
        local: &mut EntityRegistry<L>,
        remote: &EntityRegistry<R>,
    ) -> StorageResult<()> {
        let source = remote.entry(self.remote)?.entity().clone();
        local.update(self.local, |target| match self.strategy {
            BindingStrategy::Substitute => target.substitute(source),
            BindingStrategy::Merge => target.merge(source),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindingBag {
    bindings: Vec<EntryBinding>,
}

impl BindingBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, binding: EntryBinding) {
        self.bindings.push(binding);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Pulls every binding, in the order they were added.
    pub fn pull_all<L: Clone, R>(
        &self,
        local: &mut EntityRegistry<L>,
        remote: &EntityRegistry<R>,
    ) -> StorageResult<()> {
        for binding in &self.bindings {
            binding.pull(local, remote)?;
        }
        Ok(())
    }
}
