//! Storage layer for KickCat.
//!
//! - [`StorageEntry`] wraps one entity snapshot with its lifecycle state and
//!   the hash of its last committed content
//! - [`EntityRegistry`] is the arena of entries of one adapter, indexed by
//!   identity properties, and resolves references between entries
//! - [`EntityStorage`] is the adapter contract; [`MemoryStorage`] and
//!   [`FileStorage`] implement it
//!
//! Adapters only touch their backing store on load and on commit. All entry
//! mutation happens in memory, between those points.

mod entry;
mod error;
mod file;
mod memory;
mod registry;
mod storage;

pub use entry::{DependencyResolution, EntryId, EntryState, StorageEntry};
pub use error::{StorageError, StorageResult};
pub use file::{FileCookie, FileStorage, FileStorageConfig};
pub use memory::MemoryStorage;
pub use registry::{EntityRegistry, FlushSummary};
pub use storage::EntityStorage;
