//! Synchronization between a local and a remote KickCat storage.
//!
//! The local storage is where entities are edited; the remote one is
//! authoritative for identity (it assigns primary keys). [`SyncEngine`]
//! implements the four operations on top of any pair of
//! [`EntityStorage`](kickcat_storage::EntityStorage) adapters:
//!
//! - **pull**: copy one remote entity into the local storage
//! - **pull-all**: copy every remote entity, optionally of one type
//! - **push-all**: send local changes to the remote storage in two passes,
//!   resolving references to entities created along the way
//! - **delete**: remove a local entity and the references to it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kickcat_model::EntitySchemaRegistry;
//! use kickcat_storage::MemoryStorage;
//! use kickcat_sync::{PushOptions, SyncEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let schemas = Arc::new(EntitySchemaRegistry::builtin()?);
//! let local = MemoryStorage::new(schemas.clone());
//! let remote = MemoryStorage::new(schemas).assigning_primary_keys();
//!
//! let mut engine = SyncEngine::new(local, remote);
//! let report = engine.push_all(&PushOptions::default()).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod binding;
mod engine;
mod error;

pub use binding::{BindingBag, BindingStrategy, EntryBinding};
pub use engine::{PushOptions, PushReport, SyncEngine};
pub use error::{SyncError, SyncResult};
