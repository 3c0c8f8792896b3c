//! File-backed adapter.
//!
//! A storage directory holds one `<type>.json` per entity type, each an array
//! of `{ "hash": ..., "entity": { ... } }` records. Files are read once, on
//! first access, and rewritten on commit only when one of their entries
//! changed.

use async_trait::async_trait;
use kickcat_model::{Entity, EntitySchemaRegistry, EntityType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    EntityRegistry, EntityStorage, EntryState, StorageEntry, StorageError, StorageResult,
};

/// Configuration of a [`FileStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorageConfig {
    /// Storage directory.
    pub path: PathBuf,
    /// Assign integer primary keys to new entities on commit.
    pub assign_primary_keys: bool,
}

impl FileStorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            assign_primary_keys: false,
        }
    }
}

/// Position of an entry's record in its type file. `None` until first
/// written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCookie {
    pub position: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    #[serde(default)]
    hash: Option<String>,
    entity: Value,
}

/// Adapter persisting entities as JSON files in a directory.
#[derive(Debug)]
pub struct FileStorage {
    config: FileStorageConfig,
    schemas: Arc<EntitySchemaRegistry>,
    registry: EntityRegistry<FileCookie>,
    loaded: bool,
    skipped: usize,
}

impl FileStorage {
    pub fn new(config: FileStorageConfig, schemas: Arc<EntitySchemaRegistry>) -> Self {
        Self {
            registry: EntityRegistry::new(schemas.clone()),
            config,
            schemas,
            loaded: false,
            skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Records dropped while loading because they could not be read or
    /// failed validation.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Commits, then rewrites every type file whether or not it changed.
    /// Records skipped on load are gone from the rewritten files. Returns the
    /// number of records written.
    pub async fn rewrite_all(&mut self) -> StorageResult<usize> {
        self.commit().await?;
        let schemas = self.schemas.clone();
        for schema in schemas.all() {
            self.write_type(schema.entity_type()).await?;
        }
        Ok(self.registry.len())
    }

    fn file_path(&self, entity_type: EntityType) -> PathBuf {
        self.config.path.join(format!("{entity_type}.json"))
    }

    async fn load_type(&mut self, entity_type: EntityType) -> StorageResult<()> {
        let path = self.file_path(entity_type);
        let Some(schema) = self.schemas.get(entity_type).cloned() else {
            return Ok(());
        };

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        let records: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
            StorageError::InvalidData(format!("{}: {e}", path.display()))
        })?;

        let mut loaded = 0;
        for (position, raw) in records.into_iter().enumerate() {
            let record: FileRecord = match serde_json::from_value(raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping record {} of {}: {}", position, path.display(), e);
                    self.skipped += 1;
                    continue;
                }
            };
            let entity = match Entity::from_value(record.entity) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!("Skipping record {} of {}: {}", position, path.display(), e);
                    self.skipped += 1;
                    continue;
                }
            };
            if let Err(e) = schema.check(&entity) {
                warn!("Skipping record {} of {}: {}", position, path.display(), e);
                self.skipped += 1;
                continue;
            }

            let cookie = FileCookie {
                position: Some(position),
            };
            let mut entry = StorageEntry::new(schema.clone(), entity, cookie).with_hash(record.hash);
            entry.attach(EntryState::Clean)?;
            self.registry.set(entry)?;
            loaded += 1;
        }

        debug!("Loaded {} {} records from {}", loaded, entity_type, path.display());
        Ok(())
    }

    async fn write_type(&mut self, entity_type: EntityType) -> StorageResult<()> {
        let path = self.file_path(entity_type);

        let mut ids = self.registry.all(Some(entity_type));
        ids.sort_by_key(|id| {
            let position = self
                .registry
                .get(*id)
                .and_then(|entry| entry.cookie().position)
                .unwrap_or(usize::MAX);
            (position, *id)
        });

        if ids.is_empty() {
            match fs::remove_file(&path).await {
                Ok(()) => info!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&path, e)),
            }
            return Ok(());
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            let entry = self.registry.entry(*id)?;
            records.push(FileRecord {
                hash: entry.hash().map(str::to_string),
                entity: entry.schema().ordered(entry.entity()).to_value(),
            });
        }

        let mut content = serde_json::to_string_pretty(&records)?;
        content.push('\n');

        fs::create_dir_all(&self.config.path)
            .await
            .map_err(|e| StorageError::io(&self.config.path, e))?;
        fs::write(&path, content)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        for (position, id) in ids.into_iter().enumerate() {
            self.registry.update(id, |entry| {
                entry.cookie_mut().position = Some(position);
                Ok(())
            })?;
        }

        info!("Wrote {} {} records to {}", records.len(), entity_type, path.display());
        Ok(())
    }
}

#[async_trait]
impl EntityStorage for FileStorage {
    type Cookie = FileCookie;

    fn entity_schema_registry(&self) -> &Arc<EntitySchemaRegistry> {
        &self.schemas
    }

    fn registry(&self) -> &EntityRegistry<FileCookie> {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut EntityRegistry<FileCookie> {
        &mut self.registry
    }

    async fn load(&mut self) -> StorageResult<()> {
        if self.loaded {
            return Ok(());
        }
        for entity_type in EntityType::ALL {
            self.load_type(entity_type).await?;
        }
        self.loaded = true;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.load().await?;
        let summary = self.registry.flush(self.config.assign_primary_keys)?;
        for entity_type in summary.touched {
            self.write_type(entity_type).await?;
        }
        Ok(())
    }
}
