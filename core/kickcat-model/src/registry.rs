use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::{EntitySchema, EntityType, SchemaError, SchemaResult};

const BUILTIN_SCHEMAS: [(EntityType, &str); 3] = [
    (
        EntityType::Milestone,
        include_str!("../schemas/milestone.schema.json"),
    ),
    (EntityType::Label, include_str!("../schemas/label.schema.json")),
    (EntityType::Issue, include_str!("../schemas/issue.schema.json")),
];

/// Schemas of every known entity type, keyed by type.
#[derive(Debug, Clone, Default)]
pub struct EntitySchemaRegistry {
    schemas: BTreeMap<EntityType, Arc<EntitySchema>>,
}

impl EntitySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the schemas shipped with KickCat.
    pub fn builtin() -> SchemaResult<Self> {
        let mut registry = Self::new();
        for (entity_type, json) in BUILTIN_SCHEMAS {
            registry.add(EntitySchema::from_json_str(entity_type, json)?);
        }
        Ok(registry)
    }

    /// Built-in schemas, overridden by any `<type>.schema.json` in `dir`.
    pub fn builtin_with_overrides(dir: &Path) -> SchemaResult<Self> {
        let mut registry = Self::builtin()?;
        for entity_type in EntityType::ALL {
            let path = dir.join(format!("{entity_type}.schema.json"));
            if path.is_file() {
                let json = std::fs::read_to_string(&path)?;
                registry.add(EntitySchema::from_json_str(entity_type, &json)?);
            }
        }
        Ok(registry)
    }

    pub fn add(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.entity_type(), Arc::new(schema));
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&Arc<EntitySchema>> {
        self.schemas.get(&entity_type)
    }

    /// Like [`get`](Self::get), but a missing schema is an error.
    pub fn require(&self, entity_type: EntityType) -> SchemaResult<&Arc<EntitySchema>> {
        self.get(entity_type)
            .ok_or(SchemaError::Missing(entity_type))
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.schemas.values()
    }
}
