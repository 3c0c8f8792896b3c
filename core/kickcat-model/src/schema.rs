use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::{Entity, EntityType, SchemaError, SchemaResult};

/// Primitive JSON type tag of a property or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl PrimitiveType {
    /// The tag of a concrete value. Whole numbers are `Integer`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => PrimitiveType::Null,
            Value::Bool(_) => PrimitiveType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => PrimitiveType::Integer,
            Value::Number(_) => PrimitiveType::Number,
            Value::String(_) => PrimitiveType::String,
            Value::Array(_) => PrimitiveType::Array,
            Value::Object(_) => PrimitiveType::Object,
        }
    }

    /// Whether a value tagged `other` satisfies this tag.
    /// An integer is also a number.
    pub fn admits(self, other: PrimitiveType) -> bool {
        self == other || (self == PrimitiveType::Number && other == PrimitiveType::Integer)
    }

    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            PrimitiveType::String | PrimitiveType::Integer | PrimitiveType::Number
        )
    }
}

/// Normalized metadata of one property of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    /// Accepted type tags. Empty means any type.
    pub types: Vec<PrimitiveType>,
    /// Accepted item type tags when the property is an array. Empty means any.
    pub item_types: Vec<PrimitiveType>,
    pub enum_values: Option<Vec<Value>>,
    pub primary_key: bool,
    pub unique: bool,
    pub new_unique: bool,
    pub required: bool,
    /// Entity type whose primary keys this property holds.
    pub reference: Option<EntityType>,
    /// Serialization ordering hint; lower comes first.
    pub order: i64,
}

impl PropertySchema {
    /// The first scalar tag this property accepts, used to tell identity
    /// properties apart.
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        self.scalar_types().next()
    }

    fn scalar_types(&self) -> impl Iterator<Item = PrimitiveType> + '_ {
        let tags = if self.is_array() && !self.item_types.is_empty() {
            &self.item_types
        } else {
            &self.types
        };
        tags.iter().copied().filter(|tag| tag.is_scalar())
    }

    pub fn is_array(&self) -> bool {
        self.types.contains(&PrimitiveType::Array)
    }

    pub fn is_identity(&self) -> bool {
        self.primary_key || self.unique || self.new_unique
    }

    /// Whether a bare scalar of type `primitive` could be a value of this
    /// property (or an item of it, for arrays).
    pub fn admits_scalar(&self, primitive: PrimitiveType) -> bool {
        if self.types.is_empty() {
            return true;
        }
        self.scalar_types().any(|tag| tag.admits(primitive))
    }

    /// Type and enum check for one value of this property.
    pub fn accepts(&self, value: &Value) -> bool {
        let actual = PrimitiveType::of(value);

        if !self.types.is_empty() && !self.types.iter().any(|tag| tag.admits(actual)) {
            return false;
        }

        if let (Value::Array(items), false) = (value, self.item_types.is_empty()) {
            let items_ok = items.iter().all(|item| {
                let item_type = PrimitiveType::of(item);
                self.item_types.iter().any(|tag| tag.admits(item_type))
            });
            if !items_ok {
                return false;
            }
        }

        match &self.enum_values {
            Some(options) => options.contains(value),
            None => true,
        }
    }
}

/// Property metadata table and validator for one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    entity_type: EntityType,
    /// Sorted by `order`, then by declaration order.
    properties: Vec<PropertySchema>,
    additional_properties: bool,
}

impl EntitySchema {
    /// Parses a schema document (see the crate docs for the format).
    pub fn parse(entity_type: EntityType, document: &Value) -> SchemaResult<Self> {
        let invalid = |reason: String| SchemaError::Invalid { entity_type, reason };

        let definition: SchemaDefinition = serde_json::from_value(document.clone())
            .map_err(|e| invalid(e.to_string()))?;

        if let Some(kind) = &definition.kind {
            if kind != "object" {
                return Err(invalid(format!("expected an object schema, got \"{kind}\"")));
            }
        }

        let mut properties = Vec::with_capacity(definition.properties.len());
        for (name, raw) in &definition.properties {
            let property: PropertyDefinition = serde_json::from_value(raw.clone())
                .map_err(|e| invalid(format!("property \"{name}\": {e}")))?;

            let reference = property
                .reference
                .as_deref()
                .map(str::parse::<EntityType>)
                .transpose()
                .map_err(|_| {
                    invalid(format!(
                        "property \"{name}\" references an unknown entity type"
                    ))
                })?;

            properties.push(PropertySchema {
                name: name.clone(),
                types: property.types.map(TypeTags::into_vec).unwrap_or_default(),
                item_types: property
                    .items
                    .and_then(|items| items.types)
                    .map(TypeTags::into_vec)
                    .unwrap_or_default(),
                enum_values: property.enum_values,
                primary_key: property.primary_key,
                unique: property.unique,
                new_unique: property.new_unique,
                required: definition.required.contains(name),
                reference,
                order: property.order.unwrap_or(i64::MAX),
            });
        }

        for required in &definition.required {
            if !properties.iter().any(|p| &p.name == required) {
                return Err(invalid(format!(
                    "required property \"{required}\" is not declared"
                )));
            }
        }

        let primary_keys = properties.iter().filter(|p| p.primary_key).count();
        if primary_keys > 1 {
            return Err(invalid(format!(
                "at most one primary key is allowed, found {primary_keys}"
            )));
        }

        // Stable sort keeps declaration order among equal hints.
        properties.sort_by_key(|p| p.order);

        Ok(Self {
            entity_type,
            properties,
            additional_properties: definition.additional_properties,
        })
    }

    /// Parses a schema document from JSON text.
    pub fn from_json_str(entity_type: EntityType, json: &str) -> SchemaResult<Self> {
        let document: Value = serde_json::from_str(json)?;
        Self::parse(entity_type, &document)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn primary_key_property(&self) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.primary_key)
    }

    pub fn unique_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter().filter(|p| p.unique && !p.primary_key)
    }

    pub fn new_unique_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties
            .iter()
            .filter(|p| p.new_unique && !p.unique && !p.primary_key)
    }

    /// Identity properties in lookup priority: primary key, unique, new-unique.
    pub fn identity_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.primary_key_property()
            .into_iter()
            .chain(self.unique_properties())
            .chain(self.new_unique_properties())
    }

    pub fn reference_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter().filter(|p| p.reference.is_some())
    }

    /// Distinct entity types referenced by this type.
    pub fn references(&self) -> Vec<EntityType> {
        let mut seen = HashSet::new();
        self.reference_properties()
            .filter_map(|p| p.reference)
            .filter(|target| seen.insert(*target))
            .collect()
    }

    /// True when a bare scalar of `primitive` can only be this type's
    /// primary key: the key admits it and no unique or new-unique property
    /// does.
    pub fn can_value_of_type_be_only_primary_key(&self, primitive: PrimitiveType) -> bool {
        let Some(primary_key) = self.primary_key_property() else {
            return false;
        };

        primary_key.admits_scalar(primitive)
            && !self
                .unique_properties()
                .chain(self.new_unique_properties())
                .any(|p| p.admits_scalar(primitive))
    }

    pub fn validate(&self, entity: &Entity) -> bool {
        self.check(entity).is_ok()
    }

    /// Structural and type validation with the first violation as the error.
    pub fn check(&self, entity: &Entity) -> SchemaResult<()> {
        let invalid = |reason: String| SchemaError::InvalidEntity {
            entity_type: self.entity_type,
            reason,
        };

        for property in self.properties.iter().filter(|p| p.required) {
            match entity.get(&property.name) {
                None | Some(Value::Null) => {
                    return Err(invalid(format!(
                        "required property \"{}\" is missing",
                        property.name
                    )));
                }
                Some(_) => {}
            }
        }

        for (name, value) in entity.fields() {
            match self.property(name) {
                Some(property) if !property.accepts(value) => {
                    return Err(invalid(format!(
                        "property \"{name}\" has an unexpected value {value}"
                    )));
                }
                Some(_) => {}
                None if !self.additional_properties => {
                    return Err(invalid(format!("property \"{name}\" is not allowed")));
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Returns the snapshot with fields in serialization order: declared
    /// properties by `order`, then undeclared fields by name.
    pub fn ordered(&self, entity: &Entity) -> Entity {
        let mut fields = Map::new();
        for property in &self.properties {
            if let Some(value) = entity.get(&property.name) {
                fields.insert(property.name.clone(), value.clone());
            }
        }

        let mut extra: Vec<(&String, &Value)> = entity
            .fields()
            .iter()
            .filter(|(name, _)| self.property(name).is_none())
            .collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in extra {
            fields.insert(name.clone(), value.clone());
        }

        Entity::new(fields)
    }
}

// ── Schema document format ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SchemaDefinition {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(rename = "additionalProperties", default = "default_true")]
    additional_properties: bool,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PropertyDefinition {
    #[serde(rename = "type", default)]
    types: Option<TypeTags>,
    #[serde(default)]
    items: Option<ItemsDefinition>,
    #[serde(rename = "enum", default)]
    enum_values: Option<Vec<Value>>,
    #[serde(rename = "x-kickcat-primary-key", default)]
    primary_key: bool,
    #[serde(rename = "x-kickcat-unique", default)]
    unique: bool,
    #[serde(rename = "x-kickcat-new-unique", default)]
    new_unique: bool,
    #[serde(rename = "x-kickcat-reference", default)]
    reference: Option<String>,
    #[serde(default)]
    order: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ItemsDefinition {
    #[serde(rename = "type", default)]
    types: Option<TypeTags>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeTags {
    One(PrimitiveType),
    Many(Vec<PrimitiveType>),
}

impl TypeTags {
    fn into_vec(self) -> Vec<PrimitiveType> {
        match self {
            TypeTags::One(tag) => vec![tag],
            TypeTags::Many(tags) => tags,
        }
    }
}

fn default_true() -> bool {
    true
}
