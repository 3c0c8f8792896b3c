use kickcat_model::{
    Entity, EntitySchema, EntitySchemaRegistry, EntityType, PrimitiveType, SchemaError,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn builtin() -> EntitySchemaRegistry {
    EntitySchemaRegistry::builtin().unwrap()
}

fn entity(value: serde_json::Value) -> Entity {
    Entity::from_value(value).unwrap()
}

// ── Built-in schemas ─────────────────────────────────────────────

#[test]
fn builtin_has_every_type() {
    let registry = builtin();
    for entity_type in EntityType::ALL {
        let schema = registry.require(entity_type).unwrap();
        assert_eq!(schema.entity_type(), entity_type);
    }
}

#[test]
fn issue_identity_properties() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();

    assert_eq!(issue.primary_key_property().unwrap().name, "number");
    assert_eq!(issue.unique_properties().count(), 0);
    let new_unique: Vec<&str> = issue.new_unique_properties().map(|p| p.name.as_str()).collect();
    assert_eq!(new_unique, vec!["title"]);

    let identity: Vec<&str> = issue.identity_properties().map(|p| p.name.as_str()).collect();
    assert_eq!(identity, vec!["number", "title"]);
}

#[test]
fn issue_references() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();

    assert_eq!(
        issue.references(),
        vec![EntityType::Milestone, EntityType::Label, EntityType::Issue]
    );
    let names: Vec<&str> = issue.reference_properties().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["milestone", "labels", "dependencies"]);
    assert!(issue.property("labels").unwrap().is_array());
    assert!(!issue.property("milestone").unwrap().is_array());
}

#[test]
fn label_has_no_references() {
    let registry = builtin();
    let label = registry.require(EntityType::Label).unwrap();
    assert!(label.references().is_empty());
    assert_eq!(label.primary_key_property().unwrap().name, "name");
}

#[test]
fn properties_sorted_by_order() {
    let registry = builtin();
    let milestone = registry.require(EntityType::Milestone).unwrap();
    let names: Vec<&str> = milestone.properties().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["number", "title", "state", "dueDate", "description"]);
}

// ── Primary-key disambiguation ───────────────────────────────────

#[test]
fn integer_can_only_be_issue_number() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();

    assert!(issue.can_value_of_type_be_only_primary_key(PrimitiveType::Integer));
    assert!(!issue.can_value_of_type_be_only_primary_key(PrimitiveType::String));
    assert!(!issue.can_value_of_type_be_only_primary_key(PrimitiveType::Boolean));
}

#[test]
fn string_can_only_be_label_name() {
    let registry = builtin();
    let label = registry.require(EntityType::Label).unwrap();
    assert!(label.can_value_of_type_be_only_primary_key(PrimitiveType::String));
    assert!(!label.can_value_of_type_be_only_primary_key(PrimitiveType::Integer));
}

#[test]
fn shared_type_is_ambiguous() {
    let schema = EntitySchema::parse(
        EntityType::Label,
        &json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "x-kickcat-primary-key": true },
                "slug": { "type": "string", "x-kickcat-unique": true }
            }
        }),
    )
    .unwrap();

    assert!(!schema.can_value_of_type_be_only_primary_key(PrimitiveType::String));
}

#[test]
fn no_primary_key_is_never_only_primary_key() {
    let schema = EntitySchema::parse(
        EntityType::Label,
        &json!({ "type": "object", "properties": { "name": { "type": "string" } } }),
    )
    .unwrap();
    assert!(!schema.can_value_of_type_be_only_primary_key(PrimitiveType::String));
}

// ── Parsing errors ───────────────────────────────────────────────

#[test]
fn two_primary_keys_rejected() {
    let err = EntitySchema::parse(
        EntityType::Issue,
        &json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer", "x-kickcat-primary-key": true },
                "b": { "type": "integer", "x-kickcat-primary-key": true }
            }
        }),
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::Invalid { entity_type: EntityType::Issue, .. }));
}

#[test]
fn unknown_reference_target_rejected() {
    let err = EntitySchema::parse(
        EntityType::Issue,
        &json!({
            "type": "object",
            "properties": {
                "owner": { "type": "string", "x-kickcat-reference": "user" }
            }
        }),
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown entity type"));
}

#[test]
fn undeclared_required_rejected() {
    let err = EntitySchema::parse(
        EntityType::Label,
        &json!({ "type": "object", "required": ["name"], "properties": {} }),
    )
    .unwrap_err();
    assert!(err.to_string().contains("\"name\""));
}

#[test]
fn non_object_schema_rejected() {
    let err = EntitySchema::parse(EntityType::Label, &json!({ "type": "array" })).unwrap_err();
    assert!(matches!(err, SchemaError::Invalid { .. }));
}

#[test]
fn malformed_json_rejected() {
    let err = EntitySchema::from_json_str(EntityType::Label, "{ nope").unwrap_err();
    assert!(matches!(err, SchemaError::Serialization(_)));
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn valid_issue() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();
    assert!(issue.validate(&entity(json!({
        "number": 1,
        "title": "Crash on start",
        "state": "open",
        "milestone": "v1",
        "labels": ["bug"],
        "dependencies": [2, "Other issue"],
        "description": "It crashes."
    }))));
}

#[test]
fn missing_required_is_invalid() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();
    let err = issue.check(&entity(json!({ "number": 1 }))).unwrap_err();
    assert!(err.to_string().contains("\"title\""));
}

#[test]
fn null_required_is_invalid() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();
    assert!(!issue.validate(&entity(json!({ "title": null }))));
}

#[test]
fn wrong_type_is_invalid() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();
    assert!(!issue.validate(&entity(json!({ "title": "x", "number": "one" }))));
    assert!(!issue.validate(&entity(json!({ "title": "x", "labels": [1] }))));
    assert!(!issue.validate(&entity(json!({ "title": "x", "milestone": true }))));
}

#[test]
fn enum_is_enforced() {
    let registry = builtin();
    let issue = registry.require(EntityType::Issue).unwrap();
    assert!(!issue.validate(&entity(json!({ "title": "x", "state": "merged" }))));
}

#[test]
fn additional_properties_rejected_when_closed() {
    let registry = builtin();
    let label = registry.require(EntityType::Label).unwrap();
    assert!(!label.validate(&entity(json!({ "name": "bug", "color": "f00", "extra": 1 }))));
}

#[test]
fn additional_properties_allowed_by_default() {
    let schema = EntitySchema::parse(
        EntityType::Label,
        &json!({ "type": "object", "properties": { "name": { "type": "string" } } }),
    )
    .unwrap();
    assert!(schema.validate(&entity(json!({ "name": "bug", "extra": 1 }))));
}

#[test]
fn integer_satisfies_number() {
    let schema = EntitySchema::parse(
        EntityType::Label,
        &json!({ "type": "object", "properties": { "weight": { "type": "number" } } }),
    )
    .unwrap();
    assert!(schema.validate(&entity(json!({ "weight": 3 }))));
    assert!(schema.validate(&entity(json!({ "weight": 3.5 }))));
}

// ── Ordering ─────────────────────────────────────────────────────

#[test]
fn ordered_puts_declared_fields_first() {
    let schema = EntitySchema::parse(
        EntityType::Label,
        &json!({
            "type": "object",
            "properties": {
                "color": { "type": "string", "order": 1 },
                "name": { "type": "string", "order": 0 }
            }
        }),
    )
    .unwrap();

    let ordered = schema.ordered(&entity(json!({ "zeta": 1, "color": "f00", "alpha": 2, "name": "bug" })));
    let keys: Vec<&str> = ordered.fields().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["name", "color", "alpha", "zeta"]);
}

// ── Overrides ────────────────────────────────────────────────────

#[test]
fn overrides_replace_builtin() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("label.schema.json"),
        r#"{ "type": "object", "properties": { "id": { "type": "integer", "x-kickcat-primary-key": true } } }"#,
    )
    .unwrap();

    let registry = EntitySchemaRegistry::builtin_with_overrides(dir.path()).unwrap();
    let label = registry.require(EntityType::Label).unwrap();
    assert_eq!(label.primary_key_property().unwrap().name, "id");

    let issue = registry.require(EntityType::Issue).unwrap();
    assert_eq!(issue.primary_key_property().unwrap().name, "number");
}

#[test]
fn missing_schema_is_error() {
    let registry = EntitySchemaRegistry::new();
    assert!(matches!(
        registry.require(EntityType::Issue).unwrap_err(),
        SchemaError::Missing(EntityType::Issue)
    ));
}
