//! Core entity model for KickCat.
//!
//! Defines the types every KickCat subsystem depends on:
//! - [`Entity`]: an immutable snapshot of one record's fields
//! - [`EntityType`]: the fixed set of record kinds (milestone, label, issue)
//! - [`EntitySchema`] / [`PropertySchema`]: per-type property metadata
//!   (primary key, unique, new-unique, required, reference target, order)
//!   parsed from a JSON-Schema subset with `x-kickcat-*` extensions
//! - [`EntitySchemaRegistry`]: schemas by type, built-in or loaded from disk
//! - [`hash`]: the stable content digest used to detect changes
//!
//! Storage and sync build on these types; they carry no I/O of their own
//! beyond reading schema files.

mod entity;
mod entity_type;
mod error;
pub mod hash;
mod registry;
mod schema;

pub use entity::Entity;
pub use entity_type::EntityType;
pub use error::{SchemaError, SchemaResult};
pub use registry::EntitySchemaRegistry;
pub use schema::{EntitySchema, PrimitiveType, PropertySchema};
