use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SchemaError;

/// The fixed set of record kinds KickCat synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Milestone,
    Label,
    Issue,
}

impl EntityType {
    /// Every entity type, in dependency order (referenced types first).
    pub const ALL: [EntityType; 3] = [EntityType::Milestone, EntityType::Label, EntityType::Issue];

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Milestone => "milestone",
            EntityType::Label => "label",
            EntityType::Issue => "issue",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownEntityType(s.to_string()))
    }
}
