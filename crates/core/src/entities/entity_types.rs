//! Strong types for tracked entities.
//!
//! - `EntityId` - stable identifier of a contact or call within a listing session
//! - `EntityKind` - which listing the entity comes from
//! - `Attributes` - opaque field map as emitted by the backend

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constants::{CALL_ENRICHMENT_FIELDS, CONTACT_ENRICHMENT_FIELDS};

/// Field name to JSON value map. Values are carried opaquely.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// =============================================================================
// EntityId
// =============================================================================

/// Opaque identifier of an entity, unique within one listing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// EntityKind
// =============================================================================

/// Business record type behind a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Contact,
    Call,
}

impl EntityKind {
    /// Path segment used by the listing and enrichment endpoints.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contacts",
            EntityKind::Call => "calls",
        }
    }

    /// Enrichment fields the backend computes asynchronously for this kind.
    pub fn enrichment_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Contact => CONTACT_ENRICHMENT_FIELDS,
            EntityKind::Call => CALL_ENRICHMENT_FIELDS,
        }
    }

    /// Default vocabulary as an owned set.
    pub fn default_vocabulary(&self) -> BTreeSet<String> {
        self.enrichment_fields()
            .iter()
            .map(|f| f.to_string())
            .collect()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Contact => write!(f, "contact"),
            EntityKind::Call => write!(f, "call"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(EntityKind::Contact),
            "call" | "calls" => Ok(EntityKind::Call),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}
