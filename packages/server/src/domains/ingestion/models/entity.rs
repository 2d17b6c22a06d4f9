use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of entities the resolver matches free-text names against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Category,
    Account,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Contact => write!(f, "contact"),
            EntityKind::Category => write!(f, "category"),
            EntityKind::Account => write!(f, "account"),
        }
    }
}

/// A stored entity (contact, category, or account) with its alias forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    /// Lowercased, trimmed form of `name`; unique per kind.
    pub normalized_name: String,
    /// Deterministic alias forms (initials, stripped prefixes/suffixes,
    /// individual tokens) used for matching.
    pub variations: Vec<String>,
}

/// Result of resolving a free-text name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub entity: StoredEntity,
    /// True only when no existing entity matched and a new one was created.
    pub created: bool,
    /// 1.0 exact, 0.95/0.9 alias, computed score for fuzzy, 0.0 for created.
    pub match_confidence: f32,
}
