//! Query predicates over entity capabilities.
//!
//! A [`Query`] declares which capabilities an entity must, must not, or may
//! carry. Systems declare their requirements as a require-all set; callers of
//! the entity store can build richer predicates.

use serde::{Deserialize, Serialize};

use crate::component::ComponentKind;
use crate::entity::Entity;

/// A transient capability predicate.
///
/// An entity matches when all three clauses hold:
///
/// 1. `with`: every listed kind is present (vacuous when empty).
/// 2. `without`: no listed kind is present.
/// 3. `any`: at least one listed kind is present (vacuous when empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub with: Vec<ComponentKind>,
    #[serde(default)]
    pub without: Vec<ComponentKind>,
    #[serde(default)]
    pub any: Vec<ComponentKind>,
}

impl Query {
    /// Create a query that matches every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a capability.
    #[must_use]
    pub fn with(mut self, kind: ComponentKind) -> Self {
        self.with.push(kind);
        self
    }

    /// Exclude entities carrying a capability.
    #[must_use]
    pub fn without(mut self, kind: ComponentKind) -> Self {
        self.without.push(kind);
        self
    }

    /// Add a capability to the require-any clause.
    #[must_use]
    pub fn any(mut self, kind: ComponentKind) -> Self {
        self.any.push(kind);
        self
    }

    /// A require-all query over the given kinds.
    #[must_use]
    pub fn requiring(kinds: &[ComponentKind]) -> Self {
        Self {
            with: kinds.to_vec(),
            ..Self::default()
        }
    }

    /// Evaluate the predicate against a presence test.
    pub fn matches_with(&self, has: impl Fn(&ComponentKind) -> bool) -> bool {
        self.with.iter().all(&has)
            && !self.without.iter().any(&has)
            && (self.any.is_empty() || self.any.iter().any(&has))
    }

    /// Evaluate the predicate against an entity.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        self.matches_with(|kind| entity.has(kind))
    }
}
