//! Component access errors.

use crate::component::ComponentKind;
use crate::entity::EntityId;

/// A required component was absent from an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entity {entity} is missing component '{component}'")]
pub struct MissingComponent {
    /// The entity that was inspected.
    pub entity: EntityId,
    /// The component that was required.
    pub component: ComponentKind,
}

impl MissingComponent {
    #[must_use]
    pub fn new(entity: EntityId, component: ComponentKind) -> Self {
        Self { entity, component }
    }
}
