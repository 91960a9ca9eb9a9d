//! Entity identifiers and the entity value type.
//!
//! An [`EntityId`] is an opaque identifier with no inherent data. An
//! [`Entity`] pairs that identifier with the capabilities ("components") it
//! currently carries. Entities carry no behaviour.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::{Component, ComponentData, ComponentKind};
use crate::error::MissingComponent;

/// A unique entity identifier.
///
/// Identifiers are random v4 UUIDs, so they are unique for the lifetime of
/// the process and are never handed out twice. The persistence layer may
/// restore a stable identifier with [`EntityId::from_uuid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An identifiable thing in the simulated world, defined purely by the
/// capabilities it carries.
///
/// At most one component of a given [`ComponentKind`] exists per entity.
/// Owned entities are assembled with [`Entity::with`] and [`Entity::insert`];
/// once an entity lives inside a store, structural changes go through the
/// store so its capability index stays consistent.
///
/// Serialized as `{"id": ..., "components": [...]}` with the components
/// ordered by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    #[serde(with = "component_list")]
    components: HashMap<ComponentKind, Component>,
}

/// The component map travels as a list; each component carries its own kind.
mod component_list {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::component::{Component, ComponentKind};

    pub fn serialize<S: Serializer>(
        components: &HashMap<ComponentKind, Component>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut sorted: Vec<_> = components.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        serializer.collect_seq(sorted.into_iter().map(|(_, component)| component))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<ComponentKind, Component>, D::Error> {
        let list = Vec::<Component>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|component| (component.kind(), component))
            .collect())
    }
}

impl Entity {
    /// Create an empty entity with a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(EntityId::new())
    }

    /// Create an empty entity with the given identifier.
    #[must_use]
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id,
            components: HashMap::new(),
        }
    }

    /// Builder form of [`Entity::insert`].
    #[must_use]
    pub fn with(mut self, component: impl Into<Component>) -> Self {
        self.insert(component);
        self
    }

    /// Returns the entity's identifier.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Attach a component, returning the one it replaced (if any).
    pub fn insert(&mut self, component: impl Into<Component>) -> Option<Component> {
        let component = component.into();
        self.components.insert(component.kind(), component)
    }

    /// Detach the component of the given kind.
    pub fn remove(&mut self, kind: &ComponentKind) -> Option<Component> {
        self.components.remove(kind)
    }

    /// Returns `true` if the entity carries a component of this kind.
    #[must_use]
    pub fn has(&self, kind: &ComponentKind) -> bool {
        self.components.contains_key(kind)
    }

    /// Returns `true` if every listed kind is present.
    #[must_use]
    pub fn has_all(&self, kinds: &[ComponentKind]) -> bool {
        kinds.iter().all(|kind| self.has(kind))
    }

    /// Untyped access by kind.
    #[must_use]
    pub fn get_kind(&self, kind: &ComponentKind) -> Option<&Component> {
        self.components.get(kind)
    }

    /// Typed access; absent when the component is missing.
    #[must_use]
    pub fn get<T: ComponentData>(&self) -> Option<&T> {
        self.components.get(&T::kind()).and_then(T::from_component)
    }

    /// Typed mutable access; absent when the component is missing.
    pub fn get_mut<T: ComponentData>(&mut self) -> Option<&mut T> {
        self.components
            .get_mut(&T::kind())
            .and_then(T::from_component_mut)
    }

    /// Typed access that fails with a [`MissingComponent`] naming the entity
    /// and the absent component.
    pub fn require<T: ComponentData>(&self) -> Result<&T, MissingComponent> {
        let id = self.id;
        self.get::<T>()
            .ok_or_else(|| MissingComponent::new(id, T::kind()))
    }

    /// Mutable form of [`Entity::require`].
    pub fn require_mut<T: ComponentData>(&mut self) -> Result<&mut T, MissingComponent> {
        let id = self.id;
        self.get_mut::<T>()
            .ok_or_else(|| MissingComponent::new(id, T::kind()))
    }

    /// Iterate over the kinds this entity carries.
    pub fn kinds(&self) -> impl Iterator<Item = &ComponentKind> {
        self.components.keys()
    }

    /// Iterate over the components this entity carries.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Number of components attached.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable view of a stored entity.
///
/// Component payloads can be read and changed in place, but components can
/// neither be attached nor detached through this view.
#[derive(Debug)]
pub struct EntityMut<'a> {
    entity: &'a mut Entity,
}

impl<'a> EntityMut<'a> {
    /// Wrap a mutable entity reference.
    #[must_use]
    pub fn new(entity: &'a mut Entity) -> Self {
        Self { entity }
    }

    /// Returns the entity's identifier.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    /// Read-only access to the underlying entity.
    #[must_use]
    pub fn as_entity(&self) -> &Entity {
        self.entity
    }

    #[must_use]
    pub fn has(&self, kind: &ComponentKind) -> bool {
        self.entity.has(kind)
    }

    #[must_use]
    pub fn get<T: ComponentData>(&self) -> Option<&T> {
        self.entity.get::<T>()
    }

    pub fn get_mut<T: ComponentData>(&mut self) -> Option<&mut T> {
        self.entity.get_mut::<T>()
    }

    pub fn require<T: ComponentData>(&self) -> Result<&T, MissingComponent> {
        self.entity.require::<T>()
    }

    pub fn require_mut<T: ComponentData>(&mut self) -> Result<&mut T, MissingComponent> {
        self.entity.require_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::component::{Combat, Location};

    #[test]
    fn test_entity_snapshot_restores_components() {
        let entity = Entity::new()
            .with(Location::new("hall"))
            .with(Combat::new(40, 10))
            .with(Component::custom("quest_giver", json!({ "quest": "rats" })));

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["id"], json!(entity.id()));
        assert_eq!(value["components"].as_array().unwrap().len(), 3);

        let restored: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(restored, entity);
        assert!(restored.has(&ComponentKind::custom("quest_giver")));
        assert_eq!(restored.get::<Combat>().unwrap().max_health, 40);
    }

    #[test]
    fn test_entity_ids_are_unique() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_id_from_uuid_roundtrips() {
        let uuid = Uuid::new_v4();
        let id = EntityId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), &uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn test_insert_replaces_same_kind() {
        let mut entity = Entity::new().with(Location::new("hall"));
        let previous = entity.insert(Location::new("garden"));
        assert!(previous.is_some());
        assert_eq!(entity.component_count(), 1);
        assert_eq!(entity.get::<Location>().unwrap().room_id, "garden");
    }

    #[test]
    fn test_get_returns_none_for_missing_component() {
        let entity = Entity::new().with(Location::new("hall"));
        assert!(entity.get::<Combat>().is_none());
    }

    #[test]
    fn test_require_names_entity_and_component() {
        let entity = Entity::new();
        let err = entity.require::<Combat>().unwrap_err();
        assert_eq!(err.entity, entity.id());
        assert_eq!(err.component, ComponentKind::Combat);
        assert!(err.to_string().contains("combat"));
    }

    #[test]
    fn test_entity_mut_mutates_payload_in_place() {
        let mut entity = Entity::new().with(Combat::default());
        {
            let mut view = EntityMut::new(&mut entity);
            view.require_mut::<Combat>().unwrap().damage(30);
        }
        assert_eq!(entity.get::<Combat>().unwrap().health, 70);
    }

    #[test]
    fn test_remove_detaches_component() {
        let mut entity = Entity::new().with(Location::new("hall"));
        assert!(entity.remove(&ComponentKind::Location).is_some());
        assert!(!entity.has(&ComponentKind::Location));
        assert!(entity.remove(&ComponentKind::Location).is_none());
    }
}
