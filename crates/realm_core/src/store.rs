//! Entity storage and the capability index.
//!
//! The [`EntityStore`] owns the canonical set of entities and an index from
//! capability kind to the identifiers of the entities currently carrying it.
//! The index is updated synchronously on every structural change, so for all
//! entities `e` and kinds `c`: `e ∈ index[c] ⟺ c ∈ e.components`. Empty index
//! buckets are pruned.
//!
//! The store is pure bookkeeping: it emits no events and runs no system hooks.
//! [`Scheduler`](crate::Scheduler) wraps it with those.

use std::collections::{HashMap, HashSet};

use realm_component::{Component, ComponentData, ComponentKind, Entity, EntityId, EntityMut, Query};

use crate::error::{CoreError, CoreResult};

/// The canonical entity set plus its capability index.
#[derive(Debug, Default)]
pub struct EntityStore {
    /// All live entities, keyed by identifier.
    entities: HashMap<EntityId, Entity>,
    /// Capability kind → identifiers of entities carrying it.
    index: HashMap<ComponentKind, HashSet<EntityId>>,
}

impl EntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity and index every capability it carries.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateEntity`] if the identifier is already present;
    /// the store is left untouched.
    pub fn insert(&mut self, entity: Entity) -> CoreResult<EntityId> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(CoreError::DuplicateEntity(id));
        }
        for kind in entity.kinds() {
            self.index.entry(kind.clone()).or_default().insert(id);
        }
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Remove an entity and every index entry that refers to it.
    ///
    /// Returns the removed entity, or `None` if it did not exist.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        for kind in entity.kinds() {
            self.unindex(kind, id);
        }
        Some(entity)
    }

    fn unindex(&mut self, kind: &ComponentKind, id: EntityId) {
        if let Some(bucket) = self.index.get_mut(kind) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.index.remove(kind);
            }
        }
    }

    /// Attach a component to a stored entity, returning the one it replaced.
    ///
    /// # Errors
    ///
    /// [`CoreError::EntityNotFound`] if no such entity is stored.
    pub fn insert_component(
        &mut self,
        id: EntityId,
        component: impl Into<Component>,
    ) -> CoreResult<Option<Component>> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(CoreError::EntityNotFound(id))?;
        let component = component.into();
        let kind = component.kind();
        let previous = entity.insert(component);
        self.index.entry(kind).or_default().insert(id);
        Ok(previous)
    }

    /// Detach a component from a stored entity.
    ///
    /// # Errors
    ///
    /// [`CoreError::EntityNotFound`] if no such entity is stored.
    pub fn remove_component(
        &mut self,
        id: EntityId,
        kind: &ComponentKind,
    ) -> CoreResult<Option<Component>> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(CoreError::EntityNotFound(id))?;
        let removed = entity.remove(kind);
        if removed.is_some() {
            self.unindex(kind, id);
        }
        Ok(removed)
    }

    /// Returns a reference to an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Typed read access to one component of a stored entity.
    #[must_use]
    pub fn component<T: ComponentData>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id).and_then(Entity::get::<T>)
    }

    /// Typed mutable access to one component payload. The component cannot be
    /// detached through this reference, so the index stays valid.
    pub fn component_mut<T: ComponentData>(&mut self, id: EntityId) -> Option<&mut T> {
        self.entities.get_mut(&id).and_then(Entity::get_mut::<T>)
    }

    /// Returns an iterator over all stored entities.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Returns the identifiers of all stored entities.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Returns the total number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Identifiers of entities carrying `kind`. Empty for unknown kinds.
    pub fn entities_with_component(
        &self,
        kind: &ComponentKind,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.index.get(kind).into_iter().flatten().copied()
    }

    /// O(1) membership test against the index.
    #[must_use]
    pub fn has_component(&self, id: EntityId, kind: &ComponentKind) -> bool {
        self.index.get(kind).is_some_and(|bucket| bucket.contains(&id))
    }

    /// Number of entities carrying `kind`.
    #[must_use]
    pub fn count_with_component(&self, kind: &ComponentKind) -> usize {
        self.index.get(kind).map_or(0, HashSet::len)
    }

    /// Evaluate a query and return a snapshot of the matching identifiers.
    ///
    /// Candidates come from the smallest `with` bucket (or every entity when
    /// `with` is empty); each candidate is then checked against the full
    /// predicate through the index. The result is an owned snapshot, so
    /// later mutation of the store cannot duplicate or drop entries from it.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<EntityId> {
        let candidates: Vec<EntityId> = if query.with.is_empty() {
            self.ids().collect()
        } else {
            let smallest = query
                .with
                .iter()
                .map(|kind| self.index.get(kind))
                .min_by_key(|bucket| bucket.map_or(0, HashSet::len));
            match smallest {
                Some(Some(bucket)) => bucket.iter().copied().collect(),
                _ => return Vec::new(),
            }
        };

        let mut matched: Vec<EntityId> = candidates
            .into_iter()
            .filter(|&id| query.matches_with(|kind| self.has_component(id, kind)))
            .collect();
        matched.sort_unstable();
        matched
    }

    /// Mutable views of every entity accepted by `filter`, ordered by id.
    ///
    /// The views expose payloads only; the index cannot be invalidated
    /// through them.
    pub fn matching_mut(&mut self, filter: impl Fn(&Entity) -> bool) -> Vec<EntityMut<'_>> {
        let mut matched: Vec<EntityMut<'_>> = self
            .entities
            .values_mut()
            .filter(|entity| filter(entity))
            .map(EntityMut::new)
            .collect();
        matched.sort_unstable_by_key(|view| view.id());
        matched
    }

    /// Verify the index invariant in both directions.
    ///
    /// Returns a description of the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (kind, bucket) in &self.index {
            if bucket.is_empty() {
                return Err(format!("empty index bucket for '{kind}'"));
            }
            for id in bucket {
                match self.entities.get(id) {
                    None => return Err(format!("index '{kind}' refers to missing entity {id}")),
                    Some(entity) if !entity.has(kind) => {
                        return Err(format!("index '{kind}' lists {id}, which lacks it"));
                    }
                    Some(_) => {}
                }
            }
        }
        for entity in self.entities.values() {
            for kind in entity.kinds() {
                if !self.has_component(entity.id(), kind) {
                    return Err(format!("entity {} carries '{kind}' but is not indexed", entity.id()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use realm_component::{Combat, Inventory, Location};

    use super::*;

    fn loc() -> ComponentKind {
        ComponentKind::Location
    }

    #[test]
    fn test_insert_indexes_components() {
        let mut store = EntityStore::new();
        let id = store
            .insert(Entity::new().with(Location::new("hall")).with(Combat::default()))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.has_component(id, &loc()));
        assert!(store.has_component(id, &ComponentKind::Combat));
        assert_eq!(store.count_with_component(&loc()), 1);
        store.check_consistency().unwrap();
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut store = EntityStore::new();
        let entity = Entity::new().with(Location::new("hall"));
        let duplicate = Entity::with_id(entity.id()).with(Combat::default());
        store.insert(entity).unwrap();
        let err = store.insert(duplicate).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEntity(_)));
        assert_eq!(store.count_with_component(&ComponentKind::Combat), 0);
        store.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_purges_index() {
        let mut store = EntityStore::new();
        let id = store
            .insert(Entity::new().with(Location::new("hall")).with(Inventory::default()))
            .unwrap();
        assert!(store.remove(id).is_some());
        assert!(store.get(id).is_none());
        assert_eq!(store.entities_with_component(&loc()).count(), 0);
        assert_eq!(store.count_with_component(&ComponentKind::Inventory), 0);
        assert!(store.remove(id).is_none());
        store.check_consistency().unwrap();
    }

    #[test]
    fn test_unknown_kind_is_empty() {
        let store = EntityStore::new();
        assert_eq!(
            store
                .entities_with_component(&ComponentKind::custom("nothing"))
                .count(),
            0
        );
    }

    #[test]
    fn test_component_insert_and_remove_keep_index() {
        let mut store = EntityStore::new();
        let id = store.insert(Entity::new()).unwrap();
        store.insert_component(id, Location::new("hall")).unwrap();
        assert!(store.has_component(id, &loc()));
        store.check_consistency().unwrap();

        let removed = store.remove_component(id, &loc()).unwrap();
        assert!(removed.is_some());
        assert!(!store.has_component(id, &loc()));
        assert!(store.remove_component(id, &loc()).unwrap().is_none());
        store.check_consistency().unwrap();
    }

    #[test]
    fn test_component_ops_on_missing_entity() {
        let mut store = EntityStore::new();
        let id = EntityId::new();
        assert!(matches!(
            store.insert_component(id, Location::new("hall")),
            Err(CoreError::EntityNotFound(_))
        ));
        assert!(matches!(
            store.remove_component(id, &loc()),
            Err(CoreError::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_query_with_without_any() {
        let mut store = EntityStore::new();
        let full = store
            .insert(
                Entity::new()
                    .with(Location::new("a"))
                    .with(Combat::default())
                    .with(Inventory::default()),
            )
            .unwrap();
        let fighter = store
            .insert(Entity::new().with(Location::new("a")).with(Combat::default()))
            .unwrap();
        let carrier = store
            .insert(Entity::new().with(Location::new("a")).with(Inventory::default()))
            .unwrap();

        let q = Query::new().with(loc()).without(ComponentKind::Combat);
        assert_eq!(store.query(&q), vec![carrier]);

        let q = Query::new().any(ComponentKind::Combat);
        let mut expected = vec![full, fighter];
        expected.sort();
        assert_eq!(store.query(&q), expected);

        let q = Query::new().with(ComponentKind::Essence);
        assert!(store.query(&q).is_empty());
    }

    #[test]
    fn test_component_mut_changes_payload() {
        let mut store = EntityStore::new();
        let id = store.insert(Entity::new().with(Combat::default())).unwrap();
        store.component_mut::<Combat>(id).unwrap().damage(40);
        assert_eq!(store.component::<Combat>(id).unwrap().health, 60);
    }

    #[test]
    fn test_matching_mut_filters_and_orders() {
        let mut store = EntityStore::new();
        for _ in 0..4 {
            store.insert(Entity::new().with(Combat::default())).unwrap();
        }
        store.insert(Entity::new().with(Location::new("a"))).unwrap();

        let views = store.matching_mut(|e| e.has(&ComponentKind::Combat));
        assert_eq!(views.len(), 4);
        assert!(views.windows(2).all(|w| w[0].id() < w[1].id()));
    }
}
