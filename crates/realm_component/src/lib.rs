//! # realm_component
//!
//! The data half of the realm simulation core: what an entity is, which
//! capabilities it can carry, and how a set of capabilities is matched.
//!
//! This crate provides:
//!
//! - [`EntityId`]: opaque, never-reused entity identifiers.
//! - [`Entity`] / [`EntityMut`]: an identifier plus its capability map, and a
//!   payload-only mutable view of a stored entity.
//! - [`Component`] / [`ComponentKind`]: the capability tagged union and its
//!   discriminant, with [`ComponentData`] for typed access.
//! - [`Query`]: declarative require-all / exclude-any / require-any
//!   predicates.

pub mod component;
pub mod entity;
pub mod error;
pub mod query;

pub use component::{
    Archetype, Attributes, Combat, Component, ComponentData, ComponentKind, CustomComponent,
    Essence, Identity, Inventory, ItemKind, ItemTag, Location,
};
pub use entity::{Entity, EntityId, EntityMut};
pub use error::MissingComponent;
pub use query::Query;
