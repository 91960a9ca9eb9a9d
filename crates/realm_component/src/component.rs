//! Capability ("component") types.
//!
//! A [`Component`] is a named, typed bag of data describing one facet of an
//! entity. The set of built-in capabilities is closed and modelled as a tagged
//! union so lookups stay type-checked; content that needs its own capability
//! uses [`Component::Custom`], which carries a free-form JSON payload.
//!
//! ## Typed access
//!
//! Every built-in payload implements [`ComponentData`], which is what
//! [`Entity::get`](crate::Entity::get) and friends use to project a
//! [`Component`] onto the concrete payload type without casts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Discriminant of a [`Component`].
///
/// Built-in kinds and [`ComponentKind::Custom`] live in separate namespaces:
/// `ComponentKind::Custom("combat".into())` is not [`ComponentKind::Combat`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Identity,
    Location,
    Combat,
    Inventory,
    Essence,
    Item,
    /// A content-defined capability, keyed by its name.
    Custom(String),
}

impl ComponentKind {
    /// Resolve a capability name. Built-in names map to their variant, any
    /// other name becomes [`ComponentKind::Custom`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "identity" => Self::Identity,
            "location" => Self::Location,
            "combat" => Self::Combat,
            "inventory" => Self::Inventory,
            "essence" => Self::Essence,
            "item" => Self::Item,
            other => Self::Custom(other.to_string()),
        }
    }

    /// A content-defined kind with the given name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The canonical capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Identity => "identity",
            Self::Location => "location",
            Self::Combat => "combat",
            Self::Inventory => "inventory",
            Self::Essence => "essence",
            Self::Item => "item",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A capability attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    Identity(Identity),
    Location(Location),
    Combat(Combat),
    Inventory(Inventory),
    Essence(Essence),
    Item(ItemTag),
    Custom(CustomComponent),
}

impl Component {
    /// A content-defined component.
    #[must_use]
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Custom(CustomComponent {
            name: name.into(),
            data,
        })
    }

    /// Returns the discriminant of this component.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Identity(_) => ComponentKind::Identity,
            Self::Location(_) => ComponentKind::Location,
            Self::Combat(_) => ComponentKind::Combat,
            Self::Inventory(_) => ComponentKind::Inventory,
            Self::Essence(_) => ComponentKind::Essence,
            Self::Item(_) => ComponentKind::Item,
            Self::Custom(custom) => ComponentKind::Custom(custom.name.clone()),
        }
    }
}

/// Projection between [`Component`] and a concrete payload type.
pub trait ComponentData: Sized {
    /// The kind this payload is stored under.
    fn kind() -> ComponentKind;

    /// Borrow the payload if `component` holds this type.
    fn from_component(component: &Component) -> Option<&Self>;

    /// Mutably borrow the payload if `component` holds this type.
    fn from_component_mut(component: &mut Component) -> Option<&mut Self>;

    /// Wrap the payload.
    fn into_component(self) -> Component;
}

macro_rules! component_data {
    ($ty:ty, $variant:ident) => {
        impl ComponentData for $ty {
            fn kind() -> ComponentKind {
                ComponentKind::$variant
            }

            fn from_component(component: &Component) -> Option<&Self> {
                match component {
                    Component::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
                match component {
                    Component::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_component(self) -> Component {
                Component::$variant(self)
            }
        }

        impl From<$ty> for Component {
            fn from(value: $ty) -> Self {
                value.into_component()
            }
        }
    };
}

component_data!(Identity, Identity);
component_data!(Location, Location);
component_data!(Combat, Combat);
component_data!(Inventory, Inventory);
component_data!(Essence, Essence);
component_data!(ItemTag, Item);

impl From<CustomComponent> for Component {
    fn from(value: CustomComponent) -> Self {
        Self::Custom(value)
    }
}

// ── Payloads ────────────────────────────────────────────────────────────────

/// Which archetype an entity was assembled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Player,
    Npc,
    Item,
}

/// Display name and archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub archetype: Archetype,
}

impl Identity {
    #[must_use]
    pub fn new(name: impl Into<String>, archetype: Archetype) -> Self {
        Self {
            name: name.into(),
            archetype,
        }
    }
}

/// Room placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// The room the entity is in.
    pub room_id: String,
    /// The room the entity was in before its last move.
    pub previous_room: Option<String>,
}

impl Location {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            previous_room: None,
        }
    }

    /// Move to another room, remembering the one left behind.
    pub fn move_to(&mut self, room_id: impl Into<String>) {
        let previous = std::mem::replace(&mut self.room_id, room_id.into());
        self.previous_room = Some(previous);
    }
}

/// Primary attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub strength: u32,
    pub dexterity: u32,
    pub intellect: u32,
    pub vitality: u32,
}

impl Attributes {
    /// All four attributes set to `value`.
    #[must_use]
    pub const fn uniform(value: u32) -> Self {
        Self {
            strength: value,
            dexterity: value,
            intellect: value,
            vitality: value,
        }
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self::uniform(10)
    }
}

/// Vitals and combat state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combat {
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub level: u32,
    pub attributes: Attributes,
    /// Current combat target, if engaged.
    pub target: Option<EntityId>,
}

impl Combat {
    /// Full vitals with the given maxima.
    #[must_use]
    pub fn new(max_health: u32, max_mana: u32) -> Self {
        Self {
            health: max_health,
            max_health,
            mana: max_mana,
            max_mana,
            level: 1,
            attributes: Attributes::default(),
            target: None,
        }
    }

    /// Returns `true` while health is above zero.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Apply damage, clamping to zero.
    pub fn damage(&mut self, amount: u32) {
        self.health = self.health.saturating_sub(amount);
    }

    /// Heal, clamping to max.
    pub fn heal(&mut self, amount: u32) {
        self.health = self.health.saturating_add(amount).min(self.max_health);
    }

    /// Spend mana. Returns `false` (and spends nothing) if there is not enough.
    pub fn spend_mana(&mut self, amount: u32) -> bool {
        if self.mana < amount {
            return false;
        }
        self.mana -= amount;
        true
    }

    /// Restore mana, clamping to max.
    pub fn restore_mana(&mut self, amount: u32) {
        self.mana = self.mana.saturating_add(amount).min(self.max_mana);
    }
}

impl Default for Combat {
    fn default() -> Self {
        Self::new(100, 50)
    }
}

/// Carried items and currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<EntityId>,
    pub capacity: usize,
    pub gold: u64,
}

impl Inventory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            gold: 0,
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Add an item. Returns `false` if the inventory is full.
    pub fn add_item(&mut self, item: EntityId) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove an item. Returns `true` if it was carried.
    pub fn remove_item(&mut self, item: EntityId) -> bool {
        match self.items.iter().position(|&carried| carried == item) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::with_capacity(20)
    }
}

/// Essence pool and the abilities it fuels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Essence {
    pub points: u32,
    pub max_points: u32,
    pub abilities: BTreeSet<String>,
}

impl Essence {
    #[must_use]
    pub fn new(max_points: u32) -> Self {
        Self {
            points: 0,
            max_points,
            abilities: BTreeSet::new(),
        }
    }

    /// Gain essence, clamping to max.
    pub fn gain(&mut self, amount: u32) {
        self.points = self.points.saturating_add(amount).min(self.max_points);
    }

    /// Spend essence. Returns `false` (and spends nothing) if there is not enough.
    pub fn spend(&mut self, amount: u32) -> bool {
        if self.points < amount {
            return false;
        }
        self.points -= amount;
        true
    }

    /// Learn an ability. Returns `false` if it was already known.
    pub fn learn(&mut self, ability: impl Into<String>) -> bool {
        self.abilities.insert(ability.into())
    }

    #[must_use]
    pub fn knows(&self, ability: &str) -> bool {
        self.abilities.contains(ability)
    }
}

impl Default for Essence {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Broad item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Armor,
    Consumable,
    Material,
    Key,
    #[default]
    Misc,
}

/// Marks an entity as an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTag {
    pub name: String,
    pub kind: ItemKind,
    pub value: u64,
    pub weight: f32,
    pub quantity: u32,
}

impl ItemTag {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Misc,
            value: 0,
            weight: 1.0,
            quantity: 1,
        }
    }
}

/// Content-defined capability with a free-form payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomComponent {
    pub name: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_from_name_maps_builtins() {
        assert_eq!(ComponentKind::from_name("combat"), ComponentKind::Combat);
        assert_eq!(ComponentKind::from_name("item"), ComponentKind::Item);
        assert_eq!(
            ComponentKind::from_name("faction"),
            ComponentKind::Custom("faction".to_string())
        );
    }

    #[test]
    fn test_kind_name_matches_from_name() {
        for kind in [
            ComponentKind::Identity,
            ComponentKind::Location,
            ComponentKind::Combat,
            ComponentKind::Inventory,
            ComponentKind::Essence,
            ComponentKind::Item,
        ] {
            assert_eq!(ComponentKind::from_name(kind.name()), kind);
        }
    }

    #[test]
    fn test_custom_kind_is_separate_namespace() {
        let custom = Component::custom("combat", json!({}));
        assert_eq!(custom.kind(), ComponentKind::custom("combat"));
        assert_ne!(custom.kind(), ComponentKind::Combat);
    }

    #[test]
    fn test_component_data_projection() {
        let mut component: Component = Combat::default().into();
        assert!(Combat::from_component(&component).is_some());
        assert!(Location::from_component(&component).is_none());
        Combat::from_component_mut(&mut component).unwrap().damage(10);
        assert_eq!(Combat::from_component(&component).unwrap().health, 90);
    }

    #[test]
    fn test_combat_clamps() {
        let mut combat = Combat::new(100, 20);
        combat.damage(250);
        assert_eq!(combat.health, 0);
        assert!(!combat.is_alive());
        combat.heal(500);
        assert_eq!(combat.health, 100);
        assert!(!combat.spend_mana(21));
        assert!(combat.spend_mana(20));
        assert_eq!(combat.mana, 0);
    }

    #[test]
    fn test_inventory_respects_capacity() {
        let mut inv = Inventory::with_capacity(1);
        let sword = EntityId::new();
        assert!(inv.add_item(sword));
        assert!(!inv.add_item(EntityId::new()));
        assert!(inv.remove_item(sword));
        assert!(!inv.remove_item(sword));
    }

    #[test]
    fn test_essence_spend_and_learn() {
        let mut essence = Essence::new(10);
        essence.gain(25);
        assert_eq!(essence.points, 10);
        assert!(essence.spend(4));
        assert!(!essence.spend(7));
        assert!(essence.learn("fireball"));
        assert!(!essence.learn("fireball"));
        assert!(essence.knows("fireball"));
    }

    #[test]
    fn test_location_move_remembers_previous() {
        let mut loc = Location::new("hall");
        loc.move_to("garden");
        assert_eq!(loc.room_id, "garden");
        assert_eq!(loc.previous_room.as_deref(), Some("hall"));
    }

    #[test]
    fn test_component_snapshot_is_tagged() {
        let value = serde_json::to_value(Component::from(Location::new("hall"))).unwrap();
        assert_eq!(value["type"], "location");
        assert_eq!(value["room_id"], "hall");
    }
}
