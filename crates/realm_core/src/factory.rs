//! Archetype construction helpers.
//!
//! [`EntityFactory`] assembles entities with the capability set of an
//! archetype. Options are borrowed and never modified; any field left as
//! `None` takes the value in [`defaults`].

use realm_component::{
    Archetype, Attributes, Combat, Entity, EntityId, Essence, Identity, Inventory, ItemKind,
    ItemTag, Location,
};

/// Values used when an option is left unset.
pub mod defaults {
    use realm_component::ItemKind;

    pub const PLAYER_MAX_HEALTH: u32 = 100;
    pub const PLAYER_MAX_MANA: u32 = 50;
    pub const PLAYER_ATTRIBUTE: u32 = 10;
    pub const PLAYER_INVENTORY_CAPACITY: usize = 20;
    pub const PLAYER_GOLD: u64 = 0;
    pub const PLAYER_ESSENCE: u32 = 0;
    pub const PLAYER_MAX_ESSENCE: u32 = 100;

    pub const NPC_MAX_HEALTH: u32 = 50;
    pub const NPC_MAX_MANA: u32 = 0;
    pub const NPC_ATTRIBUTE: u32 = 8;

    pub const LEVEL: u32 = 1;

    pub const ITEM_KIND: ItemKind = ItemKind::Misc;
    pub const ITEM_VALUE: u64 = 0;
    pub const ITEM_WEIGHT: f32 = 1.0;
    pub const ITEM_QUANTITY: u32 = 1;
}

/// Options for [`EntityFactory::player`].
///
/// Current health and mana default to their maxima and are clamped to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerOptions {
    pub name: String,
    pub room_id: String,
    /// Stable identifier, e.g. restored from persistence.
    pub id: Option<EntityId>,
    pub health: Option<u32>,
    pub max_health: Option<u32>,
    pub mana: Option<u32>,
    pub max_mana: Option<u32>,
    pub level: Option<u32>,
    pub attributes: Option<Attributes>,
    pub inventory_capacity: Option<usize>,
    pub gold: Option<u64>,
    pub essence: Option<u32>,
    pub max_essence: Option<u32>,
}

impl PlayerOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_id: room_id.into(),
            ..Self::default()
        }
    }
}

/// Options for [`EntityFactory::npc`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NpcOptions {
    pub name: String,
    pub room_id: String,
    pub id: Option<EntityId>,
    pub health: Option<u32>,
    pub max_health: Option<u32>,
    pub mana: Option<u32>,
    pub max_mana: Option<u32>,
    pub level: Option<u32>,
    pub attributes: Option<Attributes>,
}

impl NpcOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_id: room_id.into(),
            ..Self::default()
        }
    }
}

/// Options for [`EntityFactory::item`]. Items without a room are carried or
/// stored elsewhere and get no location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOptions {
    pub name: String,
    pub room_id: Option<String>,
    pub id: Option<EntityId>,
    pub kind: Option<ItemKind>,
    pub value: Option<u64>,
    pub weight: Option<f32>,
    pub quantity: Option<u32>,
}

impl ItemOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

/// Stateless entity construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityFactory;

impl EntityFactory {
    /// Identity, location, combat, inventory and essence.
    #[must_use]
    pub fn player(options: &PlayerOptions) -> Entity {
        let combat = combat(
            options.health,
            options.max_health.unwrap_or(defaults::PLAYER_MAX_HEALTH),
            options.mana,
            options.max_mana.unwrap_or(defaults::PLAYER_MAX_MANA),
            options.level,
            options
                .attributes
                .unwrap_or(Attributes::uniform(defaults::PLAYER_ATTRIBUTE)),
        );

        let mut inventory = Inventory::with_capacity(
            options
                .inventory_capacity
                .unwrap_or(defaults::PLAYER_INVENTORY_CAPACITY),
        );
        inventory.gold = options.gold.unwrap_or(defaults::PLAYER_GOLD);

        let mut essence = Essence::new(options.max_essence.unwrap_or(defaults::PLAYER_MAX_ESSENCE));
        essence.points = options
            .essence
            .unwrap_or(defaults::PLAYER_ESSENCE)
            .min(essence.max_points);

        Entity::with_id(options.id.unwrap_or_default())
            .with(Identity::new(options.name.clone(), Archetype::Player))
            .with(Location::new(options.room_id.clone()))
            .with(combat)
            .with(inventory)
            .with(essence)
    }

    /// Identity, location and combat.
    #[must_use]
    pub fn npc(options: &NpcOptions) -> Entity {
        let combat = combat(
            options.health,
            options.max_health.unwrap_or(defaults::NPC_MAX_HEALTH),
            options.mana,
            options.max_mana.unwrap_or(defaults::NPC_MAX_MANA),
            options.level,
            options
                .attributes
                .unwrap_or(Attributes::uniform(defaults::NPC_ATTRIBUTE)),
        );

        Entity::with_id(options.id.unwrap_or_default())
            .with(Identity::new(options.name.clone(), Archetype::Npc))
            .with(Location::new(options.room_id.clone()))
            .with(combat)
    }

    /// Identity, item tag and, when a room is given, location.
    #[must_use]
    pub fn item(options: &ItemOptions) -> Entity {
        let tag = ItemTag {
            name: options.name.clone(),
            kind: options.kind.unwrap_or(defaults::ITEM_KIND),
            value: options.value.unwrap_or(defaults::ITEM_VALUE),
            weight: options.weight.unwrap_or(defaults::ITEM_WEIGHT),
            quantity: options.quantity.unwrap_or(defaults::ITEM_QUANTITY),
        };

        let entity = Entity::with_id(options.id.unwrap_or_default())
            .with(Identity::new(options.name.clone(), Archetype::Item))
            .with(tag);
        match &options.room_id {
            Some(room_id) => entity.with(Location::new(room_id.clone())),
            None => entity,
        }
    }
}

fn combat(
    health: Option<u32>,
    max_health: u32,
    mana: Option<u32>,
    max_mana: u32,
    level: Option<u32>,
    attributes: Attributes,
) -> Combat {
    let mut combat = Combat::new(max_health, max_mana);
    combat.health = health.unwrap_or(max_health).min(max_health);
    combat.mana = mana.unwrap_or(max_mana).min(max_mana);
    combat.level = level.unwrap_or(defaults::LEVEL);
    combat.attributes = attributes;
    combat
}

#[cfg(test)]
mod tests {
    use realm_component::ComponentKind;

    use super::*;

    #[test]
    fn test_player_defaults() {
        let player = EntityFactory::player(&PlayerOptions::new("Aria", "town-square"));

        let identity = player.get::<Identity>().unwrap();
        assert_eq!(identity.name, "Aria");
        assert_eq!(identity.archetype, Archetype::Player);
        assert_eq!(player.get::<Location>().unwrap().room_id, "town-square");

        let combat = player.get::<Combat>().unwrap();
        assert_eq!((combat.health, combat.max_health), (100, 100));
        assert_eq!((combat.mana, combat.max_mana), (50, 50));
        assert_eq!(combat.level, 1);
        assert_eq!(combat.attributes, Attributes::uniform(10));

        let inventory = player.get::<Inventory>().unwrap();
        assert_eq!(inventory.capacity, 20);
        assert_eq!(inventory.gold, 0);

        let essence = player.get::<Essence>().unwrap();
        assert_eq!((essence.points, essence.max_points), (0, 100));
    }

    #[test]
    fn test_player_overrides() {
        let options = PlayerOptions {
            health: Some(500),
            max_health: Some(150),
            level: Some(7),
            gold: Some(42),
            essence: Some(30),
            ..PlayerOptions::new("Aria", "town-square")
        };
        let player = EntityFactory::player(&options);
        let combat = player.get::<Combat>().unwrap();
        assert_eq!(combat.health, 150, "health is clamped to max");
        assert_eq!(combat.max_health, 150);
        assert_eq!(combat.level, 7);
        assert_eq!(player.get::<Inventory>().unwrap().gold, 42);
        assert_eq!(player.get::<Essence>().unwrap().points, 30);
    }

    #[test]
    fn test_options_are_not_mutated() {
        let options = PlayerOptions::new("Aria", "town-square");
        let snapshot = options.clone();
        let first = EntityFactory::player(&options);
        let second = EntityFactory::player(&options);
        assert_eq!(options, snapshot);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_stable_id_is_used() {
        let id = EntityId::new();
        let options = NpcOptions {
            id: Some(id),
            ..NpcOptions::new("Rat", "cellar")
        };
        assert_eq!(EntityFactory::npc(&options).id(), id);
    }

    #[test]
    fn test_npc_profile() {
        let npc = EntityFactory::npc(&NpcOptions::new("Rat", "cellar"));
        assert!(npc.has_all(&[
            ComponentKind::Identity,
            ComponentKind::Location,
            ComponentKind::Combat
        ]));
        assert!(!npc.has(&ComponentKind::Inventory));
        assert!(!npc.has(&ComponentKind::Essence));

        let combat = npc.get::<Combat>().unwrap();
        assert_eq!((combat.health, combat.max_health), (50, 50));
        assert_eq!((combat.mana, combat.max_mana), (0, 0));
        assert_eq!(combat.attributes, Attributes::uniform(8));
    }

    #[test]
    fn test_item_without_room() {
        let item = EntityFactory::item(&ItemOptions::new("Rusty Key"));
        assert!(!item.has(&ComponentKind::Location));
        let tag = item.get::<ItemTag>().unwrap();
        assert_eq!(tag.kind, ItemKind::Misc);
        assert_eq!(tag.value, 0);
        assert_eq!(tag.weight, 1.0);
        assert_eq!(tag.quantity, 1);
    }

    #[test]
    fn test_item_in_room() {
        let options = ItemOptions {
            kind: Some(ItemKind::Weapon),
            value: Some(25),
            ..ItemOptions::new("Short Sword").in_room("armory")
        };
        let item = EntityFactory::item(&options);
        assert_eq!(item.get::<Location>().unwrap().room_id, "armory");
        assert_eq!(item.get::<ItemTag>().unwrap().kind, ItemKind::Weapon);
        assert_eq!(item.get::<Identity>().unwrap().archetype, Archetype::Item);
    }
}
