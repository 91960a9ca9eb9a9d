//! Demo systems wired up by the realm host.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use realm_component::{Archetype, Combat, ComponentKind, Entity, EntityMut, Identity, Location};
use realm_core::{System, SystemContext};

/// Emitted when a creature's health reaches zero.
pub const ENTITY_DIED: &str = "entity:died";

/// Restores health and mana of living creatures at a fixed cadence.
pub struct RegenerationSystem {
    requires: [ComponentKind; 1],
    interval: Duration,
    health: u32,
    mana: u32,
    elapsed: Duration,
}

impl RegenerationSystem {
    #[must_use]
    pub fn new(interval: Duration, health: u32, mana: u32) -> Self {
        Self {
            requires: [ComponentKind::Combat],
            interval,
            health,
            mana,
            elapsed: Duration::ZERO,
        }
    }
}

impl System for RegenerationSystem {
    fn requirements(&self) -> &[ComponentKind] {
        &self.requires
    }

    fn priority(&self) -> i32 {
        10
    }

    fn update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()> {
        self.elapsed += ctx.delta();
        if self.elapsed < self.interval {
            return Ok(());
        }
        self.elapsed = Duration::ZERO;

        for entity in entities.iter_mut() {
            let combat = entity.require_mut::<Combat>()?;
            if combat.is_alive() {
                combat.heal(self.health);
                combat.restore_mana(self.mana);
            }
        }
        Ok(())
    }
}

/// Damages every creature standing in a hazardous room.
pub struct HazardSystem {
    requires: [ComponentKind; 2],
    room_id: String,
    damage_per_second: f64,
    /// Fractional damage carried between ticks.
    pending: f64,
}

impl HazardSystem {
    #[must_use]
    pub fn new(room_id: impl Into<String>, damage_per_second: f64) -> Self {
        Self {
            requires: [ComponentKind::Location, ComponentKind::Combat],
            room_id: room_id.into(),
            damage_per_second,
            pending: 0.0,
        }
    }
}

impl System for HazardSystem {
    fn requirements(&self) -> &[ComponentKind] {
        &self.requires
    }

    fn update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()> {
        self.pending += self.damage_per_second * ctx.delta_secs();
        let damage = self.pending.floor();
        if damage < 1.0 {
            return Ok(());
        }
        self.pending -= damage;

        for entity in entities.iter_mut() {
            if entity.require::<Location>()?.room_id != self.room_id {
                continue;
            }
            entity.require_mut::<Combat>()?.damage(damage as u32);
        }
        Ok(())
    }
}

/// Announces deaths and despawns dead non-player creatures once the tick
/// completes.
pub struct DeathSystem {
    requires: [ComponentKind; 2],
}

impl DeathSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requires: [ComponentKind::Identity, ComponentKind::Combat],
        }
    }
}

impl Default for DeathSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for DeathSystem {
    fn requirements(&self) -> &[ComponentKind] {
        &self.requires
    }

    fn priority(&self) -> i32 {
        100
    }

    fn on_start(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        ctx.subscribe(ENTITY_DIED, |event| {
            info!(
                name = event.payload["name"].as_str().unwrap_or("?"),
                "creature died"
            );
            Ok(())
        });
        Ok(())
    }

    fn on_entity_added(&mut self, _ctx: &mut SystemContext<'_>, entity: &Entity) -> anyhow::Result<()> {
        let identity = entity.require::<Identity>()?;
        info!(name = %identity.name, entity = %entity.id(), "creature entered the world");
        Ok(())
    }

    fn update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()> {
        for entity in entities.iter() {
            if entity.require::<Combat>()?.is_alive() {
                continue;
            }
            let identity = entity.require::<Identity>()?;
            ctx.emit(
                ENTITY_DIED,
                json!({ "entity": entity.id(), "name": identity.name }),
            );
            if identity.archetype != Archetype::Player {
                ctx.commands().despawn(entity.id());
            }
        }
        Ok(())
    }
}
