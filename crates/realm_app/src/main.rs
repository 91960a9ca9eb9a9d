//! # realm_app: demo host
//!
//! Runs the simulation core with a handful of demo systems and entities.
//!
//! ## Startup Sequence
//!
//! 1. Load [`SchedulerConfig`] from the `REALM_*` environment variables.
//! 2. Register the demo systems and spawn a player and some creatures.
//! 3. Enter the fixed-rate tick loop until Ctrl-C or `REALM_MAX_TICKS`.
//! 4. Shut the scheduler down, stopping systems in reverse priority order.

mod systems;

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use realm_core::{
    EntityFactory, NpcOptions, PlayerOptions, Scheduler, SchedulerConfig, TickLoop, kinds,
};
use systems::{DeathSystem, HazardSystem, RegenerationSystem};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("realm_app=info".parse()?)
                .add_directive("realm_core=info".parse()?),
        )
        .init();

    info!("realm starting");

    let config = SchedulerConfig::from_env()?;
    let tick_config = config.tick.clone();
    let mut scheduler = Scheduler::new(config);

    scheduler.register_system(
        "regeneration",
        RegenerationSystem::new(Duration::from_secs(2), 2, 1),
    )?;
    scheduler.register_system("hazard", HazardSystem::new("swamp", 4.0))?;
    scheduler.register_system("death", DeathSystem::new())?;

    scheduler.bus_mut().subscribe(kinds::SYSTEM_ERROR, |event| {
        warn!(payload = %event.payload, "system error");
        Ok(())
    });

    scheduler.add_entity(EntityFactory::player(&PlayerOptions::new(
        "Aria",
        "town-square",
    )))?;
    for (name, room) in [("Bog Rat", "swamp"), ("Marsh Toad", "swamp"), ("Gate Guard", "gate")] {
        scheduler.add_entity(EntityFactory::npc(&NpcOptions::new(name, room)))?;
    }
    info!(entities = scheduler.entity_count(), "world populated");

    let mut tick_loop = TickLoop::new(tick_config)?;
    let stop = tick_loop.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current tick");
            stop.stop();
        }
    });

    let summary = tick_loop.run(&mut scheduler).await;
    info!(
        ticks = summary.ticks,
        overruns = summary.overruns,
        failures = summary.failures,
        entities = scheduler.entity_count(),
        "tick loop finished"
    );

    if let Err(err) = scheduler.shutdown() {
        warn!(error = %err, "shutdown reported failures");
    }

    info!("realm shut down");
    Ok(())
}
