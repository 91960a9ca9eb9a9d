//! # realm_core
//!
//! The behaviour half of the realm simulation core. A [`Scheduler`] owns the
//! world (an [`EntityStore`] with its capability index), the [`EventBus`],
//! and the registered [`System`]s, and advances them one tick at a time.
//! [`TickLoop`] calls [`Scheduler::tick`] at a fixed rate.
//!
//! ## Threading
//!
//! The core is single-threaded by construction: every mutation takes
//! `&mut Scheduler`, event dispatch is synchronous, and systems run one after
//! another. Nothing here locks. A multi-threaded host is responsible for
//! serializing access, typically by owning the scheduler in one task and
//! sending it requests over a channel.
//!
//! ## Structural changes
//!
//! Systems receive [`EntityMut`](realm_component::EntityMut) views and may
//! only change component payloads in place during an update. Spawning,
//! despawning, attaching and detaching components go through the
//! [`CommandQueue`] and are applied after every system has run, so no update
//! ever observes the entity set changing under it.

pub mod config;
pub mod error;
pub mod event;
pub mod factory;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod system;
pub mod tick;

pub use config::{ConfigError, DuplicateEntityPolicy, SchedulerConfig};
pub use error::{CoreError, CoreResult, ErrorKind, FailureKind, GameError, Phase};
pub use event::{Event, EventBus, SubscriptionId, kinds};
pub use factory::{EntityFactory, ItemOptions, NpcOptions, PlayerOptions};
pub use registry::{SystemInfo, SystemRegistry, SystemState};
pub use scheduler::{Scheduler, TickReport};
pub use store::EntityStore;
pub use system::{Command, CommandQueue, System, SystemContext, safe_execute, safe_execute_async, wrap_error};
pub use tick::{MissedTickPolicy, StopHandle, StopReason, TickConfig, TickLoop, TickSummary};
