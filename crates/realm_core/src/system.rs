//! The contract every behavioural module ("system") implements.
//!
//! A [`System`] declares the capabilities an entity must carry to be relevant
//! to it, a priority, and its per-tick update logic. Every hook receives a
//! [`SystemContext`] that supplies the shared helpers: event emit/subscribe
//! stamped with the system's name, structured error wrapping, safe-execute
//! wrappers, and a queue for deferred structural mutation.
//!
//! Systems hold no entity-specific state between ticks. They may mutate
//! component payloads in place through [`EntityMut`], but attaching,
//! detaching, spawning, or despawning goes through [`CommandQueue`] and is
//! applied by the scheduler once every system has finished the tick.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use realm_component::{Component, ComponentKind, Entity, EntityId, EntityMut};

use crate::error::GameError;
use crate::event::{Event, EventBus, SubscriptionId};

/// A behavioural unit driven by the scheduler.
///
/// All hooks except [`System::update`] default to no-ops. Hooks return
/// `anyhow::Result`; the scheduler classifies any error (or panic) into a
/// [`GameError`] tagged with the system's name and the hook it came from.
pub trait System: Send {
    /// Capabilities an entity must carry to be passed to [`System::update`].
    fn requirements(&self) -> &[ComponentKind];

    /// Ordering key; lower runs first. Ties run in registration order.
    fn priority(&self) -> i32 {
        0
    }

    /// Called once per tick with every relevant entity. Not called on ticks
    /// where no entity is relevant.
    fn update(
        &mut self,
        ctx: &mut SystemContext<'_>,
        entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()>;

    fn on_start(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// An entity this system is relevant to appeared (spawned, or gained a
    /// required capability).
    fn on_entity_added(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entity: &Entity,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// An entity this system was relevant to disappeared (despawned, or lost
    /// a required capability).
    fn on_entity_removed(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entity: &Entity,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Capability-presence check against [`System::requirements`].
    fn matches(&self, entity: &Entity) -> bool {
        entity.has_all(self.requirements())
    }
}

/// A structural mutation deferred until the end of the current tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Spawn(Entity),
    Despawn(EntityId),
    Insert(EntityId, Component),
    Remove(EntityId, ComponentKind),
}

/// Queue of deferred structural mutations.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entity for insertion. Returns its identifier.
    pub fn spawn(&mut self, entity: Entity) -> EntityId {
        let id = entity.id();
        self.commands.push(Command::Spawn(entity));
        id
    }

    pub fn despawn(&mut self, id: EntityId) {
        self.commands.push(Command::Despawn(id));
    }

    pub fn insert(&mut self, id: EntityId, component: impl Into<Component>) {
        self.commands.push(Command::Insert(id, component.into()));
    }

    pub fn remove(&mut self, id: EntityId, kind: ComponentKind) {
        self.commands.push(Command::Remove(id, kind));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Take every queued command, oldest first.
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

/// Per-hook context handed to a system.
pub struct SystemContext<'a> {
    name: &'a str,
    tick_id: u64,
    delta: Duration,
    bus: &'a mut EventBus,
    commands: &'a mut CommandQueue,
}

impl<'a> SystemContext<'a> {
    /// Build a context for the named system.
    #[must_use]
    pub fn new(
        name: &'a str,
        tick_id: u64,
        delta: Duration,
        bus: &'a mut EventBus,
        commands: &'a mut CommandQueue,
    ) -> Self {
        Self {
            name,
            tick_id,
            delta,
            bus,
            commands,
        }
    }

    /// The name the system was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The tick being processed (0 before the first tick).
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Wall-clock time elapsed since the previous tick.
    #[must_use]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    #[must_use]
    pub fn delta_secs(&self) -> f64 {
        self.delta.as_secs_f64()
    }

    /// Emit an event stamped with the current time and this system as source.
    pub fn emit(&mut self, kind: &str, payload: Value) -> usize {
        self.bus
            .emit(Event::new(kind, payload).with_source(self.name))
    }

    /// Subscribe to events of `kind`. Handler errors and panics are logged
    /// with this system's name and never reach the emitter. The subscription
    /// is dropped when the system is unregistered, reloaded, or shut down.
    pub fn subscribe<F>(&mut self, kind: &str, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        self.bus.subscribe_owned(self.name, kind, Box::new(handler))
    }

    /// Read-only access to the bus (history, subscriber counts).
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        self.bus
    }

    /// Deferred structural mutations, applied after the tick.
    pub fn commands(&mut self) -> &mut CommandQueue {
        self.commands
    }

    /// Turn any error into a [`GameError`] attributed to this system.
    #[must_use]
    pub fn wrap_error(&self, err: anyhow::Error, context: &str) -> GameError {
        wrap_error(self.name, context, err)
    }

    /// Run `f`, converting errors and panics into a [`GameError`].
    pub fn safe_execute<T>(
        &self,
        context: &str,
        f: impl FnOnce() -> anyhow::Result<T>,
    ) -> Result<T, GameError> {
        safe_execute(self.name, context, f)
    }

    /// Async form of [`SystemContext::safe_execute`].
    pub async fn safe_execute_async<T, F>(&self, context: &str, fut: F) -> Result<T, GameError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        safe_execute_async(self.name, context, fut).await
    }
}

impl std::fmt::Debug for SystemContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("name", &self.name)
            .field("tick_id", &self.tick_id)
            .field("delta", &self.delta)
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}

/// Classify `err` and tag it with `system` and `context`.
#[must_use]
pub fn wrap_error(system: &str, context: &str, err: anyhow::Error) -> GameError {
    GameError::classify(err)
        .with_system(system)
        .with_context(context)
}

/// Run `f`, returning a tagged [`GameError`] instead of propagating an error
/// or unwinding a panic.
pub fn safe_execute<T>(
    system: &str,
    context: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, GameError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(wrap_error(system, context, err)),
        Err(payload) => {
            let err = GameError::from_panic(payload)
                .with_system(system)
                .with_context(context);
            warn!(system, context, error = %err, "caught panic");
            Err(err)
        }
    }
}

/// Await `fut`, returning a tagged [`GameError`] instead of propagating an
/// error or unwinding a panic.
pub async fn safe_execute_async<T, F>(system: &str, context: &str, fut: F) -> Result<T, GameError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(wrap_error(system, context, err)),
        Err(payload) => {
            let err = GameError::from_panic(payload)
                .with_system(system)
                .with_context(context);
            warn!(system, context, error = %err, "caught panic");
            Err(err)
        }
    }
}
