//! The scheduler: owns the entity store, the system registry and the event
//! bus, and drives system lifecycles and ticks.
//!
//! Each tick follows a fixed sequence:
//!
//! 1. Advance the tick counter.
//! 2. For every running system in priority order, snapshot the entities it
//!    is relevant to and call its update (systems with no relevant entities
//!    are skipped).
//! 3. Apply the structural changes (spawn, despawn, attach, detach) that
//!    systems queued during the tick.
//!
//! A failing system is logged, reported as a `system:error` event and
//! otherwise ignored; siblings still run.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, info_span, warn};

use realm_component::{Component, ComponentData, ComponentKind, Entity, EntityId, Query};

use crate::config::{DuplicateEntityPolicy, SchedulerConfig};
use crate::error::{CoreError, CoreResult, GameError, Phase};
use crate::event::{EventBus, kinds};
use crate::registry::{SystemEntry, SystemInfo, SystemRegistry, SystemState};
use crate::store::EntityStore;
use crate::system::{Command, CommandQueue, System, SystemContext};

/// Source recorded on events the scheduler emits itself.
pub const SCHEDULER_SOURCE: &str = "scheduler";

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick_id: u64,
    pub delta: Duration,
    /// Systems whose update ran, in execution order (including failures).
    pub updated: Vec<String>,
    /// Running systems skipped because no entity was relevant to them.
    pub skipped: Vec<String>,
    pub failures: Vec<GameError>,
    /// Deferred structural changes applied at the end of the tick.
    pub commands_applied: usize,
}

impl TickReport {
    /// No system failed this tick.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Single-threaded simulation core.
///
/// Every mutation takes `&mut self`; the scheduler performs no locking of its
/// own. A multi-threaded host must serialize access itself (for example by
/// funnelling requests through a channel to the task that owns the
/// scheduler).
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    store: EntityStore,
    registry: SystemRegistry,
    bus: EventBus,
    commands: CommandQueue,
    initialized: bool,
    tick_id: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler with an empty world and no systems.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let bus = EventBus::new(config.event_history);
        Self {
            config,
            store: EntityStore::new(),
            registry: SystemRegistry::new(),
            bus,
            commands: CommandQueue::new(),
            initialized: false,
            tick_id: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether [`Scheduler::initialize`] has run (and shutdown has not).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Read-only access to the entity store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Mutable bus access for external subscribers (the transport layer).
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    #[must_use]
    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    /// Structural changes queued for the end of the current tick.
    pub fn commands(&mut self) -> &mut CommandQueue {
        &mut self.commands
    }

    // -- entities ---------------------------------------------------------

    /// Add an entity, index it, emit `entity:added` and notify every system
    /// it is relevant to.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateEntity`] when the identifier is already stored
    /// and the policy is [`DuplicateEntityPolicy::Reject`].
    pub fn add_entity(&mut self, entity: Entity) -> CoreResult<EntityId> {
        let id = entity.id();
        if self.store.contains(id) {
            match self.config.duplicate_entities {
                DuplicateEntityPolicy::Reject => return Err(CoreError::DuplicateEntity(id)),
                DuplicateEntityPolicy::Replace => {
                    debug!(entity = %id, "replacing entity with duplicate id");
                    self.remove_entity(id);
                }
            }
        }

        let components: Vec<&str> = entity.kinds().map(ComponentKind::name).collect();
        let payload = json!({ "entity": id, "components": components });
        self.store.insert(entity)?;
        self.bus.publish(kinds::ENTITY_ADDED, payload, SCHEDULER_SOURCE);
        debug!(entity = %id, "entity added");

        let Self {
            store,
            registry,
            bus,
            commands,
            tick_id,
            ..
        } = self;
        if let Some(entity) = store.get(id) {
            for entry in registry.iter_mut() {
                if receives_hooks(entry) && entry.system.matches(entity) {
                    run_hook(entry, bus, commands, *tick_id, Phase::EntityAdded, |system, ctx| {
                        system.on_entity_added(ctx, entity)
                    });
                }
            }
        }
        Ok(id)
    }

    /// Remove an entity, emit `entity:removed` and notify every system it was
    /// relevant to. Returns `false` if no such entity exists.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.store.remove(id) else {
            return false;
        };
        self.bus.publish(
            kinds::ENTITY_REMOVED,
            json!({ "entity": id }),
            SCHEDULER_SOURCE,
        );
        debug!(entity = %id, "entity removed");

        let Self {
            registry,
            bus,
            commands,
            tick_id,
            ..
        } = self;
        for entry in registry.iter_mut() {
            if receives_hooks(entry) && entry.system.matches(&entity) {
                run_hook(entry, bus, commands, *tick_id, Phase::EntityRemoved, |system, ctx| {
                    system.on_entity_removed(ctx, &entity)
                });
            }
        }
        true
    }

    /// Attach a component to a stored entity and emit `component:added`.
    ///
    /// Systems the entity becomes relevant to get their entity-added hook.
    ///
    /// # Errors
    ///
    /// [`CoreError::EntityNotFound`] if no such entity is stored.
    pub fn insert_component(
        &mut self,
        id: EntityId,
        component: impl Into<Component>,
    ) -> CoreResult<Option<Component>> {
        let component = component.into();
        let kind = component.kind();
        let before = self.relevance(id);
        let previous = self.store.insert_component(id, component)?;
        self.bus.publish(
            kinds::COMPONENT_ADDED,
            json!({ "entity": id, "component": kind.name() }),
            SCHEDULER_SOURCE,
        );
        self.notify_relevance_changes(id, &before);
        Ok(previous)
    }

    /// Detach a component from a stored entity. Emits `component:removed`
    /// when something was detached.
    ///
    /// Systems the entity stops being relevant to get their entity-removed
    /// hook.
    ///
    /// # Errors
    ///
    /// [`CoreError::EntityNotFound`] if no such entity is stored.
    pub fn remove_component(
        &mut self,
        id: EntityId,
        kind: &ComponentKind,
    ) -> CoreResult<Option<Component>> {
        let before = self.relevance(id);
        let removed = self.store.remove_component(id, kind)?;
        if removed.is_some() {
            self.bus.publish(
                kinds::COMPONENT_REMOVED,
                json!({ "entity": id, "component": kind.name() }),
                SCHEDULER_SOURCE,
            );
            self.notify_relevance_changes(id, &before);
        }
        Ok(removed)
    }

    /// Which systems (by registry position) the entity is relevant to.
    fn relevance(&self, id: EntityId) -> Vec<bool> {
        match self.store.get(id) {
            Some(entity) => self
                .registry
                .iter()
                .map(|entry| entry.system.matches(entity))
                .collect(),
            None => vec![false; self.registry.len()],
        }
    }

    fn notify_relevance_changes(&mut self, id: EntityId, before: &[bool]) {
        let Self {
            store,
            registry,
            bus,
            commands,
            tick_id,
            ..
        } = self;
        let Some(entity) = store.get(id) else {
            return;
        };
        for (entry, &was) in registry.iter_mut().zip(before) {
            if !receives_hooks(entry) {
                continue;
            }
            let now = entry.system.matches(entity);
            if now && !was {
                run_hook(entry, bus, commands, *tick_id, Phase::EntityAdded, |system, ctx| {
                    system.on_entity_added(ctx, entity)
                });
            } else if was && !now {
                run_hook(entry, bus, commands, *tick_id, Phase::EntityRemoved, |system, ctx| {
                    system.on_entity_removed(ctx, entity)
                });
            }
        }
    }

    #[must_use]
    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    /// Returns an iterator over all entities.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.iter()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    /// Identifiers of entities carrying `kind`.
    pub fn entities_with_component(
        &self,
        kind: &ComponentKind,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.store.entities_with_component(kind)
    }

    /// Snapshot of the entities matching `query`.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<EntityId> {
        self.store.query(query)
    }

    #[must_use]
    pub fn component<T: ComponentData>(&self, id: EntityId) -> Option<&T> {
        self.store.component::<T>(id)
    }

    /// In-place payload mutation from outside a tick (e.g. the transport
    /// layer applying a player command).
    pub fn component_mut<T: ComponentData>(&mut self, id: EntityId) -> Option<&mut T> {
        self.store.component_mut::<T>(id)
    }

    // -- systems ----------------------------------------------------------

    /// Register a system under `name`.
    ///
    /// If the scheduler is already initialized, the system's start hook runs
    /// immediately. Otherwise it runs at the next [`Scheduler::initialize`].
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateSystem`] if the name is taken.
    /// - [`CoreError::SystemFailure`] if the immediate start hook fails; the
    ///   system stays registered in [`SystemState::Failed`].
    pub fn register_system(
        &mut self,
        name: impl Into<String>,
        system: impl System + 'static,
    ) -> CoreResult<()> {
        let name = name.into();
        let priority = system.priority();
        let position = self.registry.insert(name.clone(), Box::new(system))?;
        info!(system = %name, priority, position, "registered system");
        self.bus.publish(
            kinds::SYSTEM_REGISTERED,
            json!({ "system": name, "priority": priority }),
            SCHEDULER_SOURCE,
        );

        if self.initialized {
            self.start_at(position)
                .map_err(|source| CoreError::SystemFailure {
                    system: name,
                    phase: Phase::Start,
                    source,
                })?;
        }
        Ok(())
    }

    /// Stop (if started) and remove a system, dropping its event
    /// subscriptions.
    ///
    /// The system is removed even when its stop hook fails.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SystemNotFound`] for unknown names; nothing changes.
    /// - [`CoreError::SystemFailure`] if the stop hook failed.
    pub fn unregister_system(&mut self, name: &str) -> CoreResult<()> {
        let position = self
            .registry
            .position(name)
            .ok_or_else(|| CoreError::SystemNotFound(name.to_string()))?;

        let stopped = self.stop_at(position);
        self.registry.remove(name);
        let dropped = self.bus.unsubscribe_owner(name);
        info!(system = name, subscriptions = dropped, "unregistered system");
        self.bus.publish(
            kinds::SYSTEM_UNREGISTERED,
            json!({ "system": name }),
            SCHEDULER_SOURCE,
        );

        stopped.map_err(|source| CoreError::SystemFailure {
            system: name.to_string(),
            phase: Phase::Stop,
            source,
        })
    }

    /// Run every pending start hook in ascending priority order.
    ///
    /// All systems get their turn even if some fail. The scheduler counts as
    /// initialized afterwards either way, so [`Scheduler::shutdown`] can stop
    /// the systems that did start.
    ///
    /// # Errors
    ///
    /// - [`CoreError::AlreadyInitialized`] on a second call; no hook runs.
    /// - [`CoreError::Aggregate`] listing every failed start hook.
    pub fn initialize(&mut self) -> CoreResult<()> {
        if self.initialized {
            return Err(CoreError::AlreadyInitialized);
        }
        self.initialized = true;
        info!(systems = self.registry.len(), "initializing scheduler");

        let mut failures = Vec::new();
        for position in 0..self.registry.len() {
            let pending = self
                .registry
                .iter()
                .nth(position)
                .is_some_and(|entry| !entry.state.is_started());
            if pending && let Err(err) = self.start_at(position) {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Aggregate {
                phase: Phase::Start,
                failures,
            })
        }
    }

    /// Run every stop hook in descending priority order, then drop all event
    /// subscriptions and pending structural changes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotInitialized`] if the scheduler is not initialized.
    /// - [`CoreError::Aggregate`] listing every failed stop hook.
    pub fn shutdown(&mut self) -> CoreResult<()> {
        if !self.initialized {
            return Err(CoreError::NotInitialized);
        }
        info!(systems = self.registry.len(), "shutting down scheduler");

        let mut failures = Vec::new();
        for position in (0..self.registry.len()).rev() {
            if let Err(err) = self.stop_at(position) {
                failures.push(err);
            }
        }

        self.bus.clear_subscriptions();
        self.commands.clear();
        self.initialized = false;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Aggregate {
                phase: Phase::Stop,
                failures,
            })
        }
    }

    /// Stop and restart one system in place.
    ///
    /// Resets its failure counter and re-enables it if the circuit breaker
    /// had disabled it. Before initialization the system just returns to
    /// [`SystemState::Registered`].
    ///
    /// # Errors
    ///
    /// - [`CoreError::SystemNotFound`] for unknown names.
    /// - [`CoreError::SystemFailure`] with [`Phase::Start`] if the restart
    ///   failed, or with [`Phase::Stop`] if only the stop hook failed.
    pub fn reload_system(&mut self, name: &str) -> CoreResult<()> {
        let position = self
            .registry
            .position(name)
            .ok_or_else(|| CoreError::SystemNotFound(name.to_string()))?;
        info!(system = name, "reloading system");

        let stopped = self.stop_at(position);
        self.bus.unsubscribe_owner(name);
        if let Some(entry) = self.registry.entry_at_mut(position) {
            entry.consecutive_failures = 0;
            entry.state = SystemState::Registered;
        }

        let failure = |phase: Phase, source: GameError| CoreError::SystemFailure {
            system: name.to_string(),
            phase,
            source,
        };
        if self.initialized {
            self.start_at(position)
                .map_err(|source| failure(Phase::Start, source))?;
        }
        stopped.map_err(|source| failure(Phase::Stop, source))
    }

    /// Lifecycle state of a system.
    #[must_use]
    pub fn system_state(&self, name: &str) -> Option<SystemState> {
        self.registry.get(name).map(SystemEntry::state)
    }

    /// Snapshots of every registered system in execution order.
    #[must_use]
    pub fn systems(&self) -> Vec<SystemInfo> {
        self.registry.info()
    }

    fn start_at(&mut self, position: usize) -> Result<(), GameError> {
        let Self {
            registry,
            bus,
            commands,
            tick_id,
            ..
        } = self;
        let Some(entry) = registry.entry_at_mut(position) else {
            return Ok(());
        };
        match invoke(entry, bus, commands, *tick_id, Duration::ZERO, Phase::Start, |system, ctx| {
            system.on_start(ctx)
        }) {
            Ok(()) => {
                entry.state = SystemState::Running;
                entry.consecutive_failures = 0;
                debug!(system = %entry.name, "system started");
                Ok(())
            }
            Err(err) => {
                entry.state = SystemState::Failed;
                report_failure(bus, &err);
                Err(err)
            }
        }
    }

    /// Run the stop hook of a started system. Systems that never started are
    /// left alone.
    fn stop_at(&mut self, position: usize) -> Result<(), GameError> {
        let Self {
            registry,
            bus,
            commands,
            tick_id,
            ..
        } = self;
        let Some(entry) = registry.entry_at_mut(position) else {
            return Ok(());
        };
        if !entry.state.is_started() {
            return Ok(());
        }
        let outcome = invoke(entry, bus, commands, *tick_id, Duration::ZERO, Phase::Stop, |system, ctx| {
            system.on_stop(ctx)
        });
        entry.state = SystemState::Stopped;
        if let Err(err) = &outcome {
            report_failure(bus, err);
        }
        outcome
    }

    // -- ticks ------------------------------------------------------------

    /// Run one pass over every running system, then apply deferred
    /// structural changes.
    ///
    /// System failures are reported in the returned [`TickReport`] and as
    /// `system:error` events; they never abort the tick.
    pub fn tick(&mut self, delta: Duration) -> TickReport {
        self.tick_id += 1;
        let tick_id = self.tick_id;
        let mut report = TickReport {
            tick_id,
            delta,
            updated: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            commands_applied: 0,
        };

        {
            let Self {
                config,
                store,
                registry,
                bus,
                commands,
                ..
            } = self;
            debug!(tick_id, systems = registry.len(), "tick start");

            for entry in registry.iter_mut() {
                if entry.state != SystemState::Running {
                    continue;
                }
                let mut views = store.matching_mut(|entity| entry.system.matches(entity));
                if views.is_empty() {
                    report.skipped.push(entry.name.clone());
                    continue;
                }
                let outcome = invoke(entry, bus, commands, tick_id, delta, Phase::Update, |system, ctx| {
                    system.update(ctx, &mut views)
                });
                drop(views);
                report.updated.push(entry.name.clone());

                match outcome {
                    Ok(()) => entry.consecutive_failures = 0,
                    Err(err) => {
                        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                        report_failure(bus, &err);
                        if let Some(threshold) = config.breaker_threshold()
                            && entry.consecutive_failures >= threshold
                        {
                            entry.state = SystemState::Disabled;
                            warn!(
                                system = %entry.name,
                                failures = entry.consecutive_failures,
                                "system disabled after repeated failures"
                            );
                            bus.publish(
                                kinds::SYSTEM_DISABLED,
                                json!({
                                    "system": entry.name,
                                    "consecutive_failures": entry.consecutive_failures,
                                }),
                                SCHEDULER_SOURCE,
                            );
                        }
                        report.failures.push(err);
                    }
                }
            }
        }

        report.commands_applied = self.apply_commands();
        debug!(
            tick_id,
            updated = report.updated.len(),
            failures = report.failures.len(),
            commands = report.commands_applied,
            "tick complete"
        );
        report
    }

    /// Apply every queued structural change, oldest first. Returns how many
    /// were applied. Changes queued by hooks while applying wait for the next
    /// call.
    pub fn apply_commands(&mut self) -> usize {
        let queued = self.commands.take();
        let count = queued.len();
        for command in queued {
            let outcome = match command {
                Command::Spawn(entity) => self.add_entity(entity).map(|_| ()),
                Command::Despawn(id) => {
                    self.remove_entity(id);
                    Ok(())
                }
                Command::Insert(id, component) => self.insert_component(id, component).map(|_| ()),
                Command::Remove(id, kind) => self.remove_component(id, &kind).map(|_| ()),
            };
            if let Err(err) = outcome {
                warn!(error = %err, "deferred command failed");
            }
        }
        count
    }
}

/// Entity hooks are delivered to systems that are registered or running.
fn receives_hooks(entry: &SystemEntry) -> bool {
    matches!(entry.state, SystemState::Registered | SystemState::Running)
}

/// Run one system hook inside a `system` span, converting errors and panics
/// into a [`GameError`] tagged with the system and phase.
fn invoke<R>(
    entry: &mut SystemEntry,
    bus: &mut EventBus,
    commands: &mut CommandQueue,
    tick_id: u64,
    delta: Duration,
    phase: Phase,
    hook: impl FnOnce(&mut dyn System, &mut SystemContext<'_>) -> anyhow::Result<R>,
) -> Result<R, GameError> {
    let span = info_span!("system", system = %entry.name, %phase);
    let _guard = span.enter();

    let name = entry.name.as_str();
    let system = entry.system.as_mut();
    let mut ctx = SystemContext::new(name, tick_id, delta, bus, commands);
    let phase_name = phase.to_string();
    match panic::catch_unwind(AssertUnwindSafe(|| hook(system, &mut ctx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(GameError::classify(err)
            .with_system(name)
            .with_context(&phase_name)),
        Err(payload) => Err(GameError::from_panic(payload)
            .with_system(name)
            .with_context(&phase_name)),
    }
}

/// Entity hooks have no caller to return to; failures are only reported.
fn run_hook(
    entry: &mut SystemEntry,
    bus: &mut EventBus,
    commands: &mut CommandQueue,
    tick_id: u64,
    phase: Phase,
    hook: impl FnOnce(&mut dyn System, &mut SystemContext<'_>) -> anyhow::Result<()>,
) {
    if let Err(err) = invoke(entry, bus, commands, tick_id, Duration::ZERO, phase, hook) {
        report_failure(bus, &err);
    }
}

fn report_failure(bus: &mut EventBus, err: &GameError) {
    error!(
        system = err.system.as_deref().unwrap_or("unknown"),
        context = err.context.as_deref().unwrap_or(""),
        error = %err,
        "system failed"
    );
    let payload = serde_json::to_value(err).unwrap_or(Value::Null);
    bus.publish(kinds::SYSTEM_ERROR, payload, SCHEDULER_SOURCE);
}
