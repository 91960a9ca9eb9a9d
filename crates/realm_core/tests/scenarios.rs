//! End-to-end behaviour of the scheduler, store and bus working together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use realm_component::{Component, ComponentKind, Entity, EntityId, EntityMut, Query};
use realm_core::{
    CoreError, DuplicateEntityPolicy, FailureKind, Scheduler, SchedulerConfig, StopReason, System,
    SystemContext, SystemState, TickConfig, TickLoop, kinds,
};

type Calls = Arc<Mutex<Vec<(String, Vec<EntityId>)>>>;

fn tag(name: &str) -> Component {
    Component::custom(name, json!(null))
}

fn kind(name: &str) -> ComponentKind {
    ComponentKind::custom(name)
}

fn entity(tags: &[&str]) -> Entity {
    tags.iter().fold(Entity::new(), |e, name| e.with(tag(name)))
}

/// Records the entities each update receives.
struct Recorder {
    name: String,
    priority: i32,
    requires: Vec<ComponentKind>,
    calls: Calls,
    starts: Arc<Mutex<u32>>,
}

impl Recorder {
    fn new(name: &str, priority: i32, requires: &[&str], calls: &Calls) -> Self {
        Self {
            name: name.to_string(),
            priority,
            requires: requires.iter().map(|r| kind(r)).collect(),
            calls: Arc::clone(calls),
            starts: Arc::new(Mutex::new(0)),
        }
    }
}

impl System for Recorder {
    fn requirements(&self) -> &[ComponentKind] {
        &self.requires
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn on_start(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        *self.starts.lock().unwrap() += 1;
        Ok(())
    }

    fn update(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()> {
        let ids = entities.iter().map(EntityMut::id).collect();
        self.calls.lock().unwrap().push((self.name.clone(), ids));
        Ok(())
    }
}

struct AlwaysFails;

impl System for AlwaysFails {
    fn requirements(&self) -> &[ComponentKind] {
        &[]
    }

    fn update(
        &mut self,
        _ctx: &mut SystemContext<'_>,
        _entities: &mut [EntityMut<'_>],
    ) -> anyhow::Result<()> {
        anyhow::bail!("always fails")
    }
}

fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

fn invoked(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
}

#[test]
fn test_only_matching_system_is_updated() {
    for register_high_first in [true, false] {
        let calls = calls();
        let mut scheduler = Scheduler::default();
        let low = Recorder::new("p5", 5, &["a"], &calls);
        let high = Recorder::new("p10", 10, &["b"], &calls);
        if register_high_first {
            scheduler.register_system("p10", high).unwrap();
            scheduler.register_system("p5", low).unwrap();
        } else {
            scheduler.register_system("p5", low).unwrap();
            scheduler.register_system("p10", high).unwrap();
        }
        scheduler.initialize().unwrap();
        let id = scheduler.add_entity(entity(&["a"])).unwrap();

        let report = scheduler.tick(Duration::from_millis(16));

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded, vec![("p5".to_string(), vec![id])]);
        assert_eq!(report.skipped, vec!["p10"]);
    }
}

#[test]
fn test_query_with_without() {
    let mut scheduler = Scheduler::default();
    scheduler.add_entity(entity(&["loc", "combat", "inv"])).unwrap();
    scheduler.add_entity(entity(&["loc", "combat"])).unwrap();
    let third = scheduler.add_entity(entity(&["loc", "inv"])).unwrap();

    let query = Query::new().with(kind("loc")).without(kind("combat"));
    assert_eq!(scheduler.query(&query), vec![third]);
}

#[test]
fn test_throwing_system_does_not_stop_siblings() {
    let calls = calls();
    let mut scheduler = Scheduler::default();
    scheduler.register_system("broken", AlwaysFails).unwrap();
    scheduler
        .register_system("sibling", Recorder::new("sibling", 0, &[], &calls))
        .unwrap();
    scheduler.initialize().unwrap();
    scheduler.add_entity(entity(&["a"])).unwrap();

    let report = scheduler.tick(Duration::from_millis(16));

    assert_eq!(report.failures.len(), 1);
    assert_eq!(invoked(&calls), vec!["sibling"]);
    let errors: Vec<_> = scheduler.bus().history_of(kinds::SYSTEM_ERROR).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["system"], "broken");
    assert_eq!(scheduler.system_state("broken"), Some(SystemState::Running));
}

#[tokio::test(start_paused = true)]
async fn test_tick_loop_survives_throwing_system() {
    let calls = calls();
    let mut scheduler = Scheduler::default();
    scheduler.register_system("broken", AlwaysFails).unwrap();
    scheduler
        .register_system("sibling", Recorder::new("sibling", 0, &[], &calls))
        .unwrap();
    scheduler.add_entity(entity(&["a"])).unwrap();

    let mut tick_loop = TickLoop::new(TickConfig {
        tick_rate: 20.0,
        max_ticks: 4,
        ..TickConfig::default()
    })
    .unwrap();
    let summary = tick_loop.run(&mut scheduler).await;

    assert_eq!(summary.reason, StopReason::MaxTicks);
    assert_eq!(summary.ticks, 4);
    assert_eq!(summary.failures, 4);
    assert!(scheduler.is_initialized());
    assert_eq!(invoked(&calls).len(), 4);
    assert_eq!(scheduler.bus().history_of(kinds::SYSTEM_ERROR).count(), 4);
    assert_eq!(scheduler.system_state("broken"), Some(SystemState::Running));
}

#[test]
fn test_double_initialize() {
    let calls = calls();
    let recorder = Recorder::new("a", 0, &[], &calls);
    let starts = Arc::clone(&recorder.starts);
    let mut scheduler = Scheduler::default();
    scheduler.register_system("a", recorder).unwrap();

    assert!(scheduler.initialize().is_ok());
    let err = scheduler.initialize().unwrap_err();
    assert!(matches!(err, CoreError::AlreadyInitialized));
    assert_eq!(err.kind(), FailureKind::Precondition);
    assert_eq!(*starts.lock().unwrap(), 1);
    assert_eq!(scheduler.system_state("a"), Some(SystemState::Running));
}

#[test]
fn test_structural_changes_wait_for_end_of_tick() {
    /// Despawns everything it sees and records what it saw.
    struct Despawner {
        requires: Vec<ComponentKind>,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl System for Despawner {
        fn requirements(&self) -> &[ComponentKind] {
            &self.requires
        }

        fn update(
            &mut self,
            ctx: &mut SystemContext<'_>,
            entities: &mut [EntityMut<'_>],
        ) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(entities.len());
            for entity in entities.iter() {
                ctx.commands().despawn(entity.id());
            }
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::default();
    for name in ["first", "second"] {
        scheduler
            .register_system(
                name,
                Despawner {
                    requires: vec![kind("loc")],
                    seen: Arc::clone(&seen),
                },
            )
            .unwrap();
    }
    scheduler.initialize().unwrap();
    for _ in 0..3 {
        scheduler.add_entity(entity(&["loc"])).unwrap();
    }

    let report = scheduler.tick(Duration::ZERO);

    // Both systems saw the full snapshot; nothing was removed mid-tick.
    assert_eq!(*seen.lock().unwrap(), vec![3, 3]);
    assert_eq!(report.commands_applied, 6);
    assert_eq!(scheduler.entity_count(), 0);
    assert_eq!(scheduler.bus().history_of(kinds::ENTITY_REMOVED).count(), 3);
    scheduler.store().check_consistency().unwrap();
}

#[test]
fn test_removed_entity_leaves_no_trace() {
    let mut scheduler = Scheduler::default();
    let id = scheduler.add_entity(entity(&["loc", "combat"])).unwrap();

    assert!(scheduler.remove_entity(id));
    assert!(!scheduler.remove_entity(id));
    assert!(scheduler.get_entity(id).is_none());
    for name in ["loc", "combat"] {
        assert_eq!(scheduler.entities_with_component(&kind(name)).count(), 0);
    }
    scheduler.store().check_consistency().unwrap();
}

#[test]
fn test_index_tracks_every_mutation() {
    let mut scheduler = Scheduler::default();
    let a = scheduler.add_entity(entity(&["loc"])).unwrap();
    let b = scheduler.add_entity(entity(&["loc", "combat"])).unwrap();
    scheduler.store().check_consistency().unwrap();

    scheduler.insert_component(a, tag("combat")).unwrap();
    scheduler.store().check_consistency().unwrap();
    scheduler.remove_component(b, &kind("loc")).unwrap();
    scheduler.store().check_consistency().unwrap();
    scheduler.remove_entity(a);
    scheduler.store().check_consistency().unwrap();

    let with_combat: Vec<_> = scheduler.entities_with_component(&kind("combat")).collect();
    assert_eq!(with_combat, vec![b]);
    assert_eq!(scheduler.entities_with_component(&kind("loc")).count(), 0);
}

#[test]
fn test_update_order_follows_priority_and_shutdown_reverses_it() {
    /// Appends its name to a shared log on every hook.
    struct Ordered {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl System for Ordered {
        fn requirements(&self) -> &[ComponentKind] {
            &[]
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn on_start(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        fn on_stop(&mut self, _ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }

        fn update(
            &mut self,
            _ctx: &mut SystemContext<'_>,
            _entities: &mut [EntityMut<'_>],
        ) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("update {}", self.name));
            Ok(())
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::default();
    for (name, priority) in [("c", 3), ("a", 1), ("b", 2), ("a2", 1)] {
        scheduler
            .register_system(
                name,
                Ordered {
                    name,
                    priority,
                    log: Arc::clone(&log),
                },
            )
            .unwrap();
    }
    scheduler.initialize().unwrap();
    scheduler.add_entity(Entity::new()).unwrap();
    scheduler.tick(Duration::ZERO);
    scheduler.shutdown().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start a", "start a2", "start b", "start c",
            "update a", "update a2", "update b", "update c",
            "stop c", "stop b", "stop a2", "stop a",
        ]
    );
}

#[test]
fn test_unregister_unknown_leaves_others_alone() {
    let calls = calls();
    let mut scheduler = Scheduler::default();
    scheduler
        .register_system("a", Recorder::new("a", 0, &[], &calls))
        .unwrap();
    scheduler.initialize().unwrap();

    let err = scheduler.unregister_system("ghost").unwrap_err();
    assert!(matches!(err, CoreError::SystemNotFound(ref name) if name == "ghost"));
    assert_eq!(scheduler.registry().names(), vec!["a"]);
    assert_eq!(scheduler.system_state("a"), Some(SystemState::Running));
}

#[test]
fn test_duplicate_entity_policies() {
    let original = entity(&["loc"]);
    let id = original.id();
    let replacement = Entity::with_id(id).with(tag("combat"));

    let mut rejecting = Scheduler::default();
    rejecting.add_entity(original.clone()).unwrap();
    let err = rejecting.add_entity(replacement.clone()).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateEntity(dup) if dup == id));
    assert!(rejecting.get_entity(id).unwrap().has(&kind("loc")));

    let config = SchedulerConfig::default().with_duplicate_entities(DuplicateEntityPolicy::Replace);
    let mut replacing = Scheduler::new(config);
    replacing.add_entity(original).unwrap();
    replacing.add_entity(replacement).unwrap();
    let stored = replacing.get_entity(id).unwrap();
    assert!(stored.has(&kind("combat")));
    assert!(!stored.has(&kind("loc")));
    assert_eq!(replacing.entity_count(), 1);
    replacing.store().check_consistency().unwrap();
}

#[test]
fn test_external_subscriber_sees_lifecycle_events() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut scheduler = Scheduler::default();
    scheduler.bus_mut().subscribe(kinds::WILDCARD, move |event| {
        sink.lock().unwrap().push(event.kind.clone());
        Ok(())
    });

    let id = scheduler.add_entity(entity(&["loc"])).unwrap();
    scheduler.remove_entity(id);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![kinds::ENTITY_ADDED, kinds::ENTITY_REMOVED]
    );
}
