//! System registry: tracks registered systems in execution order.
//!
//! Systems are kept sorted by ascending priority. Ties are broken by
//! registration order, so the registry position is the update order, the
//! start order, and (reversed) the stop order.

use serde::Serialize;

use realm_component::ComponentKind;

use crate::error::{CoreError, CoreResult};
use crate::system::System;

/// Lifecycle state of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// Registered, start hook not yet run.
    Registered,
    /// Started; receives updates every tick.
    Running,
    /// Start hook failed. Skipped by ticks until reloaded.
    Failed,
    /// Tripped the consecutive-failure threshold. Skipped until reloaded.
    Disabled,
    /// Stop hook has run (scheduler shut down).
    Stopped,
}

impl SystemState {
    /// Whether the system has been started and not yet stopped.
    #[must_use]
    pub fn is_started(self) -> bool {
        matches!(self, Self::Running | Self::Disabled)
    }
}

/// A registered system and its bookkeeping.
pub struct SystemEntry {
    pub(crate) name: String,
    pub(crate) priority: i32,
    pub(crate) state: SystemState,
    pub(crate) consecutive_failures: u32,
    pub(crate) system: Box<dyn System>,
}

impl SystemEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Snapshot of the entry for diagnostics.
    #[must_use]
    pub fn info(&self) -> SystemInfo {
        SystemInfo {
            name: self.name.clone(),
            priority: self.priority,
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            requirements: self.system.requirements().to_vec(),
        }
    }
}

impl std::fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

/// Information about a registered system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    /// The name the system was registered under.
    pub name: String,
    pub priority: i32,
    pub state: SystemState,
    /// Update failures since the last successful update.
    pub consecutive_failures: u32,
    /// Capabilities an entity must carry to reach the system's update.
    pub requirements: Vec<ComponentKind>,
}

/// Registry of all systems known to the scheduler, in execution order.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    systems: Vec<SystemEntry>,
}

impl SystemRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system under `name`.
    ///
    /// The system is placed after every system with a lower or equal
    /// priority. Returns its position in execution order.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateSystem`] if the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, system: Box<dyn System>) -> CoreResult<usize> {
        let name = name.into();
        if self.contains(&name) {
            return Err(CoreError::DuplicateSystem(name));
        }
        let priority = system.priority();
        let position = self
            .systems
            .iter()
            .position(|entry| entry.priority > priority)
            .unwrap_or(self.systems.len());
        self.systems.insert(
            position,
            SystemEntry {
                name,
                priority,
                state: SystemState::Registered,
                consecutive_failures: 0,
                system,
            },
        );
        Ok(position)
    }

    /// Remove a system by name, returning its entry.
    pub fn remove(&mut self, name: &str) -> Option<SystemEntry> {
        let position = self.position(name)?;
        Some(self.systems.remove(position))
    }

    /// Execution-order position of a system.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|entry| entry.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SystemEntry> {
        self.systems.iter().find(|entry| entry.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SystemEntry> {
        self.systems.iter_mut().find(|entry| entry.name == name)
    }

    pub(crate) fn entry_at_mut(&mut self, position: usize) -> Option<&mut SystemEntry> {
        self.systems.get_mut(position)
    }

    /// Returns an iterator over all systems in execution order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SystemEntry> {
        self.systems.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut SystemEntry> {
        self.systems.iter_mut()
    }

    /// System names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.systems.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Snapshots of every system in execution order.
    #[must_use]
    pub fn info(&self) -> Vec<SystemInfo> {
        self.systems.iter().map(SystemEntry::info).collect()
    }

    /// Returns the number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}
