//! Error types for the simulation core.
//!
//! Two layers:
//!
//! - [`CoreError`]: returned by bookkeeping and lifecycle operations
//!   (register, unregister, initialize, shutdown, reload, entity mutation).
//!   [`CoreError::kind`] exposes a machine-readable [`FailureKind`].
//! - [`GameError`]: a structured error raised by or on behalf of a system,
//!   always tagged with the system name and the call context once it has
//!   passed through the scheduler or a [`SystemContext`](crate::SystemContext).

use std::any::Any;

use serde::Serialize;

use realm_component::{ComponentKind, EntityId, MissingComponent};

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Machine-readable classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Referenced entity, system, or component does not exist.
    NotFound,
    /// System name or entity identifier already exists.
    Duplicate,
    /// Operation invalid in the current lifecycle state.
    Precondition,
    /// A system raised an error inside one of its hooks.
    SystemInternal,
    /// Several systems failed during one lifecycle transition.
    Aggregate,
}

/// The lifecycle phase a system was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Stop,
    Update,
    EntityAdded,
    EntityRemoved,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Update => "update",
            Self::EntityAdded => "entity_added",
            Self::EntityRemoved => "entity_removed",
        })
    }
}

/// Errors returned by core bookkeeping and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("system '{0}' not found")]
    SystemNotFound(String),

    #[error(transparent)]
    MissingComponent(#[from] MissingComponent),

    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    #[error("system '{0}' is already registered")]
    DuplicateSystem(String),

    #[error("scheduler is already initialized")]
    AlreadyInitialized,

    #[error("scheduler is not initialized")]
    NotInitialized,

    #[error("system '{system}' failed during {phase}: {source}")]
    SystemFailure {
        system: String,
        phase: Phase,
        #[source]
        source: GameError,
    },

    #[error("{} system(s) failed during {phase}", .failures.len())]
    Aggregate { phase: Phase, failures: Vec<GameError> },
}

impl CoreError {
    /// Machine-readable classification.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EntityNotFound(_) | Self::SystemNotFound(_) | Self::MissingComponent(_) => {
                FailureKind::NotFound
            }
            Self::DuplicateEntity(_) | Self::DuplicateSystem(_) => FailureKind::Duplicate,
            Self::AlreadyInitialized | Self::NotInitialized => FailureKind::Precondition,
            Self::SystemFailure { .. } => FailureKind::SystemInternal,
            Self::Aggregate { .. } => FailureKind::Aggregate,
        }
    }

    /// Names of the systems this error is about, if any.
    #[must_use]
    pub fn systems(&self) -> Vec<&str> {
        match self {
            Self::SystemNotFound(name) | Self::DuplicateSystem(name) => vec![name.as_str()],
            Self::SystemFailure { system, .. } => vec![system.as_str()],
            Self::Aggregate { failures, .. } => {
                failures.iter().filter_map(|f| f.system.as_deref()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Classification of a [`GameError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required component was absent.
    MissingComponent,
    /// A referenced entity or resource does not exist.
    NotFound,
    /// The caller supplied unusable input.
    InvalidInput,
    /// The operation is not valid in the current state.
    InvalidState,
    /// An ordinary error raised by system code.
    Internal,
    /// A panic whose payload carried no structured error.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MissingComponent => "missing component",
            Self::NotFound => "not found",
            Self::InvalidInput => "invalid input",
            Self::InvalidState => "invalid state",
            Self::Internal => "internal error",
            Self::Unknown => "unknown error",
        })
    }
}

/// A structured error raised by or on behalf of a system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameError {
    pub kind: ErrorKind,
    pub message: String,
    /// The system the error is attributed to.
    pub system: Option<String>,
    /// What the system was doing (hook name or caller-supplied label).
    pub context: Option<String>,
    pub entity: Option<EntityId>,
    pub component: Option<ComponentKind>,
}

impl GameError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            system: None,
            context: None,
            entity: None,
            component: None,
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Attach the entity the error concerns.
    #[must_use]
    pub fn for_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attribute the error to a system, unless already attributed.
    #[must_use]
    pub fn with_system(mut self, system: &str) -> Self {
        if self.system.is_none() {
            self.system = Some(system.to_string());
        }
        self
    }

    /// Record the call context, unless already recorded.
    #[must_use]
    pub fn with_context(mut self, context: &str) -> Self {
        if self.context.is_none() {
            self.context = Some(context.to_string());
        }
        self
    }

    /// Convert an arbitrary error into a [`GameError`].
    ///
    /// An error that already is a [`GameError`] (or a [`MissingComponent`])
    /// keeps its structure; anything else becomes [`ErrorKind::Internal`]
    /// with the full error chain as its message.
    #[must_use]
    pub fn classify(err: anyhow::Error) -> Self {
        let err = match err.downcast::<GameError>() {
            Ok(game) => return game,
            Err(err) => err,
        };
        match err.downcast::<MissingComponent>() {
            Ok(missing) => missing.into(),
            Err(err) => Self::new(ErrorKind::Internal, format!("{err:#}")),
        }
    }

    /// Convert a panic payload into a [`GameError`] of kind
    /// [`ErrorKind::Unknown`].
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::new(ErrorKind::Unknown, message)
    }
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(system) = &self.system {
            write!(f, "[{system}] ")?;
        }
        if let Some(context) = &self.context {
            write!(f, "{context}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GameError {}

impl From<MissingComponent> for GameError {
    fn from(missing: MissingComponent) -> Self {
        Self {
            kind: ErrorKind::MissingComponent,
            message: missing.to_string(),
            system: None,
            context: None,
            entity: Some(missing.entity),
            component: Some(missing.component),
        }
    }
}
