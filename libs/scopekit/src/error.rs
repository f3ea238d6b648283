//! Error taxonomy shared by the scope tree, sessions and the window manager.

use std::fmt;

use thiserror::Error;

use crate::tag::{ScopeTag, TagMatcher};
use crate::window::WindowId;

/// A requested service, view-model or window type could not be produced.
///
/// Fatal to the operation that asked for it, never to the process.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("service '{type_name}' is not registered")]
    NotRegistered { type_name: &'static str },
    #[error("cannot resolve '{type_name}': scope '{scope}' has been disposed")]
    ScopeDisposed {
        type_name: &'static str,
        scope: String,
    },
    #[error("factory for '{type_name}' failed")]
    Factory {
        type_name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<&'static str> },
    #[error("instance registered for '{type_name}' has a different concrete type")]
    TypeMismatch { type_name: &'static str },
}

impl ResolutionError {
    pub fn is_not_registered(&self) -> bool {
        matches!(self, ResolutionError::NotRegistered { .. })
    }
}

/// An open/close/child operation on a window failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowOperationError {
    pub operation: &'static str,
    pub window_id: Option<WindowId>,
    pub message: String,
}

impl WindowOperationError {
    pub fn new(
        operation: &'static str,
        window_id: Option<WindowId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            window_id,
            message: message.into(),
        }
    }

    pub fn not_found(operation: &'static str, id: WindowId) -> Self {
        Self::new(operation, Some(id), format!("window {id} is not open"))
    }
}

impl fmt::Display for WindowOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window_id {
            Some(id) => write!(
                f,
                "{} failed for window {}: {}",
                self.operation, id, self.message
            ),
            None => write!(f, "{} failed: {}", self.operation, self.message),
        }
    }
}

impl std::error::Error for WindowOperationError {}

/// Errors raised while building or running a scoped session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(
        "service '{service}' is shared per '{required}' but session '{tag}' has no matching scope on its branch"
    )]
    UnmatchedTagScope {
        service: &'static str,
        required: TagMatcher,
        tag: ScopeTag,
    },
    #[error("session '{session}' is no longer active")]
    Inactive { session: String },
    #[error("session configuration callback failed")]
    Configure {
        #[source]
        source: anyhow::Error,
    },
    #[error("saving the unit of work failed")]
    Save {
        #[source]
        source: anyhow::Error,
    },
    /// The unit-of-work body failed and the session was rolled back.
    #[error("unit of work rolled back")]
    RolledBack {
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised by content navigation.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("initializing '{view_model}' failed")]
    Initialize {
        view_model: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
