//! Scope manager - process-wide entry point into the session tree

use std::sync::Arc;

use dashmap::DashMap;

use crate::builder::SessionBuilder;
use crate::config::ScopeKitConfig;
use crate::container::{Container, ScopeHandle};
use crate::error::SessionError;
use crate::session::{ScopeSession, SessionId, SessionRegistry};
use crate::tag::ScopeTag;
use crate::window::{WindowFactory, WindowManager};

struct ManagerInner {
    container: Container,
    windows: Arc<WindowManager>,
    sessions: SessionRegistry,
    config: ScopeKitConfig,
}

/// Creates root sessions and keeps track of every live session.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ScopeManager {
    inner: Arc<ManagerInner>,
}

impl ScopeManager {
    pub fn new(
        container: Container,
        window_factory: Arc<dyn WindowFactory>,
        config: ScopeKitConfig,
    ) -> Self {
        let windows = WindowManager::new(container.root(), window_factory, config.clone());
        tracing::debug!(
            services = container.registered_count(),
            auto_save = config.default_auto_save,
            "Scope manager created"
        );
        Self {
            inner: Arc::new(ManagerInner {
                container,
                windows,
                sessions: Arc::new(DashMap::new()),
                config,
            }),
        }
    }

    /// Create a session directly under the root scope.
    pub fn create_session(&self, tag: ScopeTag) -> Result<ScopeSession, SessionError> {
        self.session(tag).build()
    }

    /// Begin the definition of a root-level session.
    pub fn session(&self, tag: ScopeTag) -> SessionBuilder {
        SessionBuilder::root(
            self.inner.container.root(),
            self.inner.windows.clone(),
            self.inner.sessions.clone(),
            tag,
            self.inner.config.default_auto_save,
        )
    }

    pub fn database_session(&self) -> SessionBuilder {
        self.session(ScopeTag::database())
    }

    pub fn workflow_session(&self, name: impl Into<String>) -> SessionBuilder {
        self.session(ScopeTag::workflow(name))
    }

    pub fn get_session(&self, id: SessionId) -> Option<ScopeSession> {
        let inner = self.inner.sessions.get(&id)?.upgrade()?;
        let session = ScopeSession::from_inner(inner);
        session.is_active().then_some(session)
    }

    pub fn active_sessions(&self) -> Vec<ScopeSession> {
        let live: Vec<ScopeSession> = self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(ScopeSession::from_inner)
            .collect();
        live.into_iter().filter(|s| s.is_active()).collect()
    }

    /// Close the session `id` and its subtree. Returns `false` if it was not
    /// active, so a second call is harmless.
    pub fn close_session(&self, id: SessionId) -> bool {
        match self.get_session(id) {
            Some(session) => {
                session.close();
                true
            }
            None => {
                tracing::debug!(session_id = %id, "close_session: session not active");
                false
            }
        }
    }

    /// Close every session, then any window still open.
    pub fn close_all(&self) {
        let roots: Vec<ScopeSession> = self
            .active_sessions()
            .into_iter()
            .filter(|s| s.parent().is_none())
            .collect();
        for session in roots {
            session.close();
        }
        for session in self.active_sessions() {
            session.close();
        }
        self.inner.windows.close_all_windows();
        self.inner.sessions.retain(|_, s| s.strong_count() > 0);
        tracing::info!("All sessions closed");
    }

    pub fn window_manager(&self) -> &Arc<WindowManager> {
        &self.inner.windows
    }

    pub fn root_scope(&self) -> ScopeHandle {
        self.inner.container.root()
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn config(&self) -> &ScopeKitConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeManager")
            .field("sessions", &self.inner.sessions.len())
            .field("windows", &self.inner.windows.window_count())
            .finish()
    }
}
