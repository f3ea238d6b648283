//! Scope sessions - live nodes of the session tree
//!
//! A [`ScopeSession`] owns exactly one container scope and tracks the windows
//! and child sessions created within it. Closing a session tears its subtree
//! down bottom-up: child sessions first, then its own windows, dispose hooks,
//! the unit of work, and finally the scope.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::builder::SessionBuilder;
use crate::container::ScopeHandle;
use crate::error::{ResolutionError, SessionError, WindowOperationError};
use crate::event::{Event, Subscription};
use crate::tag::ScopeTag;
use crate::window::{ViewModel, WindowId, WindowManager};

/// Unique identifier of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Transactional resource a session may wrap.
///
/// Registered in the container as [`SharedUnitOfWork`]; sessions pick it up
/// from their own scope when they are built.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn save_changes(&self) -> anyhow::Result<()>;

    async fn save_changes_async(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("save cancelled");
        }
        self.save_changes()
    }

    fn rollback(&self);

    async fn dispose_async(&self) {}
}

pub type SharedUnitOfWork = Arc<dyn UnitOfWork>;

/// Payload of a session's `Closed` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClosed {
    pub id: SessionId,
    pub tag: ScopeTag,
}

/// Sessions known to a manager, by id.
pub(crate) type SessionRegistry = Arc<DashMap<SessionId, Weak<SessionInner>>>;

pub(crate) type DisposeHook = Box<dyn FnOnce() + Send>;

struct SessionState {
    active: bool,
    window_ids: Vec<WindowId>,
    children: Vec<Weak<SessionInner>>,
    on_dispose: Vec<DisposeHook>,
    window_subscription: Option<Subscription>,
}

pub(crate) struct SessionInner {
    id: SessionId,
    tag: ScopeTag,
    scope: ScopeHandle,
    parent: Option<ScopeSession>,
    windows: Arc<WindowManager>,
    registry: Option<SessionRegistry>,
    unit_of_work: Option<SharedUnitOfWork>,
    auto_save: bool,
    auto_close_when_empty: bool,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    closed: Event<SessionClosed>,
}

/// Everything a builder hands over to create a session.
pub(crate) struct SessionParts {
    pub(crate) tag: ScopeTag,
    pub(crate) scope: ScopeHandle,
    pub(crate) parent: Option<ScopeSession>,
    pub(crate) windows: Arc<WindowManager>,
    pub(crate) registry: Option<SessionRegistry>,
    pub(crate) unit_of_work: Option<SharedUnitOfWork>,
    pub(crate) auto_save: bool,
    pub(crate) auto_close_when_empty: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) on_dispose: Vec<DisposeHook>,
}

/// Torn-down pieces collected under the lock and released outside it.
struct Teardown {
    window_ids: Vec<WindowId>,
    hooks: Vec<DisposeHook>,
}

/// A live node of the session tree. Cheap to clone.
#[derive(Clone)]
pub struct ScopeSession {
    inner: Arc<SessionInner>,
}

impl ScopeSession {
    pub(crate) fn new(parts: SessionParts) -> Self {
        let SessionParts {
            tag,
            scope,
            parent,
            windows,
            registry,
            unit_of_work,
            auto_save,
            auto_close_when_empty,
            cancel,
            on_dispose,
        } = parts;

        let inner = Arc::new_cyclic(|me: &Weak<SessionInner>| {
            let me = me.clone();
            let subscription = windows.subscribe_window_closed(move |closed| {
                if let Some(inner) = me.upgrade() {
                    ScopeSession { inner }.on_window_closed(closed.id);
                }
            });
            SessionInner {
                id: SessionId::new(),
                tag,
                scope,
                parent,
                windows,
                registry,
                unit_of_work,
                auto_save,
                auto_close_when_empty,
                cancel,
                state: Mutex::new(SessionState {
                    active: true,
                    window_ids: Vec::new(),
                    children: Vec::new(),
                    on_dispose,
                    window_subscription: Some(subscription),
                }),
                closed: Event::new(),
            }
        });

        if let Some(parent) = &inner.parent {
            let mut state = parent.inner.state.lock();
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&inner));
        }
        if let Some(registry) = &inner.registry {
            registry.insert(inner.id, Arc::downgrade(&inner));
        }

        tracing::info!(
            session_id = %inner.id,
            tag = %inner.tag,
            parent_id = ?inner.parent.as_ref().map(|p| p.id()),
            unit_of_work = inner.unit_of_work.is_some(),
            "Session opened"
        );
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn registry(&self) -> Option<SessionRegistry> {
        self.inner.registry.clone()
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn parent_id(&self) -> Option<SessionId> {
        self.inner.parent.as_ref().map(|p| p.id())
    }

    pub fn parent(&self) -> Option<&ScopeSession> {
        self.inner.parent.as_ref()
    }

    pub fn tag(&self) -> &ScopeTag {
        &self.inner.tag
    }

    pub fn scope(&self) -> &ScopeHandle {
        &self.inner.scope
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn auto_save(&self) -> bool {
        self.inner.auto_save
    }

    pub fn has_unit_of_work(&self) -> bool {
        self.inner.unit_of_work.is_some()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn window_manager(&self) -> &Arc<WindowManager> {
        &self.inner.windows
    }

    pub fn window_count(&self) -> usize {
        self.inner.state.lock().window_ids.len()
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.inner.state.lock().window_ids.clone()
    }

    /// Active child sessions, in creation order.
    pub fn child_sessions(&self) -> Vec<ScopeSession> {
        let children: Vec<Weak<SessionInner>> = self.inner.state.lock().children.clone();
        children
            .iter()
            .filter_map(Weak::upgrade)
            .map(ScopeSession::from_inner)
            .filter(|s| s.is_active())
            .collect()
    }

    pub fn ptr_eq(&self, other: &ScopeSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Begin the definition of a child session beneath this one.
    pub fn create_child(&self, tag: ScopeTag) -> SessionBuilder {
        SessionBuilder::child_of(self.clone(), tag)
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolutionError> {
        self.inner.scope.resolve::<T>()
    }

    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.scope.try_resolve::<T>()
    }

    /// Open a window whose scope is a child of this session's scope.
    pub fn open_window<VM: ViewModel>(&self) -> Result<WindowId, WindowOperationError> {
        self.ensure_can_open()?;
        let id = self.inner.windows.open_window_in::<VM>(&self.inner.scope)?;
        self.track_window(id);
        Ok(id)
    }

    pub fn open_window_with<VM, P>(&self, params: P) -> Result<WindowId, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.ensure_can_open()?;
        let id = self
            .inner
            .windows
            .open_window_with_in::<VM, P>(&self.inner.scope, params)?;
        self.track_window(id);
        Ok(id)
    }

    fn ensure_can_open(&self) -> Result<(), WindowOperationError> {
        if self.is_active() {
            return Ok(());
        }
        Err(WindowOperationError::new(
            "OpenWindow",
            None,
            format!("session {} ({}) is closed", self.inner.id, self.inner.tag),
        ))
    }

    fn track_window(&self, id: WindowId) {
        self.inner.state.lock().window_ids.push(id);
    }

    fn on_window_closed(&self, id: WindowId) {
        let close_now = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            let before = state.window_ids.len();
            state.window_ids.retain(|w| *w != id);
            before != state.window_ids.len()
                && state.window_ids.is_empty()
                && self.inner.auto_close_when_empty
        };
        if close_now {
            tracing::info!(session_id = %self.inner.id, "Last window closed, closing session");
            self.close();
        }
    }

    /// Commit the unit of work if this session auto-saves.
    pub fn save_if_auto_save(&self) -> Result<(), SessionError> {
        self.ensure_active()?;
        match &self.inner.unit_of_work {
            Some(uow) if self.inner.auto_save => {
                uow.save_changes().map_err(|source| SessionError::Save { source })?;
                tracing::debug!(session_id = %self.inner.id, "Unit of work saved");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub async fn save_if_auto_save_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.ensure_active()?;
        let uow = match &self.inner.unit_of_work {
            Some(uow) if self.inner.auto_save => uow.clone(),
            _ => return Ok(()),
        };
        uow.save_changes_async(cancel)
            .await
            .map_err(|source| SessionError::Save { source })?;
        tracing::debug!(session_id = %self.inner.id, "Unit of work saved");
        Ok(())
    }

    /// Discard pending work of the wrapped unit of work, if any.
    pub fn rollback(&self) {
        if let Some(uow) = &self.inner.unit_of_work {
            tracing::warn!(session_id = %self.inner.id, tag = %self.inner.tag, "Rolling back unit of work");
            uow.rollback();
        }
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SessionError::Inactive {
                session: format!("{} ({})", self.inner.id, self.inner.tag),
            })
        }
    }

    pub fn subscribe_closed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionClosed) + Send + Sync + 'static,
    {
        self.inner.closed.subscribe(handler)
    }

    /// Close this session and everything created beneath it. Idempotent.
    pub fn close(&self) {
        for session in self.subtree_bottom_up() {
            if let Some(teardown) = session.begin_close() {
                session.close_windows_and_hooks(teardown);
                session.finish_close();
            }
        }
    }

    /// Asynchronous [`ScopeSession::close`]: also awaits the unit of work's
    /// `dispose_async`.
    pub async fn close_async(&self) {
        for session in self.subtree_bottom_up() {
            if let Some(teardown) = session.begin_close() {
                session.close_windows_and_hooks(teardown);
                if let Some(uow) = &session.inner.unit_of_work {
                    uow.dispose_async().await;
                }
                session.finish_close();
            }
        }
    }

    /// Active sessions of this subtree, every child before its parent.
    fn subtree_bottom_up(&self) -> Vec<ScopeSession> {
        let mut ordered = Vec::new();
        let mut stack = vec![(self.clone(), false)];
        while let Some((session, expanded)) = stack.pop() {
            if expanded {
                ordered.push(session);
                continue;
            }
            let children = session.child_sessions();
            stack.push((session, true));
            for child in children.into_iter().rev() {
                stack.push((child, false));
            }
        }
        ordered
    }

    fn begin_close(&self) -> Option<Teardown> {
        let (teardown, subscription) = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return None;
            }
            state.active = false;
            state.children.clear();
            (
                Teardown {
                    window_ids: std::mem::take(&mut state.window_ids),
                    hooks: std::mem::take(&mut state.on_dispose),
                },
                state.window_subscription.take(),
            )
        };
        drop(subscription);
        self.inner.cancel.cancel();
        Some(teardown)
    }

    fn close_windows_and_hooks(&self, teardown: Teardown) {
        for id in teardown.window_ids {
            if self.inner.windows.metadata(id).is_some() {
                // Already gone means it was closed by its parent or the user.
                let _ = self.inner.windows.close_window(id);
            }
        }
        for hook in teardown.hooks.into_iter().rev() {
            hook();
        }
    }

    fn finish_close(&self) {
        self.inner.scope.dispose();
        if let Some(registry) = &self.inner.registry {
            registry.remove(&self.inner.id);
        }
        tracing::info!(session_id = %self.inner.id, tag = %self.inner.tag, "Session closed");
        self.inner.closed.emit(&SessionClosed {
            id: self.inner.id,
            tag: self.inner.tag.clone(),
        });
        self.inner.closed.clear();
    }
}

impl fmt::Debug for ScopeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSession")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.tag)
            .field("active", &self.is_active())
            .field("windows", &self.window_count())
            .finish()
    }
}
