//! Window manager - tracks every open window and drives its lifecycle
//!
//! Opening a window creates a `Window:<id>` child scope, provides a
//! [`WindowContext`] and a [`Navigator`] into it, resolves the view-model from
//! it and asks the [`WindowFactory`] for the native window. The manager keeps a
//! [`WindowMetadata`] record per window; closing one cascades depth-first into
//! its child windows before the window itself reaches [`Lifecycle::Closed`]
//! and its scope is disposed.
//!
//! Every operation exists twice: a throwing variant returning
//! `Result<_, WindowOperationError>` and a `try_` variant returning an
//! [`OperationResult`]. Both record the failure as the manager's last error and
//! raise the `window_error` event.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ScopeKitConfig;
use crate::container::ScopeHandle;
use crate::context::WindowContext;
use crate::error::WindowOperationError;
use crate::event::{Event, Subscription};
use crate::navigator::Navigator;
use crate::tag::ScopeTag;

/// Unique identifier of a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Upcast to `&dyn Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Content bound to a window or shown by a [`Navigator`].
#[async_trait]
pub trait ViewModel: AsAny + Send + Sync {
    /// Asynchronous initialisation, awaited by the navigator after activation.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the view-model leaves its window or navigation history.
    fn dispose(&self) {}

    fn title(&self) -> String {
        short_type_name(type_name::<Self>()).to_string()
    }
}

/// A native window produced by a [`WindowFactory`].
pub trait Window: Send + Sync {
    fn show(&self) -> anyhow::Result<()>;

    /// Close the native window. Called by the manager; a window closed by the
    /// user reports it through the closed handler instead.
    fn close(&self);

    /// Install the callback the window invokes when it is closed natively.
    fn set_closed_handler(&self, handler: Box<dyn Fn() + Send + Sync>);
}

/// What the factory needs to know about a window it is asked to create.
#[derive(Clone, Debug)]
pub struct WindowSpec {
    pub id: WindowId,
    pub title: String,
    pub view_model_type: &'static str,
    pub parent_id: Option<WindowId>,
    pub modal: bool,
}

/// Produces native windows for view-models and presents error notifications.
pub trait WindowFactory: Send + Sync {
    fn create_window(
        &self,
        view_model: &Arc<dyn ViewModel>,
        spec: &WindowSpec,
    ) -> anyhow::Result<Arc<dyn Window>>;

    fn show_error(&self, title: &str, message: &str) {
        tracing::error!(title, message, "Window error notification");
    }
}

/// Lifecycle of a window: `Creating -> Open -> Closed`, never backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Creating,
    Open,
    Closed,
}

impl Lifecycle {
    pub fn can_transition_to(self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Creating, Lifecycle::Open)
                | (Lifecycle::Creating, Lifecycle::Closed)
                | (Lifecycle::Open, Lifecycle::Closed)
        )
    }
}

/// Strong references held only while the window is open.
struct WindowHandle {
    scope: ScopeHandle,
    window: Arc<dyn Window>,
    view_model: Arc<dyn ViewModel>,
    context: Arc<WindowContext>,
    navigator: Arc<Navigator>,
}

/// Per-window record kept by the [`WindowManager`].
pub struct WindowMetadata {
    id: WindowId,
    view_model_type: &'static str,
    parent_id: Option<WindowId>,
    modal: bool,
    created_thread: ThreadId,
    created_at: Instant,
    lifecycle: Mutex<Lifecycle>,
    window_ref: Weak<dyn Window>,
    view_model_ref: Weak<dyn ViewModel>,
    handle: Mutex<Option<WindowHandle>>,
    closed: CancellationToken,
    closing: AtomicBool,
}

impl WindowMetadata {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn view_model_type(&self) -> &'static str {
        self.view_model_type
    }

    pub fn parent_id(&self) -> Option<WindowId> {
        self.parent_id
    }

    pub fn is_modal(&self) -> bool {
        self.modal
    }

    pub fn created_thread_id(&self) -> ThreadId {
        self.created_thread
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    /// Move to `next` if the transition is allowed. Returns whether it happened.
    pub fn transition_to(&self, next: Lifecycle) -> bool {
        let mut current = self.lifecycle.lock();
        if !current.can_transition_to(next) {
            tracing::debug!(window_id = %self.id, from = ?*current, to = ?next, "Ignoring lifecycle transition");
            return false;
        }
        *current = next;
        true
    }

    pub fn window(&self) -> Option<Arc<dyn Window>> {
        self.window_ref.upgrade()
    }

    pub fn view_model(&self) -> Option<Arc<dyn ViewModel>> {
        self.view_model_ref.upgrade()
    }

    /// Scope owned by the window; `None` once disposed.
    pub fn scope(&self) -> Option<ScopeHandle> {
        self.handle.lock().as_ref().map(|h| h.scope.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the window has reached [`Lifecycle::Closed`].
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn set_closed(&self) {
        self.transition_to(Lifecycle::Closed);
        self.closed.cancel();
    }

    /// Release the window's scope and every strong reference. Idempotent.
    pub fn dispose(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.context.dispose();
            handle.navigator.dispose();
            handle.view_model.dispose();
            handle.scope.dispose();
            drop(handle.window);
        }
    }
}

impl fmt::Debug for WindowMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowMetadata")
            .field("id", &self.id)
            .field("view_model_type", &self.view_model_type)
            .field("parent_id", &self.parent_id)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Payload of the `window_closed` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowClosed {
    pub id: WindowId,
    pub parent_id: Option<WindowId>,
    pub view_model_type: &'static str,
}

/// Outcome of a `try_` operation. Never panics, never throws.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationResult<T>(Result<T, WindowOperationError>);

impl<T> OperationResult<T> {
    pub fn is_success(&self) -> bool {
        self.0.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.0.as_ref().ok()
    }

    pub fn error(&self) -> Option<&WindowOperationError> {
        self.0.as_ref().err()
    }

    /// Failure message, if the operation failed.
    pub fn message(&self) -> Option<&str> {
        self.error().map(|e| e.message.as_str())
    }

    pub fn into_result(self) -> Result<T, WindowOperationError> {
        self.0
    }

    pub fn into_value(self) -> Option<T> {
        self.0.ok()
    }
}

impl<T> From<Result<T, WindowOperationError>> for OperationResult<T> {
    fn from(result: Result<T, WindowOperationError>) -> Self {
        Self(result)
    }
}

/// Result of a modal dialog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogResult<R> {
    pub success: bool,
    pub value: Option<R>,
}

impl<R> DialogResult<R> {
    pub fn completed(value: R) -> Self {
        Self {
            success: true,
            value: Some(value),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

type DialogPayload = Box<dyn Any + Send>;

struct DialogSlot {
    sender: Option<oneshot::Sender<Option<DialogPayload>>>,
    payload: Option<DialogPayload>,
}

struct OpenRequest<'a> {
    operation: &'static str,
    id: WindowId,
    scope: &'a ScopeHandle,
    parent_id: Option<WindowId>,
    modal: bool,
}

/// Tracks open windows by id and owns their lifecycle.
pub struct WindowManager {
    me: Weak<WindowManager>,
    root: ScopeHandle,
    factory: Arc<dyn WindowFactory>,
    config: ScopeKitConfig,
    windows: RwLock<HashMap<WindowId, Arc<WindowMetadata>>>,
    dialogs: Mutex<HashMap<WindowId, DialogSlot>>,
    last_error: Mutex<Option<WindowOperationError>>,
    window_error: Event<WindowOperationError>,
    window_closed: Event<WindowClosed>,
}

impl WindowManager {
    pub fn new(
        root: ScopeHandle,
        factory: Arc<dyn WindowFactory>,
        config: ScopeKitConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            root,
            factory,
            config,
            windows: RwLock::new(HashMap::new()),
            dialogs: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
            window_error: Event::new(),
            window_closed: Event::new(),
        })
    }

    pub(crate) fn weak(&self) -> Weak<WindowManager> {
        self.me.clone()
    }

    pub fn root_scope(&self) -> &ScopeHandle {
        &self.root
    }

    pub fn config(&self) -> &ScopeKitConfig {
        &self.config
    }

    // --- opening -------------------------------------------------------------

    pub fn open_window<VM: ViewModel>(&self) -> Result<WindowId, WindowOperationError> {
        self.open_window_in::<VM>(&self.root)
    }

    pub fn try_open_window<VM: ViewModel>(&self) -> OperationResult<WindowId> {
        self.open_window::<VM>().into()
    }

    pub fn open_window_with<VM, P>(&self, params: P) -> Result<WindowId, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.open_window_with_in::<VM, P>(&self.root, params)
    }

    pub fn try_open_window_with<VM, P>(&self, params: P) -> OperationResult<WindowId>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.open_window_with::<VM, P>(params).into()
    }

    /// Open a top-level window whose scope is a child of `scope`.
    pub fn open_window_in<VM: ViewModel>(
        &self,
        scope: &ScopeHandle,
    ) -> Result<WindowId, WindowOperationError> {
        let request = OpenRequest {
            operation: "OpenWindow",
            id: WindowId::new(),
            scope,
            parent_id: None,
            modal: false,
        };
        self.open_core::<VM>(request, |_| {})
            .map_err(|e| self.record(e))
    }

    pub fn open_window_with_in<VM, P>(
        &self,
        scope: &ScopeHandle,
        params: P,
    ) -> Result<WindowId, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        let request = OpenRequest {
            operation: "OpenWindow",
            id: WindowId::new(),
            scope,
            parent_id: None,
            modal: false,
        };
        self.open_core::<VM>(request, move |s| s.provide(params))
            .map_err(|e| self.record(e))
    }

    /// Open a window as a child of `parent_id`.
    ///
    /// When `parent_id` is not an open window the window is opened against the
    /// root scope instead (unless `fallback_to_root_on_missing_parent` is off).
    pub fn open_child_window<VM: ViewModel>(
        &self,
        parent_id: WindowId,
    ) -> Result<WindowId, WindowOperationError> {
        self.open_child_core::<VM>(parent_id, |_| {})
    }

    pub fn try_open_child_window<VM: ViewModel>(
        &self,
        parent_id: WindowId,
    ) -> OperationResult<WindowId> {
        self.open_child_window::<VM>(parent_id).into()
    }

    pub fn open_child_window_with<VM, P>(
        &self,
        parent_id: WindowId,
        params: P,
    ) -> Result<WindowId, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.open_child_core::<VM>(parent_id, move |s| s.provide(params))
    }

    pub fn try_open_child_window_with<VM, P>(
        &self,
        parent_id: WindowId,
        params: P,
    ) -> OperationResult<WindowId>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.open_child_window_with::<VM, P>(parent_id, params).into()
    }

    fn open_child_core<VM: ViewModel>(
        &self,
        parent_id: WindowId,
        configure: impl FnOnce(&ScopeHandle),
    ) -> Result<WindowId, WindowOperationError> {
        let operation = "OpenChildWindow";
        let (scope, parent) = self
            .parent_scope(operation, Some(parent_id))
            .map_err(|e| self.record(e))?;
        let request = OpenRequest {
            operation,
            id: WindowId::new(),
            scope: &scope,
            parent_id: parent,
            modal: false,
        };
        self.open_core::<VM>(request, configure)
            .map_err(|e| self.record(e))
    }

    /// Scope under which a child of `parent` is created, plus the effective parent id.
    fn parent_scope(
        &self,
        operation: &'static str,
        parent: Option<WindowId>,
    ) -> Result<(ScopeHandle, Option<WindowId>), WindowOperationError> {
        let Some(parent_id) = parent else {
            return Ok((self.root.clone(), None));
        };
        let scope = self
            .metadata(parent_id)
            .filter(|m| !m.is_closed())
            .and_then(|m| m.scope());
        match scope {
            Some(scope) => Ok((scope, Some(parent_id))),
            None if self.config.fallback_to_root_on_missing_parent => {
                tracing::warn!(
                    operation,
                    parent_id = %parent_id,
                    "Parent window not found; opening against the root scope"
                );
                Ok((self.root.clone(), None))
            }
            None => Err(WindowOperationError::not_found(operation, parent_id)),
        }
    }

    fn open_core<VM: ViewModel>(
        &self,
        request: OpenRequest<'_>,
        configure: impl FnOnce(&ScopeHandle),
    ) -> Result<WindowId, WindowOperationError> {
        let OpenRequest {
            operation,
            id,
            scope: parent_scope,
            parent_id,
            modal,
        } = request;
        let fail = |message: String| WindowOperationError::new(operation, Some(id), message);

        let scope = parent_scope
            .create_child(ScopeTag::window(id))
            .map_err(|e| fail(e.to_string()))?;

        let context = WindowContext::new(self, id);
        let navigator = Arc::new(Navigator::new(
            scope.clone(),
            self.config.navigation_history_limit,
        ));
        scope.provide_arc(context.clone());
        scope.provide_arc(navigator.clone());
        configure(&scope);

        let abort = |message: String| {
            context.dispose();
            navigator.dispose();
            scope.dispose();
            fail(message)
        };

        let view_model: Arc<dyn ViewModel> = match scope.resolve::<VM>() {
            Ok(vm) => vm,
            Err(e) => return Err(abort(e.to_string())),
        };
        let spec = WindowSpec {
            id,
            title: view_model.title(),
            view_model_type: type_name::<VM>(),
            parent_id,
            modal,
        };
        let window = match self.factory.create_window(&view_model, &spec) {
            Ok(window) => window,
            Err(e) => {
                view_model.dispose();
                return Err(abort(format!("{e:#}")));
            }
        };

        let metadata = Arc::new(WindowMetadata {
            id,
            view_model_type: spec.view_model_type,
            parent_id,
            modal,
            created_thread: std::thread::current().id(),
            created_at: Instant::now(),
            lifecycle: Mutex::new(Lifecycle::Creating),
            window_ref: Arc::downgrade(&window),
            view_model_ref: Arc::downgrade(&view_model),
            handle: Mutex::new(Some(WindowHandle {
                scope,
                window: window.clone(),
                view_model,
                context,
                navigator,
            })),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
        });
        self.windows.write().insert(id, metadata.clone());

        let manager = self.me.clone();
        window.set_closed_handler(Box::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.handle_native_close(id);
            }
        }));

        metadata.transition_to(Lifecycle::Open);
        if let Err(e) = window.show() {
            self.windows.write().remove(&id);
            metadata.set_closed();
            metadata.dispose();
            return Err(fail(format!("{e:#}")));
        }

        tracing::info!(
            window_id = %id,
            view_model = spec.view_model_type,
            parent_id = ?parent_id,
            modal,
            "Window opened"
        );
        Ok(id)
    }

    // --- closing -------------------------------------------------------------

    /// Close a window and, first, every window opened beneath it.
    pub fn close_window(&self, id: WindowId) -> Result<(), WindowOperationError> {
        let Some(metadata) = self.metadata(id) else {
            return Err(self.record(WindowOperationError::not_found("CloseWindow", id)));
        };
        self.finish_close(&metadata, false);
        Ok(())
    }

    pub fn try_close_window(&self, id: WindowId) -> OperationResult<()> {
        self.close_window(id).into()
    }

    /// Close every direct child of `parent_id` (and, through the cascade, their children).
    pub fn close_child_windows(&self, parent_id: WindowId) -> usize {
        let children = self.child_metadata(parent_id);
        let count = children.len();
        for child in children {
            self.finish_close(&child, false);
        }
        count
    }

    pub fn close_all_windows(&self) {
        let roots: Vec<Arc<WindowMetadata>> = {
            let windows = self.windows.read();
            let roots: Vec<Arc<WindowMetadata>> = windows
                .values()
                .filter(|m| match m.parent_id {
                    Some(parent) => !windows.contains_key(&parent),
                    None => true,
                })
                .cloned()
                .collect();
            roots
        };
        for metadata in roots {
            self.finish_close(&metadata, false);
        }
    }

    fn handle_native_close(&self, id: WindowId) {
        match self.metadata(id) {
            Some(metadata) => {
                tracing::debug!(window_id = %id, "Window closed natively");
                self.finish_close(&metadata, true);
            }
            None => tracing::debug!(window_id = %id, "Native close for untracked window, ignoring"),
        }
    }

    fn finish_close(&self, metadata: &Arc<WindowMetadata>, native: bool) {
        if metadata.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = metadata.id;

        for child in self.child_metadata(id) {
            self.finish_close(&child, false);
        }

        if !native {
            if let Some(window) = metadata.window() {
                window.close();
            }
        }
        metadata.set_closed();
        self.windows.write().remove(&id);
        self.resolve_dialog(id);
        metadata.dispose();

        tracing::info!(window_id = %id, view_model = metadata.view_model_type, "Window closed");
        self.window_closed.emit(&WindowClosed {
            id,
            parent_id: metadata.parent_id,
            view_model_type: metadata.view_model_type,
        });
    }

    // --- dialogs -------------------------------------------------------------

    /// Open `VM` as a modal dialog and wait until it is closed.
    ///
    /// Resolves to the value passed to [`WindowManager::complete_dialog`], or to
    /// a cancelled result when the dialog was closed any other way.
    pub async fn show_dialog<VM, P, R>(
        &self,
        parent: Option<WindowId>,
        params: P,
    ) -> Result<DialogResult<R>, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
        R: Send + 'static,
    {
        let operation = "ShowDialog";
        let id = WindowId::new();
        let (tx, rx) = oneshot::channel();
        self.dialogs.lock().insert(
            id,
            DialogSlot {
                sender: Some(tx),
                payload: None,
            },
        );

        let opened = self.parent_scope(operation, parent).and_then(|(scope, parent_id)| {
            let request = OpenRequest {
                operation,
                id,
                scope: &scope,
                parent_id,
                modal: true,
            };
            self.open_core::<VM>(request, move |s| s.provide(params))
        });
        if let Err(e) = opened {
            self.dialogs.lock().remove(&id);
            return Err(self.record(e));
        }

        let payload = rx.await.ok().flatten();
        Ok(match payload.map(|p| p.downcast::<R>()) {
            Some(Ok(value)) => DialogResult::completed(*value),
            Some(Err(_)) => {
                tracing::warn!(window_id = %id, expected = type_name::<R>(), "Dialog completed with a result of another type");
                DialogResult::cancelled()
            }
            None => DialogResult::cancelled(),
        })
    }

    pub async fn try_show_dialog<VM, P, R>(
        &self,
        parent: Option<WindowId>,
        params: P,
    ) -> OperationResult<DialogResult<R>>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.show_dialog::<VM, P, R>(parent, params).await.into()
    }

    /// Store `result` for the dialog `id` and close it.
    pub fn complete_dialog<R: Send + 'static>(
        &self,
        id: WindowId,
        result: R,
    ) -> Result<(), WindowOperationError> {
        {
            let mut dialogs = self.dialogs.lock();
            match dialogs.get_mut(&id) {
                Some(slot) if slot.payload.is_none() => slot.payload = Some(Box::new(result)),
                Some(_) => {
                    return Err(self.record(WindowOperationError::new(
                        "CompleteDialog",
                        Some(id),
                        "dialog already has a result",
                    )))
                }
                None => {
                    return Err(self.record(WindowOperationError::new(
                        "CompleteDialog",
                        Some(id),
                        format!("window {id} is not an open dialog"),
                    )))
                }
            }
        }
        self.close_window(id)
    }

    fn resolve_dialog(&self, id: WindowId) {
        let slot = self.dialogs.lock().remove(&id);
        if let Some(mut slot) = slot {
            if let Some(sender) = slot.sender.take() {
                let completed = slot.payload.is_some();
                // The receiver is gone if the awaiting task was dropped.
                let _ = sender.send(slot.payload.take());
                tracing::debug!(window_id = %id, completed, "Dialog resolved");
            }
        }
    }

    // --- queries -------------------------------------------------------------

    pub fn metadata(&self, id: WindowId) -> Option<Arc<WindowMetadata>> {
        self.windows.read().get(&id).cloned()
    }

    pub fn is_window_open(&self, id: WindowId) -> bool {
        self.metadata(id)
            .is_some_and(|m| m.lifecycle() == Lifecycle::Open)
    }

    pub fn open_window_ids(&self) -> Vec<WindowId> {
        self.windows.read().keys().copied().collect()
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().len()
    }

    pub fn child_ids(&self, parent_id: WindowId) -> Vec<WindowId> {
        self.child_metadata(parent_id).iter().map(|m| m.id).collect()
    }

    fn child_metadata(&self, parent_id: WindowId) -> Vec<Arc<WindowMetadata>> {
        let mut children: Vec<Arc<WindowMetadata>> = self
            .windows
            .read()
            .values()
            .filter(|m| m.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|m| m.id);
        children
    }

    // --- errors & events -----------------------------------------------------

    pub fn last_error(&self) -> Option<WindowOperationError> {
        self.last_error.lock().clone()
    }

    pub fn clear_last_error(&self) {
        self.last_error.lock().take();
    }

    pub fn subscribe_window_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WindowOperationError) + Send + Sync + 'static,
    {
        self.window_error.subscribe(handler)
    }

    pub fn subscribe_window_closed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WindowClosed) + Send + Sync + 'static,
    {
        self.window_closed.subscribe(handler)
    }

    fn record(&self, error: WindowOperationError) -> WindowOperationError {
        tracing::error!(
            operation = error.operation,
            window_id = ?error.window_id,
            error = %error.message,
            "Window operation failed"
        );
        *self.last_error.lock() = Some(error.clone());
        self.window_error.emit(&error);
        if self.config.show_error_notifications {
            self.factory.show_error(error.operation, &error.to_string());
        }
        error
    }
}

impl fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowManager")
            .field("windows", &self.window_count())
            .field("pending_dialogs", &self.dialogs.lock().len())
            .finish()
    }
}

pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBuilder;
    use crate::headless::HeadlessWindowFactory;

    struct Plain;

    impl ViewModel for Plain {}

    fn manager(factory: &Arc<HeadlessWindowFactory>) -> Arc<WindowManager> {
        let mut b = ContainerBuilder::new();
        b.register_transient::<Plain, _>(|_| Ok(Plain));
        WindowManager::new(b.build().root(), factory.clone(), ScopeKitConfig::default())
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        assert!(Lifecycle::Creating.can_transition_to(Lifecycle::Open));
        assert!(Lifecycle::Open.can_transition_to(Lifecycle::Closed));
        assert!(!Lifecycle::Closed.can_transition_to(Lifecycle::Open));
        assert!(!Lifecycle::Open.can_transition_to(Lifecycle::Creating));
        assert!(!Lifecycle::Open.can_transition_to(Lifecycle::Open));
    }

    #[test]
    fn open_then_close_reaches_closed_and_disposes_scope() {
        let factory = Arc::new(HeadlessWindowFactory::new());
        let wm = manager(&factory);

        let id = wm.open_window::<Plain>().unwrap();
        let metadata = wm.metadata(id).unwrap();
        let scope = metadata.scope().unwrap();
        assert_eq!(metadata.lifecycle(), Lifecycle::Open);
        assert_eq!(scope.tag(), &ScopeTag::window(id));
        assert!(wm.is_window_open(id));

        wm.close_window(id).unwrap();
        assert_eq!(metadata.lifecycle(), Lifecycle::Closed);
        assert!(metadata.is_closed());
        assert!(scope.is_disposed());
        assert!(metadata.scope().is_none());
        assert!(metadata.window().is_none());
        assert_eq!(wm.window_count(), 0);
    }

    #[test]
    fn unregistered_view_model_leaves_no_metadata() {
        struct Missing;
        impl ViewModel for Missing {}

        let factory = Arc::new(HeadlessWindowFactory::new());
        let wm = manager(&factory);

        let result = wm.try_open_window::<Missing>();
        assert!(!result.is_success());
        assert!(result.message().unwrap().contains("not registered"));
        assert_eq!(wm.window_count(), 0);
        assert_eq!(wm.last_error().unwrap().operation, "OpenWindow");
        assert_eq!(factory.errors().len(), 1);
    }

    #[test]
    fn closing_an_unknown_window_is_a_handled_failure() {
        let factory = Arc::new(HeadlessWindowFactory::new());
        let wm = manager(&factory);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = wm.subscribe_window_error(move |e| s.lock().push(e.clone()));

        let id = WindowId::new();
        assert!(wm.close_window(id).is_err());
        let r = wm.try_close_window(id);
        assert!(!r.is_success());
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(wm.last_error().unwrap().window_id, Some(id));
    }

    #[test]
    fn native_close_runs_the_same_teardown() {
        let factory = Arc::new(HeadlessWindowFactory::new());
        let wm = manager(&factory);
        let parent = wm.open_window::<Plain>().unwrap();
        let child = wm.open_child_window::<Plain>(parent).unwrap();

        factory.window(parent).unwrap().simulate_user_close();
        assert!(!wm.is_window_open(parent));
        assert!(!wm.is_window_open(child));
        assert_eq!(factory.closed(), vec![child, parent]);
    }

    #[test]
    fn factory_failure_is_recorded() {
        let factory = Arc::new(HeadlessWindowFactory::new());
        let wm = manager(&factory);
        factory.fail_next_create("no display");

        let err = wm.open_window::<Plain>().unwrap_err();
        assert!(err.message.contains("no display"));
        assert_eq!(wm.window_count(), 0);
    }

    #[test]
    fn short_type_names_strip_paths_and_generics() {
        assert_eq!(short_type_name("a::b::OrderEditor"), "OrderEditor");
        assert_eq!(short_type_name("a::List<b::Item>"), "List");
    }
}
