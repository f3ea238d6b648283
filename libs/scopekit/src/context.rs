//! Window context - the window manager as seen from inside one window
//!
//! Every window scope gets its own [`WindowContext`]. Operations act on the
//! owning window and its children; `ChildClosed` lets a view-model refresh
//! itself after a detail window it opened goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::WindowOperationError;
use crate::event::{Event, Subscription};
use crate::window::{
    DialogResult, OperationResult, ViewModel, WindowClosed, WindowId, WindowManager,
};

pub struct WindowContext {
    window_id: WindowId,
    manager: Weak<WindowManager>,
    child_closed: Event<WindowClosed>,
    operation_error: Event<WindowOperationError>,
    subscription: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

impl WindowContext {
    pub(crate) fn new(manager: &WindowManager, window_id: WindowId) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<WindowContext>| {
            let me = me.clone();
            let subscription = manager.subscribe_window_closed(move |closed| {
                if let Some(ctx) = me.upgrade() {
                    if closed.parent_id == Some(ctx.window_id) {
                        ctx.child_closed.emit(closed);
                    }
                }
            });
            Self {
                window_id,
                manager: manager.weak(),
                child_closed: Event::new(),
                operation_error: Event::new(),
                subscription: Mutex::new(Some(subscription)),
                disposed: AtomicBool::new(false),
            }
        })
    }

    /// Id of the window owning this context.
    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn manager(&self, operation: &'static str) -> Result<Arc<WindowManager>, WindowOperationError> {
        self.manager.upgrade().ok_or_else(|| {
            WindowOperationError::new(
                operation,
                Some(self.window_id),
                "window manager is no longer available",
            )
        })
    }

    fn report<T>(&self, result: Result<T, WindowOperationError>) -> Result<T, WindowOperationError> {
        if let Err(e) = &result {
            self.operation_error.emit(e);
        }
        result
    }

    pub fn open_window<VM: ViewModel>(&self) -> Result<WindowId, WindowOperationError> {
        let result = self
            .manager("OpenChildWindow")
            .and_then(|m| m.open_child_window::<VM>(self.window_id));
        self.report(result)
    }

    pub fn try_open_window<VM: ViewModel>(&self) -> OperationResult<WindowId> {
        self.open_window::<VM>().into()
    }

    pub fn open_window_with<VM, P>(&self, params: P) -> Result<WindowId, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        let result = self
            .manager("OpenChildWindow")
            .and_then(|m| m.open_child_window_with::<VM, P>(self.window_id, params));
        self.report(result)
    }

    pub fn try_open_window_with<VM, P>(&self, params: P) -> OperationResult<WindowId>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        self.open_window_with::<VM, P>(params).into()
    }

    /// Close the owning window (children first).
    pub fn close_window(&self) -> Result<(), WindowOperationError> {
        let result = self
            .manager("CloseWindow")
            .and_then(|m| m.close_window(self.window_id));
        self.report(result)
    }

    pub fn try_close_window(&self) -> OperationResult<()> {
        self.close_window().into()
    }

    pub fn close_all_child_windows(&self) -> Result<usize, WindowOperationError> {
        let result = self
            .manager("CloseAllChildWindows")
            .map(|m| m.close_child_windows(self.window_id));
        self.report(result)
    }

    pub fn try_close_all_child_windows(&self) -> OperationResult<usize> {
        self.close_all_child_windows().into()
    }

    /// Close `id`, which must be a direct child of this window.
    pub fn close_child_window(&self, id: WindowId) -> Result<(), WindowOperationError> {
        let result = self.manager("CloseChildWindow").and_then(|m| {
            if !m.child_ids(self.window_id).contains(&id) {
                return Err(WindowOperationError::new(
                    "CloseChildWindow",
                    Some(id),
                    format!("window {id} is not a child of {}", self.window_id),
                ));
            }
            m.close_window(id)
        });
        self.report(result)
    }

    pub fn try_close_child_window(&self, id: WindowId) -> OperationResult<()> {
        self.close_child_window(id).into()
    }

    /// Show `VM` as a modal child dialog and wait for its result.
    pub async fn show_dialog<VM, P, R>(
        &self,
        params: P,
    ) -> Result<DialogResult<R>, WindowOperationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
        R: Send + 'static,
    {
        let manager = match self.manager("ShowDialog") {
            Ok(m) => m,
            Err(e) => return self.report(Err(e)),
        };
        let result = manager
            .show_dialog::<VM, P, R>(Some(self.window_id), params)
            .await;
        self.report(result)
    }

    pub async fn try_show_dialog<VM, P, R>(&self, params: P) -> OperationResult<DialogResult<R>>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.show_dialog::<VM, P, R>(params).await.into()
    }

    /// Close the owning dialog, handing `result` to whoever awaits it.
    pub fn complete_dialog<R: Send + 'static>(&self, result: R) -> Result<(), WindowOperationError> {
        let result = self
            .manager("CompleteDialog")
            .and_then(|m| m.complete_dialog(self.window_id, result));
        self.report(result)
    }

    pub fn get_child_ids(&self) -> Vec<WindowId> {
        self.manager
            .upgrade()
            .map(|m| m.child_ids(self.window_id))
            .unwrap_or_default()
    }

    pub fn is_window_open(&self, id: WindowId) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|m| m.is_window_open(id))
    }

    pub fn child_windows_count(&self) -> usize {
        self.get_child_ids().len()
    }

    pub fn subscribe_child_closed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WindowClosed) + Send + Sync + 'static,
    {
        self.child_closed.subscribe(handler)
    }

    pub fn subscribe_operation_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WindowOperationError) + Send + Sync + 'static,
    {
        self.operation_error.subscribe(handler)
    }

    /// Close remaining children and drop every handler. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            let closed = manager.close_child_windows(self.window_id);
            if closed > 0 {
                tracing::debug!(window_id = %self.window_id, closed, "Closed orphaned child windows");
            }
        }
        self.subscription.lock().take();
        self.child_closed.clear();
        self.operation_error.clear();
    }
}

impl std::fmt::Debug for WindowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowContext")
            .field("window_id", &self.window_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeKitConfig;
    use crate::container::ContainerBuilder;
    use crate::headless::HeadlessWindowFactory;
    use std::sync::atomic::AtomicUsize;

    struct Master;
    impl ViewModel for Master {}

    struct Detail;
    impl ViewModel for Detail {}

    fn manager() -> Arc<WindowManager> {
        let mut b = ContainerBuilder::new();
        b.register_scoped::<Master, _>(|_| Ok(Master));
        b.register_scoped::<Detail, _>(|_| Ok(Detail));
        WindowManager::new(
            b.build().root(),
            Arc::new(HeadlessWindowFactory::new()),
            ScopeKitConfig::default(),
        )
    }

    fn context_of(wm: &WindowManager, id: WindowId) -> Arc<WindowContext> {
        wm.metadata(id)
            .and_then(|m| m.scope())
            .and_then(|s| s.try_resolve::<WindowContext>())
            .unwrap()
    }

    #[test]
    fn child_closed_fires_for_own_children_only() {
        let wm = manager();
        let master = wm.open_window::<Master>().unwrap();
        let other = wm.open_window::<Master>().unwrap();
        let ctx = context_of(&wm, master);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = ctx.subscribe_child_closed(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let detail = ctx.open_window::<Detail>().unwrap();
        let foreign = context_of(&wm, other).open_window::<Detail>().unwrap();
        assert_eq!(ctx.get_child_ids(), vec![detail]);
        assert_eq!(ctx.child_windows_count(), 1);

        ctx.close_child_window(detail).unwrap();
        wm.close_window(foreign).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closing_a_non_child_is_rejected_and_reported() {
        let wm = manager();
        let a = wm.open_window::<Master>().unwrap();
        let b = wm.open_window::<Master>().unwrap();
        let ctx = context_of(&wm, a);

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let _sub = ctx.subscribe_operation_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let r = ctx.try_close_child_window(b);
        assert!(!r.is_success());
        assert!(wm.is_window_open(b));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_closes_remaining_children() {
        let wm = manager();
        let master = wm.open_window::<Master>().unwrap();
        let ctx = context_of(&wm, master);
        let d1 = ctx.open_window::<Detail>().unwrap();
        let d2 = ctx.open_window::<Detail>().unwrap();

        ctx.dispose();
        assert!(!wm.is_window_open(d1));
        assert!(!wm.is_window_open(d2));
        assert!(wm.is_window_open(master));
        assert!(ctx.is_disposed());
    }

    #[test]
    fn close_window_closes_self() {
        let wm = manager();
        let master = wm.open_window::<Master>().unwrap();
        let ctx = context_of(&wm, master);
        ctx.close_window().unwrap();
        assert!(!wm.is_window_open(master));
        assert!(ctx.is_disposed());
    }
}
