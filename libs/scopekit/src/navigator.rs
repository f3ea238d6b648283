//! Content navigation inside a single window
//!
//! The navigator keeps the view-model currently displayed as content plus a
//! back stack of the ones shown before it. Going forward keeps the previous
//! view-model alive on the stack; going back disposes whatever is left behind.
//! It never closes windows itself: `request_close` only raises an event for
//! the hosting window to act upon.

use std::any::{type_name, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::{AnyInstance, ScopeHandle};
use crate::error::NavigationError;
use crate::event::{Event, Subscription};
use crate::tag::ScopeTag;
use crate::window::{short_type_name, ViewModel};

/// Navigator property that changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigatorProperty {
    CurrentViewModel,
    CanNavigateBack,
}

/// Raised by [`Navigator::request_close`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    pub show_confirmation: bool,
    pub message: Option<String>,
}

struct NavEntry {
    view_model: Arc<dyn ViewModel>,
    instance: AnyInstance,
    type_id: TypeId,
    type_name: &'static str,
    /// Child scope the view-model was resolved in, owned by this entry.
    scope: ScopeHandle,
}

impl NavEntry {
    fn dispose(self) {
        tracing::trace!(view_model = self.type_name, "Disposing navigation entry");
        self.view_model.dispose();
        self.scope.dispose();
    }
}

#[derive(Default)]
struct NavState {
    current: Option<NavEntry>,
    history: Vec<NavEntry>,
}

pub struct Navigator {
    scope: ScopeHandle,
    history_limit: Option<usize>,
    state: Mutex<NavState>,
    property_changed: Event<NavigatorProperty>,
    close_requested: Event<CloseRequest>,
}

impl Navigator {
    pub fn new(scope: ScopeHandle, history_limit: Option<usize>) -> Self {
        Self {
            scope,
            history_limit,
            state: Mutex::new(NavState::default()),
            property_changed: Event::new(),
            close_requested: Event::new(),
        }
    }

    /// Resolve `VM` in a fresh child of the navigator's scope and make it current.
    ///
    /// Every entry gets its own scope, so a scoped view-model is never shared
    /// between the history and the current entry.
    pub async fn navigate_to<VM: ViewModel>(&self) -> Result<(), NavigationError> {
        let scope = self.entry_scope::<VM>()?;
        self.resolve_in::<VM>(scope).await
    }

    /// Like [`Navigator::navigate_to`], with `params` resolvable by `VM`'s factory.
    pub async fn navigate_to_with<VM, P>(&self, params: P) -> Result<(), NavigationError>
    where
        VM: ViewModel,
        P: Send + Sync + 'static,
    {
        let scope = self.entry_scope::<VM>()?;
        scope.provide(params);
        self.resolve_in::<VM>(scope).await
    }

    fn entry_scope<VM: ViewModel>(&self) -> Result<ScopeHandle, NavigationError> {
        Ok(self.scope.create_child(ScopeTag::custom(
            "Navigation",
            Some(short_type_name(type_name::<VM>()).to_string()),
        ))?)
    }

    async fn resolve_in<VM: ViewModel>(&self, scope: ScopeHandle) -> Result<(), NavigationError> {
        let vm = match scope.resolve::<VM>() {
            Ok(vm) => vm,
            Err(e) => {
                scope.dispose();
                return Err(e.into());
            }
        };
        self.activate(vm, scope).await
    }

    async fn activate<VM: ViewModel>(
        &self,
        vm: Arc<VM>,
        scope: ScopeHandle,
    ) -> Result<(), NavigationError> {
        let entry = NavEntry {
            view_model: vm.clone(),
            instance: vm.clone(),
            type_id: TypeId::of::<VM>(),
            type_name: type_name::<VM>(),
            scope,
        };

        let trimmed = {
            let mut state = self.state.lock();
            if let Some(previous) = state.current.replace(entry) {
                state.history.push(previous);
            }
            let excess = match self.history_limit {
                Some(limit) if state.history.len() > limit => state.history.len() - limit,
                _ => 0,
            };
            let trimmed: Vec<NavEntry> = state.history.drain(..excess).collect();
            trimmed
        };
        for entry in trimmed {
            entry.dispose();
        }

        tracing::debug!(view_model = type_name::<VM>(), "Navigated to view-model");
        self.notify();

        let dynamic: Arc<dyn ViewModel> = vm;
        dynamic
            .initialize()
            .await
            .map_err(|source| NavigationError::Initialize {
                view_model: type_name::<VM>(),
                source,
            })
    }

    /// Return to the previous view-model, disposing the current one.
    ///
    /// Returns `false` (and changes nothing) when the history is empty.
    pub async fn navigate_back(&self) -> bool {
        let left = {
            let mut state = self.state.lock();
            let Some(previous) = state.history.pop() else {
                drop(state);
                tracing::debug!("Navigation history is empty, nothing to go back to");
                return false;
            };
            state.current.replace(previous)
        };
        if let Some(left) = left {
            left.dispose();
        }
        self.notify();
        true
    }

    /// Pop the history down to the most recent `VM` and make it current.
    ///
    /// Every view-model popped past it and the previous current one are
    /// disposed; the target is not. Returns `false` without touching the
    /// state when no `VM` is on the stack.
    pub async fn navigate_back_to<VM: ViewModel>(&self) -> bool {
        let type_id = TypeId::of::<VM>();
        let released = {
            let mut state = self.state.lock();
            let Some(pos) = state.history.iter().rposition(|e| e.type_id == type_id) else {
                drop(state);
                tracing::debug!(view_model = type_name::<VM>(), "View-model not in navigation history");
                return false;
            };
            let mut released = state.history.split_off(pos + 1);
            let target = state.history.pop();
            if let Some(old) = std::mem::replace(&mut state.current, target) {
                released.push(old);
            }
            released
        };
        for entry in released.into_iter().rev() {
            entry.dispose();
        }
        self.notify();
        true
    }

    /// Ask the hosting window to close. The navigator closes nothing itself.
    pub fn request_close(&self, show_confirmation: bool, message: Option<String>) {
        self.close_requested.emit(&CloseRequest {
            show_confirmation,
            message,
        });
    }

    pub fn current(&self) -> Option<Arc<dyn ViewModel>> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|e| e.view_model.clone())
    }

    pub fn current_as<T: ViewModel>(&self) -> Option<Arc<T>> {
        let instance = self.state.lock().current.as_ref()?.instance.clone();
        instance.downcast::<T>().ok()
    }

    pub fn current_type_name(&self) -> Option<&'static str> {
        self.state.lock().current.as_ref().map(|e| e.type_name)
    }

    pub fn can_navigate_back(&self) -> bool {
        !self.state.lock().history.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Drop the back stack, keeping the current view-model.
    pub fn clear_history(&self) {
        let history = std::mem::take(&mut self.state.lock().history);
        if history.is_empty() {
            return;
        }
        for entry in history.into_iter().rev() {
            entry.dispose();
        }
        self.property_changed.emit(&NavigatorProperty::CanNavigateBack);
    }

    pub fn subscribe_property_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NavigatorProperty) + Send + Sync + 'static,
    {
        self.property_changed.subscribe(handler)
    }

    pub fn subscribe_close_requested<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseRequest) + Send + Sync + 'static,
    {
        self.close_requested.subscribe(handler)
    }

    /// Dispose the current view-model and the whole history.
    pub fn dispose(&self) {
        let (current, history) = {
            let mut state = self.state.lock();
            (state.current.take(), std::mem::take(&mut state.history))
        };
        for entry in history.into_iter().rev() {
            entry.dispose();
        }
        if let Some(current) = current {
            current.dispose();
        }
        self.property_changed.clear();
        self.close_requested.clear();
    }

    fn notify(&self) {
        self.property_changed.emit(&NavigatorProperty::CurrentViewModel);
        self.property_changed.emit(&NavigatorProperty::CanNavigateBack);
    }
}

impl std::fmt::Debug for Navigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigator")
            .field("current", &self.current_type_name())
            .field("history", &self.history_len())
            .finish()
    }
}
