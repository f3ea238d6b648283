//! In-memory window system for tests, tooling and hosts without a UI
//!
//! [`HeadlessWindowFactory`] records everything the manager asks of it and
//! hands out [`HeadlessWindow`]s that can simulate the user closing them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::window::{ViewModel, Window, WindowFactory, WindowId, WindowSpec};

/// Something the headless window system was asked to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessEvent {
    Shown { id: WindowId, title: String },
    Closed { id: WindowId },
    Error { title: String, message: String },
}

#[derive(Default)]
struct Journal {
    events: Vec<HeadlessEvent>,
    windows: HashMap<WindowId, Weak<HeadlessWindow>>,
    fail_next_create: Option<String>,
    fail_next_show: Option<String>,
}

#[derive(Default)]
pub struct HeadlessWindowFactory {
    journal: Arc<Mutex<Journal>>,
}

impl HeadlessWindowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_window` call fail with `message`.
    pub fn fail_next_create(&self, message: impl Into<String>) {
        self.journal.lock().fail_next_create = Some(message.into());
    }

    /// Make the next window's `show` fail with `message`.
    pub fn fail_next_show(&self, message: impl Into<String>) {
        self.journal.lock().fail_next_show = Some(message.into());
    }

    /// The live window created for `id`, if it is still around.
    pub fn window(&self, id: WindowId) -> Option<Arc<HeadlessWindow>> {
        self.journal.lock().windows.get(&id).and_then(Weak::upgrade)
    }

    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.journal.lock().events.clone()
    }

    pub fn shown(&self) -> Vec<WindowId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HeadlessEvent::Shown { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids of closed windows, in close order.
    pub fn closed(&self) -> Vec<WindowId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HeadlessEvent::Closed { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HeadlessEvent::Error { title, message } => Some((title, message)),
                _ => None,
            })
            .collect()
    }
}

impl WindowFactory for HeadlessWindowFactory {
    fn create_window(
        &self,
        _view_model: &Arc<dyn ViewModel>,
        spec: &WindowSpec,
    ) -> anyhow::Result<Arc<dyn Window>> {
        let mut journal = self.journal.lock();
        if let Some(message) = journal.fail_next_create.take() {
            anyhow::bail!(message);
        }
        let window = Arc::new(HeadlessWindow {
            spec: spec.clone(),
            journal: Arc::downgrade(&self.journal),
            fail_show: journal.fail_next_show.take(),
            state: Mutex::new(WindowState::default()),
        });
        journal.windows.retain(|_, w| w.strong_count() > 0);
        journal.windows.insert(spec.id, Arc::downgrade(&window));
        Ok(window)
    }

    fn show_error(&self, title: &str, message: &str) {
        tracing::debug!(title, message, "Headless error notification");
        self.journal.lock().events.push(HeadlessEvent::Error {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

impl std::fmt::Debug for HeadlessWindowFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let journal = self.journal.lock();
        f.debug_struct("HeadlessWindowFactory")
            .field("events", &journal.events.len())
            .field("windows", &journal.windows.len())
            .finish()
    }
}

type ClosedHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct WindowState {
    visible: bool,
    closed: bool,
    on_closed: Option<ClosedHandler>,
}

/// A window that only exists in memory.
pub struct HeadlessWindow {
    spec: WindowSpec,
    journal: Weak<Mutex<Journal>>,
    fail_show: Option<String>,
    state: Mutex<WindowState>,
}

impl HeadlessWindow {
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Behave as if the user closed the window from the title bar.
    pub fn simulate_user_close(&self) {
        let handler = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            state.on_closed.clone()
        };
        // The handler cascades into child windows first; this window is
        // journalled as closed after them.
        if let Some(handler) = handler {
            handler();
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.visible = false;
            state.on_closed = None;
        }
        self.journal(HeadlessEvent::Closed { id: self.spec.id });
    }

    fn journal(&self, event: HeadlessEvent) {
        if let Some(journal) = self.journal.upgrade() {
            journal.lock().events.push(event);
        }
    }
}

impl Window for HeadlessWindow {
    fn show(&self) -> anyhow::Result<()> {
        if let Some(message) = &self.fail_show {
            anyhow::bail!("{message}");
        }
        self.state.lock().visible = true;
        self.journal(HeadlessEvent::Shown {
            id: self.spec.id,
            title: self.spec.title.clone(),
        });
        Ok(())
    }

    fn close(&self) {
        self.mark_closed();
    }

    fn set_closed_handler(&self, handler: Box<dyn Fn() + Send + Sync>) {
        self.state.lock().on_closed = Some(Arc::from(handler));
    }
}

impl std::fmt::Debug for HeadlessWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessWindow")
            .field("id", &self.spec.id)
            .field("title", &self.spec.title)
            .field("closed", &self.is_closed())
            .finish()
    }
}
