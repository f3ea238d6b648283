//! # ScopeKit - Hierarchical Scopes and Window Lifecycles
//!
//! Tree-shaped ownership for services, sessions and windows.
//!
//! ## Features
//!
//! - **Scope tree**: every session and window owns a container scope; closing
//!   a node disposes its whole subtree, children first
//! - **Tag-scoped sharing**: one service instance per nearest ancestor scope
//!   whose tag matches (`Workflow:*`, `Database`, ...)
//! - **Session builders**: declare the services a unit of work needs and get
//!   commit/rollback and guaranteed teardown around it
//! - **Window lifecycle**: `Creating -> Open -> Closed`, cascading close,
//!   awaitable modal dialogs, in-window content navigation
//!
//! ## Example
//!
//! ```rust,ignore
//! use scopekit::{ContainerBuilder, ScopeKind, ScopeManager, TagMatcher};
//!
//! let mut services = ContainerBuilder::new();
//! services.register_per_matching_tag::<OrderDraft, _>(
//!     TagMatcher::kind(ScopeKind::Workflow),
//!     |_| Ok(OrderDraft::default()),
//! );
//! services.register_scoped::<OrderEditor, _>(|scope| OrderEditor::new(scope));
//!
//! let manager = ScopeManager::new(services.build(), window_factory, Default::default());
//! let workflow = manager.workflow_session("order-workflow").build()?;
//! let editor = workflow.open_window::<OrderEditor>()?;
//! ```

pub use async_trait::async_trait;

pub mod builder;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod event;
pub mod headless;
pub mod manager;
pub mod navigator;
pub mod session;
pub mod tag;
pub mod window;

pub use builder::{AppendService, ServiceSet, SessionBuilder};
pub use config::ScopeKitConfig;
pub use container::{AnyInstance, Container, ContainerBuilder, Lifetime, ScopeHandle, ScopeId};
pub use context::WindowContext;
pub use error::{NavigationError, ResolutionError, SessionError, WindowOperationError};
pub use event::{Event, Subscription};
pub use headless::{HeadlessEvent, HeadlessWindow, HeadlessWindowFactory};
pub use manager::ScopeManager;
pub use navigator::{CloseRequest, Navigator, NavigatorProperty};
pub use session::{ScopeSession, SessionClosed, SessionId, SharedUnitOfWork, UnitOfWork};
pub use tag::{ScopeKind, ScopeTag, TagMatcher, TagParseError};
pub use window::{
    AsAny, DialogResult, Lifecycle, OperationResult, ViewModel, Window, WindowClosed, WindowFactory,
    WindowId, WindowManager, WindowMetadata, WindowSpec,
};
