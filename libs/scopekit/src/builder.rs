//! Session builder - fluent definition of a scoped unit of work
//!
//! A [`SessionBuilder`] collects the tag of the session to create, the
//! services the unit of work needs, a configuration callback and the
//! save/rollback policy. `S` is the tuple of declared service types; it grows
//! one element per [`SessionBuilder::with_service`] call, up to four.
//!
//! ```ignore
//! manager
//!     .workflow_session("order-workflow")
//!     .with_service::<OrderDraft>()
//!     .with_service::<Catalog>()
//!     .auto_save(true)
//!     .execute(|(draft, catalog)| draft.add(catalog.find("widget")?))?;
//! ```
//!
//! `execute`/`execute_async` roll the session back and return
//! [`SessionError::RolledBack`] when the body fails, unless an `on_error`
//! handler was supplied. `execute_with_result`/`execute_with_result_async`
//! never fail: any error is handed to `on_error` or, without one, rolled back
//! and swallowed, and the caller's default is returned.

use std::any::{type_name, TypeId};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::container::{Lifetime, ScopeHandle};
use crate::error::{ResolutionError, SessionError};
use crate::session::{
    DisposeHook, ScopeSession, SessionParts, SessionRegistry, SharedUnitOfWork,
};
use crate::tag::ScopeTag;
use crate::window::WindowManager;

type ConfigureFn = Box<dyn FnOnce(&ScopeHandle) -> anyhow::Result<()> + Send>;
type ErrorHandler = Box<dyn FnOnce(&anyhow::Error) + Send>;

/// A service type declared on a builder.
pub type DeclaredService = (TypeId, &'static str);

/// Tuple of service types a builder resolves for its unit of work.
pub trait ServiceSet: 'static {
    /// What the unit of work receives: one `Arc` per declared type.
    type Resolved: Send + 'static;

    fn declared() -> Vec<DeclaredService>;

    fn resolve(session: &ScopeSession) -> Result<Self::Resolved, ResolutionError>;
}

impl ServiceSet for () {
    type Resolved = ();

    fn declared() -> Vec<DeclaredService> {
        Vec::new()
    }

    fn resolve(_session: &ScopeSession) -> Result<(), ResolutionError> {
        Ok(())
    }
}

macro_rules! impl_service_set {
    ($($t:ident),+) => {
        impl<$($t: Send + Sync + 'static),+> ServiceSet for ($($t,)+) {
            type Resolved = ($(Arc<$t>,)+);

            fn declared() -> Vec<DeclaredService> {
                vec![$((TypeId::of::<$t>(), type_name::<$t>())),+]
            }

            fn resolve(session: &ScopeSession) -> Result<Self::Resolved, ResolutionError> {
                Ok(($(session.resolve::<$t>()?,)+))
            }
        }
    };
}

impl_service_set!(T1);
impl_service_set!(T1, T2);
impl_service_set!(T1, T2, T3);
impl_service_set!(T1, T2, T3, T4);

/// Type-level "append `T` to the declared services". Not implemented for
/// four-element sets: beyond four, resolve from the built session.
pub trait AppendService<T> {
    type Output: ServiceSet;
}

macro_rules! impl_append_service {
    ($($t:ident),*) => {
        impl<$($t: Send + Sync + 'static,)* T: Send + Sync + 'static> AppendService<T> for ($($t,)*) {
            type Output = ($($t,)* T,);
        }
    };
}

impl_append_service!();
impl_append_service!(T1);
impl_append_service!(T1, T2);
impl_append_service!(T1, T2, T3);

enum Origin {
    Root {
        scope: ScopeHandle,
        windows: Arc<WindowManager>,
        registry: SessionRegistry,
    },
    Child(ScopeSession),
}

/// Fluent definition of a session. See the module docs.
#[must_use = "a session builder does nothing until built or executed"]
pub struct SessionBuilder<S = ()> {
    origin: Origin,
    tag: ScopeTag,
    configure: Vec<ConfigureFn>,
    auto_save: bool,
    auto_close_when_empty: bool,
    on_dispose: Vec<DisposeHook>,
    on_error: Option<ErrorHandler>,
    cancel: CancellationToken,
    /// Caller token of a child builder, linked to the session token at build.
    linked: Option<CancellationToken>,
    _services: PhantomData<fn() -> S>,
}

impl SessionBuilder<()> {
    pub(crate) fn root(
        scope: ScopeHandle,
        windows: Arc<WindowManager>,
        registry: SessionRegistry,
        tag: ScopeTag,
        auto_save: bool,
    ) -> Self {
        Self::with_origin(
            Origin::Root {
                scope,
                windows,
                registry,
            },
            tag,
            auto_save,
        )
    }

    pub(crate) fn child_of(parent: ScopeSession, tag: ScopeTag) -> Self {
        let auto_save = parent.auto_save();
        // Cancelling the parent cancels the child too.
        let cancel = parent.cancellation_token().clone();
        Self {
            cancel,
            ..Self::with_origin(Origin::Child(parent), tag, auto_save)
        }
    }

    fn with_origin(origin: Origin, tag: ScopeTag, auto_save: bool) -> Self {
        Self {
            origin,
            tag,
            configure: Vec::new(),
            auto_save,
            auto_close_when_empty: false,
            on_dispose: Vec::new(),
            on_error: None,
            cancel: CancellationToken::new(),
            linked: None,
            _services: PhantomData,
        }
    }
}

impl<S: ServiceSet> SessionBuilder<S> {
    pub fn tag(&self) -> &ScopeTag {
        &self.tag
    }

    /// Declare another service the unit of work receives.
    pub fn with_service<T>(self) -> SessionBuilder<<S as AppendService<T>>::Output>
    where
        S: AppendService<T>,
        T: Send + Sync + 'static,
    {
        SessionBuilder {
            origin: self.origin,
            tag: self.tag,
            configure: self.configure,
            auto_save: self.auto_save,
            auto_close_when_empty: self.auto_close_when_empty,
            on_dispose: self.on_dispose,
            on_error: self.on_error,
            cancel: self.cancel,
            linked: self.linked,
            _services: PhantomData,
        }
    }

    /// Run `configure` against the new scope before anything is resolved.
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&ScopeHandle) -> anyhow::Result<()> + Send + 'static,
    {
        self.configure.push(Box::new(configure));
        self
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Close the session once the last window opened in it closes.
    pub fn auto_close_when_empty(mut self, enabled: bool) -> Self {
        self.auto_close_when_empty = enabled;
        self
    }

    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_dispose.push(Box::new(hook));
        self
    }

    /// Handle a failed unit of work instead of rolling back.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&anyhow::Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Cancelling `token` cancels the session's token and pending async saves.
    ///
    /// A child session keeps following its parent's token as well.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        match self.origin {
            Origin::Child(_) => self.linked = Some(token),
            Origin::Root { .. } => self.cancel = token,
        }
        self
    }

    /// Materialise the session.
    ///
    /// Fails with [`SessionError::UnmatchedTagScope`] when a declared service
    /// is shared per matching tag but neither the new session nor any
    /// ancestor carries a matching tag.
    pub fn build(self) -> Result<ScopeSession, SessionError> {
        let SessionBuilder {
            origin,
            tag,
            configure,
            auto_save,
            auto_close_when_empty,
            on_dispose,
            on_error: _,
            cancel,
            linked,
            _services,
        } = self;

        let (parent_scope, parent, windows, registry) = match origin {
            Origin::Root {
                scope,
                windows,
                registry,
            } => (scope, None, windows, Some(registry)),
            Origin::Child(parent) => {
                if !parent.is_active() {
                    return Err(SessionError::Inactive {
                        session: format!("{} ({})", parent.id(), parent.tag()),
                    });
                }
                (
                    parent.scope().clone(),
                    Some(parent.clone()),
                    parent.window_manager().clone(),
                    parent.registry(),
                )
            }
        };

        validate_tag_scoped::<S>(&parent_scope, &tag)?;

        let scope = parent_scope.create_child(tag.clone())?;
        for callback in configure {
            if let Err(source) = callback(&scope) {
                scope.dispose();
                return Err(SessionError::Configure { source });
            }
        }

        let unit_of_work = match scope.resolve::<SharedUnitOfWork>() {
            Ok(uow) => Some((*uow).clone()),
            Err(e) if e.is_not_registered() => None,
            Err(e) => {
                scope.dispose();
                return Err(e.into());
            }
        };

        Ok(ScopeSession::new(SessionParts {
            tag,
            scope,
            parent,
            windows,
            registry,
            unit_of_work,
            auto_save,
            auto_close_when_empty,
            cancel: session_token(&cancel, linked),
            on_dispose,
        }))
    }

    /// Build, run `action` with the declared services, save if auto-saving.
    ///
    /// On failure `on_error` is called if set; otherwise the session is rolled
    /// back and [`SessionError::RolledBack`] returned. The session is closed in
    /// every case.
    pub fn execute<F>(mut self, action: F) -> Result<(), SessionError>
    where
        F: FnOnce(S::Resolved) -> anyhow::Result<()>,
    {
        let on_error = self.on_error.take();
        let session = self.build()?;
        let _close = CloseOnDrop::new(session.clone());

        match run::<S, _, _>(&session, action) {
            Ok(()) => Ok(()),
            Err(error) => handle_failure(&session, error, on_error),
        }
    }

    pub async fn execute_async<F, Fut>(mut self, action: F) -> Result<(), SessionError>
    where
        F: FnOnce(S::Resolved) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let on_error = self.on_error.take();
        let session = self.build()?;
        let close = CloseOnDrop::new(session.clone());

        let result = match run_async::<S, _, _, _>(&session, action).await {
            Ok(()) => Ok(()),
            Err(error) => handle_failure(&session, error, on_error),
        };
        close.disarm();
        session.close_async().await;
        result
    }

    /// Like [`SessionBuilder::execute`], but returns `default` on any failure
    /// instead of an error, even without an `on_error` handler.
    pub fn execute_with_result<R, F>(mut self, action: F, default: R) -> R
    where
        F: FnOnce(S::Resolved) -> anyhow::Result<R>,
    {
        let on_error = self.on_error.take();
        let tag = self.tag.clone();
        let session = match self.build() {
            Ok(session) => session,
            Err(e) => {
                swallow(&tag, None, e.into(), on_error);
                return default;
            }
        };
        let _close = CloseOnDrop::new(session.clone());

        match run::<S, _, _>(&session, action) {
            Ok(value) => value,
            Err(error) => {
                swallow(&tag, Some(&session), error, on_error);
                default
            }
        }
    }

    pub async fn execute_with_result_async<R, F, Fut>(mut self, action: F, default: R) -> R
    where
        F: FnOnce(S::Resolved) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let on_error = self.on_error.take();
        let tag = self.tag.clone();
        let session = match self.build() {
            Ok(session) => session,
            Err(e) => {
                swallow(&tag, None, e.into(), on_error);
                return default;
            }
        };
        let close = CloseOnDrop::new(session.clone());

        let value = match run_async::<S, _, _, _>(&session, action).await {
            Ok(value) => value,
            Err(error) => {
                swallow(&tag, Some(&session), error, on_error);
                default
            }
        };
        close.disarm();
        session.close_async().await;
        value
    }
}

impl<S> std::fmt::Debug for SessionBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("tag", &self.tag)
            .field("services", &type_name::<S>())
            .field("auto_save", &self.auto_save)
            .field("auto_close_when_empty", &self.auto_close_when_empty)
            .field("child", &matches!(self.origin, Origin::Child(_)))
            .finish()
    }
}

fn validate_tag_scoped<S: ServiceSet>(
    parent: &ScopeHandle,
    tag: &ScopeTag,
) -> Result<(), SessionError> {
    for (type_id, service) in S::declared() {
        if let Some(Lifetime::PerMatchingTag(required)) = parent.lifetime_of_id(type_id) {
            if !required.matches(tag) && !parent.is_descendant_of(&required) {
                return Err(SessionError::UnmatchedTagScope {
                    service,
                    required,
                    tag: tag.clone(),
                });
            }
        }
    }
    Ok(())
}

fn run<S, F, R>(session: &ScopeSession, action: F) -> anyhow::Result<R>
where
    S: ServiceSet,
    F: FnOnce(S::Resolved) -> anyhow::Result<R>,
{
    let services = S::resolve(session)?;
    let value = action(services)?;
    session.save_if_auto_save()?;
    Ok(value)
}

async fn run_async<S, F, Fut, R>(session: &ScopeSession, action: F) -> anyhow::Result<R>
where
    S: ServiceSet,
    F: FnOnce(S::Resolved) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let services = S::resolve(session)?;
    let value = action(services).await?;
    session
        .save_if_auto_save_async(session.cancellation_token())
        .await?;
    Ok(value)
}

/// Token of a new session: a child of `inherited`, also cancelled when `linked` fires.
fn session_token(
    inherited: &CancellationToken,
    linked: Option<CancellationToken>,
) -> CancellationToken {
    let token = inherited.child_token();
    let Some(linked) = linked else {
        return token;
    };
    if linked.is_cancelled() {
        token.cancel();
        return token;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let session = token.clone();
            // Ends with whichever token is cancelled first; closing the session cancels its token.
            handle.spawn(async move {
                tokio::select! {
                    _ = linked.cancelled() => session.cancel(),
                    _ = session.cancelled() => {}
                }
            });
        }
        Err(_) => {
            tracing::warn!(
                "No tokio runtime; the caller's cancellation token is not linked to the child session"
            );
        }
    }
    token
}

fn handle_failure(
    session: &ScopeSession,
    error: anyhow::Error,
    on_error: Option<ErrorHandler>,
) -> Result<(), SessionError> {
    match on_error {
        Some(handler) => {
            tracing::debug!(session_id = %session.id(), error = %error, "Unit of work failed, handled by on_error");
            handler(&error);
            Ok(())
        }
        None => {
            session.rollback();
            Err(SessionError::RolledBack { source: error })
        }
    }
}

fn swallow(
    tag: &ScopeTag,
    session: Option<&ScopeSession>,
    error: anyhow::Error,
    on_error: Option<ErrorHandler>,
) {
    match on_error {
        Some(handler) => handler(&error),
        None => {
            if let Some(session) = session {
                session.rollback();
            }
            tracing::warn!(tag = %tag, error = %format!("{error:#}"), "Unit of work failed; returning default result");
        }
    }
}

/// Closes the session when dropped, unless disarmed.
struct CloseOnDrop(Option<ScopeSession>);

impl CloseOnDrop {
    fn new(session: ScopeSession) -> Self {
        Self(Some(session))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            session.close();
        }
    }
}
