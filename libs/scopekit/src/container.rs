//! Container abstraction - service registrations and the scope tree they resolve into
//!
//! Registrations are keyed by type and carry a [`Lifetime`]. A [`ScopeHandle`]
//! is a node of the scope tree: it owns the instances whose lifetime is bound
//! to it, sees typed values provided to it or to any ancestor, and disposes its
//! children (depth-first) before itself.
//!
//! Ownership: a child holds a strong reference to its parent and the parent only
//! weak references to its children, so dropping handles never leaks a branch.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::ResolutionError;
use crate::tag::{ScopeTag, TagMatcher};

/// Type-erased service instance.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&ScopeHandle) -> anyhow::Result<AnyInstance> + Send + Sync>;
type ReleaseHook = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

/// How long a resolved instance lives and who shares it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// A new instance per resolve call.
    Transient,
    /// One instance process-wide, owned by the root scope.
    Singleton,
    /// One instance per requesting scope.
    PerScope,
    /// One instance per nearest ancestor scope whose tag matches.
    PerMatchingTag(TagMatcher),
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    lifetime: Lifetime,
    factory: Factory,
    on_release: Option<ReleaseHook>,
}

#[derive(Default)]
struct ServiceRegistry {
    entries: HashMap<TypeId, Registration>,
}

/// Collects registrations; [`ContainerBuilder::build`] freezes them.
#[derive(Default)]
pub struct ContainerBuilder {
    entries: HashMap<TypeId, Registration>,
}

/// Handle returned by the `register_*` methods to refine a registration.
pub struct ServiceRegistration<'a, T> {
    entry: &'a mut Registration,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ServiceRegistration<'_, T> {
    /// Run `hook` on every instance owned by a scope when that scope is disposed.
    ///
    /// A transient instance is released earlier, on a later transient resolve
    /// in the same scope, once only the scope still holds it.
    pub fn on_release<F>(self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.entry.on_release = Some(Arc::new(move |any: &(dyn Any + Send + Sync)| {
            if let Some(instance) = any.downcast_ref::<T>() {
                hook(instance);
            }
        }));
        self
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, lifetime: Lifetime, factory: F) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |scope| factory(scope).map(|v| Arc::new(v) as AnyInstance));
        self.insert(Registration {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            lifetime,
            factory,
            on_release: None,
        })
    }

    fn insert<T>(&mut self, registration: Registration) -> ServiceRegistration<'_, T> {
        let entry = match self.entries.entry(registration.type_id) {
            Entry::Occupied(mut existing) => {
                tracing::debug!(
                    service = registration.type_name,
                    "Replacing existing registration"
                );
                existing.insert(registration);
                existing.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(registration),
        };
        ServiceRegistration {
            entry,
            _marker: PhantomData,
        }
    }

    pub fn register_transient<T, F>(&mut self, factory: F) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(Lifetime::Transient, factory)
    }

    pub fn register_singleton<T, F>(&mut self, factory: F) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(Lifetime::Singleton, factory)
    }

    pub fn register_scoped<T, F>(&mut self, factory: F) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(Lifetime::PerScope, factory)
    }

    pub fn register_per_matching_tag<T, F>(
        &mut self,
        matcher: TagMatcher,
        factory: F,
    ) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&ScopeHandle) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(Lifetime::PerMatchingTag(matcher), factory)
    }

    /// Register a ready-made value as a singleton.
    pub fn register_instance<T>(&mut self, value: T) -> ServiceRegistration<'_, T>
    where
        T: Send + Sync + 'static,
    {
        let instance: AnyInstance = Arc::new(value);
        self.insert(Registration {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            lifetime: Lifetime::Singleton,
            factory: Arc::new(move |_| Ok(instance.clone())),
            on_release: None,
        })
    }

    pub fn build(self) -> Container {
        let registry = Arc::new(ServiceRegistry {
            entries: self.entries,
        });
        tracing::debug!(services = registry.entries.len(), "Container built");
        let root = ScopeHandle::new_root(registry.clone());
        Container { registry, root }
    }
}

/// A built container: the frozen registrations plus the root of the scope tree.
#[derive(Clone)]
pub struct Container {
    registry: Arc<ServiceRegistry>,
    root: ScopeHandle,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn root(&self) -> ScopeHandle {
        self.root.clone()
    }

    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.registry
            .entries
            .get(&TypeId::of::<T>())
            .map(|r| r.lifetime.clone())
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.registry.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn registered_count(&self) -> usize {
        self.registry.entries.len()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&'static str> =
            self.registry.entries.values().map(|r| r.type_name).collect();
        services.sort_unstable();
        f.debug_struct("Container")
            .field("services", &services)
            .field("root", &self.root.id())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Scope tree
// ----------------------------------------------------------------------------

/// Unique id of a scope node, for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

struct OwnedInstance {
    instance: AnyInstance,
    release: ReleaseHook,
    transient: bool,
}

/// Take the transient instances no consumer holds any more.
fn take_released_transients(owned: &mut Vec<OwnedInstance>) -> Vec<OwnedInstance> {
    let (released, kept): (Vec<_>, Vec<_>) = owned
        .drain(..)
        .partition(|o| o.transient && Arc::strong_count(&o.instance) == 1);
    *owned = kept;
    released
}

#[derive(Default)]
struct NodeState {
    disposed: bool,
    instances: HashMap<TypeId, AnyInstance>,
    owned: Vec<OwnedInstance>,
    provided: HashMap<TypeId, AnyInstance>,
    children: Vec<Weak<ScopeNode>>,
}

struct ScopeNode {
    id: ScopeId,
    tag: ScopeTag,
    parent: Option<Arc<ScopeNode>>,
    registry: Arc<ServiceRegistry>,
    state: Mutex<NodeState>,
}

impl Drop for ScopeNode {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.disposed {
            return;
        }
        // Never disposed explicitly: still honour release hooks of owned instances.
        for owned in state.owned.drain(..).rev() {
            (owned.release)(&*owned.instance);
        }
    }
}

/// Opaque, cheaply clonable handle onto one node of the scope tree.
#[derive(Clone)]
pub struct ScopeHandle {
    node: Arc<ScopeNode>,
}

thread_local! {
    static RESOLVING: RefCell<Vec<(TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the current type off the per-thread resolution path on drop.
struct ResolvingGuard;

impl ResolvingGuard {
    fn enter(type_id: TypeId, name: &'static str) -> Result<Self, ResolutionError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(t, _)| *t == type_id) {
                let mut path: Vec<&'static str> = stack.iter().map(|(_, n)| *n).collect();
                path.push(name);
                return Err(ResolutionError::CircularDependency { path });
            }
            stack.push((type_id, name));
            Ok(ResolvingGuard)
        })
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl ScopeHandle {
    fn new_root(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            node: Arc::new(ScopeNode {
                id: ScopeId::next(),
                tag: ScopeTag::root(),
                parent: None,
                registry,
                state: Mutex::new(NodeState::default()),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.node.id
    }

    pub fn tag(&self) -> &ScopeTag {
        &self.node.tag
    }

    pub fn parent(&self) -> Option<ScopeHandle> {
        self.node.parent.as_ref().map(|p| ScopeHandle { node: p.clone() })
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    pub fn root(&self) -> ScopeHandle {
        let mut node = self.node.clone();
        while let Some(parent) = node.parent.clone() {
            node = parent;
        }
        ScopeHandle { node }
    }

    pub fn is_disposed(&self) -> bool {
        self.node.state.lock().disposed
    }

    pub fn ptr_eq(&self, other: &ScopeHandle) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Number of live, undisposed child scopes.
    pub fn child_count(&self) -> usize {
        self.node
            .state
            .lock()
            .children
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.state.lock().disposed)
            .count()
    }

    /// Tags from this scope up to the root, inclusive.
    pub fn tag_path(&self) -> Vec<ScopeTag> {
        let mut tags = vec![self.node.tag.clone()];
        let mut cursor = self.node.parent.clone();
        while let Some(node) = cursor {
            tags.push(node.tag.clone());
            cursor = node.parent.clone();
        }
        tags
    }

    /// Nearest scope (self first, then ancestors) whose tag satisfies `matcher`.
    pub fn find_ancestor(&self, matcher: &TagMatcher) -> Option<ScopeHandle> {
        let mut cursor = Some(self.node.clone());
        while let Some(node) = cursor {
            if matcher.matches(&node.tag) {
                return Some(ScopeHandle { node });
            }
            cursor = node.parent.clone();
        }
        None
    }

    pub fn is_descendant_of(&self, matcher: &TagMatcher) -> bool {
        self.find_ancestor(matcher).is_some()
    }

    /// Lifetime registered for `T`, if any.
    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.lifetime_of_id(TypeId::of::<T>())
    }

    pub(crate) fn lifetime_of_id(&self, type_id: TypeId) -> Option<Lifetime> {
        self.node
            .registry
            .entries
            .get(&type_id)
            .map(|r| r.lifetime.clone())
    }

    pub fn create_child(&self, tag: ScopeTag) -> Result<ScopeHandle, ResolutionError> {
        let mut state = self.node.state.lock();
        if state.disposed {
            return Err(ResolutionError::ScopeDisposed {
                type_name: "child scope",
                scope: self.describe(),
            });
        }
        let child = Arc::new(ScopeNode {
            id: ScopeId::next(),
            tag,
            parent: Some(self.node.clone()),
            registry: self.node.registry.clone(),
            state: Mutex::new(NodeState::default()),
        });
        state.children.retain(|c| c.strong_count() > 0);
        state.children.push(Arc::downgrade(&child));
        drop(state);

        tracing::debug!(
            scope = %child.id,
            parent = %self.node.id,
            tag = %child.tag,
            "Scope created"
        );
        Ok(ScopeHandle { node: child })
    }

    /// Make `value` resolvable as `T` from this scope and its descendants.
    pub fn provide<T: Send + Sync + 'static>(&self, value: T) {
        self.provide_arc(Arc::new(value));
    }

    pub fn provide_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        let mut state = self.node.state.lock();
        if state.disposed {
            tracing::warn!(scope = %self.node.id, value = type_name::<T>(), "Ignoring value provided to a disposed scope");
            return;
        }
        state.provided.insert(TypeId::of::<T>(), value as AnyInstance);
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolutionError> {
        let name = type_name::<T>();
        let instance = self.resolve_any(TypeId::of::<T>(), name)?;
        instance
            .downcast::<T>()
            .map_err(|_| ResolutionError::TypeMismatch { type_name: name })
    }

    /// Like [`ScopeHandle::resolve`], but unregistered types yield `None`.
    ///
    /// Other failures (a factory error, a disposed scope) are logged and also
    /// yield `None`.
    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.resolve::<T>() {
            Ok(v) => Some(v),
            Err(e) if e.is_not_registered() => None,
            Err(e) => {
                tracing::debug!(service = type_name::<T>(), error = %e, "try_resolve failed");
                None
            }
        }
    }

    /// Resolve `T` with its registered factory, sharing one instance per nearest
    /// ancestor matching `matcher` regardless of the registered lifetime.
    pub fn resolve_tag_scoped<T: Send + Sync + 'static>(
        &self,
        matcher: &TagMatcher,
    ) -> Result<Arc<T>, ResolutionError> {
        let name = type_name::<T>();
        let type_id = TypeId::of::<T>();
        self.ensure_alive(name)?;
        let registration = self
            .node
            .registry
            .entries
            .get(&type_id)
            .ok_or(ResolutionError::NotRegistered { type_name: name })?;
        let owner = self.tag_owner(matcher, name);
        owner
            .get_or_create(type_id, registration)?
            .downcast::<T>()
            .map_err(|_| ResolutionError::TypeMismatch { type_name: name })
    }

    fn ensure_alive(&self, type_name: &'static str) -> Result<(), ResolutionError> {
        if self.is_disposed() {
            return Err(ResolutionError::ScopeDisposed {
                type_name,
                scope: self.describe(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.node.id, self.node.tag)
    }

    fn find_provided(&self, type_id: TypeId) -> Option<AnyInstance> {
        let mut cursor = Some(self.node.clone());
        while let Some(node) = cursor {
            if let Some(v) = node.state.lock().provided.get(&type_id) {
                return Some(v.clone());
            }
            cursor = node.parent.clone();
        }
        None
    }

    fn tag_owner(&self, matcher: &TagMatcher, service: &'static str) -> ScopeHandle {
        match self.find_ancestor(matcher) {
            Some(owner) => owner,
            None => {
                tracing::warn!(
                    service,
                    required = %matcher,
                    scope = %self.node.id,
                    "No ancestor scope matches; binding tag-scoped instance to the root"
                );
                self.root()
            }
        }
    }

    fn resolve_any(
        &self,
        type_id: TypeId,
        name: &'static str,
    ) -> Result<AnyInstance, ResolutionError> {
        self.ensure_alive(name)?;

        if let Some(v) = self.find_provided(type_id) {
            return Ok(v);
        }

        let registration = self
            .node
            .registry
            .entries
            .get(&type_id)
            .ok_or(ResolutionError::NotRegistered { type_name: name })?;

        match &registration.lifetime {
            Lifetime::Transient => {
                let instance = self.create(registration)?;
                if let Some(release) = &registration.on_release {
                    let released = {
                        let mut state = self.node.state.lock();
                        let released = take_released_transients(&mut state.owned);
                        state.owned.push(OwnedInstance {
                            instance: instance.clone(),
                            release: release.clone(),
                            transient: true,
                        });
                        released
                    };
                    for owned in released {
                        (owned.release)(&*owned.instance);
                    }
                }
                Ok(instance)
            }
            Lifetime::Singleton => self.root().get_or_create(type_id, registration),
            Lifetime::PerScope => self.get_or_create(type_id, registration),
            Lifetime::PerMatchingTag(matcher) => self
                .tag_owner(matcher, registration.type_name)
                .get_or_create(type_id, registration),
        }
    }

    /// Return the instance cached at this (owning) scope or create and cache it.
    fn get_or_create(
        &self,
        type_id: TypeId,
        registration: &Registration,
    ) -> Result<AnyInstance, ResolutionError> {
        {
            let state = self.node.state.lock();
            if state.disposed {
                return Err(ResolutionError::ScopeDisposed {
                    type_name: registration.type_name,
                    scope: self.describe(),
                });
            }
            if let Some(hit) = state.instances.get(&type_id) {
                tracing::trace!(service = registration.type_name, scope = %self.node.id, "Resolved cached instance");
                return Ok(hit.clone());
            }
        }

        // The factory runs without the lock held: it may resolve from this scope.
        let created = self.create(registration)?;

        let mut state = self.node.state.lock();
        if state.disposed {
            return Err(ResolutionError::ScopeDisposed {
                type_name: registration.type_name,
                scope: self.describe(),
            });
        }
        let winner = state
            .instances
            .entry(type_id)
            .or_insert_with(|| created.clone())
            .clone();
        if Arc::ptr_eq(&winner, &created) {
            if let Some(release) = &registration.on_release {
                state.owned.push(OwnedInstance {
                    instance: created.clone(),
                    release: release.clone(),
                    transient: false,
                });
            }
            tracing::debug!(service = registration.type_name, scope = %self.node.id, tag = %self.node.tag, "Instance bound to scope");
        }
        Ok(winner)
    }

    fn create(&self, registration: &Registration) -> Result<AnyInstance, ResolutionError> {
        let _guard = ResolvingGuard::enter(registration.type_id, registration.type_name)?;
        (registration.factory)(self).map_err(|source| match source.downcast::<ResolutionError>() {
            // Keep nested cycle reports intact instead of wrapping them per level.
            Ok(cycle @ ResolutionError::CircularDependency { .. }) => cycle,
            Ok(other) => ResolutionError::Factory {
                type_name: registration.type_name,
                source: other.into(),
            },
            Err(source) => ResolutionError::Factory {
                type_name: registration.type_name,
                source,
            },
        })
    }

    /// Dispose this scope: children first, then release hooks of owned
    /// instances in reverse creation order. Idempotent.
    pub fn dispose(&self) {
        loop {
            let children: Vec<Arc<ScopeNode>> = {
                let mut state = self.node.state.lock();
                if state.disposed {
                    return;
                }
                let children: Vec<Arc<ScopeNode>> =
                    state.children.drain(..).filter_map(|c| c.upgrade()).collect();
                children
            };
            if children.is_empty() {
                break;
            }
            for child in children.into_iter().rev() {
                ScopeHandle { node: child }.dispose();
            }
        }

        let (owned, instances, provided) = {
            let mut state = self.node.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.owned),
                std::mem::take(&mut state.instances),
                std::mem::take(&mut state.provided),
            )
        };

        for owned in owned.into_iter().rev() {
            (owned.release)(&*owned.instance);
        }
        // Dropped outside the lock: provided values may hold handles to this scope.
        drop(instances);
        drop(provided);

        tracing::debug!(scope = %self.node.id, tag = %self.node.tag, "Scope disposed");
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.node.id)
            .field("tag", &self.node.tag)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::ScopeKind;
    use std::sync::atomic::AtomicUsize;

    struct Counter(usize);

    struct OrderDraft {
        lines: Mutex<Vec<String>>,
    }

    fn counting_factory(
        seq: &Arc<AtomicUsize>,
    ) -> impl Fn(&ScopeHandle) -> anyhow::Result<Counter> + Send + Sync + 'static {
        let seq = seq.clone();
        move |_| Ok(Counter(seq.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn transient_creates_new_instances_and_scoped_caches_per_scope() {
        let seq = Arc::new(AtomicUsize::new(0));
        let mut b = ContainerBuilder::new();
        b.register_transient::<Counter, _>(counting_factory(&seq));
        b.register_scoped::<String, _>(|scope| Ok(format!("for {}", scope.tag())));
        let c = b.build();

        let root = c.root();
        let a = root.resolve::<Counter>().unwrap();
        let b2 = root.resolve::<Counter>().unwrap();
        assert_ne!(a.0, b2.0);

        let child = root.create_child(ScopeTag::database()).unwrap();
        let s1 = child.resolve::<String>().unwrap();
        let s2 = child.resolve::<String>().unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(*s1, "for Database");
        let from_root = root.resolve::<String>().unwrap();
        assert!(!Arc::ptr_eq(&s1, &from_root));
    }

    #[test]
    fn singleton_is_shared_by_every_branch() {
        let seq = Arc::new(AtomicUsize::new(0));
        let mut b = ContainerBuilder::new();
        b.register_singleton::<Counter, _>(counting_factory(&seq));
        let c = b.build();

        let x = c.root().create_child(ScopeTag::workflow("x")).unwrap();
        let y = c.root().create_child(ScopeTag::workflow("y")).unwrap();
        assert!(Arc::ptr_eq(
            &x.resolve::<Counter>().unwrap(),
            &y.resolve::<Counter>().unwrap()
        ));
        assert_eq!(seq.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tag_scoped_instance_shared_under_nearest_matching_ancestor() {
        let mut b = ContainerBuilder::new();
        b.register_per_matching_tag::<OrderDraft, _>(
            TagMatcher::kind(ScopeKind::Workflow),
            |_| {
                Ok(OrderDraft {
                    lines: Mutex::new(Vec::new()),
                })
            },
        );
        let c = b.build();

        let wf_x = c.root().create_child(ScopeTag::workflow("x")).unwrap();
        let w1 = wf_x.create_child(ScopeTag::window("1")).unwrap();
        let w2 = wf_x.create_child(ScopeTag::window("2")).unwrap();
        let nested = w2.create_child(ScopeTag::window("3")).unwrap();

        let d1 = w1.resolve::<OrderDraft>().unwrap();
        let d2 = nested.resolve::<OrderDraft>().unwrap();
        assert!(Arc::ptr_eq(&d1, &d2));
        d1.lines.lock().push("widget".into());
        assert_eq!(d2.lines.lock().len(), 1);

        let wf_y = c.root().create_child(ScopeTag::workflow("y")).unwrap();
        let w3 = wf_y.create_child(ScopeTag::window("4")).unwrap();
        let d3 = w3.resolve::<OrderDraft>().unwrap();
        assert!(!Arc::ptr_eq(&d1, &d3));
        assert!(d3.lines.lock().is_empty());
    }

    #[test]
    fn tag_scoped_without_matching_ancestor_binds_to_root() {
        let mut b = ContainerBuilder::new();
        b.register_per_matching_tag::<Counter, _>(TagMatcher::kind(ScopeKind::Workflow), |_| {
            Ok(Counter(7))
        });
        let c = b.build();

        let a = c.root().create_child(ScopeTag::database()).unwrap();
        let b2 = c.root().create_child(ScopeTag::window("w")).unwrap();
        assert!(Arc::ptr_eq(
            &a.resolve::<Counter>().unwrap(),
            &b2.resolve::<Counter>().unwrap()
        ));
    }

    #[test]
    fn resolve_tag_scoped_uses_requested_matcher() {
        let seq = Arc::new(AtomicUsize::new(0));
        let mut b = ContainerBuilder::new();
        b.register_transient::<Counter, _>(counting_factory(&seq));
        let c = b.build();

        let db = c.root().create_child(ScopeTag::database()).unwrap();
        let inner = db.create_child(ScopeTag::window("w")).unwrap();
        let m = TagMatcher::exact(ScopeTag::database());
        let a = inner.resolve_tag_scoped::<Counter>(&m).unwrap();
        let b2 = db.resolve_tag_scoped::<Counter>(&m).unwrap();
        assert!(Arc::ptr_eq(&a, &b2));
    }

    #[test]
    fn provided_values_flow_down_not_up() {
        let c = ContainerBuilder::new().build();
        let parent = c.root().create_child(ScopeTag::workflow("x")).unwrap();
        let child = parent.create_child(ScopeTag::window("w")).unwrap();
        parent.provide(42u32);

        assert_eq!(*child.resolve::<u32>().unwrap(), 42);
        assert!(c.root().try_resolve::<u32>().is_none());
    }

    #[test]
    fn descendant_matching_walks_parents_inclusive() {
        let c = ContainerBuilder::new().build();
        let wf = c.root().create_child(ScopeTag::workflow("x")).unwrap();
        let win = wf.create_child(ScopeTag::window("w")).unwrap();

        assert!(win.is_descendant_of(&TagMatcher::kind(ScopeKind::Window)));
        assert!(win.is_descendant_of(&TagMatcher::exact(ScopeTag::workflow("x"))));
        assert!(!win.is_descendant_of(&TagMatcher::exact(ScopeTag::workflow("y"))));
        assert!(win.is_descendant_of(&TagMatcher::kind(ScopeKind::Root)));
        assert_eq!(
            win.tag_path(),
            vec![ScopeTag::window("w"), ScopeTag::workflow("x"), ScopeTag::root()]
        );
    }

    #[test]
    fn dropped_transients_are_released_before_the_scope_ends() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut b = ContainerBuilder::new();
        let r = released.clone();
        b.register_transient::<Counter, _>(|_| Ok(Counter(0)))
            .on_release(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            });
        let c = b.build();
        let root = c.root();

        let held = root.resolve::<Counter>().unwrap();
        for _ in 0..3 {
            drop(root.resolve::<Counter>().unwrap());
        }
        // The last dropped one is swept by the next resolve or by dispose.
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(root.node.state.lock().owned.len(), 2);

        root.dispose();
        assert_eq!(released.load(Ordering::SeqCst), 4);
        drop(held);
    }

    #[test]
    fn dispose_releases_children_first_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut b = ContainerBuilder::new();
        let l = log.clone();
        b.register_scoped::<String, _>(|scope| Ok(scope.tag().to_key()))
            .on_release(move |s: &String| l.lock().push(s.clone()));
        let c = b.build();

        let parent = c.root().create_child(ScopeTag::workflow("p")).unwrap();
        let child = parent.create_child(ScopeTag::window("c")).unwrap();
        parent.resolve::<String>().unwrap();
        child.resolve::<String>().unwrap();

        parent.dispose();
        assert!(child.is_disposed());
        assert_eq!(*log.lock(), vec!["Window:c".to_string(), "Workflow:p".to_string()]);

        parent.dispose();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn disposed_scope_refuses_resolution_and_children() {
        let mut b = ContainerBuilder::new();
        b.register_transient::<u8, _>(|_| Ok(1));
        let c = b.build();
        let s = c.root().create_child(ScopeTag::database()).unwrap();
        s.dispose();

        assert!(matches!(
            s.resolve::<u8>(),
            Err(ResolutionError::ScopeDisposed { .. })
        ));
        assert!(s.create_child(ScopeTag::window("w")).is_err());
    }

    #[test]
    fn unregistered_type_reports_not_registered() {
        let c = ContainerBuilder::new().build();
        let err = c.root().resolve::<Counter>().err().unwrap();
        assert!(err.is_not_registered());
        assert!(c.root().try_resolve::<Counter>().is_none());
    }

    struct Ping(#[allow(dead_code)] Arc<Pong>);
    struct Pong(#[allow(dead_code)] Arc<Ping>);

    #[test]
    fn circular_dependencies_are_reported() {
        let mut b = ContainerBuilder::new();
        b.register_transient::<Ping, _>(|s| Ok(Ping(s.resolve::<Pong>()?)));
        b.register_transient::<Pong, _>(|s| Ok(Pong(s.resolve::<Ping>()?)));
        let c = b.build();

        match c.root().resolve::<Ping>() {
            Err(ResolutionError::CircularDependency { path }) => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected a cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn factory_errors_are_wrapped_with_type_name() {
        let mut b = ContainerBuilder::new();
        b.register_transient::<u16, _>(|_| anyhow::bail!("database offline"));
        let c = b.build();

        let err = c.root().resolve::<u16>().err().unwrap();
        assert!(matches!(err, ResolutionError::Factory { type_name: "u16", .. }));
    }
}
