//! Cross-component behaviour of sessions, windows, dialogs and navigation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scopekit::{
    ContainerBuilder, DialogResult, HeadlessWindowFactory, Lifecycle, Navigator, ScopeKind,
    ScopeKitConfig, ScopeManager, ScopeTag, SessionError, TagMatcher, ViewModel, WindowContext,
    WindowId, WindowManager,
};

/// Shared per workflow.
#[derive(Default)]
struct Draft {
    lines: Mutex<Vec<String>>,
}

#[derive(Default)]
struct Disposals(AtomicUsize);

struct DraftView {
    draft: Arc<Draft>,
}

impl ViewModel for DraftView {}

struct Shell {
    context: Arc<WindowContext>,
    navigator: Arc<Navigator>,
}

impl ViewModel for Shell {}

struct Prompt {
    context: Arc<WindowContext>,
    question: Arc<String>,
}

impl ViewModel for Prompt {}

macro_rules! page {
    ($name:ident) => {
        struct $name {
            disposals: Arc<Disposals>,
        }

        impl ViewModel for $name {
            fn dispose(&self) {
                self.disposals.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    };
}

page!(PageA);
page!(PageB);
page!(PageC);

struct Harness {
    factory: Arc<HeadlessWindowFactory>,
    manager: ScopeManager,
    disposals: Arc<Disposals>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ScopeKitConfig::default())
    }

    fn with_config(config: ScopeKitConfig) -> Self {
        let disposals = Arc::new(Disposals::default());
        let mut b = ContainerBuilder::new();
        b.register_instance(disposals.clone());
        b.register_per_matching_tag::<Draft, _>(TagMatcher::kind(ScopeKind::Workflow), |_| {
            Ok(Draft::default())
        });
        b.register_scoped::<DraftView, _>(|s| {
            Ok(DraftView {
                draft: s.resolve::<Draft>()?,
            })
        });
        b.register_scoped::<Shell, _>(|s| {
            Ok(Shell {
                context: s.resolve::<WindowContext>()?,
                navigator: s.resolve::<Navigator>()?,
            })
        });
        b.register_scoped::<Prompt, _>(|s| {
            Ok(Prompt {
                context: s.resolve::<WindowContext>()?,
                question: s.resolve::<String>()?,
            })
        });
        macro_rules! register_page {
            ($name:ident) => {
                b.register_transient::<$name, _>(|s| {
                    Ok($name {
                        disposals: (*s.resolve::<Arc<Disposals>>()?).clone(),
                    })
                });
            };
        }
        register_page!(PageA);
        register_page!(PageB);
        register_page!(PageC);

        let factory = Arc::new(HeadlessWindowFactory::new());
        let manager = ScopeManager::new(b.build(), factory.clone(), config);
        Self {
            factory,
            manager,
            disposals,
        }
    }

    fn windows(&self) -> &Arc<WindowManager> {
        self.manager.window_manager()
    }

    fn view_model<T: ViewModel, R>(&self, id: WindowId, f: impl FnOnce(&T) -> R) -> R {
        let vm = self.windows().metadata(id).unwrap().view_model().unwrap();
        f((*vm).as_any().downcast_ref::<T>().unwrap())
    }
}

#[test]
fn closing_a_parent_closes_descendants_first() {
    let h = Harness::new();
    let wm = h.windows();
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = order.clone();
    let _sub = wm.subscribe_window_closed(move |closed| o.lock().push(closed.id));

    let root = wm.open_window::<Shell>().unwrap();
    let child = wm.open_child_window::<Shell>(root).unwrap();
    let grandchild = wm.open_child_window::<Shell>(child).unwrap();
    let sibling = wm.open_child_window::<Shell>(root).unwrap();
    assert_eq!(wm.metadata(grandchild).unwrap().parent_id(), Some(child));

    let root_meta = wm.metadata(root).unwrap();
    wm.close_window(root).unwrap();

    let order = order.lock().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last(), Some(&root));
    let pos = |id| order.iter().position(|x| *x == id).unwrap();
    assert!(pos(grandchild) < pos(child));
    assert!(pos(child) < pos(root));
    assert!(pos(sibling) < pos(root));

    assert_eq!(h.factory.closed(), order);
    assert_eq!(root_meta.lifecycle(), Lifecycle::Closed);
    assert_eq!(wm.window_count(), 0);
}

#[test]
fn user_closing_a_parent_window_cascades_too() {
    let h = Harness::new();
    let wm = h.windows();
    let parent = wm.open_window::<Shell>().unwrap();
    let child = wm.open_child_window::<Shell>(parent).unwrap();

    h.factory.window(parent).unwrap().simulate_user_close();

    assert_eq!(h.factory.closed(), vec![child, parent]);
    assert!(!wm.is_window_open(parent));
    assert!(!wm.is_window_open(child));
}

#[test]
fn workflow_tag_shares_one_instance_per_workflow() {
    let h = Harness::new();
    let x = h.manager.workflow_session("x").build().unwrap();
    let y = h.manager.workflow_session("y").build().unwrap();

    let x1 = x.open_window::<DraftView>().unwrap();
    let x2 = x.open_window::<DraftView>().unwrap();
    let y1 = y.open_window::<DraftView>().unwrap();

    let draft = |id| h.view_model::<DraftView, _>(id, |vm| vm.draft.clone());
    assert!(Arc::ptr_eq(&draft(x1), &draft(x2)));
    assert!(!Arc::ptr_eq(&draft(x1), &draft(y1)));

    draft(x1).lines.lock().push("widget".into());
    assert_eq!(draft(x2).lines.lock().len(), 1);
    assert!(draft(y1).lines.lock().is_empty());

    // Windows opened from child sessions share their workflow's draft.
    let x_db = x.create_child(ScopeTag::database()).build().unwrap();
    let x_sub = x.create_child(ScopeTag::custom("Review", None)).build().unwrap();
    let y_db = y.create_child(ScopeTag::database()).build().unwrap();
    let x3 = x_db.open_window::<DraftView>().unwrap();
    let x4 = x_sub.open_window::<DraftView>().unwrap();
    let y2 = y_db.open_window::<DraftView>().unwrap();

    assert!(Arc::ptr_eq(&draft(x3), &draft(x1)));
    assert!(Arc::ptr_eq(&draft(x4), &draft(x3)));
    assert!(Arc::ptr_eq(&draft(y2), &draft(y1)));
    assert!(!Arc::ptr_eq(&draft(x3), &draft(y2)));
    assert_eq!(draft(x4).lines.lock().len(), 1);
}

#[test]
fn child_of_missing_parent_falls_back_to_root() {
    let h = Harness::new();
    let wm = h.windows();
    let ghost = WindowId::new();

    let id = wm.open_child_window::<Shell>(ghost).unwrap();
    let meta = wm.metadata(id).unwrap();
    assert_eq!(meta.parent_id(), None);
    assert!(meta.scope().unwrap().parent().unwrap().is_root());
}

#[test]
fn missing_parent_fails_when_fallback_is_disabled() {
    let h = Harness::with_config(ScopeKitConfig {
        fallback_to_root_on_missing_parent: false,
        ..ScopeKitConfig::default()
    });
    let wm = h.windows();
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let _sub = wm.subscribe_window_error(move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    });

    let ghost = WindowId::new();
    let result = wm.try_open_child_window::<Shell>(ghost);
    assert!(!result.is_success());
    assert_eq!(result.error().unwrap().window_id, Some(ghost));
    assert_eq!(wm.last_error().unwrap().operation, "OpenChildWindow");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.factory.errors().len(), 1);
    assert_eq!(wm.window_count(), 0);
}

fn find_dialog(wm: &WindowManager, parent: WindowId) -> WindowId {
    wm.child_ids(parent)
        .into_iter()
        .find(|id| wm.metadata(*id).is_some_and(|m| m.is_modal()))
        .expect("dialog is open")
}

#[tokio::test]
async fn dialog_returns_the_completed_value() {
    let h = Harness::new();
    let wm = h.windows();
    let owner = wm.open_window::<Shell>().unwrap();
    let context = h.view_model::<Shell, _>(owner, |s| s.context.clone());

    let answer = async {
        tokio::task::yield_now().await;
        let dialog = find_dialog(wm, owner);
        h.view_model::<Prompt, _>(dialog, |p| {
            assert_eq!(p.question.as_str(), "Ship it?");
            p.context.complete_dialog(42u32).unwrap();
        });
        dialog
    };
    let (result, dialog) = tokio::join!(
        context.show_dialog::<Prompt, _, u32>("Ship it?".to_string()),
        answer
    );

    assert_eq!(result.unwrap(), DialogResult::completed(42));
    assert!(!wm.is_window_open(dialog));
    assert!(wm.is_window_open(owner));
}

#[tokio::test]
async fn dialog_closed_by_the_user_resolves_as_cancelled() {
    let h = Harness::new();
    let wm = h.windows();
    let owner = wm.open_window::<Shell>().unwrap();
    let seen_closed = Arc::new(AtomicUsize::new(0));

    let close = async {
        tokio::task::yield_now().await;
        let dialog = find_dialog(wm, owner);
        let meta = wm.metadata(dialog).unwrap();
        h.factory.window(dialog).unwrap().simulate_user_close();
        assert_eq!(meta.lifecycle(), Lifecycle::Closed);
        seen_closed.fetch_add(1, Ordering::SeqCst);
    };
    let (result, ()) = tokio::join!(
        wm.show_dialog::<Prompt, _, u32>(Some(owner), "Ship it?".to_string()),
        close
    );

    let result = result.unwrap();
    assert!(!result.success);
    assert_eq!(result.value, None);
    assert_eq!(seen_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dialog_is_cancelled_when_its_owner_closes() {
    let h = Harness::new();
    let wm = h.windows();
    let owner = wm.open_window::<Shell>().unwrap();

    let close_owner = async {
        tokio::task::yield_now().await;
        let _ = find_dialog(wm, owner);
        wm.close_window(owner).unwrap();
    };
    let (result, ()) = tokio::join!(
        wm.show_dialog::<Prompt, _, u32>(Some(owner), "Ship it?".to_string()),
        close_owner
    );
    assert_eq!(result.unwrap(), DialogResult::cancelled());
    assert_eq!(wm.window_count(), 0);
}

#[test]
fn completing_a_non_dialog_is_an_error() {
    let h = Harness::new();
    let wm = h.windows();
    let plain = wm.open_window::<Shell>().unwrap();
    let err = wm.complete_dialog(plain, 1u8).unwrap_err();
    assert_eq!(err.operation, "CompleteDialog");
    assert!(wm.is_window_open(plain));
}

#[tokio::test]
async fn window_navigator_keeps_a_disposable_history() {
    let h = Harness::new();
    let wm = h.windows();
    let id = wm.open_window::<Shell>().unwrap();
    let nav = h.view_model::<Shell, _>(id, |s| s.navigator.clone());

    nav.navigate_to::<PageA>().await.unwrap();
    nav.navigate_to::<PageB>().await.unwrap();
    nav.navigate_to::<PageC>().await.unwrap();
    assert_eq!(nav.history_len(), 2);

    assert!(!nav.navigate_back_to::<Shell>().await);
    assert_eq!(nav.history_len(), 2);
    assert_eq!(h.disposals.0.load(Ordering::SeqCst), 0);

    assert!(nav.navigate_back_to::<PageA>().await);
    assert!(nav.current_as::<PageA>().is_some());
    assert!(!nav.can_navigate_back());
    assert_eq!(h.disposals.0.load(Ordering::SeqCst), 2);

    // Closing the window disposes whatever is still current.
    wm.close_window(id).unwrap();
    assert_eq!(h.disposals.0.load(Ordering::SeqCst), 3);
    assert!(nav.current().is_none());
}

#[test]
fn session_close_is_idempotent_and_tears_everything_down() {
    let h = Harness::new();
    let workflow = h.manager.workflow_session("orders").build().unwrap();
    let child = workflow.create_child(ScopeTag::database()).build().unwrap();
    let window = workflow.open_window::<DraftView>().unwrap();
    let child_window = child.open_window::<DraftView>().unwrap();

    let closed = Arc::new(Mutex::new(Vec::new()));
    let (c1, c2) = (closed.clone(), closed.clone());
    let _s1 = workflow.subscribe_closed(move |e| c1.lock().push(e.tag.clone()));
    let _s2 = child.subscribe_closed(move |e| c2.lock().push(e.tag.clone()));

    workflow.close();
    workflow.close();
    assert!(h.manager.get_session(workflow.id()).is_none());

    assert_eq!(
        *closed.lock(),
        vec![ScopeTag::database(), ScopeTag::workflow("orders")]
    );
    assert_eq!(h.factory.closed(), vec![child_window, window]);
    assert!(workflow.scope().is_disposed());
    assert!(child.scope().is_disposed());
    assert!(h.manager.active_sessions().is_empty());
}

#[test]
fn closing_a_window_twice_reports_the_second_attempt() {
    let h = Harness::new();
    let wm = h.windows();
    let id = wm.open_window::<Shell>().unwrap();
    let meta = wm.metadata(id).unwrap();

    wm.close_window(id).unwrap();
    let second = wm.try_close_window(id);
    assert!(!second.is_success());
    assert_eq!(meta.lifecycle(), Lifecycle::Closed);
    assert_eq!(h.factory.closed(), vec![id]);
}

#[test]
fn execute_policies_differ_only_in_how_failures_surface() {
    let h = Harness::new();

    let swallowed = h
        .manager
        .workflow_session("quote")
        .with_service::<Draft>()
        .execute_with_result(|_| -> anyhow::Result<usize> { anyhow::bail!("pricing offline") }, 0);
    assert_eq!(swallowed, 0);

    let err = h
        .manager
        .workflow_session("quote")
        .with_service::<Draft>()
        .execute(|_| anyhow::bail!("pricing offline"))
        .unwrap_err();
    assert!(matches!(err, SessionError::RolledBack { .. }));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("pricing offline"));

    assert!(h.manager.active_sessions().is_empty());
}
