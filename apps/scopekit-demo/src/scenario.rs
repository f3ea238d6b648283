//! Headless order-entry workflow driven end to end

use std::sync::Arc;

use anyhow::{ensure, Context};
use scopekit::{
    Container, ContainerBuilder, HeadlessWindowFactory, ScopeKind, ScopeKitConfig, ScopeManager,
    ScopeTag, TagMatcher, ViewModel, WindowId, WindowManager,
};
use tokio_util::sync::CancellationToken;

use crate::orders::{use_ledger, Catalog, OrderBook, OrderDraft, OrderLedger};
use crate::views::{
    ConfirmOrder, ConfirmPrompt, CustomerStep, LinesStep, OrderEditor, PickerFilter, ProductPicker,
    SummaryStep,
};

/// Register every service and view-model of the demo.
pub fn build_container() -> Container {
    let mut services = ContainerBuilder::new();

    services.register_singleton::<Catalog, _>(|_| Ok(Catalog::sample()));
    services.register_singleton::<OrderBook, _>(|_| Ok(OrderBook::default()));
    services
        .register_per_matching_tag::<OrderDraft, _>(TagMatcher::kind(ScopeKind::Workflow), |_| {
            Ok(OrderDraft::default())
        })
        .on_release(|draft| {
            tracing::debug!(lines = draft.lines().len(), "Order draft released");
        });
    services.register_per_matching_tag::<OrderLedger, _>(
        TagMatcher::kind(ScopeKind::Database),
        |scope| Ok(OrderLedger::new(scope.resolve::<OrderBook>()?)),
    );

    services.register_scoped::<OrderEditor, _>(OrderEditor::from_scope);
    services.register_scoped::<ProductPicker, _>(ProductPicker::from_scope);
    services.register_scoped::<ConfirmOrder, _>(ConfirmOrder::from_scope);
    services.register_transient::<CustomerStep, _>(CustomerStep::from_scope);
    services.register_transient::<LinesStep, _>(LinesStep::from_scope);
    services.register_transient::<SummaryStep, _>(SummaryStep::from_scope);

    services.build()
}

/// What the scenario did, for the caller to print.
#[derive(Debug, Default)]
pub struct Report {
    pub customer: String,
    pub lines: usize,
    pub total_cents: u64,
    pub confirmed: bool,
    pub committed_orders: usize,
    pub revenue_cents: u64,
    pub windows_shown: usize,
    pub windows_closed: usize,
    pub editor_children_closed: usize,
}

fn with_view_model<T: ViewModel, R>(
    windows: &WindowManager,
    id: WindowId,
    f: impl FnOnce(&T) -> R,
) -> anyhow::Result<R> {
    let view_model = windows
        .metadata(id)
        .and_then(|m| m.view_model())
        .with_context(|| format!("window {id} is not open"))?;
    let typed = (*view_model)
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("window {id} does not show {}", std::any::type_name::<T>()))?;
    Ok(f(typed))
}

/// Run one order through editor, picker, navigation, confirmation dialog and commit.
pub async fn run(config: ScopeKitConfig, cancel: CancellationToken) -> anyhow::Result<Report> {
    let factory = Arc::new(HeadlessWindowFactory::new());
    let manager = ScopeManager::new(build_container(), factory.clone(), config);
    let windows = manager.window_manager().clone();

    let _errors = windows.subscribe_window_error(|e| {
        tracing::warn!(error = %e, "Window operation failed");
    });

    let workflow = manager
        .workflow_session("order-entry")
        .auto_close_when_empty(true)
        .with_cancellation(cancel.clone())
        .build()?;

    // Editor and picker live in different window scopes but share the draft.
    let editor_id = workflow.open_window::<OrderEditor>()?;
    let (context, navigator, draft) = with_view_model::<OrderEditor, _>(&windows, editor_id, |e| {
        (e.context().clone(), e.navigator().clone(), e.draft().clone())
    })?;

    navigator.navigate_to::<CustomerStep>().await?;
    navigator
        .current_as::<CustomerStep>()
        .context("customer step is not current")?
        .choose("ACME Corp");

    let picker_id = context.open_window_with::<ProductPicker, _>(PickerFilter {
        category: "hardware",
    })?;
    with_view_model::<ProductPicker, _>(&windows, picker_id, |picker| -> anyhow::Result<()> {
        ensure!(Arc::ptr_eq(picker.draft(), &draft), "picker sees another draft");
        tracing::info!(offered = ?picker.offered(), "Picker opened");
        picker.pick("W-100", 3)?;
        picker.pick("G-200", 1)?;
        if let Err(e) = picker.pick("S-300", 1) {
            tracing::info!(error = %e, "Rejected pick outside the filter");
        }
        picker.done()
    })??;
    ensure!(
        context.child_windows_count() == 0,
        "picker still open after done"
    );

    navigator.navigate_to::<LinesStep>().await?;
    tracing::info!(
        lines = ?navigator.current_as::<LinesStep>().map(|s| s.line_count()),
        "Reviewing order lines"
    );
    navigator.navigate_to::<SummaryStep>().await?;
    let total_cents = navigator
        .current_as::<SummaryStep>()
        .and_then(|s| s.total_cents())
        .context("summary was not initialized")?;
    ensure!(
        navigator.navigate_back_to::<CustomerStep>().await,
        "customer step missing from history"
    );
    tracing::info!(
        current = ?navigator.current_type_name(),
        history = navigator.history_len(),
        "Navigated back to the first step"
    );

    let prompt = ConfirmPrompt {
        question: format!("Place order for {} cents?", total_cents),
    };
    let answer = async {
        let dialog_id = loop {
            if let Some(id) = context
                .get_child_ids()
                .into_iter()
                .find(|id| windows.metadata(*id).is_some_and(|m| m.is_modal()))
            {
                break id;
            }
            tokio::task::yield_now().await;
        };
        with_view_model::<ConfirmOrder, _>(&windows, dialog_id, |dialog| {
            tracing::info!(question = dialog.question(), "Answering dialog");
            dialog.answer(true)
        })?
    };
    let (dialog, answered) = tokio::join!(
        context.show_dialog::<ConfirmOrder, _, bool>(prompt),
        answer
    );
    answered?;
    let confirmed = dialog?.value.unwrap_or(false);

    if confirmed {
        workflow
            .create_child(ScopeTag::database())
            .with_service::<OrderDraft>()
            .with_service::<OrderLedger>()
            .configure(use_ledger)
            .auto_save(true)
            .execute_async(|(draft, ledger)| async move {
                ledger.stage(&draft)?;
                tracing::debug!(staged = ledger.staged_count(), "Order staged");
                Ok::<_, anyhow::Error>(())
            })
            .await?;
    }

    let editor_children_closed =
        with_view_model::<OrderEditor, _>(&windows, editor_id, |e| e.closed_children())?;

    // Closing the editor empties the workflow, which then closes itself.
    context.close_window()?;
    ensure!(!workflow.is_active(), "workflow outlived its last window");

    let book = manager.root_scope().resolve::<OrderBook>()?;
    let revenue_cents = manager
        .database_session()
        .with_service::<OrderBook>()
        .execute_with_result(|(book,)| Ok(book.revenue_cents()), 0);

    manager.close_all();

    Ok(Report {
        customer: draft.customer().unwrap_or_default(),
        lines: draft.lines().len(),
        total_cents,
        confirmed,
        committed_orders: book.orders().len(),
        revenue_cents,
        windows_shown: factory.shown().len(),
        windows_closed: factory.closed().len(),
        editor_children_closed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_registers_every_view_model() {
        let container = build_container();
        assert!(container.is_registered::<OrderEditor>());
        assert!(container.is_registered::<ProductPicker>());
        assert!(container.is_registered::<ConfirmOrder>());
        assert!(container.is_registered::<SummaryStep>());
        assert_eq!(
            container.lifetime_of::<OrderDraft>(),
            Some(scopekit::Lifetime::PerMatchingTag(TagMatcher::kind(
                ScopeKind::Workflow
            )))
        );
    }

    #[tokio::test]
    async fn scenario_commits_one_order() {
        let report = run(ScopeKitConfig::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.customer, "ACME Corp");
        assert_eq!(report.lines, 2);
        assert_eq!(report.total_cents, 3 * 1_250 + 4_900);
        assert!(report.confirmed);
        assert_eq!(report.committed_orders, 1);
        assert_eq!(report.revenue_cents, report.total_cents);
        assert_eq!(report.windows_shown, 3);
        assert_eq!(report.windows_closed, 3);
        assert_eq!(report.editor_children_closed, 2);
    }

    #[tokio::test]
    async fn cancelled_run_does_not_commit() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run(ScopeKitConfig::default(), cancel).await.unwrap_err();
        assert!(format!("{err:#}").contains("cancelled"));
    }
}
