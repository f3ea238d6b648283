//! View-models of the order-entry windows

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use scopekit::{Navigator, ScopeHandle, Subscription, ViewModel, WindowContext};

use crate::orders::{Catalog, OrderDraft};

/// Main window of an order workflow.
pub struct OrderEditor {
    context: Arc<WindowContext>,
    navigator: Arc<Navigator>,
    draft: Arc<OrderDraft>,
    closed_children: Arc<AtomicUsize>,
    _child_closed: Subscription,
}

impl OrderEditor {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        let context = scope.resolve::<WindowContext>()?;
        let closed_children = Arc::new(AtomicUsize::new(0));
        let counter = closed_children.clone();
        let child_closed = context.subscribe_child_closed(move |closed| {
            counter.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(window_id = %closed.id, view_model = closed.view_model_type, "Editor child closed");
        });
        Ok(Self {
            navigator: scope.resolve::<Navigator>()?,
            draft: scope.resolve::<OrderDraft>()?,
            context,
            closed_children,
            _child_closed: child_closed,
        })
    }

    pub fn context(&self) -> &Arc<WindowContext> {
        &self.context
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    pub fn draft(&self) -> &Arc<OrderDraft> {
        &self.draft
    }

    pub fn closed_children(&self) -> usize {
        self.closed_children.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewModel for OrderEditor {
    fn title(&self) -> String {
        match self.draft.customer() {
            Some(customer) => format!("Order for {customer}"),
            None => "New order".to_string(),
        }
    }
}

/// Restricts the products a picker offers.
#[derive(Clone, Debug)]
pub struct PickerFilter {
    pub category: &'static str,
}

/// Child window that adds catalog products to the workflow's draft.
pub struct ProductPicker {
    context: Arc<WindowContext>,
    draft: Arc<OrderDraft>,
    catalog: Arc<Catalog>,
    filter: Arc<PickerFilter>,
}

impl ProductPicker {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        Ok(Self {
            context: scope.resolve::<WindowContext>()?,
            draft: scope.resolve::<OrderDraft>()?,
            catalog: scope.resolve::<Catalog>()?,
            filter: scope.resolve::<PickerFilter>()?,
        })
    }

    pub fn offered(&self) -> Vec<&'static str> {
        self.catalog
            .in_category(self.filter.category)
            .map(|p| p.sku)
            .collect()
    }

    pub fn pick(&self, sku: &str, quantity: u32) -> anyhow::Result<()> {
        let product = self.catalog.find(sku)?;
        if product.category != self.filter.category {
            anyhow::bail!("{sku} is not offered in {}", self.filter.category);
        }
        self.draft.add(product, quantity);
        Ok(())
    }

    pub fn draft(&self) -> &Arc<OrderDraft> {
        &self.draft
    }

    pub fn done(&self) -> anyhow::Result<()> {
        self.context.close_window()?;
        Ok(())
    }
}

#[async_trait]
impl ViewModel for ProductPicker {
    fn title(&self) -> String {
        format!("Add {}", self.filter.category)
    }
}

#[derive(Clone, Debug)]
pub struct ConfirmPrompt {
    pub question: String,
}

/// Modal yes/no dialog.
pub struct ConfirmOrder {
    context: Arc<WindowContext>,
    prompt: Arc<ConfirmPrompt>,
}

impl ConfirmOrder {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        Ok(Self {
            context: scope.resolve::<WindowContext>()?,
            prompt: scope.resolve::<ConfirmPrompt>()?,
        })
    }

    pub fn question(&self) -> &str {
        &self.prompt.question
    }

    pub fn answer(&self, confirmed: bool) -> anyhow::Result<()> {
        self.context.complete_dialog(confirmed)?;
        Ok(())
    }
}

#[async_trait]
impl ViewModel for ConfirmOrder {}

/// Pages the editor steps through, in order.
pub struct CustomerStep {
    draft: Arc<OrderDraft>,
}

impl CustomerStep {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        Ok(Self {
            draft: scope.resolve::<OrderDraft>()?,
        })
    }

    pub fn choose(&self, customer: &str) {
        self.draft.set_customer(customer);
    }
}

#[async_trait]
impl ViewModel for CustomerStep {}

pub struct LinesStep {
    draft: Arc<OrderDraft>,
    line_count: Mutex<usize>,
}

impl LinesStep {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        Ok(Self {
            draft: scope.resolve::<OrderDraft>()?,
            line_count: Mutex::new(0),
        })
    }

    pub fn line_count(&self) -> usize {
        *self.line_count.lock()
    }
}

#[async_trait]
impl ViewModel for LinesStep {
    async fn initialize(&self) -> anyhow::Result<()> {
        *self.line_count.lock() = self.draft.lines().len();
        Ok(())
    }
}

pub struct SummaryStep {
    draft: Arc<OrderDraft>,
    total_cents: Mutex<Option<u64>>,
}

impl SummaryStep {
    pub fn from_scope(scope: &ScopeHandle) -> anyhow::Result<Self> {
        Ok(Self {
            draft: scope.resolve::<OrderDraft>()?,
            total_cents: Mutex::new(None),
        })
    }

    pub fn total_cents(&self) -> Option<u64> {
        *self.total_cents.lock()
    }
}

#[async_trait]
impl ViewModel for SummaryStep {
    async fn initialize(&self) -> anyhow::Result<()> {
        if self.draft.customer().is_none() {
            anyhow::bail!("cannot summarize an order without a customer");
        }
        *self.total_cents.lock() = Some(self.draft.total_cents());
        Ok(())
    }
}
