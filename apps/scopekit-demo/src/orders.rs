//! Order-entry domain used by the demo workflow

use std::sync::Arc;

use anyhow::{bail, Context};
use parking_lot::Mutex;
use scopekit::{ScopeHandle, SharedUnitOfWork, UnitOfWork};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Product {
    pub sku: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub price_cents: u64,
}

/// Read-only product list, one per process.
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn sample() -> Self {
        let product = |sku, name, category, price_cents| Product {
            sku,
            name,
            category,
            price_cents,
        };
        Self {
            products: vec![
                product("W-100", "Widget", "hardware", 1_250),
                product("G-200", "Gadget", "hardware", 4_900),
                product("S-300", "Support plan", "services", 19_900),
            ],
        }
    }

    pub fn find(&self, sku: &str) -> anyhow::Result<&Product> {
        self.products
            .iter()
            .find(|p| p.sku == sku)
            .with_context(|| format!("unknown sku {sku}"))
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Product> + 'a {
        self.products.iter().filter(move |p| p.category == category)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderLine {
    pub sku: &'static str,
    pub quantity: u32,
    pub price_cents: u64,
}

/// The order being edited. Shared by every window of one workflow.
#[derive(Default)]
pub struct OrderDraft {
    customer: Mutex<Option<String>>,
    lines: Mutex<Vec<OrderLine>>,
}

impl OrderDraft {
    pub fn set_customer(&self, name: impl Into<String>) {
        *self.customer.lock() = Some(name.into());
    }

    pub fn customer(&self) -> Option<String> {
        self.customer.lock().clone()
    }

    pub fn add(&self, product: &Product, quantity: u32) {
        let mut lines = self.lines.lock();
        match lines.iter_mut().find(|l| l.sku == product.sku) {
            Some(line) => line.quantity += quantity,
            None => lines.push(OrderLine {
                sku: product.sku,
                quantity,
                price_cents: product.price_cents,
            }),
        }
    }

    pub fn lines(&self) -> Vec<OrderLine> {
        self.lines.lock().clone()
    }

    pub fn total_cents(&self) -> u64 {
        self.lines
            .lock()
            .iter()
            .map(|l| l.price_cents * u64::from(l.quantity))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub customer: String,
    pub lines: Vec<OrderLine>,
    pub total_cents: u64,
}

/// Committed orders.
#[derive(Default)]
pub struct OrderBook {
    orders: Mutex<Vec<Order>>,
}

impl OrderBook {
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }

    pub fn revenue_cents(&self) -> u64 {
        self.orders.lock().iter().map(|o| o.total_cents).sum()
    }
}

/// Stages orders for one database session and publishes them on save.
pub struct OrderLedger {
    book: Arc<OrderBook>,
    staged: Mutex<Vec<Order>>,
}

impl OrderLedger {
    pub fn new(book: Arc<OrderBook>) -> Self {
        Self {
            book,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn stage(&self, draft: &OrderDraft) -> anyhow::Result<()> {
        let Some(customer) = draft.customer() else {
            bail!("order has no customer");
        };
        let lines = draft.lines();
        if lines.is_empty() {
            bail!("order for {customer} has no lines");
        }
        self.staged.lock().push(Order {
            customer,
            lines,
            total_cents: draft.total_cents(),
        });
        Ok(())
    }

    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }
}

impl UnitOfWork for OrderLedger {
    fn save_changes(&self) -> anyhow::Result<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        tracing::info!(orders = staged.len(), "Committing staged orders");
        self.book.orders.lock().extend(staged);
        Ok(())
    }

    fn rollback(&self) {
        let dropped = std::mem::take(&mut *self.staged.lock()).len();
        tracing::warn!(orders = dropped, "Discarding staged orders");
    }
}

/// Session configure callback: make the scope's ledger its unit of work.
pub fn use_ledger(scope: &ScopeHandle) -> anyhow::Result<()> {
    let uow: SharedUnitOfWork = scope.resolve::<OrderLedger>()?;
    scope.provide::<SharedUnitOfWork>(uow);
    Ok(())
}
