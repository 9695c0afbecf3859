//! Business logic services for the replenishment ledger

use std::sync::Arc;

use rust_decimal::Decimal;
use shared::QuantityError;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::LedgerStore;

pub mod alert;
pub mod branch_return;
pub mod ledger;
pub mod notification;
pub mod sales_report;
pub mod stock_request;

pub use alert::AlertService;
pub use branch_return::BranchReturnService;
pub use ledger::CentralStockService;
pub use notification::{LedgerEvent, Notifier, TracingNotifier};
pub use sales_report::SalesReportService;
pub use stock_request::StockRequestService;

/// Every service wired to one store and one notifier
#[derive(Clone)]
pub struct LedgerServices {
    pub stock: CentralStockService,
    pub requests: StockRequestService,
    pub returns: BranchReturnService,
    pub sales: SalesReportService,
    pub alerts: AlertService,
}

impl LedgerServices {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        thresholds: shared::AlertThresholds,
    ) -> Self {
        Self {
            stock: CentralStockService::new(store.clone(), notifier.clone()),
            requests: StockRequestService::new(store.clone(), notifier.clone()),
            returns: BranchReturnService::new(store.clone(), notifier.clone()),
            sales: SalesReportService::new(store.clone(), notifier.clone()),
            alerts: AlertService::new(store, notifier, thresholds),
        }
    }
}

/// Name used in messages for a product line
pub(crate) fn product_label(name: Option<&str>, product_id: Uuid) -> String {
    name.map(str::to_string)
        .unwrap_or_else(|| product_id.to_string())
}

/// Deduct with an error that names the product and the location
pub(crate) fn deduct_from(
    current: Decimal,
    quantity: Decimal,
    what: &str,
) -> Result<Decimal, AppError> {
    shared::deduct_qty(current, quantity).map_err(|err| match err {
        QuantityError::Insufficient {
            available,
            requested,
        } => {
            tracing::warn!(%available, %requested, "Insufficient stock for {}", what);
            AppError::InsufficientStock(format!(
                "{}: available {}, requested {}",
                what, available, requested
            ))
        }
        other => other.into(),
    })
}

/// Reject item lists that name the same product twice
pub(crate) fn ensure_unique_products<I>(product_ids: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = Uuid>,
{
    match shared::first_duplicate(product_ids) {
        Some(dup) => Err(AppError::validation(
            "items",
            format!("product {} appears on more than one line", dup),
        )),
        None => Ok(()),
    }
}

/// Check an optional note against the length limit
pub(crate) fn check_note(field: &str, note: Option<&str>) -> Result<(), AppError> {
    shared::validate_note(note).map_err(|msg| AppError::validation(field, msg))
}
