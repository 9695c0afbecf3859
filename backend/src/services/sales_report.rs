//! Sales reports: periodic branch sales taken off the shelf through the ledger
//!
//! Parsing the uploaded sheet happens upstream; this service receives typed
//! lines for one branch and one period.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::notification::{LedgerEvent, Notifier};
use super::{deduct_from, ensure_unique_products};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::store::LedgerStore;

/// Service for branch sales reports
#[derive(Clone)]
pub struct SalesReportService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

/// Quantity of one product sold over the period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLineInput {
    pub product_id: Uuid,
    pub quantity_sold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordSalesInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[validate(length(min = 1, message = "At least one sales line is required"))]
    pub lines: Vec<SaleLineInput>,
    #[validate(length(max = 255))]
    pub source_file: Option<String>,
}

impl SalesReportService {
    /// Create a new SalesReportService instance
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Record a branch's sales for a period and deduct them from its stock.
    ///
    /// The whole report is refused when any line exceeds branch stock or
    /// when the branch already has a report for the same period. Lines with
    /// zero sold are skipped.
    pub async fn record_sales(
        &self,
        actor: &Actor,
        branch_id: Uuid,
        input: RecordSalesInput,
    ) -> AppResult<SalesReport> {
        input.validate()?;
        if input.start_date > input.end_date {
            return Err(AppError::validation(
                "end_date",
                "Start date cannot be after end date",
            ));
        }
        ensure_unique_products(input.lines.iter().map(|l| l.product_id))?;
        if !actor.can_act_for_branch(branch_id) {
            return Err(AppError::Forbidden(
                "Sales can only be reported for your own branch".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            let quantity = shared::non_negative_qty("quantity_sold", line.quantity_sold)?;
            if quantity > Decimal::ZERO {
                lines.push((line.product_id, quantity));
            }
        }
        lines.sort_by_key(|(product_id, _)| *product_id);

        let period = DateRange::new(input.start_date, input.end_date);
        let mut tx = self.store.begin().await?;

        let branch = tx
            .find_active_branch(branch_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Branch".to_string()))?;

        if tx.sales_report_exists(branch_id, &period).await? {
            return Err(AppError::Conflict(format!(
                "A sales report for {} from {} to {} already exists",
                branch.name, period.start, period.end
            )));
        }

        let now = Utc::now();
        let report_id = Uuid::new_v4();
        let note = sales_movement_note(period.start, period.end);
        let mut items = Vec::with_capacity(lines.len());

        for (product_id, quantity) in lines {
            let product = tx
                .find_active_product(product_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))?;

            let mut stock = tx
                .lock_branch_product(branch_id, product_id)
                .await?
                .unwrap_or_else(|| BranchProduct::empty(branch_id, product_id));
            stock.quantity = deduct_from(
                stock.quantity,
                quantity,
                &format!("{} at {}", product.name, branch.name),
            )?;
            stock.updated_at = now;
            tx.save_branch_product(&stock).await?;

            let movement = StockMovement::new(
                product_id,
                StockLocation::Branch(branch_id),
                MovementType::Sale,
                quantity,
                report_id.to_string(),
            )
            .with_note(note.clone())
            .with_actors(Some(actor.user_id), None);
            tx.insert_movement(&movement).await?;

            items.push(SalesReportItem {
                id: Uuid::new_v4(),
                sales_report_id: report_id,
                product_id,
                product_name: Some(product.name),
                quantity_sold: quantity,
            });
        }

        let report = SalesReport {
            id: report_id,
            branch_id,
            branch_name: Some(branch.name),
            start_date: period.start,
            end_date: period.end,
            uploaded_by: actor.user_id,
            source_file: shared::normalize_note(input.source_file),
            items,
            created_at: now,
        };
        tx.insert_sales_report(&report).await?;
        tx.commit().await?;

        tracing::info!(
            report_id = %report.id,
            branch_id = %branch_id,
            lines = report.items.len(),
            total = %report.total_quantity(),
            "Sales report recorded"
        );
        self.notifier
            .notify(LedgerEvent::SalesRecorded {
                report_id: report.id,
                branch_id,
                lines: report.items.len(),
            })
            .await;

        Ok(report)
    }

    pub async fn get_sales_report(&self, report_id: Uuid) -> AppResult<SalesReport> {
        self.store
            .find_sales_report(report_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Sales report".to_string()))
    }

    /// Reports of one branch, latest period first
    pub async fn branch_sales_reports(&self, branch_id: Uuid) -> AppResult<Vec<SalesReport>> {
        self.store.list_sales_reports(branch_id).await
    }
}
