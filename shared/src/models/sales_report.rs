//! Periodic sales reports uploaded per branch

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DateRange;

/// Sales of one branch over a reporting period.
///
/// At most one report exists per (branch, start_date, end_date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesReport {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub branch_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub uploaded_by: Uuid,
    /// Name of the uploaded sheet, if any
    pub source_file: Option<String>,
    pub items: Vec<SalesReportItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesReportItem {
    pub id: Uuid,
    pub sales_report_id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity_sold: Decimal,
}

impl SalesReport {
    pub fn period(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    pub fn total_quantity(&self) -> Decimal {
        self.items.iter().map(|i| i.quantity_sold).sum()
    }
}

/// Note recorded on every SALE movement of a report
pub fn sales_movement_note(start: NaiveDate, end: NaiveDate) -> String {
    format!("Sales report: {} to {}", start, end)
}
