//! Database models for the replenishment ledger
//!
//! Re-exports models from the shared crate and adds backend-specific query
//! filters.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use shared::models::*;
pub use shared::{DateRange, PaginatedResponse, Pagination};

/// Selection of stock requests
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Empty means any status
    pub statuses: Vec<StockRequestStatus>,
    /// Requesting branch
    pub branch_id: Option<Uuid>,
    pub assigned_branch_id: Option<Uuid>,
    /// Order by creation ascending instead of newest first
    pub oldest_first: bool,
}

impl RequestFilter {
    pub fn matches(&self, request: &StockRequest) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&request.status))
            && self.branch_id.map_or(true, |b| b == request.branch_id)
            && self
                .assigned_branch_id
                .map_or(true, |b| Some(b) == request.assigned_branch_id)
    }
}

/// Selection of branch-initiated returns
#[derive(Debug, Clone, Default)]
pub struct ReturnFilter {
    pub status: Option<BranchReturnStatus>,
    pub branch_id: Option<Uuid>,
}

impl ReturnFilter {
    pub fn matches(&self, ret: &BranchReturn) -> bool {
        self.status.map_or(true, |s| s == ret.status)
            && self.branch_id.map_or(true, |b| b == ret.branch_id)
    }
}

/// Selection of ledger movements
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub location: Option<StockLocation>,
    pub reference: Option<String>,
    pub range: Option<DateRange>,
}

impl MovementFilter {
    pub fn at(product_id: Uuid, location: StockLocation) -> Self {
        Self {
            product_id: Some(product_id),
            location: Some(location),
            ..Default::default()
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.product_id.map_or(true, |p| p == movement.product_id)
            && self.location.map_or(true, |l| l == movement.location())
            && self
                .reference
                .as_deref()
                .map_or(true, |r| r == movement.reference)
            && self
                .range
                .as_ref()
                .map_or(true, |r| r.contains(movement.created_at))
    }
}

/// Selection of alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub priority: Option<AlertPriority>,
    pub alert_type: Option<AlertType>,
    pub branch_id: Option<Uuid>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| s == alert.status)
            && self.priority.map_or(true, |p| p == alert.priority)
            && self.alert_type.map_or(true, |t| t == alert.alert_type)
            && self.branch_id.map_or(true, |b| b == alert.branch_id)
    }
}

/// Roll-up of movements for one product at one location
#[derive(Debug, Clone, serde::Serialize)]
pub struct StockSummary {
    pub product_id: Uuid,
    pub location: StockLocation,
    pub total_in: rust_decimal::Decimal,
    pub total_out: rust_decimal::Decimal,
    pub net: rust_decimal::Decimal,
    pub movement_count: usize,
    pub first_movement_at: DateTime<Utc>,
    pub last_movement_at: DateTime<Utc>,
}
