//! Branch-initiated returns to the central warehouse

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why stock is being sent back
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    Expiry,
    Defect,
    Other,
}

impl ReturnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnReason::Expiry => "EXPIRY",
            ReturnReason::Defect => "DEFECT",
            ReturnReason::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EXPIRY" => Some(ReturnReason::Expiry),
            "DEFECT" => Some(ReturnReason::Defect),
            "OTHER" => Some(ReturnReason::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchReturnStatus {
    Pending,
    Approved,
    Rejected,
}

impl BranchReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchReturnStatus::Pending => "PENDING",
            BranchReturnStatus::Approved => "APPROVED",
            BranchReturnStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BranchReturnStatus::Pending),
            "APPROVED" => Some(BranchReturnStatus::Approved),
            "REJECTED" => Some(BranchReturnStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BranchReturnStatus::Pending)
    }
}

impl std::fmt::Display for BranchReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchReturn {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub branch_name: Option<String>,
    pub requested_by: Uuid,
    pub status: BranchReturnStatus,
    pub note: Option<String>,
    pub items: Vec<BranchReturnItem>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchReturnItem {
    pub id: Uuid,
    pub branch_return_id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: Decimal,
    pub reason: ReturnReason,
    pub note: Option<String>,
}

/// Receipt log entry for stock that came back from a branch.
///
/// Kept apart from `CentralStock` until someone reconciles it by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralReturnedStock {
    pub id: Uuid,
    pub branch_return_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub reason: ReturnReason,
    pub received_by: Uuid,
    pub received_at: DateTime<Utc>,
}

/// Note recorded on the branch deduction for a returned line
pub fn return_movement_note(reason: ReturnReason, note: Option<&str>) -> String {
    match note {
        Some(n) if !n.trim().is_empty() => {
            format!("Returned to central - {} ({})", reason.as_str(), n.trim())
        }
        _ => format!("Returned to central - {}", reason.as_str()),
    }
}
