//! Stock request aggregate and its lifecycle

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default reason recorded for a receipt shortfall
pub const DEFAULT_RETURN_REASON: &str = "Damaged/Defective";

/// Lifecycle status of a stock request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockRequestStatus {
    /// Awaiting central approval
    Pending,
    /// Urgent request awaiting supervisor routing
    PendingSupervisor,
    /// Assigned to another branch for fulfilment
    PendingBranchApproval,
    Approved,
    Dispatched,
    Received,
    Rejected,
}

impl StockRequestStatus {
    pub const ALL: [StockRequestStatus; 7] = [
        StockRequestStatus::Pending,
        StockRequestStatus::PendingSupervisor,
        StockRequestStatus::PendingBranchApproval,
        StockRequestStatus::Approved,
        StockRequestStatus::Dispatched,
        StockRequestStatus::Received,
        StockRequestStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockRequestStatus::Pending => "PENDING",
            StockRequestStatus::PendingSupervisor => "PENDING_SUPERVISOR",
            StockRequestStatus::PendingBranchApproval => "PENDING_BRANCH_APPROVAL",
            StockRequestStatus::Approved => "APPROVED",
            StockRequestStatus::Dispatched => "DISPATCHED",
            StockRequestStatus::Received => "RECEIVED",
            StockRequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(StockRequestStatus::Pending),
            "PENDING_SUPERVISOR" => Some(StockRequestStatus::PendingSupervisor),
            "PENDING_BRANCH_APPROVAL" => Some(StockRequestStatus::PendingBranchApproval),
            "APPROVED" => Some(StockRequestStatus::Approved),
            "DISPATCHED" => Some(StockRequestStatus::Dispatched),
            "RECEIVED" => Some(StockRequestStatus::Received),
            "REJECTED" => Some(StockRequestStatus::Rejected),
            _ => None,
        }
    }

    /// Starting status for a new request
    pub fn initial(urgent: bool) -> Self {
        if urgent {
            StockRequestStatus::PendingSupervisor
        } else {
            StockRequestStatus::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StockRequestStatus::Received | StockRequestStatus::Rejected)
    }

    /// Requested quantities may still be changed
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            StockRequestStatus::Pending | StockRequestStatus::PendingSupervisor
        )
    }

    /// Counts as an order in flight when deciding on LATE_ORDER alerts
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            StockRequestStatus::Pending
                | StockRequestStatus::Approved
                | StockRequestStatus::Dispatched
        )
    }

    /// Position along the forward path, used to check monotonicity
    pub fn rank(&self) -> u8 {
        match self {
            StockRequestStatus::PendingSupervisor => 0,
            StockRequestStatus::PendingBranchApproval => 1,
            StockRequestStatus::Pending => 1,
            StockRequestStatus::Approved => 2,
            StockRequestStatus::Dispatched => 3,
            StockRequestStatus::Received | StockRequestStatus::Rejected => 4,
        }
    }

    /// Apply a lifecycle event, returning the next status if it is allowed
    pub fn next(self, event: RequestEvent) -> Option<Self> {
        use RequestEvent::*;
        use StockRequestStatus::*;

        match (self, event) {
            (PendingSupervisor, AssignBranch) => Some(PendingBranchApproval),
            (PendingSupervisor, ForwardToCentral) => Some(Pending),
            (Pending, Approve) => Some(Approved),
            (PendingBranchApproval, ApproveFromBranch) => Some(Dispatched),
            (Approved, Dispatch) => Some(Dispatched),
            (Dispatched, Receive) => Some(Received),
            (Pending | PendingSupervisor, Edit) => Some(self),
            (Pending | PendingSupervisor | PendingBranchApproval | Approved, Reject) => {
                Some(Rejected)
            }
            _ => None,
        }
    }

    /// Like [`next`](Self::next) but with a descriptive error
    pub fn transition(self, event: RequestEvent) -> Result<Self, TransitionError> {
        self.next(event).ok_or(TransitionError {
            from: self,
            event,
        })
    }
}

impl std::fmt::Display for StockRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive a stock request through its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    AssignBranch,
    ForwardToCentral,
    Approve,
    ApproveFromBranch,
    Dispatch,
    Receive,
    Edit,
    Reject,
}

impl RequestEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestEvent::AssignBranch => "assign_branch",
            RequestEvent::ForwardToCentral => "forward_to_central",
            RequestEvent::Approve => "approve",
            RequestEvent::ApproveFromBranch => "approve_from_branch",
            RequestEvent::Dispatch => "dispatch",
            RequestEvent::Receive => "receive",
            RequestEvent::Edit => "edit",
            RequestEvent::Reject => "reject",
        }
    }
}

/// A lifecycle event that is not allowed from the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {} a stock request in status {from}", .event.as_str())]
pub struct TransitionError {
    pub from: StockRequestStatus,
    pub event: RequestEvent,
}

/// Replenishment request raised by a branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockRequest {
    pub id: Uuid,
    /// Requesting branch
    pub branch_id: Uuid,
    pub branch_name: Option<String>,
    pub requested_by: Uuid,
    pub status: StockRequestStatus,
    pub is_urgent: bool,
    /// Branch chosen by the supervisor to fulfil an urgent request
    pub assigned_branch_id: Option<Uuid>,
    pub supervisor_forwarded_to_central: bool,
    pub note: Option<String>,
    pub items: Vec<StockRequestItem>,
    pub approved_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRequest {
    pub fn item_for(&self, product_id: Uuid) -> Option<&StockRequestItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn item_for_mut(&mut self, product_id: Uuid) -> Option<&mut StockRequestItem> {
        self.items.iter_mut().find(|i| i.product_id == product_id)
    }

    /// Where dispatched stock is taken from
    pub fn source_branch(&self) -> Option<Uuid> {
        self.assigned_branch_id
    }
}

/// A product line on a stock request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockRequestItem {
    pub id: Uuid,
    pub stock_request_id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub unit: Option<String>,
    pub requested_quantity: Decimal,
    pub approved_quantity: Option<Decimal>,
    pub received_quantity: Option<Decimal>,
    pub returned_quantity: Option<Decimal>,
}

impl StockRequestItem {
    pub fn new(stock_request_id: Uuid, product_id: Uuid, requested_quantity: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            stock_request_id,
            product_id,
            product_name: None,
            unit: None,
            requested_quantity,
            approved_quantity: None,
            received_quantity: None,
            returned_quantity: None,
        }
    }

    pub fn approved(&self) -> Decimal {
        self.approved_quantity.unwrap_or(Decimal::ZERO)
    }

    pub fn received(&self) -> Decimal {
        self.received_quantity.unwrap_or(Decimal::ZERO)
    }

    pub fn returned(&self) -> Decimal {
        self.returned_quantity.unwrap_or(Decimal::ZERO)
    }
}

/// Shortfall or defect reported while receiving a dispatched request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockRequestReturn {
    pub id: Uuid,
    pub stock_request_id: Uuid,
    pub stock_request_item_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub reason: String,
    pub reported_by: Uuid,
    pub returned_at: DateTime<Utc>,
}
