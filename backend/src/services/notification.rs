//! Post-commit notifications for ledger events
//!
//! Services publish a [`LedgerEvent`] only after their transaction has
//! committed. Receipt rendering, e-mail and similar consumers subscribe by
//! implementing [`Notifier`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Something that happened to the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    CentralStockAdded {
        product_id: Uuid,
        quantity: Decimal,
        reference: String,
    },
    RequestCreated {
        request_id: Uuid,
        branch_id: Uuid,
        is_urgent: bool,
    },
    RequestAssigned {
        request_id: Uuid,
        assigned_branch_id: Uuid,
    },
    RequestForwarded {
        request_id: Uuid,
    },
    RequestEdited {
        request_id: Uuid,
    },
    RequestApproved {
        request_id: Uuid,
        approved_by: Uuid,
    },
    RequestDispatched {
        request_id: Uuid,
        branch_id: Uuid,
        /// `None` when shipped from central stock
        source_branch_id: Option<Uuid>,
    },
    RequestReceived {
        request_id: Uuid,
        branch_id: Uuid,
        returned_lines: usize,
    },
    RequestRejected {
        request_id: Uuid,
    },
    ReturnCreated {
        return_id: Uuid,
        branch_id: Uuid,
    },
    ReturnApproved {
        return_id: Uuid,
        branch_id: Uuid,
    },
    ReturnRejected {
        return_id: Uuid,
        branch_id: Uuid,
    },
    SalesRecorded {
        report_id: Uuid,
        branch_id: Uuid,
        lines: usize,
    },
    AlertsGenerated {
        created: usize,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::CentralStockAdded { .. } => "central_stock_added",
            LedgerEvent::RequestCreated { .. } => "request_created",
            LedgerEvent::RequestAssigned { .. } => "request_assigned",
            LedgerEvent::RequestForwarded { .. } => "request_forwarded",
            LedgerEvent::RequestEdited { .. } => "request_edited",
            LedgerEvent::RequestApproved { .. } => "request_approved",
            LedgerEvent::RequestDispatched { .. } => "request_dispatched",
            LedgerEvent::RequestReceived { .. } => "request_received",
            LedgerEvent::RequestRejected { .. } => "request_rejected",
            LedgerEvent::ReturnCreated { .. } => "return_created",
            LedgerEvent::ReturnApproved { .. } => "return_approved",
            LedgerEvent::ReturnRejected { .. } => "return_rejected",
            LedgerEvent::SalesRecorded { .. } => "sales_recorded",
            LedgerEvent::AlertsGenerated { .. } => "alerts_generated",
        }
    }
}

/// Receiver of committed ledger events.
///
/// Delivery is best effort: a notifier must not fail the operation that
/// produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: LedgerEvent);
}

/// Writes every event to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: LedgerEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), %payload, "Ledger event"),
            Err(e) => tracing::warn!(event = event.name(), error = %e, "Unserialisable ledger event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialises_with_tag() {
        let event = LedgerEvent::RequestForwarded {
            request_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "request_forwarded");
        assert_eq!(event.name(), "request_forwarded");
    }
}
