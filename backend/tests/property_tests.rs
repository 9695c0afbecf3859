//! Ledger property tests
//!
//! Random operation sequences against the in-memory store, checking:
//! - Conservation: every stored quantity equals its movement history
//! - Non-negativity of central and branch stock, sales included
//! - Approval bound: 0 <= approved <= requested
//! - Receipt bound: received + returned <= approved

mod common;

use chrono::NaiveDate;
use common::Fixture;
use proptest::prelude::*;
use retail_replenishment_backend::models::*;
use retail_replenishment_backend::services::branch_return::{CreateReturnInput, ReturnItemInput};
use retail_replenishment_backend::services::ledger::AddStockInput;
use retail_replenishment_backend::services::sales_report::{RecordSalesInput, SaleLineInput};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
enum Op {
    AddCentral { product: usize, qty: u32 },
    Request { branch: usize, product: usize, qty: u32, urgent: bool },
    Approve { request: usize, qty: u32 },
    Dispatch { request: usize },
    Receive { request: usize, received: u32, returned: u32 },
    Reject { request: usize },
    Return { branch: usize, product: usize, qty: u32, approve: bool },
    Sale { branch: usize, product: usize, qty: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..2usize, 1..120u32).prop_map(|(product, qty)| Op::AddCentral { product, qty }),
        (0..2usize, 0..2usize, 1..60u32, any::<bool>()).prop_map(|(branch, product, qty, urgent)| {
            Op::Request {
                branch,
                product,
                qty,
                urgent,
            }
        }),
        (0..8usize, 0..80u32).prop_map(|(request, qty)| Op::Approve { request, qty }),
        (0..8usize).prop_map(|request| Op::Dispatch { request }),
        (0..8usize, 0..60u32, 0..20u32).prop_map(|(request, received, returned)| Op::Receive {
            request,
            received,
            returned,
        }),
        (0..8usize).prop_map(|request| Op::Reject { request }),
        (0..2usize, 0..2usize, 1..40u32, any::<bool>()).prop_map(|(branch, product, qty, approve)| {
            Op::Return {
                branch,
                product,
                qty,
                approve,
            }
        }),
        (0..2usize, 0..2usize, 1..30u32).prop_map(|(branch, product, qty)| Op::Sale {
            branch,
            product,
            qty,
        }),
    ]
}

/// Apply every operation, ignoring business errors, and hand back the fixture
async fn run(ops: Vec<Op>) -> (Fixture, Vec<uuid::Uuid>) {
    let fx = Fixture::new().await;
    let products = [fx.milk.id, fx.rice.id];
    let managers = [fx.manager_a.clone(), fx.manager_b.clone()];
    let mut requests = Vec::new();
    let mut report_periods = 0i64;

    let pick = |requests: &Vec<uuid::Uuid>, i: usize| {
        if requests.is_empty() {
            None
        } else {
            Some(requests[i % requests.len()])
        }
    };

    for op in ops {
        let svc = &fx.services;
        match op {
            Op::AddCentral { product, qty } => {
                let _ = svc
                    .stock
                    .add_stock(
                        Some(&fx.central),
                        AddStockInput {
                            product_id: products[product],
                            reference: "PO-PROP".to_string(),
                            quantity: Decimal::from(qty),
                            note: None,
                        },
                    )
                    .await;
            }
            Op::Request {
                branch,
                product,
                qty,
                urgent,
            } => {
                let request = fx
                    .request(&managers[branch], products[product], Decimal::from(qty), urgent)
                    .await;
                requests.push(request.id);
            }
            Op::Approve { request, qty } => {
                if let Some(id) = pick(&requests, request) {
                    let stored = svc.requests.get_request(id).await.unwrap();
                    let product_id = stored.items[0].product_id;
                    let input = Fixture::approve_input(product_id, Decimal::from(qty));
                    if stored.status == StockRequestStatus::PendingSupervisor {
                        let _ = svc
                            .requests
                            .supervisor_forward_to_central(&fx.supervisor, id)
                            .await;
                    }
                    let _ = svc.requests.approve_request(&fx.central, id, input).await;
                }
            }
            Op::Dispatch { request } => {
                if let Some(id) = pick(&requests, request) {
                    let _ = svc.requests.dispatch_request(&fx.central, id).await;
                }
            }
            Op::Receive {
                request,
                received,
                returned,
            } => {
                if let Some(id) = pick(&requests, request) {
                    let stored = svc.requests.get_request(id).await.unwrap();
                    let owner = if stored.branch_id == fx.branch_a.id {
                        &fx.manager_a
                    } else {
                        &fx.manager_b
                    };
                    let input = Fixture::receive_input(
                        stored.items[0].product_id,
                        Decimal::from(received),
                        Some(Decimal::from(returned)),
                    );
                    let _ = svc.requests.receive_stock(owner, id, input).await;
                }
            }
            Op::Reject { request } => {
                if let Some(id) = pick(&requests, request) {
                    let _ = svc.requests.reject_request(&fx.central, id, None).await;
                }
            }
            Op::Return {
                branch,
                product,
                qty,
                approve,
            } => {
                let created = svc
                    .returns
                    .create_return(
                        &managers[branch],
                        CreateReturnInput {
                            items: vec![ReturnItemInput {
                                product_id: products[product],
                                quantity: Decimal::from(qty),
                                reason: ReturnReason::Expiry,
                                note: None,
                            }],
                            note: None,
                        },
                    )
                    .await;
                if let (Ok(ret), true) = (created, approve) {
                    let _ = svc.returns.approve_return(&fx.central, ret.id).await;
                }
            }
            Op::Sale {
                branch,
                product,
                qty,
            } => {
                // One-day periods so reports never collide
                let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(report_periods);
                report_periods += 1;
                let branch_id = [fx.branch_a.id, fx.branch_b.id][branch];
                let _ = svc
                    .sales
                    .record_sales(
                        &managers[branch],
                        branch_id,
                        RecordSalesInput {
                            start_date: day,
                            end_date: day,
                            lines: vec![SaleLineInput {
                                product_id: products[product],
                                quantity_sold: Decimal::from(qty),
                            }],
                            source_file: None,
                        },
                    )
                    .await;
            }
        }
    }

    (fx, requests)
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Stored quantities always match the ledger and never go negative
        #[test]
        fn prop_conservation_and_non_negativity(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let violations = tokio_test::block_on(async {
                let (fx, _) = run(ops).await;
                let mut violations = Vec::new();
                for product_id in [fx.milk.id, fx.rice.id] {
                    for location in [
                        StockLocation::Central,
                        StockLocation::Branch(fx.branch_a.id),
                        StockLocation::Branch(fx.branch_b.id),
                    ] {
                        let check = fx
                            .services
                            .stock
                            .verify_location(product_id, location)
                            .await
                            .unwrap();
                        if !check.is_consistent() || check.stored_quantity < Decimal::ZERO {
                            violations.push(check);
                        }
                    }
                }
                violations
            });
            prop_assert!(violations.is_empty(), "ledger drift: {:?}", violations);
        }

        /// Approval and receipt bounds hold on every request line
        #[test]
        fn prop_request_bounds(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let requests = tokio_test::block_on(async {
                let (fx, ids) = run(ops).await;
                let mut requests = Vec::new();
                for id in ids {
                    requests.push(fx.services.requests.get_request(id).await.unwrap());
                }
                requests
            });

            for request in requests {
                for item in &request.items {
                    let approved = item.approved();
                    prop_assert!(approved >= Decimal::ZERO);
                    prop_assert!(approved <= item.requested_quantity);
                    prop_assert!(item.received() + item.returned() <= approved);
                    if request.status == StockRequestStatus::Received {
                        prop_assert!(item.received_quantity.is_some());
                    }
                }
                if request.status == StockRequestStatus::Rejected {
                    prop_assert!(request.dispatched_at.is_none());
                }
            }
        }
    }
}
