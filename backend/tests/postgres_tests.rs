//! PostgreSQL adapter tests
//!
//! Run against the database named by `DATABASE_URL`; skipped when it is not
//! set. Every test creates its own branches and products so runs do not
//! interfere.
//! - First writes to a stock row that does not exist yet
//! - Approval and dispatch over the same products in opposite name order
//! - Two dispatches of one request

mod common;

use std::sync::Arc;

use common::dec;
use retail_replenishment_backend::models::*;
use retail_replenishment_backend::services::ledger::AddStockInput;
use retail_replenishment_backend::services::stock_request::{
    ApproveItemInput, ApproveRequestInput, CreateRequestInput, ReceiveItemInput,
    ReceiveStockInput, RequestItemInput,
};
use retail_replenishment_backend::services::{LedgerServices, TracingNotifier};
use retail_replenishment_backend::store::PgLedgerStore;
use retail_replenishment_backend::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

struct PgFixture {
    pool: PgPool,
    services: LedgerServices,
    central: Actor,
    manager: Actor,
    branch: Branch,
}

impl PgFixture {
    async fn connect() -> Option<Self> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
                return None;
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let services = LedgerServices::new(
            Arc::new(PgLedgerStore::new(pool.clone())),
            Arc::new(TracingNotifier),
            AlertThresholds::default(),
        );

        let branch = Branch::new(&format!("Branch {}", Uuid::new_v4()));
        sqlx::query("INSERT INTO branches (id, name, is_active) VALUES ($1, $2, TRUE)")
            .bind(branch.id)
            .bind(&branch.name)
            .execute(&pool)
            .await
            .unwrap();

        Some(Self {
            pool,
            services,
            central: Actor::central_manager(Uuid::new_v4()),
            manager: Actor::branch_manager(Uuid::new_v4(), branch.id),
            branch,
        })
    }

    /// Insert a product without a central stock row
    async fn product(&self, id: Uuid, name: &str) -> Uuid {
        sqlx::query(
            "INSERT INTO products (id, name, sku, unit, is_active) VALUES ($1, $2, $3, 'pcs', TRUE)",
        )
        .bind(id)
        .bind(format!("{} {}", name, id))
        .bind(format!("SKU-{}", id))
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    async fn add_stock(&self, product_id: Uuid, quantity: &str) {
        self.services
            .stock
            .add_stock(
                Some(&self.central),
                AddStockInput {
                    product_id,
                    reference: "PO-PG".to_string(),
                    quantity: dec(quantity),
                    note: None,
                },
            )
            .await
            .unwrap();
    }

    async fn request(&self, lines: &[(Uuid, &str)]) -> StockRequest {
        self.services
            .requests
            .create_request(
                &self.manager,
                CreateRequestInput {
                    items: lines
                        .iter()
                        .map(|(product_id, qty)| RequestItemInput {
                            product_id: *product_id,
                            quantity: dec(qty),
                        })
                        .collect(),
                    is_urgent: false,
                    note: None,
                },
            )
            .await
            .unwrap()
    }

    fn approve_all(lines: &[(Uuid, &str)]) -> ApproveRequestInput {
        ApproveRequestInput {
            items: lines
                .iter()
                .map(|(product_id, qty)| ApproveItemInput {
                    product_id: *product_id,
                    approved_quantity: dec(qty),
                })
                .collect(),
            note: None,
        }
    }
}

// ============================================================================
// Stock Rows Created On First Write
// ============================================================================

#[cfg(test)]
mod first_write_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_additions_are_both_counted() {
        let Some(fx) = PgFixture::connect().await else {
            return;
        };

        for _ in 0..10 {
            let product_id = fx.product(Uuid::new_v4(), "Bottled Water").await;

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let services = fx.services.clone();
                    let actor = fx.central.clone();
                    tokio::spawn(async move {
                        services
                            .stock
                            .add_stock(
                                Some(&actor),
                                AddStockInput {
                                    product_id,
                                    reference: "PO-RACE".to_string(),
                                    quantity: dec("10"),
                                    note: None,
                                },
                            )
                            .await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let check = fx
                .services
                .stock
                .verify_location(product_id, StockLocation::Central)
                .await
                .unwrap();
            assert_eq!(check.stored_quantity, dec("20"));
            assert!(check.is_consistent(), "{:?}", check);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_receipts_are_both_counted() {
        let Some(fx) = PgFixture::connect().await else {
            return;
        };
        let product_id = fx.product(Uuid::new_v4(), "Paper Cups").await;
        fx.add_stock(product_id, "100").await;

        let mut ids = Vec::new();
        for _ in 0..2 {
            let request = fx.request(&[(product_id, "10")]).await;
            fx.services
                .requests
                .approve_request(&fx.central, request.id, PgFixture::approve_all(&[(product_id, "10")]))
                .await
                .unwrap();
            fx.services
                .requests
                .dispatch_request(&fx.central, request.id)
                .await
                .unwrap();
            ids.push(request.id);
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let services = fx.services.clone();
                let actor = fx.manager.clone();
                tokio::spawn(async move {
                    services
                        .requests
                        .receive_stock(
                            &actor,
                            id,
                            ReceiveStockInput {
                                items: vec![ReceiveItemInput {
                                    product_id,
                                    received_quantity: dec("10"),
                                    returned_quantity: None,
                                    reason: None,
                                }],
                                note: None,
                            },
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let check = fx
            .services
            .stock
            .verify_location(product_id, StockLocation::Branch(fx.branch.id))
            .await
            .unwrap();
        assert_eq!(check.stored_quantity, dec("20"));
        assert!(check.is_consistent(), "{:?}", check);
    }
}

// ============================================================================
// Lock Order
// ============================================================================

#[cfg(test)]
mod lock_order_tests {
    use super::*;

    /// Name order is the reverse of id order, so item order and product_id
    /// order disagree
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_approval_racing_dispatch_never_deadlocks() {
        let Some(fx) = PgFixture::connect().await else {
            return;
        };

        for _ in 0..10 {
            let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
            ids.sort();
            let low = fx.product(ids[0], "Zucchini").await;
            let high = fx.product(ids[1], "Apples").await;
            fx.add_stock(low, "100").await;
            fx.add_stock(high, "100").await;

            let lines = [(low, "5"), (high, "5")];
            let to_approve = fx.request(&lines).await;
            let to_dispatch = fx.request(&lines).await;
            fx.services
                .requests
                .approve_request(&fx.central, to_dispatch.id, PgFixture::approve_all(&lines))
                .await
                .unwrap();

            let approve = {
                let services = fx.services.clone();
                let actor = fx.central.clone();
                let id = to_approve.id;
                tokio::spawn(async move {
                    services
                        .requests
                        .approve_request(&actor, id, PgFixture::approve_all(&[(low, "5"), (high, "5")]))
                        .await
                })
            };
            let dispatch = {
                let services = fx.services.clone();
                let actor = fx.central.clone();
                let id = to_dispatch.id;
                tokio::spawn(async move { services.requests.dispatch_request(&actor, id).await })
            };

            let approved = approve.await.unwrap().unwrap();
            let dispatched = dispatch.await.unwrap().unwrap();
            assert_eq!(approved.status, StockRequestStatus::Approved);
            assert_eq!(dispatched.status, StockRequestStatus::Dispatched);

            for product_id in [low, high] {
                let check = fx
                    .services
                    .stock
                    .verify_location(product_id, StockLocation::Central)
                    .await
                    .unwrap();
                assert_eq!(check.stored_quantity, dec("95"));
                assert!(check.is_consistent());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_double_dispatch_succeeds_once() {
        let Some(fx) = PgFixture::connect().await else {
            return;
        };
        let product_id = fx.product(Uuid::new_v4(), "Instant Noodles").await;
        fx.add_stock(product_id, "100").await;
        let request = fx.request(&[(product_id, "30")]).await;
        fx.services
            .requests
            .approve_request(&fx.central, request.id, PgFixture::approve_all(&[(product_id, "30")]))
            .await
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let services = fx.services.clone();
                let actor = fx.central.clone();
                let id = request.id;
                tokio::spawn(async move { services.requests.dispatch_request(&actor, id).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::InvalidState(_)) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(succeeded, 1);

        let stock = fx
            .services
            .stock
            .get_central_stock(product_id)
            .await
            .unwrap();
        assert_eq!(stock.quantity, dec("70"));
    }
}
