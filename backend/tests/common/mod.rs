//! Shared fixture for ledger integration tests
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use retail_replenishment_backend::models::*;
use retail_replenishment_backend::services::stock_request::{
    ApproveItemInput, ApproveRequestInput, CreateRequestInput, ReceiveItemInput,
    ReceiveStockInput, RequestItemInput,
};
use retail_replenishment_backend::services::ledger::AddStockInput;
use retail_replenishment_backend::services::{LedgerEvent, LedgerServices, Notifier};
use retail_replenishment_backend::store::{LedgerStore, MemoryLedgerStore};
use rust_decimal::Decimal;
use uuid::Uuid;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Keeps every event for later inspection
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: LedgerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Two branches, two products and one actor per role
pub struct Fixture {
    pub store: MemoryLedgerStore,
    pub services: LedgerServices,
    pub notifier: Arc<RecordingNotifier>,
    pub branch_a: Branch,
    pub branch_b: Branch,
    pub milk: Product,
    pub rice: Product,
    pub central: Actor,
    pub supervisor: Actor,
    pub manager_a: Actor,
    pub manager_b: Actor,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_thresholds(AlertThresholds::default()).await
    }

    pub async fn with_thresholds(thresholds: AlertThresholds) -> Self {
        let store = MemoryLedgerStore::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let branch_a = Branch::new("Siam Square");
        let branch_b = Branch::new("Chiang Mai Old Town");
        let milk = Product::new("Fresh Milk", "MILK-1L", "L");
        let rice = Product::new("Jasmine Rice", "RICE-5KG", "bag");
        store.insert_branch(branch_a.clone()).await;
        store.insert_branch(branch_b.clone()).await;
        store.insert_product(milk.clone()).await;
        store.insert_product(rice.clone()).await;

        let shared_store: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let services = LedgerServices::new(shared_store, notifier.clone(), thresholds);

        Self {
            store,
            services,
            notifier,
            central: Actor::central_manager(Uuid::new_v4()),
            supervisor: Actor::supervisor(Uuid::new_v4()),
            manager_a: Actor::branch_manager(Uuid::new_v4(), branch_a.id),
            manager_b: Actor::branch_manager(Uuid::new_v4(), branch_b.id),
            branch_a,
            branch_b,
            milk,
            rice,
        }
    }

    /// Put stock into the central warehouse through the ledger
    pub async fn stock_central(&self, product_id: Uuid, quantity: Decimal) {
        self.services
            .stock
            .add_stock(
                Some(&self.central),
                AddStockInput {
                    product_id,
                    reference: "PO-TEST".to_string(),
                    quantity,
                    note: None,
                },
            )
            .await
            .unwrap();
    }

    pub async fn central_qty(&self, product_id: Uuid) -> Decimal {
        self.services
            .stock
            .get_central_stock(product_id)
            .await
            .unwrap()
            .quantity
    }

    pub async fn branch_qty(&self, branch_id: Uuid, product_id: Uuid) -> Decimal {
        self.services
            .stock
            .get_branch_quantity(branch_id, product_id)
            .await
            .unwrap()
    }

    /// Raise a request for one product from `actor`'s branch
    pub async fn request(&self, actor: &Actor, product_id: Uuid, quantity: Decimal, urgent: bool) -> StockRequest {
        self.services
            .requests
            .create_request(
                actor,
                CreateRequestInput {
                    items: vec![RequestItemInput {
                        product_id,
                        quantity,
                    }],
                    is_urgent: urgent,
                    note: None,
                },
            )
            .await
            .unwrap()
    }

    /// Approve one line at `quantity`
    pub fn approve_input(product_id: Uuid, quantity: Decimal) -> ApproveRequestInput {
        ApproveRequestInput {
            items: vec![ApproveItemInput {
                product_id,
                approved_quantity: quantity,
            }],
            note: None,
        }
    }

    pub fn receive_input(
        product_id: Uuid,
        received: Decimal,
        returned: Option<Decimal>,
    ) -> ReceiveStockInput {
        ReceiveStockInput {
            items: vec![ReceiveItemInput {
                product_id,
                received_quantity: received,
                returned_quantity: returned,
                reason: None,
            }],
            note: None,
        }
    }

    pub async fn movements_at(&self, product_id: Uuid, location: StockLocation) -> Vec<StockMovement> {
        self.services
            .stock
            .list_movements(&MovementFilter::at(product_id, location))
            .await
            .unwrap()
    }
}
