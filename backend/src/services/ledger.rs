//! Central stock ledger: purchases into the warehouse and ledger read-side

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::notification::{LedgerEvent, Notifier};
use super::check_note;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::store::LedgerStore;

/// Service for central stock additions and ledger checks
#[derive(Clone)]
pub struct CentralStockService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

/// Input for adding stock to the central warehouse
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddStockInput {
    pub product_id: Uuid,
    /// Purchase order, invoice or other external reference
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
    pub quantity: Decimal,
    pub note: Option<String>,
}

impl CentralStockService {
    /// Create a new CentralStockService instance
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Increase central stock of a product and record an ADDITION movement
    pub async fn add_stock(
        &self,
        actor: Option<&Actor>,
        input: AddStockInput,
    ) -> AppResult<CentralStock> {
        input.validate()?;
        shared::validate_reference(&input.reference)
            .map_err(|msg| AppError::validation("reference", msg))?;
        check_note("note", input.note.as_deref())?;
        let quantity = shared::positive_qty("quantity", input.quantity)?;
        let reference = input.reference.trim().to_string();

        let mut tx = self.store.begin().await?;

        tx.find_active_product(input.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        let mut stock = tx
            .lock_central_stock(input.product_id)
            .await?
            .unwrap_or_else(|| CentralStock::empty(input.product_id));
        stock.quantity = shared::add_qty(stock.quantity, quantity);
        stock.updated_at = Utc::now();
        tx.save_central_stock(&stock).await?;

        let mut movement = StockMovement::new(
            input.product_id,
            StockLocation::Central,
            MovementType::Addition,
            quantity,
            reference.clone(),
        )
        .with_actors(actor.map(|a| a.user_id), None);
        if let Some(note) = shared::normalize_note(input.note) {
            movement = movement.with_note(note);
        }
        tx.insert_movement(&movement).await?;

        tx.commit().await?;

        tracing::info!(
            product_id = %input.product_id,
            %quantity,
            reference = %reference,
            "Central stock added"
        );
        self.notifier
            .notify(LedgerEvent::CentralStockAdded {
                product_id: input.product_id,
                quantity,
                reference,
            })
            .await;

        Ok(stock)
    }

    /// Current central stock row of a product
    pub async fn get_central_stock(&self, product_id: Uuid) -> AppResult<CentralStock> {
        self.store
            .find_central_stock(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Central stock".to_string()))
    }

    /// Current stock of a product at a branch (zero when never received)
    pub async fn get_branch_quantity(&self, branch_id: Uuid, product_id: Uuid) -> AppResult<Decimal> {
        Ok(self
            .store
            .find_branch_product(branch_id, product_id)
            .await?
            .map(|bp| bp.quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Movements for a product at a location, oldest first
    pub async fn list_movements(&self, filter: &MovementFilter) -> AppResult<Vec<StockMovement>> {
        self.store.list_movements(filter).await
    }

    /// Totals in and out for a product at one location
    pub async fn stock_summary(
        &self,
        product_id: Uuid,
        location: StockLocation,
        range: Option<DateRange>,
    ) -> AppResult<StockSummary> {
        let filter = MovementFilter {
            range,
            ..MovementFilter::at(product_id, location)
        };
        let movements = self.store.list_movements(&filter).await?;

        let (first, last) = match (movements.first(), movements.last()) {
            (Some(first), Some(last)) => (first.created_at, last.created_at),
            _ => return Err(AppError::NotFound("Stock movements".to_string())),
        };

        let (total_in, total_out) =
            movements
                .iter()
                .fold((Decimal::ZERO, Decimal::ZERO), |(inbound, outbound), m| {
                    if m.movement_type.is_inbound() {
                        (inbound + m.quantity, outbound)
                    } else {
                        (inbound, outbound + m.quantity)
                    }
                });

        Ok(StockSummary {
            product_id,
            location,
            total_in: shared::round_qty(total_in),
            total_out: shared::round_qty(total_out),
            net: shared::round_qty(total_in - total_out),
            movement_count: movements.len(),
            first_movement_at: first,
            last_movement_at: last,
        })
    }

    /// Compare the stored quantity of a location with its movement history
    pub async fn verify_location(
        &self,
        product_id: Uuid,
        location: StockLocation,
    ) -> AppResult<LedgerCheck> {
        let stored_quantity = match location {
            StockLocation::Central => self
                .store
                .find_central_stock(product_id)
                .await?
                .map(|s| s.quantity),
            StockLocation::Branch(branch_id) => self
                .store
                .find_branch_product(branch_id, product_id)
                .await?
                .map(|s| s.quantity),
        }
        .unwrap_or(Decimal::ZERO);

        let movements = self
            .store
            .list_movements(&MovementFilter::at(product_id, location))
            .await?;

        let check = LedgerCheck {
            product_id,
            location,
            stored_quantity,
            ledger_quantity: ledger_balance(&movements, product_id, location),
        };

        if !check.is_consistent() {
            tracing::error!(
                product_id = %product_id,
                location = ?location,
                stored = %check.stored_quantity,
                ledger = %check.ledger_quantity,
                "Stored quantity does not match the movement ledger"
            );
        }

        Ok(check)
    }
}
