//! Branch-initiated returns to central (expired, defective or surplus stock)

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::notification::{LedgerEvent, Notifier};
use super::{check_note, deduct_from, product_label};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::store::{LedgerStore, LedgerTx};

/// Service for branch returns
#[derive(Clone)]
pub struct BranchReturnService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub reason: ReturnReason,
    pub note: Option<String>,
}

/// Input for a branch return. The same product may appear on several
/// lines with different reasons.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReturnInput {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnItemInput>,
    pub note: Option<String>,
}

impl BranchReturnService {
    /// Create a new BranchReturnService instance
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Record a return for the actor's branch. Stock is only checked here;
    /// it leaves the branch on approval.
    pub async fn create_return(
        &self,
        actor: &Actor,
        input: CreateReturnInput,
    ) -> AppResult<BranchReturn> {
        input.validate()?;
        check_note("note", input.note.as_deref())?;
        for line in &input.items {
            check_note("items.note", line.note.as_deref())?;
        }

        let branch_id = actor.branch_id.ok_or_else(|| {
            AppError::Forbidden("Only branch staff can return stock".to_string())
        })?;

        let mut totals: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        for line in &input.items {
            let quantity = shared::positive_qty("quantity", line.quantity)?;
            *totals.entry(line.product_id).or_insert(Decimal::ZERO) += quantity;
        }

        let mut tx = self.store.begin().await?;

        let branch = tx
            .find_active_branch(branch_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Branch".to_string()))?;

        let mut names: BTreeMap<Uuid, String> = BTreeMap::new();
        for (product_id, requested) in &totals {
            let product = tx
                .find_active_product(*product_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))?;
            let available = tx
                .lock_branch_product(branch_id, *product_id)
                .await?
                .map(|bp| bp.quantity)
                .unwrap_or(Decimal::ZERO);
            if *requested > available {
                tracing::warn!(
                    branch_id = %branch_id,
                    product_id = %product_id,
                    %available,
                    %requested,
                    "Return exceeds branch stock"
                );
                return Err(AppError::InsufficientStock(format!(
                    "{} at {}: available {}, requested {}",
                    product.name, branch.name, available, requested
                )));
            }
            names.insert(*product_id, product.name);
        }

        let now = Utc::now();
        let return_id = Uuid::new_v4();
        let items = input
            .items
            .into_iter()
            .map(|line| BranchReturnItem {
                id: Uuid::new_v4(),
                branch_return_id: return_id,
                product_id: line.product_id,
                product_name: names.get(&line.product_id).cloned(),
                quantity: shared::round_qty(line.quantity),
                reason: line.reason,
                note: shared::normalize_note(line.note),
            })
            .collect();

        let ret = BranchReturn {
            id: return_id,
            branch_id,
            branch_name: Some(branch.name),
            requested_by: actor.user_id,
            status: BranchReturnStatus::Pending,
            note: shared::normalize_note(input.note),
            items,
            approved_by: None,
            approved_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        };

        tx.insert_branch_return(&ret).await?;
        tx.commit().await?;

        tracing::info!(return_id = %ret.id, branch_id = %branch_id, "Branch return created");
        self.notifier
            .notify(LedgerEvent::ReturnCreated {
                return_id: ret.id,
                branch_id,
            })
            .await;

        Ok(ret)
    }

    /// Take returned stock off the branch shelf and log its arrival at
    /// central. Central stock itself is left untouched.
    pub async fn approve_return(&self, actor: &Actor, return_id: Uuid) -> AppResult<BranchReturn> {
        let mut tx = self.store.begin().await?;
        let mut ret = lock_pending(tx.as_mut(), return_id).await?;

        let mut lines: Vec<&BranchReturnItem> = ret.items.iter().collect();
        lines.sort_by_key(|i| i.product_id);

        let now = Utc::now();
        for item in lines {
            let label = product_label(item.product_name.as_deref(), item.product_id);
            let mut stock = tx
                .lock_branch_product(ret.branch_id, item.product_id)
                .await?
                .unwrap_or_else(|| BranchProduct::empty(ret.branch_id, item.product_id));
            stock.quantity =
                deduct_from(stock.quantity, item.quantity, &format!("{} at branch", label))?;
            stock.updated_at = now;
            tx.save_branch_product(&stock).await?;

            let movement = StockMovement::new(
                item.product_id,
                StockLocation::Branch(ret.branch_id),
                MovementType::Deduction,
                item.quantity,
                ret.id.to_string(),
            )
            .with_note(return_movement_note(item.reason, item.note.as_deref()))
            .with_actors(Some(ret.requested_by), Some(actor.user_id));
            tx.insert_movement(&movement).await?;

            tx.insert_central_returned_stock(&CentralReturnedStock {
                id: Uuid::new_v4(),
                branch_return_id: ret.id,
                branch_id: ret.branch_id,
                product_id: item.product_id,
                quantity: item.quantity,
                reason: item.reason,
                received_by: actor.user_id,
                received_at: now,
            })
            .await?;
        }

        ret.status = BranchReturnStatus::Approved;
        ret.approved_by = Some(actor.user_id);
        ret.approved_at = Some(now);
        ret.updated_at = now;
        tx.update_branch_return(&ret).await?;
        tx.commit().await?;

        tracing::info!(return_id = %return_id, approver = %actor.user_id, "Branch return approved");
        self.notifier
            .notify(LedgerEvent::ReturnApproved {
                return_id,
                branch_id: ret.branch_id,
            })
            .await;

        Ok(ret)
    }

    pub async fn reject_return(
        &self,
        actor: &Actor,
        return_id: Uuid,
        note: Option<String>,
    ) -> AppResult<BranchReturn> {
        check_note("note", note.as_deref())?;

        let mut tx = self.store.begin().await?;
        let mut ret = lock_pending(tx.as_mut(), return_id).await?;

        let now = Utc::now();
        ret.status = BranchReturnStatus::Rejected;
        ret.rejected_at = Some(now);
        ret.updated_at = now;
        if let Some(note) = shared::normalize_note(note) {
            ret.note = Some(note);
        }
        tx.update_branch_return(&ret).await?;
        tx.commit().await?;

        tracing::info!(return_id = %return_id, rejected_by = %actor.user_id, "Branch return rejected");
        self.notifier
            .notify(LedgerEvent::ReturnRejected {
                return_id,
                branch_id: ret.branch_id,
            })
            .await;

        Ok(ret)
    }

    pub async fn get_return(&self, return_id: Uuid) -> AppResult<BranchReturn> {
        self.store
            .find_branch_return(return_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Branch return".to_string()))
    }

    /// Returns awaiting a central decision
    pub async fn pending_returns(&self) -> AppResult<Vec<BranchReturn>> {
        self.store
            .list_branch_returns(&ReturnFilter {
                status: Some(BranchReturnStatus::Pending),
                ..Default::default()
            })
            .await
    }

    pub async fn branch_returns(&self, branch_id: Uuid) -> AppResult<Vec<BranchReturn>> {
        self.store
            .list_branch_returns(&ReturnFilter {
                branch_id: Some(branch_id),
                ..Default::default()
            })
            .await
    }

    /// Everything logged at central from approved returns
    pub async fn central_returned_stock(&self) -> AppResult<Vec<CentralReturnedStock>> {
        self.store.list_central_returned_stock().await
    }
}

async fn lock_pending(tx: &mut dyn LedgerTx, return_id: Uuid) -> AppResult<BranchReturn> {
    let ret = tx
        .lock_branch_return(return_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Branch return".to_string()))?;
    if ret.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "branch return is already {}",
            ret.status
        )));
    }
    Ok(ret)
}
