//! Stock request lifecycle: creation, supervisor routing, approval, dispatch
//! and receipt.
//!
//! Each transition re-reads the request under a row lock, checks the move
//! against [`StockRequestStatus::transition`], applies its stock side effects
//! and writes the request back in the same transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::notification::{LedgerEvent, Notifier};
use super::{check_note, deduct_from, ensure_unique_products, product_label};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::store::{LedgerStore, LedgerTx};

/// Service driving stock requests through their lifecycle
#[derive(Clone)]
pub struct StockRequestService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

/// One product line on a new or edited request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Input for raising a stock request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRequestInput {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<RequestItemInput>,
    #[serde(default)]
    pub is_urgent: bool,
    pub note: Option<String>,
}

/// Input for changing requested quantities before approval
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EditRequestInput {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<RequestItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveItemInput {
    pub product_id: Uuid,
    pub approved_quantity: Decimal,
}

/// Input for central or branch approval. Lines left out are approved at zero.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApproveRequestInput {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ApproveItemInput>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveItemInput {
    pub product_id: Uuid,
    pub received_quantity: Decimal,
    /// Short or defective quantity sent back
    pub returned_quantity: Option<Decimal>,
    pub reason: Option<String>,
}

/// Input for confirming receipt at the requesting branch
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceiveStockInput {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReceiveItemInput>,
    pub note: Option<String>,
}

/// Checked receipt of one line, applied only once every line passed
struct ReceiptLine {
    product_id: Uuid,
    received: Decimal,
    returned: Decimal,
    reason: String,
}

impl StockRequestService {
    /// Create a new StockRequestService instance
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Raise a request for the actor's branch. Urgent requests go to the
    /// supervisor first.
    pub async fn create_request(
        &self,
        actor: &Actor,
        input: CreateRequestInput,
    ) -> AppResult<StockRequest> {
        input.validate()?;
        check_note("note", input.note.as_deref())?;
        ensure_unique_products(input.items.iter().map(|i| i.product_id))?;

        let branch_id = actor.branch_id.ok_or_else(|| {
            AppError::Forbidden("Only branch staff can raise stock requests".to_string())
        })?;

        let lines = input
            .items
            .iter()
            .map(|i| Ok((i.product_id, shared::positive_qty("quantity", i.quantity)?)))
            .collect::<AppResult<Vec<_>>>()?;

        let mut tx = self.store.begin().await?;

        let branch = tx
            .find_active_branch(branch_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Branch".to_string()))?;

        let now = Utc::now();
        let request_id = Uuid::new_v4();
        let mut items = Vec::with_capacity(lines.len());
        for (product_id, quantity) in lines {
            let product = tx
                .find_active_product(product_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))?;
            let mut item = StockRequestItem::new(request_id, product_id, quantity);
            item.product_name = Some(product.name);
            item.unit = Some(product.unit);
            items.push(item);
        }

        let request = StockRequest {
            id: request_id,
            branch_id,
            branch_name: Some(branch.name),
            requested_by: actor.user_id,
            status: StockRequestStatus::initial(input.is_urgent),
            is_urgent: input.is_urgent,
            assigned_branch_id: None,
            supervisor_forwarded_to_central: false,
            note: shared::normalize_note(input.note),
            items,
            approved_at: None,
            dispatched_at: None,
            received_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        };

        tx.insert_request(&request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request.id,
            branch_id = %branch_id,
            status = %request.status,
            "Stock request created"
        );
        self.notifier
            .notify(LedgerEvent::RequestCreated {
                request_id: request.id,
                branch_id,
                is_urgent: request.is_urgent,
            })
            .await;

        Ok(request)
    }

    /// Route an urgent request to another branch for fulfilment
    pub async fn supervisor_assign_branch(
        &self,
        actor: &Actor,
        request_id: Uuid,
        assigned_branch_id: Uuid,
    ) -> AppResult<StockRequest> {
        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::AssignBranch)?;

        if assigned_branch_id == request.branch_id {
            return Err(AppError::validation(
                "branch_id",
                "A request cannot be assigned to the branch that raised it",
            ));
        }
        tx.find_active_branch(assigned_branch_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Branch".to_string()))?;

        request.assigned_branch_id = Some(assigned_branch_id);
        request.updated_at = Utc::now();
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            assigned_branch_id = %assigned_branch_id,
            supervisor = %actor.user_id,
            "Stock request assigned to branch"
        );
        self.notifier
            .notify(LedgerEvent::RequestAssigned {
                request_id,
                assigned_branch_id,
            })
            .await;

        Ok(request)
    }

    /// Send an urgent request on to the central queue
    pub async fn supervisor_forward_to_central(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> AppResult<StockRequest> {
        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::ForwardToCentral)?;
        request.supervisor_forwarded_to_central = true;
        request.updated_at = Utc::now();
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            supervisor = %actor.user_id,
            "Stock request forwarded to central"
        );
        self.notifier
            .notify(LedgerEvent::RequestForwarded { request_id })
            .await;

        Ok(request)
    }

    /// Central approval. Quantities are checked against central stock but
    /// nothing is deducted until dispatch.
    pub async fn approve_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: ApproveRequestInput,
    ) -> AppResult<StockRequest> {
        input.validate()?;
        check_note("note", input.note.as_deref())?;

        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::Approve)?;
        apply_approvals(&mut request, &input.items)?;

        let mut lines: Vec<&StockRequestItem> = request
            .items
            .iter()
            .filter(|i| i.approved() > Decimal::ZERO)
            .collect();
        lines.sort_by_key(|i| i.product_id);

        for item in lines {
            let available = tx
                .lock_central_stock(item.product_id)
                .await?
                .map(|s| s.quantity)
                .unwrap_or(Decimal::ZERO);
            if item.approved() > available {
                let label = product_label(item.product_name.as_deref(), item.product_id);
                tracing::warn!(
                    request_id = %request_id,
                    product = %label,
                    %available,
                    approved = %item.approved(),
                    "Approval exceeds central stock"
                );
                return Err(AppError::InsufficientStock(format!(
                    "{} at central: available {}, requested {}",
                    label,
                    available,
                    item.approved()
                )));
            }
        }

        let now = Utc::now();
        request.approved_at = Some(now);
        request.updated_at = now;
        if let Some(note) = shared::normalize_note(input.note) {
            request.note = Some(note);
        }
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, approver = %actor.user_id, "Stock request approved");
        self.notifier
            .notify(LedgerEvent::RequestApproved {
                request_id,
                approved_by: actor.user_id,
            })
            .await;

        Ok(request)
    }

    /// Approval by the branch a supervisor assigned. Stock leaves the
    /// assigned branch immediately and the request is dispatched.
    pub async fn approve_from_branch(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: ApproveRequestInput,
    ) -> AppResult<StockRequest> {
        input.validate()?;
        check_note("note", input.note.as_deref())?;

        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::ApproveFromBranch)?;

        let source_branch_id = request.assigned_branch_id.ok_or_else(|| {
            AppError::Corrupt(format!(
                "stock request {} awaits branch approval without an assigned branch",
                request_id
            ))
        })?;
        if actor.branch_id != Some(source_branch_id) {
            return Err(AppError::Forbidden(
                "Only the assigned branch can approve this request".to_string(),
            ));
        }

        apply_approvals(&mut request, &input.items)?;

        let destination = request
            .branch_name
            .clone()
            .unwrap_or_else(|| request.branch_id.to_string());
        let mut lines: Vec<&StockRequestItem> = request
            .items
            .iter()
            .filter(|i| i.approved() > Decimal::ZERO)
            .collect();
        lines.sort_by_key(|i| i.product_id);

        for item in lines {
            let quantity = item.approved();
            let label = product_label(item.product_name.as_deref(), item.product_id);
            let mut stock = tx
                .lock_branch_product(source_branch_id, item.product_id)
                .await?
                .unwrap_or_else(|| BranchProduct::empty(source_branch_id, item.product_id));
            stock.quantity = deduct_from(
                stock.quantity,
                quantity,
                &format!("{} at assigned branch", label),
            )?;
            stock.updated_at = Utc::now();
            tx.save_branch_product(&stock).await?;

            let movement = StockMovement::new(
                item.product_id,
                StockLocation::Branch(source_branch_id),
                MovementType::Deduction,
                quantity,
                request.id.to_string(),
            )
            .with_note(format!("Dispatched to {} (branch-to-branch)", destination))
            .with_actors(Some(request.requested_by), Some(actor.user_id));
            tx.insert_movement(&movement).await?;
        }

        let now = Utc::now();
        request.approved_at = Some(now);
        request.dispatched_at = Some(now);
        request.updated_at = now;
        if let Some(note) = shared::normalize_note(input.note) {
            request.note = Some(note);
        }
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            source_branch_id = %source_branch_id,
            "Stock request dispatched branch-to-branch"
        );
        self.notifier
            .notify(LedgerEvent::RequestDispatched {
                request_id,
                branch_id: request.branch_id,
                source_branch_id: Some(source_branch_id),
            })
            .await;

        Ok(request)
    }

    /// Ship an approved request from central stock. All lines succeed or
    /// none do.
    pub async fn dispatch_request(&self, actor: &Actor, request_id: Uuid) -> AppResult<StockRequest> {
        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::Dispatch)?;

        let destination = request
            .branch_name
            .clone()
            .unwrap_or_else(|| request.branch_id.to_string());
        let mut lines: Vec<&StockRequestItem> = request
            .items
            .iter()
            .filter(|i| i.approved() > Decimal::ZERO)
            .collect();
        // Stock rows are always locked in product_id order
        lines.sort_by_key(|i| i.product_id);

        for item in lines {
            let quantity = item.approved();
            let label = product_label(item.product_name.as_deref(), item.product_id);
            let mut stock = tx
                .lock_central_stock(item.product_id)
                .await?
                .unwrap_or_else(|| CentralStock::empty(item.product_id));
            stock.quantity = deduct_from(stock.quantity, quantity, &format!("{} at central", label))?;
            stock.updated_at = Utc::now();
            tx.save_central_stock(&stock).await?;

            let movement = StockMovement::new(
                item.product_id,
                StockLocation::Central,
                MovementType::Deduction,
                quantity,
                request.id.to_string(),
            )
            .with_note(format!("Dispatched to {}", destination))
            .with_actors(Some(request.requested_by), Some(actor.user_id));
            tx.insert_movement(&movement).await?;
        }

        let now = Utc::now();
        request.dispatched_at = Some(now);
        request.updated_at = now;
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, dispatcher = %actor.user_id, "Stock request dispatched");
        self.notifier
            .notify(LedgerEvent::RequestDispatched {
                request_id,
                branch_id: request.branch_id,
                source_branch_id: None,
            })
            .await;

        Ok(request)
    }

    /// Confirm receipt at the requesting branch. Received quantities go on
    /// the shelf; returned quantities are logged as receipt returns only.
    pub async fn receive_stock(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: ReceiveStockInput,
    ) -> AppResult<StockRequest> {
        input.validate()?;
        check_note("note", input.note.as_deref())?;
        ensure_unique_products(input.items.iter().map(|i| i.product_id))?;
        for line in &input.items {
            check_note("reason", line.reason.as_deref())?;
        }

        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !actor.can_act_for_branch(request.branch_id) {
            return Err(AppError::Forbidden(
                "Only the requesting branch can receive this request".to_string(),
            ));
        }
        request.status = request.status.transition(RequestEvent::Receive)?;

        let mut receipt = Vec::with_capacity(input.items.len());
        for line in &input.items {
            let item = request
                .item_for(line.product_id)
                .ok_or_else(|| not_on_request(line.product_id))?;
            let received = shared::non_negative_qty("received_quantity", line.received_quantity)?;
            let returned = match line.returned_quantity {
                Some(q) => shared::non_negative_qty("returned_quantity", q)?,
                None => Decimal::ZERO,
            };
            if received + returned > item.approved() {
                return Err(AppError::invalid_quantity(
                    "received_quantity",
                    format!(
                        "received {} plus returned {} exceeds approved {}",
                        received,
                        returned,
                        item.approved()
                    ),
                ));
            }
            receipt.push(ReceiptLine {
                product_id: line.product_id,
                received,
                returned,
                reason: shared::normalize_note(line.reason.clone())
                    .unwrap_or_else(|| DEFAULT_RETURN_REASON.to_string()),
            });
        }

        receipt.sort_by_key(|line| line.product_id);

        let origin = match request.assigned_branch_id {
            Some(source) => {
                let name = tx
                    .find_active_branch(source)
                    .await?
                    .map(|b| b.name)
                    .unwrap_or_else(|| source.to_string());
                format!("Received from {} (branch-to-branch)", name)
            }
            None => "Received from central".to_string(),
        };

        let now = Utc::now();
        let mut returned_lines = 0;
        for line in receipt {
            let item_id = match request.item_for_mut(line.product_id) {
                Some(item) => {
                    item.received_quantity = Some(line.received);
                    item.returned_quantity = Some(line.returned);
                    item.id
                }
                None => continue,
            };

            if line.received > Decimal::ZERO {
                let mut stock = tx
                    .lock_branch_product(request.branch_id, line.product_id)
                    .await?
                    .unwrap_or_else(|| BranchProduct::empty(request.branch_id, line.product_id));
                stock.quantity = shared::add_qty(stock.quantity, line.received);
                stock.updated_at = now;
                tx.save_branch_product(&stock).await?;

                let movement = StockMovement::new(
                    line.product_id,
                    StockLocation::Branch(request.branch_id),
                    MovementType::Addition,
                    line.received,
                    request.id.to_string(),
                )
                .with_note(origin.clone())
                .with_actors(Some(request.requested_by), Some(actor.user_id));
                tx.insert_movement(&movement).await?;
            }

            if line.returned > Decimal::ZERO {
                let record = StockRequestReturn {
                    id: Uuid::new_v4(),
                    stock_request_id: request.id,
                    stock_request_item_id: item_id,
                    branch_id: request.branch_id,
                    product_id: line.product_id,
                    quantity: line.returned,
                    reason: line.reason,
                    reported_by: actor.user_id,
                    returned_at: now,
                };
                tx.insert_request_return(&record).await?;
                returned_lines += 1;
            }
        }

        request.received_at = Some(now);
        request.updated_at = now;
        if let Some(note) = shared::normalize_note(input.note) {
            request.note = Some(note);
        }
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            returned_lines,
            "Stock request received"
        );
        self.notifier
            .notify(LedgerEvent::RequestReceived {
                request_id,
                branch_id: request.branch_id,
                returned_lines,
            })
            .await;

        Ok(request)
    }

    /// Change requested quantities while the request is still unrouted
    pub async fn edit_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: EditRequestInput,
    ) -> AppResult<StockRequest> {
        input.validate()?;
        ensure_unique_products(input.items.iter().map(|i| i.product_id))?;

        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        if !actor.can_act_for_branch(request.branch_id) {
            return Err(AppError::Forbidden(
                "Only the requesting branch can edit this request".to_string(),
            ));
        }
        request.status = request.status.transition(RequestEvent::Edit)?;

        for line in &input.items {
            let quantity = shared::positive_qty("quantity", line.quantity)?;
            let item = request
                .item_for_mut(line.product_id)
                .ok_or_else(|| not_on_request(line.product_id))?;
            item.requested_quantity = quantity;
        }

        request.updated_at = Utc::now();
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, "Stock request edited");
        self.notifier
            .notify(LedgerEvent::RequestEdited { request_id })
            .await;

        Ok(request)
    }

    /// Reject a request that has not shipped yet
    pub async fn reject_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        note: Option<String>,
    ) -> AppResult<StockRequest> {
        check_note("note", note.as_deref())?;

        let mut tx = self.store.begin().await?;
        let mut request = lock_request(tx.as_mut(), request_id).await?;
        request.status = request.status.transition(RequestEvent::Reject)?;

        let now = Utc::now();
        request.rejected_at = Some(now);
        request.updated_at = now;
        if let Some(note) = shared::normalize_note(note) {
            request.note = Some(note);
        }
        tx.update_request(&request).await?;
        tx.commit().await?;

        tracing::info!(request_id = %request_id, rejected_by = %actor.user_id, "Stock request rejected");
        self.notifier
            .notify(LedgerEvent::RequestRejected { request_id })
            .await;

        Ok(request)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_request(&self, request_id: Uuid) -> AppResult<StockRequest> {
        self.store
            .find_request(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock request".to_string()))
    }

    /// Everything central staff handle: all requests not waiting on a
    /// supervisor or an assigned branch
    pub async fn central_queue(&self) -> AppResult<Vec<StockRequest>> {
        let statuses = StockRequestStatus::ALL
            .into_iter()
            .filter(|s| {
                !matches!(
                    s,
                    StockRequestStatus::PendingSupervisor
                        | StockRequestStatus::PendingBranchApproval
                )
            })
            .collect();
        self.store
            .list_requests(&RequestFilter {
                statuses,
                ..Default::default()
            })
            .await
    }

    /// Urgent requests awaiting routing, oldest first
    pub async fn supervisor_queue(&self) -> AppResult<Vec<StockRequest>> {
        self.store
            .list_requests(&RequestFilter {
                statuses: vec![StockRequestStatus::PendingSupervisor],
                oldest_first: true,
                ..Default::default()
            })
            .await
    }

    /// Requests a supervisor assigned to `branch_id` that still need its approval
    pub async fn assigned_to_branch(&self, branch_id: Uuid) -> AppResult<Vec<StockRequest>> {
        self.store
            .list_requests(&RequestFilter {
                statuses: vec![StockRequestStatus::PendingBranchApproval],
                assigned_branch_id: Some(branch_id),
                ..Default::default()
            })
            .await
    }

    /// Requests raised by `branch_id`, optionally narrowed by status
    pub async fn branch_requests(
        &self,
        branch_id: Uuid,
        statuses: Vec<StockRequestStatus>,
    ) -> AppResult<Vec<StockRequest>> {
        self.store
            .list_requests(&RequestFilter {
                statuses,
                branch_id: Some(branch_id),
                ..Default::default()
            })
            .await
    }

    /// Shortfalls and defects reported at receipt
    pub async fn list_request_returns(
        &self,
        branch_id: Option<Uuid>,
    ) -> AppResult<Vec<StockRequestReturn>> {
        self.store.list_request_returns(branch_id).await
    }
}

async fn lock_request(tx: &mut dyn LedgerTx, request_id: Uuid) -> AppResult<StockRequest> {
    tx.lock_request(request_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock request".to_string()))
}

fn not_on_request(product_id: Uuid) -> AppError {
    AppError::NotFound(format!("Product {} is not part of this request", product_id))
}

/// Set approved quantities from an approval call; lines not mentioned get zero
fn apply_approvals(request: &mut StockRequest, lines: &[ApproveItemInput]) -> AppResult<()> {
    ensure_unique_products(lines.iter().map(|l| l.product_id))?;

    let mut approved: HashMap<Uuid, Decimal> = HashMap::with_capacity(lines.len());
    for line in lines {
        if request.item_for(line.product_id).is_none() {
            return Err(not_on_request(line.product_id));
        }
        let quantity = shared::non_negative_qty("approved_quantity", line.approved_quantity)?;
        approved.insert(line.product_id, quantity);
    }

    for item in request.items.iter_mut() {
        let quantity = approved
            .get(&item.product_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if quantity > item.requested_quantity {
            return Err(AppError::invalid_quantity(
                "approved_quantity",
                format!(
                    "approved {} exceeds requested {} for {}",
                    quantity,
                    item.requested_quantity,
                    product_label(item.product_name.as_deref(), item.product_id)
                ),
            ));
        }
        item.approved_quantity = Some(quantity);
    }

    Ok(())
}
