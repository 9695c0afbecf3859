//! In-memory ledger store for tests and local runs
//!
//! One async mutex guards the whole state. A transaction holds the lock for
//! its lifetime and restores a snapshot when dropped without commit, so the
//! adapter serialises writers the way row locks do in PostgreSQL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult};
use crate::models::*;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    branches: HashMap<Uuid, Branch>,
    central_stock: HashMap<Uuid, CentralStock>,
    branch_products: HashMap<(Uuid, Uuid), BranchProduct>,
    movements: Vec<StockMovement>,
    requests: Vec<StockRequest>,
    request_returns: Vec<StockRequestReturn>,
    branch_returns: Vec<BranchReturn>,
    central_returned: Vec<CentralReturnedStock>,
    sales_reports: Vec<SalesReport>,
    alerts: Vec<Alert>,
}

impl MemoryState {
    fn active_product(&self, id: Uuid) -> Option<Product> {
        self.products.get(&id).filter(|p| p.is_active).cloned()
    }

    fn active_branch(&self, id: Uuid) -> Option<Branch> {
        self.branches.get(&id).filter(|b| b.is_active).cloned()
    }

    /// Fill display names the way the SQL joins do
    fn decorate_request(&self, mut request: StockRequest) -> StockRequest {
        request.branch_name = self.branches.get(&request.branch_id).map(|b| b.name.clone());
        for item in request.items.iter_mut() {
            if let Some(product) = self.products.get(&item.product_id) {
                item.product_name = Some(product.name.clone());
                item.unit = Some(product.unit.clone());
            }
        }
        request
    }

    fn decorate_return(&self, mut ret: BranchReturn) -> BranchReturn {
        ret.branch_name = self.branches.get(&ret.branch_id).map(|b| b.name.clone());
        for item in ret.items.iter_mut() {
            item.product_name = self.products.get(&item.product_id).map(|p| p.name.clone());
        }
        ret
    }

    fn decorate_sales_report(&self, mut report: SalesReport) -> SalesReport {
        report.branch_name = self.branches.get(&report.branch_id).map(|b| b.name.clone());
        for item in report.items.iter_mut() {
            item.product_name = self.products.get(&item.product_id).map(|p| p.name.clone());
        }
        report
    }

    fn request(&self, id: Uuid) -> Option<StockRequest> {
        self.requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(|r| self.decorate_request(r))
    }

    fn branch_return(&self, id: Uuid) -> Option<BranchReturn> {
        self.branch_returns
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(|r| self.decorate_return(r))
    }
}

/// Ledger store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product together with its empty central stock row
    pub async fn insert_product(&self, product: Product) {
        let mut state = self.state.lock().await;
        state
            .central_stock
            .entry(product.id)
            .or_insert_with(|| CentralStock::empty(product.id));
        state.products.insert(product.id, product);
    }

    pub async fn insert_branch(&self, branch: Branch) {
        let mut state = self.state.lock().await;
        state.branches.insert(branch.id, branch);
    }

    pub async fn set_product_active(&self, product_id: Uuid, is_active: bool) {
        let mut state = self.state.lock().await;
        if let Some(product) = state.products.get_mut(&product_id) {
            product.is_active = is_active;
        }
    }

    pub async fn set_branch_active(&self, branch_id: Uuid, is_active: bool) {
        let mut state = self.state.lock().await;
        if let Some(branch) = state.branches.get_mut(&branch_id) {
            branch.is_active = is_active;
        }
    }

    /// Put opening stock on a branch shelf, recorded as an ADDITION movement
    pub async fn seed_branch_stock(&self, branch_id: Uuid, product_id: Uuid, quantity: Decimal) {
        let mut state = self.state.lock().await;
        let row = state
            .branch_products
            .entry((branch_id, product_id))
            .or_insert_with(|| BranchProduct::empty(branch_id, product_id));
        row.quantity = shared::add_qty(row.quantity, quantity);
        state.movements.push(
            StockMovement::new(
                product_id,
                StockLocation::Branch(branch_id),
                MovementType::Addition,
                quantity,
                "opening-balance",
            )
            .with_note("Opening balance"),
        );
    }
}

fn newest_first<T, F>(mut rows: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    rows.reverse();
    rows.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    rows
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryLedgerTx {
            state: guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn find_active_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.state.lock().await.active_product(id))
    }

    async fn find_active_branch(&self, id: Uuid) -> AppResult<Option<Branch>> {
        Ok(self.state.lock().await.active_branch(id))
    }

    async fn find_request(&self, id: Uuid) -> AppResult<Option<StockRequest>> {
        Ok(self.state.lock().await.request(id))
    }

    async fn list_requests(&self, filter: &RequestFilter) -> AppResult<Vec<StockRequest>> {
        let state = self.state.lock().await;
        let rows: Vec<StockRequest> = state
            .requests
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .map(|r| state.decorate_request(r))
            .collect();

        if filter.oldest_first {
            let mut rows = rows;
            rows.sort_by_key(|r| r.created_at);
            Ok(rows)
        } else {
            Ok(newest_first(rows, |r| r.created_at))
        }
    }

    async fn list_request_returns(
        &self,
        branch_id: Option<Uuid>,
    ) -> AppResult<Vec<StockRequestReturn>> {
        let state = self.state.lock().await;
        let rows: Vec<StockRequestReturn> = state
            .request_returns
            .iter()
            .filter(|r| branch_id.map_or(true, |b| b == r.branch_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.returned_at))
    }

    async fn find_branch_return(&self, id: Uuid) -> AppResult<Option<BranchReturn>> {
        Ok(self.state.lock().await.branch_return(id))
    }

    async fn list_branch_returns(&self, filter: &ReturnFilter) -> AppResult<Vec<BranchReturn>> {
        let state = self.state.lock().await;
        let rows: Vec<BranchReturn> = state
            .branch_returns
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .map(|r| state.decorate_return(r))
            .collect();
        Ok(newest_first(rows, |r| r.created_at))
    }

    async fn list_central_returned_stock(&self) -> AppResult<Vec<CentralReturnedStock>> {
        let state = self.state.lock().await;
        Ok(newest_first(state.central_returned.clone(), |r| r.received_at))
    }

    async fn find_central_stock(&self, product_id: Uuid) -> AppResult<Option<CentralStock>> {
        Ok(self.state.lock().await.central_stock.get(&product_id).cloned())
    }

    async fn find_branch_product(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>> {
        Ok(self
            .state
            .lock()
            .await
            .branch_products
            .get(&(branch_id, product_id))
            .cloned())
    }

    async fn find_sales_report(&self, id: Uuid) -> AppResult<Option<SalesReport>> {
        let state = self.state.lock().await;
        Ok(state
            .sales_reports
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(|r| state.decorate_sales_report(r)))
    }

    async fn list_sales_reports(&self, branch_id: Uuid) -> AppResult<Vec<SalesReport>> {
        let state = self.state.lock().await;
        let mut rows: Vec<SalesReport> = state
            .sales_reports
            .iter()
            .filter(|r| r.branch_id == branch_id)
            .cloned()
            .map(|r| state.decorate_sales_report(r))
            .collect();
        rows.sort_by(|a, b| (b.start_date, b.end_date).cmp(&(a.start_date, a.end_date)));
        Ok(rows)
    }

    async fn list_movements(&self, filter: &MovementFilter) -> AppResult<Vec<StockMovement>> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        pagination: &Pagination,
    ) -> AppResult<(Vec<Alert>, u64)> {
        let state = self.state.lock().await;
        let rows: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        let total = rows.len() as u64;
        let page = newest_first(rows, |a| a.created_at)
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok((page, total))
    }
}

/// Transaction over [`MemoryLedgerStore`]
pub struct MemoryLedgerTx {
    state: OwnedMutexGuard<MemoryState>,
    /// State at `begin`; restored on drop unless committed
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.state = snapshot;
        }
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn find_active_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.state.active_product(id))
    }

    async fn find_active_branch(&mut self, id: Uuid) -> AppResult<Option<Branch>> {
        Ok(self.state.active_branch(id))
    }

    async fn lock_request(&mut self, id: Uuid) -> AppResult<Option<StockRequest>> {
        Ok(self.state.request(id))
    }

    async fn insert_request(&mut self, request: &StockRequest) -> AppResult<()> {
        self.state.requests.push(request.clone());
        Ok(())
    }

    async fn update_request(&mut self, request: &StockRequest) -> AppResult<()> {
        if let Some(stored) = self.state.requests.iter_mut().find(|r| r.id == request.id) {
            *stored = request.clone();
        }
        Ok(())
    }

    async fn insert_request_return(&mut self, record: &StockRequestReturn) -> AppResult<()> {
        self.state.request_returns.push(record.clone());
        Ok(())
    }

    async fn has_open_request(&mut self, branch_id: Uuid, product_id: Uuid) -> AppResult<bool> {
        Ok(self.state.requests.iter().any(|r| {
            r.branch_id == branch_id
                && r.status.is_open()
                && r.items.iter().any(|i| i.product_id == product_id)
        }))
    }

    async fn lock_central_stock(&mut self, product_id: Uuid) -> AppResult<Option<CentralStock>> {
        Ok(self.state.central_stock.get(&product_id).cloned())
    }

    async fn save_central_stock(&mut self, stock: &CentralStock) -> AppResult<()> {
        self.state
            .central_stock
            .insert(stock.product_id, stock.clone());
        Ok(())
    }

    async fn lock_branch_product(
        &mut self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>> {
        Ok(self
            .state
            .branch_products
            .get(&(branch_id, product_id))
            .cloned())
    }

    async fn save_branch_product(&mut self, stock: &BranchProduct) -> AppResult<()> {
        self.state
            .branch_products
            .insert((stock.branch_id, stock.product_id), stock.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> AppResult<()> {
        self.state.movements.push(movement.clone());
        Ok(())
    }

    async fn list_stock_levels(&mut self) -> AppResult<Vec<StockLevel>> {
        let state = &*self.state;
        let mut levels: Vec<StockLevel> = state
            .branch_products
            .values()
            .filter(|bp| bp.is_active)
            .filter_map(|bp| {
                let branch = state.active_branch(bp.branch_id)?;
                let product = state.active_product(bp.product_id)?;
                Some(StockLevel {
                    branch_id: bp.branch_id,
                    branch_name: branch.name,
                    product_id: bp.product_id,
                    product_name: product.name,
                    unit: product.unit,
                    quantity: bp.quantity,
                })
            })
            .collect();
        levels.sort_by(|a, b| {
            (a.branch_name.as_str(), a.product_name.as_str())
                .cmp(&(b.branch_name.as_str(), b.product_name.as_str()))
        });
        Ok(levels)
    }

    async fn lock_branch_return(&mut self, id: Uuid) -> AppResult<Option<BranchReturn>> {
        Ok(self.state.branch_return(id))
    }

    async fn insert_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()> {
        self.state.branch_returns.push(ret.clone());
        Ok(())
    }

    async fn update_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()> {
        if let Some(stored) = self.state.branch_returns.iter_mut().find(|r| r.id == ret.id) {
            *stored = ret.clone();
        }
        Ok(())
    }

    async fn insert_central_returned_stock(
        &mut self,
        record: &CentralReturnedStock,
    ) -> AppResult<()> {
        self.state.central_returned.push(record.clone());
        Ok(())
    }

    async fn sales_report_exists(&mut self, branch_id: Uuid, period: &DateRange) -> AppResult<bool> {
        Ok(self.state.sales_reports.iter().any(|r| {
            r.branch_id == branch_id && r.start_date == period.start && r.end_date == period.end
        }))
    }

    async fn insert_sales_report(&mut self, report: &SalesReport) -> AppResult<()> {
        if self.sales_report_exists(report.branch_id, &report.period()).await? {
            return Err(AppError::Conflict(format!(
                "sales report for branch {} from {} to {} already exists",
                report.branch_id, report.start_date, report.end_date
            )));
        }
        self.state.sales_reports.push(report.clone());
        Ok(())
    }

    async fn insert_alert_if_absent(&mut self, alert: &Alert) -> AppResult<bool> {
        let duplicate = self.state.alerts.iter().any(|a| {
            a.status.is_open()
                && a.branch_id == alert.branch_id
                && a.product_id == alert.product_id
                && a.alert_type == alert.alert_type
        });
        if duplicate {
            return Ok(false);
        }
        self.state.alerts.push(alert.clone());
        Ok(true)
    }

    async fn lock_alert(&mut self, id: Uuid) -> AppResult<Option<Alert>> {
        Ok(self.state.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn update_alert(&mut self, alert: &Alert) -> AppResult<()> {
        if let Some(stored) = self.state.alerts.iter_mut().find(|a| a.id == alert.id) {
            *stored = alert.clone();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut this = self;
        this.snapshot = None;
        Ok(())
    }
}
