//! Persistence seam for the ledger
//!
//! Services talk to a [`LedgerStore`] for reads and open a [`LedgerTx`] for
//! every mutation. A transaction that is dropped without [`LedgerTx::commit`]
//! leaves no trace.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Read access plus the entry point for transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction; `lock_*` reads inside it hold their rows until commit
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;

    async fn find_active_product(&self, id: Uuid) -> AppResult<Option<Product>>;

    async fn find_active_branch(&self, id: Uuid) -> AppResult<Option<Branch>>;

    async fn find_request(&self, id: Uuid) -> AppResult<Option<StockRequest>>;

    async fn list_requests(&self, filter: &RequestFilter) -> AppResult<Vec<StockRequest>>;

    /// Receipt shortfalls, newest first
    async fn list_request_returns(
        &self,
        branch_id: Option<Uuid>,
    ) -> AppResult<Vec<StockRequestReturn>>;

    async fn find_branch_return(&self, id: Uuid) -> AppResult<Option<BranchReturn>>;

    async fn list_branch_returns(&self, filter: &ReturnFilter) -> AppResult<Vec<BranchReturn>>;

    async fn list_central_returned_stock(&self) -> AppResult<Vec<CentralReturnedStock>>;

    async fn find_central_stock(&self, product_id: Uuid) -> AppResult<Option<CentralStock>>;

    async fn find_branch_product(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>>;

    async fn find_sales_report(&self, id: Uuid) -> AppResult<Option<SalesReport>>;

    /// Reports of one branch, latest period first
    async fn list_sales_reports(&self, branch_id: Uuid) -> AppResult<Vec<SalesReport>>;

    /// Movements in ledger order (oldest first)
    async fn list_movements(&self, filter: &MovementFilter) -> AppResult<Vec<StockMovement>>;

    /// One page of alerts, newest first, plus the total match count
    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        pagination: &Pagination,
    ) -> AppResult<(Vec<Alert>, u64)>;
}

/// One unit of work against the ledger
#[async_trait]
pub trait LedgerTx: Send {
    async fn find_active_product(&mut self, id: Uuid) -> AppResult<Option<Product>>;

    async fn find_active_branch(&mut self, id: Uuid) -> AppResult<Option<Branch>>;

    // ------------------------------------------------------------------
    // Stock requests
    // ------------------------------------------------------------------

    async fn lock_request(&mut self, id: Uuid) -> AppResult<Option<StockRequest>>;

    /// Persist a new request together with its items
    async fn insert_request(&mut self, request: &StockRequest) -> AppResult<()>;

    /// Write back status, routing, timestamps and every item's quantities
    async fn update_request(&mut self, request: &StockRequest) -> AppResult<()>;

    async fn insert_request_return(&mut self, record: &StockRequestReturn) -> AppResult<()>;

    /// Whether a PENDING, APPROVED or DISPATCHED request covers the product
    async fn has_open_request(&mut self, branch_id: Uuid, product_id: Uuid) -> AppResult<bool>;

    // ------------------------------------------------------------------
    // Stock levels and movements
    // ------------------------------------------------------------------

    async fn lock_central_stock(&mut self, product_id: Uuid) -> AppResult<Option<CentralStock>>;

    /// Insert or update by product
    async fn save_central_stock(&mut self, stock: &CentralStock) -> AppResult<()>;

    async fn lock_branch_product(
        &mut self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>>;

    /// Insert or update by (branch, product)
    async fn save_branch_product(&mut self, stock: &BranchProduct) -> AppResult<()>;

    async fn insert_movement(&mut self, movement: &StockMovement) -> AppResult<()>;

    /// Active branch stock rows with display names, for the alert scan
    async fn list_stock_levels(&mut self) -> AppResult<Vec<StockLevel>>;

    // ------------------------------------------------------------------
    // Branch returns
    // ------------------------------------------------------------------

    async fn lock_branch_return(&mut self, id: Uuid) -> AppResult<Option<BranchReturn>>;

    async fn insert_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()>;

    async fn update_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()>;

    async fn insert_central_returned_stock(
        &mut self,
        record: &CentralReturnedStock,
    ) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Sales reports
    // ------------------------------------------------------------------

    /// Whether the branch already has a report for exactly this period
    async fn sales_report_exists(&mut self, branch_id: Uuid, period: &DateRange) -> AppResult<bool>;

    /// Persist a report with its items. A second report for the same
    /// (branch, period) fails with `Conflict`.
    async fn insert_sales_report(&mut self, report: &SalesReport) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Insert unless an open alert with the same (branch, product, type)
    /// exists. Returns whether a row was written.
    async fn insert_alert_if_absent(&mut self, alert: &Alert) -> AppResult<bool>;

    async fn lock_alert(&mut self, id: Uuid) -> AppResult<Option<Alert>>;

    async fn update_alert(&mut self, alert: &Alert) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
