//! PostgreSQL ledger store
//!
//! Every `lock_*` read uses `SELECT ... FOR UPDATE` so concurrent writers on
//! the same request, return, alert or stock row queue behind each other.
//! Stock rows that do not exist yet are guarded by an advisory lock on their
//! key until the first writer has inserted them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult};
use crate::models::*;

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    /// Create a new PgLedgerStore instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Transaction over [`PgLedgerStore`]; rolled back by sqlx when dropped
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Rows
// ============================================================================

fn parse_column<T>(
    column: &str,
    value: &str,
    parse: fn(&str) -> Option<T>,
) -> AppResult<T> {
    parse(value).ok_or_else(|| AppError::Corrupt(format!("{} = '{}'", column, value)))
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    sku: String,
    unit: String,
    is_active: bool,
    category_id: Option<Uuid>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            sku: row.sku,
            unit: row.unit,
            is_active: row.is_active,
            category_id: row.category_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct BranchRow {
    id: Uuid,
    name: String,
    location: Option<String>,
    is_active: bool,
}

impl From<BranchRow> for Branch {
    fn from(row: BranchRow) -> Self {
        Branch {
            id: row.id,
            name: row.name,
            location: row.location,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct CentralStockRow {
    id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CentralStockRow> for CentralStock {
    fn from(row: CentralStockRow) -> Self {
        CentralStock {
            id: row.id,
            product_id: row.product_id,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BranchProductRow {
    id: Uuid,
    branch_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    price: Option<Decimal>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BranchProductRow> for BranchProduct {
    fn from(row: BranchProductRow) -> Self {
        BranchProduct {
            id: row.id,
            branch_id: row.branch_id,
            product_id: row.product_id,
            quantity: row.quantity,
            price: row.price,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    product_id: Uuid,
    branch_id: Option<Uuid>,
    movement_type: String,
    quantity: Decimal,
    reference: String,
    note: Option<String>,
    requested_by: Option<Uuid>,
    approved_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> AppResult<Self> {
        Ok(StockMovement {
            id: row.id,
            product_id: row.product_id,
            branch_id: row.branch_id,
            movement_type: parse_column(
                "stock_movements.movement_type",
                &row.movement_type,
                MovementType::from_str,
            )?,
            quantity: row.quantity,
            reference: row.reference,
            note: row.note,
            requested_by: row.requested_by,
            approved_by: row.approved_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    branch_id: Uuid,
    branch_name: Option<String>,
    requested_by: Uuid,
    status: String,
    is_urgent: bool,
    assigned_branch_id: Option<Uuid>,
    supervisor_forwarded_to_central: bool,
    note: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn into_request(self, items: Vec<StockRequestItem>) -> AppResult<StockRequest> {
        Ok(StockRequest {
            id: self.id,
            branch_id: self.branch_id,
            branch_name: self.branch_name,
            requested_by: self.requested_by,
            status: parse_column(
                "stock_requests.status",
                &self.status,
                StockRequestStatus::from_str,
            )?,
            is_urgent: self.is_urgent,
            assigned_branch_id: self.assigned_branch_id,
            supervisor_forwarded_to_central: self.supervisor_forwarded_to_central,
            note: self.note,
            items,
            approved_at: self.approved_at,
            dispatched_at: self.dispatched_at,
            received_at: self.received_at,
            rejected_at: self.rejected_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RequestItemRow {
    id: Uuid,
    stock_request_id: Uuid,
    product_id: Uuid,
    product_name: Option<String>,
    unit: Option<String>,
    requested_quantity: Decimal,
    approved_quantity: Option<Decimal>,
    received_quantity: Option<Decimal>,
    returned_quantity: Option<Decimal>,
}

impl From<RequestItemRow> for StockRequestItem {
    fn from(row: RequestItemRow) -> Self {
        StockRequestItem {
            id: row.id,
            stock_request_id: row.stock_request_id,
            product_id: row.product_id,
            product_name: row.product_name,
            unit: row.unit,
            requested_quantity: row.requested_quantity,
            approved_quantity: row.approved_quantity,
            received_quantity: row.received_quantity,
            returned_quantity: row.returned_quantity,
        }
    }
}

#[derive(Debug, FromRow)]
struct RequestReturnRow {
    id: Uuid,
    stock_request_id: Uuid,
    stock_request_item_id: Uuid,
    branch_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    reason: String,
    reported_by: Uuid,
    returned_at: DateTime<Utc>,
}

impl From<RequestReturnRow> for StockRequestReturn {
    fn from(row: RequestReturnRow) -> Self {
        StockRequestReturn {
            id: row.id,
            stock_request_id: row.stock_request_id,
            stock_request_item_id: row.stock_request_item_id,
            branch_id: row.branch_id,
            product_id: row.product_id,
            quantity: row.quantity,
            reason: row.reason,
            reported_by: row.reported_by,
            returned_at: row.returned_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BranchReturnRow {
    id: Uuid,
    branch_id: Uuid,
    branch_name: Option<String>,
    requested_by: Uuid,
    status: String,
    note: Option<String>,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BranchReturnRow {
    fn into_return(self, items: Vec<BranchReturnItem>) -> AppResult<BranchReturn> {
        Ok(BranchReturn {
            id: self.id,
            branch_id: self.branch_id,
            branch_name: self.branch_name,
            requested_by: self.requested_by,
            status: parse_column(
                "branch_returns.status",
                &self.status,
                BranchReturnStatus::from_str,
            )?,
            note: self.note,
            items,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            rejected_at: self.rejected_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BranchReturnItemRow {
    id: Uuid,
    branch_return_id: Uuid,
    product_id: Uuid,
    product_name: Option<String>,
    quantity: Decimal,
    reason: String,
    note: Option<String>,
}

impl TryFrom<BranchReturnItemRow> for BranchReturnItem {
    type Error = AppError;

    fn try_from(row: BranchReturnItemRow) -> AppResult<Self> {
        Ok(BranchReturnItem {
            id: row.id,
            branch_return_id: row.branch_return_id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            reason: parse_column(
                "branch_return_items.reason",
                &row.reason,
                ReturnReason::from_str,
            )?,
            note: row.note,
        })
    }
}

#[derive(Debug, FromRow)]
struct CentralReturnedRow {
    id: Uuid,
    branch_return_id: Uuid,
    branch_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    reason: String,
    received_by: Uuid,
    received_at: DateTime<Utc>,
}

impl TryFrom<CentralReturnedRow> for CentralReturnedStock {
    type Error = AppError;

    fn try_from(row: CentralReturnedRow) -> AppResult<Self> {
        Ok(CentralReturnedStock {
            id: row.id,
            branch_return_id: row.branch_return_id,
            branch_id: row.branch_id,
            product_id: row.product_id,
            quantity: row.quantity,
            reason: parse_column(
                "central_returned_stock.reason",
                &row.reason,
                ReturnReason::from_str,
            )?,
            received_by: row.received_by,
            received_at: row.received_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SalesReportRow {
    id: Uuid,
    branch_id: Uuid,
    branch_name: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    uploaded_by: Uuid,
    source_file: Option<String>,
    created_at: DateTime<Utc>,
}

impl SalesReportRow {
    fn into_report(self, items: Vec<SalesReportItem>) -> SalesReport {
        SalesReport {
            id: self.id,
            branch_id: self.branch_id,
            branch_name: self.branch_name,
            start_date: self.start_date,
            end_date: self.end_date,
            uploaded_by: self.uploaded_by,
            source_file: self.source_file,
            items,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SalesReportItemRow {
    id: Uuid,
    sales_report_id: Uuid,
    product_id: Uuid,
    product_name: Option<String>,
    quantity_sold: Decimal,
}

impl From<SalesReportItemRow> for SalesReportItem {
    fn from(row: SalesReportItemRow) -> Self {
        SalesReportItem {
            id: row.id,
            sales_report_id: row.sales_report_id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity_sold: row.quantity_sold,
        }
    }
}

#[derive(Debug, FromRow)]
struct AlertRow {
    id: Uuid,
    alert_type: String,
    priority: String,
    status: String,
    branch_id: Uuid,
    product_id: Uuid,
    message: String,
    acknowledged_by: Option<Uuid>,
    acknowledged_at: Option<DateTime<Utc>>,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> AppResult<Self> {
        Ok(Alert {
            id: row.id,
            alert_type: parse_column("alerts.alert_type", &row.alert_type, AlertType::from_str)?,
            priority: parse_column("alerts.priority", &row.priority, AlertPriority::from_str)?,
            status: parse_column("alerts.status", &row.status, AlertStatus::from_str)?,
            branch_id: row.branch_id,
            product_id: row.product_id,
            message: row.message,
            acknowledged_by: row.acknowledged_by,
            acknowledged_at: row.acknowledged_at,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StockLevelRow {
    branch_id: Uuid,
    branch_name: String,
    product_id: Uuid,
    product_name: String,
    unit: String,
    quantity: Decimal,
}

// ============================================================================
// Queries shared by pool reads and transactions
// ============================================================================

const REQUEST_COLUMNS: &str = r#"
    SELECT r.id, r.branch_id, b.name AS branch_name, r.requested_by, r.status, r.is_urgent,
           r.assigned_branch_id, r.supervisor_forwarded_to_central, r.note,
           r.approved_at, r.dispatched_at, r.received_at, r.rejected_at,
           r.created_at, r.updated_at
    FROM stock_requests r
    LEFT JOIN branches b ON b.id = r.branch_id
"#;

const SALES_REPORT_COLUMNS: &str = r#"
    SELECT s.id, s.branch_id, b.name AS branch_name, s.start_date, s.end_date,
           s.uploaded_by, s.source_file, s.created_at
    FROM sales_reports s
    LEFT JOIN branches b ON b.id = s.branch_id
"#;

const BRANCH_RETURN_COLUMNS: &str = r#"
    SELECT r.id, r.branch_id, b.name AS branch_name, r.requested_by, r.status, r.note,
           r.approved_by, r.approved_at, r.rejected_at, r.created_at, r.updated_at
    FROM branch_returns r
    LEFT JOIN branches b ON b.id = r.branch_id
"#;

async fn fetch_active_product(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Product>> {
    let row = sqlx::query_as::<_, ProductRow>(
        "SELECT id, name, sku, unit, is_active, category_id FROM products WHERE id = $1 AND is_active",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Product::from))
}

async fn fetch_active_branch(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Branch>> {
    let row = sqlx::query_as::<_, BranchRow>(
        "SELECT id, name, location, is_active FROM branches WHERE id = $1 AND is_active",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Branch::from))
}

async fn fetch_request_items(
    conn: &mut PgConnection,
    request_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<StockRequestItem>>> {
    let rows = sqlx::query_as::<_, RequestItemRow>(
        r#"
        SELECT i.id, i.stock_request_id, i.product_id, p.name AS product_name, p.unit,
               i.requested_quantity, i.approved_quantity, i.received_quantity, i.returned_quantity
        FROM stock_request_items i
        LEFT JOIN products p ON p.id = i.product_id
        WHERE i.stock_request_id = ANY($1)
        ORDER BY p.name
        "#,
    )
    .bind(request_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<StockRequestItem>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.stock_request_id)
            .or_default()
            .push(StockRequestItem::from(row));
    }
    Ok(grouped)
}

async fn assemble_requests(
    conn: &mut PgConnection,
    rows: Vec<RequestRow>,
) -> AppResult<Vec<StockRequest>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = fetch_request_items(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let lines = items.remove(&row.id).unwrap_or_default();
            row.into_request(lines)
        })
        .collect()
}

async fn fetch_request(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> AppResult<Option<StockRequest>> {
    let sql = format!(
        "{} WHERE r.id = $1 {}",
        REQUEST_COLUMNS,
        if for_update { "FOR UPDATE OF r" } else { "" }
    );
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(assemble_requests(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn fetch_branch_return_items(
    conn: &mut PgConnection,
    return_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<BranchReturnItem>>> {
    let rows = sqlx::query_as::<_, BranchReturnItemRow>(
        r#"
        SELECT i.id, i.branch_return_id, i.product_id, p.name AS product_name,
               i.quantity, i.reason, i.note
        FROM branch_return_items i
        LEFT JOIN products p ON p.id = i.product_id
        WHERE i.branch_return_id = ANY($1)
        ORDER BY p.name
        "#,
    )
    .bind(return_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<BranchReturnItem>> = HashMap::new();
    for row in rows {
        let return_id = row.branch_return_id;
        grouped
            .entry(return_id)
            .or_default()
            .push(BranchReturnItem::try_from(row)?);
    }
    Ok(grouped)
}

async fn assemble_returns(
    conn: &mut PgConnection,
    rows: Vec<BranchReturnRow>,
) -> AppResult<Vec<BranchReturn>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = fetch_branch_return_items(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let lines = items.remove(&row.id).unwrap_or_default();
            row.into_return(lines)
        })
        .collect()
}

async fn fetch_branch_return(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> AppResult<Option<BranchReturn>> {
    let sql = format!(
        "{} WHERE r.id = $1 {}",
        BRANCH_RETURN_COLUMNS,
        if for_update { "FOR UPDATE OF r" } else { "" }
    );
    let row = sqlx::query_as::<_, BranchReturnRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(assemble_returns(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn fetch_central_stock(
    conn: &mut PgConnection,
    product_id: Uuid,
    for_update: bool,
) -> AppResult<Option<CentralStock>> {
    let sql = format!(
        "SELECT id, product_id, quantity, created_at, updated_at FROM central_stock WHERE product_id = $1 {}",
        if for_update { "FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, CentralStockRow>(&sql)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(CentralStock::from))
}

async fn fetch_branch_product(
    conn: &mut PgConnection,
    branch_id: Uuid,
    product_id: Uuid,
    for_update: bool,
) -> AppResult<Option<BranchProduct>> {
    let sql = format!(
        r#"
        SELECT id, branch_id, product_id, quantity, price, is_active, created_at, updated_at
        FROM branch_products
        WHERE branch_id = $1 AND product_id = $2 {}
        "#,
        if for_update { "FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, BranchProductRow>(&sql)
        .bind(branch_id)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(BranchProduct::from))
}

async fn assemble_sales_reports(
    conn: &mut PgConnection,
    rows: Vec<SalesReportRow>,
) -> AppResult<Vec<SalesReport>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let items = sqlx::query_as::<_, SalesReportItemRow>(
        r#"
        SELECT i.id, i.sales_report_id, i.product_id, p.name AS product_name, i.quantity_sold
        FROM sales_report_items i
        LEFT JOIN products p ON p.id = i.product_id
        WHERE i.sales_report_id = ANY($1)
        ORDER BY p.name
        "#,
    )
    .bind(&ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<SalesReportItem>> = HashMap::new();
    for row in items {
        grouped
            .entry(row.sales_report_id)
            .or_default()
            .push(SalesReportItem::from(row));
    }
    Ok(rows
        .into_iter()
        .map(|row| {
            let lines = grouped.remove(&row.id).unwrap_or_default();
            row.into_report(lines)
        })
        .collect())
}

/// Serialise writers of a stock row that does not exist yet.
///
/// `FOR UPDATE` has nothing to lock until the first writer inserts the row,
/// so that writer holds a transaction-scoped advisory lock on the row key
/// instead. A second writer blocks here until the first commits and then
/// re-reads the committed row under a real row lock.
async fn lock_missing_row(conn: &mut PgConnection, key: &str) -> AppResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

fn status_codes(statuses: &[StockRequestStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// ============================================================================
// Pool reads
// ============================================================================

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn find_active_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        let mut conn = self.db.acquire().await?;
        fetch_active_product(&mut conn, id).await
    }

    async fn find_active_branch(&self, id: Uuid) -> AppResult<Option<Branch>> {
        let mut conn = self.db.acquire().await?;
        fetch_active_branch(&mut conn, id).await
    }

    async fn find_request(&self, id: Uuid) -> AppResult<Option<StockRequest>> {
        let mut conn = self.db.acquire().await?;
        fetch_request(&mut conn, id, false).await
    }

    async fn list_requests(&self, filter: &RequestFilter) -> AppResult<Vec<StockRequest>> {
        let sql = format!(
            r#"
            {}
            WHERE (cardinality($1::text[]) = 0 OR r.status = ANY($1::text[]))
              AND ($2::uuid IS NULL OR r.branch_id = $2)
              AND ($3::uuid IS NULL OR r.assigned_branch_id = $3)
            ORDER BY r.created_at {}
            "#,
            REQUEST_COLUMNS,
            if filter.oldest_first { "ASC" } else { "DESC" }
        );

        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(status_codes(&filter.statuses))
            .bind(filter.branch_id)
            .bind(filter.assigned_branch_id)
            .fetch_all(&mut *conn)
            .await?;

        assemble_requests(&mut conn, rows).await
    }

    async fn list_request_returns(
        &self,
        branch_id: Option<Uuid>,
    ) -> AppResult<Vec<StockRequestReturn>> {
        let rows = sqlx::query_as::<_, RequestReturnRow>(
            r#"
            SELECT id, stock_request_id, stock_request_item_id, branch_id, product_id,
                   quantity, reason, reported_by, returned_at
            FROM stock_request_returns
            WHERE ($1::uuid IS NULL OR branch_id = $1)
            ORDER BY returned_at DESC
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockRequestReturn::from).collect())
    }

    async fn find_branch_return(&self, id: Uuid) -> AppResult<Option<BranchReturn>> {
        let mut conn = self.db.acquire().await?;
        fetch_branch_return(&mut conn, id, false).await
    }

    async fn list_branch_returns(&self, filter: &ReturnFilter) -> AppResult<Vec<BranchReturn>> {
        let sql = format!(
            r#"
            {}
            WHERE ($1::text IS NULL OR r.status = $1)
              AND ($2::uuid IS NULL OR r.branch_id = $2)
            ORDER BY r.created_at DESC
            "#,
            BRANCH_RETURN_COLUMNS
        );

        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, BranchReturnRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.branch_id)
            .fetch_all(&mut *conn)
            .await?;

        assemble_returns(&mut conn, rows).await
    }

    async fn list_central_returned_stock(&self) -> AppResult<Vec<CentralReturnedStock>> {
        let rows = sqlx::query_as::<_, CentralReturnedRow>(
            r#"
            SELECT id, branch_return_id, branch_id, product_id, quantity, reason,
                   received_by, received_at
            FROM central_returned_stock
            ORDER BY received_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(CentralReturnedStock::try_from).collect()
    }

    async fn find_sales_report(&self, id: Uuid) -> AppResult<Option<SalesReport>> {
        let sql = format!("{} WHERE s.id = $1", SALES_REPORT_COLUMNS);
        let mut conn = self.db.acquire().await?;
        let row = sqlx::query_as::<_, SalesReportRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(assemble_sales_reports(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_sales_reports(&self, branch_id: Uuid) -> AppResult<Vec<SalesReport>> {
        let sql = format!(
            "{} WHERE s.branch_id = $1 ORDER BY s.start_date DESC, s.end_date DESC",
            SALES_REPORT_COLUMNS
        );
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, SalesReportRow>(&sql)
            .bind(branch_id)
            .fetch_all(&mut *conn)
            .await?;

        assemble_sales_reports(&mut conn, rows).await
    }

    async fn find_central_stock(&self, product_id: Uuid) -> AppResult<Option<CentralStock>> {
        let mut conn = self.db.acquire().await?;
        fetch_central_stock(&mut conn, product_id, false).await
    }

    async fn find_branch_product(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>> {
        let mut conn = self.db.acquire().await?;
        fetch_branch_product(&mut conn, branch_id, product_id, false).await
    }

    async fn list_movements(&self, filter: &MovementFilter) -> AppResult<Vec<StockMovement>> {
        let (scope, branch_id) = match filter.location {
            None => (None, None),
            Some(StockLocation::Central) => (Some("central"), None),
            Some(StockLocation::Branch(id)) => (Some("branch"), Some(id)),
        };
        let (from, to) = match &filter.range {
            Some(range) => {
                let (from, to) = range.bounds();
                (Some(from), Some(to))
            }
            None => (None, None),
        };

        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, product_id, branch_id, movement_type, quantity, reference, note,
                   requested_by, approved_by, created_at
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::text IS NULL
                   OR ($2 = 'central' AND branch_id IS NULL)
                   OR ($2 = 'branch' AND branch_id = $3))
              AND ($4::text IS NULL OR reference = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at < $6)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.product_id)
        .bind(scope)
        .bind(branch_id)
        .bind(filter.reference.as_deref())
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(StockMovement::try_from).collect()
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        pagination: &Pagination,
    ) -> AppResult<(Vec<Alert>, u64)> {
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR priority = $2)
              AND ($3::text IS NULL OR alert_type = $3)
              AND ($4::uuid IS NULL OR branch_id = $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM alerts {}", WHERE))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.priority.map(|p| p.as_str()))
            .bind(filter.alert_type.map(|t| t.as_str()))
            .bind(filter.branch_id)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            r#"
            SELECT id, alert_type, priority, status, branch_id, product_id, message,
                   acknowledged_by, acknowledged_at, resolved_by, resolved_at,
                   created_at, updated_at
            FROM alerts
            {}
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
            WHERE
        );
        let rows = sqlx::query_as::<_, AlertRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.priority.map(|p| p.as_str()))
            .bind(filter.alert_type.map(|t| t.as_str()))
            .bind(filter.branch_id)
            .bind(i64::from(pagination.limit()))
            .bind(pagination.offset() as i64)
            .fetch_all(&self.db)
            .await?;

        let alerts = rows
            .into_iter()
            .map(Alert::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok((alerts, total.max(0) as u64))
    }
}

// ============================================================================
// Transactional access
// ============================================================================

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn find_active_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        fetch_active_product(&mut self.tx, id).await
    }

    async fn find_active_branch(&mut self, id: Uuid) -> AppResult<Option<Branch>> {
        fetch_active_branch(&mut self.tx, id).await
    }

    async fn lock_request(&mut self, id: Uuid) -> AppResult<Option<StockRequest>> {
        fetch_request(&mut self.tx, id, true).await
    }

    async fn insert_request(&mut self, request: &StockRequest) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_requests (
                id, branch_id, requested_by, status, is_urgent, assigned_branch_id,
                supervisor_forwarded_to_central, note, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(request.branch_id)
        .bind(request.requested_by)
        .bind(request.status.as_str())
        .bind(request.is_urgent)
        .bind(request.assigned_branch_id)
        .bind(request.supervisor_forwarded_to_central)
        .bind(&request.note)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for item in &request.items {
            sqlx::query(
                r#"
                INSERT INTO stock_request_items (id, stock_request_id, product_id, requested_quantity)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(item.id)
            .bind(request.id)
            .bind(item.product_id)
            .bind(item.requested_quantity)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn update_request(&mut self, request: &StockRequest) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock_requests
            SET status = $2, assigned_branch_id = $3, supervisor_forwarded_to_central = $4,
                note = $5, approved_at = $6, dispatched_at = $7, received_at = $8,
                rejected_at = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(request.assigned_branch_id)
        .bind(request.supervisor_forwarded_to_central)
        .bind(&request.note)
        .bind(request.approved_at)
        .bind(request.dispatched_at)
        .bind(request.received_at)
        .bind(request.rejected_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for item in &request.items {
            sqlx::query(
                r#"
                UPDATE stock_request_items
                SET requested_quantity = $2, approved_quantity = $3,
                    received_quantity = $4, returned_quantity = $5
                WHERE id = $1
                "#,
            )
            .bind(item.id)
            .bind(item.requested_quantity)
            .bind(item.approved_quantity)
            .bind(item.received_quantity)
            .bind(item.returned_quantity)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn insert_request_return(&mut self, record: &StockRequestReturn) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_request_returns (
                id, stock_request_id, stock_request_item_id, branch_id, product_id,
                quantity, reason, reported_by, returned_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.stock_request_id)
        .bind(record.stock_request_item_id)
        .bind(record.branch_id)
        .bind(record.product_id)
        .bind(record.quantity)
        .bind(&record.reason)
        .bind(record.reported_by)
        .bind(record.returned_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn has_open_request(&mut self, branch_id: Uuid, product_id: Uuid) -> AppResult<bool> {
        let open: Vec<StockRequestStatus> = StockRequestStatus::ALL
            .into_iter()
            .filter(|s| s.is_open())
            .collect();

        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM stock_requests r
                JOIN stock_request_items i ON i.stock_request_id = r.id
                WHERE r.branch_id = $1 AND i.product_id = $2 AND r.status = ANY($3::text[])
            )
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(status_codes(&open))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn lock_central_stock(&mut self, product_id: Uuid) -> AppResult<Option<CentralStock>> {
        if let Some(stock) = fetch_central_stock(&mut self.tx, product_id, true).await? {
            return Ok(Some(stock));
        }
        lock_missing_row(&mut self.tx, &format!("central_stock:{}", product_id)).await?;
        fetch_central_stock(&mut self.tx, product_id, true).await
    }

    async fn save_central_stock(&mut self, stock: &CentralStock) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO central_stock (id, product_id, quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(stock.id)
        .bind(stock.product_id)
        .bind(stock.quantity)
        .bind(stock.created_at)
        .bind(stock.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_branch_product(
        &mut self,
        branch_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<BranchProduct>> {
        if let Some(stock) = fetch_branch_product(&mut self.tx, branch_id, product_id, true).await? {
            return Ok(Some(stock));
        }
        lock_missing_row(
            &mut self.tx,
            &format!("branch_products:{}:{}", branch_id, product_id),
        )
        .await?;
        fetch_branch_product(&mut self.tx, branch_id, product_id, true).await
    }

    async fn save_branch_product(&mut self, stock: &BranchProduct) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO branch_products (
                id, branch_id, product_id, quantity, price, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (branch_id, product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, price = EXCLUDED.price,
                          is_active = EXCLUDED.is_active, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(stock.id)
        .bind(stock.branch_id)
        .bind(stock.product_id)
        .bind(stock.quantity)
        .bind(stock.price)
        .bind(stock.is_active)
        .bind(stock.created_at)
        .bind(stock.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, branch_id, movement_type, quantity, reference, note,
                requested_by, approved_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(movement.id)
        .bind(movement.product_id)
        .bind(movement.branch_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(&movement.reference)
        .bind(&movement.note)
        .bind(movement.requested_by)
        .bind(movement.approved_by)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_stock_levels(&mut self) -> AppResult<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockLevelRow>(
            r#"
            SELECT bp.branch_id, b.name AS branch_name, bp.product_id, p.name AS product_name,
                   p.unit, bp.quantity
            FROM branch_products bp
            JOIN branches b ON b.id = bp.branch_id
            JOIN products p ON p.id = bp.product_id
            WHERE bp.is_active AND b.is_active AND p.is_active
            ORDER BY b.name, p.name
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StockLevel {
                branch_id: row.branch_id,
                branch_name: row.branch_name,
                product_id: row.product_id,
                product_name: row.product_name,
                unit: row.unit,
                quantity: row.quantity,
            })
            .collect())
    }

    async fn lock_branch_return(&mut self, id: Uuid) -> AppResult<Option<BranchReturn>> {
        fetch_branch_return(&mut self.tx, id, true).await
    }

    async fn insert_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO branch_returns (id, branch_id, requested_by, status, note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(ret.id)
        .bind(ret.branch_id)
        .bind(ret.requested_by)
        .bind(ret.status.as_str())
        .bind(&ret.note)
        .bind(ret.created_at)
        .bind(ret.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for item in &ret.items {
            sqlx::query(
                r#"
                INSERT INTO branch_return_items (id, branch_return_id, product_id, quantity, reason, note)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(ret.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.reason.as_str())
            .bind(&item.note)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn update_branch_return(&mut self, ret: &BranchReturn) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE branch_returns
            SET status = $2, note = $3, approved_by = $4, approved_at = $5,
                rejected_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(ret.id)
        .bind(ret.status.as_str())
        .bind(&ret.note)
        .bind(ret.approved_by)
        .bind(ret.approved_at)
        .bind(ret.rejected_at)
        .bind(ret.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_central_returned_stock(
        &mut self,
        record: &CentralReturnedStock,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO central_returned_stock (
                id, branch_return_id, branch_id, product_id, quantity, reason,
                received_by, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.branch_return_id)
        .bind(record.branch_id)
        .bind(record.product_id)
        .bind(record.quantity)
        .bind(record.reason.as_str())
        .bind(record.received_by)
        .bind(record.received_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn sales_report_exists(&mut self, branch_id: Uuid, period: &DateRange) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sales_reports
                WHERE branch_id = $1 AND start_date = $2 AND end_date = $3
            )
            "#,
        )
        .bind(branch_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_sales_report(&mut self, report: &SalesReport) -> AppResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO sales_reports (
                id, branch_id, start_date, end_date, uploaded_by, source_file, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(report.id)
        .bind(report.branch_id)
        .bind(report.start_date)
        .bind(report.end_date)
        .bind(report.uploaded_by)
        .bind(&report.source_file)
        .bind(report.created_at)
        .execute(&mut *self.tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::Conflict(format!(
                    "sales report for branch {} from {} to {} already exists",
                    report.branch_id, report.start_date, report.end_date
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for item in &report.items {
            sqlx::query(
                r#"
                INSERT INTO sales_report_items (id, sales_report_id, product_id, quantity_sold)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(item.id)
            .bind(report.id)
            .bind(item.product_id)
            .bind(item.quantity_sold)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn insert_alert_if_absent(&mut self, alert: &Alert) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                id, alert_type, priority, status, branch_id, product_id, message,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (branch_id, product_id, alert_type)
                WHERE status IN ('NEW', 'ACKNOWLEDGED')
            DO NOTHING
            "#,
        )
        .bind(alert.id)
        .bind(alert.alert_type.as_str())
        .bind(alert.priority.as_str())
        .bind(alert.status.as_str())
        .bind(alert.branch_id)
        .bind(alert.product_id)
        .bind(&alert.message)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_alert(&mut self, id: Uuid) -> AppResult<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, alert_type, priority, status, branch_id, product_id, message,
                   acknowledged_by, acknowledged_at, resolved_by, resolved_at,
                   created_at, updated_at
            FROM alerts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn update_alert(&mut self, alert: &Alert) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET status = $2, acknowledged_by = $3, acknowledged_at = $4,
                resolved_by = $5, resolved_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(alert.acknowledged_by)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(alert.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}
