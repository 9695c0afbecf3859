//! Sales report tests
//!
//! Tests for branch sales taken off the shelf:
//! - SALE movements referencing the report
//! - All-or-nothing deduction when a line is short
//! - One report per branch and period

mod common;

use chrono::NaiveDate;
use common::{dec, Fixture};
use retail_replenishment_backend::models::*;
use retail_replenishment_backend::services::sales_report::{RecordSalesInput, SaleLineInput};
use retail_replenishment_backend::AppError;
use rust_decimal::Decimal;
use uuid::Uuid;

fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn sales(start: u32, end: u32, lines: &[(Uuid, &str)]) -> RecordSalesInput {
    RecordSalesInput {
        start_date: march(start),
        end_date: march(end),
        lines: lines
            .iter()
            .map(|(product_id, qty)| SaleLineInput {
                product_id: *product_id,
                quantity_sold: dec(qty),
            })
            .collect(),
        source_file: Some("week-10.xlsx".to_string()),
    }
}

// ============================================================================
// Recording Sales
// ============================================================================

#[cfg(test)]
mod record_tests {
    use super::*;

    #[tokio::test]
    async fn test_sales_leave_the_branch_shelf() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("40")).await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.rice.id, dec("10")).await;

        let report = fx
            .services
            .sales
            .record_sales(
                &fx.manager_a,
                fx.branch_a.id,
                sales(1, 7, &[(fx.milk.id, "12.5"), (fx.rice.id, "10")]),
            )
            .await
            .unwrap();

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.total_quantity(), dec("22.5"));
        assert_eq!(report.uploaded_by, fx.manager_a.user_id);
        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.milk.id).await, dec("27.5"));
        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.rice.id).await, Decimal::ZERO);

        let movements = fx.movements_at(fx.milk.id, StockLocation::Branch(fx.branch_a.id)).await;
        let sale = movements.last().unwrap();
        assert_eq!(sale.movement_type, MovementType::Sale);
        assert_eq!(sale.quantity, dec("12.5"));
        assert_eq!(sale.reference, report.id.to_string());
        assert_eq!(sale.note.as_deref(), Some("Sales report: 2024-03-01 to 2024-03-07"));

        let check = fx
            .services
            .stock
            .verify_location(fx.milk.id, StockLocation::Branch(fx.branch_a.id))
            .await
            .unwrap();
        assert!(check.is_consistent());
        assert_eq!(fx.notifier.names().last(), Some(&"sales_recorded"));
    }

    #[tokio::test]
    async fn test_zero_lines_are_skipped() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("5")).await;

        let report = fx
            .services
            .sales
            .record_sales(
                &fx.central,
                fx.branch_a.id,
                sales(1, 7, &[(fx.milk.id, "3"), (fx.rice.id, "0")]),
            )
            .await
            .unwrap();

        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].product_id, fx.milk.id);
    }

    #[tokio::test]
    async fn test_short_line_rejects_whole_report() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("40")).await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.rice.id, dec("2")).await;

        let err = fx
            .services
            .sales
            .record_sales(
                &fx.manager_a,
                fx.branch_a.id,
                sales(1, 7, &[(fx.milk.id, "10"), (fx.rice.id, "3")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock(_)), "got {:?}", err);

        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.milk.id).await, dec("40"));
        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.rice.id).await, dec("2"));
        assert!(fx
            .services
            .sales
            .branch_sales_reports(fx.branch_a.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_product_never_stocked_is_insufficient() {
        let fx = Fixture::new().await;

        let err = fx
            .services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(1, 7, &[(fx.rice.id, "1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_duplicate_period_is_a_conflict() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("40")).await;

        fx.services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(1, 7, &[(fx.milk.id, "5")]))
            .await
            .unwrap();

        let err = fx
            .services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(1, 7, &[(fx.milk.id, "5")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "got {:?}", err);
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.milk.id).await, dec("35"));

        // A different period or another branch is fine
        fx.services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(8, 14, &[(fx.milk.id, "5")]))
            .await
            .unwrap();
        let reports = fx
            .services
            .sales
            .branch_sales_reports(fx.branch_a.id)
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].start_date, march(8));
    }
}

// ============================================================================
// Input Checks
// ============================================================================

#[cfg(test)]
mod input_tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_input_is_rejected() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("40")).await;

        let inverted = fx
            .services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(7, 1, &[(fx.milk.id, "1")]))
            .await
            .unwrap_err();
        assert!(
            matches!(inverted, AppError::Validation { ref field, .. } if field == "end_date"),
            "got {:?}",
            inverted
        );

        let empty = fx
            .services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(1, 7, &[]))
            .await
            .unwrap_err();
        assert!(matches!(empty, AppError::Validation { .. }), "got {:?}", empty);

        let negative = fx
            .services
            .sales
            .record_sales(&fx.manager_a, fx.branch_a.id, sales(1, 7, &[(fx.milk.id, "-1")]))
            .await
            .unwrap_err();
        assert!(matches!(negative, AppError::InvalidQuantity { .. }), "got {:?}", negative);

        let duplicate = fx
            .services
            .sales
            .record_sales(
                &fx.manager_a,
                fx.branch_a.id,
                sales(1, 7, &[(fx.milk.id, "1"), (fx.milk.id, "2")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(duplicate, AppError::Validation { .. }), "got {:?}", duplicate);

        assert_eq!(fx.branch_qty(fx.branch_a.id, fx.milk.id).await, dec("40"));
    }

    #[tokio::test]
    async fn test_other_branch_cannot_report() {
        let fx = Fixture::new().await;
        fx.store.seed_branch_stock(fx.branch_a.id, fx.milk.id, dec("40")).await;

        let err = fx
            .services
            .sales
            .record_sales(&fx.manager_b, fx.branch_a.id, sales(1, 7, &[(fx.milk.id, "1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unknown_report() {
        let fx = Fixture::new().await;
        let err = fx
            .services
            .sales
            .get_sales_report(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
