//! Stock alert generation and handling

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::notification::{LedgerEvent, Notifier};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::store::{LedgerStore, LedgerTx};

#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    thresholds: AlertThresholds,
}

/// Outcome of one alert scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertScanReport {
    /// Branch stock rows looked at
    pub scanned: usize,
    /// Alerts written; duplicates of open alerts are not counted
    pub created: usize,
}

impl AlertService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            store,
            notifier,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Scan every active branch stock row and raise missing alerts.
    ///
    /// Running it twice without stock changes creates nothing the second time.
    pub async fn generate_stock_alerts(&self) -> AppResult<AlertScanReport> {
        let mut tx = self.store.begin().await?;
        let levels = tx.list_stock_levels().await?;

        let mut created = 0;
        for level in &levels {
            if let Some(candidate) = self.thresholds.classify(level) {
                if tx.insert_alert_if_absent(&Alert::new(candidate)).await? {
                    created += 1;
                }
            }

            if level.quantity <= self.thresholds.low_stock {
                let on_order = tx.has_open_request(level.branch_id, level.product_id).await?;
                if let Some(candidate) = self.thresholds.late_order(level, on_order) {
                    if tx.insert_alert_if_absent(&Alert::new(candidate)).await? {
                        created += 1;
                    }
                }
            }
        }

        tx.commit().await?;

        let report = AlertScanReport {
            scanned: levels.len(),
            created,
        };
        tracing::info!(scanned = report.scanned, created = report.created, "Alert scan finished");
        if created > 0 {
            self.notifier
                .notify(LedgerEvent::AlertsGenerated { created })
                .await;
        }

        Ok(report)
    }

    pub async fn acknowledge(&self, actor: &Actor, alert_id: Uuid) -> AppResult<Alert> {
        let mut tx = self.store.begin().await?;
        let mut alert = lock_open(tx.as_mut(), alert_id).await?;

        let now = Utc::now();
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(actor.user_id);
        alert.acknowledged_at = Some(now);
        alert.updated_at = now;
        tx.update_alert(&alert).await?;
        tx.commit().await?;

        tracing::debug!(alert_id = %alert_id, user = %actor.user_id, "Alert acknowledged");
        Ok(alert)
    }

    pub async fn resolve(&self, actor: &Actor, alert_id: Uuid) -> AppResult<Alert> {
        let mut tx = self.store.begin().await?;
        let mut alert = lock_open(tx.as_mut(), alert_id).await?;

        let now = Utc::now();
        alert.status = AlertStatus::Resolved;
        alert.resolved_by = Some(actor.user_id);
        alert.resolved_at = Some(now);
        alert.updated_at = now;
        tx.update_alert(&alert).await?;
        tx.commit().await?;

        tracing::debug!(alert_id = %alert_id, user = %actor.user_id, "Alert resolved");
        Ok(alert)
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Alert>> {
        let (alerts, total) = self.store.list_alerts(filter, pagination).await?;
        Ok(PaginatedResponse::new(alerts, pagination, total))
    }
}

async fn lock_open(tx: &mut dyn LedgerTx, alert_id: Uuid) -> AppResult<Alert> {
    let alert = tx
        .lock_alert(alert_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert".to_string()))?;
    if !alert.status.is_open() {
        return Err(AppError::InvalidState(format!("alert is already {}", alert.status)));
    }
    Ok(alert)
}
