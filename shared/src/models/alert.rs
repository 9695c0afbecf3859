//! Branch stock alerts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowStock,
    CriticalStock,
    LateOrder,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "LOW_STOCK",
            AlertType::CriticalStock => "CRITICAL_STOCK",
            AlertType::LateOrder => "LATE_ORDER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LOW_STOCK" => Some(AlertType::LowStock),
            "CRITICAL_STOCK" => Some(AlertType::CriticalStock),
            "LATE_ORDER" => Some(AlertType::LateOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Critical => "CRITICAL",
            AlertPriority::High => "HIGH",
            AlertPriority::Medium => "MEDIUM",
            AlertPriority::Low => "LOW",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(AlertPriority::Critical),
            "HIGH" => Some(AlertPriority::High),
            "MEDIUM" => Some(AlertPriority::Medium),
            "LOW" => Some(AlertPriority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "NEW",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(AlertStatus::New),
            "ACKNOWLEDGED" => Some(AlertStatus::Acknowledged),
            "RESOLVED" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }

    /// NEW and ACKNOWLEDGED alerts block duplicates
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub message: String,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(candidate: AlertCandidate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            alert_type: candidate.alert_type,
            priority: candidate.priority,
            status: AlertStatus::New,
            branch_id: candidate.branch_id,
            product_id: candidate.product_id,
            message: candidate.message,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Quantity limits used by the alert scan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AlertThresholds {
    /// At or below: CRITICAL_STOCK
    pub critical: Decimal,
    /// At or below: LOW_STOCK and possibly LATE_ORDER
    pub low_stock: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical: Decimal::from(10),
            low_stock: Decimal::from(30),
        }
    }
}

/// One branch stock row as seen by the alert scan
#[derive(Debug, Clone, PartialEq)]
pub struct StockLevel {
    pub branch_id: Uuid,
    pub branch_name: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit: String,
    pub quantity: Decimal,
}

/// An alert the scan wants to raise, before deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub message: String,
}

impl AlertThresholds {
    /// Stock-level alert for a row, if any
    pub fn classify(&self, level: &StockLevel) -> Option<AlertCandidate> {
        let (alert_type, priority, message) = if level.quantity <= self.critical {
            (
                AlertType::CriticalStock,
                AlertPriority::Critical,
                format!(
                    "CRITICAL: {} at {} is at critically low stock ({} {} remaining)",
                    level.product_name, level.branch_name, level.quantity, level.unit
                ),
            )
        } else if level.quantity <= self.low_stock {
            (
                AlertType::LowStock,
                AlertPriority::High,
                format!(
                    "LOW STOCK: {} at {} needs reordering ({} {} remaining)",
                    level.product_name, level.branch_name, level.quantity, level.unit
                ),
            )
        } else {
            return None;
        };

        Some(AlertCandidate {
            alert_type,
            priority,
            branch_id: level.branch_id,
            product_id: level.product_id,
            message,
        })
    }

    /// LATE_ORDER alert for a low row with nothing on order
    pub fn late_order(&self, level: &StockLevel, has_open_request: bool) -> Option<AlertCandidate> {
        if has_open_request || level.quantity > self.low_stock {
            return None;
        }
        Some(AlertCandidate {
            alert_type: AlertType::LateOrder,
            priority: AlertPriority::High,
            branch_id: level.branch_id,
            product_id: level.product_id,
            message: format!(
                "LATE ORDER: {} at {} is low on stock but no order has been placed recently",
                level.product_name, level.branch_name
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(quantity: i64) -> StockLevel {
        StockLevel {
            branch_id: Uuid::new_v4(),
            branch_name: "Siam".to_string(),
            product_id: Uuid::new_v4(),
            product_name: "Milk".to_string(),
            unit: "L".to_string(),
            quantity: Decimal::from(quantity),
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let t = AlertThresholds::default();

        let critical = t.classify(&level(10)).unwrap();
        assert_eq!(critical.alert_type, AlertType::CriticalStock);
        assert_eq!(critical.priority, AlertPriority::Critical);
        assert_eq!(
            critical.message,
            "CRITICAL: Milk at Siam is at critically low stock (10 L remaining)"
        );

        let low = t.classify(&level(30)).unwrap();
        assert_eq!(low.alert_type, AlertType::LowStock);
        assert_eq!(low.priority, AlertPriority::High);

        assert!(t.classify(&level(31)).is_none());
    }

    #[test]
    fn test_late_order_needs_low_stock_and_no_open_request() {
        let t = AlertThresholds::default();
        assert!(t.late_order(&level(5), true).is_none());
        assert!(t.late_order(&level(50), false).is_none());

        let late = t.late_order(&level(25), false).unwrap();
        assert_eq!(late.alert_type, AlertType::LateOrder);
        assert_eq!(late.priority, AlertPriority::High);
    }

    #[test]
    fn test_resolved_is_not_open() {
        assert!(AlertStatus::New.is_open());
        assert!(AlertStatus::Acknowledged.is_open());
        assert!(!AlertStatus::Resolved.is_open());
    }
}
