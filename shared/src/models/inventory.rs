//! Stock levels and the movement ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quantity::round_qty;

/// Warehouse-level stock of one product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralStock {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CentralStock {
    pub fn empty(product_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A branch's on-hand stock of one product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchProduct {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchProduct {
    pub fn empty(branch_id: Uuid, product_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            branch_id,
            product_id,
            quantity: Decimal::ZERO,
            price: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Where a quantity lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "branch_id", rename_all = "snake_case")]
pub enum StockLocation {
    Central,
    Branch(Uuid),
}

impl StockLocation {
    pub fn from_branch(branch_id: Option<Uuid>) -> Self {
        match branch_id {
            Some(id) => StockLocation::Branch(id),
            None => StockLocation::Central,
        }
    }

    pub fn branch_id(&self) -> Option<Uuid> {
        match self {
            StockLocation::Central => None,
            StockLocation::Branch(id) => Some(*id),
        }
    }
}

/// Kinds of ledger movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Generic addition (purchase, receipt)
    Addition,
    /// Generic deduction (dispatch, return, breakage)
    Deduction,
    /// Sales report import
    Sale,
    TransferIn,
    TransferOut,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Addition => "ADDITION",
            MovementType::Deduction => "DEDUCTION",
            MovementType::Sale => "SALE",
            MovementType::TransferIn => "TRANSFER_IN",
            MovementType::TransferOut => "TRANSFER_OUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADDITION" => Some(MovementType::Addition),
            "DEDUCTION" => Some(MovementType::Deduction),
            "SALE" => Some(MovementType::Sale),
            "TRANSFER_IN" => Some(MovementType::TransferIn),
            "TRANSFER_OUT" => Some(MovementType::TransferOut),
            _ => None,
        }
    }

    /// Inbound movements increase the location's quantity
    pub fn is_inbound(&self) -> bool {
        matches!(self, MovementType::Addition | MovementType::TransferIn)
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    /// `None` means central stock
    pub branch_id: Option<Uuid>,
    pub movement_type: MovementType,
    /// Always positive; direction comes from `movement_type`
    pub quantity: Decimal,
    /// Stock request id, return id, purchase reference...
    pub reference: String,
    pub note: Option<String>,
    pub requested_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        product_id: Uuid,
        location: StockLocation,
        movement_type: MovementType,
        quantity: Decimal,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            branch_id: location.branch_id(),
            movement_type,
            quantity,
            reference: reference.into(),
            note: None,
            requested_by: None,
            approved_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_actors(mut self, requested_by: Option<Uuid>, approved_by: Option<Uuid>) -> Self {
        self.requested_by = requested_by;
        self.approved_by = approved_by;
        self
    }

    pub fn location(&self) -> StockLocation {
        StockLocation::from_branch(self.branch_id)
    }

    /// Quantity with the sign implied by the movement type
    pub fn signed_quantity(&self) -> Decimal {
        if self.movement_type.is_inbound() {
            self.quantity
        } else {
            -self.quantity
        }
    }
}

/// Net quantity recorded by the ledger for one product at one location
pub fn ledger_balance<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
    product_id: Uuid,
    location: StockLocation,
) -> Decimal {
    let total = movements
        .into_iter()
        .filter(|m| m.product_id == product_id && m.location() == location)
        .fold(Decimal::ZERO, |acc, m| acc + m.signed_quantity());
    round_qty(total)
}

/// Stored quantity compared against the ledger for one location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerCheck {
    pub product_id: Uuid,
    pub location: StockLocation,
    pub stored_quantity: Decimal,
    pub ledger_quantity: Decimal,
}

impl LedgerCheck {
    pub fn is_consistent(&self) -> bool {
        self.stored_quantity == self.ledger_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_round_trips_through_str() {
        for t in [
            MovementType::Addition,
            MovementType::Deduction,
            MovementType::Sale,
            MovementType::TransferIn,
            MovementType::TransferOut,
        ] {
            assert_eq!(MovementType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(MovementType::from_str("addition"), None);
    }

    #[test]
    fn test_ledger_balance_by_location() {
        let product = Uuid::new_v4();
        let branch = Uuid::new_v4();
        let movements = vec![
            StockMovement::new(product, StockLocation::Central, MovementType::Addition, Decimal::from(100), "po-1"),
            StockMovement::new(product, StockLocation::Central, MovementType::Deduction, Decimal::from(30), "req-1"),
            StockMovement::new(product, StockLocation::Branch(branch), MovementType::Addition, Decimal::from(30), "req-1"),
            StockMovement::new(product, StockLocation::Branch(branch), MovementType::Sale, Decimal::from(4), "rpt-1"),
            StockMovement::new(Uuid::new_v4(), StockLocation::Central, MovementType::Addition, Decimal::from(9), "po-2"),
        ];

        assert_eq!(ledger_balance(&movements, product, StockLocation::Central), Decimal::from(70));
        assert_eq!(ledger_balance(&movements, product, StockLocation::Branch(branch)), Decimal::from(26));
        assert_eq!(
            ledger_balance(&movements, product, StockLocation::Branch(Uuid::new_v4())),
            Decimal::ZERO
        );
    }
}
