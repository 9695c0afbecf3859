//! Product and branch catalog records
//!
//! The catalog is owned by an external CRUD module; the ledger core only
//! reads active rows by id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sellable product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Internal stock keeping code, unique
    pub sku: String,
    /// Unit of measure (kg, packet, box...)
    pub unit: String,
    pub is_active: bool,
    pub category_id: Option<Uuid>,
}

impl Product {
    pub fn new(name: impl Into<String>, sku: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sku: sku.into(),
            unit: unit.into(),
            is_active: true,
            category_id: None,
        }
    }
}

/// A retail branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location: None,
            is_active: true,
        }
    }
}
