//! Shared types and models for the retail replenishment ledger
//!
//! This crate holds the plain data types, the stock request lifecycle and the
//! quantity arithmetic used by the backend services and their adapters.

pub mod models;
pub mod quantity;
pub mod types;
pub mod validation;

pub use models::*;
pub use quantity::*;
pub use types::*;
pub use validation::*;
