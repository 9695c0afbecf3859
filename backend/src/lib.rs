//! Retail Replenishment - ledger core
//!
//! Stock requests from branches, dispatch from central or a peer branch,
//! receipts, branch returns and low-stock alerts over a movement ledger.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::LedgerServices;
