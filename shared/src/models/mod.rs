//! Domain models for the retail replenishment ledger

mod alert;
mod branch_return;
mod catalog;
mod inventory;
mod sales_report;
mod stock_request;
mod user;

pub use alert::*;
pub use branch_return::*;
pub use catalog::*;
pub use inventory::*;
pub use sales_report::*;
pub use stock_request::*;
pub use user::*;
