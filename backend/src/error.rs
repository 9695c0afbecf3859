//! Error handling for the replenishment ledger
//!
//! Every service returns [`AppResult`]. Callers at the edge turn an
//! [`AppError`] into an [`ErrorResponse`] with a stable code.

use serde::Serialize;
use shared::{QuantityError, TransitionError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business rule errors
    #[error("Invalid quantity for {field}: {message}")]
    InvalidQuantity { field: String, message: String },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The record already exists (e.g. a second sales report for a period)
    #[error("Conflict: {0}")]
    Conflict(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    // Stored data that cannot be interpreted
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_quantity(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidQuantity {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            AppError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Corrupt(_)
            | AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the message may be shown to the caller as-is
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            AppError::Corrupt(_)
                | AppError::Configuration(_)
                | AppError::DatabaseError(_)
                | AppError::InternalError(_)
        )
    }

    /// Build the response body, logging the full error for internal kinds
    pub fn to_response(&self) -> ErrorResponse {
        let field = match self {
            AppError::InvalidQuantity { field, .. } | AppError::Validation { field, .. } => {
                Some(field.clone())
            }
            _ => None,
        };

        let message = if self.is_user_facing() {
            self.to_string()
        } else {
            tracing::error!("Error: {:?}", self);
            "An internal error occurred".to_string()
        };

        ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                field,
            },
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<QuantityError> for AppError {
    fn from(err: QuantityError) -> Self {
        match err {
            QuantityError::NotPositive { field } | QuantityError::Negative { field } => {
                AppError::invalid_quantity(field, err.to_string())
            }
            QuantityError::Insufficient { .. } => AppError::InsufficientStock(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::InvalidState(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "input".to_string());
        AppError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;
