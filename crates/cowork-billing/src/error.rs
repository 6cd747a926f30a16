use crate::storage::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("A bill already exists for client {client_id}, resource {resource}, period {fee_period}")]
    DuplicatePeriod {
        client_id: String,
        resource: String,
        fee_period: String,
    },

    #[error("Invalid transition for bill {bill_id}: {from} -> {to}")]
    InvalidTransition {
        bill_id: String,
        from: String,
        to: String,
    },

    #[error("Invalid amount for {field}: {amount}")]
    InvalidAmount { field: String, amount: String },

    #[error("Store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: String,
        write: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Bill not found: {id}")]
    BillNotFound { id: String },

    #[error("Document not found: {path}")]
    DocumentNotFound { path: String },

    #[error("Client not found: {id}")]
    ClientNotFound { id: String },

    #[error("Client {id} is not active")]
    ClientInactive { id: String },

    #[error("Client {client_id} has no active {service_type} assignment for {resource}")]
    AssignmentNotFound {
        client_id: String,
        resource: String,
        service_type: String,
    },

    #[error("Period start {period_start} precedes assignment start {assignment_start} for client {client_id}")]
    PeriodBeforeAssignment {
        client_id: String,
        period_start: String,
        assignment_start: String,
    },

    #[error("Validation error for {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Concurrent updates to {path} did not settle after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },

    #[error("Notification error: {message}")]
    Notification { message: String },
}

impl BillingError {
    pub fn invalid_amount(field: &str, amount: Decimal) -> Self {
        BillingError::InvalidAmount {
            field: field.to_string(),
            amount: amount.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        BillingError::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a store failure. `write` records whether the failed call could have
    /// mutated state, which changes what the caller is told.
    pub fn from_store(operation: &str, write: bool, err: StoreError) -> Self {
        match err {
            StoreError::Malformed { path, message } => BillingError::ValidationError {
                field: path,
                message,
            },
            // a conditional write against a missing document never applies
            StoreError::NotFound { path } => BillingError::DocumentNotFound { path },
            other => BillingError::StoreUnavailable {
                operation: operation.to_string(),
                write,
                source: Box::new(other),
            },
        }
    }

    /// Only reads against an unavailable store may be retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::StoreUnavailable { write: false, .. })
    }

    /// True when the error guarantees nothing was persisted.
    pub fn nothing_changed(&self) -> bool {
        !matches!(self, BillingError::StoreUnavailable { write: true, .. })
    }

    /// Message suitable for showing to an admin or tenant.
    pub fn user_message(&self) -> String {
        match self {
            BillingError::StoreUnavailable { write: true, .. } => format!(
                "Your request may not have been applied, please verify before retrying. ({})",
                self
            ),
            BillingError::StoreUnavailable { write: false, .. } => format!(
                "Billing data is temporarily unavailable, nothing was changed. ({})",
                self
            ),
            other => format!("Nothing was changed: {}", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
