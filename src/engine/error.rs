use thiserror::Error;
use ulid::Ulid;

use crate::model::{CreditKind, MonthKey};

use super::conflict::Rejection;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("authentication required")]
    Authentication,
    #[error("not allowed: {0}")]
    Authorization(&'static str),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("conflict: {0}")]
    Conflict(Rejection),
    #[error("reschedule limit reached for {month}: {used} of {limit} used")]
    QuotaExceeded { used: u32, limit: u32, month: MonthKey },
    #[error("insufficient {kind:?} credits: balance {balance}, needed {needed}")]
    InsufficientCredit {
        kind: CreditKind,
        balance: u32,
        needed: u32,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl SchedulingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SchedulingError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: Ulid) -> Self {
        SchedulingError::NotFound { entity, id }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulingError::Authentication => "AUTHENTICATION",
            SchedulingError::Authorization(_) => "AUTHORIZATION",
            SchedulingError::Validation(_) => "VALIDATION",
            SchedulingError::NotFound { .. } => "NOT_FOUND",
            SchedulingError::Conflict(_) => "CONFLICT",
            SchedulingError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            SchedulingError::InsufficientCredit { .. } => "INSUFFICIENT_CREDIT",
            SchedulingError::Storage(_) => "STORAGE",
        }
    }
}

impl From<Rejection> for SchedulingError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::NotInFuture => {
                SchedulingError::Validation("scheduled time must be in the future".into())
            }
            other => SchedulingError::Conflict(other),
        }
    }
}
