//! Error types for the case domain.

use std::fmt::{Display, Formatter};

/// Errors that can occur during case command handling and recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseError {
    /// Command executed on an uninitialized case.
    NotInitialized,
    /// StartCase sent to a case that already exists.
    AlreadyStarted,
    /// Referenced plan item, case file item or definition does not exist.
    NotFound { message: String },
    /// Command is malformed or not applicable.
    InvalidCommand { message: String },
    /// A guard refused the requested transition.
    TransitionDenied { message: String },
    /// An expression could not be parsed or evaluated.
    Expression { message: String },
    /// Case definition failed validation.
    InvalidDefinition { message: String },
    /// An event refers to state that does not exist.
    RecoveryInconsistency { message: String },
    /// Storage/persistence failure.
    StorageFailure { message: String },
    /// Optimistic lock failure (concurrent modification detected).
    ConcurrencyConflict { message: String },
}

impl CaseError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::TransitionDenied {
            message: message.into(),
        }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::RecoveryInconsistency {
            message: message.into(),
        }
    }
}

impl Display for CaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "case not initialized"),
            Self::AlreadyStarted => write!(f, "case already started"),
            Self::NotFound { message } => write!(f, "not found: {}", message),
            Self::InvalidCommand { message } => write!(f, "invalid command: {}", message),
            Self::TransitionDenied { message } => write!(f, "transition denied: {}", message),
            Self::Expression { message } => write!(f, "expression failure: {}", message),
            Self::InvalidDefinition { message } => write!(f, "invalid definition: {}", message),
            Self::RecoveryInconsistency { message } => {
                write!(f, "recovery inconsistency: {}", message)
            }
            Self::StorageFailure { message } => write!(f, "storage failure: {}", message),
            Self::ConcurrencyConflict { message } => write!(f, "concurrency conflict: {}", message),
        }
    }
}

impl std::error::Error for CaseError {}
