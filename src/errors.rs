use thiserror::Error;

use crate::models::domain::{GenerationTrace, Violation};

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Empty context: {0}")]
    EmptyContext(String),

    #[error("Budget exceeded: requested {requested} questions, at most {supported} supported")]
    BudgetExceeded { requested: u32, supported: u32 },

    #[error("Provider transient failure: {0}")]
    ProviderTransient(String),

    #[error("Provider fatal failure: {0}")]
    ProviderFatal(String),

    #[error("Validation failed with {} violation(s): {}", .0.len(), join_violations(.0))]
    Validation(Vec<Violation>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::EmptyContext(_) => "EMPTY_CONTEXT",
            AppError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            AppError::ProviderTransient(_) => "PROVIDER_TRANSIENT",
            AppError::ProviderFatal(_) => "PROVIDER_FATAL",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Recoverable errors get one repair round inside the pipeline; they only
    /// reach callers when that round fails too.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderTransient(_) | AppError::Validation(_)
        )
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidRequest(err.to_string())
    }
}
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Terminal pipeline failure. Carries whatever audit trace had been built when
/// the run stopped.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct GenerationFailure {
    pub error: AppError,
    pub trace: Option<GenerationTrace>,
}

impl GenerationFailure {
    pub fn with_trace(error: AppError, trace: GenerationTrace) -> Self {
        Self {
            error,
            trace: Some(trace),
        }
    }
}

impl From<AppError> for GenerationFailure {
    fn from(error: AppError) -> Self {
        Self { error, trace: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::EmptyContext("doc-1".into()).error_code(),
            "EMPTY_CONTEXT"
        );
        assert_eq!(
            AppError::BudgetExceeded {
                requested: 50,
                supported: 10
            }
            .error_code(),
            "BUDGET_EXCEEDED"
        );
        assert_eq!(
            AppError::Configuration("missing key".into()).error_code(),
            "CONFIGURATION_ERROR"
        );
    }

    #[test]
    fn test_error_messages() {
        let err = AppError::BudgetExceeded {
            requested: 50,
            supported: 10,
        };
        assert_eq!(
            err.to_string(),
            "Budget exceeded: requested 50 questions, at most 10 supported"
        );

        let err = AppError::Validation(vec![
            Violation::citation(0, "quote is not a literal substring of c0001"),
            Violation::language(1, "expected en, found fr"),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("Validation failed with 2 violation(s)"));
        assert!(message.contains("question 1: expected en, found fr"));
    }

    #[test]
    fn test_only_transient_and_validation_are_recoverable() {
        assert!(AppError::ProviderTransient("timeout".into()).is_recoverable());
        assert!(AppError::Validation(vec![]).is_recoverable());
        assert!(!AppError::ProviderFatal("401".into()).is_recoverable());
        assert!(!AppError::EmptyContext("none".into()).is_recoverable());
        assert!(!AppError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_failure_without_trace_from_app_error() {
        let failure: GenerationFailure = AppError::Cancelled.into();
        assert!(failure.trace.is_none());
        assert_eq!(failure.to_string(), "Generation cancelled");
    }
}
