use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid rule status: {0}")]
    InvalidRuleStatus(String),

    #[error("Expression evaluation error: {0}")]
    EvaluationError(String),

    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        operation: &'static str,
        timeout_ms: u128,
    },

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = DomainError::Timeout {
            operation: "create_event",
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "Operation timed out after 250ms: create_event"
        );
    }
}
