//! Processor error types

use thiserror::Error;

/// How a processor attempt failed
///
/// `Retryable` consumes one retry and the job goes back to the queue after a
/// backoff. `Fatal` fails the job immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    #[error("Retryable error: {0}")]
    Retryable(String),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ProcessorError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(message) | Self::Fatal(message) => message,
        }
    }
}

/// A payload that doesn't deserialize will never succeed on retry
impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fatal(format!("Invalid payload: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_and_message() {
        let err = ProcessorError::retryable("connection reset");
        assert!(err.is_retryable());
        assert_eq!(err.message(), "connection reset");
        assert_eq!(err.to_string(), "Retryable error: connection reset");

        let err = ProcessorError::fatal("bad input");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Fatal error: bad input");
    }

    #[test]
    fn test_serde_error_is_fatal() {
        let serde_err = serde_json::from_str::<u64>("\"nope\"").unwrap_err();
        let err = ProcessorError::from(serde_err);
        assert!(!err.is_retryable());
        assert!(err.message().starts_with("Invalid payload"));
    }
}
