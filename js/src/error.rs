//! Store error types

use thiserror::Error;

use crate::StoreKind;

/// Errors that can occur while persisting or restoring a snapshot
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned or unavailable: {0}")]
    Lock(String),

    #[error("Store kind '{0}' requires a path")]
    MissingPath(StoreKind),

    #[error("Store is owned by another process ({}, pid {})", .path.display(), pid_or_unknown(.pid))]
    Owned {
        path: std::path::PathBuf,
        pid: Option<u32>,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

fn pid_or_unknown(pid: &Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_message() {
        let err = StoreError::MissingPath(StoreKind::Sqlite);
        assert_eq!(err.to_string(), "Store kind 'sqlite' requires a path");
    }

    #[test]
    fn test_owned_message_names_pid() {
        let err = StoreError::Owned {
            path: "/tmp/state.json.owner".into(),
            pid: Some(42),
        };
        assert_eq!(
            err.to_string(),
            "Store is owned by another process (/tmp/state.json.owner, pid 42)"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
