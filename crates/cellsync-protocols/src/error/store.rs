//! Metadata store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StoreError::NotFound("doc-1".to_string());
        let display = err.to_string();
        assert!(display.contains("not found"));
        assert!(display.contains("doc-1"));
    }

    #[test]
    fn test_storage_error() {
        let err = StoreError::Storage("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_all_error_variants() {
        let errors = vec![
            StoreError::NotFound("a".to_string()),
            StoreError::Storage("b".to_string()),
            StoreError::Serialization("c".to_string()),
            StoreError::Connection("d".to_string()),
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
