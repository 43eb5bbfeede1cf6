//! Error handling for the portfolio engine
//!
//! Defines custom error types and establishes a unified Result type
//! using anyhow for context chaining and error propagation.

use thiserror::Error;

/// Core error types for portfolio operations
///
/// Normalization errors are broker-scoped: a failing statement import
/// aborts that broker only, never sibling brokers or the manager-level
/// aggregation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("pricing error: {0}")]
    Pricing(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Result type alias for portfolio operations
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = EngineError::FileNotFound("trades.csv".to_string());
        assert_eq!(err.to_string(), "file not found: trades.csv");
    }

    #[test]
    fn test_integrity_error_variant() {
        let err = EngineError::DataIntegrity("oversell of XYZ".to_string());
        assert!(err.to_string().starts_with("data integrity error"));
    }

    #[test]
    fn test_anyhow_context_chains_errors() {
        use anyhow::Context;
        let result: Result<()> =
            Err(anyhow::anyhow!("original error")).context("failed to normalize statement");
        match result {
            Err(e) => {
                let msg = e.to_string();
                assert!(msg.contains("failed to normalize statement"));
                let debug_msg = format!("{:?}", e);
                assert!(debug_msg.contains("original error") || msg.contains("original error"));
            }
            Ok(_) => panic!("expected error"),
        }
    }
}
