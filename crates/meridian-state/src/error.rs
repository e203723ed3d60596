//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("failed to open state table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("failed to encode {table}/{key}: {reason}")]
    Encode {
        table: &'static str,
        key: String,
        reason: String,
    },

    /// A stored value no longer decodes as its record type.
    #[error("corrupt record {table}/{key}: {reason}")]
    Corrupt {
        table: &'static str,
        key: String,
        reason: String,
    },
}

impl StateError {
    pub(crate) fn encode(table: &'static str, key: &str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            table,
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn corrupt(table: &'static str, key: &str, err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            table,
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_errors_name_the_key() {
        let err = StateError::corrupt("resources", "orders", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "corrupt record resources/orders: expected value at line 1"
        );
    }
}
