//! Error types for dmrprog-codeplug.

use thiserror::Error;

/// Errors that can occur while building memory maps or importing records.
#[derive(Debug, Error)]
pub enum CodeplugError {
    /// Bank table violates ordering or capacity rules.
    #[error("Invalid bank table: {0}")]
    InvalidBankTable(String),

    /// Malformed CSV row.
    #[error("CSV error on line {line}: {message}")]
    Csv {
        /// 1-based line number in the input.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Underlying reader/writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodeplugError {
    /// Create a CSV error for a specific line.
    pub fn csv_at(line: usize, message: impl Into<String>) -> Self {
        CodeplugError::Csv {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid bank table error.
    pub fn invalid_banks(message: impl Into<String>) -> Self {
        CodeplugError::InvalidBankTable(message.into())
    }
}

/// Result type alias for codeplug operations.
pub type CodeplugResult<T> = Result<T, CodeplugError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodeplugError::csv_at(12, "missing receive frequency");
        assert!(err.to_string().contains("line 12"));

        let err = CodeplugError::invalid_banks("bank 3 overlaps bank 2");
        assert!(err.to_string().contains("overlaps"));
    }
}
