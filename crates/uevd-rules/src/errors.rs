use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using RuleError
pub type Result<T> = std::result::Result<T, RuleError>;

/// Error taxonomy for rule loading and parsing
///
/// Parse errors are per-rule: the loader logs them and continues, so a
/// single malformed rule never disables all device handling. Only an
/// unreadable search path aborts a load.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// A search path exists but cannot be scanned
    #[error("Cannot scan rules directory {path}: {message}")]
    SearchPath { path: PathBuf, message: String },

    /// A rule file could not be read (skipped with a diagnostic)
    #[error("Cannot read rules file {path}: {message}")]
    ReadFile { path: PathBuf, message: String },

    /// One logical line failed to parse (skipped with a diagnostic)
    #[error("{file}:{line}: {reason}")]
    Parse {
        file: String,
        line: u32,
        reason: String,
    },
}

/// Create a parse error for a rule source location
pub fn parse_error(file: &str, line: u32, reason: impl Into<String>) -> RuleError {
    RuleError::Parse {
        file: file.to_string(),
        line,
        reason: reason.into(),
    }
}
