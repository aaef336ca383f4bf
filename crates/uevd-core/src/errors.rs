use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy for snapshot construction and pattern compilation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed match pattern (unterminated bracket set, bad range, bad regex)
    #[error("Invalid pattern '{pattern}': {reason}")]
    PatternSyntax { pattern: String, reason: String },

    /// The devpath has no corresponding sysfs directory
    #[error("Unknown device: {devpath}")]
    UnknownDevice { devpath: String },

    /// A sysfs attribute exists but could not be read
    #[error("Unreadable attribute '{attribute}' on {devpath}: {message}")]
    AttributeUnreadable {
        devpath: String,
        attribute: String,
        message: String,
    },

    /// Uevent record is missing a required field or carries a malformed one
    #[error("Invalid uevent record: {reason}")]
    InvalidRecord { reason: String },

    /// Generic IO failure with operation context
    #[error("IO error in {op}: {message}")]
    Io { op: String, message: String },
}

/// Create an IO error with operation context
pub fn io_error(op: &str, err: std::io::Error) -> CoreError {
    CoreError::Io {
        op: op.to_string(),
        message: err.to_string(),
    }
}

/// Create a pattern syntax error
pub fn pattern_syntax(pattern: &str, reason: impl Into<String>) -> CoreError {
    CoreError::PatternSyntax {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = pattern_syntax("[abc", "unterminated bracket set");
        assert!(err.to_string().contains("[abc"));
        assert!(err.to_string().contains("unterminated"));
    }
}
