use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why an external program invocation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramFailure {
    /// The program could not be started at all
    Spawn(String),
    /// The program exited with a non-zero status
    NonZero(i32),
    /// The program was terminated by a signal
    Signal,
    /// The program exceeded its timeout and was killed
    Timeout,
}

impl std::fmt::Display for ProgramFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramFailure::Spawn(msg) => write!(f, "spawn failed: {}", msg),
            ProgramFailure::NonZero(code) => write!(f, "exit status {}", code),
            ProgramFailure::Signal => write!(f, "terminated by signal"),
            ProgramFailure::Timeout => write!(f, "timed out"),
        }
    }
}

/// Error taxonomy for event execution
///
/// Per-event errors attribute to that event only. Action errors on
/// cosmetic targets (symlinks) degrade the event; on load-bearing targets
/// (the device node) they fail it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A node/symlink filesystem action failed
    #[error("Action failed at {path}: {message}")]
    Action { path: PathBuf, message: String },

    /// An external program failed (non-zero exit, timeout, spawn failure)
    #[error("Program '{command}' failed: {reason}")]
    Program {
        command: String,
        reason: ProgramFailure,
    },

    /// Matcher contract breach while evaluating a rule (logic bug; the
    /// offending rule is abandoned, evaluation continues)
    #[error("Match failure in rule {rule}: {message}")]
    Match { rule: String, message: String },

    /// The event was cancelled before filesystem application began
    #[error("Event cancelled before node actions")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Create an action error with path context
pub fn action_error(path: &std::path::Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::Action {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_failure_display() {
        assert_eq!(ProgramFailure::NonZero(2).to_string(), "exit status 2");
        assert_eq!(ProgramFailure::Timeout.to_string(), "timed out");
    }
}
