//! External program execution
//!
//! Programs named by PROGRAM/IMPORT/RUN clauses run with the event's
//! accumulated properties exported as environment variables, under a
//! caller-supplied timeout. Expiry kills the child; the outcome records
//! what happened, it never panics the event.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use uevd_core::model::PropertyMap;

use crate::errors::{EngineError, ProgramFailure, Result};

/// What one program invocation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOutcome {
    pub command: String,
    /// Exit status; `None` when the program was killed (timeout or signal)
    pub status: Option<i32>,
    pub stdout: String,
    pub timed_out: bool,
}

impl ProgramOutcome {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// The failure classification, if this outcome is a failure
    pub fn failure(&self) -> Option<ProgramFailure> {
        if self.timed_out {
            return Some(ProgramFailure::Timeout);
        }
        match self.status {
            Some(0) => None,
            Some(code) => Some(ProgramFailure::NonZero(code)),
            None => Some(ProgramFailure::Signal),
        }
    }
}

/// Run one program to completion or timeout
///
/// The command line is split on whitespace with single/double quote
/// grouping; no shell is involved. The child environment is the event's
/// property map plus the inherited PATH.
///
/// # Errors
/// `Program` with `Spawn` when the command is empty or cannot be started.
/// Non-zero exits, signals, and timeouts are NOT errors here - they come
/// back as an outcome so the caller decides whether they are fatal.
pub async fn run_program(
    command: &str,
    properties: &PropertyMap,
    timeout: Duration,
) -> Result<ProgramOutcome> {
    let argv = split_command(command);
    let Some((program, args)) = argv.split_first() else {
        return Err(EngineError::Program {
            command: command.to_string(),
            reason: ProgramFailure::Spawn("empty command".to_string()),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    for (key, value) in properties.iter() {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|e| EngineError::Program {
        command: command.to_string(),
        reason: ProgramFailure::Spawn(e.to_string()),
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let outcome = ProgramOutcome {
                command: command.to_string(),
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                timed_out: false,
            };
            debug!(command, status = ?outcome.status, "program finished");
            Ok(outcome)
        }
        Ok(Err(e)) => Err(EngineError::Program {
            command: command.to_string(),
            reason: ProgramFailure::Spawn(e.to_string()),
        }),
        Err(_elapsed) => {
            // Dropping the timed-out future killed the child (kill_on_drop)
            warn!(command, timeout_ms = timeout.as_millis() as u64, "program timed out, killed");
            Ok(ProgramOutcome {
                command: command.to_string(),
                status: None,
                stdout: String::new(),
                timed_out: true,
            })
        }
    }
}

/// Split a command line on whitespace, honoring quote grouping
///
/// `probe --label "My Disk"` yields three arguments. Quotes may be single
/// or double; there is no escape processing beyond the grouping itself.
pub fn split_command(command: &str) -> Vec<String> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut pending = false;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                pending = true;
            }
            None if c.is_whitespace() => {
                if pending || !current.is_empty() {
                    argv.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            None => current.push(c),
        }
    }
    if pending || !current.is_empty() {
        argv.push(current);
    }
    argv
}

/// Parse env-format text (KEY=VALUE lines) into property pairs
///
/// Blank lines and `#` comments are skipped; surrounding quotes on the
/// value are stripped. Used by IMPORT{program} on stdout and IMPORT{file}
/// on file content.
pub fn parse_env_text(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}
