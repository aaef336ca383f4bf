//! Rule file discovery and logical-line assembly
//!
//! Search paths are given in priority order: a file name present in an
//! earlier path masks same-named files in every later path, including the
//! empty-file mask. Hidden files and editor backups are never rule files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{Result, RuleError};

/// A rule file selected for loading after override resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFile {
    /// File name, the masking key
    pub name: String,
    /// Full path of the winning file
    pub path: PathBuf,
    /// Index of the search path it came from (lower wins)
    pub priority: usize,
}

/// One logical line of a rule file, continuations joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub text: String,
    /// Physical line number of the first line
    pub number: u32,
}

/// Whether a directory entry can be a rule file at all
///
/// Hidden files and common editor backup spellings are ignored, and only
/// the `.rules` extension is considered.
pub fn is_rule_file(name: &str) -> bool {
    !name.starts_with('.')
        && !name.ends_with('~')
        && !name.ends_with(".bak")
        && !name.ends_with(".swp")
        && name.ends_with(".rules")
}

/// Scan the search paths and resolve filename overrides
///
/// Returns the winning files sorted by (priority, name) - the database's
/// evaluation order at file granularity. A missing directory is skipped; an
/// unreadable one aborts the scan.
pub fn scan_search_paths(search_paths: &[PathBuf]) -> Result<Vec<RuleFile>> {
    let mut winners: HashMap<String, RuleFile> = HashMap::new();

    for (priority, dir) in search_paths.iter().enumerate() {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "rules directory absent, skipping");
                continue;
            }
            Err(e) => {
                return Err(RuleError::SearchPath {
                    path: dir.clone(),
                    message: e.to_string(),
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|e| RuleError::SearchPath {
                path: dir.clone(),
                message: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_rule_file(&name) {
                continue;
            }
            if !entry.path().is_file() {
                continue;
            }
            // First (highest-priority) occurrence of a name wins
            winners.entry(name.clone()).or_insert(RuleFile {
                name,
                path: entry.path(),
                priority,
            });
        }
    }

    let mut files: Vec<RuleFile> = winners.into_values().collect();
    files.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
    Ok(files)
}

/// Split file content into logical lines
///
/// Blank lines and `#` comments are dropped; a trailing backslash joins the
/// next physical line. Each logical line remembers the physical line number
/// it started on, for diagnostics.
pub fn logical_lines(content: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut pending: Option<LogicalLine> = None;

    for (idx, raw) in content.lines().enumerate() {
        let number = (idx + 1) as u32;

        if let Some(mut joined) = pending.take() {
            let part = raw.trim();
            if let Some(stripped) = part.strip_suffix('\\') {
                joined.text.push_str(stripped.trim_end());
                pending = Some(joined);
            } else {
                joined.text.push_str(part);
                lines.push(joined);
            }
            continue;
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            pending = Some(LogicalLine {
                text: stripped.trim_end().to_string(),
                number,
            });
        } else {
            lines.push(LogicalLine {
                text: trimmed.to_string(),
                number,
            });
        }
    }

    // A dangling continuation still yields a (likely malformed) line so the
    // parser reports it instead of it vanishing silently
    if let Some(joined) = pending {
        lines.push(joined);
    }
    lines
}

/// Read one rule file's logical lines
pub fn read_rule_file(path: &Path) -> Result<Vec<LogicalLine>> {
    let content = std::fs::read_to_string(path).map_err(|e| RuleError::ReadFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(logical_lines(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_rule_file() {
        assert!(is_rule_file("50-default.rules"));
        assert!(!is_rule_file(".50-default.rules"));
        assert!(!is_rule_file("50-default.rules~"));
        assert!(!is_rule_file("50-default.conf"));
        assert!(!is_rule_file("50-default.rules.bak"));
    }

    #[test]
    fn test_logical_lines_skip_comments_and_blanks() {
        let content = "# header\n\nKERNEL==\"sda\", SYMLINK+=\"a\"\n";
        let lines = logical_lines(content);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 3);
    }

    #[test]
    fn test_logical_lines_join_continuations() {
        let content = "KERNEL==\"sda\", \\\n  SYMLINK+=\"a\"\n";
        let lines = logical_lines(content);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "KERNEL==\"sda\",SYMLINK+=\"a\"");
        assert_eq!(lines[0].number, 1);
    }

    #[test]
    fn test_logical_lines_multi_continuation() {
        let content = "A==\"1\", \\\nB==\"2\", \\\nC==\"3\"\n";
        let lines = logical_lines(content);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "A==\"1\",B==\"2\",C==\"3\"");
    }
}
