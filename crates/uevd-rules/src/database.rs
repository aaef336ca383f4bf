//! The rule database
//!
//! An immutable, totally-ordered collection of rules. The order is
//! (search-path priority, file name, line number), fixed at load time;
//! `evaluate_order` replays exactly that order on every call. Compiled
//! patterns live inside the rules the database owns - reloading builds a
//! fresh database, there is no global pattern cache to invalidate.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::loader::{read_rule_file, scan_search_paths, RuleFile};
use crate::model::{Rule, RuleSource};
use crate::parser::parse_rule;

/// Per-file load summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub path: PathBuf,
    pub priority: usize,
    pub rules: usize,
    pub skipped: usize,
}

/// Parsed, ordered, immutable rule collection
#[derive(Debug, Default)]
pub struct RuleDatabase {
    rules: Vec<Rule>,
    files: Vec<FileSummary>,
    skipped: usize,
}

impl RuleDatabase {
    /// Load every rule file under the search paths
    ///
    /// Later paths are lower priority; a file name in an earlier path masks
    /// same-named files in later paths. A malformed rule is skipped with a
    /// diagnostic and the load continues - one broken rule must not disable
    /// all device handling. An unreadable rule file is likewise skipped.
    ///
    /// # Errors
    /// `SearchPath` when a search directory exists but cannot be scanned.
    pub fn load(search_paths: &[PathBuf]) -> Result<Self> {
        let files = scan_search_paths(search_paths)?;
        let mut db = RuleDatabase::default();

        for file in &files {
            db.load_file(file);
        }

        debug!(
            files = db.files.len(),
            rules = db.rules.len(),
            skipped = db.skipped,
            "rule database loaded"
        );
        Ok(db)
    }

    fn load_file(&mut self, file: &RuleFile) {
        let lines = match read_rule_file(&file.path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(rule_file = %file.path.display(), error = %e, "skipping unreadable rules file");
                self.files.push(FileSummary {
                    path: file.path.clone(),
                    priority: file.priority,
                    rules: 0,
                    skipped: 0,
                });
                return;
            }
        };

        let file_label: Arc<str> = Arc::from(file.name.as_str());
        let mut loaded = 0usize;
        let mut skipped = 0usize;

        for line in lines {
            let source = RuleSource {
                file: Arc::clone(&file_label),
                line: line.number,
            };
            match parse_rule(&line.text, source) {
                Ok(rule) => {
                    self.rules.push(rule);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed rule");
                    skipped += 1;
                }
            }
        }

        self.skipped += skipped;
        self.files.push(FileSummary {
            path: file.path.clone(),
            priority: file.priority,
            rules: loaded,
            skipped,
        });
    }

    /// The fixed total evaluation order
    ///
    /// Stable and reproducible: repeated calls on an unmodified database
    /// yield the same sequence.
    pub fn evaluate_order(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.rules.iter()
    }

    /// Number of loaded rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules skipped due to parse errors
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Per-file load summaries, in evaluation order
    pub fn files(&self) -> &[FileSummary] {
        &self.files
    }
}
