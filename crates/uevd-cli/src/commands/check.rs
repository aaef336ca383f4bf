//! `uevd check` - load the rule database and report what it holds
//!
//! A load-time lint: malformed rules surface here as warnings and a skip
//! count instead of silently degrading event handling later.

use clap::Args;
use std::path::PathBuf;

use uevd_rules::RuleDatabase;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Rules directory, highest priority first (repeatable)
    #[arg(long = "rules", required = true)]
    pub rules: Vec<PathBuf>,

    /// Print every rule in evaluation order
    #[arg(long)]
    pub list: bool,
}

pub fn execute(args: CheckArgs) -> Result<(), String> {
    let db = RuleDatabase::load(&args.rules).map_err(|e| e.to_string())?;

    println!(
        "{} file(s), {} rule(s), {} skipped",
        db.files().len(),
        db.len(),
        db.skipped()
    );
    for file in db.files() {
        println!(
            "  [{}] {} ({} rules, {} skipped)",
            file.priority,
            file.path.display(),
            file.rules,
            file.skipped
        );
    }
    if args.list {
        for rule in db.evaluate_order() {
            println!(
                "  {} ({} predicates, {} actions)",
                rule.source,
                rule.predicates.len(),
                rule.actions.len()
            );
        }
    }
    Ok(())
}
