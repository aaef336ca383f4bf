//! UEVD Rules - Rule database
//!
//! This crate owns the rule pipeline up to (but not including) execution:
//! - Rule model: predicates and actions, with the singular-slot vs
//!   accumulating-list action split made explicit in the types
//! - Parser: one logical line of rule text into a Rule
//! - Loader: search-path scanning with filename override masking
//! - RuleDatabase: the immutable, totally-ordered rule collection
//!
//! Loading is a distinct phase from evaluation; everything in a loaded
//! database is read-only and shared by all concurrent events.

pub mod database;
pub mod errors;
pub mod loader;
pub mod model;
pub mod parser;

pub use database::RuleDatabase;
pub use errors::{Result, RuleError};
pub use model::{Action, Assign, ImportSource, Predicate, Rule, RuleSource, Selector};
