//! Per-event execution context
//!
//! The mutable accumulator owned by one engine invocation for the duration
//! of one event. Singular decisions live in [`Slot`]s, accumulating
//! decisions in lists; the two categories are distinct types so the
//! "last wins vs accumulates" contract is enforced by construction rather
//! than inferred from operator spelling.

use std::collections::HashSet;
use tracing::debug;

use uevd_core::model::{DeviceSnapshot, PropertyMap};
use uevd_rules::Assign;

/// A singular decision slot with `:=` finalization
///
/// Once finalized, later writes are ignored; the last non-final write
/// before finalization wins.
#[derive(Debug, Clone, Default)]
pub struct Slot<T> {
    value: Option<T>,
    finalized: bool,
}

impl<T> Slot<T> {
    /// Write the slot; returns false when the write was ignored because
    /// the slot is already finalized
    pub fn set(&mut self, value: T, final_: bool) -> bool {
        if self.finalized {
            return false;
        }
        self.value = Some(value);
        self.finalized = final_;
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// A deferred external program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProgram {
    pub command: String,
    pub mandatory: bool,
}

/// Mutable accumulator for one event's execution
#[derive(Debug)]
pub struct ExecutionContext {
    properties: PropertyMap,
    finalized_keys: HashSet<String>,
    /// Node name decision (singular)
    pub name: Slot<String>,
    /// Node owner decision (singular, name or uid)
    pub owner: Slot<String>,
    /// Node group decision (singular, name or gid)
    pub group: Slot<String>,
    /// Node mode decision (singular, octal string)
    pub mode: Slot<String>,
    symlinks: Vec<String>,
    symlinks_finalized: bool,
    tags: Vec<String>,
    programs: Vec<PendingProgram>,
    /// Trimmed stdout of the most recent PROGRAM clause
    pub last_result: Option<String>,
    /// Dependent-device wait token set by a SERIAL action
    pub wait_token: Option<String>,
}

impl ExecutionContext {
    /// Seed a fresh context from the event's snapshot
    pub fn new(snapshot: &DeviceSnapshot) -> Self {
        Self {
            properties: snapshot.properties().clone(),
            finalized_keys: HashSet::new(),
            name: Slot::default(),
            owner: Slot::default(),
            group: Slot::default(),
            mode: Slot::default(),
            symlinks: Vec::new(),
            symlinks_finalized: false,
            tags: Vec::new(),
            programs: Vec::new(),
            last_result: None,
            wait_token: None,
        }
    }

    /// The working property map (snapshot properties plus rule assignments)
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Apply a property assignment
    ///
    /// `=` overwrites, `+=` appends space-separated, `:=` overwrites and
    /// locks the key against later writes within this event.
    pub fn set_property(&mut self, key: &str, value: String, op: Assign) {
        if self.finalized_keys.contains(key) {
            debug!(key, "property write ignored, key is final");
            return;
        }
        match op {
            Assign::Set => self.properties.set(key, value),
            Assign::Add => match self.properties.get(key) {
                Some(existing) if !existing.is_empty() => {
                    let joined = format!("{} {}", existing, value);
                    self.properties.set(key, joined);
                }
                _ => self.properties.set(key, value),
            },
            Assign::Final => {
                self.properties.set(key, value);
                self.finalized_keys.insert(key.to_string());
            }
        }
    }

    /// Apply a symlink assignment
    ///
    /// The value may carry several whitespace-separated link names. `=`
    /// resets the accumulated list first, `+=` appends, `:=` sets and locks
    /// the list.
    pub fn symlink_assign(&mut self, op: Assign, value: &str) {
        if self.symlinks_finalized {
            debug!("symlink write ignored, list is final");
            return;
        }
        if matches!(op, Assign::Set | Assign::Final) {
            self.symlinks.clear();
        }
        for name in value.split_whitespace() {
            if !self.symlinks.iter().any(|existing| existing == name) {
                self.symlinks.push(name.to_string());
            }
        }
        if op == Assign::Final {
            self.symlinks_finalized = true;
        }
    }

    /// Accumulated symlink names, in first-seen order
    pub fn symlinks(&self) -> &[String] {
        &self.symlinks
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|existing| existing == tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Queue a deferred program
    pub fn push_program(&mut self, command: String, mandatory: bool) {
        self.programs.push(PendingProgram { command, mandatory });
    }

    /// Reset the deferred program queue (`RUN=` semantics)
    pub fn reset_programs(&mut self) {
        self.programs.clear();
    }

    pub fn programs(&self) -> &[PendingProgram] {
        &self.programs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uevd_core::model::UeventRecord;
    use uevd_core_types::DeviceAction;

    fn ctx() -> ExecutionContext {
        // Remove events tolerate a missing sysfs tree, which keeps this
        // helper free of scratch directories
        let record = UeventRecord::new(DeviceAction::Remove, "/devices/x/sda");
        let snapshot = uevd_core::SnapshotBuilder::new("/nonexistent")
            .build(&record)
            .unwrap();
        ExecutionContext::new(&snapshot)
    }

    #[test]
    fn test_final_property_not_overwritten() {
        let mut ctx = ctx();
        ctx.set_property("ID_LABEL", "locked".into(), Assign::Final);
        ctx.set_property("ID_LABEL", "later".into(), Assign::Set);
        ctx.set_property("ID_LABEL", "more".into(), Assign::Add);
        assert_eq!(ctx.properties().get("ID_LABEL"), Some("locked"));
    }

    #[test]
    fn test_property_append_is_space_separated() {
        let mut ctx = ctx();
        ctx.set_property("FLAGS", "a".into(), Assign::Set);
        ctx.set_property("FLAGS", "b".into(), Assign::Add);
        assert_eq!(ctx.properties().get("FLAGS"), Some("a b"));
    }

    #[test]
    fn test_slot_last_wins_until_final() {
        let mut slot = Slot::default();
        assert!(slot.set("one".to_string(), false));
        assert!(slot.set("two".to_string(), true));
        assert!(!slot.set("three".to_string(), false));
        assert_eq!(slot.get().map(String::as_str), Some("two"));
    }

    #[test]
    fn test_symlink_set_resets_add_appends() {
        let mut ctx = ctx();
        ctx.symlink_assign(Assign::Add, "a b");
        ctx.symlink_assign(Assign::Set, "c");
        ctx.symlink_assign(Assign::Add, "d a");
        assert_eq!(ctx.symlinks(), ["c", "d", "a"]);
    }

    #[test]
    fn test_symlink_final_locks_list() {
        let mut ctx = ctx();
        ctx.symlink_assign(Assign::Final, "only");
        ctx.symlink_assign(Assign::Add, "ignored");
        assert_eq!(ctx.symlinks(), ["only"]);
    }

    #[test]
    fn test_symlink_dedup() {
        let mut ctx = ctx();
        ctx.symlink_assign(Assign::Add, "x");
        ctx.symlink_assign(Assign::Add, "x y");
        assert_eq!(ctx.symlinks(), ["x", "y"]);
    }
}
