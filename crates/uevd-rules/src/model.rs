//! Rule model
//!
//! A Rule is an ordered conjunction of match predicates plus an ordered list
//! of actions. The "last rule wins" vs "accumulates" duality is encoded in
//! the action variants themselves: singular-slot decisions (NAME, OWNER,
//! GROUP, MODE) carry a `final_` flag, accumulating decisions (SYMLINK, TAG,
//! RUN, imported properties) are list operations. Behavior is never inferred
//! from operator spelling at evaluation time.

use std::sync::Arc;

use uevd_core::pattern::Pattern;

/// Source location of a rule (file and first physical line)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub file: Arc<str>,
    pub line: u32,
}

impl RuleSource {
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for RuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Device attribute a match predicate selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Uevent action string
    Action,
    /// Kernel name of the event's device (last devpath component)
    Kernel,
    /// Full kernel device path
    Devpath,
    Subsystem,
    Devtype,
    Driver,
    /// A property from the working property map
    Env(String),
    /// A sysfs attribute of the event's device
    Attr(String),
    /// Kernel name of any ancestor device
    Kernels,
    /// Subsystem of any ancestor device
    Subsystems,
    /// Driver of any ancestor device
    Drivers,
    /// Sysfs attribute of any ancestor device
    Attrs(String),
    /// Any accumulated tag
    Tag,
    /// Stdout of the most recent PROGRAM clause in this event
    Result,
}

/// One match predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Pattern match of a selected value; `negated` inverts the outcome
    Match {
        selector: Selector,
        negated: bool,
        pattern: Pattern,
    },
    /// Run a program; the predicate holds when it exits zero
    ///
    /// The command's stdout (trimmed) becomes the event's last result,
    /// matchable with the `RESULT` selector.
    Program { command: String, negated: bool },
}

/// Assignment operator spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    /// `=` - overwrite
    Set,
    /// `+=` - accumulate
    Add,
    /// `:=` - final; later `=`/`+=` on the same slot/key are ignored
    Final,
}

/// Source of an IMPORT action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    /// Run a program and parse its stdout as KEY=VALUE lines
    Program,
    /// Read an env-format file
    File,
}

/// One rule action
///
/// Operand strings may contain substitution expressions; they are expanded
/// by the engine at apply time against the event's execution context.
#[derive(Debug, Clone)]
pub enum Action {
    /// `ENV{key}<op>"value"` - property assignment, visible to later rules
    /// within the same event
    SetProperty {
        key: String,
        op: Assign,
        value: String,
    },
    /// `NAME="value"` / `NAME:="value"` - node name (singular slot)
    SetName { value: String, final_: bool },
    /// `SYMLINK<op>"value"` - symlink list; `=` resets then appends, `+=`
    /// appends, `:=` sets and locks the list
    Symlink { op: Assign, value: String },
    /// `OWNER="value"` (singular slot)
    SetOwner { value: String, final_: bool },
    /// `GROUP="value"` (singular slot)
    SetGroup { value: String, final_: bool },
    /// `MODE="value"` (singular slot, octal)
    SetMode { value: String, final_: bool },
    /// `TAG+="value"` (accumulating set)
    AddTag { value: String },
    /// `IMPORT{program|file}="value"` - import properties immediately
    Import { source: ImportSource, value: String },
    /// `RUN+="command"` - deferred program; `RUN{mandatory}+=` marks its
    /// failure as fatal for the event. `=` resets the queue first.
    Run {
        op: Assign,
        command: String,
        mandatory: bool,
    },
    /// `SERIAL="token"` - dependent-device wait token for the
    /// serialization layer
    SetWaitToken { value: String },
}

/// A parsed rule: ordered predicates, ordered actions, source location
#[derive(Debug, Clone)]
pub struct Rule {
    pub predicates: Vec<Predicate>,
    pub actions: Vec<Action>,
    pub source: RuleSource,
}

impl Rule {
    /// Whether this rule carries no actions (pure match, a no-op)
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}
