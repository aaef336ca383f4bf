//! The match/execute state machine
//!
//! One engine invocation owns one event:
//! `Created → MatchingRules → ApplyingNodeActions → RunningPrograms → Done`
//! (or `Failed` from any state). Matching walks the database's fixed order
//! with forward property visibility; node actions key off major:minor, never
//! names; deferred programs run last, in accumulation order.
//!
//! Every individual action is idempotent: replaying the same snapshot
//! against the same database converges to the same node/symlink/ownership
//! state, which is also what makes "never roll back, let the next event
//! correct it" safe.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use uevd_core::model::DeviceSnapshot;
use uevd_core::pattern::Pattern;
use uevd_core_types::{schema, DeviceAction, DeviceIdentity, Devnum, EventId};
use uevd_rules::{Action, Assign, ImportSource, Predicate, Rule, RuleDatabase, Selector};

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::errors::{EngineError, Result};
use crate::nodes::{
    encode_devnode_name, install_symlink, remove_empty_parents, remove_symlink_if_points,
    NodeBackend, NodeKind,
};
use crate::program::{parse_env_text, run_program, ProgramOutcome};
use crate::substitute::expand;

/// Event processing states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Created,
    MatchingRules,
    ApplyingNodeActions,
    RunningPrograms,
    Done,
    Failed,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Created => "created",
            EventState::MatchingRules => "matching_rules",
            EventState::ApplyingNodeActions => "applying_node_actions",
            EventState::RunningPrograms => "running_programs",
            EventState::Done => "done",
            EventState::Failed => "failed",
        }
    }
}

/// Why an event hard-failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The device node could not be created (load-bearing action)
    NodeCreation,
    /// A program marked mandatory failed
    MandatoryProgram,
    /// The event was cancelled before node actions began
    Cancelled,
    Internal,
}

/// Per-event result reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Success,
    /// Completed, but with nonfatal program or symlink failures
    DegradedSuccess,
    Failed(FailureReason),
}

/// Everything the caller learns about one processed event
#[derive(Debug)]
pub struct EventResult {
    pub event_id: EventId,
    pub identity: DeviceIdentity,
    pub disposition: EventDisposition,
    pub program_outcomes: Vec<ProgramOutcome>,
    pub errors: Vec<EngineError>,
    /// Wait token a SERIAL action set, for the dispatcher to bind
    pub wait_token: Option<String>,
}

/// Cooperative cancellation flag for one event
///
/// Honored only before filesystem mutation begins; once node actions
/// start, the event runs to a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The match/execute engine
///
/// Shared read-only across all concurrent events: the database is loaded
/// once, the backend is stateless (or internally synchronized).
pub struct EventEngine {
    db: Arc<RuleDatabase>,
    config: EngineConfig,
    backend: Arc<dyn NodeBackend>,
}

impl EventEngine {
    pub fn new(db: Arc<RuleDatabase>, config: EngineConfig, backend: Arc<dyn NodeBackend>) -> Self {
        Self {
            db,
            config,
            backend,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one event to its terminal state
    pub async fn process(&self, snapshot: DeviceSnapshot) -> EventResult {
        self.process_cancellable(snapshot, &CancelFlag::new()).await
    }

    /// Process one event, honoring cancellation up to node application
    pub async fn process_cancellable(
        &self,
        snapshot: DeviceSnapshot,
        cancel: &CancelFlag,
    ) -> EventResult {
        let event_id = EventId::new();
        let identity = snapshot.identity();
        let mut errors = Vec::new();
        let mut outcomes = Vec::new();

        self.transition(&event_id, &snapshot, EventState::MatchingRules);
        let mut ctx = ExecutionContext::new(&snapshot);
        for rule in self.db.evaluate_order() {
            match self.eval_predicates(rule, &snapshot, &mut ctx).await {
                Ok(false) => continue,
                Ok(true) => {
                    debug!(event_id = %event_id, rule = %rule.source, "rule matched");
                    self.apply_rule_actions(rule, &snapshot, &mut ctx).await;
                }
                Err(e) => {
                    // Matcher contract breach: abandon this rule only
                    warn!(rule = %rule.source, error = %e, "rule evaluation failed");
                    errors.push(e);
                }
            }
        }

        if cancel.is_cancelled() {
            self.transition(&event_id, &snapshot, EventState::Failed);
            errors.push(EngineError::Cancelled);
            return EventResult {
                event_id,
                identity,
                disposition: EventDisposition::Failed(FailureReason::Cancelled),
                program_outcomes: outcomes,
                errors,
                wait_token: ctx.wait_token.clone(),
            };
        }

        self.transition(&event_id, &snapshot, EventState::ApplyingNodeActions);
        let node_failed = self.apply_node_actions(&snapshot, &ctx, &mut errors);
        if node_failed {
            self.transition(&event_id, &snapshot, EventState::Failed);
            return EventResult {
                event_id,
                identity,
                disposition: EventDisposition::Failed(FailureReason::NodeCreation),
                program_outcomes: outcomes,
                errors,
                wait_token: ctx.wait_token.clone(),
            };
        }

        self.transition(&event_id, &snapshot, EventState::RunningPrograms);
        let mandatory_failed = self
            .run_deferred_programs(&ctx, &mut outcomes, &mut errors)
            .await;
        if mandatory_failed {
            self.transition(&event_id, &snapshot, EventState::Failed);
            return EventResult {
                event_id,
                identity,
                disposition: EventDisposition::Failed(FailureReason::MandatoryProgram),
                program_outcomes: outcomes,
                errors,
                wait_token: ctx.wait_token.clone(),
            };
        }

        self.transition(&event_id, &snapshot, EventState::Done);
        let degraded = !errors.is_empty() || outcomes.iter().any(|o| !o.success());
        EventResult {
            event_id,
            identity,
            disposition: if degraded {
                EventDisposition::DegradedSuccess
            } else {
                EventDisposition::Success
            },
            program_outcomes: outcomes,
            errors,
            wait_token: ctx.wait_token.clone(),
        }
    }

    fn transition(&self, event_id: &EventId, snapshot: &DeviceSnapshot, state: EventState) {
        debug!(
            event_id = %event_id,
            devpath = snapshot.devpath(),
            state = state.as_str(),
            "event state"
        );
    }

    // ===== MatchingRules =====

    /// Evaluate a rule's predicates left-to-right, first failure wins
    ///
    /// PROGRAM predicates run here, exactly once, and record their stdout
    /// as the event's last result for later RESULT clauses and `$result`
    /// substitutions.
    async fn eval_predicates(
        &self,
        rule: &Rule,
        snapshot: &DeviceSnapshot,
        ctx: &mut ExecutionContext,
    ) -> Result<bool> {
        for predicate in &rule.predicates {
            let holds = match predicate {
                Predicate::Match {
                    selector,
                    negated,
                    pattern,
                } => {
                    let matched = self
                        .eval_selector(selector, pattern, snapshot, ctx)
                        .map_err(|e| EngineError::Match {
                            rule: rule.source.to_string(),
                            message: e.to_string(),
                        })?;
                    matched != *negated
                }
                Predicate::Program { command, negated } => {
                    let succeeded = self.eval_program_predicate(command, snapshot, ctx).await;
                    succeeded != *negated
                }
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_selector(
        &self,
        selector: &Selector,
        pattern: &Pattern,
        snapshot: &DeviceSnapshot,
        ctx: &ExecutionContext,
    ) -> uevd_core::Result<bool> {
        let match_opt = |value: Option<&str>| value.map(|v| pattern.matches(v)).unwrap_or(false);
        Ok(match selector {
            Selector::Action => pattern.matches(snapshot.action().as_str()),
            Selector::Kernel => pattern.matches(snapshot.sysname()),
            Selector::Devpath => pattern.matches(snapshot.devpath()),
            Selector::Subsystem => match_opt(snapshot.subsystem()),
            Selector::Devtype => match_opt(snapshot.devtype()),
            Selector::Driver => match_opt(snapshot.driver()),
            Selector::Env(key) => match_opt(ctx.properties().get(key)),
            Selector::Attr(key) => match_opt(snapshot.attribute(key)?.as_deref()),
            Selector::Kernels => snapshot
                .ancestors()
                .iter()
                .any(|a| pattern.matches(a.sysname())),
            Selector::Subsystems => snapshot
                .ancestors()
                .iter()
                .any(|a| match_opt(a.subsystem())),
            Selector::Drivers => snapshot.ancestors().iter().any(|a| match_opt(a.driver())),
            Selector::Attrs(key) => snapshot
                .ancestors()
                .iter()
                .any(|a| match_opt(a.attribute(key).ok().flatten().as_deref())),
            Selector::Tag => ctx.tags().iter().any(|t| pattern.matches(t)),
            Selector::Result => match_opt(ctx.last_result.as_deref()),
        })
    }

    /// PROGRAM predicate: run now, match on zero exit, capture stdout
    async fn eval_program_predicate(
        &self,
        command: &str,
        snapshot: &DeviceSnapshot,
        ctx: &mut ExecutionContext,
    ) -> bool {
        let expanded = expand(command, snapshot, ctx);
        match run_program(&expanded, ctx.properties(), self.config.program_timeout).await {
            Ok(outcome) => {
                ctx.last_result = Some(outcome.stdout.trim_end().to_string());
                outcome.success()
            }
            Err(e) => {
                warn!(command = %expanded, error = %e, "PROGRAM predicate failed to run");
                false
            }
        }
    }

    /// Apply a matched rule's actions to the context
    ///
    /// Property assignments take effect immediately (visible to later
    /// rules); node decisions fill slots/lists; imports run now; programs
    /// are deferred.
    async fn apply_rule_actions(
        &self,
        rule: &Rule,
        snapshot: &DeviceSnapshot,
        ctx: &mut ExecutionContext,
    ) {
        for action in &rule.actions {
            match action {
                Action::SetProperty { key, op, value } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.set_property(key, expanded, *op);
                }
                Action::SetName { value, final_ } => {
                    let expanded = expand(value, snapshot, ctx);
                    if !ctx.name.set(expanded, *final_) {
                        debug!(rule = %rule.source, "NAME ignored, already final");
                    }
                }
                Action::Symlink { op, value } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.symlink_assign(*op, &expanded);
                }
                Action::SetOwner { value, final_ } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.owner.set(expanded, *final_);
                }
                Action::SetGroup { value, final_ } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.group.set(expanded, *final_);
                }
                Action::SetMode { value, final_ } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.mode.set(expanded, *final_);
                }
                Action::AddTag { value } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.add_tag(&expanded);
                }
                Action::Import { source, value } => {
                    self.apply_import(*source, value, snapshot, ctx).await;
                }
                Action::Run {
                    op,
                    command,
                    mandatory,
                } => {
                    if *op == Assign::Set {
                        ctx.reset_programs();
                    }
                    let expanded = expand(command, snapshot, ctx);
                    ctx.push_program(expanded, *mandatory);
                }
                Action::SetWaitToken { value } => {
                    let expanded = expand(value, snapshot, ctx);
                    ctx.wait_token = Some(expanded);
                }
            }
        }
    }

    /// IMPORT runs immediately; imported properties respect `:=` locks
    async fn apply_import(
        &self,
        source: ImportSource,
        value: &str,
        snapshot: &DeviceSnapshot,
        ctx: &mut ExecutionContext,
    ) {
        let expanded = expand(value, snapshot, ctx);
        let text = match source {
            ImportSource::Program => {
                match run_program(&expanded, ctx.properties(), self.config.program_timeout).await {
                    Ok(outcome) if outcome.success() => outcome.stdout,
                    Ok(outcome) => {
                        warn!(command = %expanded, status = ?outcome.status, "IMPORT program failed");
                        return;
                    }
                    Err(e) => {
                        warn!(command = %expanded, error = %e, "IMPORT program failed to run");
                        return;
                    }
                }
            }
            ImportSource::File => match std::fs::read_to_string(&expanded) {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %expanded, error = %e, "IMPORT file unreadable");
                    return;
                }
            },
        };
        for (key, value) in parse_env_text(&text) {
            ctx.set_property(&key, value, Assign::Set);
        }
    }

    // ===== ApplyingNodeActions =====

    /// Apply node, ownership, and symlink decisions; returns true when a
    /// load-bearing action failed
    fn apply_node_actions(
        &self,
        snapshot: &DeviceSnapshot,
        ctx: &ExecutionContext,
        errors: &mut Vec<EngineError>,
    ) -> bool {
        let Some(devnum) = snapshot.devnum() else {
            // Device without a node; nothing to apply
            return false;
        };

        let node_path = self.node_path(snapshot, ctx);

        if snapshot.action() == DeviceAction::Remove {
            self.remove_node_and_links(ctx, &node_path, devnum, errors);
            return false;
        }

        if let Err(e) = self.ensure_node(snapshot, &node_path, devnum) {
            errors.push(e);
            return true;
        }
        if let Err(e) = self.apply_ownership(ctx, &node_path) {
            // Ownership on an existing node is load-bearing too
            errors.push(e);
            return true;
        }
        self.refresh_symlinks(ctx, &node_path, errors);
        self.drop_stale_default_node(snapshot, &node_path, devnum);
        false
    }

    /// The node path for this event: rule decision, kernel-provided
    /// DEVNAME, then the kernel name
    fn node_path(&self, snapshot: &DeviceSnapshot, ctx: &ExecutionContext) -> PathBuf {
        let name = ctx
            .name
            .get()
            .map(String::as_str)
            .or_else(|| {
                snapshot
                    .properties()
                    .get(schema::PROP_DEVNAME)
                    .map(|n| n.trim_start_matches("/dev/"))
            })
            .unwrap_or_else(|| snapshot.sysname());
        self.config.dev_root.join(encode_devnode_name(name))
    }

    fn node_kind(&self, snapshot: &DeviceSnapshot) -> NodeKind {
        if snapshot.subsystem() == Some("block") {
            NodeKind::Block
        } else {
            NodeKind::Char
        }
    }

    /// Create or reuse the node, matching by major:minor and never by name
    fn ensure_node(
        &self,
        snapshot: &DeviceSnapshot,
        node_path: &Path,
        devnum: Devnum,
    ) -> Result<()> {
        match self.backend.devnum_of(node_path)? {
            Some(existing) if existing == devnum => {
                debug!(path = %node_path.display(), "node already present, reusing");
                return Ok(());
            }
            Some(stale) => {
                info!(path = %node_path.display(), stale = %stale, "replacing node with stale devnum");
                self.backend.remove_node(node_path)?;
            }
            None => {
                // Path may exist as a non-node leftover
                if std::fs::symlink_metadata(node_path).is_ok() {
                    self.backend.remove_node(node_path)?;
                }
            }
        }
        if let Some(parent) = node_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::errors::action_error(node_path, e))?;
        }
        match self.backend.create_node(node_path, self.node_kind(snapshot), devnum) {
            Ok(()) => Ok(()),
            Err(first) => {
                // Lost a creation race: fine if the winner carries our devnum
                match self.backend.devnum_of(node_path)? {
                    Some(existing) if existing == devnum => Ok(()),
                    _ => Err(first),
                }
            }
        }
    }

    fn apply_ownership(&self, ctx: &ExecutionContext, node_path: &Path) -> Result<()> {
        let owner = self.resolve_id(ctx.owner.get(), self.config.default_owner, |name| {
            self.backend.lookup_user(name)
        });
        let group = self.resolve_id(ctx.group.get(), self.config.default_group, |name| {
            self.backend.lookup_group(name)
        });
        let mode = match ctx.mode.get() {
            Some(text) => u32::from_str_radix(text, 8).unwrap_or_else(|_| {
                warn!(mode = %text, "unparsable mode, using default");
                self.config.default_mode
            }),
            None => self.config.default_mode,
        };
        self.backend.set_ownership(node_path, owner, group, mode)
    }

    fn resolve_id(
        &self,
        decision: Option<&String>,
        default: u32,
        lookup: impl Fn(&str) -> Option<u32>,
    ) -> u32 {
        let Some(text) = decision else {
            return default;
        };
        if let Ok(numeric) = text.parse::<u32>() {
            return numeric;
        }
        lookup(text).unwrap_or_else(|| {
            warn!(name = %text, "unresolvable owner/group name, using default");
            default
        })
    }

    /// Create/refresh every accumulated symlink; failures are cosmetic
    fn refresh_symlinks(
        &self,
        ctx: &ExecutionContext,
        node_path: &Path,
        errors: &mut Vec<EngineError>,
    ) {
        for name in ctx.symlinks() {
            let link = self.config.dev_root.join(encode_devnode_name(name));
            if link == *node_path {
                warn!(link = %link.display(), "symlink collides with the node path, skipped");
                continue;
            }
            if let Err(e) = install_symlink(&link, node_path) {
                warn!(link = %link.display(), error = %e, "symlink refresh failed");
                errors.push(e);
            }
        }
    }

    /// If a rule renamed the node, the devtmpfs-style default-name node is
    /// stale; drop it when it still carries our devnum
    fn drop_stale_default_node(
        &self,
        snapshot: &DeviceSnapshot,
        node_path: &Path,
        devnum: Devnum,
    ) {
        let default_path = self
            .config
            .dev_root
            .join(encode_devnode_name(snapshot.sysname()));
        if default_path == *node_path {
            return;
        }
        if let Ok(Some(existing)) = self.backend.devnum_of(&default_path) {
            if existing == devnum {
                debug!(path = %default_path.display(), "removing stale default-name node");
                let _ = self.backend.remove_node(&default_path);
            }
        }
    }

    /// Remove the node only when its devnum still matches the kernel's
    /// report, then drop symlinks that point at it
    fn remove_node_and_links(
        &self,
        ctx: &ExecutionContext,
        node_path: &Path,
        devnum: Devnum,
        errors: &mut Vec<EngineError>,
    ) {
        for name in ctx.symlinks() {
            let link = self.config.dev_root.join(encode_devnode_name(name));
            match remove_symlink_if_points(&link, node_path) {
                Ok(true) => remove_empty_parents(&link, &self.config.dev_root),
                Ok(false) => {}
                Err(e) => {
                    warn!(link = %link.display(), error = %e, "symlink removal failed");
                    errors.push(e);
                }
            }
        }

        match self.backend.devnum_of(node_path) {
            Ok(Some(existing)) if existing == devnum => {
                if let Err(e) = self.backend.remove_node(node_path) {
                    warn!(path = %node_path.display(), error = %e, "node removal failed");
                    errors.push(e);
                } else {
                    remove_empty_parents(node_path, &self.config.dev_root);
                }
            }
            Ok(Some(reused)) => {
                info!(
                    path = %node_path.display(),
                    ours = %devnum,
                    current = %reused,
                    "node reused by a newer device, keeping"
                );
            }
            Ok(None) => {
                debug!(path = %node_path.display(), "node already gone");
            }
            Err(e) => errors.push(e),
        }
    }

    // ===== RunningPrograms =====

    /// Run the deferred queue in order; returns true when a mandatory
    /// program failed
    async fn run_deferred_programs(
        &self,
        ctx: &ExecutionContext,
        outcomes: &mut Vec<ProgramOutcome>,
        errors: &mut Vec<EngineError>,
    ) -> bool {
        for pending in ctx.programs() {
            match run_program(&pending.command, ctx.properties(), self.config.program_timeout).await
            {
                Ok(outcome) => {
                    if let Some(failure) = outcome.failure() {
                        warn!(command = %pending.command, reason = %failure, "deferred program failed");
                        errors.push(EngineError::Program {
                            command: pending.command.clone(),
                            reason: failure,
                        });
                        outcomes.push(outcome);
                        if pending.mandatory {
                            return true;
                        }
                    } else {
                        outcomes.push(outcome);
                    }
                }
                Err(e) => {
                    warn!(command = %pending.command, error = %e, "deferred program failed to start");
                    errors.push(e);
                    if pending.mandatory {
                        return true;
                    }
                }
            }
        }
        false
    }
}
