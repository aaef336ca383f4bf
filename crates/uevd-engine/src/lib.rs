//! UEVD Engine - Match/execute engine and per-device serialization
//!
//! This crate turns a DeviceSnapshot plus a RuleDatabase into filesystem
//! side effects, exactly once per event:
//! - ExecutionContext: the per-event mutable accumulator
//! - EventEngine: the Created → MatchingRules → ApplyingNodeActions →
//!   RunningPrograms → Done/Failed state machine
//! - NodeBackend: the seam for device-node syscalls
//! - SerialGate: per-device serialization with FIFO admission
//! - EventDispatcher: arrival-ordered intake spawning one task per event

pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod nodes;
pub mod program;
pub mod serial;
pub mod substitute;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use dispatch::EventDispatcher;
pub use engine::{CancelFlag, EventDisposition, EventEngine, EventResult, EventState, FailureReason};
pub use errors::{EngineError, ProgramFailure, Result};
pub use nodes::{DevNodeBackend, FileNodeBackend, NodeBackend, NodeKind};
pub use program::ProgramOutcome;
pub use serial::{ConflictPolicy, DefaultConflictPolicy, GateTicket, SerialGate, SerialToken};
