//! UEVD Core - Device model and matching primitives
//!
//! This crate provides the foundational pieces shared by the rule database
//! and the execution engine:
//! - DeviceSnapshot: the immutable per-event view of one device
//! - UeventRecord: the input record handed over by the uevent receiver
//! - Pattern: compiled glob/regex value matching
//! - SnapshotBuilder: snapshot construction from payload plus sysfs reads
//! - Error taxonomy and the logging facility

pub mod errors;
pub mod logging;
pub mod model;
pub mod pattern;
pub mod sysfs;

// Re-export commonly used types
pub use errors::{CoreError, Result};
pub use model::{AncestorSnapshot, DeviceSnapshot, PropertyMap, UeventRecord};
pub use pattern::{MatchCase, Pattern};
pub use sysfs::SnapshotBuilder;
