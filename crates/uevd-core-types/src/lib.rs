//! Core types shared across UEVD facilities
//!
//! This crate provides foundational types used by the rule database, the
//! execution engine, and the serialization layer:
//!
//! - **Event types**: EventId, DeviceAction
//! - **Device addressing**: Devnum (major:minor), DeviceIdentity
//! - **Schema constants**: Canonical logging field keys and property names

pub mod device;
pub mod event;
pub mod schema;

pub use device::{DeviceIdentity, Devnum};
pub use event::{DeviceAction, EventId};
