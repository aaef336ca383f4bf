//! Device model types
//!
//! The model layer holds the immutable per-event view of one device
//! (DeviceSnapshot with its ancestor chain) and the input record produced
//! by the external uevent receiver (UeventRecord).

mod properties;
mod record;
mod snapshot;

pub use properties::PropertyMap;
pub use record::UeventRecord;
pub use snapshot::{AncestorSnapshot, DeviceSnapshot};
