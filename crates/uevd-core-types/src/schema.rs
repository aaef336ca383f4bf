//! Canonical schema constants for structured logging and device properties
//!
//! These constants ensure consistency across all logging and error reporting.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT_ID: &str = "event_id";
pub const FIELD_STATE: &str = "state";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Device identifiers
pub const FIELD_DEVPATH: &str = "devpath";
pub const FIELD_SUBSYSTEM: &str = "subsystem";
pub const FIELD_ACTION: &str = "action";
pub const FIELD_DEVNUM: &str = "devnum";

// Rule source location
pub const FIELD_RULE_FILE: &str = "rule_file";
pub const FIELD_RULE_LINE: &str = "rule_line";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";

// Well-known uevent property names
pub const PROP_ACTION: &str = "ACTION";
pub const PROP_DEVPATH: &str = "DEVPATH";
pub const PROP_SUBSYSTEM: &str = "SUBSYSTEM";
pub const PROP_DEVTYPE: &str = "DEVTYPE";
pub const PROP_DEVNAME: &str = "DEVNAME";
pub const PROP_DRIVER: &str = "DRIVER";
pub const PROP_MAJOR: &str = "MAJOR";
pub const PROP_MINOR: &str = "MINOR";
