//! Event identity and action types
//!
//! Every incoming uevent is assigned an EventId so that log lines, errors,
//! and program invocations belonging to one event can be correlated across
//! task boundaries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single device event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Generate a new random EventId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel action carried by a uevent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Add,
    Remove,
    Change,
    Online,
    Offline,
    Move,
}

impl DeviceAction {
    /// The kernel's string spelling of this action
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAction::Add => "add",
            DeviceAction::Remove => "remove",
            DeviceAction::Change => "change",
            DeviceAction::Online => "online",
            DeviceAction::Offline => "offline",
            DeviceAction::Move => "move",
        }
    }
}

impl std::str::FromStr for DeviceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(DeviceAction::Add),
            "remove" => Ok(DeviceAction::Remove),
            "change" => Ok(DeviceAction::Change),
            "online" => Ok(DeviceAction::Online),
            "offline" => Ok(DeviceAction::Offline),
            "move" => Ok(DeviceAction::Move),
            other => Err(format!("unknown device action: {}", other)),
        }
    }
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_id_generation() {
        let id1 = EventId::new();
        let id2 = EventId::new();

        // Should generate different IDs
        assert_ne!(id1, id2);

        // Should be non-empty strings
        assert!(!id1.as_str().is_empty());
        assert!(!id2.as_str().is_empty());
    }

    #[test]
    fn test_event_id_display() {
        let id = EventId::new();
        let display_str = format!("{}", id);
        assert_eq!(display_str, id.as_str());
    }

    #[test]
    fn test_action_round_trip() {
        for action in [
            DeviceAction::Add,
            DeviceAction::Remove,
            DeviceAction::Change,
            DeviceAction::Online,
            DeviceAction::Offline,
            DeviceAction::Move,
        ] {
            assert_eq!(DeviceAction::from_str(action.as_str()), Ok(action));
        }
    }

    #[test]
    fn test_action_rejects_unknown() {
        assert!(DeviceAction::from_str("bind").is_err());
        assert!(DeviceAction::from_str("").is_err());
    }

    #[test]
    fn test_serialization() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);

        let json = serde_json::to_string(&DeviceAction::Add).unwrap();
        assert_eq!(json, "\"add\"");
    }
}
