use serde::{Deserialize, Serialize};
use uevd_core_types::{schema, DeviceAction, Devnum};

use super::PropertyMap;
use crate::errors::{CoreError, Result};

/// The input record handed to the engine by an external uevent receiver
///
/// The raw kernel wire format is out of scope; whatever receives the netlink
/// message is expected to deliver this parsed record. `properties` carries
/// every KEY=VALUE pair of the message in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UeventRecord {
    pub action: DeviceAction,
    pub devpath: String,
    pub subsystem: Option<String>,
    pub devnum: Option<Devnum>,
    pub properties: PropertyMap,
}

impl UeventRecord {
    /// Create a record with the minimum identifying fields
    pub fn new(action: DeviceAction, devpath: impl Into<String>) -> Self {
        Self {
            action,
            devpath: devpath.into(),
            subsystem: None,
            devnum: None,
            properties: PropertyMap::new(),
        }
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn with_devnum(mut self, devnum: Devnum) -> Self {
        self.devnum = Some(devnum);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Validate structural invariants of the record
    ///
    /// The devpath must be absolute (kernel device paths always are), and a
    /// MAJOR property without MINOR (or vice versa) is malformed.
    pub fn validate(&self) -> Result<()> {
        if !self.devpath.starts_with('/') {
            return Err(CoreError::InvalidRecord {
                reason: format!("devpath must be absolute: {}", self.devpath),
            });
        }
        let has_major = self.properties.contains(schema::PROP_MAJOR);
        let has_minor = self.properties.contains(schema::PROP_MINOR);
        if has_major != has_minor {
            return Err(CoreError::InvalidRecord {
                reason: "MAJOR and MINOR must be present together".to_string(),
            });
        }
        Ok(())
    }

    /// Devnum from the explicit field or the MAJOR/MINOR properties
    pub fn effective_devnum(&self) -> Option<Devnum> {
        if self.devnum.is_some() {
            return self.devnum;
        }
        let major = self.properties.get(schema::PROP_MAJOR)?.parse().ok()?;
        let minor = self.properties.get(schema::PROP_MINOR)?.parse().ok()?;
        Some(Devnum::new(major, minor))
    }
}
