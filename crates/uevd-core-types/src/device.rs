//! Device addressing types
//!
//! A device node is addressed by its major:minor number pair; a physical
//! device is correlated across events by its kernel device path.

use serde::{Deserialize, Serialize};

/// Device node number (major:minor pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Devnum {
    pub major: u32,
    pub minor: u32,
}

impl Devnum {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Encode as a raw dev_t using the Linux encoding
    ///
    /// Matches the glibc `makedev` bit layout so values round-trip with
    /// `st_rdev` from `stat(2)`.
    pub fn to_raw(&self) -> u64 {
        let major = self.major as u64;
        let minor = self.minor as u64;
        ((major & 0xffff_f000) << 32)
            | ((major & 0x0000_0fff) << 8)
            | ((minor & 0xffff_ff00) << 12)
            | (minor & 0x0000_00ff)
    }

    /// Decode from a raw dev_t using the Linux encoding
    pub fn from_raw(dev: u64) -> Self {
        let major = (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32;
        let minor = (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32;
        Self { major, minor }
    }
}

impl std::fmt::Display for Devnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl std::str::FromStr for Devnum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid devnum (expected MAJOR:MINOR): {}", s))?;
        let major = major
            .parse::<u32>()
            .map_err(|e| format!("invalid major in {}: {}", s, e))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|e| format!("invalid minor in {}: {}", s, e))?;
        Ok(Self { major, minor })
    }
}

/// Stable key correlating snapshots and events for one physical device
///
/// The kernel device path is the identity; the subsystem rides along so the
/// serialization layer can apply subsystem-specific conflict policies (e.g.
/// partition-waits-for-disk on block devices) without re-reading sysfs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub devpath: String,
    pub subsystem: Option<String>,
}

impl DeviceIdentity {
    pub fn new(devpath: impl Into<String>, subsystem: Option<String>) -> Self {
        Self {
            devpath: devpath.into(),
            subsystem,
        }
    }

    /// Whether this identity belongs to the block subsystem
    pub fn is_block(&self) -> bool {
        self.subsystem.as_deref() == Some("block")
    }

    /// Whether `self` is an ancestor of `other` in the device tree
    ///
    /// Ancestry is a devpath prefix relation at a `/` boundary; a path is
    /// not its own ancestor.
    pub fn is_ancestor_of(&self, other: &DeviceIdentity) -> bool {
        other.devpath.len() > self.devpath.len()
            && other.devpath.starts_with(&self.devpath)
            && other.devpath.as_bytes()[self.devpath.len()] == b'/'
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.devpath)
    }
}
