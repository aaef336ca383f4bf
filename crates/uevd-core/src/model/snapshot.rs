use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use uevd_core_types::{DeviceAction, DeviceIdentity, Devnum};

use super::PropertyMap;
use crate::errors::{CoreError, Result};

/// Immutable per-event view of one device
///
/// Built once per event from the uevent payload plus sysfs reads, then owned
/// exclusively by the engine invocation processing that event. All accessors
/// take `&self`; nothing mutates a snapshot after construction.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    devpath: String,
    sysname: String,
    subsystem: Option<String>,
    devtype: Option<String>,
    driver: Option<String>,
    devnum: Option<Devnum>,
    action: DeviceAction,
    properties: PropertyMap,
    ancestors: Vec<AncestorSnapshot>,
    observed_at: DateTime<Utc>,
    sysfs_dir: Option<PathBuf>,
}

impl DeviceSnapshot {
    /// Assemble a snapshot from resolved parts
    ///
    /// Callers normally go through [`crate::sysfs::SnapshotBuilder`]; this
    /// constructor is the single place the invariants are set up (sysname
    /// derived from the devpath, observation timestamp taken once).
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        devpath: String,
        subsystem: Option<String>,
        devtype: Option<String>,
        driver: Option<String>,
        devnum: Option<Devnum>,
        action: DeviceAction,
        properties: PropertyMap,
        ancestors: Vec<AncestorSnapshot>,
        sysfs_dir: Option<PathBuf>,
    ) -> Self {
        let sysname = devpath.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            devpath,
            sysname,
            subsystem,
            devtype,
            driver,
            devnum,
            action,
            properties,
            ancestors,
            observed_at: Utc::now(),
            sysfs_dir,
        }
    }

    /// Kernel device path, e.g. `/devices/pci0000:00/.../block/sda`
    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    /// Last devpath component (the kernel name, e.g. `sda`)
    pub fn sysname(&self) -> &str {
        &self.sysname
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }

    pub fn devtype(&self) -> Option<&str> {
        self.devtype.as_deref()
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn devnum(&self) -> Option<Devnum> {
        self.devnum
    }

    pub fn action(&self) -> DeviceAction {
        self.action
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Ancestor devices, nearest parent first
    pub fn ancestors(&self) -> &[AncestorSnapshot] {
        &self.ancestors
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// The stable identity used by the serialization layer
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.devpath.clone(), self.subsystem.clone())
    }

    /// Read a sysfs attribute of this device, trailing newline trimmed
    ///
    /// Returns `Ok(None)` when the attribute does not exist. Attribute names
    /// must be plain file names; path traversal is rejected.
    pub fn attribute(&self, name: &str) -> Result<Option<String>> {
        let Some(dir) = &self.sysfs_dir else {
            return Ok(None);
        };
        read_attribute(dir, &self.devpath, name)
    }
}

/// One ancestor in a device's parent chain
///
/// Carries enough identity to evaluate the ancestor-walking selectors
/// (KERNELS/SUBSYSTEMS/DRIVERS/ATTRS) without re-walking sysfs.
#[derive(Debug, Clone)]
pub struct AncestorSnapshot {
    devpath: String,
    sysname: String,
    subsystem: Option<String>,
    driver: Option<String>,
    sysfs_dir: Option<PathBuf>,
}

impl AncestorSnapshot {
    pub fn new(
        devpath: String,
        subsystem: Option<String>,
        driver: Option<String>,
        sysfs_dir: Option<PathBuf>,
    ) -> Self {
        let sysname = devpath.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            devpath,
            sysname,
            subsystem,
            driver,
            sysfs_dir,
        }
    }

    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    pub fn sysname(&self) -> &str {
        &self.sysname
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Read a sysfs attribute of this ancestor, trailing newline trimmed
    pub fn attribute(&self, name: &str) -> Result<Option<String>> {
        let Some(dir) = &self.sysfs_dir else {
            return Ok(None);
        };
        read_attribute(dir, &self.devpath, name)
    }
}

fn read_attribute(dir: &Path, devpath: &str, name: &str) -> Result<Option<String>> {
    if name.contains('/') || name == "." || name == ".." {
        return Err(CoreError::AttributeUnreadable {
            devpath: devpath.to_string(),
            attribute: name.to_string(),
            message: "attribute names must not contain path separators".to_string(),
        });
    }
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(
            content.strip_suffix('\n').unwrap_or(&content).to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::AttributeUnreadable {
            devpath: devpath.to_string(),
            attribute: name.to_string(),
            message: e.to_string(),
        }),
    }
}
