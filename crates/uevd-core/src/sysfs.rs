//! Snapshot construction from sysfs
//!
//! The builder turns a UeventRecord into a DeviceSnapshot by resolving the
//! device's sysfs directory, reading the subsystem/driver links, and walking
//! the devpath upwards to collect the ancestor chain. The sysfs root is a
//! parameter so a test harness can point it at a scratch tree.

use std::path::{Path, PathBuf};
use tracing::debug;
use uevd_core_types::schema;

use crate::errors::{CoreError, Result};
use crate::model::{AncestorSnapshot, DeviceSnapshot, PropertyMap, UeventRecord};

/// Builds immutable DeviceSnapshots from uevent records plus sysfs reads
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    sysfs_root: PathBuf,
}

impl SnapshotBuilder {
    /// Create a builder reading from the given sysfs root (normally `/sys`)
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    /// Build the snapshot for one event
    ///
    /// # Errors
    /// * `InvalidRecord` - the record fails structural validation
    /// * `UnknownDevice` - the devpath has no sysfs directory (except for
    ///   remove events, where the kernel has already torn the directory down)
    pub fn build(&self, record: &UeventRecord) -> Result<DeviceSnapshot> {
        record.validate()?;

        let device_dir = self.device_dir(&record.devpath);
        let dir_exists = device_dir.is_dir();
        if !dir_exists && record.action != uevd_core_types::DeviceAction::Remove {
            return Err(CoreError::UnknownDevice {
                devpath: record.devpath.clone(),
            });
        }

        let subsystem = record
            .subsystem
            .clone()
            .or_else(|| record.properties.get(schema::PROP_SUBSYSTEM).map(String::from))
            .or_else(|| link_basename(&device_dir.join("subsystem")));
        let driver = record
            .properties
            .get(schema::PROP_DRIVER)
            .map(String::from)
            .or_else(|| link_basename(&device_dir.join("driver")));
        let devtype = record.properties.get(schema::PROP_DEVTYPE).map(String::from);
        let devnum = record.effective_devnum();

        let properties = self.seed_properties(record, subsystem.as_deref(), devnum);
        let ancestors = self.collect_ancestors(&record.devpath);

        debug!(
            devpath = %record.devpath,
            subsystem = subsystem.as_deref().unwrap_or("-"),
            ancestors = ancestors.len(),
            "snapshot built"
        );

        Ok(DeviceSnapshot::assemble(
            record.devpath.clone(),
            subsystem,
            devtype,
            driver,
            devnum,
            record.action,
            properties,
            ancestors,
            dir_exists.then_some(device_dir),
        ))
    }

    /// Canonical properties are always present, in a fixed leading order,
    /// followed by the receiver's remaining properties in emission order.
    fn seed_properties(
        &self,
        record: &UeventRecord,
        subsystem: Option<&str>,
        devnum: Option<uevd_core_types::Devnum>,
    ) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.set(schema::PROP_ACTION, record.action.as_str());
        properties.set(schema::PROP_DEVPATH, record.devpath.clone());
        if let Some(subsystem) = subsystem {
            properties.set(schema::PROP_SUBSYSTEM, subsystem);
        }
        if let Some(devnum) = devnum {
            properties.set(schema::PROP_MAJOR, devnum.major.to_string());
            properties.set(schema::PROP_MINOR, devnum.minor.to_string());
        }
        for (key, value) in record.properties.iter() {
            properties.set(key, value);
        }
        properties
    }

    /// Walk the devpath upwards collecting every parent that is itself a
    /// device (has a `uevent` file), nearest parent first.
    fn collect_ancestors(&self, devpath: &str) -> Vec<AncestorSnapshot> {
        let mut ancestors = Vec::new();
        let mut current = devpath;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            if current.is_empty() || current == "/devices" {
                break;
            }
            let dir = self.device_dir(current);
            if !dir.join("uevent").is_file() {
                continue;
            }
            let subsystem = link_basename(&dir.join("subsystem"));
            let driver = link_basename(&dir.join("driver"));
            ancestors.push(AncestorSnapshot::new(
                current.to_string(),
                subsystem,
                driver,
                Some(dir),
            ));
        }
        ancestors
    }

    fn device_dir(&self, devpath: &str) -> PathBuf {
        self.sysfs_root.join(devpath.trim_start_matches('/'))
    }
}

/// Basename of a symlink target, if the path is a readable link
fn link_basename(path: &Path) -> Option<String> {
    let target = std::fs::read_link(path).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
