//! Shared harness for engine integration tests
//!
//! Builds a scratch sysfs tree (disk + partition + serial ports), a scratch
//! dev root, and a rule database from inline text, wired to the
//! unprivileged FileNodeBackend so everything runs without root.

use std::fs;
use std::os::unix::fs::symlink;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use uevd_core::model::UeventRecord;
use uevd_core::{DeviceSnapshot, SnapshotBuilder};
use uevd_core_types::{DeviceAction, Devnum};
use uevd_engine::{EngineConfig, EventEngine, FileNodeBackend, NodeBackend};
use uevd_rules::RuleDatabase;

#[allow(dead_code)]
pub const DISK_DEVPATH: &str = "/devices/pci0/block/sda";
#[allow(dead_code)]
pub const PART_DEVPATH: &str = "/devices/pci0/block/sda/sda1";
#[allow(dead_code)]
pub const TTY0_DEVPATH: &str = "/devices/pci0/tty/ttyS0";
#[allow(dead_code)]
pub const TTY1_DEVPATH: &str = "/devices/pci0/tty/ttyS1";

pub struct Harness {
    pub sysfs: TempDir,
    pub dev: TempDir,
    pub rules: TempDir,
    pub backend: Arc<FileNodeBackend>,
}

impl Harness {
    /// Harness with one rule file containing `rules_text`
    pub fn new(rules_text: &str) -> Self {
        let sysfs = TempDir::new().unwrap();
        populate_sysfs(&sysfs);

        let rules = TempDir::new().unwrap();
        fs::write(rules.path().join("50-test.rules"), rules_text).unwrap();

        Self {
            sysfs,
            dev: TempDir::new().unwrap(),
            rules,
            backend: Arc::new(FileNodeBackend::new()),
        }
    }

    /// Engine over this harness's trees with the default 5s program timeout
    #[allow(dead_code)]
    pub fn engine(&self) -> EventEngine {
        self.engine_with_timeout(Duration::from_secs(5))
    }

    #[allow(dead_code)]
    pub fn engine_with_timeout(&self, program_timeout: Duration) -> EventEngine {
        let db = Arc::new(RuleDatabase::load(&[self.rules.path().to_path_buf()]).unwrap());
        let config = EngineConfig {
            dev_root: self.dev.path().to_path_buf(),
            program_timeout,
            ..EngineConfig::default()
        };
        let backend: Arc<dyn NodeBackend> = self.backend.clone();
        EventEngine::new(db, config, backend)
    }

    /// Snapshot for a device in the scratch sysfs tree
    pub fn snapshot(
        &self,
        action: DeviceAction,
        devpath: &str,
        devnum: Option<Devnum>,
    ) -> DeviceSnapshot {
        let mut record = UeventRecord::new(action, devpath);
        if let Some(devnum) = devnum {
            record = record
                .with_property("MAJOR", devnum.major.to_string())
                .with_property("MINOR", devnum.minor.to_string());
        }
        SnapshotBuilder::new(self.sysfs.path()).build(&record).unwrap()
    }

    /// Path under the scratch dev root
    pub fn dev_path(&self, name: &str) -> std::path::PathBuf {
        self.dev.path().join(name)
    }
}

fn populate_sysfs(sysfs: &TempDir) {
    let class_block = sysfs.path().join("class/block");
    let class_tty = sysfs.path().join("class/tty");
    fs::create_dir_all(&class_block).unwrap();
    fs::create_dir_all(&class_tty).unwrap();

    let devices = [
        ("devices/pci0", None),
        ("devices/pci0/block", None),
        ("devices/pci0/block/sda", Some(&class_block)),
        ("devices/pci0/block/sda/sda1", Some(&class_block)),
        ("devices/pci0/tty", None),
        ("devices/pci0/tty/ttyS0", Some(&class_tty)),
        ("devices/pci0/tty/ttyS1", Some(&class_tty)),
    ];
    for (devpath, subsystem) in devices {
        let dir = sysfs.path().join(devpath);
        fs::create_dir_all(&dir).unwrap();
        if let Some(class_dir) = subsystem {
            fs::write(dir.join("uevent"), "").unwrap();
            symlink(class_dir, dir.join("subsystem")).unwrap();
        }
    }
    // The PCI parent is a device too, with an attribute for ATTRS tests
    let pci = sysfs.path().join("devices/pci0");
    fs::write(pci.join("uevent"), "").unwrap();
    fs::write(pci.join("vendor"), "0x8086\n").unwrap();
    fs::write(
        sysfs.path().join("devices/pci0/block/sda/size"),
        "976773168\n",
    )
    .unwrap();
}
