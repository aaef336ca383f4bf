//! `uevd apply` - process one device event end to end
//!
//! The single-event harness: point it at a sysfs tree (real or scratch),
//! a dev root, and one or more rules directories, give it an action and a
//! devpath, and it does what the daemon would do for that one event -
//! including the devtmpfs-style node pre-creation the kernel normally
//! provides before the rule engine runs.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uevd_core::model::UeventRecord;
use uevd_core::SnapshotBuilder;
use uevd_core_types::{schema, DeviceAction};
use uevd_engine::{
    DevNodeBackend, EngineConfig, EventDisposition, EventEngine, FileNodeBackend, NodeBackend,
    NodeKind,
};
use uevd_rules::RuleDatabase;

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Uevent action (add, remove, change, online, offline, move)
    #[arg(long)]
    pub action: DeviceActionArg,

    /// Kernel device path, e.g. /devices/pci0000:00/.../block/sda
    #[arg(long)]
    pub devpath: String,

    /// Sysfs root to read the device from
    #[arg(long, default_value = "/sys")]
    pub sysfs: PathBuf,

    /// Dev root to write nodes and symlinks under
    #[arg(long, default_value = "/dev")]
    pub dev: PathBuf,

    /// Rules directory, highest priority first (repeatable)
    #[arg(long = "rules", required = true)]
    pub rules: Vec<PathBuf>,

    /// Extra KEY=VALUE uevent properties (repeatable)
    #[arg(long = "property")]
    pub properties: Vec<String>,

    /// Per-program timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Represent nodes as plain files instead of mknod (no privileges
    /// needed; useful for dry runs)
    #[arg(long)]
    pub fake_nodes: bool,
}

/// Clap-friendly wrapper so `--action add` parses directly
#[derive(Debug, Clone)]
pub struct DeviceActionArg(pub DeviceAction);

impl std::str::FromStr for DeviceActionArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<DeviceAction>().map(DeviceActionArg)
    }
}

pub async fn execute(args: ApplyArgs) -> Result<(), String> {
    let action = args.action.0;

    let mut record = UeventRecord::new(action, args.devpath.clone());
    for property in &args.properties {
        let (key, value) = property
            .split_once('=')
            .ok_or_else(|| format!("property must be KEY=VALUE: {}", property))?;
        record = record.with_property(key, value);
    }

    let builder = SnapshotBuilder::new(&args.sysfs);
    let snapshot = builder.build(&record).map_err(|e| e.to_string())?;

    let db = Arc::new(RuleDatabase::load(&args.rules).map_err(|e| e.to_string())?);
    let backend: Arc<dyn NodeBackend> = if args.fake_nodes {
        Arc::new(FileNodeBackend::new())
    } else {
        Arc::new(DevNodeBackend)
    };
    let config = EngineConfig {
        dev_root: args.dev.clone(),
        program_timeout: Duration::from_secs(args.timeout_secs),
        ..EngineConfig::default()
    };

    // Do what devtmpfs usually provides: the default-name node exists
    // before the rule engine runs
    if action != DeviceAction::Remove {
        if let Some(devnum) = snapshot.devnum() {
            let kind = if snapshot.subsystem() == Some("block") {
                NodeKind::Block
            } else {
                NodeKind::Char
            };
            let default_name = snapshot
                .properties()
                .get(schema::PROP_DEVNAME)
                .map(|n| n.trim_start_matches("/dev/"))
                .unwrap_or_else(|| snapshot.sysname());
            let node_path = args.dev.join(default_name);
            if let Some(parent) = node_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            if backend.devnum_of(&node_path).map_err(|e| e.to_string())?.is_none() {
                backend
                    .create_node(&node_path, kind, devnum)
                    .map_err(|e| e.to_string())?;
            }
        }
    }

    let engine = EventEngine::new(db, config, backend);
    let result = engine.process(snapshot).await;

    println!("event {}: {:?}", result.event_id, result.disposition);
    for outcome in &result.program_outcomes {
        println!(
            "  program '{}': status {:?}{}",
            outcome.command,
            outcome.status,
            if outcome.timed_out { " (timed out)" } else { "" }
        );
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }

    match result.disposition {
        EventDisposition::Failed(reason) => Err(format!("event failed: {:?}", reason)),
        _ => Ok(()),
    }
}
