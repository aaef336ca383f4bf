//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the event engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for device nodes and symlinks
    pub dev_root: PathBuf,
    /// Timeout applied to every external program invocation
    pub program_timeout: Duration,
    /// Default node owner uid when no rule decides one
    pub default_owner: u32,
    /// Default node group gid when no rule decides one
    pub default_group: u32,
    /// Default node mode when no rule decides one
    pub default_mode: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            program_timeout: Duration::from_secs(30),
            default_owner: 0,
            default_group: 0,
            default_mode: 0o600,
        }
    }
}
