//! Device node and symlink maintenance
//!
//! All device-node syscalls go through the [`NodeBackend`] seam:
//! [`DevNodeBackend`] issues real mknod/chown/chmod calls, while
//! [`FileNodeBackend`] represents nodes as regular files recording their
//! devnum so the engine is fully testable without privileges. Symlink
//! maintenance is shared std-fs code above the seam; links are replaced
//! via temp-name + rename so readers never observe a missing link.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use uevd_core_types::Devnum;

use crate::errors::{action_error, EngineError, Result};

/// Device node flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Block,
    Char,
}

/// Seam for device-node syscalls
///
/// The engine never calls mknod and friends directly; it talks to this
/// trait so tests and the dry-run harness can substitute an unprivileged
/// backend.
pub trait NodeBackend: Send + Sync {
    /// Create a device node; the parent directory already exists
    fn create_node(&self, path: &Path, kind: NodeKind, devnum: Devnum) -> Result<()>;

    /// Devnum of an existing node, `None` when the path is absent or not a
    /// device node
    fn devnum_of(&self, path: &Path) -> Result<Option<Devnum>>;

    /// Remove a node
    fn remove_node(&self, path: &Path) -> Result<()>;

    /// Apply owner, group, and mode
    fn set_ownership(&self, path: &Path, owner: u32, group: u32, mode: u32) -> Result<()>;

    /// Resolve a user name to a uid
    fn lookup_user(&self, _name: &str) -> Option<u32> {
        None
    }

    /// Resolve a group name to a gid
    fn lookup_group(&self, _name: &str) -> Option<u32> {
        None
    }
}

// ===== Production backend =====

/// NodeBackend issuing real device-node syscalls
#[derive(Debug, Default)]
pub struct DevNodeBackend;

impl NodeBackend for DevNodeBackend {
    fn create_node(&self, path: &Path, kind: NodeKind, devnum: Devnum) -> Result<()> {
        let cpath = cstring(path)?;
        let mode = match kind {
            NodeKind::Block => libc::S_IFBLK,
            NodeKind::Char => libc::S_IFCHR,
        } | 0o600;
        let rc = unsafe { libc::mknod(cpath.as_ptr(), mode, devnum.to_raw() as libc::dev_t) };
        if rc != 0 {
            return Err(action_error(path, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn devnum_of(&self, path: &Path) -> Result<Option<Devnum>> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => {
                let ft = meta.file_type();
                if ft.is_block_device() || ft.is_char_device() {
                    Ok(Some(Devnum::from_raw(meta.rdev())))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(action_error(path, e)),
        }
    }

    fn remove_node(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| action_error(path, e))
    }

    fn set_ownership(&self, path: &Path, owner: u32, group: u32, mode: u32) -> Result<()> {
        let cpath = cstring(path)?;
        let rc = unsafe { libc::chown(cpath.as_ptr(), owner, group) };
        if rc != 0 {
            return Err(action_error(path, std::io::Error::last_os_error()));
        }
        let rc = unsafe { libc::chmod(cpath.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(action_error(path, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn lookup_user(&self, name: &str) -> Option<u32> {
        let cname = CString::new(name).ok()?;
        let pw = unsafe { libc::getpwnam(cname.as_ptr()) };
        if pw.is_null() {
            return None;
        }
        Some(unsafe { (*pw).pw_uid })
    }

    fn lookup_group(&self, name: &str) -> Option<u32> {
        let cname = CString::new(name).ok()?;
        let gr = unsafe { libc::getgrnam(cname.as_ptr()) };
        if gr.is_null() {
            return None;
        }
        Some(unsafe { (*gr).gr_gid })
    }
}

fn cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| EngineError::Internal {
        message: format!("path contains NUL: {}", path.display()),
    })
}

// ===== Unprivileged backend =====

/// NodeBackend representing nodes as regular files
///
/// A node is a file whose content is `b MAJOR:MINOR` or `c MAJOR:MINOR`;
/// ownership decisions are recorded in memory for assertions. Used by the
/// test suites and the harness's dry-run mode.
#[derive(Debug, Default)]
pub struct FileNodeBackend {
    ownership: Mutex<HashMap<PathBuf, (u32, u32, u32)>>,
}

impl FileNodeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded (owner, group, mode) of a node, for assertions
    pub fn ownership_of(&self, path: &Path) -> Option<(u32, u32, u32)> {
        self.ownership.lock().unwrap().get(path).copied()
    }
}

impl NodeBackend for FileNodeBackend {
    fn create_node(&self, path: &Path, kind: NodeKind, devnum: Devnum) -> Result<()> {
        let tag = match kind {
            NodeKind::Block => 'b',
            NodeKind::Char => 'c',
        };
        std::fs::write(path, format!("{} {}\n", tag, devnum)).map_err(|e| action_error(path, e))
    }

    fn devnum_of(&self, path: &Path) -> Result<Option<Devnum>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(action_error(path, e)),
        };
        let devnum = content
            .trim()
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok());
        Ok(devnum)
    }

    fn remove_node(&self, path: &Path) -> Result<()> {
        self.ownership.lock().unwrap().remove(path);
        std::fs::remove_file(path).map_err(|e| action_error(path, e))
    }

    fn set_ownership(&self, path: &Path, owner: u32, group: u32, mode: u32) -> Result<()> {
        self.ownership
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), (owner, group, mode));
        Ok(())
    }
}

// ===== Shared symlink and path maintenance =====

/// Encode one node or symlink name for the filesystem
///
/// Whitespace becomes `_`; bytes outside the safe set are hex-escaped as
/// `\xXX`. Path separators are preserved so convention-directory names
/// like `disk/by-id/...` pass through.
pub fn encode_devnode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || "#+-.:=@_/".contains(c) {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("\\x{:02x}", byte));
            }
        }
    }
    out
}

/// Create or refresh a symlink so it points at `target`
///
/// Idempotent: a link already pointing at the target is left untouched.
/// Replacement goes through a temp name and rename so the link never
/// disappears from readers.
pub fn install_symlink(link: &Path, target: &Path) -> Result<()> {
    if let Ok(existing) = std::fs::read_link(link) {
        if existing == target {
            return Ok(());
        }
    }
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(|e| action_error(link, e))?;
    }
    let file_name = link
        .file_name()
        .ok_or_else(|| action_error(link, "symlink path has no file name"))?;
    let tmp = link.with_file_name(format!(".#{}.tmp", file_name.to_string_lossy()));
    let _ = std::fs::remove_file(&tmp);
    std::os::unix::fs::symlink(target, &tmp).map_err(|e| action_error(link, e))?;
    std::fs::rename(&tmp, link).map_err(|e| action_error(link, e))?;
    debug!(link = %link.display(), target = %target.display(), "symlink installed");
    Ok(())
}

/// Remove a symlink only when it points at `target`
///
/// Returns whether a link was removed. A link pointing elsewhere belongs
/// to another device and is left alone.
pub fn remove_symlink_if_points(link: &Path, target: &Path) -> Result<bool> {
    match std::fs::read_link(link) {
        Ok(existing) if existing == target => {
            std::fs::remove_file(link).map_err(|e| action_error(link, e))?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(action_error(link, e)),
    }
}

/// Remove now-empty parent directories up to (not including) `stop`
///
/// Convention directories are created on demand, so they are deleted on
/// demand too. Failures are ignored; a non-empty directory simply stays.
pub fn remove_empty_parents(path: &Path, stop: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
