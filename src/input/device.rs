//! Input device resolution and access
//!
//! Devices are configured by a stable alias (a `/dev/input/by-id` or
//! `/dev/input/by-path` name, or an absolute path) rather than an
//! `eventN` node, whose number changes with enumeration order.

use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use evdev::{Device, Key};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use thiserror::Error;

use super::decoder::{EventSource, RawEvent};

/// Directories searched, in order, for a bare alias
pub const ALIAS_DIRS: [&str; 3] = ["/dev/input/by-id", "/dev/input/by-path", "/dev/input"];

/// Sleep between non-blocking reads while the device is quiet
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Number of key codes shown in device listings
const KEY_PREVIEW_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("input device {alias:?} not found")]
    NotFound { alias: String },
    #[error("permission denied opening {}", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("{} exposes no key events", path.display())]
    NotAKeyboard { path: PathBuf },
    #[error("{} is grabbed by another process", path.display())]
    Busy { path: PathBuf },
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    /// Whether waiting and resolving again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

/// Find the device node an alias refers to
pub fn locate(alias: &str) -> Option<PathBuf> {
    let dirs: Vec<&Path> = ALIAS_DIRS.iter().map(Path::new).collect();
    locate_in(alias, &dirs)
}

/// Find an alias in the given directories
///
/// An absolute alias is used as-is if it exists. Symlinks are followed by
/// the existence check, so a by-id link to a missing node counts as absent.
pub fn locate_in(alias: &str, dirs: &[&Path]) -> Option<PathBuf> {
    let alias = alias.trim();
    if alias.is_empty() {
        return None;
    }

    let path = Path::new(alias);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    dirs.iter()
        .map(|dir| dir.join(alias))
        .find(|candidate| candidate.exists())
}

/// An open, grabbed input device
///
/// Dropping the handle releases the grab and closes the device.
pub struct DeviceHandle {
    device: Device,
    path: PathBuf,
    name: String,
}

impl DeviceHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish()
    }
}

impl EventSource for DeviceHandle {
    fn read_events(&mut self, timeout: Duration) -> io::Result<Vec<RawEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.device.fetch_events() {
                Ok(events) => {
                    let batch: Vec<RawEvent> = events.map(RawEvent::from).collect();
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(IDLE_SLEEP);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        // Fails harmlessly when the device is already gone
        if let Err(e) = self.device.ungrab() {
            tracing::debug!("Ungrab of {} failed: {}", self.path.display(), e);
        }
        tracing::debug!("Released input device {}", self.path.display());
    }
}

/// Resolve an alias into an open, exclusively grabbed device
///
/// The resolver makes one attempt; retrying is the caller's decision.
pub fn resolve(alias: &str) -> Result<DeviceHandle, ResolveError> {
    let path = locate(alias).ok_or_else(|| ResolveError::NotFound {
        alias: alias.to_string(),
    })?;
    open_device(alias, &path)
}

fn open_device(alias: &str, path: &Path) -> Result<DeviceHandle, ResolveError> {
    let mut device = Device::open(path).map_err(|e| classify_open_error(alias, path, e))?;

    let has_keys = device
        .supported_keys()
        .map(|keys| keys.iter().next().is_some())
        .unwrap_or(false);
    if !has_keys {
        return Err(ResolveError::NotAKeyboard {
            path: path.to_path_buf(),
        });
    }

    set_nonblocking(&device).map_err(|errno| ResolveError::Io {
        path: path.to_path_buf(),
        source: io::Error::from(errno),
    })?;

    device.grab().map_err(|e| {
        if e.raw_os_error() == Some(Errno::EBUSY as i32) {
            ResolveError::Busy {
                path: path.to_path_buf(),
            }
        } else {
            ResolveError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let name = device.name().unwrap_or("unknown").to_string();
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    tracing::info!(
        "Opened input device {} ({}) -> {}",
        path.display(),
        name,
        target.display()
    );

    Ok(DeviceHandle {
        device,
        path: path.to_path_buf(),
        name,
    })
}

fn classify_open_error(alias: &str, path: &Path, e: io::Error) -> ResolveError {
    let vanished = [Errno::ENOENT, Errno::ENODEV, Errno::ENXIO]
        .iter()
        .any(|errno| e.raw_os_error() == Some(*errno as i32));

    if vanished || e.kind() == io::ErrorKind::NotFound {
        ResolveError::NotFound {
            alias: alias.to_string(),
        }
    } else if e.kind() == io::ErrorKind::PermissionDenied {
        ResolveError::PermissionDenied {
            path: path.to_path_buf(),
        }
    } else {
        ResolveError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

fn set_nonblocking(device: &Device) -> nix::Result<()> {
    let fd = device.as_raw_fd();
    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Symbolic name for a key code, e.g. `KEY_KP1`
pub fn key_name(code: u16) -> String {
    format!("{:?}", Key::new(code))
}

/// What `list-devices` reports about one event node
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    /// `ls -l` style mode, e.g. `crw-rw----`
    pub permissions: String,
    pub name: Option<String>,
    pub phys: Option<String>,
    pub uniq: Option<String>,
    pub has_keys: bool,
    pub key_preview: Vec<u16>,
    /// by-id / by-path links pointing at this node
    pub aliases: Vec<PathBuf>,
    /// Set when the node could not be opened
    pub error: Option<String>,
}

/// Enumerate `/dev/input/event*`, including nodes that cannot be opened
pub fn list_devices() -> io::Result<Vec<DeviceInfo>> {
    let mut paths: Vec<PathBuf> = fs::read_dir("/dev/input")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort_by_key(|p| event_number(p));

    let links = alias_links();
    Ok(paths.into_iter().map(|p| describe(p, &links)).collect())
}

fn event_number(path: &Path) -> (u32, PathBuf) {
    let n = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("event"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX);
    (n, path.to_path_buf())
}

/// (link, canonical target) for every entry in the alias directories
fn alias_links() -> Vec<(PathBuf, PathBuf)> {
    ALIAS_DIRS[..2]
        .iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(|e| e.ok()))
        .filter_map(|entry| {
            let link = entry.path();
            fs::canonicalize(&link).ok().map(|target| (link, target))
        })
        .collect()
}

fn describe(path: PathBuf, links: &[(PathBuf, PathBuf)]) -> DeviceInfo {
    let permissions = fs::metadata(&path)
        .map(|m| mode_string(&m))
        .unwrap_or_else(|_| "?".to_string());
    let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
    let aliases = links
        .iter()
        .filter(|(_, target)| *target == canonical)
        .map(|(link, _)| link.clone())
        .collect();

    let mut info = DeviceInfo {
        path,
        permissions,
        name: None,
        phys: None,
        uniq: None,
        has_keys: false,
        key_preview: Vec::new(),
        aliases,
        error: None,
    };

    match Device::open(&info.path) {
        Ok(device) => {
            info.name = device.name().map(str::to_string);
            info.phys = device.physical_path().map(str::to_string);
            info.uniq = device.unique_name().map(str::to_string);
            if let Some(keys) = device.supported_keys() {
                info.key_preview = keys.iter().take(KEY_PREVIEW_LEN).map(|k| k.code()).collect();
                info.has_keys = !info.key_preview.is_empty();
            }
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            info.error = Some(format!("Permission denied ({})", e));
        }
        Err(e) => {
            info.error = Some(format!("Error opening device: {}", e));
        }
    }
    info
}

/// Render a mode like `ls -l` does
fn mode_string(meta: &fs::Metadata) -> String {
    let ft = meta.file_type();
    let kind = if ft.is_char_device() {
        'c'
    } else if ft.is_block_device() {
        'b'
    } else if ft.is_dir() {
        'd'
    } else if ft.is_symlink() {
        'l'
    } else {
        '-'
    };

    let mode = meta.permissions().mode();
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
