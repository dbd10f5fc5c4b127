//! Shadow copy cache directories
//!
//! Every copy-on-load sandbox gets its own directory under the cache root.
//! Allocation must be unique and start clean; deletion is best-effort and
//! never fails the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::core::error::{Result, SandboxError};

/// Cache root used when no override is configured, relative to the temp dir
const DEFAULT_CACHE_DIR: [&str; 2] = ["nunit20", "ShadowCopyCache"];

/// Per-process sequence for cache tokens
static CACHE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Resolve the cache root from the `shadowfiles.path` override.
///
/// Empty or missing falls back to `<temp>/nunit20/ShadowCopyCache`.
pub fn resolve_cache_root(override_path: Option<&str>) -> PathBuf {
    match override_path {
        Some(path) if !path.trim().is_empty() => PathBuf::from(expand_env_vars(path)),
        _ => DEFAULT_CACHE_DIR
            .iter()
            .fold(std::env::temp_dir(), |dir, part| dir.join(part)),
    }
}

/// Expand `%VAR%`, `${VAR}` and `$VAR` references.
///
/// Unknown variables are left as written.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(idx) = rest.find(|c: char| c == '%' || c == '$') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        match parse_reference(tail) {
            Some((name, consumed)) => {
                match std::env::var(name) {
                    Ok(expanded) => out.push_str(&expanded),
                    Err(_) => out.push_str(&tail[..consumed]),
                }
                rest = &tail[consumed..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse a variable reference at the start of `s`, returning the name and
/// the number of bytes the reference spans.
fn parse_reference(s: &str) -> Option<(&str, usize)> {
    if let Some(body) = s.strip_prefix('%') {
        let end = body.find('%')?;
        let name = &body[..end];
        return (!name.is_empty()).then_some((name, end + 2));
    }

    let body = s.strip_prefix('$')?;
    if let Some(braced) = body.strip_prefix('{') {
        let end = braced.find('}')?;
        let name = &braced[..end];
        return (!name.is_empty()).then_some((name, end + 3));
    }

    let len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    (len > 0).then(|| (&body[..len], len + 1))
}

/// Next uniqueness token: nanosecond clock, process id and a sequence number.
///
/// The clock alone repeats under rapid successive calls; the sequence does not.
pub fn next_cache_token() -> String {
    let sequence = CACHE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let ticks = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{}-{}-{}", ticks, std::process::id(), sequence)
}

/// Allocate a fresh cache directory under `root`
pub fn allocate_cache_path(root: &Path) -> Result<PathBuf> {
    allocate_cache_path_with_token(root, &next_cache_token())
}

/// Allocate `root/token`, removing whatever stale entry occupies it.
///
/// The directory is created empty; the caller owns it until teardown.
pub fn allocate_cache_path_with_token(root: &Path, token: &str) -> Result<PathBuf> {
    let path = root.join(token);

    prepare_cache_dir(&path).map_err(|source| SandboxError::CacheAllocation {
        path: path.clone(),
        source,
    })?;

    debug!("Allocated cache directory {}", path.display());
    Ok(path)
}

fn prepare_cache_dir(path: &Path) -> io::Result<()> {
    match fs_err::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            warn!("Removing stale cache directory {}", path.display());
            if let Err(err) = fs_err::remove_dir_all(path) {
                // Read-only entries block remove_dir_all; retry the slow way.
                delete_tree(path);
                if path.exists() {
                    return Err(err);
                }
            }
        }
        Ok(_) => fs_err::remove_file(path)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    if let Some(root) = path.parent() {
        fs_err::create_dir_all(root)?;
    }
    // create_dir, not create_dir_all: a concurrent allocation of the same
    // path must fail here.
    fs_err::create_dir(path)
}

/// Summary of a best-effort tree deletion
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: u64,
    pub dirs_removed: u64,
    /// Entries that could not be listed or removed
    pub failures: u64,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Recursively delete `path`, continuing past entries that cannot be removed.
///
/// Subdirectories go first, then files, then the directory itself. Read-only
/// flags are cleared before each removal. Failures are logged and counted,
/// never returned. Symlinks are removed, not followed.
pub fn delete_tree(path: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    match fs_err::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => delete_dir(path, &mut report),
        Ok(_) => delete_file(path, false, &mut report),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!("Error inspecting {}: {}", path.display(), err);
            report.failures += 1;
        }
    }

    report
}

fn delete_dir(dir: &Path, report: &mut CleanupReport) {
    // Children of a read-only directory cannot be unlinked on Unix.
    clear_readonly(dir, true);

    let mut subdirs = Vec::new();
    let mut files = Vec::new();

    match fs_err::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(entry) => match entry.file_type() {
                        Ok(file_type) if file_type.is_dir() => subdirs.push(entry.path()),
                        Ok(file_type) => files.push((entry.path(), file_type.is_symlink())),
                        Err(err) => {
                            warn!("Error inspecting {}: {}", entry.path().display(), err);
                            report.failures += 1;
                        }
                    },
                    Err(err) => {
                        warn!("Error listing {}: {}", dir.display(), err);
                        report.failures += 1;
                    }
                }
            }
        }
        Err(err) => {
            warn!("Error listing {}: {}", dir.display(), err);
            report.failures += 1;
        }
    }

    for subdir in subdirs {
        delete_dir(&subdir, report);
    }

    for (file, is_symlink) in files {
        delete_file(&file, is_symlink, report);
    }

    clear_readonly(dir, true);
    match fs_err::remove_dir(dir) {
        Ok(()) => report.dirs_removed += 1,
        Err(err) => {
            warn!("Error deleting {}: {}", dir.display(), err);
            report.failures += 1;
        }
    }
}

fn delete_file(file: &Path, is_symlink: bool, report: &mut CleanupReport) {
    // Permissions on a symlink would apply to its target.
    if !is_symlink {
        clear_readonly(file, false);
    }

    match fs_err::remove_file(file) {
        Ok(()) => report.files_removed += 1,
        Err(err) => {
            warn!("Error deleting {}: {}", file.display(), err);
            report.failures += 1;
        }
    }
}

/// Make `path` writable by its owner. Failures are only logged.
fn clear_readonly(path: &Path, is_dir: bool) {
    let metadata = match fs_err::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("Cannot read permissions of {}: {}", path.display(), err);
            return;
        }
    };
    let mut perms = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let wanted = if is_dir { 0o700 } else { 0o200 };
        if perms.mode() & wanted == wanted {
            return;
        }
        perms.set_mode(perms.mode() | wanted);
    }

    #[cfg(not(unix))]
    {
        let _ = is_dir;
        if !perms.readonly() {
            return;
        }
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }

    if let Err(err) = fs_err::set_permissions(path, perms) {
        debug!("Cannot clear read-only flag on {}: {}", path.display(), err);
    }
}
