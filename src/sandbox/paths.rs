//! Private search path computation
//!
//! Pure path arithmetic, no filesystem access.

use std::path::{Component, Path, PathBuf};

/// Platform separator for path lists
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Compute the private search path for a set of assemblies.
///
/// Each assembly contributes the directory it lives in, relative to
/// `base_path`. The base directory itself contributes nothing. Returns
/// `None` when no extra entries are needed.
pub fn compute_private_search_path<P: AsRef<Path>>(
    base_path: &Path,
    assembly_paths: &[P],
) -> Option<String> {
    let mut dirs: Vec<String> = Vec::new();

    for assembly in assembly_paths {
        let Some(dir) = assembly.as_ref().parent() else {
            continue;
        };
        let Some(relative) = relative_to(dir, base_path) else {
            continue;
        };
        let relative = relative.to_string_lossy().into_owned();
        if relative.is_empty() || relative == "." {
            continue;
        }
        if !dirs.contains(&relative) {
            dirs.push(relative);
        }
    }

    if dirs.is_empty() {
        None
    } else {
        Some(dirs.join(&PATH_LIST_SEPARATOR.to_string()))
    }
}

/// Give `path` relative to `base`.
///
/// lib/x and base -> lib/x
/// /t/other and /t/lib -> ../other
///
/// Returns `None` when the two paths share no root (one absolute and one
/// relative, or different prefixes on Windows).
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let path = normalize(path);
    let base = normalize(base);

    if path.has_root() != base.has_root() || prefix_of(&path) != prefix_of(&base) {
        return None;
    }

    // Longest common ancestor, and the path stripped from it
    let (stripped, common) = base
        .ancestors()
        .find_map(|ancestor| path.strip_prefix(ancestor).ok().map(|s| (s, ancestor)))?;

    let levels_up = base.components().count() - common.components().count();
    let mut relative: PathBuf = std::iter::repeat("..").take(levels_up).collect();
    if !stripped.as_os_str().is_empty() {
        relative.push(stripped);
    }
    Some(relative)
}

/// Lexically drop `.` and resolve `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut ret = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !ret.pop() {
                    ret.push("..");
                }
            }
            other => ret.push(other.as_os_str()),
        }
    }
    ret
}

fn prefix_of(path: &Path) -> Option<Component<'_>> {
    match path.components().next() {
        Some(c @ Component::Prefix(_)) => Some(c),
        _ => None,
    }
}
