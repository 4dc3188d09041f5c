//! # File Set Handling
//!
//! Logical file entries, recursive directory expansion and the safe-join
//! check applied to every peer-supplied filename on the receiving side.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};

// ============================================================================
// FILE ENTRIES
// ============================================================================

/// A logical unit offered for transfer.
///
/// `name` is the forward-slash relative path presented on the wire, unique
/// within a session. Directory entries are expanded into leaf entries at
/// session start, so everything downstream only ever sees regular files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Forward-slash relative name, unique within the session.
    pub name: String,
    /// Byte size, snapshotted when the entry is built.
    pub size: u64,
    /// Absolute source path (sender side only).
    pub path: PathBuf,
    /// Whether the original selection was a directory.
    pub is_folder: bool,
}

impl FileEntry {
    /// Build an entry for a single regular file, named by its file name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .ok_or_else(|| Error::Io(format!("no file name in {}", path.display())))?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            name,
            size: meta.len(),
            path: path.to_path_buf(),
            is_folder: false,
        })
    }
}

/// Enumerate every regular file beneath `root`, depth-first, lexicographic
/// within each directory. Symbolic links are not followed. Unreadable
/// entries are skipped with a warning rather than aborting the walk.
pub fn enumerate_leaves(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() => Some(e.into_path()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .collect()
}

/// Expand a user selection (files and directories) into the flat, ordered
/// leaf set a session works with. Directory contents are named by their
/// directory-relative path, forward-slash normalized.
pub fn expand_entries(paths: &[PathBuf]) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path)?;
        if meta.is_file() {
            entries.push(FileEntry::from_file(path)?);
        } else if meta.is_dir() {
            for leaf in enumerate_leaves(path) {
                let rel = leaf
                    .strip_prefix(path)
                    .map_err(|_| Error::Io(format!("walk escaped {}", path.display())))?;
                let size = std::fs::metadata(&leaf)?.len();
                entries.push(FileEntry {
                    name: to_wire_name(rel),
                    size,
                    path: leaf,
                    is_folder: true,
                });
            }
        }
    }
    Ok(entries)
}

/// Sum of entry sizes.
pub fn total_size(entries: &[FileEntry]) -> u64 {
    entries.iter().map(|e| e.size).sum()
}

fn to_wire_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// PATH SAFETY
// ============================================================================

/// Join `relative` onto `base` iff the result stays under `base`.
///
/// The check is lexical — absolute paths, drive prefixes and any `..` that
/// would climb above `base` are rejected — so it works for targets that do
/// not exist yet. Returns the joined path on success.
pub fn is_safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut depth: usize = 0;
    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                clean.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                clean.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if depth == 0 {
        return None;
    }
    Some(base.join(clean))
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Human-readable byte count, e.g. `1.23 GB`.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}

/// Human-readable transfer rate, e.g. `15.30 MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64))
}

/// Human-readable remaining time, e.g. `2m 35s`.
pub fn format_eta(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_safe_join_accepts_nested() {
        let base = Path::new("/tmp/save");
        let joined = is_safe_join(base, "docs/report.pdf").unwrap();
        assert_eq!(joined, Path::new("/tmp/save/docs/report.pdf"));
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let base = Path::new("/tmp/save");
        assert!(is_safe_join(base, "../../etc/passwd").is_none());
        assert!(is_safe_join(base, "docs/../../../etc/passwd").is_none());
        assert!(is_safe_join(base, "/etc/passwd").is_none());
        assert!(is_safe_join(base, "").is_none());
        assert!(is_safe_join(base, "..").is_none());
    }

    #[test]
    fn test_safe_join_normalizes_internal_dots() {
        let base = Path::new("/tmp/save");
        let joined = is_safe_join(base, "a/./b/../c.txt").unwrap();
        assert_eq!(joined, Path::new("/tmp/save/a/c.txt"));
    }

    #[test]
    fn test_enumerate_leaves_sorted_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), b"c").unwrap();

        let leaves = enumerate_leaves(dir.path());
        let names: Vec<_> = leaves
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_expand_entries_mixed_selection() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.bin");
        fs::write(&single, vec![0u8; 10]).unwrap();
        let folder = dir.path().join("folder");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("inner.txt"), b"hello").unwrap();

        let entries = expand_entries(&[single.clone(), folder.clone()]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "single.bin");
        assert_eq!(entries[0].size, 10);
        assert!(!entries[0].is_folder);
        assert_eq!(entries[1].name, "inner.txt");
        assert_eq!(entries[1].size, 5);
        assert!(entries[1].is_folder);
        assert_eq!(total_size(&entries), 15);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(42), "42s");
        assert_eq!(format_eta(155), "2m 35s");
        assert_eq!(format_eta(3900), "1h 5m");
    }
}
