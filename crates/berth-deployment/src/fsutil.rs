//! File-system helpers
//!
//! Modification times are milliseconds since the epoch. A missing or
//! unreadable file reports [`SENTINEL_MTIME`], the same value stored for
//! resources that do not exist yet.

use berth_types::SENTINEL_MTIME;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Modification time, `None` when the path does not exist
pub fn modified_millis(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(to_millis(modified))
}

/// Modification time, [`SENTINEL_MTIME`] when the path does not exist
pub fn last_modified(path: &Path) -> u64 {
    modified_millis(path).unwrap_or(SENTINEL_MTIME)
}

pub fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(SENTINEL_MTIME)
}

pub fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

pub fn now_millis() -> u64 {
    to_millis(SystemTime::now())
}

/// Set the modification time of a regular file
pub fn set_modified_millis(path: &Path, millis: u64) -> io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(from_millis(millis))
}

/// Delete a file or directory tree; a missing path is not an error
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Canonical form when the path exists, the absolute path otherwise
pub fn canonical_or_absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `path` with `.<extension>` appended to its last component
pub fn with_suffix(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Whether `name` is exactly one ordinary path component
pub fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reports_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.war");
        assert_eq!(modified_millis(&missing), None);
        assert_eq!(last_modified(&missing), SENTINEL_MTIME);
    }

    #[test]
    fn test_set_modified() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shop.war");
        fs::write(&file, b"x").unwrap();

        set_modified_millis(&file, 1_600_000_000_000).unwrap();
        assert_eq!(last_modified(&file), 1_600_000_000_000);
    }

    #[test]
    fn test_remove_path() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("shop");
        fs::create_dir_all(tree.join("WEB-INF")).unwrap();
        fs::write(tree.join("WEB-INF/web.xml"), b"<web/>").unwrap();

        remove_path(&tree).unwrap();
        assert!(!tree.exists());
        remove_path(&tree).unwrap();
    }

    #[test]
    fn test_with_suffix_and_components() {
        assert_eq!(
            with_suffix(Path::new("/apps/shop"), "war"),
            PathBuf::from("/apps/shop.war")
        );
        assert!(is_single_component("shop##2"));
        assert!(!is_single_component(".."));
        assert!(!is_single_component("."));
        assert!(!is_single_component("a/b"));
    }
}
