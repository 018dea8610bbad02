//! Packaged archives
//!
//! Archives are tar streams, optionally gzip-compressed. Expansion writes a
//! tracker file whose modification time mirrors the archive's, so a later
//! expansion can tell whether the archive changed while nothing watched it.

use crate::error::{DeployError, Result};
use crate::fsutil::{last_modified, remove_path, set_modified_millis};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Tracker file inside an expanded directory
pub const EXPANSION_TRACKER: &str = "META-INF/war-tracker";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read access to packaged archives
pub trait ArchiveReader: Send + Sync {
    /// Names of all regular entries, `/`-separated and relative
    fn entries(&self, archive: &Path) -> Result<Vec<String>>;

    fn contains_entry(&self, archive: &Path, entry: &str) -> Result<bool> {
        Ok(self.entries(archive)?.iter().any(|name| name == entry))
    }

    /// Content of one entry, `None` when absent
    fn read_entry(&self, archive: &Path, entry: &str) -> Result<Option<Vec<u8>>>;

    /// Expand `archive` into `target` unless an up-to-date expansion exists.
    ///
    /// Fails with [`DeployError::IllegalEntry`] if any entry would escape
    /// `target`; a failed expansion leaves no directory behind.
    fn expand(&self, archive: &Path, target: &Path) -> Result<PathBuf>;
}

/// Tar (and tar.gz) archive reader
#[derive(Debug, Default, Clone, Copy)]
pub struct TarArchiveReader;

impl TarArchiveReader {
    pub fn new() -> Self {
        Self
    }

    fn open(archive: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
        let mut file = File::open(archive).map_err(DeployError::io(archive))?;

        let mut magic = [0u8; 2];
        let read = file.read(&mut magic).map_err(DeployError::io(archive))?;
        file.seek(SeekFrom::Start(0))
            .map_err(DeployError::io(archive))?;

        let reader: Box<dyn Read> = if read == magic.len() && magic == GZIP_MAGIC {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(tar::Archive::new(reader))
    }

    fn unpack_into(&self, archive: &Path, target: &Path, archive_modified: u64) -> Result<()> {
        let mut tar = Self::open(archive)?;
        let entries = tar.entries().map_err(DeployError::io(archive))?;

        for entry in entries {
            let mut entry = entry.map_err(DeployError::io(archive))?;
            let raw = entry
                .path()
                .map_err(DeployError::io(archive))?
                .into_owned();

            let relative = normalize_entry(&raw).ok_or_else(|| DeployError::IllegalEntry {
                archive: archive.to_path_buf(),
                entry: raw.display().to_string(),
            })?;
            if relative.is_empty() {
                continue;
            }

            let destination = target.join(&relative);
            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                fs::create_dir_all(&destination).map_err(DeployError::io(&destination))?;
            } else if entry_type.is_file() {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent).map_err(DeployError::io(parent))?;
                }
                entry
                    .unpack(&destination)
                    .map_err(DeployError::io(&destination))?;
            } else {
                debug!(
                    archive = %archive.display(),
                    entry = %relative,
                    "Skipping non-regular archive entry"
                );
            }
        }

        let tracker = target.join(EXPANSION_TRACKER);
        if let Some(parent) = tracker.parent() {
            fs::create_dir_all(parent).map_err(DeployError::io(parent))?;
        }
        File::create(&tracker).map_err(DeployError::io(&tracker))?;
        set_modified_millis(&tracker, archive_modified).map_err(DeployError::io(&tracker))?;
        Ok(())
    }
}

impl ArchiveReader for TarArchiveReader {
    fn entries(&self, archive: &Path) -> Result<Vec<String>> {
        let mut tar = Self::open(archive)?;
        let mut names = Vec::new();
        for entry in tar.entries().map_err(DeployError::io(archive))? {
            let entry = entry.map_err(DeployError::io(archive))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().map_err(DeployError::io(archive))?;
            if let Some(name) = normalize_entry(&path) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn read_entry(&self, archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let mut tar = Self::open(archive)?;
        for entry in tar.entries().map_err(DeployError::io(archive))? {
            let mut entry = entry.map_err(DeployError::io(archive))?;
            let path = entry.path().map_err(DeployError::io(archive))?;
            if normalize_entry(&path).as_deref() != Some(name) {
                continue;
            }
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(DeployError::io(archive))?;
            return Ok(Some(content));
        }
        Ok(None)
    }

    fn expand(&self, archive: &Path, target: &Path) -> Result<PathBuf> {
        let archive_modified = last_modified(archive);
        let tracker = target.join(EXPANSION_TRACKER);

        if target.exists() {
            if !tracker.exists() || last_modified(&tracker) == archive_modified {
                debug!(archive = %archive.display(), "Reusing expanded directory");
                return Ok(target.to_path_buf());
            }
            info!(
                archive = %archive.display(),
                target = %target.display(),
                "Archive changed since last expansion, removing expanded directory"
            );
            remove_path(target).map_err(DeployError::io(target))?;
        }

        fs::create_dir_all(target).map_err(DeployError::io(target))?;
        if let Err(e) = self.unpack_into(archive, target, archive_modified) {
            if let Err(cleanup) = remove_path(target) {
                warn!(target = %target.display(), error = %cleanup, "Failed to clean up partial expansion");
            }
            return Err(e);
        }

        info!(archive = %archive.display(), target = %target.display(), "Archive expanded");
        Ok(target.to_path_buf())
    }
}

/// Relative `/`-separated entry name; `None` if the entry is absolute or
/// climbs out of its root
fn normalize_entry(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_archive(path: &Path, files: &[(&str, &[u8])], gzip: bool) {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_500_000_000);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, name, *content).unwrap();
        }
        let bytes = builder.into_inner().unwrap();

        let bytes = if gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&bytes).unwrap();
            encoder.finish().unwrap()
        } else {
            bytes
        };
        fs::write(path, bytes).unwrap();
    }

    fn write_escaping_archive(path: &Path) {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_old();
        let name = b"../escape.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        fs::write(path, builder.into_inner().unwrap()).unwrap();
    }

    #[test]
    fn test_entries_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("shop.war");
        write_archive(
            &archive,
            &[("META-INF/app.toml", b"unpack = false\n"), ("index.html", b"hi")],
            true,
        );

        let reader = TarArchiveReader::new();
        assert!(reader.contains_entry(&archive, "META-INF/app.toml").unwrap());
        assert!(!reader.contains_entry(&archive, "WEB-INF/web.xml").unwrap());
        assert_eq!(
            reader.read_entry(&archive, "index.html").unwrap(),
            Some(b"hi".to_vec())
        );
        assert_eq!(reader.read_entry(&archive, "missing").unwrap(), None);
    }

    #[test]
    fn test_expand_writes_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("shop.war");
        write_archive(&archive, &[("WEB-INF/web.xml", b"<web/>")], false);
        set_modified_millis(&archive, 1_600_000_000_000).unwrap();

        let target = dir.path().join("shop");
        let expanded = TarArchiveReader::new().expand(&archive, &target).unwrap();

        assert_eq!(expanded, target);
        assert_eq!(fs::read(target.join("WEB-INF/web.xml")).unwrap(), b"<web/>");
        assert_eq!(
            last_modified(&target.join(EXPANSION_TRACKER)),
            1_600_000_000_000
        );
    }

    #[test]
    fn test_expand_reuses_current_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("shop.war");
        write_archive(&archive, &[("index.html", b"v1")], false);

        let target = dir.path().join("shop");
        let reader = TarArchiveReader::new();
        reader.expand(&archive, &target).unwrap();
        fs::write(target.join("local.txt"), b"kept").unwrap();

        reader.expand(&archive, &target).unwrap();
        assert!(target.join("local.txt").exists());
    }

    #[test]
    fn test_expand_replaces_stale_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("shop.war");
        write_archive(&archive, &[("index.html", b"v1")], false);
        set_modified_millis(&archive, 1_600_000_000_000).unwrap();

        let target = dir.path().join("shop");
        let reader = TarArchiveReader::new();
        reader.expand(&archive, &target).unwrap();
        fs::write(target.join("local.txt"), b"stale").unwrap();

        write_archive(&archive, &[("index.html", b"v2")], false);
        set_modified_millis(&archive, 1_600_000_005_000).unwrap();
        reader.expand(&archive, &target).unwrap();

        assert!(!target.join("local.txt").exists());
        assert_eq!(fs::read(target.join("index.html")).unwrap(), b"v2");
    }

    #[test]
    fn test_illegal_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.war");
        write_escaping_archive(&archive);

        let target = dir.path().join("apps").join("evil");
        let err = TarArchiveReader::new().expand(&archive, &target).unwrap_err();

        assert!(matches!(err, DeployError::IllegalEntry { .. }));
        assert!(!target.exists());
        assert!(!dir.path().join("apps").join("escape.txt").exists());
    }

    #[test]
    fn test_normalize_entry() {
        assert_eq!(
            normalize_entry(Path::new("./META-INF/app.toml")).as_deref(),
            Some("META-INF/app.toml")
        );
        assert_eq!(normalize_entry(Path::new("a/../../b")), None);
        assert_eq!(normalize_entry(Path::new("/etc/passwd")), None);
    }
}
