//! Tar archive codec for moving files across the sandbox copy primitive.
//!
//! Entries carry paths relative to a declared root. Absolute paths and `..`
//! components are rejected in both directions so an archive can never write
//! outside the directory it is extracted into.

use crate::error::{SandboxError, SandboxResult};
use crate::path::{normalize_relative, split_first};
use crate::traits::{PathKind, PathStat};
use bytes::Bytes;
use std::io::{Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Archive, Builder, EntryType, Header};

/// Mode for regular files written into a netDb.
pub const FILE_MODE: u32 = 0o600;

/// Mode for directories written into a netDb.
pub const DIR_MODE: u32 = 0o755;

/// A single archive member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveEntry {
    File { path: String, data: Bytes },
    Directory { path: String },
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::File {
            path: path.into(),
            data: data.into(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::Directory { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Directory { path } => path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    fn with_path(self, path: String) -> Self {
        match self {
            Self::File { data, .. } => Self::File { path, data },
            Self::Directory { .. } => Self::Directory { path },
        }
    }
}

/// Encode entries into a tar stream, preserving order.
pub fn encode(entries: &[ArchiveEntry]) -> SandboxResult<Bytes> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut builder = Builder::new(Vec::new());

    for entry in entries {
        let path = normalize_relative(entry.path())?;
        let mut header = Header::new_gnu();
        header.set_mtime(mtime);
        match entry {
            ArchiveEntry::File { data, .. } => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(FILE_MODE);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, &path, data.as_ref())?;
            }
            ArchiveEntry::Directory { .. } => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(DIR_MODE);
                header.set_size(0);
                builder.append_data(&mut header, format!("{path}/"), std::io::empty())?;
            }
        }
    }

    Ok(Bytes::from(builder.into_inner()?))
}

/// Decode a tar stream into entries in stream order.
///
/// Links, devices and other special members are skipped.
pub fn decode(archive: &[u8]) -> SandboxResult<Vec<ArchiveEntry>> {
    let mut reader = Archive::new(Cursor::new(archive));
    let mut out = Vec::new();

    let entries = reader
        .entries()
        .map_err(|e| SandboxError::ArchiveCorrupt(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| SandboxError::ArchiveCorrupt(e.to_string()))?;
        let raw_path = {
            let bytes = entry.path_bytes();
            String::from_utf8(bytes.into_owned()).map_err(|_| {
                SandboxError::ArchiveCorrupt("entry path is not valid UTF-8".to_string())
            })?
        };
        let kind = entry.header().entry_type();

        // Docker emits "./" style roots for some copies; they carry nothing.
        if raw_path.trim_matches(|c| c == '.' || c == '/').is_empty() && !raw_path.contains("..")
        {
            continue;
        }

        match kind {
            EntryType::Regular | EntryType::Continuous => {
                let path = normalize_relative(&raw_path)?;
                let size = entry.size();
                let mut data = Vec::with_capacity(size as usize);
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| SandboxError::ArchiveCorrupt(format!("{path}: {e}")))?;
                if data.len() as u64 != size {
                    return Err(SandboxError::ArchiveCorrupt(format!(
                        "{path}: truncated, expected {size} bytes, got {}",
                        data.len()
                    )));
                }
                out.push(ArchiveEntry::File {
                    path,
                    data: Bytes::from(data),
                });
            }
            EntryType::Directory => {
                let path = normalize_relative(&raw_path)?;
                out.push(ArchiveEntry::Directory { path });
            }
            other => {
                tracing::debug!(path = %raw_path, kind = ?other, "Skipping special archive member");
            }
        }
    }

    Ok(out)
}

/// Describe the root of an archive produced by a copy-out.
///
/// A copy-out of a regular file yields a single file entry; a copy-out of a
/// directory yields entries rooted at the directory's name.
pub fn root_stat(entries: &[ArchiveEntry]) -> SandboxResult<PathStat> {
    let first = entries
        .first()
        .ok_or_else(|| SandboxError::ArchiveCorrupt("archive has no entries".to_string()))?;
    let (root, rest) = split_first(first.path());
    let kind = match (first, rest) {
        (ArchiveEntry::File { .. }, None) => PathKind::File,
        _ => PathKind::Directory,
    };
    let size = match first {
        ArchiveEntry::File { data, .. } if kind == PathKind::File => data.len() as u64,
        _ => 0,
    };
    Ok(PathStat {
        name: root.to_string(),
        kind,
        size,
    })
}

/// Describe the root of a raw copy-out stream from its first header.
///
/// Unlike [`root_stat`], this sees members that [`decode`] skips, so a
/// symlink or device at the copied path reports [`PathKind::Other`].
pub fn stream_stat(archive: &[u8]) -> SandboxResult<PathStat> {
    let mut reader = Archive::new(Cursor::new(archive));
    let entries = reader
        .entries()
        .map_err(|e| SandboxError::ArchiveCorrupt(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| SandboxError::ArchiveCorrupt(e.to_string()))?;
        let raw_path = String::from_utf8(entry.path_bytes().into_owned()).map_err(|_| {
            SandboxError::ArchiveCorrupt("entry path is not valid UTF-8".to_string())
        })?;
        if raw_path.trim_matches(|c| c == '.' || c == '/').is_empty() && !raw_path.contains("..")
        {
            continue;
        }

        let path = normalize_relative(&raw_path)?;
        let (root, rest) = split_first(&path);
        let (kind, size) = match (entry.header().entry_type(), rest) {
            (_, Some(_)) | (EntryType::Directory, None) => (PathKind::Directory, 0),
            (EntryType::Regular | EntryType::Continuous, None) => (PathKind::File, entry.size()),
            (_, None) => (PathKind::Other, 0),
        };
        return Ok(PathStat {
            name: root.to_string(),
            kind,
            size,
        });
    }
    Err(SandboxError::ArchiveCorrupt("archive has no entries".to_string()))
}

/// Replace the leading path component of every entry with `new_root`.
///
/// Used to move a directory copied out under one name into a destination
/// that expects another (e.g. a node's netDb into the shared `netDb`).
pub fn reroot(entries: Vec<ArchiveEntry>, new_root: &str) -> SandboxResult<Vec<ArchiveEntry>> {
    let new_root = normalize_relative(new_root)?;
    entries
        .into_iter()
        .map(|entry| {
            let path = normalize_relative(entry.path())?;
            let rerooted = match split_first(&path) {
                (_, Some(rest)) => format!("{new_root}/{rest}"),
                (_, None) => new_root.clone(),
            };
            Ok(entry.with_path(rerooted))
        })
        .collect()
}

/// Contents of the first regular file in the archive.
pub fn first_file(entries: &[ArchiveEntry]) -> Option<(&str, &Bytes)> {
    entries.iter().find_map(|entry| match entry {
        ArchiveEntry::File { path, data } => Some((path.as_str(), data)),
        ArchiveEntry::Directory { .. } => None,
    })
}

/// Number of regular files in the archive.
pub fn file_count(entries: &[ArchiveEntry]) -> usize {
    entries.iter().filter(|e| !e.is_directory()).count()
}
