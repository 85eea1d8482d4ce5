//! Lazy enumeration of the entries under a source path
//!
//! The archiver consumes entries one at a time through [`EntrySource`], so it
//! can run against the real filesystem ([`FsSource`]) or a synthetic list.

use crate::error::{StowawayError, StowawayResult};
use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

/// Kind of filesystem entry carried by the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink { target: PathBuf },
}

/// One entry produced while walking a source path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Location on disk
    pub source: PathBuf,
    /// Path relative to the parent of the walked root (`foo/bar/baz`)
    pub name: PathBuf,
    pub kind: EntryKind,
    /// Permission bits
    pub mode: u32,
    /// Content length; 0 for directories and symlinks
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
}

/// A restartable producer of source entries
pub trait EntrySource {
    /// Enumerate `root` and its descendants, parents before children
    fn entries<'a>(
        &'a self,
        root: &'a Path,
    ) -> Box<dyn Iterator<Item = StowawayResult<SourceEntry>> + 'a>;

    /// Open the content of a regular file entry
    fn open(&self, entry: &SourceEntry) -> StowawayResult<Box<dyn Read + '_>>;
}

/// Walks the real filesystem, following a symlinked root but no link below it
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl EntrySource for FsSource {
    fn entries<'a>(
        &'a self,
        root: &'a Path,
    ) -> Box<dyn Iterator<Item = StowawayResult<SourceEntry>> + 'a> {
        let Some(base) = root.file_name().map(PathBuf::from) else {
            return Box::new(std::iter::once(Err(StowawayError::PathInvalid {
                path: root.to_path_buf(),
                reason: "path has no final component".to_string(),
            })));
        };

        let walker = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(true)
            .sort_by_file_name()
            .into_iter();

        Box::new(walker.filter_map(move |res| {
            let entry = match res {
                Ok(entry) => entry,
                Err(e) => {
                    let context = match e.path() {
                        Some(p) => format!("walking {}", p.display()),
                        None => format!("walking {}", root.display()),
                    };
                    return Some(Err(StowawayError::archive(context, e.into())));
                }
            };
            let rel = entry.path().strip_prefix(root).unwrap_or(Path::new(""));
            let name = if rel.as_os_str().is_empty() {
                base.clone()
            } else {
                base.join(rel)
            };
            source_entry(entry.path(), name, entry.depth() == 0).transpose()
        }))
    }

    fn open(&self, entry: &SourceEntry) -> StowawayResult<Box<dyn Read + '_>> {
        let file = File::open(&entry.source)
            .map_err(|e| StowawayError::archive(format!("opening {}", entry.source.display()), e))?;
        Ok(Box::new(file))
    }
}

/// Stat one path; `Ok(None)` for special files, which are skipped
///
/// The walked root itself is resolved through symlinks, everything below it
/// is not.
fn source_entry(path: &Path, name: PathBuf, is_root: bool) -> StowawayResult<Option<SourceEntry>> {
    let meta = if is_root {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
    .map_err(|e| StowawayError::archive(format!("stat {}", path.display()), e))?;
    let file_type = meta.file_type();

    let (kind, size) = if file_type.is_dir() {
        (EntryKind::Directory, 0)
    } else if file_type.is_file() {
        (EntryKind::File, meta.len())
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map_err(|e| StowawayError::archive(format!("reading link {}", path.display()), e))?;
        (EntryKind::Symlink { target }, 0)
    } else {
        warn!(path = %path.display(), "Skipping special file");
        return Ok(None);
    };

    Ok(Some(SourceEntry {
        source: path.to_path_buf(),
        name,
        mode: permission_bits(&meta, &kind),
        kind,
        size,
        mtime: meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs()),
    }))
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata, _kind: &EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata, kind: &EntryKind) -> u32 {
    match kind {
        EntryKind::Directory => 0o755,
        _ if meta.permissions().readonly() => 0o444,
        _ => 0o644,
    }
}
