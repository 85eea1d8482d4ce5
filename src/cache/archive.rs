//! Multi-path tar archiver
//!
//! Every source path gets its own `{index:04}/` namespace so unrelated trees
//! (`node_modules`, `vendor/bundle`, ...) can share one artifact. The manifest
//! recording the original paths is appended last.

use crate::cache::manifest::{index_dir, Manifest, MANIFEST_NAME};
use crate::cache::walk::{EntryKind, EntrySource, FsSource, SourceEntry};
use crate::error::{StowawayError, StowawayResult};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Builder, EntryType, Header};
use tracing::debug;

/// Builds the combined archive for an ordered list of source paths
pub struct Archiver<S = FsSource> {
    source: S,
    base_dir: PathBuf,
}

impl Archiver<FsSource> {
    /// Archive real paths, resolving relative ones against `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_source(FsSource, base_dir)
    }
}

impl<S: EntrySource> Archiver<S> {
    pub fn with_source(source: S, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            base_dir: base_dir.into(),
        }
    }

    /// Write the archive for `paths` into `sink`, returning the sink and manifest
    ///
    /// Any read, stat, or write failure aborts the whole archive.
    pub fn create_archive<W: Write>(&self, paths: &[String], sink: W) -> StowawayResult<(W, Manifest)> {
        let mut builder = Builder::new(sink);
        builder.follow_symlinks(false);

        for (index, path) in paths.iter().enumerate() {
            let root = self.base_dir.join(path);
            let prefix = PathBuf::from(index_dir(index));
            let mut count = 0usize;
            for entry in self.source.entries(&root) {
                let entry = entry?;
                self.append_entry(&mut builder, &prefix.join(&entry.name), &entry)?;
                count += 1;
            }
            debug!(index, path = %path, entries = count, "Archived source path");
        }

        let manifest = Manifest::new(paths.to_vec());
        let body = manifest.to_json()?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o600);
        header.set_size(body.len() as u64);
        header.set_mtime(unix_now());
        builder
            .append_data(&mut header, MANIFEST_NAME, body.as_slice())
            .map_err(|e| StowawayError::archive(format!("adding {} to archive", MANIFEST_NAME), e))?;

        let sink = builder
            .into_inner()
            .map_err(|e| StowawayError::archive("finishing archive", e))?;
        Ok((sink, manifest))
    }

    fn append_entry<W: Write>(
        &self,
        builder: &mut Builder<W>,
        name: &Path,
        entry: &SourceEntry,
    ) -> StowawayResult<()> {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(entry.mtime);

        let result = match &entry.kind {
            EntryKind::Directory => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, name, io::empty())
            }
            EntryKind::File => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(entry.size);
                let content = self.source.open(entry)?;
                builder.append_data(&mut header, name, SizedReader::new(content, entry.size))
            }
            EntryKind::Symlink { target } => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, name, target)
            }
        };
        result.map_err(|e| StowawayError::archive(format!("adding {} to archive", entry.source.display()), e))
    }
}

/// Yields exactly `remaining` bytes or fails
///
/// The tar header is written from an earlier stat. A file that shrank since
/// then would otherwise be padded with zeros; one that grew is cut at the
/// recorded size.
struct SizedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self { inner, remaining: size }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while archiving, {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tar::Archive;
    use tempfile::TempDir;

    /// In-memory entry source keyed by walked root
    struct Synthetic {
        trees: HashMap<PathBuf, Vec<(SourceEntry, Vec<u8>)>>,
    }

    impl EntrySource for Synthetic {
        fn entries<'a>(
            &'a self,
            root: &'a Path,
        ) -> Box<dyn Iterator<Item = StowawayResult<SourceEntry>> + 'a> {
            match self.trees.get(root) {
                Some(tree) => Box::new(tree.iter().map(|(e, _)| Ok(e.clone()))),
                None => Box::new(std::iter::once(Err(StowawayError::archive(
                    "walking",
                    io::Error::new(io::ErrorKind::NotFound, "no such tree"),
                )))),
            }
        }

        fn open(&self, entry: &SourceEntry) -> StowawayResult<Box<dyn Read + '_>> {
            let body = self
                .trees
                .values()
                .flatten()
                .find(|(e, _)| e.source == entry.source)
                .map(|(_, body)| body.as_slice())
                .unwrap_or_default();
            Ok(Box::new(body))
        }
    }

    fn entry(name: &str, kind: EntryKind, size: u64) -> SourceEntry {
        SourceEntry {
            source: PathBuf::from("/src").join(name),
            name: PathBuf::from(name),
            kind,
            mode: 0o644,
            size,
            mtime: 0,
        }
    }

    /// (name, entry type, content, link target) for every archived entry
    fn read_back(bytes: &[u8]) -> Vec<(String, EntryType, String, Option<String>)> {
        let mut archive = Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let kind = e.header().entry_type();
                let link = e
                    .link_name()
                    .unwrap()
                    .map(|l| l.to_string_lossy().into_owned());
                let mut content = String::new();
                e.read_to_string(&mut content).unwrap();
                (name, kind, content, link)
            })
            .collect()
    }

    #[test]
    fn synthetic_entries_are_namespaced_by_index() {
        let mut trees = HashMap::new();
        trees.insert(
            PathBuf::from("/base/a"),
            vec![
                (entry("a", EntryKind::Directory, 0), Vec::new()),
                (entry("a/x.txt", EntryKind::File, 2), b"hi".to_vec()),
            ],
        );
        trees.insert(
            PathBuf::from("/base/b/c"),
            vec![(
                entry(
                    "c",
                    EntryKind::Symlink {
                        target: PathBuf::from("elsewhere"),
                    },
                    0,
                ),
                Vec::new(),
            )],
        );
        let archiver = Archiver::with_source(Synthetic { trees }, "/base");

        let paths = vec!["a".to_string(), "b/c".to_string()];
        let (bytes, manifest) = archiver.create_archive(&paths, Vec::new()).unwrap();
        assert_eq!(manifest.paths, paths);

        let entries = read_back(&bytes);
        let names: Vec<&str> = entries.iter().map(|e| e.0.as_str()).collect();
        assert_eq!(names, ["0000/a", "0000/a/x.txt", "0001/c", MANIFEST_NAME]);
        assert_eq!(entries[0].1, EntryType::Directory);
        assert_eq!(entries[1].2, "hi");
        assert_eq!(entries[2].1, EntryType::Symlink);
        assert_eq!(entries[2].3.as_deref(), Some("elsewhere"));
        assert_eq!(entries[3].2, r#"{"paths":["a","b/c"]}"#);
    }

    #[test]
    fn source_failure_aborts_archive() {
        let archiver = Archiver::with_source(Synthetic { trees: HashMap::new() }, "/base");
        let err = archiver
            .create_archive(&["missing".to_string()], Vec::new())
            .unwrap_err();
        assert!(matches!(err, StowawayError::Archive { .. }));
    }

    #[test]
    fn file_shorter_than_recorded_size_aborts() {
        let mut trees = HashMap::new();
        trees.insert(
            PathBuf::from("/base/a"),
            vec![
                (entry("a", EntryKind::Directory, 0), Vec::new()),
                (entry("a/x.txt", EntryKind::File, 10), b"abc".to_vec()),
            ],
        );
        let archiver = Archiver::with_source(Synthetic { trees }, "/base");

        let err = archiver
            .create_archive(&["a".to_string()], Vec::new())
            .unwrap_err();
        match err {
            StowawayError::Archive { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected archive error, got {other:?}"),
        }
    }

    #[test]
    fn sized_reader_cuts_at_recorded_size() {
        let mut out = Vec::new();
        SizedReader::new(&b"abcdef"[..], 4).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");
    }

    #[cfg(unix)]
    #[test]
    fn filesystem_fixture_layout() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("tmp/foo/bar/baz")).unwrap();
        fs::write(base.join("tmp/foo/hoge.txt"), "This is foo!").unwrap();
        std::os::unix::fs::symlink("../../hoge.txt", base.join("tmp/foo/bar/baz/link")).unwrap();
        fs::create_dir_all(base.join("tmp/abc/def/ghe")).unwrap();

        let paths = vec!["tmp/foo".to_string(), "tmp/abc/def".to_string()];
        let (bytes, _) = Archiver::new(base).create_archive(&paths, Vec::new()).unwrap();
        let entries = read_back(&bytes);

        assert_eq!(entries.len(), 8);
        let by_name: HashMap<&str, _> = entries.iter().map(|e| (e.0.as_str(), e)).collect();
        assert_eq!(by_name["metadata.json"].2, r#"{"paths":["tmp/foo","tmp/abc/def"]}"#);
        assert_eq!(by_name["0000/foo/hoge.txt"].2, "This is foo!");
        assert_eq!(by_name["0000/foo/bar/baz/link"].3.as_deref(), Some("../../hoge.txt"));
        assert_eq!(by_name["0001/def/ghe"].1, EntryType::Directory);
        assert_eq!(entries.last().unwrap().0, MANIFEST_NAME);
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_recorded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("bin/run.sh");
        fs::create_dir_all(script.parent().unwrap()).unwrap();
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let (bytes, _) = Archiver::new(dir.path())
            .create_archive(&["bin".to_string()], Vec::new())
            .unwrap();
        let mut archive = Archive::new(bytes.as_slice());
        let mode = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().ends_with("run.sh"))
            .map(|e| e.header().mode().unwrap())
            .unwrap();
        assert_eq!(mode, 0o750);
    }
}
