//! Unpacking a downloaded artifact and moving subtrees back into place

use crate::cache::compress::decompress;
use crate::cache::manifest::Manifest;
use crate::error::{StowawayError, StowawayResult};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Decompress `compressed` and materialize every entry under `dest`
///
/// Returns the number of entries written. Entry names that would escape
/// `dest` and entry types other than directory, regular file, or symlink
/// are rejected as corrupt.
pub fn extract<R: Read>(compressed: R, dest: &Path) -> StowawayResult<usize> {
    let mut archive = Archive::new(decompress(compressed));
    let entries = archive
        .entries()
        .map_err(|e| StowawayError::extraction("reading archive", e))?;

    // Applied after all children exist so read-only directories still fill
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    let mut count = 0usize;

    for entry in entries {
        let mut entry = entry.map_err(|e| StowawayError::extraction("reading archive entry", e))?;
        let name = entry
            .path()
            .map_err(|e| StowawayError::extraction("decoding entry name", e))?
            .into_owned();
        let target = safe_join(dest, &name)?;
        prepare_parent(dest, &target)?;
        let mode = entry.header().mode().ok();

        match entry.header().entry_type() {
            EntryType::Directory => {
                // An earlier symlink entry must not redirect the deferred chmod
                remove_if_symlink(&target)?;
                fs::create_dir_all(&target)
                    .map_err(|e| StowawayError::extraction(format!("creating {}", target.display()), e))?;
                if let Some(mode) = mode {
                    dir_modes.push((target, mode));
                }
            }
            EntryType::Regular | EntryType::Continuous => {
                remove_if_symlink(&target)?;
                let mut file = File::create(&target)
                    .map_err(|e| StowawayError::extraction(format!("creating {}", target.display()), e))?;
                io::copy(&mut entry, &mut file)
                    .map_err(|e| StowawayError::extraction(format!("writing {}", target.display()), e))?;
                if let Some(mode) = mode {
                    set_mode(&target, mode)?;
                }
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| StowawayError::extraction("decoding link target", e))?
                    .ok_or_else(|| {
                        StowawayError::CorruptArchive(format!("symlink {} has no target", name.display()))
                    })?
                    .into_owned();
                remove_existing(&target)?;
                make_symlink(&link, &target)?;
            }
            other => {
                return Err(StowawayError::CorruptArchive(format!(
                    "unsupported entry type {:?} for {}",
                    other,
                    name.display()
                )));
            }
        }
        count += 1;
    }

    for (dir, mode) in dir_modes.into_iter().rev() {
        set_mode(&dir, mode)?;
    }

    // Drain past the tar end marker so the gzip trailer checksum is verified
    io::copy(&mut archive.into_inner(), &mut io::sink())
        .map_err(|e| StowawayError::extraction("verifying compressed stream", e))?;

    debug!(entries = count, dest = %dest.display(), "Extracted archive");
    Ok(count)
}

/// Move every extracted subtree back to its original location
///
/// Indices are processed in manifest order. A failure at index `i` stops the
/// restore; paths already relocated at earlier indices stay in place.
pub fn relocate(dest: &Path, manifest: &Manifest, working_dir: &Path) -> StowawayResult<Vec<PathBuf>> {
    let mut restored = Vec::with_capacity(manifest.paths.len());

    for (index, original) in manifest.paths.iter().enumerate() {
        let from = manifest.extracted_path(dest, index)?;
        if fs::symlink_metadata(&from).is_err() {
            return Err(StowawayError::CorruptArchive(format!(
                "archive has no entries for {}",
                original
            )));
        }

        let to = working_dir.join(original);
        remove_existing(&to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StowawayError::extraction(format!("creating {}", parent.display()), e))?;
        }
        move_tree(&from, &to)?;

        info!(index, path = %original, "Restored cached path");
        restored.push(to);
    }

    Ok(restored)
}

/// Join an archive entry name onto `dest`, rejecting names that escape it
fn safe_join(dest: &Path, name: &Path) -> StowawayResult<PathBuf> {
    let mut joined = dest.to_path_buf();
    for component in name.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StowawayError::CorruptArchive(format!(
                    "entry {} escapes the extraction root",
                    name.display()
                )));
            }
        }
    }
    if joined == dest {
        return Err(StowawayError::CorruptArchive("entry with empty name".to_string()));
    }
    Ok(joined)
}

/// Create the parent chain of `target`, refusing to write through symlinks
fn prepare_parent(dest: &Path, target: &Path) -> StowawayResult<()> {
    let Some(parent) = target.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent)
        .map_err(|e| StowawayError::extraction(format!("creating {}", parent.display()), e))?;

    let rel = parent.strip_prefix(dest).unwrap_or(Path::new(""));
    let mut current = dest.to_path_buf();
    for part in rel.components() {
        current.push(part);
        let is_link = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            return Err(StowawayError::CorruptArchive(format!(
                "entry {} traverses symlink {}",
                target.display(),
                current.display()
            )));
        }
    }
    Ok(())
}

fn remove_if_symlink(path: &Path) -> StowawayResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)
            .map_err(|e| StowawayError::extraction(format!("removing {}", path.display()), e)),
        _ => Ok(()),
    }
}

/// Remove whatever currently occupies `path`; absence is fine
fn remove_existing(path: &Path) -> StowawayResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StowawayError::extraction(format!("stat {}", path.display()), e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| StowawayError::extraction(format!("removing {}", path.display()), e))
}

fn move_tree(from: &Path, to: &Path) -> StowawayResult<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(from = %from.display(), to = %to.display(), "Rename crosses filesystems, copying");
            copy_tree(from, to)?;
            remove_existing(from)
        }
        Err(e) => Err(StowawayError::extraction(
            format!("moving {} to {}", from.display(), to.display()),
            e,
        )),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

/// Recursive copy preserving symlinks and permission bits
fn copy_tree(from: &Path, to: &Path) -> StowawayResult<()> {
    let mut dir_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(from).follow_links(false).follow_root_links(false) {
        let entry = entry.map_err(|e| StowawayError::extraction(format!("walking {}", from.display()), e.into()))?;
        let rel = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
        let target = if rel.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rel)
        };
        let file_type = entry.file_type();
        let context = |e: io::Error| StowawayError::extraction(format!("copying {}", entry.path().display()), e);

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(context)?;
            let meta = entry.metadata().map_err(|e| context(e.into()))?;
            dir_modes.push((target, meta.permissions()));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(context)?;
            make_symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(context)?;
        }
    }

    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, perms)
            .map_err(|e| StowawayError::extraction(format!("setting mode on {}", dir.display()), e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> StowawayResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| StowawayError::extraction(format!("setting mode on {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> StowawayResult<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> StowawayResult<()> {
    std::os::unix::fs::symlink(link, target)
        .map_err(|e| StowawayError::extraction(format!("creating symlink {}", target.display()), e))
}

#[cfg(not(unix))]
fn make_symlink(_link: &Path, target: &Path) -> StowawayResult<()> {
    Err(StowawayError::extraction(
        format!("creating symlink {}", target.display()),
        io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported on this platform"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::archive::Archiver;
    use crate::cache::compress::{Compressor, DEFAULT_LEVEL};
    use std::io::Write;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    fn pack(base: &Path, paths: &[&str]) -> Vec<u8> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let compressor = Compressor::new(Vec::new(), DEFAULT_LEVEL);
        let (compressor, _) = Archiver::new(base).create_archive(&paths, compressor).unwrap();
        compressor.finish().unwrap()
    }

    /// Gzipped tar with one entry whose raw name bypasses path validation
    fn raw_entry(name: &[u8], kind: EntryType) -> Vec<u8> {
        let mut header = Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(kind);
        header.set_mode(0o644);
        header.set_size(3);
        header.set_cksum();

        let mut builder = Builder::new(Vec::new());
        builder.append(&header, &b"abc"[..]).unwrap();
        let tar = builder.into_inner().unwrap();

        let mut compressor = Compressor::new(Vec::new(), DEFAULT_LEVEL);
        compressor.write_all(&tar).unwrap();
        compressor.finish().unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn round_trip_restores_original_layout() {
        let src = TempDir::new().unwrap();
        let base = src.path();
        fs::create_dir_all(base.join("tmp/foo/bar/baz")).unwrap();
        fs::write(base.join("tmp/foo/hoge.txt"), "This is foo!").unwrap();
        std::os::unix::fs::symlink("../../hoge.txt", base.join("tmp/foo/bar/baz/link")).unwrap();
        fs::create_dir_all(base.join("tmp/abc/def/ghe")).unwrap();

        let bytes = pack(base, &["tmp/foo", "tmp/abc/def"]);

        let work = TempDir::new().unwrap();
        let count = extract(bytes.as_slice(), work.path()).unwrap();
        assert_eq!(count, 8);

        let target = TempDir::new().unwrap();
        let manifest = Manifest::read_from(work.path()).unwrap();
        let restored = relocate(work.path(), &manifest, target.path()).unwrap();
        assert_eq!(
            restored,
            vec![target.path().join("tmp/foo"), target.path().join("tmp/abc/def")]
        );

        let out = target.path();
        assert_eq!(fs::read_to_string(out.join("tmp/foo/hoge.txt")).unwrap(), "This is foo!");
        assert_eq!(
            fs::read_link(out.join("tmp/foo/bar/baz/link")).unwrap(),
            PathBuf::from("../../hoge.txt")
        );
        assert_eq!(
            fs::read_to_string(out.join("tmp/foo/bar/baz/link")).unwrap(),
            "This is foo!"
        );
        let ghe = out.join("tmp/abc/def/ghe");
        assert!(ghe.is_dir());
        assert_eq!(fs::read_dir(ghe).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn modes_survive_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dir = src.path().join("ro");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.join("run.sh"), fs::Permissions::from_mode(0o751)).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();

        let bytes = pack(src.path(), &["ro"]);
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        let work = TempDir::new().unwrap();
        extract(bytes.as_slice(), work.path()).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&work.path().join("0000/ro/run.sh")), 0o751);
        assert_eq!(mode(&work.path().join("0000/ro")), 0o555);

        fs::set_permissions(work.path().join("0000/ro"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn relocation_replaces_existing_entries() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("deps/pkg")).unwrap();
        fs::write(src.path().join("deps/pkg/a.txt"), "cached").unwrap();
        let bytes = pack(src.path(), &["deps"]);

        let target = TempDir::new().unwrap();
        fs::create_dir_all(target.path().join("deps/stale")).unwrap();
        fs::write(target.path().join("deps/stale/old.txt"), "old").unwrap();

        let work = TempDir::new().unwrap();
        extract(bytes.as_slice(), work.path()).unwrap();
        let manifest = Manifest::read_from(work.path()).unwrap();
        relocate(work.path(), &manifest, target.path()).unwrap();

        assert!(!target.path().join("deps/stale").exists());
        assert_eq!(
            fs::read_to_string(target.path().join("deps/pkg/a.txt")).unwrap(),
            "cached"
        );
    }

    #[test]
    fn relocation_stops_at_first_missing_subtree() {
        let work = TempDir::new().unwrap();
        fs::create_dir_all(work.path().join("0000/first")).unwrap();
        fs::write(work.path().join("0000/first/x"), "1").unwrap();

        let target = TempDir::new().unwrap();
        let manifest = Manifest::new(vec![
            "first".to_string(),
            "second".to_string(),
            "third".to_string(),
        ]);
        fs::create_dir_all(work.path().join("0002/third")).unwrap();

        let err = relocate(work.path(), &manifest, target.path()).unwrap_err();
        assert!(matches!(err, StowawayError::CorruptArchive(_)));
        assert!(target.path().join("first/x").exists());
        assert!(!target.path().join("third").exists());
    }

    #[test]
    fn parent_dir_entry_is_rejected() {
        let bytes = raw_entry(b"../evil.txt", EntryType::Regular);
        let work = TempDir::new().unwrap();
        let dest = work.path().join("dest");
        fs::create_dir_all(&dest).unwrap();

        let err = extract(bytes.as_slice(), &dest).unwrap_err();
        assert!(matches!(err, StowawayError::CorruptArchive(_)));
        assert!(!work.path().join("evil.txt").exists());
    }

    #[test]
    fn absolute_entry_is_rejected() {
        let bytes = raw_entry(b"/tmp/stowaway-evil.txt", EntryType::Regular);
        let work = TempDir::new().unwrap();
        let err = extract(bytes.as_slice(), work.path()).unwrap_err();
        assert!(matches!(err, StowawayError::CorruptArchive(_)));
    }

    #[test]
    fn unsupported_entry_type_is_rejected() {
        let bytes = raw_entry(b"0000/fifo", EntryType::Fifo);
        let work = TempDir::new().unwrap();
        let err = extract(bytes.as_slice(), work.path()).unwrap_err();
        assert!(matches!(err, StowawayError::CorruptArchive(_)));
    }

    #[cfg(unix)]
    #[test]
    fn directory_entry_replaces_earlier_symlink() {
        use std::os::unix::fs::PermissionsExt;

        let outside = TempDir::new().unwrap();
        fs::set_permissions(outside.path(), fs::Permissions::from_mode(0o755)).unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_mode(0o777);
        link.set_size(0);
        builder.append_link(&mut link, "0000/d", outside.path()).unwrap();
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o700);
        dir.set_size(0);
        builder.append_data(&mut dir, "0000/d", io::empty()).unwrap();
        let tar = builder.into_inner().unwrap();
        let mut compressor = Compressor::new(Vec::new(), DEFAULT_LEVEL);
        compressor.write_all(&tar).unwrap();
        let bytes = compressor.finish().unwrap();

        let work = TempDir::new().unwrap();
        extract(bytes.as_slice(), work.path()).unwrap();

        let extracted = work.path().join("0000/d");
        let meta = fs::symlink_metadata(&extracted).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o7777, 0o700);
        let outside_mode = fs::metadata(outside.path()).unwrap().permissions().mode() & 0o7777;
        assert_eq!(outside_mode, 0o755);
    }

    #[test]
    fn garbage_input_is_extraction_error() {
        let work = TempDir::new().unwrap();
        let err = extract(&b"definitely not gzip"[..], work.path()).unwrap_err();
        assert!(matches!(err, StowawayError::Extraction { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_preserves_links() {
        let src = TempDir::new().unwrap();
        let from = src.path().join("tree");
        fs::create_dir_all(from.join("sub")).unwrap();
        fs::write(from.join("sub/file"), "data").unwrap();
        std::os::unix::fs::symlink("sub/file", from.join("link")).unwrap();

        let dst = TempDir::new().unwrap();
        let to = dst.path().join("tree");
        copy_tree(&from, &to).unwrap();

        assert_eq!(fs::read_to_string(to.join("sub/file")).unwrap(), "data");
        assert_eq!(fs::read_link(to.join("link")).unwrap(), PathBuf::from("sub/file"));
    }
}
