//! Directory-backed buckets
//!
//! A bucket is `<root>/<bucket>/`; an object key maps to a file path below
//! it, with `/` separated segments becoming nested directories. Uploads land
//! in a temporary file inside the bucket and are renamed into place once the
//! content digest checks out, so readers never observe a partial object.

use super::{validate_key, ObjectSummary, RemoteStore};
use crate::error::{RemoteError, RemoteResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Prefix of in-flight upload files, hidden from listings
const UPLOAD_PREFIX: &str = ".upload-";

/// A bucket stored as a directory tree
#[derive(Debug, Clone)]
pub struct LocalStore {
    bucket: String,
    dir: PathBuf,
}

impl LocalStore {
    /// Open `bucket` under `root`; the directory is created on first upload
    pub fn open(root: impl AsRef<Path>, bucket: &str) -> RemoteResult<Self> {
        if bucket.is_empty()
            || bucket == "."
            || bucket == ".."
            || bucket.contains(['/', '\\', '\0'])
        {
            return Err(RemoteError::InvalidBucket(bucket.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            dir: root.as_ref().join(bucket),
        })
    }

    /// Directory holding this bucket's objects
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> RemoteResult<PathBuf> {
        validate_key(key)?;
        if key.split('/').any(|part| part.starts_with(UPLOAD_PREFIX)) {
            return Err(RemoteError::InvalidKey {
                key: key.to_string(),
                reason: format!("segments starting with {:?} are reserved", UPLOAD_PREFIX),
            });
        }
        Ok(self.dir.join(key))
    }
}

impl RemoteStore for LocalStore {
    fn exists(&self, key: &str) -> RemoteResult<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if is_absent(&e) => Ok(false),
            Err(e) => Err(RemoteError::io("head", key, e)),
        }
    }

    fn get(&self, key: &str) -> RemoteResult<Option<Box<dyn Read>>> {
        let path = self.object_path(key)?;
        match File::open(&path) {
            Ok(file) => {
                if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
                    return Ok(None);
                }
                debug!(bucket = %self.bucket, key, "Opened object");
                Ok(Some(Box::new(file)))
            }
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(RemoteError::io("get", key, e)),
        }
    }

    fn put(&self, key: &str, body: &mut dyn Read, content_md5: &str) -> RemoteResult<u64> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RemoteError::io("put", key, e))?;
        }

        let mut upload = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| RemoteError::io("put", key, e))?;

        let mut hasher = Md5::new();
        let mut size = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = body.read(&mut buf).map_err(|e| RemoteError::io("put", key, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            upload
                .write_all(&buf[..n])
                .map_err(|e| RemoteError::io("put", key, e))?;
            size += n as u64;
        }
        upload
            .as_file()
            .sync_all()
            .map_err(|e| RemoteError::io("put", key, e))?;

        let actual = STANDARD.encode(hasher.finalize());
        if actual != content_md5 {
            return Err(RemoteError::Integrity {
                key: key.to_string(),
                expected: content_md5.to_string(),
                actual,
            });
        }

        upload
            .persist(&path)
            .map_err(|e| RemoteError::io("put", key, e.error))?;
        debug!(bucket = %self.bucket, key, size, "Stored object");
        Ok(size)
    }

    fn list_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<ObjectSummary>> {
        if prefix.starts_with('/') || prefix.split('/').any(|p| p == "..") {
            return Err(RemoteError::InvalidKey {
                key: prefix.to_string(),
                reason: "prefix must stay inside the bucket".to_string(),
            });
        }

        // Only the directory part of the prefix narrows the walk
        let start = match prefix.rfind('/') {
            Some(pos) => self.dir.join(&prefix[..pos]),
            None => self.dir.clone(),
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| RemoteError::io("list", prefix, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.dir) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) || key.split('/').any(|p| p.starts_with(UPLOAD_PREFIX)) {
                continue;
            }

            let meta = entry.metadata().map_err(|e| RemoteError::io("list", &key, e.into()))?;
            let last_modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .map_err(|e| RemoteError::io("list", &key, e))?;
            objects.push(ObjectSummary {
                key,
                last_modified,
                size: meta.len(),
            });
        }

        debug!(bucket = %self.bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    fn describe(&self) -> String {
        format!("bucket {} ({})", self.bucket, self.dir.display())
    }
}

/// Missing objects, including a file standing where a directory is expected
fn is_absent(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
