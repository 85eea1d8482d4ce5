//! Store and restore pipelines
//!
//! Store: resolve key, skip if present, archive + compress into a scratch
//! file, upload with its digest. Restore: match candidates, extract into a
//! scratch directory, relocate subtrees. Scratch directories are removed on
//! every exit path when the `TempDir` guard drops.

use crate::cache::archive::Archiver;
use crate::cache::compress::Compressor;
use crate::cache::extract::{extract, relocate};
use crate::cache::manifest::Manifest;
use crate::cache::matcher::{object_key, CacheKeyMatcher, MatchKind};
use crate::cache::template::TemplateResolver;
use crate::config::schema::ArchiveConfig;
use crate::error::{StowawayError, StowawayResult};
use crate::store::{content_md5, RemoteStore};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{debug, info};

/// File name of the compressed artifact inside the scratch directory
const ARTIFACT_NAME: &str = "cache.tar.gz";

/// Everything a store or restore needs, passed explicitly
pub struct CacheContext<'a> {
    pub store: &'a dyn RemoteStore,
    pub resolver: &'a TemplateResolver,
    pub archive: &'a ArchiveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The resolved key was already stored; nothing was uploaded
    AlreadyExists { key: String },
    Stored {
        key: String,
        object_key: String,
        size: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No candidate matched; nothing on disk changed
    Miss,
    Restored {
        key: String,
        object_key: String,
        kind: MatchKind,
        paths: Vec<PathBuf>,
    },
}

/// Archive `paths` under the key resolved from `template`
pub fn store(ctx: &CacheContext<'_>, template: &str, paths: &[String]) -> StowawayResult<StoreOutcome> {
    if paths.is_empty() {
        return Err(StowawayError::User("at least one path to cache is required".to_string()));
    }

    let key = ctx.resolver.resolve(template)?;
    let object = object_key(&key);
    if ctx.store.exists(&object)? {
        info!(key = %key, "Cache already exists, skipping upload");
        return Ok(StoreOutcome::AlreadyExists { key });
    }

    let scratch = scratch_dir(ctx.archive)?;
    let artifact = scratch.path().join(ARTIFACT_NAME);
    let file = File::create(&artifact)
        .map_err(|e| StowawayError::archive(format!("creating {}", artifact.display()), e))?;

    let working_dir = ctx.resolver.context().working_dir();
    let compressor = Compressor::new(BufWriter::new(file), ctx.archive.compression_level);
    let (compressor, manifest) = Archiver::new(working_dir).create_archive(paths, compressor)?;
    let file = compressor
        .finish()?
        .into_inner()
        .map_err(|e| StowawayError::archive("flushing compressed archive", e.into_error()))?;
    file.sync_all()
        .map_err(|e| StowawayError::archive(format!("syncing {}", artifact.display()), e))?;
    drop(file);
    debug!(key = %key, paths = manifest.paths.len(), "Archive written");

    let reopen = || {
        File::open(&artifact)
            .map_err(|e| StowawayError::archive(format!("opening {}", artifact.display()), e))
    };
    let digest = content_md5(&mut BufReader::new(reopen()?))
        .map_err(|e| StowawayError::archive(format!("hashing {}", artifact.display()), e))?;
    let size = ctx.store.put(&object, &mut BufReader::new(reopen()?), &digest)?;

    info!(key = %key, object = %object, size, "Cache stored");
    Ok(StoreOutcome::Stored {
        key,
        object_key: object,
        size,
    })
}

/// Restore the first artifact matching `templates`, in order
pub fn restore(ctx: &CacheContext<'_>, templates: &[String]) -> StowawayResult<RestoreOutcome> {
    let matcher = CacheKeyMatcher::new(ctx.store, ctx.resolver);
    let Some(hit) = matcher.find(templates)? else {
        info!("No cache found for any candidate key");
        return Ok(RestoreOutcome::Miss);
    };

    let scratch = scratch_dir(ctx.archive)?;
    let dest = scratch.path().join("extract");
    fs::create_dir(&dest)
        .map_err(|e| StowawayError::extraction(format!("creating {}", dest.display()), e))?;

    extract(BufReader::new(hit.body), &dest)?;
    let manifest = Manifest::read_from(&dest)?;
    let paths = relocate(&dest, &manifest, ctx.resolver.context().working_dir())?;

    info!(key = %hit.key, object = %hit.object_key, kind = %hit.kind, "Cache restored");
    Ok(RestoreOutcome::Restored {
        key: hit.key,
        object_key: hit.object_key,
        kind: hit.kind,
        paths,
    })
}

/// Per-invocation scratch directory, removed when the guard drops
fn scratch_dir(config: &ArchiveConfig) -> StowawayResult<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("stowaway-");
    let result = match &config.work_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .map_err(|e| StowawayError::io(format!("creating {}", dir.display()), e))?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    };
    result.map_err(|e| StowawayError::io("creating scratch directory", e))
}
