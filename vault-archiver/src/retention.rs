//! Count-based archive retention.
//!
//! A pass looks at the archives in one vault's archive directory and, when
//! there are at least `limit` of them, deletes the single one with the oldest
//! modification time. Growth faster than one archive per run therefore keeps
//! the directory over the limit unless [`EvictionMode::UntilWithinLimit`] is
//! configured.

use crate::archive::ArchiveFormat;
use crate::utils::{ArchiverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionMode {
    /// One deletion per run at most
    #[default]
    Single,
    /// Keep evicting until at most `limit` archives remain
    UntilWithinLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of archives kept per vault
    pub limit: usize,
    pub mode: EvictionMode,
    /// Log evictions at info instead of debug
    pub verbose: bool,
}

impl RetentionPolicy {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            mode: EvictionMode::default(),
            verbose: false,
        }
    }
}

/// An archive considered for eviction
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
}

/// Archives in `dir` in enumeration order, plus how many there are in total
/// (including `protect`, which is never returned as a candidate).
fn scan(dir: &Path, protect: Option<&Path>) -> Result<(usize, Vec<Candidate>)> {
    let entries = fs::read_dir(dir).map_err(|source| ArchiverError::DirectoryList {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut count = 0;
    let mut candidates = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|source| ArchiverError::DirectoryList {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let metadata_err = |source| ArchiverError::Metadata {
            path: path.clone(),
            source,
        };

        let file_name = entry.file_name();
        if ArchiveFormat::from_file_name(&file_name.to_string_lossy()).is_none() {
            continue;
        }
        if !entry.file_type().map_err(metadata_err)?.is_file() {
            continue;
        }

        count += 1;
        if protect == Some(path.as_path()) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(metadata_err)?;
        candidates.push(Candidate { path, modified });
    }

    Ok((count, candidates))
}

/// First candidate with the smallest mtime; later ties never replace it.
fn oldest(candidates: &[Candidate]) -> Option<&Candidate> {
    let mut iter = candidates.iter();
    let mut best = iter.next()?;
    for candidate in iter {
        if candidate.modified < best.modified {
            best = candidate;
        }
    }
    Some(best)
}

/// Delete the oldest candidate once the directory holds `evict_at` or more
/// archives. `limit` is only reported.
fn single_pass(
    dir: &Path,
    limit: usize,
    evict_at: usize,
    verbose: bool,
    protect: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let (count, candidates) = scan(dir, protect)?;
    if count < evict_at {
        debug!("{}: {} archive(s), limit {}, nothing to clean", dir.display(), count, limit);
        return Ok(None);
    }

    let Some(victim) = oldest(&candidates) else {
        return Ok(None);
    };

    if verbose {
        info!("Retention cap [[ {} ]] exceeded - Cleaning up {}...", limit, dir.display());
    }

    fs::remove_file(&victim.path).map_err(|source| ArchiverError::Deletion {
        path: victim.path.clone(),
        source,
    })?;

    if verbose {
        info!("Removed {}", victim.path.display());
    } else {
        debug!("Removed {}", victim.path.display());
    }

    Ok(Some(victim.path.clone()))
}

/// Single retention pass over one archive directory.
///
/// Deletes the oldest archive when the directory holds `limit` or more of
/// them and returns its path. Fewer than `limit` archives is a no-op.
pub fn cleanup(dir: &Path, limit: usize, verbose: bool) -> Result<Option<PathBuf>> {
    single_pass(dir, limit, limit, verbose, None)
}

/// Apply `policy` to one archive directory. `protect` (normally the archive
/// just written) counts toward the limit but is never deleted.
///
/// The first pass is the same as [`cleanup`]. In
/// [`EvictionMode::UntilWithinLimit`] further passes run only while more
/// than `limit` archives remain.
///
/// Returns every deleted path, oldest first.
pub fn enforce(dir: &Path, policy: &RetentionPolicy, protect: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut evict_at = policy.limit;

    loop {
        match single_pass(dir, policy.limit, evict_at, policy.verbose, protect)? {
            Some(path) => removed.push(path),
            None => break,
        }
        if policy.mode == EvictionMode::Single {
            break;
        }
        evict_at = policy.limit.saturating_add(1);
    }

    Ok(removed)
}
