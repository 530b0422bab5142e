//! Vault traversal.
//!
//! Walks a vault depth-first and hands every regular file (and, depending on
//! the symlink policy, every symlink) to a callback together with its path
//! relative to the vault root. Directories are not reported; they are implied
//! by the relative paths of their contents.

use crate::utils::{ArchiverError, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// What to do with symbolic links found inside a vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymlinkPolicy {
    /// Store the link itself (name and target), never the target's content
    #[default]
    Preserve,
    /// Leave symlinks out of the archive
    Skip,
}

/// Options for vault walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub symlinks: SymlinkPolicy,

    /// Paths relative to the vault root that are pruned, subtree included
    pub exclude: Vec<PathBuf>,
}

impl WalkOptions {
    fn is_excluded(&self, relative_path: &Path) -> bool {
        self.exclude.iter().any(|excluded| relative_path.starts_with(excluded))
    }
}

/// Kind of entry handed to the archive writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink { target: PathBuf },
}

/// An entry discovered during walking
#[derive(Debug, Clone)]
pub struct VaultEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Path relative to the vault root, never empty
    pub relative_path: PathBuf,

    pub kind: EntryKind,
}

impl VaultEntry {
    /// Classify a walkdir entry. Returns `None` for entries that are not archived.
    fn from_entry(entry: &DirEntry, root: &Path, options: &WalkOptions) -> Result<Option<Self>> {
        let file_type = entry.file_type();
        let path = entry.path().to_path_buf();

        let kind = if file_type.is_symlink() {
            if options.symlinks == SymlinkPolicy::Skip {
                debug!("Skipping symlink {}", path.display());
                return Ok(None);
            }
            let target = std::fs::read_link(&path).map_err(|source| ArchiverError::Traversal {
                path: path.clone(),
                source,
            })?;
            EntryKind::Symlink { target }
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            // directories, sockets, fifos, devices
            return Ok(None);
        };

        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .map_err(|_| ArchiverError::Traversal {
                path: path.clone(),
                source: io::Error::other("entry escaped the vault root"),
            })?;

        Ok(Some(Self {
            path,
            relative_path,
            kind,
        }))
    }
}

/// Walk a vault with a callback for each archivable entry.
///
/// Sibling order is whatever the filesystem enumerates. The walk stops at the
/// first error, whether it comes from the traversal or from the callback.
///
/// # Example
/// ```no_run
/// use vault_archiver::fs::walker::{walk_vault, WalkOptions};
/// use std::path::Path;
///
/// let mut count = 0;
/// walk_vault(Path::new("/home/me/notes"), &WalkOptions::default(), |_| {
///     count += 1;
///     Ok(())
/// }).unwrap();
/// println!("Found {} entries", count);
/// ```
pub fn walk_vault<F>(root: &Path, options: &WalkOptions, mut callback: F) -> Result<()>
where
    F: FnMut(&VaultEntry) -> Result<()>,
{
    let root_meta = std::fs::metadata(root).map_err(|source| ArchiverError::Traversal {
        path: root.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(ArchiverError::Traversal {
            path: root.to_path_buf(),
            source: io::Error::other("vault is not a directory"),
        });
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(root) {
            Ok(relative) => !options.is_excluded(relative),
            Err(_) => true,
        });

    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            ArchiverError::Traversal {
                path,
                source: io::Error::from(err),
            }
        })?;

        if let Some(vault_entry) = VaultEntry::from_entry(&entry, root, options)? {
            callback(&vault_entry)?;
        }
    }

    Ok(())
}
