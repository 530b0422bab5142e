//! Configuration management for the vault archiver.
//!
//! Loads configuration from a TOML file. When no file exists yet a default
//! one is written so the user has something to edit.

use crate::archive::{ArchiveFormat, ArchiveJob};
use crate::fs::{SymlinkPolicy, WalkOptions};
use crate::retention::{EvictionMode, RetentionPolicy};
use crate::utils::{ArchiverError, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directories to archive, in processing order
    pub vault_paths: Vec<String>,

    /// Archive root; one subdirectory per vault is kept below it
    pub archive_path: String,

    /// 0 = tar, 1 = tar.gz, 2 = zip, anything else = tar.gz
    #[serde(default = "default_archive_type")]
    pub archive_type: u8,

    /// Archives kept per vault
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Log retention evictions at info level
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Vaults processed at the same time (0 = all at once)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default)]
    pub eviction: EvictionMode,

    #[serde(default)]
    pub symlinks: SymlinkPolicy,
}

// Default values
fn default_archive_type() -> u8 {
    1
}

fn default_retention() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    4
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            eviction: EvictionMode::default(),
            symlinks: SymlinkPolicy::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vault_paths: vec!["~/example".to_string(), "~/directories".to_string()],
            archive_path: "~/archive".to_string(),
            archive_type: default_archive_type(),
            retention: default_retention(),
            verbose: false,
            log: LogConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

/// Everything the driver needs, with paths already absolute
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub jobs: Vec<ArchiveJob>,
    pub retention: RetentionPolicy,
    pub max_concurrent_jobs: usize,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArchiverError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| ArchiverError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write this configuration to `path`, creating parent directories.
    /// Refuses to overwrite an existing file.
    pub fn write_new(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ArchiverError::Config(format!("{} already exists", path.display())));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArchiverError::DirectoryCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ArchiverError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| ArchiverError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    pub fn archive_format(&self) -> ArchiveFormat {
        if !ArchiveFormat::is_known_selector(self.archive_type) {
            warn!(
                "Unknown archive_type {}, defaulting to .tar.gz",
                self.archive_type
            );
        }
        ArchiveFormat::from_selector(self.archive_type)
    }

    /// Resolve paths and build one archive job per vault
    pub fn resolve(&self) -> Result<RunSettings> {
        let destination_root = resolve_path(&self.archive_path)?;
        let format = self.archive_format();
        let walk = WalkOptions {
            symlinks: self.performance.symlinks,
            ..Default::default()
        };

        let jobs = self
            .vault_paths
            .iter()
            .map(|vault| {
                Ok(ArchiveJob::new(resolve_path(vault)?, destination_root.clone(), format)
                    .with_walk_options(walk.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RunSettings {
            jobs,
            retention: RetentionPolicy {
                limit: self.retention,
                mode: self.performance.eviction,
                verbose: self.verbose,
            },
            max_concurrent_jobs: self.performance.max_concurrent_jobs,
        })
    }
}

/// Platform default, e.g. `~/.config/vault-archiver/config.toml` on Linux
pub fn default_config_path() -> Result<PathBuf> {
    ProjectDirs::from("", "", "vault-archiver")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or_else(|| ArchiverError::Config("cannot determine configuration directory".to_string()))
}

/// Expand a leading `~` against `home`
fn expand_tilde(path: &str, home: Option<&Path>) -> Result<PathBuf> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return Ok(PathBuf::from(path)),
    };
    let home = home.ok_or_else(|| ArchiverError::Config(format!("cannot expand {}: no home directory", path)))?;
    Ok(home.join(rest.trim_start_matches(&['/', '\\'][..])))
}

/// Expand `~` and make the result absolute against the working directory
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let base_dirs = BaseDirs::new();
    let expanded = expand_tilde(path.trim(), base_dirs.as_ref().map(BaseDirs::home_dir))?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir()
        .map_err(|e| ArchiverError::Config(format!("cannot resolve {}: {}", path, e)))?;
    Ok(cwd.join(expanded))
}
