//! Vault Archiver Library
//!
//! Backs up configured directories ("vaults") into timestamped tar, tar.gz
//! or zip archives and keeps a bounded number of archives per vault.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use archive::{create_archive, ArchiveFormat, ArchiveJob, ArchiveOutcome};
pub use config::Config;
pub use executor::{BackupExecutor, RunSummary};
pub use retention::{cleanup, enforce, EvictionMode, RetentionPolicy};
pub use utils::errors::ArchiverError;
pub type Result<T> = std::result::Result<T, ArchiverError>;
