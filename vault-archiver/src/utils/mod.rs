//! Utility modules for the vault archiver.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{ArchiverError, Result};
