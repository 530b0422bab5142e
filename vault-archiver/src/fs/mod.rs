//! File system access: vault traversal and entry metadata.

pub mod metadata;
pub mod walker;

pub use metadata::EntryMetadata;
pub use walker::{walk_vault, EntryKind, SymlinkPolicy, VaultEntry, WalkOptions};
