//! Per-vault outcomes and the end-of-run summary.

use crate::archive::ArchiveOutcome;
use crate::utils::format::{format_bytes, format_duration};
use crate::utils::ArchiverError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Step of a vault's run that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Archive,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Archive => f.write_str("archive"),
            Stage::Cleanup => f.write_str("cleanup"),
        }
    }
}

#[derive(Debug)]
pub enum VaultStatus {
    Succeeded,
    Failed { stage: Stage, error: ArchiverError },
}

#[derive(Debug)]
pub struct VaultReport {
    pub vault: PathBuf,

    /// Present whenever the archive step finished, even if cleanup then failed
    pub archive: Option<ArchiveOutcome>,

    /// Archives deleted by retention
    pub evicted: Vec<PathBuf>,

    pub status: VaultStatus,
}

impl VaultReport {
    pub fn succeeded(vault: PathBuf, archive: ArchiveOutcome, evicted: Vec<PathBuf>) -> Self {
        Self {
            vault,
            archive: Some(archive),
            evicted,
            status: VaultStatus::Succeeded,
        }
    }

    pub fn failed(vault: PathBuf, stage: Stage, error: ArchiverError) -> Self {
        Self {
            vault,
            archive: None,
            evicted: Vec::new(),
            status: VaultStatus::Failed { stage, error },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, VaultStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&ArchiverError> {
        match &self.status {
            VaultStatus::Succeeded => None,
            VaultStatus::Failed { error, .. } => Some(error),
        }
    }
}

/// Result of one run over all configured vaults
#[derive(Debug)]
pub struct RunSummary {
    /// One report per vault, in configuration order
    pub reports: Vec<VaultReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// One line per vault, then the totals
    pub fn log(&self) {
        for report in &self.reports {
            match &report.status {
                VaultStatus::Succeeded => {
                    if let Some(archive) = &report.archive {
                        info!(
                            "[ok] {} -> {} ({}, {} evicted)",
                            report.vault.display(),
                            archive.path.display(),
                            format_bytes(archive.bytes),
                            report.evicted.len()
                        );
                    }
                }
                VaultStatus::Failed { stage, error } => {
                    warn!("[failed] {} during {}: {}", report.vault.display(), stage, error);
                }
            }
        }

        info!(
            "Archive(s) created in [[ {} ]]: {} vault(s) processed, {} succeeded, {} failed",
            format_duration(self.elapsed),
            self.reports.len(),
            self.succeeded(),
            self.failed()
        );
    }
}
