//! Run driver - archives every vault, then applies retention to it.
//!
//! Each vault gets one task. Inside that task the archive is written first
//! and retention runs only once it is complete, with the new archive
//! protected, so cleanup can neither miss nor delete it. Different vaults
//! touch disjoint directories and run in parallel, bounded by a semaphore.

pub mod report;

use crate::archive::{create_archive, ArchiveJob};
use crate::config::RunSettings;
use crate::retention::{enforce, RetentionPolicy};
use crate::utils::{ArchiverError, Result};
pub use report::{RunSummary, Stage, VaultReport, VaultStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run a blocking filesystem job on the blocking pool.
/// A panic inside `f` comes back as [`ArchiverError::Task`].
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

enum Pending {
    Done(VaultReport),
    Running(PathBuf, JoinHandle<VaultReport>),
}

/// Main run executor
pub struct BackupExecutor {
    retention: RetentionPolicy,
    /// `None` means every vault starts immediately
    semaphore: Option<Arc<Semaphore>>,
}

impl BackupExecutor {
    /// `max_concurrent_jobs == 0` disables the bound
    pub fn new(retention: RetentionPolicy, max_concurrent_jobs: usize) -> Self {
        let semaphore = (max_concurrent_jobs > 0).then(|| Arc::new(Semaphore::new(max_concurrent_jobs)));
        Self { retention, semaphore }
    }

    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(settings.retention, settings.max_concurrent_jobs)
    }

    /// Archive and clean up every vault; never fails as a whole.
    ///
    /// Vaults sharing an archive directory (same basename) would overwrite
    /// each other's history, so every one after the first is rejected.
    pub async fn execute(&self, jobs: Vec<ArchiveJob>) -> RunSummary {
        let start_time = Instant::now();

        info!(
            "Starting run for {} vault(s) (retention: {}, concurrency: {})",
            jobs.len(),
            self.retention.limit,
            self.semaphore
                .as_ref()
                .map(|s| s.available_permits().to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );

        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut pending = Vec::with_capacity(jobs.len());

        for job in jobs {
            let vault = job.source.clone();

            if let Ok(dir) = job.archive_dir() {
                if let Some(first) = claimed.get(&dir) {
                    let error = ArchiverError::Config(format!(
                        "{} shares archive directory {} with {}",
                        vault.display(),
                        dir.display(),
                        first.display()
                    ));
                    pending.push(Pending::Done(VaultReport::failed(vault, Stage::Archive, error)));
                    continue;
                }
                claimed.insert(dir, vault.clone());
            }

            let handle = tokio::spawn(run_vault(job, self.retention, self.semaphore.clone()));
            pending.push(Pending::Running(vault, handle));
        }

        let mut reports = Vec::with_capacity(pending.len());
        for entry in pending {
            let report = match entry {
                Pending::Done(report) => report,
                Pending::Running(vault, handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => VaultReport::failed(vault, Stage::Archive, e.into()),
                },
            };
            reports.push(report);
        }

        RunSummary {
            reports,
            elapsed: start_time.elapsed(),
        }
    }
}

/// Archive one vault, then enforce retention on its archive directory
async fn run_vault(job: ArchiveJob, retention: RetentionPolicy, semaphore: Option<Arc<Semaphore>>) -> VaultReport {
    let vault = job.source.clone();

    let _permit = match semaphore {
        Some(sem) => match sem.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                let error = ArchiverError::Task(format!("semaphore closed: {}", e));
                return VaultReport::failed(vault, Stage::Archive, error);
            }
        },
        None => None,
    };

    let archive_dir = match job.archive_dir() {
        Ok(dir) => dir,
        Err(e) => return failed(vault, Stage::Archive, e),
    };

    info!("Archiving {} as {}", vault.display(), job.format);
    let outcome = match blocking(move || create_archive(&job)).await {
        Ok(outcome) => outcome,
        // no new archive, so old ones are left alone
        Err(e) => return failed(vault, Stage::Archive, e),
    };

    let protect = outcome.path.clone();
    match blocking(move || enforce(&archive_dir, &retention, Some(&protect))).await {
        Ok(evicted) => VaultReport::succeeded(vault, outcome, evicted),
        Err(e) => {
            let mut report = failed(vault, Stage::Cleanup, e);
            report.archive = Some(outcome);
            report
        }
    }
}

fn failed(vault: PathBuf, stage: Stage, error: ArchiverError) -> VaultReport {
    warn!("{} failed during {}: {}", vault.display(), stage, error);
    VaultReport::failed(vault, stage, error)
}
