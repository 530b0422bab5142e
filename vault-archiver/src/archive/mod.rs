//! Archive engine.
//!
//! Produces one timestamped archive per vault under
//! `<destination root>/<vault basename>/`. Entries are named relative to the
//! vault root, so extracting anywhere reproduces the vault's inner layout.
//!
//! ```text
//! ~/archive/
//!   notes/
//!     2024-03-05T07:08:09+01:00.tar.gz
//!     2024-03-06T07:08:11+01:00.tar.gz
//! ```

pub mod tarball;
pub mod zipfile;

use crate::fs::{walk_vault, EntryKind, EntryMetadata, WalkOptions};
use crate::utils::format::{format_bytes, format_duration};
use crate::utils::{ArchiverError, Result};
use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tarball::TarEntryWriter;
use tracing::{debug, info, warn};
use zipfile::ZipEntryWriter;

/// Output encoding of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Tar, ArchiveFormat::TarGz, ArchiveFormat::Zip];

    /// Map the numeric selector used in configuration files.
    /// Unknown selectors fall back to tar.gz.
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            0 => ArchiveFormat::Tar,
            1 => ArchiveFormat::TarGz,
            2 => ArchiveFormat::Zip,
            _ => ArchiveFormat::TarGz,
        }
    }

    pub fn is_known_selector(selector: u8) -> bool {
        selector <= 2
    }

    /// File extension including the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::Zip => ".zip",
        }
    }

    /// Recognise an archive by file name
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| name.len() > format.extension().len() && name.ends_with(format.extension()))
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().trim_start_matches('.'))
    }
}

/// Sink for archive entries. Implemented once per output encoding.
pub trait EntryWriter {
    /// Write a regular file: header from `meta`, then exactly `meta.size` bytes of `data`
    fn append_file(&mut self, name: &Path, meta: &EntryMetadata, data: &mut dyn Read) -> io::Result<()>;

    /// Write a symbolic link entry pointing at `target`
    fn append_symlink(&mut self, name: &Path, meta: &EntryMetadata, target: &Path) -> io::Result<()>;

    /// Write trailers innermost first and sync the file
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// One archive request for one vault
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    /// Absolute path of the vault directory
    pub source: PathBuf,

    /// Absolute archive root; the archive lands in a subdirectory named after the vault
    pub destination_root: PathBuf,

    pub format: ArchiveFormat,

    pub walk: WalkOptions,
}

impl ArchiveJob {
    pub fn new(source: impl Into<PathBuf>, destination_root: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            source: source.into(),
            destination_root: destination_root.into(),
            format,
            walk: WalkOptions::default(),
        }
    }

    pub fn with_walk_options(mut self, walk: WalkOptions) -> Self {
        self.walk = walk;
        self
    }

    /// Vault basename, e.g. `notes` for `/home/me/notes`
    pub fn vault_name(&self) -> Result<String> {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiverError::InvalidVault(self.source.clone()))
    }

    /// `<destination root>/<vault basename>`
    pub fn archive_dir(&self) -> Result<PathBuf> {
        Ok(self.destination_root.join(self.vault_name()?))
    }
}

/// Result of a successful archive run
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub files: usize,
    pub symlinks: usize,
    pub bytes: u64,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct EntryStats {
    files: usize,
    symlinks: usize,
    bytes: u64,
}

/// RFC 3339 timestamp at second resolution followed by the format's extension
pub fn archive_file_name<Tz>(timestamp: &DateTime<Tz>, format: ArchiveFormat) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!(
        "{}{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        format.extension()
    )
}

/// Create the archive file. Never reuses an existing file: two runs for the
/// same vault within one second fail the second one instead of clobbering.
fn open_archive_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| ArchiverError::FileOpen {
            path: path.to_path_buf(),
            source,
        })
}

/// Archive one vault.
///
/// On any failure after the archive file was created, the partial file is
/// removed before the error is returned.
pub fn create_archive(job: &ArchiveJob) -> Result<ArchiveOutcome> {
    let start_time = Instant::now();

    let archive_dir = job.archive_dir()?;
    fs::create_dir_all(&archive_dir).map_err(|source| ArchiverError::DirectoryCreation {
        path: archive_dir.clone(),
        source,
    })?;

    let path = archive_dir.join(archive_file_name(&Local::now(), job.format));
    let file = open_archive_file(&path)?;

    let writer: Box<dyn EntryWriter> = match job.format {
        ArchiveFormat::Tar => Box::new(TarEntryWriter::plain(file)),
        ArchiveFormat::TarGz => Box::new(TarEntryWriter::gzip(file)),
        ArchiveFormat::Zip => Box::new(ZipEntryWriter::new(file)),
    };

    let outcome = write_or_discard(job, writer, path, start_time)?;
    info!(
        "Created {} ({} files, {} symlinks, {}) in {}",
        outcome.path.display(),
        outcome.files,
        outcome.symlinks,
        format_bytes(outcome.bytes),
        format_duration(outcome.duration)
    );
    Ok(outcome)
}

/// Fill `writer` from the vault. The file at `path` is removed if that fails.
fn write_or_discard(
    job: &ArchiveJob,
    writer: Box<dyn EntryWriter>,
    path: PathBuf,
    start_time: Instant,
) -> Result<ArchiveOutcome> {
    match write_entries(job, writer, &path) {
        Ok(stats) => Ok(ArchiveOutcome {
            path,
            files: stats.files,
            symlinks: stats.symlinks,
            bytes: stats.bytes,
            duration: start_time.elapsed(),
        }),
        Err(err) => {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove partial archive {}: {}", path.display(), e);
            }
            Err(err)
        }
    }
}

/// What to prune from the walk when the archive root lies within the vault.
///
/// Normally that is the vault's whole archive directory, so earlier archives
/// are not packed again. When the archive directory is the vault itself only
/// the file being written is left out.
fn self_inclusion(source: &Path, archive_path: &Path) -> Option<PathBuf> {
    let source = fs::canonicalize(source).ok()?;
    let archive = fs::canonicalize(archive_path).ok()?;
    let archive_dir = archive.parent()?;

    match archive_dir.strip_prefix(&source) {
        Ok(relative) if !relative.as_os_str().is_empty() => Some(relative.to_path_buf()),
        _ => archive.strip_prefix(&source).ok().map(Path::to_path_buf),
    }
}

fn write_entries(job: &ArchiveJob, mut writer: Box<dyn EntryWriter>, archive_path: &Path) -> Result<EntryStats> {
    let mut stats = EntryStats::default();
    let mut walk = job.walk.clone();
    if let Some(excluded) = self_inclusion(&job.source, archive_path) {
        debug!("Archive root is inside {}, skipping {}", job.source.display(), excluded.display());
        walk.exclude.push(excluded);
    }

    walk_vault(&job.source, &walk, |entry| {
        match &entry.kind {
            EntryKind::File => {
                let traversal = |source| ArchiverError::Traversal {
                    path: entry.path.clone(),
                    source,
                };
                let mut file = File::open(&entry.path).map_err(traversal)?;
                let meta = EntryMetadata::from_metadata(&file.metadata().map_err(traversal)?);

                writer
                    .append_file(&entry.relative_path, &meta, &mut file)
                    .map_err(|source| ArchiverError::Encoding {
                        path: entry.path.clone(),
                        source,
                    })?;
                stats.files += 1;
                stats.bytes += meta.size;
            }
            EntryKind::Symlink { target } => {
                let meta = EntryMetadata::from_symlink(&entry.path).map_err(|source| ArchiverError::Traversal {
                    path: entry.path.clone(),
                    source,
                })?;

                writer
                    .append_symlink(&entry.relative_path, &meta, target)
                    .map_err(|source| ArchiverError::Encoding {
                        path: entry.path.clone(),
                        source,
                    })?;
                stats.symlinks += 1;
            }
        }

        debug!("Added {}", entry.relative_path.display());
        Ok(())
    })?;

    writer.finish().map_err(|source| ArchiverError::Encoding {
        path: archive_path.to_path_buf(),
        source,
    })?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// name -> content of every regular file in a tar stream
    fn read_tar<R: Read>(reader: R) -> io::Result<BTreeMap<String, Vec<u8>>> {
        let mut archive = tar::Archive::new(reader);
        let mut files = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            assert!(files.insert(name, content).is_none(), "duplicate entry");
        }
        Ok(files)
    }

    fn archives_in(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// vault `v1` with `a.txt`="hello" and `sub/b.txt`="world"
    fn sample_vault(root: &Path) -> PathBuf {
        let vault = root.join("v1");
        fs::create_dir_all(vault.join("sub")).unwrap();
        fs::write(vault.join("a.txt"), b"hello").unwrap();
        fs::write(vault.join("sub/b.txt"), b"world").unwrap();
        vault
    }

    #[test]
    fn test_selector_mapping() {
        assert_eq!(ArchiveFormat::from_selector(0), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::from_selector(1), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_selector(2), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_selector(7), ArchiveFormat::TarGz);
        assert!(!ArchiveFormat::is_known_selector(7));
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(ArchiveFormat::from_file_name("x.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_file_name("x.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_file_name("x.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_file_name("notes.txt"), None);
        assert_eq!(ArchiveFormat::from_file_name(".zip"), None);
    }

    #[test]
    fn test_archive_file_name() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(archive_file_name(&utc, ArchiveFormat::TarGz), "2024-03-05T07:08:09Z.tar.gz");

        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(archive_file_name(&local, ArchiveFormat::Tar), "2024-03-05T07:08:09+01:00.tar");
    }

    #[test]
    fn test_archive_dir_uses_vault_basename() -> Result<()> {
        let job = ArchiveJob::new("/home/me/notes", "/backups", ArchiveFormat::Tar);
        assert_eq!(job.archive_dir()?, PathBuf::from("/backups/notes"));
        Ok(())
    }

    #[test]
    fn test_root_vault_is_invalid() {
        let job = ArchiveJob::new("/", "/backups", ArchiveFormat::Tar);
        assert!(matches!(job.archive_dir(), Err(ArchiverError::InvalidVault(_))));
    }

    #[test]
    fn test_tar_gz_concrete_scenario() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        let dest = temp_dir.path().join("dest");

        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::TarGz))?;

        let produced = archives_in(&dest.join("v1"));
        assert_eq!(produced, vec![outcome.path.clone()]);
        let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".tar.gz"));
        assert!(DateTime::parse_from_rfc3339(name.trim_end_matches(".tar.gz")).is_ok());

        let files = read_tar(GzDecoder::new(File::open(&outcome.path).unwrap())).unwrap();
        let expected: BTreeMap<String, Vec<u8>> = [
            ("a.txt".to_string(), b"hello".to_vec()),
            ("sub/b.txt".to_string(), b"world".to_vec()),
        ]
        .into_iter()
        .collect();
        assert_eq!(files, expected);
        assert_eq!(outcome.files, 2);
        assert_eq!(outcome.bytes, 10);

        Ok(())
    }

    #[test]
    fn test_tar_round_trip_extracts_identical_tree() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = temp_dir.path().join("project");
        fs::create_dir_all(vault.join("src/nested/deep")).unwrap();
        fs::create_dir_all(vault.join("empty")).unwrap();
        let binary: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        fs::write(vault.join("README"), b"top level").unwrap();
        fs::write(vault.join("src/main.bin"), &binary).unwrap();
        fs::write(vault.join("src/nested/deep/zero.txt"), b"").unwrap();

        let dest = temp_dir.path().join("dest");
        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::Tar))?;

        let extract = temp_dir.path().join("extract");
        fs::create_dir(&extract).unwrap();
        tar::Archive::new(File::open(&outcome.path).unwrap())
            .unpack(&extract)
            .unwrap();

        assert_eq!(fs::read(extract.join("README")).unwrap(), b"top level");
        assert_eq!(fs::read(extract.join("src/main.bin")).unwrap(), binary);
        assert_eq!(fs::read(extract.join("src/nested/deep/zero.txt")).unwrap(), b"");
        // no entry carries the vault's own name
        assert!(!extract.join("project").exists());

        Ok(())
    }

    #[test]
    fn test_tar_and_tar_gz_hold_the_same_files() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        fs::write(vault.join("sub/c.bin"), vec![7u8; 4096]).unwrap();
        let dest = temp_dir.path().join("dest");

        let plain = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::Tar))?;
        let gzipped = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::TarGz))?;

        let from_plain = read_tar(File::open(&plain.path).unwrap()).unwrap();
        let from_gz = read_tar(GzDecoder::new(File::open(&gzipped.path).unwrap())).unwrap();
        assert_eq!(from_plain, from_gz);
        assert_eq!(from_plain.len(), 3);

        Ok(())
    }

    #[test]
    fn test_zip_uses_relative_names() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        let dest = temp_dir.path().join("dest");

        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::Zip))?;
        assert!(outcome.path.to_string_lossy().ends_with(".zip"));

        let mut archive = zip::ZipArchive::new(File::open(&outcome.path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);

        let mut content = String::new();
        archive.by_name("sub/b.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "world");

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_stored_as_links() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        std::os::unix::fs::symlink("a.txt", vault.join("alias")).unwrap();
        let dest = temp_dir.path().join("dest");

        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::Tar))?;
        assert_eq!(outcome.symlinks, 1);

        let mut archive = tar::Archive::new(File::open(&outcome.path).unwrap());
        let link = archive
            .entries()
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.path().map(|p| p == Path::new("alias")).unwrap_or(false))
            .expect("alias entry");
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(link.link_name().unwrap().as_deref(), Some(Path::new("a.txt")));

        Ok(())
    }

    #[test]
    fn test_missing_vault_leaves_no_partial_archive() {
        let temp_dir = TempDir::new().unwrap();
        let vault = temp_dir.path().join("gone");
        let dest = temp_dir.path().join("dest");

        let err = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::TarGz)).unwrap_err();
        assert!(err.is_traversal());
        assert!(archives_in(&dest.join("gone")).is_empty());
    }

    #[test]
    fn test_existing_archive_file_is_not_reused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2024-03-05T07:08:09Z.tar");
        fs::write(&path, b"older archive").unwrap();

        let err = open_archive_file(&path).unwrap_err();
        assert!(matches!(err, ArchiverError::FileOpen { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"older archive");
    }

    #[test]
    fn test_archive_root_inside_vault_skips_itself() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        let dest = vault.join("backups");

        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::Tar))?;
        let files = read_tar(File::open(&outcome.path).unwrap()).unwrap();
        assert_eq!(files.len(), 2);

        Ok(())
    }

    #[test]
    fn test_archive_root_inside_vault_skips_earlier_archives() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        let dest = vault.join("backups");
        fs::create_dir_all(dest.join("v1")).unwrap();
        fs::write(dest.join("v1/2024-03-05T07:08:09Z.tar"), vec![1u8; 2048]).unwrap();
        fs::write(dest.join("unrelated.txt"), b"still archived").unwrap();

        let outcome = create_archive(&ArchiveJob::new(&vault, &dest, ArchiveFormat::TarGz))?;
        let files = read_tar(GzDecoder::new(File::open(&outcome.path).unwrap())).unwrap();
        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a.txt", "backups/unrelated.txt", "sub/b.txt"]);

        Ok(())
    }

    #[test]
    fn test_archive_dir_equal_to_vault_skips_only_new_archive() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());

        // destination root is the vault's parent, so the archive lands in the vault
        let outcome = create_archive(&ArchiveJob::new(&vault, temp_dir.path(), ArchiveFormat::Tar))?;
        assert_eq!(outcome.path.parent(), Some(vault.as_path()));
        let files = read_tar(File::open(&outcome.path).unwrap()).unwrap();
        assert_eq!(files.len(), 2);

        Ok(())
    }

    /// Forwards to a real writer, then fails every file after the first `allowed`
    struct FailingAfter {
        inner: Box<dyn EntryWriter>,
        allowed: usize,
    }

    impl EntryWriter for FailingAfter {
        fn append_file(&mut self, name: &Path, meta: &EntryMetadata, data: &mut dyn Read) -> io::Result<()> {
            if self.allowed == 0 {
                return Err(io::Error::other("disk full"));
            }
            self.allowed -= 1;
            self.inner.append_file(name, meta, data)
        }

        fn append_symlink(&mut self, name: &Path, meta: &EntryMetadata, target: &Path) -> io::Result<()> {
            self.inner.append_symlink(name, meta, target)
        }

        fn finish(self: Box<Self>) -> io::Result<()> {
            self.inner.finish()
        }
    }

    #[test]
    fn test_failure_mid_walk_removes_partial_archive() {
        let temp_dir = TempDir::new().unwrap();
        let vault = sample_vault(temp_dir.path());
        fs::write(vault.join("c.txt"), vec![b'c'; 64 * 1024]).unwrap();
        let dest = temp_dir.path().join("dest");
        let job = ArchiveJob::new(&vault, &dest, ArchiveFormat::TarGz);

        let archive_dir = job.archive_dir().unwrap();
        fs::create_dir_all(&archive_dir).unwrap();
        let path = archive_dir.join("2024-03-05T07:08:09Z.tar.gz");
        let writer = Box::new(FailingAfter {
            inner: Box::new(TarEntryWriter::gzip(open_archive_file(&path).unwrap())),
            allowed: 1,
        });

        let err = write_or_discard(&job, writer, path.clone(), Instant::now()).unwrap_err();
        assert!(matches!(err, ArchiverError::Encoding { .. }));
        assert!(!path.exists());
        assert!(archives_in(&archive_dir)
            .iter()
            .all(|p| !p.to_string_lossy().ends_with(".tar.gz")));
    }
}
