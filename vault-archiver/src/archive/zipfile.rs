//! Zip output.

use super::EntryWriter;
use crate::fs::EntryMetadata;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub struct ZipEntryWriter {
    writer: ZipWriter<BufWriter<File>>,
}

impl ZipEntryWriter {
    pub fn new(file: File) -> Self {
        Self {
            writer: ZipWriter::new(BufWriter::new(file)),
        }
    }
}

/// Zip names always use `/`, whatever the host separator is.
fn zip_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `None` for timestamps zip cannot represent (before 1980 or after 2107)
fn zip_time(local: NaiveDateTime) -> Option<DateTime> {
    let year = u16::try_from(local.year()).ok()?;
    DateTime::from_date_and_time(
        year,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn options_for(meta: &EntryMetadata) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(meta.mode)
        .large_file(meta.size >= u64::from(u32::MAX));

    match meta.modified_local().and_then(zip_time) {
        Some(time) => options.last_modified_time(time),
        None => options,
    }
}

impl EntryWriter for ZipEntryWriter {
    fn append_file(&mut self, name: &Path, meta: &EntryMetadata, data: &mut dyn Read) -> io::Result<()> {
        self.writer.start_file(zip_name(name), options_for(meta))?;
        io::copy(&mut data.take(meta.size), &mut self.writer)?;
        Ok(())
    }

    fn append_symlink(&mut self, name: &Path, meta: &EntryMetadata, target: &Path) -> io::Result<()> {
        let target = target.to_string_lossy().into_owned();
        self.writer
            .add_symlink(zip_name(name), target, options_for(meta))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        let buffered = self.writer.finish()?;
        let file = buffered.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()
    }
}
