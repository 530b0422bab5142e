//! Tar and gzip-wrapped tar output.

use super::EntryWriter;
use crate::fs::EntryMetadata;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};

/// Byte sink underneath the tar encoder
pub enum TarStream {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl TarStream {
    /// Write trailers and hand back the file. Gzip is finished before the
    /// buffer is flushed so the member trailer lands in the file.
    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            TarStream::Plain(w) => w,
            TarStream::Gzip(gz) => gz.finish()?,
        };
        buffered.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl Write for TarStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarStream::Plain(w) => w.write(buf),
            TarStream::Gzip(gz) => gz.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarStream::Plain(w) => w.flush(),
            TarStream::Gzip(gz) => gz.flush(),
        }
    }
}

/// Tar encoder over a plain or gzip stream
pub struct TarEntryWriter {
    builder: Builder<TarStream>,
}

impl TarEntryWriter {
    pub fn plain(file: File) -> Self {
        Self::new(TarStream::Plain(BufWriter::new(file)))
    }

    pub fn gzip(file: File) -> Self {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Self::new(TarStream::Gzip(encoder))
    }

    fn new(stream: TarStream) -> Self {
        Self {
            builder: Builder::new(stream),
        }
    }
}

fn header_for(kind: EntryType, meta: &EntryMetadata) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(meta.size);
    header.set_mode(meta.mode);
    header.set_mtime(meta.modified);
    header
}

impl EntryWriter for TarEntryWriter {
    fn append_file(&mut self, name: &Path, meta: &EntryMetadata, data: &mut dyn Read) -> io::Result<()> {
        let mut header = header_for(EntryType::Regular, meta);
        // The body must match the header size exactly. A file that shrank
        // after its metadata was read is zero-padded, one that grew is cut.
        let body = data.chain(io::repeat(0)).take(meta.size);
        self.builder.append_data(&mut header, name, body)
    }

    fn append_symlink(&mut self, name: &Path, meta: &EntryMetadata, target: &Path) -> io::Result<()> {
        let mut header = header_for(EntryType::Symlink, meta);
        header.set_size(0);
        self.builder.append_link(&mut header, name, target)
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        // tar end-of-archive blocks, then gzip trailer, then the buffer
        let stream = self.builder.into_inner()?;
        let file = stream.finish()?;
        file.sync_all()
    }
}
