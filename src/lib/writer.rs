//! Sinks that persist reads, and the seam through which routing stages open new ones.
//!
//! Stages never open files directly.  Static outputs are opened once when a pipeline is built,
//! dynamic outputs (one per adapter name) are opened lazily by the demultiplexers through an
//! [`OutputOpener`], which lets them recover from running out of file descriptors.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use bgzf::CompressionLevel;
use seq_io::{fasta, fastq};

use crate::{record::SequenceRecord, utils};

/// The buffer size used for each output file.
pub const BUFSIZE: usize = 64 * 1024;

/// The BGZF compression level used for `.gz` outputs.
const COMPRESSION_LEVEL: u8 = 3;

/// A sink for single reads.
pub trait SequenceWriter {
    /// Persist one read.
    fn write(&mut self, read: &SequenceRecord) -> io::Result<()>;
    /// Flush and release the underlying resources.  Calling this more than once is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// A sink for read pairs.
pub trait PairedSequenceWriter {
    /// Persist both mates of a pair.
    fn write(&mut self, read1: &SequenceRecord, read2: &SequenceRecord) -> io::Result<()>;
    /// Flush and release the underlying resources.  Calling this more than once is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens new [`SequenceWriter`]s for output paths that are only known at runtime.
pub trait OutputOpener {
    /// Open a writer for `path`, writing FASTQ if `qualities` is true and FASTA otherwise.
    ///
    /// The error must be returned as-is so that running out of file descriptors can be detected.
    fn open(&self, path: &Path, qualities: bool) -> io::Result<Box<dyn SequenceWriter>>;

    /// Try to raise the soft limit on open files by `increment`.
    fn raise_open_files_limit(&self, increment: u64) -> io::Result<()> {
        utils::raise_open_files_limit(increment)
    }
}

/// The default [`OutputOpener`], creating a [`FastxWriter`] on the file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastxOpener;

impl OutputOpener for FastxOpener {
    fn open(&self, path: &Path, qualities: bool) -> io::Result<Box<dyn SequenceWriter>> {
        Ok(Box::new(FastxWriter::create(path, qualities)?))
    }
}

/// Passes writes through until the first I/O error, then discards everything.
///
/// [`bgzf::Writer`] flushes again when dropped and panics if that fails, so the sink beneath it
/// must not fail a second time once an error has been returned to the caller.
struct FusedWriter<W: Write> {
    inner: W,
    failed: bool,
}

impl<W: Write> FusedWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, failed: false }
    }

    fn trip(&mut self, e: io::Error) -> io::Error {
        self.failed = true;
        e
    }
}

impl<W: Write> Write for FusedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failed {
            return Ok(buf.len());
        }
        match self.inner.write(buf) {
            Err(e) => Err(self.trip(e)),
            ok => ok,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.failed {
            return Ok(());
        }
        match self.inner.flush() {
            Err(e) => Err(self.trip(e)),
            ok => ok,
        }
    }
}

/// Writes reads as FASTQ or FASTA, BGZF compressed when the path ends in `.gz`.
pub struct FastxWriter {
    /// The path being written, used in error messages.
    path: PathBuf,
    /// The open sink, `None` once closed.
    inner: Option<Box<dyn Write>>,
    /// If true write FASTQ, otherwise FASTA.
    qualities: bool,
}

impl FastxWriter {
    /// Wrap an already open sink.
    pub fn new(inner: Box<dyn Write>, path: impl AsRef<Path>, qualities: bool) -> Self {
        Self { path: path.as_ref().to_path_buf(), inner: Some(inner), qualities }
    }

    /// Create (or truncate) the file at `path`.
    ///
    /// The error from creating the file is returned unchanged.
    pub fn create(path: impl AsRef<Path>, qualities: bool) -> io::Result<Self> {
        let path = path.as_ref();
        let file = BufWriter::with_capacity(BUFSIZE, File::create(path)?);
        let inner: Box<dyn Write> = if path.extension().map_or(false, |ext| ext == "gz") {
            let level = CompressionLevel::new(COMPRESSION_LEVEL)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            Box::new(bgzf::Writer::new(FusedWriter::new(file), level))
        } else {
            Box::new(file)
        };
        Ok(Self::new(inner, path, qualities))
    }

    /// The path this writer writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the writer writes FASTQ, false for FASTA.
    pub fn qualities(&self) -> bool {
        self.qualities
    }
}

impl SequenceWriter for FastxWriter {
    fn write(&mut self, read: &SequenceRecord) -> io::Result<()> {
        let writer = self.inner.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Writer for {} is already closed", self.path.to_string_lossy()),
            )
        })?;
        if self.qualities {
            let qual = read.qualities.as_deref().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "Read {} has no qualities but {} is a FASTQ output",
                        read.name_str(),
                        self.path.to_string_lossy()
                    ),
                )
            })?;
            fastq::write_to(writer, &read.name, &read.sequence, qual)
        } else {
            fasta::write_to(writer, &read.name, &read.sequence)
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Pairs two [`SequenceWriter`]s, one per mate.
pub struct PairedFastxWriter {
    first: Box<dyn SequenceWriter>,
    second: Box<dyn SequenceWriter>,
}

impl PairedFastxWriter {
    /// Create a new [`PairedFastxWriter`] from the writers for read 1 and read 2.
    pub fn new(first: Box<dyn SequenceWriter>, second: Box<dyn SequenceWriter>) -> Self {
        Self { first, second }
    }

    /// Create both files, see [`FastxWriter::create`].
    pub fn create(
        path1: impl AsRef<Path>,
        path2: impl AsRef<Path>,
        qualities: bool,
    ) -> io::Result<Self> {
        Ok(Self::new(
            Box::new(FastxWriter::create(path1, qualities)?),
            Box::new(FastxWriter::create(path2, qualities)?),
        ))
    }
}

impl PairedSequenceWriter for PairedFastxWriter {
    fn write(&mut self, read1: &SequenceRecord, read2: &SequenceRecord) -> io::Result<()> {
        self.first.write(read1)?;
        self.second.write(read2)
    }

    fn close(&mut self) -> io::Result<()> {
        let first = self.first.close();
        let second = self.second.close();
        first.and(second)
    }
}
