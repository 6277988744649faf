//! Non-terminal stages that record details of each read's adapter matches in side files.
//!
//! Annotators never consume a read; they write a tab-separated line (or lines) and pass the read
//! on to the next stage.  In a paired-end pipeline they annotate read 1 with its own matches.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::{
    pipeline::{PairedEndStage, SingleEndStage, StageStats},
    record::{AdapterMatch, SequenceRecord},
    writer::BUFSIZE,
};

/// Write `fields` separated by tabs and terminated by a newline.
fn write_line(writer: &mut dyn Write, fields: &[&[u8]]) -> std::io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            writer.write_all(b"\t")?;
        }
        writer.write_all(field)?;
    }
    writer.write_all(b"\n")
}

/// Open a buffered text file for an annotator.
fn create_text_file(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path)
        .with_context(|| format!("Unable to create file: {}", path.to_string_lossy()))?;
    Ok(Box::new(BufWriter::with_capacity(BUFSIZE, file)))
}

/// The shared state of every annotator: an open text sink, `None` once closed.
struct SideFile {
    name: &'static str,
    writer: Option<Box<dyn Write>>,
}

impl SideFile {
    fn new(name: &'static str, writer: Box<dyn Write>) -> Self {
        Self { name, writer: Some(writer) }
    }

    fn writer(&mut self) -> Result<&mut Box<dyn Write>> {
        let name = self.name;
        self.writer.as_mut().with_context(|| format!("The {} is already closed", name))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().with_context(|| format!("Unable to flush the {}", self.name))?;
        }
        Ok(())
    }
}

/// Implements both stage traits for an annotator with an `annotate(read, matches)` method.
macro_rules! annotator_stage {
    ($annotator:ty) => {
        impl SingleEndStage for $annotator {
            fn process(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<bool> {
                self.annotate(read, matches)?;
                Ok(false)
            }

            fn stats(&self) -> StageStats {
                StageStats::default()
            }

            fn close(&mut self) -> Result<()> {
                self.file.close()
            }

            fn is_terminal(&self) -> bool {
                false
            }

            fn name(&self) -> &str {
                self.file.name
            }
        }

        impl PairedEndStage for $annotator {
            fn process(
                &mut self,
                read1: &SequenceRecord,
                _read2: &SequenceRecord,
                matches1: &[AdapterMatch],
                _matches2: &[AdapterMatch],
            ) -> Result<bool> {
                self.annotate(read1, matches1)?;
                Ok(false)
            }

            fn stats(&self) -> StageStats {
                StageStats::default()
            }

            fn close(&mut self) -> Result<()> {
                self.file.close()
            }

            fn is_terminal(&self) -> bool {
                false
            }

            fn name(&self) -> &str {
                self.file.name
            }
        }
    };
}

/// Writes `<rest>\t<read name>` for reads whose last match left a non-empty rest.
pub struct RestFileWriter {
    file: SideFile,
}

impl RestFileWriter {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { file: SideFile::new("rest_file", writer) }
    }

    /// Create the rest file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(create_text_file(path.as_ref())?))
    }

    fn annotate(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<()> {
        if let Some(last) = matches.last() {
            if !last.rest.is_empty() {
                write_line(self.file.writer()?, &[last.rest.as_slice(), read.name.as_slice()])
                    .context("Unable to write to the rest file")?;
            }
        }
        Ok(())
    }
}

annotator_stage!(RestFileWriter);

/// Writes `<wildcards>\t<read name>` for every read with at least one match.
pub struct WildcardFileWriter {
    file: SideFile,
}

impl WildcardFileWriter {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { file: SideFile::new("wildcard_file", writer) }
    }

    /// Create the wildcard file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(create_text_file(path.as_ref())?))
    }

    fn annotate(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<()> {
        if let Some(last) = matches.last() {
            write_line(self.file.writer()?, &[last.wildcards.as_slice(), read.name.as_slice()])
                .context("Unable to write to the wildcard file")?;
        }
        Ok(())
    }
}

annotator_stage!(WildcardFileWriter);

/// Writes one tab-separated info record per match, or a `-1` record for unmatched reads.
pub struct InfoFileWriter {
    file: SideFile,
}

impl InfoFileWriter {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { file: SideFile::new("info_file", writer) }
    }

    /// Create the info file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(create_text_file(path.as_ref())?))
    }

    fn annotate(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<()> {
        let writer = self.file.writer()?;
        if matches.is_empty() {
            let qualities = read.qualities.as_deref().unwrap_or_default();
            let fields = [read.name.as_slice(), &b"-1"[..], read.sequence.as_slice(), qualities];
            write_line(writer, &fields).context("Unable to write to the info file")?;
        } else {
            for m in matches {
                writeln!(writer, "{}", m.info_record.iter().join("\t"))
                    .context("Unable to write to the info file")?;
            }
        }
        Ok(())
    }
}

annotator_stage!(InfoFileWriter);
