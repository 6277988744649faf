//! Terminal stages that pick an output file per read from the name of the adapter it matched.
//!
//! Output paths come from a template with a placeholder substituted by the adapter name of the
//! last (most recent) match.  Writers are opened lazily the first time a name is seen, cached for
//! the lifetime of the stage, and all closed together by [`SingleEndStage::close`] /
//! [`PairedEndStage::close`].  Every open goes through [`open_with_retry`] so that running out of
//! file descriptors part way through a run raises the limit instead of failing outright.

use std::{
    collections::hash_map::Entry,
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::{
    errors::RoutingError,
    pipeline::{PairedEndStage, SingleEndStage, StageStats},
    record::{last_adapter_name, AdapterMatch, SequenceRecord},
    utils::open_with_retry,
    writer::{FastxOpener, OutputOpener, PairedFastxWriter, PairedSequenceWriter, SequenceWriter},
};

/// Substituted with the adapter name in [`Demultiplexer`] templates.
pub const NAME_PLACEHOLDER: &str = "{name}";
/// Substituted with read 1's adapter name in [`CombinatorialDemultiplexer`] templates.
pub const NAME1_PLACEHOLDER: &str = "{name1}";
/// Substituted with read 2's adapter name in [`CombinatorialDemultiplexer`] templates.
pub const NAME2_PLACEHOLDER: &str = "{name2}";

/// Fails if `template` lacks `placeholder`.
fn require_placeholder(template: &str, placeholder: &'static str) -> Result<(), RoutingError> {
    if template.contains(placeholder) {
        Ok(())
    } else {
        Err(RoutingError::MissingPlaceholder { template: template.to_string(), placeholder })
    }
}

/// Open one output through `opener`, with the path in the error context.
fn open_output<O: OutputOpener>(
    opener: &O,
    path: &Path,
    qualities: bool,
) -> Result<Box<dyn SequenceWriter>> {
    debug!("Opening demultiplexed output {}", path.to_string_lossy());
    open_with_retry(opener, path, qualities)
        .with_context(|| format!("Unable to create file: {}", path.to_string_lossy()))
}

/// Routes single-end reads to one file per adapter name.
///
/// Reads without any match go to the untrimmed output if one was given, and are dropped otherwise.
pub struct Demultiplexer<O: OutputOpener = FastxOpener> {
    /// The output path template containing [`NAME_PLACEHOLDER`].
    template: String,
    /// Where unmatched reads go, if anywhere.
    untrimmed_path: Option<PathBuf>,
    /// The lazily opened writer for `untrimmed_path`.
    untrimmed_writer: Option<Box<dyn SequenceWriter>>,
    /// The open writers keyed by adapter name.
    writers: AHashMap<String, Box<dyn SequenceWriter>>,
    opener: O,
    qualities: bool,
    stats: StageStats,
    closed: bool,
}

impl Demultiplexer<FastxOpener> {
    /// Create a new [`Demultiplexer`] writing FASTQ (or FASTA) files.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::MissingPlaceholder`] if `template` lacks [`NAME_PLACEHOLDER`]
    pub fn new(
        template: &str,
        untrimmed_path: Option<PathBuf>,
        qualities: bool,
    ) -> Result<Self, RoutingError> {
        Self::with_opener(template, untrimmed_path, qualities, FastxOpener)
    }
}

impl<O: OutputOpener> Demultiplexer<O> {
    /// Create a new [`Demultiplexer`] opening its outputs through `opener`.
    pub fn with_opener(
        template: &str,
        untrimmed_path: Option<PathBuf>,
        qualities: bool,
        opener: O,
    ) -> Result<Self, RoutingError> {
        require_placeholder(template, NAME_PLACEHOLDER)?;
        Ok(Self {
            template: template.to_string(),
            untrimmed_path,
            untrimmed_writer: None,
            writers: AHashMap::new(),
            opener,
            qualities,
            stats: StageStats::default(),
            closed: false,
        })
    }

    /// The number of adapter-named outputs opened so far.
    pub fn open_outputs(&self) -> usize {
        self.writers.len()
    }

    /// Write `read` to the output for the last adapter in `matches`.
    fn route(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<()> {
        if self.closed {
            bail!("Demultiplexer for {} is already closed", self.template);
        }
        let writer = match last_adapter_name(matches) {
            Some(name) => match self.writers.entry(name.to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let path = PathBuf::from(self.template.replace(NAME_PLACEHOLDER, name));
                    entry.insert(open_output(&self.opener, &path, self.qualities)?)
                }
            },
            None => match self.untrimmed_path.as_ref() {
                Some(path) => {
                    if self.untrimmed_writer.is_none() {
                        self.untrimmed_writer =
                            Some(open_output(&self.opener, path, self.qualities)?);
                    }
                    match self.untrimmed_writer.as_mut() {
                        Some(writer) => writer,
                        None => return Ok(()),
                    }
                }
                None => return Ok(()),
            },
        };
        writer.write(read).with_context(|| format!("Unable to write read {}", read.name_str()))?;
        self.stats.record_write(read.len(), 0);
        Ok(())
    }

    fn close_all(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        for (name, mut writer) in self.writers.drain() {
            let closed =
                writer.close().with_context(|| format!("Unable to close output for {}", name));
            result = result.and(closed);
        }
        if let Some(mut writer) = self.untrimmed_writer.take() {
            let closed = writer.close().context("Unable to close output for untrimmed reads");
            result = result.and(closed);
        }
        result
    }
}

impl<O: OutputOpener> SingleEndStage for Demultiplexer<O> {
    fn process(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<bool> {
        self.route(read, matches)?;
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        self.close_all()
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "demultiplexer"
    }
}

/// Routes read pairs to one pair of files per adapter name, both mates keyed by read 1's match.
pub struct PairedDemultiplexer<O: OutputOpener + Clone = FastxOpener> {
    first: Demultiplexer<O>,
    second: Demultiplexer<O>,
}

impl PairedDemultiplexer<FastxOpener> {
    /// Create a new [`PairedDemultiplexer`] writing FASTQ (or FASTA) files.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::MissingPlaceholder`] if either template lacks [`NAME_PLACEHOLDER`]
    pub fn new(
        template1: &str,
        template2: &str,
        untrimmed_path1: Option<PathBuf>,
        untrimmed_path2: Option<PathBuf>,
        qualities: bool,
    ) -> Result<Self, RoutingError> {
        Self::with_opener(
            template1,
            template2,
            untrimmed_path1,
            untrimmed_path2,
            qualities,
            FastxOpener,
        )
    }
}

impl<O: OutputOpener + Clone> PairedDemultiplexer<O> {
    /// Create a new [`PairedDemultiplexer`] opening its outputs through `opener`.
    pub fn with_opener(
        template1: &str,
        template2: &str,
        untrimmed_path1: Option<PathBuf>,
        untrimmed_path2: Option<PathBuf>,
        qualities: bool,
        opener: O,
    ) -> Result<Self, RoutingError> {
        Ok(Self {
            first: Demultiplexer::with_opener(
                template1,
                untrimmed_path1,
                qualities,
                opener.clone(),
            )?,
            second: Demultiplexer::with_opener(template2, untrimmed_path2, qualities, opener)?,
        })
    }
}

impl<O: OutputOpener + Clone> PairedEndStage for PairedDemultiplexer<O> {
    fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        _matches2: &[AdapterMatch],
    ) -> Result<bool> {
        self.first.route(read1, matches1)?;
        self.second.route(read2, matches1)?;
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        let (first, second) = (self.first.stats, self.second.stats);
        StageStats {
            filtered: 0,
            written: first.written + second.written,
            written_bp: [first.written_bp[0], second.written_bp[0]],
        }
    }

    fn close(&mut self) -> Result<()> {
        let first = self.first.close_all();
        let second = self.second.close_all();
        first.and(second)
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "paired_demultiplexer"
    }
}

/// The adapter names of the two mates, `None` for a mate without matches.
type NamePair = (Option<String>, Option<String>);

/// Routes read pairs to one pair of files per combination of read 1 and read 2 adapter names.
///
/// A mate without matches is named `untrimmed_name`.  Without an `untrimmed_name`, pairs with an
/// unmatched mate are dropped.
pub struct CombinatorialDemultiplexer<O: OutputOpener = FastxOpener> {
    template1: String,
    template2: String,
    untrimmed_name: Option<String>,
    /// Writers keyed by the unsubstituted adapter names.
    writers: AHashMap<NamePair, PairedFastxWriter>,
    opener: O,
    qualities: bool,
    stats: StageStats,
    closed: bool,
}

impl CombinatorialDemultiplexer<FastxOpener> {
    /// Create a new [`CombinatorialDemultiplexer`] writing FASTQ (or FASTA) files.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::MissingPlaceholder`] if either template lacks [`NAME1_PLACEHOLDER`] or
    ///   [`NAME2_PLACEHOLDER`]
    pub fn new(
        template1: &str,
        template2: &str,
        untrimmed_name: Option<String>,
        qualities: bool,
    ) -> Result<Self, RoutingError> {
        Self::with_opener(template1, template2, untrimmed_name, qualities, FastxOpener)
    }
}

impl<O: OutputOpener> CombinatorialDemultiplexer<O> {
    /// Create a new [`CombinatorialDemultiplexer`] opening its outputs through `opener`.
    pub fn with_opener(
        template1: &str,
        template2: &str,
        untrimmed_name: Option<String>,
        qualities: bool,
        opener: O,
    ) -> Result<Self, RoutingError> {
        for template in [template1, template2] {
            require_placeholder(template, NAME1_PLACEHOLDER)?;
            require_placeholder(template, NAME2_PLACEHOLDER)?;
        }
        Ok(Self {
            template1: template1.to_string(),
            template2: template2.to_string(),
            untrimmed_name,
            writers: AHashMap::new(),
            opener,
            qualities,
            stats: StageStats::default(),
            closed: false,
        })
    }

    /// The number of output pairs opened so far.
    pub fn open_outputs(&self) -> usize {
        self.writers.len()
    }
}

impl<O: OutputOpener> PairedEndStage for CombinatorialDemultiplexer<O> {
    fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        matches2: &[AdapterMatch],
    ) -> Result<bool> {
        if self.closed {
            bail!("Combinatorial demultiplexer for {} is already closed", self.template1);
        }
        let key = (
            last_adapter_name(matches1).map(str::to_string),
            last_adapter_name(matches2).map(str::to_string),
        );
        let writer = match self.writers.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (name1, name2) = entry.key();
                let untrimmed = self.untrimmed_name.as_deref();
                let (name1, name2) =
                    match (name1.as_deref().or(untrimmed), name2.as_deref().or(untrimmed)) {
                        (Some(name1), Some(name2)) => (name1, name2),
                        _ => return Ok(true),
                    };
                let substitute = |template: &str| {
                    let path = template.replace(NAME1_PLACEHOLDER, name1);
                    PathBuf::from(path.replace(NAME2_PLACEHOLDER, name2))
                };
                let path1 = substitute(&self.template1);
                let path2 = substitute(&self.template2);
                let mut first = open_output(&self.opener, &path1, self.qualities)?;
                let second = match open_output(&self.opener, &path2, self.qualities) {
                    Ok(second) => second,
                    Err(e) => {
                        if let Err(close_err) = first.close() {
                            warn!("Unable to close {}: {}", path1.to_string_lossy(), close_err);
                        }
                        return Err(e);
                    }
                };
                entry.insert(PairedFastxWriter::new(first, second))
            }
        };
        writer
            .write(read1, read2)
            .with_context(|| format!("Unable to write read pair {}", read1.name_str()))?;
        self.stats.record_write(read1.len(), read2.len());
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        for ((name1, name2), mut writer) in self.writers.drain() {
            let closed = writer.close().with_context(|| {
                format!("Unable to close output for {:?} and {:?}", name1, name2)
            });
            result = result.and(closed);
        }
        result
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "combinatorial_demultiplexer"
    }
}
