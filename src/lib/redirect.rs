//! Stages that wrap a [`ReadFilter`] and send the reads it flags to an optional writer.
//!
//! A [`Redirector`] consumes exactly the reads its filter flags: they are written if a writer is
//! attached and silently discarded otherwise.  Every other read is left for the next stage.
//! [`NoFilter`] and [`PairedNoFilter`] accept everything and end every pipeline that is not
//! terminated by a demultiplexer.

use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    errors::RoutingError,
    filters::ReadFilter,
    pipeline::{PairedEndStage, SingleEndStage, StageStats},
    record::{AdapterMatch, SequenceRecord},
    writer::{PairedSequenceWriter, SequenceWriter},
};

/// How the two filters of a [`PairedRedirector`] are combined into one decision for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PairFilterMode {
    /// The pair is discarded if either read is flagged.
    Any,
    /// The pair is discarded only if both reads are flagged.
    Both,
    /// Only the first read decides.
    First,
}

impl Default for PairFilterMode {
    fn default() -> Self {
        Self::Any
    }
}

impl FromStr for PairFilterMode {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|mode| mode.to_string() == s)
            .ok_or_else(|| RoutingError::InvalidPairFilterMode(s.to_string()))
    }
}

/// The decision rule of a [`PairedRedirector`], resolved once from its filters and mode.
#[derive(Debug, Clone, PartialEq)]
enum PairDecision {
    First(ReadFilter),
    Second(ReadFilter),
    Any(ReadFilter, ReadFilter),
    Both(ReadFilter, ReadFilter),
}

impl PairDecision {
    #[inline]
    fn is_filtered(
        &self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        matches2: &[AdapterMatch],
    ) -> bool {
        match self {
            Self::First(filter) => filter.is_filtered(read1, matches1),
            Self::Second(filter) => filter.is_filtered(read2, matches2),
            Self::Any(filter1, filter2) => {
                filter1.is_filtered(read1, matches1) || filter2.is_filtered(read2, matches2)
            }
            Self::Both(filter1, filter2) => {
                filter1.is_filtered(read1, matches1) && filter2.is_filtered(read2, matches2)
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::First(filter)
            | Self::Second(filter)
            | Self::Any(filter, _)
            | Self::Both(filter, _) => filter.name(),
        }
    }
}

/// Consumes the single-end reads its filter flags, writing them if a writer is attached.
pub struct Redirector {
    writer: Option<Box<dyn SequenceWriter>>,
    filter: ReadFilter,
    stats: StageStats,
}

impl Redirector {
    /// Create a new [`Redirector`]; flagged reads are discarded when `writer` is `None`.
    pub fn new(writer: Option<Box<dyn SequenceWriter>>, filter: ReadFilter) -> Self {
        Self { writer, filter, stats: StageStats::default() }
    }
}

impl SingleEndStage for Redirector {
    fn process(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<bool> {
        if !self.filter.is_filtered(read, matches) {
            return Ok(false);
        }
        self.stats.filtered += 1;
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write(read)
                .with_context(|| format!("Unable to write read {}", read.name_str()))?;
            self.stats.record_write(read.len(), 0);
        }
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.close()?;
        }
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        self.filter.name()
    }
}

/// Consumes the read pairs its filters flag, combined according to a [`PairFilterMode`].
pub struct PairedRedirector {
    writer: Option<Box<dyn PairedSequenceWriter>>,
    decision: PairDecision,
    stats: StageStats,
}

impl PairedRedirector {
    /// Create a new [`PairedRedirector`].
    ///
    /// With only one filter given the mode is ignored and that filter alone decides on its own
    /// read.  With both given, `mode` selects how their results are combined.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::NoPairFilter`] if neither filter is given
    pub fn new(
        writer: Option<Box<dyn PairedSequenceWriter>>,
        filter1: Option<ReadFilter>,
        filter2: Option<ReadFilter>,
        mode: PairFilterMode,
    ) -> Result<Self, RoutingError> {
        let decision = match (filter1, filter2) {
            (None, None) => return Err(RoutingError::NoPairFilter),
            (Some(filter1), None) => PairDecision::First(filter1),
            (None, Some(filter2)) => PairDecision::Second(filter2),
            (Some(filter1), Some(filter2)) => match mode {
                PairFilterMode::Any => PairDecision::Any(filter1, filter2),
                PairFilterMode::Both => PairDecision::Both(filter1, filter2),
                PairFilterMode::First => PairDecision::First(filter1),
            },
        };
        Ok(Self { writer, decision, stats: StageStats::default() })
    }

    /// Create a [`PairedRedirector`] applying the same filter to both reads.
    pub fn with_filter(
        writer: Option<Box<dyn PairedSequenceWriter>>,
        filter: ReadFilter,
        mode: PairFilterMode,
    ) -> Self {
        let decision = match mode {
            PairFilterMode::Any => PairDecision::Any(filter.clone(), filter),
            PairFilterMode::Both => PairDecision::Both(filter.clone(), filter),
            PairFilterMode::First => PairDecision::First(filter),
        };
        Self { writer, decision, stats: StageStats::default() }
    }
}

impl PairedEndStage for PairedRedirector {
    fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        matches2: &[AdapterMatch],
    ) -> Result<bool> {
        if !self.decision.is_filtered(read1, read2, matches1, matches2) {
            return Ok(false);
        }
        self.stats.filtered += 1;
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write(read1, read2)
                .with_context(|| format!("Unable to write read pair {}", read1.name_str()))?;
            self.stats.record_write(read1.len(), read2.len());
        }
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.close()?;
        }
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        self.decision.name()
    }
}

/// Writes every read it is offered.
pub struct NoFilter {
    writer: Box<dyn SequenceWriter>,
    stats: StageStats,
}

impl NoFilter {
    pub fn new(writer: Box<dyn SequenceWriter>) -> Self {
        Self { writer, stats: StageStats::default() }
    }
}

impl SingleEndStage for NoFilter {
    fn process(&mut self, read: &SequenceRecord, _matches: &[AdapterMatch]) -> Result<bool> {
        self.writer
            .write(read)
            .with_context(|| format!("Unable to write read {}", read.name_str()))?;
        self.stats.record_write(read.len(), 0);
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        self.writer.close()?;
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "no_filter"
    }
}

/// Writes every read pair it is offered.
pub struct PairedNoFilter {
    writer: Box<dyn PairedSequenceWriter>,
    stats: StageStats,
}

impl PairedNoFilter {
    pub fn new(writer: Box<dyn PairedSequenceWriter>) -> Self {
        Self { writer, stats: StageStats::default() }
    }
}

impl PairedEndStage for PairedNoFilter {
    fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        _matches1: &[AdapterMatch],
        _matches2: &[AdapterMatch],
    ) -> Result<bool> {
        self.writer
            .write(read1, read2)
            .with_context(|| format!("Unable to write read pair {}", read1.name_str()))?;
        self.stats.record_write(read1.len(), read2.len());
        Ok(true)
    }

    fn stats(&self) -> StageStats {
        self.stats
    }

    fn close(&mut self) -> Result<()> {
        self.writer.close()?;
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "no_filter"
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use matches::assert_matches;
    use rstest::rstest;

    use crate::{
        errors::RoutingError,
        filters::ReadFilter,
        pipeline::{PairedEndStage, SingleEndStage},
        utils::test_commons::{adapter_matches, read, RecordingOpener, RecordingWriter},
        writer::PairedFastxWriter,
    };

    use super::{NoFilter, PairFilterMode, PairedNoFilter, PairedRedirector, Redirector};

    fn paired_writer(opener: &RecordingOpener) -> Box<PairedFastxWriter> {
        Box::new(PairedFastxWriter::new(
            Box::new(RecordingWriter::attached(opener, "r1.fq")),
            Box::new(RecordingWriter::attached(opener, "r2.fq")),
        ))
    }

    #[rstest]
    #[case("any", PairFilterMode::Any)]
    #[case("both", PairFilterMode::Both)]
    #[case("first", PairFilterMode::First)]
    fn test_pair_filter_mode_from_str(#[case] name: &str, #[case] expected: PairFilterMode) {
        assert_eq!(PairFilterMode::from_str(name).unwrap(), expected);
        assert_eq!(expected.to_string(), name);
    }

    #[rstest]
    fn test_pair_filter_mode_rejects_unknown(#[values("all", "", "First", "second")] name: &str) {
        assert_matches!(
            PairFilterMode::from_str(name),
            Err(RoutingError::InvalidPairFilterMode(found)) if found == name
        );
    }

    #[test]
    fn test_redirector_writes_flagged_reads() {
        let opener = RecordingOpener::new();
        let mut stage = Redirector::new(
            Some(Box::new(RecordingWriter::attached(&opener, "short.fq"))),
            ReadFilter::TooShort(5),
        );
        assert!(stage.process(&read("short", b"ACG"), &[]).unwrap());
        assert!(!stage.process(&read("long", b"ACGTACGT"), &[]).unwrap());
        stage.close().unwrap();
        stage.close().unwrap();

        assert_eq!(opener.names_written_to("short.fq"), vec!["short"]);
        assert_eq!(opener.close_count("short.fq"), 1);
        let stats = stage.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.written_bp, [3, 0]);
        assert!(!stage.is_terminal());
    }

    #[test]
    fn test_redirector_without_writer_discards() {
        let mut stage = Redirector::new(None, ReadFilter::DiscardTrimmed);
        assert!(stage.process(&read("trimmed", b"ACGT"), &adapter_matches(&["a1"])).unwrap());
        assert!(!stage.process(&read("untrimmed", b"ACGT"), &[]).unwrap());
        let stats = stage.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.written, 0);
        assert_eq!(stats.written_bp, [0, 0]);
    }

    #[test]
    fn test_paired_redirector_requires_a_filter() {
        assert_matches!(
            PairedRedirector::new(None, None, None, PairFilterMode::Any).err(),
            Some(RoutingError::NoPairFilter)
        );
    }

    #[rstest]
    // read 1 has 3 bases, read 2 has 8; the minimum length is 5
    #[case(PairFilterMode::Any, b"ACG", b"ACGTACGT", true)]
    #[case(PairFilterMode::Any, b"ACGTACGT", b"ACG", true)]
    #[case(PairFilterMode::Any, b"ACGTACGT", b"ACGTACGT", false)]
    #[case(PairFilterMode::Both, b"ACG", b"ACGTACGT", false)]
    #[case(PairFilterMode::Both, b"ACGTACGT", b"ACG", false)]
    #[case(PairFilterMode::Both, b"ACG", b"ACG", true)]
    #[case(PairFilterMode::First, b"ACG", b"ACGTACGT", true)]
    #[case(PairFilterMode::First, b"ACGTACGT", b"ACG", false)]
    fn test_paired_redirector_modes(
        #[case] mode: PairFilterMode,
        #[case] seq1: &[u8],
        #[case] seq2: &[u8],
        #[case] expected: bool,
    ) {
        let mut stage = PairedRedirector::new(
            None,
            Some(ReadFilter::TooShort(5)),
            Some(ReadFilter::TooShort(5)),
            mode,
        )
        .unwrap();
        let consumed = stage.process(&read("r", seq1), &read("r", seq2), &[], &[]).unwrap();
        assert_eq!(consumed, expected);
        assert_eq!(stage.stats().filtered, usize::from(expected));
    }

    #[rstest]
    fn test_single_filter_ignores_mode(
        #[values(PairFilterMode::Any, PairFilterMode::Both, PairFilterMode::First)]
        mode: PairFilterMode,
    ) {
        let mut only_first =
            PairedRedirector::new(None, Some(ReadFilter::TooShort(5)), None, mode).unwrap();
        let (short, long) = (read("r", b"ACG"), read("r", b"ACGTACGT"));
        assert!(only_first.process(&short, &long, &[], &[]).unwrap());
        assert!(!only_first.process(&long, &short, &[], &[]).unwrap());

        let mut only_second =
            PairedRedirector::new(None, None, Some(ReadFilter::TooShort(5)), mode).unwrap();
        assert!(!only_second.process(&short, &long, &[], &[]).unwrap());
        assert!(only_second.process(&long, &short, &[], &[]).unwrap());
    }

    #[test]
    fn test_paired_redirector_uses_each_reads_own_matches() {
        let mut stage = PairedRedirector::new(
            None,
            Some(ReadFilter::DiscardUntrimmed),
            Some(ReadFilter::DiscardUntrimmed),
            PairFilterMode::Both,
        )
        .unwrap();
        let r = read("r", b"ACGT");
        assert!(!stage.process(&r, &r, &[], &adapter_matches(&["a2"])).unwrap());
        assert!(stage.process(&r, &r, &[], &[]).unwrap());
    }

    #[test]
    fn test_all_n_first_read_discards_pair_in_first_mode() {
        let mut stage = PairedRedirector::new(
            None,
            Some(ReadFilter::n_content(0.5).unwrap()),
            None,
            PairFilterMode::First,
        )
        .unwrap();
        let read1 = read("pair", b"NNNNN");
        let read2 = read("pair", b"ACGTACGTAC");
        assert!(stage.process(&read1, &read2, &[], &[]).unwrap());
        assert_eq!(stage.stats().filtered, 1);
        assert_eq!(stage.stats().written, 0);
    }

    #[test]
    fn test_paired_redirector_counts_bases_per_mate() {
        let opener = RecordingOpener::new();
        let mut stage = PairedRedirector::with_filter(
            Some(paired_writer(&opener)),
            ReadFilter::TooLong(4),
            PairFilterMode::Any,
        );
        assert!(stage.process(&read("p", b"ACGTAC"), &read("p", b"ACG"), &[], &[]).unwrap());
        assert_eq!(opener.names_written_to("r1.fq"), vec!["p"]);
        assert_eq!(opener.names_written_to("r2.fq"), vec!["p"]);
        assert_eq!(stage.stats().written_bp, [6, 3]);
        assert_eq!(stage.name(), "too_long");
    }

    #[test]
    fn test_no_filter_accepts_everything() {
        let opener = RecordingOpener::new();
        let mut stage = NoFilter::new(Box::new(RecordingWriter::attached(&opener, "out.fq")));
        assert!(stage.process(&read("a", b"AC"), &[]).unwrap());
        assert!(stage.process(&read("b", b"ACGT"), &adapter_matches(&["x"])).unwrap());
        let stats = stage.stats();
        assert_eq!(stats.filtered, 0);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.written_bp, [6, 0]);
        assert!(stage.is_terminal());
    }

    #[test]
    fn test_paired_no_filter_accepts_everything() {
        let opener = RecordingOpener::new();
        let mut stage = PairedNoFilter::new(paired_writer(&opener));
        assert!(stage.process(&read("a", b"AC"), &read("a", b"ACG"), &[], &[]).unwrap());
        stage.close().unwrap();
        assert_eq!(stage.stats().written_bp, [2, 3]);
        assert_eq!(stage.stats().filtered, 0);
        assert_eq!(opener.close_count("r1.fq"), 1);
        assert_eq!(opener.close_count("r2.fq"), 1);
    }
}
