//! The chain of routing stages that decides the fate of every read.
//!
//! A pipeline offers each read (or pair) to its stages in order until one of them reports it
//! consumed.  The last stage must be terminal, i.e. one that always consumes, so that every read
//! ends up written exactly once or deliberately discarded.

use anyhow::{bail, Result};
use log::info;

use crate::{
    errors::RoutingError,
    metrics::{RunMetrics, StageMetrics},
    record::{AdapterMatch, SequenceRecord},
};

/// The counters every stage reports at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    /// The number of reads (or pairs) the stage's criterion flagged.
    pub filtered: usize,
    /// The number of reads (or pairs) actually written by the stage.
    pub written: usize,
    /// The bases written, index 0 for read 1 (or single-end reads), index 1 for read 2.
    pub written_bp: [usize; 2],
}

impl StageStats {
    /// Count one written read (or pair) and its bases.
    #[inline]
    pub fn record_write(&mut self, read1_len: usize, read2_len: usize) {
        self.written += 1;
        self.written_bp[0] += read1_len;
        self.written_bp[1] += read2_len;
    }
}

/// A stage of a single-end pipeline.
pub trait SingleEndStage {
    /// Offer a read to the stage, returning true if the stage consumed it.
    fn process(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<bool>;

    /// The stage's counters.
    fn stats(&self) -> StageStats;

    /// Release any outputs the stage owns.  Must be safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// True if the stage consumes every read offered to it.
    fn is_terminal(&self) -> bool;

    /// A short name for the stage used in logging and metrics.
    fn name(&self) -> &str;
}

/// A stage of a paired-end pipeline.
pub trait PairedEndStage {
    /// Offer a read pair to the stage, returning true if the stage consumed it.
    fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        matches2: &[AdapterMatch],
    ) -> Result<bool>;

    /// The stage's counters.
    fn stats(&self) -> StageStats;

    /// Release any outputs the stage owns.  Must be safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// True if the stage consumes every pair offered to it.
    fn is_terminal(&self) -> bool;

    /// A short name for the stage used in logging and metrics.
    fn name(&self) -> &str;
}

/// Checks that a list of stages is non-empty and ends with a terminal stage.
fn check_stages(last: Option<(bool, &str)>) -> Result<(), RoutingError> {
    match last {
        None => Err(RoutingError::EmptyPipeline),
        Some((false, name)) => Err(RoutingError::NonTerminalLastStage(name.to_string())),
        Some((true, _)) => Ok(()),
    }
}

/// Builds the run metrics from the per-stage metrics.
fn run_metrics(total_reads: usize, stages: &[StageMetrics]) -> RunMetrics {
    stages.iter().fold(RunMetrics { total_reads, ..RunMetrics::default() }, |mut run, stage| {
        run.total_filtered += stage.filtered;
        run.total_written += stage.written;
        run.total_written_bp_read1 += stage.written_bp_read1;
        run.total_written_bp_read2 += stage.written_bp_read2;
        run
    })
}

/// Drive every close in `closes` to completion, keeping the first error.
fn close_stages(closes: impl Iterator<Item = Result<()>>) -> Result<()> {
    closes.fold(Ok(()), |first, closed| first.and(closed))
}

/// An ordered chain of [`SingleEndStage`]s.
pub struct SingleEndPipeline {
    stages: Vec<Box<dyn SingleEndStage>>,
    total_reads: usize,
}

impl SingleEndPipeline {
    /// Create a new [`SingleEndPipeline`].
    ///
    /// # Errors
    ///
    /// - [`RoutingError::EmptyPipeline`] if there are no stages
    /// - [`RoutingError::NonTerminalLastStage`] if the last stage may leave a read unconsumed
    pub fn new(stages: Vec<Box<dyn SingleEndStage>>) -> Result<Self, RoutingError> {
        check_stages(stages.last().map(|s| (s.is_terminal(), s.name())))?;
        info!(
            "Built single-end pipeline: {}",
            stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Self { stages, total_reads: 0 })
    }

    /// Route one read through the stages until one consumes it.
    pub fn process(&mut self, read: &SequenceRecord, matches: &[AdapterMatch]) -> Result<()> {
        self.total_reads += 1;
        for stage in self.stages.iter_mut() {
            if stage.process(read, matches)? {
                return Ok(());
            }
        }
        bail!("No stage consumed read {}", read.name_str())
    }

    /// Close every stage, even after one fails, and return the first failure.
    pub fn close(&mut self) -> Result<()> {
        close_stages(self.stages.iter_mut().map(|stage| stage.close()))?;
        info!("Closed single-end pipeline after {} reads", self.total_reads);
        Ok(())
    }

    /// The number of reads processed so far.
    pub fn total_reads(&self) -> usize {
        self.total_reads
    }

    /// Per-stage metrics, in pipeline order.
    pub fn stage_metrics(&self) -> Vec<StageMetrics> {
        self.stages.iter().map(|s| StageMetrics::new(s.name(), s.stats())).collect()
    }

    /// Totals across all stages.
    pub fn run_metrics(&self) -> RunMetrics {
        run_metrics(self.total_reads, &self.stage_metrics())
    }
}

/// An ordered chain of [`PairedEndStage`]s.
pub struct PairedEndPipeline {
    stages: Vec<Box<dyn PairedEndStage>>,
    total_reads: usize,
}

impl PairedEndPipeline {
    /// Create a new [`PairedEndPipeline`], see [`SingleEndPipeline::new`].
    pub fn new(stages: Vec<Box<dyn PairedEndStage>>) -> Result<Self, RoutingError> {
        check_stages(stages.last().map(|s| (s.is_terminal(), s.name())))?;
        info!(
            "Built paired-end pipeline: {}",
            stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Self { stages, total_reads: 0 })
    }

    /// Route one read pair through the stages until one consumes it.
    pub fn process(
        &mut self,
        read1: &SequenceRecord,
        read2: &SequenceRecord,
        matches1: &[AdapterMatch],
        matches2: &[AdapterMatch],
    ) -> Result<()> {
        self.total_reads += 1;
        for stage in self.stages.iter_mut() {
            if stage.process(read1, read2, matches1, matches2)? {
                return Ok(());
            }
        }
        bail!("No stage consumed read pair {}", read1.name_str())
    }

    /// Close every stage, even after one fails, and return the first failure.
    pub fn close(&mut self) -> Result<()> {
        close_stages(self.stages.iter_mut().map(|stage| stage.close()))?;
        info!("Closed paired-end pipeline after {} read pairs", self.total_reads);
        Ok(())
    }

    /// The number of read pairs processed so far.
    pub fn total_reads(&self) -> usize {
        self.total_reads
    }

    /// Per-stage metrics, in pipeline order.
    pub fn stage_metrics(&self) -> Vec<StageMetrics> {
        self.stages.iter().map(|s| StageMetrics::new(s.name(), s.stats())).collect()
    }

    /// Totals across all stages.
    pub fn run_metrics(&self) -> RunMetrics {
        run_metrics(self.total_reads, &self.stage_metrics())
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;

    use crate::{
        errors::RoutingError,
        filters::ReadFilter,
        redirect::{NoFilter, PairFilterMode, PairedNoFilter, PairedRedirector, Redirector},
        utils::test_commons::{adapter_matches, read, RecordingOpener, RecordingWriter},
        writer::PairedFastxWriter,
    };

    use super::{PairedEndPipeline, PairedEndStage, SingleEndPipeline, SingleEndStage};

    #[test]
    fn test_empty_pipeline_is_rejected() {
        assert_matches!(SingleEndPipeline::new(vec![]).err(), Some(RoutingError::EmptyPipeline));
        assert_matches!(PairedEndPipeline::new(vec![]).err(), Some(RoutingError::EmptyPipeline));
    }

    #[test]
    fn test_last_stage_must_be_terminal() {
        let stages: Vec<Box<dyn SingleEndStage>> =
            vec![Box::new(Redirector::new(None, ReadFilter::TooShort(10)))];
        assert_matches!(
            SingleEndPipeline::new(stages).err(),
            Some(RoutingError::NonTerminalLastStage(name)) if name == "too_short"
        );
    }

    #[test]
    fn test_each_read_is_written_at_most_once() {
        let opener = RecordingOpener::new();
        let stages: Vec<Box<dyn SingleEndStage>> = vec![
            Box::new(Redirector::new(
                Some(Box::new(RecordingWriter::attached(&opener, "short.fq"))),
                ReadFilter::TooShort(4),
            )),
            Box::new(Redirector::new(None, ReadFilter::n_content(1.0).unwrap())),
            Box::new(NoFilter::new(Box::new(RecordingWriter::attached(&opener, "out.fq")))),
        ];
        let mut pipeline = SingleEndPipeline::new(stages).unwrap();

        pipeline.process(&read("short", b"AC"), &[]).unwrap();
        pipeline.process(&read("ns", b"ACNNGT"), &[]).unwrap();
        pipeline.process(&read("good", b"ACGTAC"), &adapter_matches(&["a1"])).unwrap();
        pipeline.close().unwrap();

        assert_eq!(opener.names_written_to("short.fq"), vec!["short"]);
        assert_eq!(opener.names_written_to("out.fq"), vec!["good"]);
        assert_eq!(opener.close_count("out.fq"), 1);

        let stage_metrics = pipeline.stage_metrics();
        assert_eq!(stage_metrics[0].filtered, 1);
        assert_eq!(stage_metrics[0].written, 1);
        assert_eq!(stage_metrics[1].filtered, 1);
        assert_eq!(stage_metrics[1].written, 0);
        assert_eq!(stage_metrics[2].stage, "no_filter");
        assert_eq!(stage_metrics[2].written_bp_read1, 6);

        let run = pipeline.run_metrics();
        assert_eq!(run.total_reads, 3);
        assert_eq!(run.total_written, 2);
        assert_eq!(run.total_filtered, 2);
        assert_eq!(run.total_written_bp_read1, 8);
    }

    #[test]
    fn test_close_reaches_every_stage_after_a_failure() {
        let opener = RecordingOpener::new().failing_close("short.fq");
        let stages: Vec<Box<dyn SingleEndStage>> = vec![
            Box::new(Redirector::new(
                Some(Box::new(RecordingWriter::attached(&opener, "short.fq"))),
                ReadFilter::TooShort(4),
            )),
            Box::new(NoFilter::new(Box::new(RecordingWriter::attached(&opener, "out.fq")))),
        ];
        let mut pipeline = SingleEndPipeline::new(stages).unwrap();
        pipeline.process(&read("good", b"ACGTAC"), &[]).unwrap();

        let err = pipeline.close().unwrap_err();
        assert!(err.to_string().contains("close refused"));
        assert_eq!(opener.close_count("short.fq"), 1);
        assert_eq!(opener.close_count("out.fq"), 1);
    }

    #[test]
    fn test_paired_close_reaches_every_stage_after_a_failure() {
        let opener = RecordingOpener::new().failing_close("short.1.fq");
        let paired = |path1: &str, path2: &str| {
            Box::new(PairedFastxWriter::new(
                Box::new(RecordingWriter::attached(&opener, path1)),
                Box::new(RecordingWriter::attached(&opener, path2)),
            ))
        };
        let stages: Vec<Box<dyn PairedEndStage>> = vec![
            Box::new(
                PairedRedirector::new(
                    Some(paired("short.1.fq", "short.2.fq")),
                    Some(ReadFilter::TooShort(4)),
                    None,
                    PairFilterMode::Any,
                )
                .unwrap(),
            ),
            Box::new(PairedNoFilter::new(paired("out.1.fq", "out.2.fq"))),
        ];
        let mut pipeline = PairedEndPipeline::new(stages).unwrap();

        assert!(pipeline.close().is_err());
        for path in ["short.1.fq", "short.2.fq", "out.1.fq", "out.2.fq"] {
            assert_eq!(opener.close_count(path), 1, "{}", path);
        }
    }

    #[test]
    fn test_paired_pipeline_discards_pair_by_first_read() {
        let opener = RecordingOpener::new();
        let stages: Vec<Box<dyn PairedEndStage>> = vec![
            Box::new(
                PairedRedirector::new(
                    None,
                    Some(ReadFilter::n_content(0.5).unwrap()),
                    None,
                    PairFilterMode::First,
                )
                .unwrap(),
            ),
            Box::new(PairedNoFilter::new(Box::new(PairedFastxWriter::new(
                Box::new(RecordingWriter::attached(&opener, "out.1.fq")),
                Box::new(RecordingWriter::attached(&opener, "out.2.fq")),
            )))),
        ];
        let mut pipeline = PairedEndPipeline::new(stages).unwrap();
        pipeline.process(&read("p1", b"NNNNN"), &read("p1", b"ACGTACGTAC"), &[], &[]).unwrap();
        pipeline.process(&read("p2", b"ACGTA"), &read("p2", b"NNNNNNNNNN"), &[], &[]).unwrap();
        pipeline.close().unwrap();

        assert_eq!(opener.names_written_to("out.1.fq"), vec!["p2"]);
        assert_eq!(opener.names_written_to("out.2.fq"), vec!["p2"]);
        let run = pipeline.run_metrics();
        assert_eq!(run.total_reads, 2);
        assert_eq!(run.total_filtered, 1);
        assert_eq!(run.total_written_bp_read1, 5);
        assert_eq!(run.total_written_bp_read2, 10);
    }
}
