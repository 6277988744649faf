//! Per-stage and run-level counts collected while routing reads.
//!
//! Every stage reports a [`StageStats`]; a pipeline turns those into one [`StageMetrics`] row per
//! stage plus a single [`RunMetrics`] row of totals.  Both are writable to TSV files.

use std::path::Path;

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};

use crate::pipeline::StageStats;

/// The counts for one stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// The name of the stage.
    pub stage: String,
    /// The number of reads (or pairs) the stage's criterion flagged.
    pub filtered: usize,
    /// The number of reads (or pairs) the stage wrote.
    pub written: usize,
    /// The number of read 1 (or single-end) bases the stage wrote.
    pub written_bp_read1: usize,
    /// The number of read 2 bases the stage wrote.
    pub written_bp_read2: usize,
}

impl StageMetrics {
    /// Create a new [`StageMetrics`] from a stage's name and counters.
    pub fn new(stage: &str, stats: StageStats) -> Self {
        Self {
            stage: stage.to_string(),
            filtered: stats.filtered,
            written: stats.written,
            written_bp_read1: stats.written_bp[0],
            written_bp_read2: stats.written_bp[1],
        }
    }
}

/// The high level metrics for all reads routed by a pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// The number of reads (or pairs) offered to the pipeline.
    pub total_reads: usize,
    /// The number of reads (or pairs) written by any stage.
    pub total_written: usize,
    /// The number of reads (or pairs) flagged by any filter.
    pub total_filtered: usize,
    /// The number of read 1 (or single-end) bases written.
    pub total_written_bp_read1: usize,
    /// The number of read 2 bases written.
    pub total_written_bp_read2: usize,
}

/// Write `<prefix>stage_metrics.tsv` and `<prefix>run_metrics.tsv` to `output_dir`.
pub fn write_metrics_files<P: AsRef<Path>>(
    output_dir: P,
    prefix: &str,
    stage_metrics: &[StageMetrics],
    run_metrics: &RunMetrics,
) -> Result<()> {
    let delim = DelimFile::default();

    let filename = [prefix.to_string(), "stage_metrics.tsv".to_string()].concat();
    let output_path = output_dir.as_ref().join(filename);
    delim
        .write_tsv(&output_path, stage_metrics.iter().cloned())
        .with_context(|| format!("Unable to write {}", output_path.to_string_lossy()))?;

    let filename = [prefix.to_string(), "run_metrics.tsv".to_string()].concat();
    let output_path = output_dir.as_ref().join(filename);
    delim
        .write_tsv(&output_path, std::iter::once(run_metrics.clone()))
        .with_context(|| format!("Unable to write {}", output_path.to_string_lossy()))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use fgoxide::io::DelimFile;
    use tempfile::tempdir;

    use crate::pipeline::StageStats;

    use super::{write_metrics_files, RunMetrics, StageMetrics};

    #[test]
    fn test_stage_metrics_from_stats() {
        let stats = StageStats { filtered: 3, written: 2, written_bp: [20, 15] };
        let metrics = StageMetrics::new("too_short", stats);
        assert_eq!(metrics.stage, "too_short");
        assert_eq!(metrics.filtered, 3);
        assert_eq!(metrics.written, 2);
        assert_eq!(metrics.written_bp_read1, 20);
        assert_eq!(metrics.written_bp_read2, 15);
    }

    #[test]
    fn test_write_metrics_files() {
        let dir = tempdir().unwrap();
        let too_short = StageStats { filtered: 1, written: 1, written_bp: [3, 0] };
        let no_filter = StageStats { filtered: 0, written: 4, written_bp: [40, 0] };
        let stages = vec![
            StageMetrics::new("too_short", too_short),
            StageMetrics::new("no_filter", no_filter),
        ];
        let run = RunMetrics {
            total_reads: 5,
            total_written: 5,
            total_filtered: 1,
            total_written_bp_read1: 43,
            total_written_bp_read2: 0,
        };
        write_metrics_files(dir.path(), "sample.", &stages, &run).unwrap();

        let delim = DelimFile::default();
        let read_stages: Vec<StageMetrics> =
            delim.read_tsv(&dir.path().join("sample.stage_metrics.tsv")).unwrap();
        assert_eq!(read_stages, stages);
        let read_run: Vec<RunMetrics> =
            delim.read_tsv(&dir.path().join("sample.run_metrics.tsv")).unwrap();
        assert_eq!(read_run, vec![run]);
    }

    #[test]
    fn test_write_metrics_files_to_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = write_metrics_files(&missing, "", &[], &RunMetrics::default());
        assert!(result.is_err());
    }
}
