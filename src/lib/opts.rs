//! Configuration for assembling a routing pipeline, and logging setup.
//!
//! [`PipelineOpts`] describes which filters and outputs a run uses.  The stages are assembled in a
//! fixed order: side-file annotators first, then the length, N-content and CASAVA filters, then
//! the terminal stage (a demultiplexer when the output is a template, otherwise the untrimmed and
//! trimmed filters followed by a catch-all writer).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use env_logger::Env;
use serde::{Deserialize, Serialize};

use crate::{
    annotate::{InfoFileWriter, RestFileWriter, WildcardFileWriter},
    demux::{
        CombinatorialDemultiplexer, Demultiplexer, PairedDemultiplexer, NAME1_PLACEHOLDER,
        NAME2_PLACEHOLDER, NAME_PLACEHOLDER,
    },
    errors::RoutingError,
    filters::ReadFilter,
    pipeline::{PairedEndPipeline, PairedEndStage, SingleEndPipeline, SingleEndStage},
    redirect::{NoFilter, PairFilterMode, PairedNoFilter, PairedRedirector, Redirector},
    writer::{FastxWriter, PairedFastxWriter, PairedSequenceWriter, SequenceWriter},
};

/// The name given to a mate without adapter matches by the combinatorial demultiplexer.
pub const UNKNOWN_ADAPTER_NAME: &str = "unknown";

/// The options that assemble a single- or paired-end routing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOpts {
    /// The output for read 1 (or single-end reads).  May be a template containing `{name}`, or
    /// `{name1}` and `{name2}` for paired-end combinatorial demultiplexing.
    pub output: PathBuf,
    /// The output for read 2, using the same placeholders as `output`.
    pub paired_output: Option<PathBuf>,
    /// Where reads without adapter matches go.
    pub untrimmed_output: Option<PathBuf>,
    pub untrimmed_paired_output: Option<PathBuf>,
    /// Discard reads shorter than this.
    pub minimum_length: Option<usize>,
    pub too_short_output: Option<PathBuf>,
    pub too_short_paired_output: Option<PathBuf>,
    /// Discard reads longer than this.
    pub maximum_length: Option<usize>,
    pub too_long_output: Option<PathBuf>,
    pub too_long_paired_output: Option<PathBuf>,
    /// Discard reads with more `N`s than this, a proportion if below 1.
    pub max_n: Option<f64>,
    /// Discard reads whose header flags them as failing the instrument quality filter.
    pub discard_casava: bool,
    /// Discard reads with at least one adapter match.
    pub discard_trimmed: bool,
    /// Discard reads without adapter matches.
    pub discard_untrimmed: bool,
    /// How paired-end filters combine: `any`, `both` or `first`.
    pub pair_filter_mode: String,
    /// Write FASTQ if true, FASTA otherwise.
    pub qualities: bool,
    pub rest_file: Option<PathBuf>,
    pub info_file: Option<PathBuf>,
    pub wildcard_file: Option<PathBuf>,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            output: PathBuf::default(),
            paired_output: None,
            untrimmed_output: None,
            untrimmed_paired_output: None,
            minimum_length: None,
            too_short_output: None,
            too_short_paired_output: None,
            maximum_length: None,
            too_long_output: None,
            too_long_paired_output: None,
            max_n: None,
            discard_casava: false,
            discard_trimmed: false,
            discard_untrimmed: false,
            pair_filter_mode: PairFilterMode::default().to_string(),
            qualities: true,
            rest_file: None,
            info_file: None,
            wildcard_file: None,
        }
    }
}

/// Create a static (non-template) output.
fn create_writer(path: &Path, qualities: bool) -> Result<Box<dyn SequenceWriter>> {
    let writer = FastxWriter::create(path, qualities)
        .with_context(|| format!("Unable to create file: {}", path.to_string_lossy()))?;
    Ok(Box::new(writer))
}

/// Create a static paired output, requiring the read 2 path when the read 1 path is given.
fn create_paired_writer(
    path1: Option<&PathBuf>,
    path2: Option<&PathBuf>,
    option: &str,
    qualities: bool,
) -> Result<Option<Box<dyn PairedSequenceWriter>>> {
    match (path1, path2) {
        (None, _) => Ok(None),
        (Some(_), None) => Err(RoutingError::MissingPairedOutput(option.to_string()).into()),
        (Some(path1), Some(path2)) => Ok(Some(Box::new(PairedFastxWriter::new(
            create_writer(path1, qualities)?,
            create_writer(path2, qualities)?,
        )))),
    }
}

impl PipelineOpts {
    /// The validated [`PairFilterMode`].
    pub fn pair_filter_mode(&self) -> Result<PairFilterMode, RoutingError> {
        self.pair_filter_mode.parse()
    }

    /// Check the options for a single-end (`paired == false`) or paired-end pipeline.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::ConflictingUntrimmedOptions`] if more than one of `discard_trimmed`,
    ///   `discard_untrimmed` and `untrimmed_output` is set
    /// - [`RoutingError::MissingPairedOutput`] if a paired pipeline has no `paired_output`
    /// - [`RoutingError::MissingPlaceholder`] if a template has only one of [`NAME1_PLACEHOLDER`]
    ///   and [`NAME2_PLACEHOLDER`]
    /// - [`RoutingError::UnexpectedPlaceholder`] if a single-end template has either of them
    /// - [`RoutingError::OrphanPairedOutput`] if a read 2 output lacks its read 1 output
    /// - [`RoutingError::MixedTemplates`] if the two outputs use different placeholders
    /// - [`RoutingError::InvalidPairFilterMode`] if `pair_filter_mode` is not recognised
    /// - [`RoutingError::InvalidNCutoff`] if `max_n` is negative
    pub fn validate(&self, paired: bool) -> Result<(), RoutingError> {
        let untrimmed_options = [
            self.discard_trimmed,
            self.discard_untrimmed,
            self.untrimmed_output.is_some(),
        ];
        if untrimmed_options.iter().filter(|&&set| set).count() > 1 {
            return Err(RoutingError::ConflictingUntrimmedOptions);
        }
        if let Some(max_n) = self.max_n {
            ReadFilter::n_content(max_n)?;
        }
        let read2_outputs = [
            ("untrimmed_paired_output", &self.untrimmed_paired_output),
            ("too_short_paired_output", &self.too_short_paired_output),
            ("too_long_paired_output", &self.too_long_paired_output),
        ];
        let read1_outputs = [
            ("untrimmed_output", &self.untrimmed_output),
            ("too_short_output", &self.too_short_output),
            ("too_long_output", &self.too_long_output),
        ];
        let outputs = read2_outputs.into_iter().zip(read1_outputs);
        for ((paired_option, read2), (option, read1)) in outputs {
            if read2.is_some() && read1.is_none() {
                return Err(RoutingError::OrphanPairedOutput { paired_option, option });
            }
        }
        check_template(&self.output.to_string_lossy(), paired)?;
        if paired {
            self.pair_filter_mode()?;
            let paired_output = self
                .paired_output
                .as_ref()
                .ok_or_else(|| RoutingError::MissingPairedOutput("output".to_string()))?;
            let output = self.output.to_string_lossy();
            let paired_output = paired_output.to_string_lossy();
            check_template(&paired_output, paired)?;
            if output.contains(NAME_PLACEHOLDER) != paired_output.contains(NAME_PLACEHOLDER)
                || is_combinatorial(&output) != is_combinatorial(&paired_output)
            {
                return Err(RoutingError::MixedTemplates);
            }
        }
        Ok(())
    }

    /// The untrimmed output unless untrimmed reads are discarded.
    fn untrimmed_outputs(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        if self.discard_untrimmed {
            (None, None)
        } else {
            (self.untrimmed_output.clone(), self.untrimmed_paired_output.clone())
        }
    }

    /// Assemble a single-end pipeline, creating every static output file.
    pub fn build_single_end(&self) -> Result<SingleEndPipeline> {
        self.validate(false)?;
        let mut stages: Vec<Box<dyn SingleEndStage>> = vec![];

        if let Some(path) = &self.rest_file {
            stages.push(Box::new(RestFileWriter::create(path)?));
        }
        if let Some(path) = &self.info_file {
            stages.push(Box::new(InfoFileWriter::create(path)?));
        }
        if let Some(path) = &self.wildcard_file {
            stages.push(Box::new(WildcardFileWriter::create(path)?));
        }

        let open = |path: &Option<PathBuf>| -> Result<Option<Box<dyn SequenceWriter>>> {
            path.as_deref().map(|p| create_writer(p, self.qualities)).transpose()
        };
        if let Some(minimum_length) = self.minimum_length {
            let writer = open(&self.too_short_output)?;
            stages.push(Box::new(Redirector::new(writer, ReadFilter::TooShort(minimum_length))));
        }
        if let Some(maximum_length) = self.maximum_length {
            let writer = open(&self.too_long_output)?;
            stages.push(Box::new(Redirector::new(writer, ReadFilter::TooLong(maximum_length))));
        }
        if let Some(max_n) = self.max_n {
            stages.push(Box::new(Redirector::new(None, ReadFilter::n_content(max_n)?)));
        }
        if self.discard_casava {
            stages.push(Box::new(Redirector::new(None, ReadFilter::Casava)));
        }

        let output = self.output.to_string_lossy();
        let (untrimmed, _) = self.untrimmed_outputs();
        if output.contains(NAME_PLACEHOLDER) {
            stages.push(Box::new(Demultiplexer::new(&output, untrimmed, self.qualities)?));
        } else {
            if self.discard_untrimmed || untrimmed.is_some() {
                let writer = open(&untrimmed)?;
                stages.push(Box::new(Redirector::new(writer, ReadFilter::DiscardUntrimmed)));
            }
            if self.discard_trimmed {
                stages.push(Box::new(Redirector::new(None, ReadFilter::DiscardTrimmed)));
            }
            stages.push(Box::new(NoFilter::new(create_writer(&self.output, self.qualities)?)));
        }
        Ok(SingleEndPipeline::new(stages)?)
    }

    /// Assemble a paired-end pipeline, creating every static output file.
    pub fn build_paired_end(&self) -> Result<PairedEndPipeline> {
        self.validate(true)?;
        let mode = self.pair_filter_mode()?;
        let mut stages: Vec<Box<dyn PairedEndStage>> = vec![];

        if let Some(path) = &self.rest_file {
            stages.push(Box::new(RestFileWriter::create(path)?));
        }
        if let Some(path) = &self.info_file {
            stages.push(Box::new(InfoFileWriter::create(path)?));
        }
        if let Some(path) = &self.wildcard_file {
            stages.push(Box::new(WildcardFileWriter::create(path)?));
        }

        if let Some(minimum_length) = self.minimum_length {
            let writer = create_paired_writer(
                self.too_short_output.as_ref(),
                self.too_short_paired_output.as_ref(),
                "too_short_output",
                self.qualities,
            )?;
            let filter = ReadFilter::TooShort(minimum_length);
            stages.push(Box::new(PairedRedirector::with_filter(writer, filter, mode)));
        }
        if let Some(maximum_length) = self.maximum_length {
            let writer = create_paired_writer(
                self.too_long_output.as_ref(),
                self.too_long_paired_output.as_ref(),
                "too_long_output",
                self.qualities,
            )?;
            let filter = ReadFilter::TooLong(maximum_length);
            stages.push(Box::new(PairedRedirector::with_filter(writer, filter, mode)));
        }
        if let Some(max_n) = self.max_n {
            let filter = ReadFilter::n_content(max_n)?;
            stages.push(Box::new(PairedRedirector::with_filter(None, filter, mode)));
        }
        if self.discard_casava {
            stages.push(Box::new(PairedRedirector::with_filter(None, ReadFilter::Casava, mode)));
        }

        let output = self.output.to_string_lossy();
        let paired_output = self
            .paired_output
            .as_ref()
            .ok_or_else(|| RoutingError::MissingPairedOutput("output".to_string()))?;
        let paired_output_template = paired_output.to_string_lossy();
        let (untrimmed, untrimmed_paired) = self.untrimmed_outputs();
        if is_combinatorial(&output) {
            let untrimmed_name =
                if self.discard_untrimmed { None } else { Some(UNKNOWN_ADAPTER_NAME.to_string()) };
            stages.push(Box::new(CombinatorialDemultiplexer::new(
                &output,
                &paired_output_template,
                untrimmed_name,
                self.qualities,
            )?));
        } else if output.contains(NAME_PLACEHOLDER) {
            stages.push(Box::new(PairedDemultiplexer::new(
                &output,
                &paired_output_template,
                untrimmed,
                untrimmed_paired,
                self.qualities,
            )?));
        } else {
            if self.discard_untrimmed || untrimmed.is_some() {
                let writer = create_paired_writer(
                    untrimmed.as_ref(),
                    untrimmed_paired.as_ref(),
                    "untrimmed_output",
                    self.qualities,
                )?;
                let filter = ReadFilter::DiscardUntrimmed;
                stages.push(Box::new(PairedRedirector::with_filter(writer, filter, mode)));
            }
            if self.discard_trimmed {
                let filter = ReadFilter::DiscardTrimmed;
                stages.push(Box::new(PairedRedirector::with_filter(None, filter, mode)));
            }
            let writer = PairedFastxWriter::new(
                create_writer(&self.output, self.qualities)?,
                create_writer(paired_output, self.qualities)?,
            );
            stages.push(Box::new(PairedNoFilter::new(Box::new(writer))));
        }
        Ok(PairedEndPipeline::new(stages)?)
    }
}

/// True if `template` has both combinatorial placeholders.
fn is_combinatorial(template: &str) -> bool {
    template.contains(NAME1_PLACEHOLDER) && template.contains(NAME2_PLACEHOLDER)
}

/// Fails if `template` has half of the combinatorial placeholders, or any of them when single-end.
fn check_template(template: &str, paired: bool) -> Result<(), RoutingError> {
    let has_name1 = template.contains(NAME1_PLACEHOLDER);
    let has_name2 = template.contains(NAME2_PLACEHOLDER);
    let template = template.to_string();
    match (has_name1, has_name2) {
        (true, _) if !paired => {
            Err(RoutingError::UnexpectedPlaceholder { template, placeholder: NAME1_PLACEHOLDER })
        }
        (false, true) if !paired => {
            Err(RoutingError::UnexpectedPlaceholder { template, placeholder: NAME2_PLACEHOLDER })
        }
        (true, false) => {
            Err(RoutingError::MissingPlaceholder { template, placeholder: NAME2_PLACEHOLDER })
        }
        (false, true) => {
            Err(RoutingError::MissingPlaceholder { template, placeholder: NAME1_PLACEHOLDER })
        }
        _ => Ok(()),
    }
}

/// Set up logging, defaulting to the `info` level unless `RUST_LOG` says otherwise.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn setup_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
}
