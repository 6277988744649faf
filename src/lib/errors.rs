//! Errors raised while building routing stages from their configuration.
//!
//! All of these are detected before the first read is processed.  Failures that happen while
//! reads are flowing (opening or writing output files) are reported through [`anyhow::Error`]
//! with the underlying [`std::io::Error`] kept as the root cause.

use thiserror::Error;

/// The error that may occur when constructing a routing stage or a pipeline.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("pair_filter_mode must be 'any', 'both' or 'first', found: '{0}'")]
    InvalidPairFilterMode(String),

    #[error("The output path template '{template}' must contain the placeholder '{placeholder}'")]
    MissingPlaceholder { template: String, placeholder: &'static str },

    #[error("The single-end output path template '{template}' cannot contain '{placeholder}'")]
    UnexpectedPlaceholder { template: String, placeholder: &'static str },

    #[error("The N-content cutoff must not be negative, found: {0}")]
    InvalidNCutoff(f64),

    #[error("At least one of the two read filters must be given for a paired-end redirector")]
    NoPairFilter,

    #[error("Only one of discard_trimmed, discard_untrimmed and untrimmed_output can be used")]
    ConflictingUntrimmedOptions,

    #[error("A paired-end pipeline requires a second output for '{0}'")]
    MissingPairedOutput(String),

    #[error("'{paired_option}' was given without '{option}'")]
    OrphanPairedOutput { paired_option: &'static str, option: &'static str },

    #[error("Both outputs must use the same placeholders ('{{name}}' or '{{name1}}' and '{{name2}}')")]
    MixedTemplates,

    #[error("A pipeline must end with a terminal stage, found: {0}")]
    NonTerminalLastStage(String),

    #[error("A pipeline requires at least one stage")]
    EmptyPipeline,
}
