//! Predicates deciding whether a read should be discarded on a single criterion.
//!
//! A filter never acts on its own; it is wrapped in a [`crate::redirect::Redirector`] (or
//! [`crate::redirect::PairedRedirector`]) which counts the reads it flags and optionally sends
//! them to a writer.  `true` from [`ReadFilter::is_filtered`] always means "discard".

use strum::AsRefStr;

use crate::{
    errors::RoutingError,
    fastq_header::FastqHeader,
    record::{AdapterMatch, SequenceRecord},
};

/// Discards reads whose count (or proportion) of `N` bases is over a cutoff.
///
/// A cutoff below `1.0` is a proportion of the read length, anything else an absolute count.
/// Both comparisons are strict, so a cutoff of `1` keeps reads with a single `N`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NContentFilter {
    cutoff: f64,
    is_proportion: bool,
}

impl NContentFilter {
    /// Create a new [`NContentFilter`].
    ///
    /// # Errors
    ///
    /// - [`RoutingError::InvalidNCutoff`] if the cutoff is negative or not a number
    pub fn new(cutoff: f64) -> Result<Self, RoutingError> {
        if cutoff.is_nan() || cutoff < 0.0 {
            return Err(RoutingError::InvalidNCutoff(cutoff));
        }
        Ok(Self { cutoff, is_proportion: cutoff < 1.0 })
    }

    pub fn is_proportion(&self) -> bool {
        self.is_proportion
    }

    fn is_filtered(&self, read: &SequenceRecord) -> bool {
        let n_count =
            bytecount::count(&read.sequence, b'N') + bytecount::count(&read.sequence, b'n');
        if self.is_proportion {
            // Empty reads have no defined proportion and are kept.
            if read.is_empty() {
                return false;
            }
            n_count as f64 / read.len() as f64 > self.cutoff
        } else {
            n_count as f64 > self.cutoff
        }
    }
}

/// The closed set of single-read filtering criteria.
#[derive(Debug, Clone, PartialEq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReadFilter {
    /// Discard reads strictly shorter than the given length.
    TooShort(usize),
    /// Discard reads strictly longer than the given length.
    TooLong(usize),
    /// Discard reads with too many `N` bases.
    NContent(NContentFilter),
    /// Discard reads without any adapter match.
    DiscardUntrimmed,
    /// Discard reads with at least one adapter match.
    DiscardTrimmed,
    /// Discard reads flagged as failing the CASAVA quality filter in their header.
    Casava,
}

impl ReadFilter {
    /// Build an [`ReadFilter::NContent`] filter, see [`NContentFilter::new`].
    pub fn n_content(cutoff: f64) -> Result<Self, RoutingError> {
        Ok(Self::NContent(NContentFilter::new(cutoff)?))
    }

    /// Returns true if the read should be discarded.  The read is never modified.
    #[inline]
    pub fn is_filtered(&self, read: &SequenceRecord, matches: &[AdapterMatch]) -> bool {
        match self {
            Self::TooShort(minimum_length) => read.len() < *minimum_length,
            Self::TooLong(maximum_length) => read.len() > *maximum_length,
            Self::NContent(filter) => filter.is_filtered(read),
            Self::DiscardUntrimmed => matches.is_empty(),
            Self::DiscardTrimmed => !matches.is_empty(),
            Self::Casava => FastqHeader::from(read.name.as_slice()).is_failed_quality_filter(),
        }
    }

    /// A short, stable name for the criterion, used when reporting metrics.
    pub fn name(&self) -> &str {
        self.as_ref()
    }
}
