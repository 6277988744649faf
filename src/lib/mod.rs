//! A library for deciding the fate of adapter-trimmed sequencing reads.
//!
//! # Overview
//!
//! Upstream adapter matching produces, for every read (or read pair), an ordered list of
//! [`record::AdapterMatch`]es.  This library routes each read to exactly one destination:
//!
//! - A [`pipeline::SingleEndPipeline`] or [`pipeline::PairedEndPipeline`] offers the read to its
//!   stages in order until one of them consumes it.
//! - Side-file stages in [`annotate`] record details of the matches and pass the read on.
//! - [`redirect::Redirector`]s wrap a [`filters::ReadFilter`] and consume the reads it flags,
//!   writing them to a dedicated output or discarding them.
//! - The terminal stage is either a [`redirect::NoFilter`] writing everything left to one output,
//!   or one of the [`demux`] stages that opens one output per adapter name on first use.
//! - [`metrics`] are collected per stage and can be written to TSV files at the end of a run.
//!
//! [`opts::PipelineOpts`] assembles a pipeline from a flat set of options.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod annotate;
pub mod demux;
pub mod errors;
pub mod fastq_header;
pub mod filters;
pub mod metrics;
pub mod opts;
pub mod pipeline;
pub mod record;
pub mod redirect;
pub mod utils;
pub mod writer;
