//! A library of functionality for demultiplexing the undetermined FASTQs of a sequencing run by
//! lane and index.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - The [`sample_sheet::SampleSheet`] is parsed and turned into a [`layout::RunLayout`] naming
//!   every output directory and file.
//! - For each lane, three [`thread_reader::ThreadReader`]s read chunks of the read 1, read 2, and
//!   index read FASTQs, which the [`demux::LaneDemultiplexer`] consumes in lockstep.
//! - The observed index of every pair is resolved to a sample, undetermined, or ambiguous by a
//!   [`matcher::Matcher`].
//! - The [`router::ReadRouter`] rewrites the headers, writes the pair through the
//!   [`pooled_sample_writer::PooledSampleWriter`] of its label, and collects [`metrics`].
//! - [`run::run`] ties the lanes together and writes the summary table.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod demux;
pub mod fastq_header;
pub mod layout;
pub mod matcher;
pub mod metrics;
pub mod opts;
pub mod pooled_sample_writer;
pub mod router;
pub mod run;
pub mod sample_sheet;
pub mod thread_reader;
pub mod utils;
