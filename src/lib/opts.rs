#![forbid(unsafe_code)]

use std::{num::NonZeroUsize, path::PathBuf, vec::Vec};

use clap::Parser;
use env_logger::Env;
use read_structure::ReadStructure;

use crate::{
    demux::LaneSettings,
    matcher::MatcherKind,
    utils::{built_info, NUM_CPU},
};

pub static TOOL_NAME: &str = "lanedemux";

static SHORT_USAGE: &str = "Demultiplexes the undetermined paired-end FASTQs of each lane by index.";

static LONG_USAGE: &str = "
Demultiplexes the undetermined paired-end FASTQs of each lane by index.

For every lane listed in the sample sheet the three undetermined FASTQs are read from
<input-dir>/Sample_lane<N>/:

  lane<N>_Undetermined_L00<N>_R1_001.fastq[.gz]   read 1
  lane<N>_Undetermined_L00<N>_R2_001.fastq[.gz]   index read
  lane<N>_Undetermined_L00<N>_R3_001.fastq[.gz]   read 2

Each read pair is assigned to the sample whose index is within one mismatch of the observed
index.  Pairs that match no sample are written to Undetermined_indices/, pairs that match more
than one sample to Ambiguous_indices/.  Sample pairs are written to
Project_<project>/Sample_<id>/ under the output directory.

The sample sheet is a CSV with the columns FCID, Lane, SampleID, SampleRef, Index,
Description, Control, Recipe, Operator, SampleProject.

Example invocation:

lanedemux SampleSheet.csv \\
  --input-dir Unaligned/ \\
  --output-dir demuxed/
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// Path to the sample sheet.
    #[clap(display_order = 1)]
    pub sample_sheet: PathBuf,

    /// Demultiplex only the samples with these indexes.
    ///
    /// Every index given must be in the sample sheet.  Existing output directories are tolerated
    /// when this option is used.
    #[clap(long, short = 'i', display_order = 2, multiple_values = true)]
    pub indexes: Option<Vec<String>>,

    /// Keep the observed index in the headers of sample reads.
    ///
    /// By default the index in the header is replaced with the sample's configured index.
    #[clap(long, short = 'k', alias = "keepIndexes", display_order = 3)]
    pub keep_indexes: bool,

    /// The directory holding the Sample_lane<N> input directories.
    #[clap(long, short = 'I', default_value = ".", display_order = 4)]
    pub input_dir: PathBuf,

    /// The directory to write outputs.
    #[clap(long, short, default_value = ".", display_order = 5)]
    pub output_dir: PathBuf,

    /// The read structure of the index read.
    ///
    /// Sample barcode (`B`) segments are matched against the sample indexes, molecular barcode
    /// (`M`) segments are added to the read names as a UMI.  Template (`T`) segments are not
    /// allowed.
    #[clap(long, short = 'r', default_value = "+B", display_order = 11)]
    pub index_read_structure: ReadStructure,

    /// The algorithm used to match observed indexes to sample indexes.
    #[clap(long, default_value = "cached-hamming-distance", possible_values=MatcherKind::possible_values(), display_order = 11)]
    pub matcher: MatcherKind,

    /// Number of lanes to demultiplex at the same time.
    #[clap(long, short = 'l', default_value = "1", display_order = 31)]
    pub lane_threads: usize,

    /// Number of threads per lane for compressing the output reads.
    #[clap(long, default_value = NUM_CPU.as_str(), display_order = 31)]
    pub compressor_threads: usize,

    /// Number of threads per lane for writing compressed reads to output.
    #[clap(long, default_value = "2", display_order = 31)]
    pub writer_threads: usize,

    /// The number of threads to use for decompression for each reader.
    #[clap(long, default_value = "2", display_order = 31, hide = true)]
    pub decompression_threads_per_reader: usize,

    /// The number of reads to extract from a FASTQ at one time.
    #[clap(long, short = 'c', default_value = "1000", display_order = 31, hide = true)]
    pub chunksize: NonZeroUsize,

    /// Log progress every this many reads of a lane, 0 to disable.
    #[clap(long, default_value = "500000", display_order = 31, hide = true)]
    pub progress_interval: u64,
}

impl Opts {
    /// Extract the [`LaneSettings`] shared by every lane from the CLI opts.
    pub fn as_lane_settings(&self) -> LaneSettings {
        LaneSettings {
            keep_indexes: self.keep_indexes,
            index_read_structure: self.index_read_structure.clone(),
            matcher: self.matcher,
            chunksize: self.chunksize,
            decompression_threads_per_reader: self.decompression_threads_per_reader,
            writer_threads: self.writer_threads,
            compressor_threads: self.compressor_threads,
            progress_interval: self.progress_interval,
        }
    }

    /// True when only a subset of the samples is demultiplexed.
    pub fn subset_mode(&self) -> bool {
        self.indexes.is_some()
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        use std::str::FromStr;
        Self {
            sample_sheet: PathBuf::default(),
            indexes: None,
            keep_indexes: false,
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            index_read_structure: ReadStructure::from_str("+B").unwrap(),
            matcher: MatcherKind::CachedHammingDistance,
            lane_threads: 1,
            compressor_threads: 2,
            writer_threads: 2,
            decompression_threads_per_reader: 2,
            chunksize: NonZeroUsize::new(1000).unwrap(),
            progress_interval: 500_000,
        }
    }
}

/// Parse args and set up logging / tracing
pub fn setup() -> Opts {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    Opts::parse()
}
