//! Demultiplexing of one lane.
//!
//! A lane's read 1, read 2, and index read FASTQs are read on background threads in chunks and
//! consumed in strict lockstep: the n-th record of each file must come from the same cluster.  The
//! observed index is extracted from the index read, resolved by a [`Matcher`], and the pair is
//! handed to the [`ReadRouter`].  Once all records are consumed the statistics are finalized.
//!
//! A [`LaneDemultiplexer`] moves through the states `Init -> Streaming -> Finalizing -> Done`.

use std::{fs::File, io::BufWriter, num::NonZeroUsize, path::Path};

use anyhow::{ensure, Context, Result};
use gzp::BUFSIZE;
use itertools::Itertools;
use log::{debug, info, warn};
use pooled_writer::{bgzf::BgzfCompressor, Pool};
use read_structure::{ReadSegment, ReadStructure};
use seq_io::fastq::{Record, RecordSet, RefRecord};
use thiserror::Error;

use crate::{
    fastq_header::{FastqHeader, FastqHeaderError},
    layout::LaneLayout,
    matcher::{Matcher, MatcherKind, ResolvedLabel, ReverseComplementChecker},
    metrics::{DemultiplexStats, DemultiplexStatsProcessed},
    pooled_sample_writer::PooledSampleWriter,
    router::{ReadRouter, RoutedLane},
    thread_reader::ThreadReader,
    utils::{s, LaneInputs, MultiZip},
};

/// The names of the input streams, in the order they are read.
const STREAM_NAMES: [&str; 3] = ["read 1", "read 2", "index read"];

/// The error raised when the three input streams of a lane do not agree.
#[derive(Error, Debug)]
pub enum LaneError {
    #[error("Lane {lane}: record {record} does not describe the same cluster in all inputs: {read1} / {read2} / {index}")]
    Desync { lane: usize, record: u64, read1: String, read2: String, index: String },

    #[error("Lane {lane}: input FASTQs have different numbers of records, first difference at record {record}")]
    UnevenStreams { lane: usize, record: u64 },

    #[error("Lane {lane}: unable to parse the {stream} header of record {record}: {header}")]
    InvalidHeader {
        lane: usize,
        record: u64,
        stream: &'static str,
        header: String,
        source: FastqHeaderError,
    },
}

/// The states a lane moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LaneState {
    Init,
    Streaming,
    Finalizing,
    Done,
}

/// Settings shared by every lane of a run.
#[derive(Debug, Clone)]
pub struct LaneSettings {
    /// Keep the observed index in the headers of sample reads
    pub keep_indexes: bool,
    /// Where the sample index (and optional UMI) are found in the index read
    pub index_read_structure: ReadStructure,
    pub matcher: MatcherKind,
    /// Number of records read from each input at one time
    pub chunksize: NonZeroUsize,
    pub decompression_threads_per_reader: usize,
    pub writer_threads: usize,
    pub compressor_threads: usize,
    /// Log progress every this many reads (two per pair), zero to disable
    pub progress_interval: u64,
}

/// Implement defaults that match the CLI options to allow for easier testing.
#[cfg(test)]
impl Default for LaneSettings {
    fn default() -> Self {
        use std::str::FromStr;
        Self {
            keep_indexes: false,
            index_read_structure: ReadStructure::from_str("+B").unwrap(),
            matcher: MatcherKind::CachedHammingDistance,
            chunksize: NonZeroUsize::new(1000).unwrap(),
            decompression_threads_per_reader: 2,
            writer_threads: 2,
            compressor_threads: 2,
            progress_interval: 500_000,
        }
    }
}

/// The result of demultiplexing one lane.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneStats {
    pub lane: usize,
    pub state: LaneState,
    /// Every read pair of the lane, ambiguous ones included
    pub total_pairs: u64,
    pub ambiguous_pairs: u64,
    /// Undetermined pairs whose index is the reverse complement of a configured index
    pub reverse_complement_hits: u64,
    /// One row per configured sample, in sample order, then the undetermined row
    pub rows: Vec<DemultiplexStatsProcessed>,
}

impl LaneStats {
    /// Zero statistics for a lane whose inputs were not found.
    pub fn skipped(layout: &LaneLayout) -> Self {
        let empty = DemultiplexStats::default();
        let rows = layout
            .samples
            .iter()
            .map(|s| &s.description)
            .chain(std::iter::once(&layout.undetermined_description))
            .map(|description| empty.as_processed(description, layout.lane, 0))
            .collect();
        Self {
            lane: layout.lane,
            state: LaneState::Done,
            total_pairs: 0,
            ambiguous_pairs: 0,
            reverse_complement_hits: 0,
            rows,
        }
    }
}

/// A helper struct to build up the extracted barcode sequences in both concatenated and
/// delimited form.
#[derive(Debug, Default)]
struct ExtractedBarcode {
    /// The extracted barcode with no delimiters.
    concatenated: Vec<u8>,
    /// The extracted barcode with `+` between segments.
    delimited: Vec<u8>,
}

impl ExtractedBarcode {
    fn add_bases(&mut self, bases: &[u8]) {
        if !self.delimited.is_empty() {
            self.delimited.push(b'+');
        }
        self.delimited.extend(bases);
        self.concatenated.extend(bases);
    }
}

/// Counters kept while streaming.
#[derive(Debug, Default)]
struct StreamCounts {
    total_pairs: u64,
    reverse_complement_hits: u64,
}

/// Demultiplexes the inputs of one lane into the outputs of its [`LaneLayout`].
pub struct LaneDemultiplexer<'a> {
    layout: &'a LaneLayout,
    inputs: LaneInputs,
    settings: &'a LaneSettings,
    state: LaneState,
}

impl<'a> LaneDemultiplexer<'a> {
    pub fn new(layout: &'a LaneLayout, inputs: LaneInputs, settings: &'a LaneSettings) -> Self {
        Self { layout, inputs, settings, state: LaneState::Init }
    }

    fn transition(&mut self, next: LaneState) {
        debug!("Lane {}: {} -> {}", self.layout.lane, self.state, next);
        self.state = next;
    }

    /// Demultiplex the lane.
    ///
    /// Output writers are closed whether or not demultiplexing succeeds, so partial output of a
    /// failed lane remains on disk.
    pub fn run(mut self) -> Result<LaneStats> {
        let lane = self.layout.lane;
        info!("Demultiplexing lane {}", lane);
        debug!("Lane {}: reading {}", lane, describe_inputs(&self.inputs));

        debug!("Lane {}: using {:?} matcher", lane, self.settings.matcher);
        let matcher = self.settings.matcher.build(self.layout.indexes());
        let reverse_complements = ReverseComplementChecker::new(matcher.indexes());

        let raw_writers = self
            .layout
            .outputs()
            .flat_map(|o| [&o.read1, &o.read2])
            .map(|name| {
                File::create(name)
                    .with_context(|| format!("Unable to create file: {}", name.to_string_lossy()))
                    .map(|f| BufWriter::with_capacity(BUFSIZE, f))
            })
            .collect::<Result<Vec<_>>>()?;
        let writer_threads = self.settings.writer_threads.clamp(1, raw_writers.len());
        let (mut pool, pooled_writers) = Pool::new::<_, BgzfCompressor>(
            writer_threads,
            self.settings.compressor_threads.max(1),
            2,
            raw_writers,
        )?;
        let mut writers = vec![];
        for grouped_writers in &pooled_writers.into_iter().chunks(2) {
            writers.push(PooledSampleWriter::new(grouped_writers.collect::<Vec<_>>())?);
        }
        // Writers are in the order of `LaneLayout::outputs`.
        let ambiguous = writers.pop().context("Missing ambiguous writers")?;
        let undetermined = writers.pop().context("Missing undetermined writers")?;
        let samples = self.layout.indexes().into_iter().zip(writers.into_iter()).collect();
        let mut router = ReadRouter::new(samples, undetermined, ambiguous, self.settings.keep_indexes);

        let readers = self
            .inputs
            .in_stream_order()
            .into_iter()
            .map(|path| {
                ThreadReader::new(
                    path.to_path_buf(),
                    self.settings.chunksize,
                    self.settings.decompression_threads_per_reader,
                )
            })
            .collect::<Vec<_>>();

        self.transition(LaneState::Streaming);
        let streamed = self.stream(readers, &mut router, matcher.as_ref(), &reverse_complements);
        let finished = router.finish();
        let stopped = pool.stop_pool();
        let counts = streamed?;
        let routed = finished.context("Failed to flush and finish writing")?;
        stopped?;

        self.transition(LaneState::Finalizing);
        let stats = self.finalize(&counts, &routed)?;
        self.transition(LaneState::Done);
        info!(
            "Finished lane {}: {} read pairs, {} ambiguous",
            lane, stats.total_pairs, stats.ambiguous_pairs
        );
        Ok(LaneStats { state: self.state, ..stats })
    }

    /// Pull records from the three inputs in lockstep, resolving and routing each pair.
    fn stream(
        &self,
        readers: Vec<ThreadReader>,
        router: &mut ReadRouter,
        matcher: &dyn Matcher,
        reverse_complements: &ReverseComplementChecker,
    ) -> Result<StreamCounts> {
        let lane = self.layout.lane;
        let mut counts = StreamCounts::default();
        loop {
            let chunks: Vec<Option<RecordSet>> =
                readers.iter().map(|r| r.rx.recv().ok()).collect();
            if chunks.iter().all(Option::is_none) {
                break;
            }
            let lengths = chunks.iter().map(|c| c.as_ref().map_or(0, RecordSet::len)).collect_vec();
            if chunks.iter().any(Option::is_none) || !lengths.iter().all_equal() {
                // A reader that stopped early may have done so because of an I/O error.
                for (reader, chunk) in readers.into_iter().zip(chunks.iter()) {
                    if chunk.is_none() {
                        join_reader(reader)?;
                    }
                }
                let shortest = lengths.iter().min().copied().unwrap_or(0) as u64;
                return Err(
                    LaneError::UnevenStreams { lane, record: counts.total_pairs + shortest + 1 }.into()
                );
            }

            let chunks: Vec<RecordSet> = chunks.into_iter().flatten().collect();
            let iterators = chunks.iter().map(IntoIterator::into_iter).collect();
            for records in MultiZip::new(iterators) {
                let record = counts.total_pairs + 1;
                self.process_pair(&records, record, router, matcher, reverse_complements, &mut counts)?;
                counts.total_pairs += 1;
                let reads = 2 * counts.total_pairs;
                if progress_due(reads, self.settings.progress_interval) {
                    info!("Lane {}: processed {} reads", lane, reads);
                }
            }
        }

        for reader in readers {
            join_reader(reader)?;
        }
        Ok(counts)
    }

    /// Check, resolve, and route one synchronized record triple (read 1, read 2, index read).
    fn process_pair(
        &self,
        records: &[RefRecord],
        record: u64,
        router: &mut ReadRouter,
        matcher: &dyn Matcher,
        reverse_complements: &ReverseComplementChecker,
        counts: &mut StreamCounts,
    ) -> Result<()> {
        let lane = self.layout.lane;
        let headers = records
            .iter()
            .zip(STREAM_NAMES)
            .map(|(r, stream)| {
                FastqHeader::try_from(r.head()).map_err(|source| LaneError::InvalidHeader {
                    lane,
                    record,
                    stream,
                    header: s(r.head()),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !headers[0].same_cluster(&headers[1]) || !headers[0].same_cluster(&headers[2]) {
            return Err(LaneError::Desync {
                lane,
                record,
                read1: s(records[0].head()),
                read2: s(records[1].head()),
                index: s(records[2].head()),
            }
            .into());
        }

        let (observed, umi) = self.extract_index(&records[2])?;
        let label = matcher.resolve(&observed);
        if label == ResolvedLabel::Undetermined && reverse_complements.is_reverse_complement(&observed)
        {
            counts.reverse_complement_hits += 1;
        }
        router.route(
            &label,
            records[0].to_owned_record(),
            records[1].to_owned_record(),
            umi.as_deref(),
        )
    }

    /// Extract the observed index and, if the index read structure has molecular barcode
    /// segments, the UMI.
    fn extract_index(&self, index_read: &RefRecord) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let structure = &self.settings.index_read_structure;
        let extract = |segment: &ReadSegment| {
            segment
                .extract_bases_and_quals(index_read.seq(), index_read.qual())
                .map(|(bases, _)| bases)
                .with_context(|| {
                    format!("Failed to extract bases for {:?} from {:?}", segment, s(index_read.head()))
                })
        };

        let mut index = ExtractedBarcode::default();
        for segment in structure.sample_barcodes() {
            index.add_bases(extract(segment)?);
        }
        let mut umi = None;
        for segment in structure.molecular_barcodes() {
            umi.get_or_insert_with(ExtractedBarcode::default).add_bases(extract(segment)?);
        }
        let umi = umi.map(|u| u.delimited);
        Ok((index.concatenated, umi))
    }

    /// Turn the raw counts into the reported rows.
    fn finalize(&self, counts: &StreamCounts, routed: &RoutedLane) -> Result<LaneStats> {
        let lane = self.layout.lane;
        ensure!(
            routed.total_pairs() == counts.total_pairs,
            "Lane {}: {} read pairs were read but {} were written",
            lane,
            counts.total_pairs,
            routed.total_pairs()
        );
        if counts.reverse_complement_hits > 0 {
            warn!(
                "Lane {}: {} undetermined read pairs have the reverse complement of a configured index, check the index orientation in the sample sheet",
                lane, counts.reverse_complement_hits
            );
        }

        let mut rows: Vec<DemultiplexStatsProcessed> = self
            .layout
            .samples
            .iter()
            .zip(routed.samples.iter())
            .map(|(sample, c)| c.stats.as_processed(&sample.description, lane, counts.total_pairs))
            .collect();
        rows.push(routed.undetermined.stats.as_processed(
            &self.layout.undetermined_description,
            lane,
            counts.total_pairs,
        ));

        Ok(LaneStats {
            lane,
            state: self.state,
            total_pairs: counts.total_pairs,
            ambiguous_pairs: routed.ambiguous_pairs,
            reverse_complement_hits: counts.reverse_complement_hits,
            rows,
        })
    }
}

/// True when the last pair, which brought the read count to `reads`, crossed a multiple of
/// `interval`.
fn progress_due(reads: u64, interval: u64) -> bool {
    interval > 0 && reads / interval > reads.saturating_sub(2) / interval
}

/// Wait for a reader thread, returning any error it hit.
fn join_reader(reader: ThreadReader) -> Result<()> {
    drop(reader.rx);
    match reader.handle.join() {
        Ok(result) => result,
        Err(e) => std::panic::resume_unwind(e),
    }
}

/// The input paths of a lane, for log messages.
pub fn describe_inputs(inputs: &LaneInputs) -> String {
    inputs.in_stream_order().into_iter().map(Path::to_string_lossy).join(", ")
}
