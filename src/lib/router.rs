//! Routing of resolved read pairs to the output FASTQs of their label.
//!
//! A [`ReadRouter`] owns, for one lane, a [`PooledSampleWriter`] per configured sample plus one
//! for undetermined and one for ambiguous pairs.  Every pair routed is written to exactly one
//! of them.  All labels except the ambiguous one also collect [`DemultiplexStats`].

use anyhow::{anyhow, Context, Result};
use log::debug;
use seq_io::fastq::OwnedRecord;

use crate::{
    fastq_header::{FastqHeader, FastqHeaderError},
    matcher::ResolvedLabel,
    metrics::DemultiplexStats,
    pooled_sample_writer::PooledSampleWriter,
    utils::s,
};

/// The output of one label.
#[derive(Debug)]
struct Destination {
    writer: PooledSampleWriter,
    /// The index written into headers, `None` to keep the observed index.
    index: Option<Vec<u8>>,
    stats: Option<DemultiplexStats>,
}

impl Destination {
    fn finish(self) -> Result<LabelCounts> {
        let pairs = self.writer.pairs_written;
        self.writer.finish()?;
        Ok(LabelCounts { stats: self.stats.unwrap_or_default(), pairs })
    }
}

/// The counts collected for one label once routing has finished.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LabelCounts {
    pub stats: DemultiplexStats,
    /// Read pairs written to the label's FASTQs
    pub pairs: u64,
}

/// The counts of a whole lane once routing has finished.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoutedLane {
    /// Per configured sample, in sample order
    pub samples: Vec<LabelCounts>,
    pub undetermined: LabelCounts,
    /// Ambiguous pairs carry no statistics
    pub ambiguous_pairs: u64,
}

impl RoutedLane {
    /// All pairs written, over every label.
    pub fn total_pairs(&self) -> u64 {
        self.samples.iter().map(|c| c.pairs).sum::<u64>()
            + self.undetermined.pairs
            + self.ambiguous_pairs
    }
}

/// Writes resolved read pairs of one lane to the output of their label.
#[derive(Debug)]
pub struct ReadRouter {
    samples: Vec<Destination>,
    undetermined: Destination,
    ambiguous: Destination,
    keep_indexes: bool,
}

impl ReadRouter {
    /// Create a new [`ReadRouter`].
    ///
    /// # Arguments
    /// - `samples` - the configured index and writer of each sample, in sample order
    /// - `undetermined` - the writer for pairs matching no sample
    /// - `ambiguous` - the writer for pairs matching more than one sample
    /// - `keep_indexes` - if true the observed index is kept in the headers of sample pairs
    pub fn new(
        samples: Vec<(Vec<u8>, PooledSampleWriter)>,
        undetermined: PooledSampleWriter,
        ambiguous: PooledSampleWriter,
        keep_indexes: bool,
    ) -> Self {
        let samples = samples
            .into_iter()
            .map(|(index, writer)| Destination {
                writer,
                index: Some(index),
                stats: Some(DemultiplexStats::default()),
            })
            .collect();
        Self {
            samples,
            undetermined: Destination {
                writer: undetermined,
                index: None,
                stats: Some(DemultiplexStats::default()),
            },
            ambiguous: Destination { writer: ambiguous, index: None, stats: None },
            keep_indexes,
        }
    }

    /// Write `read1` then `read2` to the output of `label` and update its statistics.
    ///
    /// Unless indexes are kept, headers of pairs resolved to a sample get the sample's configured
    /// index.  When a UMI is given it is added to both read names.
    pub fn route(
        &mut self,
        label: &ResolvedLabel,
        mut read1: OwnedRecord,
        mut read2: OwnedRecord,
        umi: Option<&[u8]>,
    ) -> Result<()> {
        let destination = match *label {
            ResolvedLabel::Sample { sample_index, .. } => {
                let num_samples = self.samples.len();
                self.samples.get_mut(sample_index).ok_or_else(|| {
                    anyhow!("Sample index {} out of range for {} samples", sample_index, num_samples)
                })?
            }
            ResolvedLabel::Undetermined => &mut self.undetermined,
            ResolvedLabel::Ambiguous => &mut self.ambiguous,
        };

        if let Some(stats) = destination.stats.as_mut() {
            stats.update_with_pair(label, &read1.qual, &read2.qual);
        }

        let index = if self.keep_indexes { None } else { destination.index.as_deref() };
        if index.is_some() || umi.is_some() {
            rewrite_header(&mut read1, index, umi)?;
            rewrite_header(&mut read2, index, umi)?;
        }
        destination.writer.write_pair(&read1, &read2)
    }

    /// Close every writer, returning the collected counts.
    ///
    /// All writers are closed even when closing one of them fails; the first error is returned.
    pub fn finish(self) -> Result<RoutedLane> {
        let samples: Vec<Result<LabelCounts>> =
            self.samples.into_iter().map(Destination::finish).collect();
        let undetermined = self.undetermined.finish();
        let ambiguous = self.ambiguous.finish();

        let samples = samples.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(RoutedLane { samples, undetermined: undetermined?, ambiguous_pairs: ambiguous?.pairs })
    }
}

/// Set the index and/or UMI of a read's header.
fn rewrite_header(read: &mut OwnedRecord, index: Option<&[u8]>, umi: Option<&[u8]>) -> Result<()> {
    let mut updated = Vec::with_capacity(read.head.len() + umi.map_or(0, |u| u.len() + 1));
    {
        let mut header = FastqHeader::try_from(read.head.as_slice())
            .with_context(|| format!("Unable to parse read header: {}", s(&read.head)))?;
        if let Some(index) = index {
            match header.set_index(index) {
                Ok(()) => (),
                Err(FastqHeaderError::MissingComment) => {
                    debug!("No index to replace in read header: {}", s(&read.head));
                }
                Err(e) => return Err(anyhow!(e)),
            }
        }
        if let Some(umi) = umi {
            header.set_umi(umi);
        }
        header.copy_to_vec(&mut updated);
    }
    read.head = updated;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{fs::File, io::BufWriter, path::PathBuf};

    use itertools::Itertools;
    use pooled_writer::{bgzf::BgzfCompressor, Pool};
    use seq_io::fastq::OwnedRecord;
    use tempfile::TempDir;

    use super::{rewrite_header, ReadRouter};
    use crate::{
        matcher::ResolvedLabel,
        pooled_sample_writer::PooledSampleWriter,
        utils::test_commons::{read_triple, slurp_fastq, INDEX_A, INDEX_B},
    };

    /// Route the given pairs through a router with samples A and B, returning the output files
    /// (A, B, undetermined, ambiguous; R1 then R2 each) and the router's counts.
    fn route_all(
        dir: &TempDir,
        keep_indexes: bool,
        pairs: Vec<(ResolvedLabel, OwnedRecord, OwnedRecord, Option<&[u8]>)>,
    ) -> (Vec<PathBuf>, super::RoutedLane) {
        let files: Vec<PathBuf> = ["a", "b", "und", "amb"]
            .iter()
            .flat_map(|label| {
                [1, 2].map(|r| dir.path().join(format!("{}_R{}_001.fastq.gz", label, r)))
            })
            .collect();
        let raw_writers =
            files.iter().map(|name| BufWriter::new(File::create(name).unwrap())).collect();
        let (mut pool, pooled_writers) =
            Pool::new::<_, BgzfCompressor>(1, 1, 2, raw_writers).unwrap();
        let mut writers: Vec<PooledSampleWriter> = pooled_writers
            .into_iter()
            .chunks(2)
            .into_iter()
            .map(|w| PooledSampleWriter::new(w.collect()).unwrap())
            .collect();
        let ambiguous = writers.pop().unwrap();
        let undetermined = writers.pop().unwrap();
        let samples = [INDEX_A, INDEX_B]
            .iter()
            .map(|i| i.as_bytes().to_vec())
            .zip(writers.into_iter())
            .collect();

        let mut router = ReadRouter::new(samples, undetermined, ambiguous, keep_indexes);
        for (label, r1, r2, umi) in pairs {
            router.route(&label, r1, r2, umi).unwrap();
        }
        let counts = router.finish().unwrap();
        pool.stop_pool().unwrap();
        (files, counts)
    }

    fn heads(file: &PathBuf) -> Vec<String> {
        slurp_fastq(file).into_iter().map(|r| String::from_utf8(r.head).unwrap()).collect()
    }

    #[test]
    fn test_route_rewrites_sample_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let (a1, a2, _) = read_triple(1, 1, "ACGTACGA", None);
        let (u1, u2, _) = read_triple(1, 2, "GGGGGGGG", None);
        let (m1, m2, _) = read_triple(1, 3, "ACGTAAGC", None);
        let pairs = vec![
            (ResolvedLabel::Sample { sample_index: 0, mismatches: 1 }, a1, a2, None),
            (ResolvedLabel::Undetermined, u1, u2, None),
            (ResolvedLabel::Ambiguous, m1, m2, None),
        ];
        let (files, counts) = route_all(&dir, false, pairs);

        assert_eq!(heads(&files[0]), vec!["H00233:4:AAAFGW3HV:1:1101:59586:1 1:N:0:ACGTACGT"]);
        assert_eq!(heads(&files[1]), vec!["H00233:4:AAAFGW3HV:1:1101:59586:1 3:N:0:ACGTACGT"]);
        assert!(slurp_fastq(&files[2]).is_empty());
        // Undetermined and ambiguous keep the observed index
        assert_eq!(heads(&files[4]), vec!["H00233:4:AAAFGW3HV:1:1101:59586:2 1:N:0:NNNNNNNN"]);
        assert_eq!(heads(&files[6]), vec!["H00233:4:AAAFGW3HV:1:1101:59586:3 1:N:0:NNNNNNNN"]);
        assert_eq!(slurp_fastq(&files[7]).len(), 1);

        assert_eq!(counts.samples[0].pairs, 1);
        assert_eq!(counts.samples[0].stats.reads, 2);
        assert_eq!(counts.samples[0].stats.one_mismatch_reads, 2);
        assert_eq!(counts.samples[0].stats.yield_bases, 20);
        assert_eq!(counts.samples[1].pairs, 0);
        assert_eq!(counts.undetermined.pairs, 1);
        assert_eq!(counts.undetermined.stats.reads, 2);
        assert_eq!(counts.undetermined.stats.perfect_index_reads, 0);
        assert_eq!(counts.ambiguous_pairs, 1);
        assert_eq!(counts.total_pairs(), 3);
    }

    #[test]
    fn test_route_keep_indexes_and_umi() {
        let dir = tempfile::tempdir().unwrap();
        let (b1, b2, _) = read_triple(1, 1, INDEX_B, None);
        let pairs = vec![(
            ResolvedLabel::Sample { sample_index: 1, mismatches: 0 },
            b1,
            b2,
            Some(b"AACC".as_slice()),
        )];
        let (files, counts) = route_all(&dir, true, pairs);
        assert_eq!(
            heads(&files[2]),
            vec!["H00233:4:AAAFGW3HV:1:1101:59586:1:AACC 1:N:0:NNNNNNNN"]
        );
        assert_eq!(
            heads(&files[3]),
            vec!["H00233:4:AAAFGW3HV:1:1101:59586:1:AACC 3:N:0:NNNNNNNN"]
        );
        assert_eq!(counts.samples[1].stats.perfect_index_reads, 2);
    }

    #[test]
    fn test_route_rejects_unknown_sample() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> =
            (0..6).map(|i| dir.path().join(format!("{}.fastq.gz", i))).collect();
        let raw_writers =
            files.iter().map(|name| BufWriter::new(File::create(name).unwrap())).collect();
        let (mut pool, pooled_writers) =
            Pool::new::<_, BgzfCompressor>(1, 1, 2, raw_writers).unwrap();
        let mut writers: Vec<PooledSampleWriter> = pooled_writers
            .into_iter()
            .chunks(2)
            .into_iter()
            .map(|w| PooledSampleWriter::new(w.collect()).unwrap())
            .collect();
        let ambiguous = writers.pop().unwrap();
        let undetermined = writers.pop().unwrap();
        let samples = vec![(INDEX_A.as_bytes().to_vec(), writers.pop().unwrap())];
        let mut router = ReadRouter::new(samples, undetermined, ambiguous, false);

        let (r1, r2, _) = read_triple(1, 1, INDEX_A, None);
        let label = ResolvedLabel::Sample { sample_index: 3, mismatches: 0 };
        assert!(router.route(&label, r1, r2, None).is_err());
        assert_eq!(router.finish().unwrap().total_pairs(), 0);
        pool.stop_pool().unwrap();
    }

    #[test]
    fn test_rewrite_header_without_comment() {
        let mut read =
            OwnedRecord { head: b"inst:1:FC:1:1:2:3".to_vec(), seq: b"A".to_vec(), qual: b"I".to_vec() };
        rewrite_header(&mut read, Some(b"ACGT"), None).unwrap();
        assert_eq!(read.head, b"inst:1:FC:1:1:2:3");
        rewrite_header(&mut read, Some(b"ACGT"), Some(b"TT")).unwrap();
        assert_eq!(read.head, b"inst:1:FC:1:1:2:3:TT");
    }

    #[test]
    fn test_rewrite_header_malformed() {
        let mut read = OwnedRecord { head: b"inst:1".to_vec(), seq: vec![], qual: vec![] };
        assert!(rewrite_header(&mut read, Some(b"ACGT"), None).is_err());
    }
}
