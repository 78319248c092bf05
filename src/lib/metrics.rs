//! Functionality pertaining to the collection of statistics during demultiplexing.
//!
//! Each label of a lane, other than the ambiguous one, owns a [`DemultiplexStats`] that collects
//! raw counts while read pairs are routed.  Once the lane has been fully read the raw counts are
//! turned into a [`DemultiplexStatsProcessed`] row, which is both printed as a summary table and
//! written to `demultiplex_stats.tsv`.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};

use crate::matcher::ResolvedLabel;

/// The name of the statistics file written to the output directory.
pub const STATS_FILE_NAME: &str = "demultiplex_stats.tsv";

/// Quality offset of Sanger/Illumina 1.8+ FASTQ.
const PHRED_OFFSET: u8 = 33;

/// The columns of the summary table printed to standard output.
pub const SUMMARY_COLUMNS: [&str; 15] = [
    "Lane",
    "SampleID",
    "SampleRef",
    "Index",
    "Description",
    "Control",
    "Project",
    "Yield(Mbases)",
    "%PF",
    "#Reads",
    "%ofRawClustersPerLane",
    "%PerfectIndexReads",
    "%OneMismatchReads(Index)",
    "%of>=Q30Bases(PF)",
    "MeanQualityScore(PF)",
];

/// Quality summary of a single read.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct BaseQualCounter {
    /// The count of bases with quality >= 30
    pub q30_bases: u64,
    /// The mean base quality of the read, zero for an empty read
    pub mean_quality: f64,
}

impl BaseQualCounter {
    /// Summarize a quality string.
    pub fn from_quals(quals: &[u8]) -> Self {
        if quals.is_empty() {
            return Self::default();
        }
        let mut q30_bases = 0;
        let mut sum = 0_u64;
        for q in quals {
            let q = q.saturating_sub(PHRED_OFFSET);
            sum += u64::from(q);
            if q >= 30 {
                q30_bases += 1;
            }
        }
        Self { q30_bases, mean_quality: sum as f64 / quals.len() as f64 }
    }
}

/// Raw counters for one label of one lane.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DemultiplexStats {
    /// Number of reads, two per pair
    pub reads: u64,
    /// Total number of bases over both reads of every pair
    pub yield_bases: u64,
    /// Reads whose index matched without mismatches
    pub perfect_index_reads: u64,
    /// Reads whose index matched with a single mismatch
    pub one_mismatch_reads: u64,
    /// Bases with quality >= 30
    pub q30_bases: u64,
    /// Sum over reads of each read's mean base quality
    pub mean_quality_sum: f64,
}

impl DemultiplexStats {
    /// Account for one read pair routed to this label.
    ///
    /// Only pairs resolved to a sample count towards the perfect and one-mismatch counters.
    pub fn update_with_pair(&mut self, label: &ResolvedLabel, read1_quals: &[u8], read2_quals: &[u8]) {
        self.reads += 2;
        self.yield_bases += (read1_quals.len() + read2_quals.len()) as u64;
        if let ResolvedLabel::Sample { mismatches, .. } = *label {
            if mismatches == 0 {
                self.perfect_index_reads += 2;
            } else if mismatches == 1 {
                self.one_mismatch_reads += 2;
            }
        }
        for quals in [read1_quals, read2_quals] {
            let counter = BaseQualCounter::from_quals(quals);
            self.q30_bases += counter.q30_bases;
            self.mean_quality_sum += counter.mean_quality;
        }
    }

    /// Derive the reported values.
    ///
    /// # Arguments
    /// - `description` - the descriptive columns of the label
    /// - `lane` - the lane the label belongs to
    /// - `lane_total_pairs` - every read pair of the lane, including ambiguous ones
    pub fn as_processed(
        &self,
        description: &LabelDescription,
        lane: usize,
        lane_total_pairs: u64,
    ) -> DemultiplexStatsProcessed {
        let mut processed = DemultiplexStatsProcessed {
            lane,
            sample_id: description.sample_id.clone(),
            sample_ref: description.sample_ref.clone(),
            index: description.index.clone(),
            description: description.description.clone(),
            control: description.control.clone(),
            project: description.project.clone(),
            yield_mbases: 0.0,
            percent_pf: 100,
            reads: self.reads,
            percent_of_lane: 0.0,
            percent_perfect_index_reads: 0.0,
            percent_one_mismatch_reads: 0.0,
            percent_q30_bases: 0.0,
            mean_quality_score: 0.0,
            recipe: description.recipe.clone(),
            operator: description.operator.clone(),
            directory: description.directory.clone(),
        };
        if self.yield_bases > 0 {
            let reads = self.reads as f64;
            processed.yield_mbases = round2(self.yield_bases as f64 / 1e6);
            if lane_total_pairs > 0 {
                processed.percent_of_lane = round2(100.0 * reads / (2 * lane_total_pairs) as f64);
            }
            processed.percent_perfect_index_reads =
                round2(100.0 * self.perfect_index_reads as f64 / reads);
            processed.percent_one_mismatch_reads =
                round2(100.0 * self.one_mismatch_reads as f64 / reads);
            processed.percent_q30_bases =
                round2(100.0 * self.q30_bases as f64 / self.yield_bases as f64);
            processed.mean_quality_score = round2(self.mean_quality_sum / reads);
        }
        processed
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The descriptive (non-numeric) columns reported for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDescription {
    pub sample_id: String,
    pub sample_ref: String,
    pub index: String,
    pub description: String,
    pub control: String,
    pub project: String,
    pub recipe: String,
    pub operator: String,
    /// Absolute path of the directory holding the label's FASTQs
    pub directory: String,
}

/// The final statistics of one label of one lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemultiplexStatsProcessed {
    #[serde(rename = "Lane")]
    pub lane: usize,
    #[serde(rename = "SampleID")]
    pub sample_id: String,
    #[serde(rename = "SampleRef")]
    pub sample_ref: String,
    #[serde(rename = "Index")]
    pub index: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Control")]
    pub control: String,
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "Yield(Mbases)")]
    pub yield_mbases: f64,
    /// Always 100, reads failing filters are not removed
    #[serde(rename = "%PF")]
    pub percent_pf: u32,
    #[serde(rename = "#Reads")]
    pub reads: u64,
    #[serde(rename = "%ofRawClustersPerLane")]
    pub percent_of_lane: f64,
    #[serde(rename = "%PerfectIndexReads")]
    pub percent_perfect_index_reads: f64,
    #[serde(rename = "%OneMismatchReads(Index)")]
    pub percent_one_mismatch_reads: f64,
    #[serde(rename = "%of>=Q30Bases(PF)")]
    pub percent_q30_bases: f64,
    #[serde(rename = "MeanQualityScore(PF)")]
    pub mean_quality_score: f64,
    #[serde(rename = "Recipe")]
    pub recipe: String,
    #[serde(rename = "Operator")]
    pub operator: String,
    #[serde(rename = "Directory")]
    pub directory: String,
}

impl DemultiplexStatsProcessed {
    /// The values of the [`SUMMARY_COLUMNS`], in order.
    fn summary_fields(&self) -> [String; 15] {
        [
            self.lane.to_string(),
            self.sample_id.clone(),
            self.sample_ref.clone(),
            self.index.clone(),
            self.description.clone(),
            self.control.clone(),
            self.project.clone(),
            self.yield_mbases.to_string(),
            self.percent_pf.to_string(),
            self.reads.to_string(),
            self.percent_of_lane.to_string(),
            self.percent_perfect_index_reads.to_string(),
            self.percent_one_mismatch_reads.to_string(),
            self.percent_q30_bases.to_string(),
            self.mean_quality_score.to_string(),
        ]
    }
}

/// Write the tab-separated summary table, header first.
pub fn print_summary_table<W: Write>(rows: &[DemultiplexStatsProcessed], writer: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    writer.write_record(SUMMARY_COLUMNS)?;
    for row in rows {
        writer.write_record(row.summary_fields())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write all rows, with the extra recipe, operator, and directory columns, to
/// [`STATS_FILE_NAME`] in `output_dir`.
pub fn write_stats_tsv<P: AsRef<Path>>(output_dir: P, rows: &[DemultiplexStatsProcessed]) -> Result<()> {
    let output_path = output_dir.as_ref().join(STATS_FILE_NAME);
    let delim = DelimFile::default();
    delim.write_tsv(&output_path, rows.iter())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use fgoxide::io::DelimFile;
    use rstest::rstest;

    use super::{
        print_summary_table, write_stats_tsv, BaseQualCounter, DemultiplexStats,
        DemultiplexStatsProcessed, LabelDescription, STATS_FILE_NAME, SUMMARY_COLUMNS,
    };
    use crate::matcher::ResolvedLabel;

    fn description() -> LabelDescription {
        LabelDescription {
            sample_id: "Sample_S1".to_string(),
            sample_ref: "hg19".to_string(),
            index: "ACGTACGT".to_string(),
            description: "desc S1".to_string(),
            control: "N".to_string(),
            project: "P1".to_string(),
            recipe: "R1".to_string(),
            operator: "NN".to_string(),
            directory: "/out/Project_P1/Sample_S1".to_string(),
        }
    }

    #[rstest]
    #[case(b"", 0, 0.0)]
    #[case(b"IIII", 4, 40.0)]
    #[case(b"?#", 1, 16.0)]
    #[case(b"\x10", 0, 0.0)]
    fn test_base_qual_counter(#[case] quals: &[u8], #[case] q30: u64, #[case] mean: f64) {
        let counter = BaseQualCounter::from_quals(quals);
        assert_eq!(counter.q30_bases, q30);
        assert!((counter.mean_quality - mean).abs() < 1e-9);
    }

    #[test]
    fn test_update_with_pair() {
        let mut stats = DemultiplexStats::default();
        stats.update_with_pair(&ResolvedLabel::Sample { sample_index: 0, mismatches: 0 }, b"IIII", b"II");
        stats.update_with_pair(&ResolvedLabel::Sample { sample_index: 0, mismatches: 1 }, b"####", b"##");
        stats.update_with_pair(&ResolvedLabel::Undetermined, b"II", b"II");
        assert_eq!(stats.reads, 6);
        assert_eq!(stats.yield_bases, 16);
        assert_eq!(stats.perfect_index_reads, 2);
        assert_eq!(stats.one_mismatch_reads, 2);
        assert_eq!(stats.q30_bases, 10);
        assert!((stats.mean_quality_sum - 164.0).abs() < 1e-9);
    }

    #[test]
    fn test_as_processed() {
        let mut stats = DemultiplexStats::default();
        for _ in 0..3 {
            stats.update_with_pair(
                &ResolvedLabel::Sample { sample_index: 0, mismatches: 0 },
                b"IIIIIIIIII",
                b"##########",
            );
        }
        stats.update_with_pair(
            &ResolvedLabel::Sample { sample_index: 0, mismatches: 1 },
            b"IIIIIIIIII",
            b"##########",
        );

        let processed = stats.as_processed(&description(), 3, 8);
        assert_eq!(processed.lane, 3);
        assert_eq!(processed.sample_id, "Sample_S1");
        assert_eq!(processed.reads, 8);
        assert_eq!(processed.yield_mbases, 0.0);
        assert_eq!(processed.percent_pf, 100);
        assert_eq!(processed.percent_of_lane, 50.0);
        assert_eq!(processed.percent_perfect_index_reads, 75.0);
        assert_eq!(processed.percent_one_mismatch_reads, 25.0);
        assert_eq!(processed.percent_q30_bases, 50.0);
        assert_eq!(processed.mean_quality_score, 21.0);
        assert_eq!(processed.directory, "/out/Project_P1/Sample_S1");
    }

    #[test]
    fn test_as_processed_yield_in_megabases() {
        let mut stats = DemultiplexStats::default();
        let quals = vec![b'I'; 1_250_000];
        stats.update_with_pair(&ResolvedLabel::Undetermined, &quals, &quals);
        let processed = stats.as_processed(&description(), 1, 3);
        assert_eq!(processed.yield_mbases, 2.5);
        assert_eq!(processed.percent_of_lane, 33.33);
        assert_eq!(processed.percent_perfect_index_reads, 0.0);
        assert_eq!(processed.percent_q30_bases, 100.0);
        assert_eq!(processed.mean_quality_score, 40.0);
    }

    #[test]
    fn test_as_processed_without_yield_stays_zero() {
        let processed = DemultiplexStats::default().as_processed(&description(), 1, 10);
        assert_eq!(processed.reads, 0);
        assert_eq!(processed.percent_of_lane, 0.0);
        assert_eq!(processed.mean_quality_score, 0.0);
        assert_eq!(processed.percent_pf, 100);
    }

    #[test]
    fn test_summary_table_and_stats_file() {
        let mut stats = DemultiplexStats::default();
        stats.update_with_pair(&ResolvedLabel::Sample { sample_index: 0, mismatches: 0 }, b"II", b"II");
        let rows = vec![stats.as_processed(&description(), 1, 1)];

        let mut table = vec![];
        print_summary_table(&rows, &mut table).unwrap();
        let table = String::from_utf8(table).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], SUMMARY_COLUMNS.join("\t"));
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), 15);
        assert_eq!(fields[1], "Sample_S1");
        assert_eq!(fields[9], "2");
        assert_eq!(fields[11], "100");

        let dir = tempfile::tempdir().unwrap();
        write_stats_tsv(dir.path(), &rows).unwrap();
        let read: Vec<DemultiplexStatsProcessed> =
            DelimFile::default().read_tsv(&dir.path().join(STATS_FILE_NAME)).unwrap();
        assert_eq!(read, rows);
    }
}
