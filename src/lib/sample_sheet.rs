//! Parsing and validation of HiSeq style sample sheets.
//!
//! The sheet is a CSV with a header row.  It may optionally be a sectioned sheet, in which case
//! only the rows of the `[Data]` section are read.  Each row assigns one index to one sample in
//! one lane.
use std::collections::BTreeSet;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use csv::{ReaderBuilder, StringRecord, Trim};
use fgoxide::io::Io;
use serde::Deserialize;
use thiserror::Error;

/// The columns every sample sheet must have, with the aliases accepted for each.
const REQUIRED_COLUMNS: [&[&str]; 4] = [
    &["Lane"],
    &["SampleID", "Sample_ID"],
    &["SampleProject", "Sample_Project"],
    &["Index", "index"],
];

/// The error that may occur when parsing the [`SampleSheet`].
#[derive(Error, Debug)]
pub enum SampleSheetError {
    #[error("Io error occurred")]
    Io(#[from] std::io::Error),

    #[error("Io error occurred")]
    FgError(#[from] fgoxide::FgError),

    #[error("The sample sheet was empty")]
    Empty,

    #[error("The '[Data]' section is missing its header line")]
    NoData,

    #[error("The sample sheet has no samples")]
    NoSamples,

    #[error("The sample sheet header is missing the '{column}' column")]
    MissingColumn { column: String },

    #[error("Unable to deserialize line number {line}: {source}")]
    DeserializeRecord { source: csv::Error, line: usize },

    #[error("Sample {id} on line {line} has an empty index")]
    EmptyIndex { id: String, line: usize },

    #[error("Sample {id} on line {line} has an invalid index `{index}`, only A, C, G, T, and N are allowed")]
    InvalidIndex { id: String, index: String, line: usize },

    #[error("Sample on line {line} has an unknown control flag `{value}`")]
    InvalidControlFlag { value: String, line: usize },

    #[error("Index {index} is used more than once in lane {lane}")]
    DuplicateIndex { lane: usize, index: String },

    #[error(
        "{sample_a}:{index_a} and {sample_b}:{index_b} in lane {lane} have indexes with different lengths."
    )]
    UnequalIndexLengths {
        lane: usize,
        sample_a: String,
        index_a: String,
        sample_b: String,
        index_b: String,
    },

    #[error("Index {index} is not present in the sample sheet, only indexes present in the sample sheet may be requested")]
    RequestedIndexNotFound { index: String },
}

/// A row of the sample sheet as written.
#[derive(Deserialize, Debug)]
struct RawEntry {
    #[serde(rename = "FCID", default)]
    fcid: Option<String>,
    #[serde(rename = "Lane")]
    lane: usize,
    #[serde(rename = "SampleID", alias = "Sample_ID")]
    sample_id: String,
    #[serde(rename = "SampleRef", default)]
    sample_ref: String,
    #[serde(rename = "Index", alias = "index")]
    index: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Control", default)]
    control: String,
    #[serde(rename = "Recipe", default)]
    recipe: String,
    #[serde(rename = "Operator", default)]
    operator: String,
    #[serde(rename = "SampleProject", alias = "Sample_Project")]
    sample_project: String,
}

/// One validated row of the sample sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSheetEntry {
    pub fcid: Option<String>,
    pub lane: usize,
    pub sample_id: String,
    pub sample_ref: String,
    /// The upper-cased index (barcode) sequence
    pub index: String,
    pub description: String,
    pub control: bool,
    pub recipe: String,
    pub operator: String,
    pub sample_project: String,
}

impl SampleSheetEntry {
    fn from_raw(raw: RawEntry, line: usize) -> Result<Self, SampleSheetError> {
        let index = raw.index.to_ascii_uppercase();
        if index.is_empty() {
            return Err(SampleSheetError::EmptyIndex { id: raw.sample_id, line });
        }
        if !index.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N')) {
            return Err(SampleSheetError::InvalidIndex { id: raw.sample_id, index, line });
        }
        let control = match raw.control.to_ascii_uppercase().as_str() {
            "" | "N" | "NO" | "FALSE" | "0" => false,
            "Y" | "YES" | "TRUE" | "1" => true,
            _ => return Err(SampleSheetError::InvalidControlFlag { value: raw.control, line }),
        };
        Ok(Self {
            fcid: raw.fcid.filter(|f| !f.is_empty()),
            lane: raw.lane,
            sample_id: raw.sample_id,
            sample_ref: raw.sample_ref,
            index,
            description: raw.description,
            control,
            recipe: raw.recipe,
            operator: raw.operator,
            sample_project: raw.sample_project,
        })
    }

    /// The control flag as written in reports.
    pub fn control_flag(&self) -> &'static str {
        if self.control {
            "Y"
        } else {
            "N"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleSheet {
    /// The entries in the order they appear in the sheet
    pub entries: Vec<SampleSheetEntry>,
}

impl SampleSheet {
    /// Builds a `SampleSheet` from the CSV at the given path.
    ///
    /// The file is either a plain CSV with a header line, or a sectioned sheet whose `[Data]`
    /// section holds the header and the sample rows.  The `Lane`, `SampleID`, `SampleProject`,
    /// and `Index` columns are required; `FCID`, `SampleRef`, `Description`, `Control`,
    /// `Recipe`, and `Operator` are optional.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SampleSheetError> {
        let io = Io::default();
        let lines = io.read_lines(&path).map_err(SampleSheetError::FgError)?;
        Self::from_lines(&lines)
    }

    /// Builds a `SampleSheet` from the lines of a sample sheet.
    fn from_lines(lines: &[String]) -> Result<Self, SampleSheetError> {
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Err(SampleSheetError::Empty);
        }

        // Index of the first line holding the header, and of the line after the last data row.
        let (start, end) = match lines.iter().position(|l| l.trim_start().starts_with("[Data]")) {
            Some(section) => {
                let start = section + 1;
                let end = lines[start..]
                    .iter()
                    .position(|l| l.trim_start().starts_with('['))
                    .map_or(lines.len(), |offset| start + offset);
                (start, end)
            }
            None => (0, lines.len()),
        };

        let data = lines[start..end].join("\n");
        let mut reader = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(data.as_bytes());

        let mut header: Option<StringRecord> = None;
        let mut entries = vec![];
        for record in reader.records() {
            let record = record.map_err(|e| {
                let line = e.position().map_or(start + 1, |p| start + p.line() as usize);
                SampleSheetError::DeserializeRecord { source: e, line }
            })?;
            // 1-based line number within the file
            let line = start + record.position().map_or(0, |p| p.line() as usize);
            if record.iter().all(str::is_empty) {
                continue;
            }
            match &header {
                None => {
                    Self::check_required_columns(&record)?;
                    header = Some(record);
                }
                Some(header) => {
                    let raw: RawEntry = record
                        .deserialize(Some(header))
                        .map_err(|e| SampleSheetError::DeserializeRecord { source: e, line })?;
                    entries.push(SampleSheetEntry::from_raw(raw, line)?);
                }
            }
        }

        if header.is_none() {
            return Err(SampleSheetError::NoData);
        }
        if entries.is_empty() {
            return Err(SampleSheetError::NoSamples);
        }
        Self::validate(&entries)?;
        Ok(Self { entries })
    }

    fn check_required_columns(header: &StringRecord) -> Result<(), SampleSheetError> {
        for aliases in REQUIRED_COLUMNS {
            if !header.iter().any(|column| aliases.contains(&column)) {
                return Err(SampleSheetError::MissingColumn { column: aliases[0].to_string() });
            }
        }
        Ok(())
    }

    /// Checks that indexes are unique within a lane and all have the same length.
    fn validate(entries: &[SampleSheetEntry]) -> Result<(), SampleSheetError> {
        let mut first_in_lane: AHashMap<usize, &SampleSheetEntry> = AHashMap::new();
        let mut seen: AHashSet<(usize, &str)> = AHashSet::new();
        for entry in entries {
            if !seen.insert((entry.lane, entry.index.as_str())) {
                return Err(SampleSheetError::DuplicateIndex {
                    lane: entry.lane,
                    index: entry.index.clone(),
                });
            }
            let first = first_in_lane.entry(entry.lane).or_insert(entry);
            if first.index.len() != entry.index.len() {
                return Err(SampleSheetError::UnequalIndexLengths {
                    lane: entry.lane,
                    sample_a: first.sample_id.clone(),
                    index_a: first.index.clone(),
                    sample_b: entry.sample_id.clone(),
                    index_b: entry.index.clone(),
                });
            }
        }
        Ok(())
    }

    /// The distinct lanes in the sheet, in ascending order.
    pub fn lanes(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.lane).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// The entries of the given lane, in sheet order.
    pub fn entries_for_lane(&self, lane: usize) -> Vec<&SampleSheetEntry> {
        self.entries.iter().filter(|e| e.lane == lane).collect()
    }

    /// Fails if any requested index does not appear in any lane of the sheet.
    pub fn check_requested_indexes(&self, requested: &[String]) -> Result<(), SampleSheetError> {
        for index in requested {
            let index = index.to_ascii_uppercase();
            if !self.entries.iter().any(|e| e.index == index) {
                return Err(SampleSheetError::RequestedIndexNotFound { index });
            }
        }
        Ok(())
    }

    /// Keeps only the entries whose index was requested.
    #[must_use]
    pub fn restrict_to_indexes(self, requested: &[String]) -> Self {
        let requested: AHashSet<String> =
            requested.iter().map(|i| i.to_ascii_uppercase()).collect();
        let entries = self.entries.into_iter().filter(|e| requested.contains(&e.index)).collect();
        Self { entries }
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use rstest::rstest;

    use super::{SampleSheet, SampleSheetError};
    use crate::utils::test_commons::{sample_row, write_sample_sheet, SAMPLE_SHEET_HEADER};

    fn lines(contents: &[&str]) -> Vec<String> {
        contents.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_ok_sample_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_sheet(
            &dir,
            &[
                &sample_row(1, "S1", "acgtacgt"),
                &sample_row(1, "S2", "TTGCAAGC"),
                &sample_row(2, "S1", "ACGTACGT"),
            ],
        );
        let sheet = SampleSheet::from_path(&path).unwrap();
        assert_eq!(sheet.entries.len(), 3);
        assert_eq!(sheet.lanes(), vec![1, 2]);

        let entry = &sheet.entries[0];
        assert_eq!(entry.fcid.as_deref(), Some("FC1"));
        assert_eq!(entry.lane, 1);
        assert_eq!(entry.sample_id, "S1");
        assert_eq!(entry.sample_ref, "hg19");
        assert_eq!(entry.index, "ACGTACGT");
        assert_eq!(entry.description, "desc S1");
        assert!(!entry.control);
        assert_eq!(entry.control_flag(), "N");
        assert_eq!(entry.recipe, "R1");
        assert_eq!(entry.operator, "NN");
        assert_eq!(entry.sample_project, "P1");

        let lane1: Vec<&str> =
            sheet.entries_for_lane(1).iter().map(|e| e.sample_id.as_str()).collect();
        assert_eq!(lane1, vec!["S1", "S2"]);
        assert!(sheet.entries_for_lane(3).is_empty());
    }

    #[test]
    fn test_data_section_and_aliases() {
        let contents = lines(&[
            "[Header]",
            "Date,Today",
            "[Data]",
            "Lane,Sample_ID,index,Sample_Project,Control",
            "",
            "1,S1,ACGT,Proj,Y",
            "1,S2,TTTT,Proj,N",
            "[Settings]",
            "Adapter,AGATCGGAAGAGC",
        ]);
        let sheet = SampleSheet::from_lines(&contents).unwrap();
        assert_eq!(sheet.entries.len(), 2);
        assert!(sheet.entries[0].control);
        assert_eq!(sheet.entries[0].fcid, None);
        assert_eq!(sheet.entries[0].sample_ref, "");
        assert_eq!(sheet.entries[1].sample_project, "Proj");
    }

    #[rstest]
    #[case(&[], "empty")]
    #[case(&["", "  "], "empty")]
    #[case(&["[Header]", "Date,Today", "[Data]"], "no data")]
    #[case(&[SAMPLE_SHEET_HEADER], "no samples")]
    fn test_empty_sheets(#[case] contents: &[&str], #[case] expected: &str) {
        let result = SampleSheet::from_lines(&lines(contents));
        match expected {
            "empty" => assert_matches!(result, Err(SampleSheetError::Empty)),
            "no data" => assert_matches!(result, Err(SampleSheetError::NoData)),
            _ => assert_matches!(result, Err(SampleSheetError::NoSamples)),
        }
    }

    #[rstest]
    #[case("FCID,Lane,SampleID,SampleRef,Description,SampleProject", "Index")]
    #[case("Lane,SampleID,Index", "SampleProject")]
    #[case("SampleID,Index,SampleProject", "Lane")]
    #[case("Lane,Index,SampleProject", "SampleID")]
    fn test_missing_column(#[case] header: &str, #[case] expected: &str) {
        let result = SampleSheet::from_lines(&lines(&[header, "1,2,3"]));
        assert_matches!(result, Err(SampleSheetError::MissingColumn { column: _ }));
        if let Err(SampleSheetError::MissingColumn { column }) = result {
            assert_eq!(column, expected);
        }
    }

    #[test]
    fn test_bad_lane_reports_line() {
        let contents = lines(&[
            "[Data]",
            SAMPLE_SHEET_HEADER,
            &sample_row(1, "S1", "ACGT"),
            "FC1,one,S2,hg19,TTTT,desc,N,R1,NN,P1",
        ]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::DeserializeRecord { source: _, line: 4 }));
    }

    #[test]
    fn test_empty_index() {
        let contents = lines(&[SAMPLE_SHEET_HEADER, "FC1,1,S1,hg19,,desc,N,R1,NN,P1"]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::EmptyIndex { id: _, line: 2 }));
    }

    #[test]
    fn test_invalid_index() {
        let contents = lines(&[SAMPLE_SHEET_HEADER, &sample_row(1, "S1", "ACGT-TTTT")]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::InvalidIndex { id: _, index: _, line: 2 }));
    }

    #[test]
    fn test_invalid_control_flag() {
        let contents = lines(&[SAMPLE_SHEET_HEADER, "FC1,1,S1,hg19,ACGT,desc,maybe,R1,NN,P1"]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::InvalidControlFlag { value: _, line: 2 }));
    }

    #[test]
    fn test_duplicate_index_in_lane() {
        let contents = lines(&[
            SAMPLE_SHEET_HEADER,
            &sample_row(1, "S1", "ACGT"),
            &sample_row(2, "S1", "ACGT"),
            &sample_row(2, "S2", "acgt"),
        ]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::DuplicateIndex { lane: 2, index: _ }));
    }

    #[test]
    fn test_unequal_index_lengths_in_lane() {
        let contents = lines(&[
            SAMPLE_SHEET_HEADER,
            &sample_row(1, "S1", "ACGT"),
            &sample_row(2, "S2", "ACGTAC"),
            &sample_row(1, "S3", "ACGTAC"),
        ]);
        let result = SampleSheet::from_lines(&contents);
        assert_matches!(result, Err(SampleSheetError::UnequalIndexLengths { lane: 1, .. }));
        if let Err(SampleSheetError::UnequalIndexLengths { sample_a, sample_b, .. }) = result {
            assert_eq!(sample_a, "S1");
            assert_eq!(sample_b, "S3");
        }
    }

    #[test]
    fn test_requested_indexes() {
        let contents = lines(&[
            SAMPLE_SHEET_HEADER,
            &sample_row(1, "S1", "ACGT"),
            &sample_row(1, "S2", "TTTT"),
            &sample_row(2, "S3", "ACGT"),
        ]);
        let sheet = SampleSheet::from_lines(&contents).unwrap();

        assert!(sheet.check_requested_indexes(&["acgt".to_string()]).is_ok());
        assert_matches!(
            sheet.check_requested_indexes(&["ACGT".to_string(), "GGGG".to_string()]),
            Err(SampleSheetError::RequestedIndexNotFound { index: _ })
        );

        let sheet = sheet.restrict_to_indexes(&["ACGT".to_string()]);
        let ids: Vec<&str> = sheet.entries.iter().map(|e| e.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S3"]);
        assert_eq!(sheet.lanes(), vec![1, 2]);
    }
}
