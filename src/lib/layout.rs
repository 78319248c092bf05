//! The output directory tree and file names of a run.
//!
//! ```text
//! <output-dir>/
//!   Project_<project>/Sample_<id>/<id>_<index>_L00<lane>_R{1,2}_001.fastq.gz
//!   Undetermined_indices/Sample_lane<lane>/lane<lane>_Undetermined_L00<lane>_R{1,2}_001.fastq.gz
//!   Ambiguous_indices/Sample_lane<lane>/lane<lane>_Ambiguous_L00<lane>_R{1,2}_001.fastq.gz
//! ```

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use path_absolutize::Absolutize;

use crate::{
    metrics::LabelDescription,
    sample_sheet::{SampleSheet, SampleSheetEntry},
    utils::lane_input_dir_name,
};

/// The project directory holding the undetermined pairs of every lane.
pub const UNDETERMINED_PROJECT_DIR: &str = "Undetermined_indices";
/// The project directory holding the ambiguous pairs of every lane.
pub const AMBIGUOUS_PROJECT_DIR: &str = "Ambiguous_indices";

/// The read 1 and read 2 FASTQs of one label of one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPair {
    /// The sample directory holding both files
    pub directory: PathBuf,
    pub read1: PathBuf,
    pub read2: PathBuf,
}

impl OutputPair {
    fn new(directory: PathBuf, prefix: &str) -> Self {
        let read1 = directory.join(format!("{}_R1_001.fastq.gz", prefix));
        let read2 = directory.join(format!("{}_R2_001.fastq.gz", prefix));
        Self { directory, read1, read2 }
    }

    /// The project directory, i.e. the parent of the sample directory.
    pub fn project_directory(&self) -> &Path {
        self.directory.parent().unwrap_or(&self.directory)
    }
}

/// The outputs of one configured sample of one lane.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    pub entry: SampleSheetEntry,
    pub output: OutputPair,
    pub description: LabelDescription,
}

/// All outputs of one lane.
#[derive(Debug, Clone)]
pub struct LaneLayout {
    pub lane: usize,
    /// Configured samples, in sample sheet order
    pub samples: Vec<SampleOutput>,
    pub undetermined: OutputPair,
    pub undetermined_description: LabelDescription,
    pub ambiguous: OutputPair,
}

impl LaneLayout {
    fn new(lane: usize, entries: &[&SampleSheetEntry], output_dir: &Path) -> Self {
        let samples = entries
            .iter()
            .map(|entry| {
                let project_dir = output_dir.join(format!("Project_{}", entry.sample_project));
                let sample_dir_name = format!("Sample_{}", entry.sample_id);
                let prefix = format!("{}_{}_L00{}", entry.sample_id, entry.index, lane);
                let output = OutputPair::new(project_dir.join(&sample_dir_name), &prefix);
                let description = LabelDescription {
                    sample_id: sample_dir_name,
                    sample_ref: entry.sample_ref.clone(),
                    index: entry.index.clone(),
                    description: entry.description.clone(),
                    control: entry.control_flag().to_string(),
                    project: entry.sample_project.clone(),
                    recipe: entry.recipe.clone(),
                    operator: entry.operator.clone(),
                    directory: output.directory.to_string_lossy().to_string(),
                };
                SampleOutput { entry: (*entry).clone(), output, description }
            })
            .collect();

        let lane_dir_name = lane_input_dir_name(lane);
        let undetermined = OutputPair::new(
            output_dir.join(UNDETERMINED_PROJECT_DIR).join(&lane_dir_name),
            &format!("lane{}_Undetermined_L00{}", lane, lane),
        );
        let undetermined_description = LabelDescription {
            sample_id: lane_dir_name.clone(),
            sample_ref: "unknown".to_string(),
            index: "Undetermined".to_string(),
            description: format!("unmatched barcodes for lane {}", lane),
            control: "N".to_string(),
            project: UNDETERMINED_PROJECT_DIR.to_string(),
            recipe: "R1".to_string(),
            operator: "NN".to_string(),
            directory: undetermined.directory.to_string_lossy().to_string(),
        };
        let ambiguous = OutputPair::new(
            output_dir.join(AMBIGUOUS_PROJECT_DIR).join(&lane_dir_name),
            &format!("lane{}_Ambiguous_L00{}", lane, lane),
        );

        Self { lane, samples, undetermined, undetermined_description, ambiguous }
    }

    /// The configured indexes, in sample order.
    pub fn indexes(&self) -> Vec<Vec<u8>> {
        self.samples.iter().map(|s| s.entry.index.as_bytes().to_vec()).collect()
    }

    /// Every output pair of the lane: samples in order, then undetermined, then ambiguous.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputPair> {
        self.samples
            .iter()
            .map(|s| &s.output)
            .chain(std::iter::once(&self.undetermined))
            .chain(std::iter::once(&self.ambiguous))
    }
}

/// The outputs of every lane of a run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    /// The absolute output directory
    pub output_dir: PathBuf,
    /// Lanes in ascending order
    pub lanes: Vec<LaneLayout>,
}

impl RunLayout {
    /// Lay out the outputs of every lane in the sample sheet under `output_dir`.
    pub fn new<P: AsRef<Path>>(sample_sheet: &SampleSheet, output_dir: P) -> Result<Self> {
        let output_dir = output_dir
            .as_ref()
            .absolutize()
            .with_context(|| {
                format!("Unable to resolve output directory {}", output_dir.as_ref().to_string_lossy())
            })?
            .to_path_buf();
        let lanes = sample_sheet
            .lanes()
            .into_iter()
            .map(|lane| LaneLayout::new(lane, &sample_sheet.entries_for_lane(lane), &output_dir))
            .collect();
        Ok(Self { output_dir, lanes })
    }

    /// The distinct project directories, in first-seen order.
    pub fn project_directories(&self) -> Vec<&Path> {
        self.lanes
            .iter()
            .flat_map(LaneLayout::outputs)
            .map(OutputPair::project_directory)
            .unique()
            .collect()
    }

    /// The distinct sample directories, in first-seen order.
    pub fn sample_directories(&self) -> Vec<&Path> {
        self.lanes
            .iter()
            .flat_map(LaneLayout::outputs)
            .map(|o| o.directory.as_path())
            .unique()
            .collect()
    }

    /// Fail if any project or sample directory already exists.
    ///
    /// Nothing is created.
    pub fn ensure_no_existing_directories(&self) -> Result<()> {
        for dir in self.project_directories().into_iter().chain(self.sample_directories()) {
            ensure!(
                !dir.exists(),
                "Directory {} already exists, previous results will not be overwritten",
                dir.to_string_lossy()
            );
        }
        Ok(())
    }

    /// Create every sample directory (and its project directory), tolerating existing ones.
    pub fn create_directories(&self) -> Result<()> {
        for dir in self.sample_directories() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Unable to create directory {}", dir.to_string_lossy()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::RunLayout;
    use crate::{
        sample_sheet::SampleSheet,
        utils::test_commons::{sample_row, write_sample_sheet, INDEX_A, INDEX_B},
    };

    fn layout(dir: &Path) -> RunLayout {
        let path = write_sample_sheet(
            dir,
            &[
                &sample_row(1, "S1", INDEX_A),
                &sample_row(1, "S2", INDEX_B),
                &sample_row(2, "S1", INDEX_A),
                "FC1,2,S3,mm10,TTTTTTTT,desc S3,Y,R1,NN,P2",
            ],
        );
        let sheet = SampleSheet::from_path(&path).unwrap();
        RunLayout::new(&sheet, dir.join("out")).unwrap()
    }

    #[test]
    fn test_layout_names() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let out = dir.path().join("out");
        assert_eq!(layout.output_dir, out);
        assert_eq!(layout.lanes.len(), 2);

        let lane1 = &layout.lanes[0];
        assert_eq!(lane1.lane, 1);
        assert_eq!(lane1.indexes(), vec![INDEX_A.as_bytes().to_vec(), INDEX_B.as_bytes().to_vec()]);
        let s1 = &lane1.samples[0];
        assert_eq!(s1.output.directory, out.join("Project_P1").join("Sample_S1"));
        assert_eq!(
            s1.output.read1,
            out.join("Project_P1/Sample_S1/S1_ACGTACGT_L001_R1_001.fastq.gz")
        );
        assert_eq!(
            s1.output.read2,
            out.join("Project_P1/Sample_S1/S1_ACGTACGT_L001_R2_001.fastq.gz")
        );
        assert_eq!(s1.description.sample_id, "Sample_S1");
        assert_eq!(s1.description.directory, out.join("Project_P1/Sample_S1").to_string_lossy());
        assert_eq!(
            lane1.undetermined.read1,
            out.join("Undetermined_indices/Sample_lane1/lane1_Undetermined_L001_R1_001.fastq.gz")
        );
        assert_eq!(
            lane1.ambiguous.read2,
            out.join("Ambiguous_indices/Sample_lane1/lane1_Ambiguous_L001_R2_001.fastq.gz")
        );
        let und = &lane1.undetermined_description;
        assert_eq!(und.sample_id, "Sample_lane1");
        assert_eq!(und.sample_ref, "unknown");
        assert_eq!(und.index, "Undetermined");
        assert_eq!(und.description, "unmatched barcodes for lane 1");
        assert_eq!(und.project, "Undetermined_indices");
        assert_eq!(lane1.outputs().count(), 4);

        let lane2 = &layout.lanes[1];
        assert_eq!(lane2.samples[1].description.control, "Y");
        assert_eq!(lane2.samples[1].output.directory, out.join("Project_P2/Sample_S3"));
    }

    #[test]
    fn test_directories_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let out = dir.path().join("out");
        assert_eq!(
            layout.project_directories(),
            vec![
                out.join("Project_P1"),
                out.join("Undetermined_indices"),
                out.join("Ambiguous_indices"),
                out.join("Project_P2"),
            ]
        );
        // S1 appears in two lanes but has one directory
        assert_eq!(layout.sample_directories().len(), 7);
    }

    #[test]
    fn test_create_and_check_existing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        layout.ensure_no_existing_directories().unwrap();
        layout.create_directories().unwrap();
        for sample_dir in layout.sample_directories() {
            assert!(sample_dir.is_dir());
        }
        let err = layout.ensure_no_existing_directories().unwrap_err();
        assert!(err.to_string().contains("already exists"));
        // Creating again is tolerated
        layout.create_directories().unwrap();
    }
}
