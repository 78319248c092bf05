//! Utility functions.
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use gzp::{deflate::Bgzf, BlockFormatSpec, BUFSIZE};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Return the number of cpus as a String
    pub static ref NUM_CPU: String = num_cpus::get().to_string();
}

pub mod built_info {
    use lazy_static::lazy_static;
    include!(concat!(env!("OUT_DIR"), "/built.rs"));

    /// Get a software version string including
    ///   - Git commit hash
    ///   - Git dirty info (whether the repo had uncommitted changes)
    ///   - Cargo package version if no git info found
    fn get_software_version() -> String {
        let prefix = if let Some(s) = GIT_COMMIT_HASH {
            format!("{}-{}", PKG_VERSION, s[0..8].to_owned())
        } else {
            PKG_VERSION.to_string()
        };
        let suffix = match GIT_DIRTY {
            Some(true) => "-dirty",
            _ => "",
        };
        format!("{}{}", prefix, suffix)
    }

    lazy_static! {
        /// Version of the software with git hash
        pub static ref VERSION: String = get_software_version();
    }
}

/// Lossy conversion of bytes for log and error messages.
pub fn s(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// A `MultiZip` object allows for zipping over N items.
///
/// For example, if you have a `Vec` of length 3 of `Vec`s this will pull one item from
/// each of the 3 inner vecs and return a `Vec` of length 3 with those items.
///
/// This will stop iteration as soon as the first of the inner vecs runs out of items.
pub struct MultiZip<T>(Vec<T>);

impl<T> MultiZip<T> {
    /// Create a new [`MultiZip`] iterator over a `Vec` of items.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }
}

impl<T> Iterator for MultiZip<T>
where
    T: Iterator,
{
    type Item = Vec<T::Item>;
    fn next(&mut self) -> Option<Self::Item> {
        self.0.iter_mut().map(Iterator::next).collect()
    }
}

/// The compression of an input FASTQ, sniffed from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum InputCompression {
    Plain,
    Gzip,
    Bgzf,
}

impl InputCompression {
    /// Inspect the header of `file` to decide how it must be decompressed.
    ///
    /// Files too short to hold a gzip header are treated as plain text.
    pub fn detect(file: &Path) -> Result<Self> {
        let reader = File::open(file)
            .map(|f| BufReader::with_capacity(BUFSIZE, f))
            .with_context(|| format!("Failed to open {}", file.to_string_lossy()))?;
        let mut bytes = Vec::with_capacity(Bgzf::HEADER_SIZE);
        reader
            .take(Bgzf::HEADER_SIZE as u64)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Error reading from: {}", file.to_string_lossy()))?;
        Ok(Self::from_header_bytes(&bytes))
    }

    fn from_header_bytes(bytes: &[u8]) -> Self {
        if bytes.len() < 3 || bytes[0] != 31 || bytes[1] != 139 || bytes[2] != 8 {
            Self::Plain
        } else if bytes.len() >= 14 && bytes[3] & 4 == 4 && bytes[12] == b'B' && bytes[13] == b'C'
        {
            Self::Bgzf
        } else {
            Self::Gzip
        }
    }
}

lazy_static! {
    /// lane<N>_Undetermined_L00<N>_R<1|2|3>_001.fastq[.gz]
    static ref LANE_INPUT_REGEX: Regex =
        Regex::new(r"^lane(\d+)_Undetermined_L00(\d+)_R([123])_001\.fastq(\.gz)?$").unwrap();
}

/// The name of the directory holding the undetermined FASTQs of a lane.
pub fn lane_input_dir_name(lane: usize) -> String {
    format!("Sample_lane{}", lane)
}

/// The three synchronized undetermined FASTQs of one lane.
///
/// The instrument names them `R1` (read 1), `R2` (index read), and `R3` (read 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneInputs {
    pub lane: usize,
    pub read1: PathBuf,
    pub read2: PathBuf,
    pub index: PathBuf,
}

impl LaneInputs {
    /// Locate the inputs for `lane` under `input_dir/Sample_lane<N>/`.
    ///
    /// Returns `Ok(None)` when the lane directory does not exist.  A lane directory that lacks any
    /// of the three FASTQs is an error.  When both an uncompressed and a gzipped copy of a FASTQ
    /// are present, the uncompressed one is used.
    pub fn locate<P: AsRef<Path>>(input_dir: P, lane: usize) -> Result<Option<Self>> {
        let lane_dir = input_dir.as_ref().join(lane_input_dir_name(lane));
        if !lane_dir.is_dir() {
            return Ok(None);
        }

        // read number -> (plain, gzipped)
        let mut found: AHashMap<u8, (Option<PathBuf>, Option<PathBuf>)> = AHashMap::new();
        let entries = std::fs::read_dir(&lane_dir)
            .with_context(|| format!("Failed to list {}", lane_dir.to_string_lossy()))?;
        for entry in entries {
            let path = entry?.path();
            let file_name = match path.file_name().and_then(|f| f.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if let Some(captures) = LANE_INPUT_REGEX.captures(&file_name) {
                let same_lane = [&captures[1], &captures[2]]
                    .iter()
                    .all(|n| n.parse::<usize>().map_or(false, |n| n == lane));
                if !same_lane || !path.is_file() {
                    continue;
                }
                let read_number = captures[3].as_bytes()[0];
                let slot = found.entry(read_number).or_insert((None, None));
                if captures.get(4).is_some() {
                    slot.1 = Some(path);
                } else {
                    slot.0 = Some(path);
                }
            }
        }

        let mut pick = |read_number: u8| -> Result<PathBuf> {
            match found.remove(&read_number) {
                Some((Some(plain), _)) => Ok(plain),
                Some((None, Some(gzipped))) => Ok(gzipped),
                _ => bail!(
                    "Error in lane {} folder {}: folder exists but no R{} read file is present",
                    lane,
                    lane_dir.to_string_lossy(),
                    read_number as char
                ),
            }
        };

        let read1 = pick(b'1')?;
        let index = pick(b'2')?;
        let read2 = pick(b'3')?;
        Ok(Some(Self { lane, read1, read2, index }))
    }

    /// The inputs in the order they are streamed: read 1, read 2, index read.
    pub fn in_stream_order(&self) -> [&Path; 3] {
        [self.read1.as_path(), self.read2.as_path(), self.index.as_path()]
    }
}
