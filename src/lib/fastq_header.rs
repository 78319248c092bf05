#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]
//! Convert a slice of bytes into a [`FastqHeader`].
//!
//! The [`FastqHeader`] internally holds all data as [`Cow`] types
//! which allow it to be very lightweight.  Fields are only copied when they are rewritten.
//!
//! **Note**: The number of fields and their structure is validated when parsing the bytes,
//! but the contents of the fields is not validated.
//!
//! # Grammar
//!
//! Headers follow the CASAVA 1.8 layout:
//!
//! ```text
//! <header>         ::= <read-name> | “<read-name> <comment>”
//! <read-name>      ::= <instrument>:<run-number>:<flowcell-id>:<lane>:<tile>:<x-pos>:<y-pos>[:<umi>]
//! <comment>        ::= “<info>” | “<info> <other>”
//! <info>           ::= <read-number>:<is-filtered>:<control-number>:<index>
//! <is-filtered>    ::= “Y” | “N”
//! <index>          ::= [ACGTN]+ | “<index>+<index>”
//! <other>          ::= .*
//! ```
//!
//! # Usage
//!
//! ```rust
//! use lanedemux_lib::fastq_header::FastqHeader;
//! let r1 = "H00233:4:AAAFGW3HV:1:1101:59586:1000 1:N:0:ACGTACGA";
//! let r2 = "H00233:4:AAAFGW3HV:1:1101:59586:1000 3:N:0:ACGTACGA";
//! let mut r1 = FastqHeader::try_from(r1.as_bytes()).unwrap();
//! let r2 = FastqHeader::try_from(r2.as_bytes()).unwrap();
//! assert_eq!(r1.cluster_id(), r2.cluster_id());
//! r1.set_index(b"ACGTACGT").unwrap();
//! assert_eq!(r1.index(), Some(b"ACGTACGT".as_slice()));
//! ```

use std::{
    borrow::{Borrow, Cow},
    error::Error,
    fmt::Display,
};

use bstr::ByteSlice;

/// A Set of errors that are returned when parsing a FASTQ headers bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastqHeaderError {
    MissingReadName,
    // Errors from parsing ReadName
    MissingInstrument,
    MissingRunNumber,
    MissingFlowCellId,
    MissingLane,
    MissingTile,
    MissingXPos,
    MissingYPos,
    MissingComment,
    // Errors from parsing Info
    MissingReadNumber,
    MissingIsFiltered,
    MissingControlNumber,
    MissingIndex,
}

impl Error for FastqHeaderError {}
impl Display for FastqHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The physical position of a cluster on the flowcell.
///
/// Two reads originate from the same cluster exactly when their [`ClusterId`]s are equal.  The
/// optional UMI and everything in the comment are not part of the identity.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ClusterId<'h> {
    pub instrument: &'h [u8],
    pub run_number: &'h [u8],
    pub flowcell_id: &'h [u8],
    pub lane: &'h [u8],
    pub tile: &'h [u8],
    pub x_pos: &'h [u8],
    pub y_pos: &'h [u8],
}

/// A struct representing a parsed FASTQ header.
#[derive(Default, Debug)]
pub struct FastqHeader<'a> {
    /// The required [`ReadName`] information.
    pub read_name: ReadName<'a>,
    /// The optional set of [`Comment`] fields.
    pub comment: Option<Comment<'a>>,
}

impl<'a> FastqHeader<'a> {
    /// The cluster this read was sequenced from.
    pub fn cluster_id(&self) -> ClusterId<'_> {
        let name = &self.read_name;
        ClusterId {
            instrument: name.instrument.borrow(),
            run_number: name.run_number.borrow(),
            flowcell_id: name.flowcell_id.borrow(),
            lane: name.lane.borrow(),
            tile: name.tile.borrow(),
            x_pos: name.x_pos.borrow(),
            y_pos: name.y_pos.borrow(),
        }
    }

    /// True if both headers describe the same cluster.
    pub fn same_cluster(&self, other: &FastqHeader) -> bool {
        self.cluster_id() == other.cluster_id()
    }

    /// Replace the index sequence on the inner [`Info`] field.
    ///
    /// # Errors
    /// - [`FastqHeaderError::MissingComment`] if the header has no comment to hold an index
    pub fn set_index(&mut self, index: &[u8]) -> Result<(), FastqHeaderError> {
        let comment = self.comment.as_mut().ok_or(FastqHeaderError::MissingComment)?;
        let field = comment.info.index.to_mut();
        field.clear();
        field.extend_from_slice(index);
        Ok(())
    }

    /// Get the [`Info::index`] field.
    ///
    /// If the optional [`Comment`] field is missing, `None` is returned.
    pub fn index(&self) -> Option<&[u8]> {
        self.comment.as_ref().map(|comment| comment.info.index.borrow())
    }

    /// Get the [`ReadName::umi`] field.
    pub fn umi(&self) -> Option<&[u8]> {
        self.read_name.umi.as_ref().map(std::borrow::Borrow::borrow)
    }

    /// Set the [`ReadName::umi`] field, adding it if absent.
    pub fn set_umi(&mut self, umi: &[u8]) {
        if let Some(umi_field) = self.read_name.umi.as_mut() {
            let field = umi_field.to_mut();
            field.clear();
            field.extend_from_slice(umi);
        } else {
            self.read_name.umi = Some(Cow::Owned(umi.to_owned()));
        }
    }

    /// Copy the [`FastqHeader`] to a [`Vec<u8>`].
    pub fn copy_to_vec(&self, dest: &mut Vec<u8>) {
        self.read_name.copy_to_vec(dest);
        if let Some(comment) = &self.comment {
            dest.push(b' ');
            comment.copy_to_vec(dest);
        }
    }
}

/// The [`ReadName`] is a required portion of the FASTQ header and contains a sequence identifier
/// along with information about the run and cluster.
#[derive(Default, Debug)]
pub struct ReadName<'a>
where
    [u8]: ToOwned<Owned = Vec<u8>>,
{
    /// The instrument ID.
    pub instrument: Cow<'a, [u8]>,
    /// The run number on the instrument.
    pub run_number: Cow<'a, [u8]>,
    /// The flow cell ID.
    pub flowcell_id: Cow<'a, [u8]>,
    /// The flow cell lane number.
    pub lane: Cow<'a, [u8]>,
    /// The flow cell tile number.
    pub tile: Cow<'a, [u8]>,
    /// The X coordinate of the cluster.
    pub x_pos: Cow<'a, [u8]>,
    /// The Y coordinate of the cluster.
    pub y_pos: Cow<'a, [u8]>,
    /// The optional molecular barcode, non-contiguous segments separated by `+`.
    pub umi: Option<Cow<'a, [u8]>>,
}

impl<'a> ReadName<'a> {
    /// Copy the [`Self`] to a vec of bytes delimited by the `:` character.
    pub fn copy_to_vec(&self, dest: &mut Vec<u8>) {
        let fields = [
            &self.instrument,
            &self.run_number,
            &self.flowcell_id,
            &self.lane,
            &self.tile,
            &self.x_pos,
            &self.y_pos,
        ];
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                dest.push(b':');
            }
            dest.extend(field.as_ref());
        }
        if let Some(umi) = &self.umi {
            dest.push(b':');
            dest.extend(umi.as_ref());
        }
    }
}

/// A [`Comment`] represents all the fields after the first space character in the header.
#[derive(Debug)]
pub struct Comment<'a>
where
    [u8]: ToOwned<Owned = Vec<u8>>,
{
    pub info: Info<'a>,
    /// All bytes after the second space character (if present), left unparsed.
    pub other: Option<Cow<'a, [u8]>>,
}

impl<'a> Comment<'a> {
    pub fn copy_to_vec(&self, dest: &mut Vec<u8>) {
        self.info.copy_to_vec(dest);
        if let Some(other) = &self.other {
            dest.push(b' ');
            dest.extend(other.as_ref());
        }
    }
}

/// The [`Info`] field holds the per-read flags and the index sequence.
#[derive(Debug)]
pub struct Info<'a>
where
    [u8]: ToOwned<Owned = Vec<u8>>,
{
    /// Which read of the cluster this is.
    pub read_number: Cow<'a, [u8]>,
    /// `Y` if the read failed the chastity filter.
    pub is_filtered: Cow<'a, [u8]>,
    /// `0` unless the read is from a control.
    pub control_number: Cow<'a, [u8]>,
    /// The index sequence.  As written by the instrument this is the observed index; after
    /// demultiplexing it may be rewritten to the configured index of the sample.
    pub index: Cow<'a, [u8]>,
}

impl<'a> Info<'a> {
    pub fn copy_to_vec(&self, dest: &mut Vec<u8>) {
        dest.extend(self.read_number.as_ref());
        dest.push(b':');
        dest.extend(self.is_filtered.as_ref());
        dest.push(b':');
        dest.extend(self.control_number.as_ref());
        dest.push(b':');
        dest.extend(self.index.as_ref());
    }
}

impl<'a> TryFrom<&'a [u8]> for FastqHeader<'a> {
    type Error = FastqHeaderError;

    /// Convert a slice of bytes into a [`FastqHeader`].  A leading `@` is ignored.
    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        let bytes = bytes.trim_end();
        let bytes = bytes.strip_prefix(b"@").unwrap_or(bytes);
        let mut parts = bytes.splitn(2, |c| *c == b' ');

        let read_name_part =
            parts.next().filter(|p| !p.is_empty()).ok_or(FastqHeaderError::MissingReadName)?;
        let mut fields = read_name_part.splitn(8, |c| *c == b':');
        let mut next = |err: FastqHeaderError| fields.next().map(Cow::from).ok_or(err);
        let read_name = ReadName {
            instrument: next(FastqHeaderError::MissingInstrument)?,
            run_number: next(FastqHeaderError::MissingRunNumber)?,
            flowcell_id: next(FastqHeaderError::MissingFlowCellId)?,
            lane: next(FastqHeaderError::MissingLane)?,
            tile: next(FastqHeaderError::MissingTile)?,
            x_pos: next(FastqHeaderError::MissingXPos)?,
            y_pos: next(FastqHeaderError::MissingYPos)?,
            umi: fields.next().map(Cow::from),
        };

        let comment = match parts.next() {
            None => None,
            Some(comment_part) => {
                let mut parts = comment_part.splitn(2, |c| *c == b' ');
                // splitn always yields at least one item
                let info_part = parts.next().unwrap_or_default();
                let mut fields = info_part.splitn(4, |c| *c == b':');
                let mut next = |err: FastqHeaderError| fields.next().map(Cow::from).ok_or(err);
                let info = Info {
                    read_number: next(FastqHeaderError::MissingReadNumber)?,
                    is_filtered: next(FastqHeaderError::MissingIsFiltered)?,
                    control_number: next(FastqHeaderError::MissingControlNumber)?,
                    index: next(FastqHeaderError::MissingIndex)?,
                };
                Some(Comment { info, other: parts.next().map(Cow::from) })
            }
        };
        Ok(Self { read_name, comment })
    }
}
