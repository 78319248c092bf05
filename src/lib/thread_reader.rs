//! A [`ThreadReader`] allows for pushing the reading of a FASTQ file onto a separate thread.
//!
//! The compression of the file is sniffed from its first bytes.  BGZF input is decompressed with a
//! pooled decompressor, plain gzip input with a single threaded multi-member decoder, and
//! uncompressed input is read as is.  Records are parsed into N sized chunks of FASTQ records.

use std::{
    fs::File,
    io::{BufReader, Read},
    num::NonZeroUsize,
    path::PathBuf,
    thread::JoinHandle,
};

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use flume::{bounded, Receiver};
use gzp::{deflate::Bgzf, par::decompress::ParDecompressBuilder, BUFSIZE};
use log::debug;
use seq_io::fastq::{self, RecordSet};

use crate::utils::InputCompression;

/// The number of chunks to allow in the reader channel at one time.
const READER_CHANNEL_SIZE: usize = 100;

/// A struct to hold onto the handle for a thread that is reading chunks of FASTQ from a file.
pub struct ThreadReader {
    /// The [`JoinHandle`] for the thread that is reading.
    pub handle: JoinHandle<Result<()>>,
    /// The channel that will be receiving [`RecordSet`]s.
    pub rx: Receiver<RecordSet>,
}

impl ThreadReader {
    /// Create a new [`ThreadReader`] for a given file that will read `chunksize` records at a time.
    ///
    /// Errors opening, decompressing, or parsing the file end the thread and are returned when
    /// joining [`ThreadReader::handle`]; the channel is closed early in that case.
    // Chunksize can't be zero or `seq_io` would try to read the whole file into one record set.
    pub fn new(
        file: PathBuf,
        chunksize: NonZeroUsize,
        decompression_threads_per_reader: usize,
    ) -> Self {
        let (tx, rx) = bounded(READER_CHANNEL_SIZE);
        let handle = std::thread::spawn(move || {
            let compression = InputCompression::detect(&file)?;
            debug!("Reading {} as {}", file.to_string_lossy(), compression);

            let raw = BufReader::with_capacity(
                BUFSIZE,
                File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.to_string_lossy()))?,
            );
            let decoded: Box<dyn Read> = match compression {
                InputCompression::Bgzf => Box::new(
                    ParDecompressBuilder::<Bgzf>::new()
                        .num_threads(decompression_threads_per_reader)
                        .with_context(|| {
                            format!(
                                "Error in setting threads when creating decompressor for {}",
                                file.to_string_lossy()
                            )
                        })?
                        .from_reader(raw),
                ),
                InputCompression::Gzip => Box::new(MultiGzDecoder::new(raw)),
                InputCompression::Plain => Box::new(raw),
            };
            let mut reader = fastq::Reader::with_capacity(decoded, BUFSIZE);

            let mut record_set = RecordSet::default();
            let mut filled_set = reader
                .read_record_set_exact(&mut record_set, usize::from(chunksize))
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("Error reading from: {}", file.to_string_lossy()))?;

            while filled_set {
                tx.send(record_set).context("Failed to send record set from reader")?;
                record_set = RecordSet::default();
                filled_set = reader
                    .read_record_set_exact(&mut record_set, usize::from(chunksize))
                    .with_context(|| {
                        format!("Failed reading record set from {}", file.to_string_lossy())
                    })?;
            }
            Ok(())
        });

        Self { handle, rx }
    }
}
