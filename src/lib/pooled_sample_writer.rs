//! A small manager struct to write read pairs to the two [`PooledWriter`]s of one output label.

use anyhow::{ensure, Result};
use pooled_writer::PooledWriter;
use seq_io::{fastq::OwnedRecord, BaseRecord};

/// The read 1 and read 2 [`PooledWriter`]s of one label of a lane.
#[derive(Debug)]
pub struct PooledSampleWriter {
    pub writers: Vec<PooledWriter>,
    /// The number of read pairs written so far.
    pub pairs_written: u64,
}

impl PooledSampleWriter {
    /// Create a new [`PooledSampleWriter`] from the read 1 and read 2 writers, in that order.
    pub fn new(writers: Vec<PooledWriter>) -> Result<Self> {
        ensure!(writers.len() == 2, "Exactly two writers must be provided, found {}", writers.len());
        Ok(Self { writers, pairs_written: 0 })
    }

    /// Write read 1 then read 2 of a pair.
    pub fn write_pair(&mut self, read1: &OwnedRecord, read2: &OwnedRecord) -> Result<()> {
        for (read, writer) in [read1, read2].into_iter().zip(self.writers.iter_mut()) {
            read.write(writer)?;
        }
        self.pairs_written += 1;
        Ok(())
    }

    /// Consumes [`Self`]. For each held writer, call close to flush all writers.
    pub fn finish(self) -> Result<()> {
        for writer in self.writers {
            writer.close()?;
        }
        Ok(())
    }
}
