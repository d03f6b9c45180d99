//! Stage 0: routing super-k-mers to per-partition shard files
//!
//! Each `(set, partition)` has its own buffer behind its own mutex, so
//! threads sharding different sequences only contend when they hit the same
//! partition. Buffers are appended to their `.skm` file once they grow past
//! [`SHARD_FLUSH_BYTES`]; no file handle stays open between flushes, which
//! keeps thousands of partitions within descriptor limits.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::constants::SHARD_FLUSH_BYTES;
use crate::error::{IoContext, Result};
use crate::format::partition_file_name;
use crate::format::skm::encode_super_kmer;
use crate::minimizer::{partition_of, super_kmers};

/// Buffered appender for one `.skm` file
#[derive(Debug)]
pub(crate) struct ShardWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    records: u64,
}

impl ShardWriter {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            buffer: Vec::new(),
            records: 0,
        }
    }

    fn push(&mut self, bases: &[u8], k: usize) -> Result<()> {
        encode_super_kmer(bases, k, &mut self.buffer);
        self.records += 1;
        if self.buffer.len() >= SHARD_FLUSH_BYTES {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .at(&self.path)?;
        file.write_all(&self.buffer).at(&self.path)?;
        self.buffer.clear();
        Ok(())
    }
}

/// Shard writers of one set under construction
#[derive(Debug)]
pub(crate) struct SetShards {
    dir: PathBuf,
    writers: Vec<Mutex<ShardWriter>>,
}

impl SetShards {
    /// Writers for `partitions` shards in `dir` (created if missing)
    pub(crate) fn create(dir: PathBuf, partitions: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir).at(&dir)?;
        let writers = (0..partitions)
            .map(|p| Mutex::new(ShardWriter::new(dir.join(partition_file_name(p, "skm")))))
            .collect();
        Ok(Self { dir, writers })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shard file of partition `p`
    pub(crate) fn shard_path(&self, partition: usize) -> PathBuf {
        self.dir.join(partition_file_name(partition, "skm"))
    }

    /// Split a sequence into super-k-mers and append each to its partition
    pub(crate) fn add_sequence(&self, seq: &[u8], k: usize, m: usize) -> Result<usize> {
        let partitions = self.writers.len();
        let mut n = 0;
        for sk in super_kmers(seq, k, m) {
            let p = partition_of(sk.minimizer, partitions);
            self.writers[p].lock().push(sk.bases, k)?;
            n += 1;
        }
        Ok(n)
    }

    /// Flush every buffer to disk
    pub(crate) fn flush_all(&self) -> Result<()> {
        for writer in &self.writers {
            writer.lock().flush()?;
        }
        Ok(())
    }

    /// Total number of super-k-mers routed so far
    pub(crate) fn num_records(&self) -> u64 {
        self.writers.iter().map(|w| w.lock().records).sum()
    }
}
