//! `.kdx` sparse positional index over a `.kdi` stream
//!
//! ```text
//! magic     : "KDX\x01"
//! stride    : u32
//! n_entries : u32
//! entries   : n_entries x { u64 anchor_kmer, u64 byte_offset_in_kdi }
//! ```
//!
//! Entry `i` is recorded right after the k-mer at cumulative count
//! `(i + 1) * stride` has been written: `anchor_kmer` is that k-mer and
//! `byte_offset` is where the delta of the following k-mer starts.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use crate::constants::KDX_MAGIC;
use crate::error::{IoContext, KmerError, Result};

/// One sparse index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdxEntry {
    /// K-mer written at cumulative count `(i + 1) * stride`
    pub anchor: u64,
    /// Byte offset in the `.kdi` of the delta that follows the anchor
    pub offset: u64,
}

/// In-memory `.kdx` index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdxIndex {
    stride: u32,
    entries: Vec<KdxEntry>,
}

/// Result of an anchor lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdxHit {
    /// Entry index
    pub index: usize,
    /// Anchor k-mer (largest anchor `<=` the target)
    pub anchor: u64,
    /// Byte offset to resume decoding from
    pub offset: u64,
    /// Number of k-mers up to and including the anchor
    pub kmers_through_anchor: u64,
}

impl KdxIndex {
    /// Empty index with the given stride
    pub fn new(stride: u32) -> Self {
        assert!(stride > 0, "kdx stride must be positive");
        Self {
            stride,
            entries: Vec::new(),
        }
    }

    /// Append an entry (anchors must be pushed in increasing order)
    pub fn push(&mut self, anchor: u64, offset: u64) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |e| e.anchor < anchor && e.offset < offset));
        self.entries.push(KdxEntry { anchor, offset });
    }

    /// Stride between anchors
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Entries
    pub fn entries(&self) -> &[KdxEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest anchor `<= target`, or `None` if every anchor is larger
    pub fn find(&self, target: u64) -> Option<KdxHit> {
        let n = self.entries.partition_point(|e| e.anchor <= target);
        if n == 0 {
            return None;
        }
        let index = n - 1;
        let entry = self.entries[index];
        Some(KdxHit {
            index,
            anchor: entry.anchor,
            offset: entry.offset,
            kmers_through_anchor: (index as u64 + 1) * self.stride as u64,
        })
    }

    /// `(anchor, byte_offset)` of the largest anchor `<= target`
    pub fn find_offset(&self, target: u64) -> Option<(u64, u64)> {
        self.find(target).map(|hit| (hit.anchor, hit.offset))
    }

    /// Serialize
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(KDX_MAGIC)?;
        w.write_u32::<LE>(self.stride)?;
        w.write_u32::<LE>(self.entries.len() as u32)?;
        for entry in &self.entries {
            w.write_u64::<LE>(entry.anchor)?;
            w.write_u64::<LE>(entry.offset)?;
        }
        Ok(())
    }

    /// Write to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path).at(path)?);
        self.write_to(&mut w).at(path)?;
        w.flush().at(path)
    }

    /// Deserialize; `path` is only used for error messages
    pub fn read_from<R: Read>(r: &mut R, path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| KmerError::malformed(path, "truncated kdx header"))?;
        if &magic != KDX_MAGIC {
            return Err(KmerError::malformed(path, "bad kdx magic"));
        }
        let header = (|| -> io::Result<(u32, u32)> {
            Ok((r.read_u32::<LE>()?, r.read_u32::<LE>()?))
        })();
        let (stride, n) = header.map_err(|_| KmerError::malformed(path, "truncated kdx header"))?;
        if stride == 0 {
            return Err(KmerError::malformed(path, "kdx stride is zero"));
        }
        let mut entries = Vec::with_capacity(n as usize);
        for i in 0..n {
            let entry = (|| -> io::Result<KdxEntry> {
                Ok(KdxEntry {
                    anchor: r.read_u64::<LE>()?,
                    offset: r.read_u64::<LE>()?,
                })
            })()
            .map_err(|_| KmerError::malformed(path, format!("truncated kdx entry {i}")))?;
            entries.push(entry);
        }
        Ok(Self { stride, entries })
    }

    /// Load a side-car index; a missing file yields `Ok(None)`
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(KmerError::io(path, e)),
        };
        Self::read_from(&mut BufReader::new(file), path).map(Some)
    }
}
