//! `.skm` super-k-mer shards
//!
//! A shard is a header-less stream of records:
//!
//! ```text
//! u16 length_bases (little endian)
//! ceil(length_bases / 4) bytes of 2-bit packed bases, high bits first
//! ```
//!
//! Shards only live in `.build/` while a group is under construction. They
//! are read back memory-mapped: a missing or empty shard is an empty
//! partition, not an error.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian as LE};
use memmap2::Mmap;

use crate::constants::MAX_SKM_LENGTH;
use crate::encoding::{kmer_mask, pack_bases, packed_base, unpack_bases};
use crate::error::{IoContext, KmerError, Result};

/// Append one super-k-mer to `out` in `.skm` record layout
///
/// Runs longer than 65535 bases are cut into chunks overlapping by `k - 1`
/// bases, so every k-mer of the run is kept and no k-mer is invented.
pub fn encode_super_kmer(bases: &[u8], k: usize, out: &mut Vec<u8>) {
    let step = MAX_SKM_LENGTH - (k - 1);
    let mut start = 0;
    loop {
        let end = (start + MAX_SKM_LENGTH).min(bases.len());
        let chunk = &bases[start..end];
        let mut len = [0u8; 2];
        LE::write_u16(&mut len, chunk.len() as u16);
        out.extend_from_slice(&len);
        pack_bases(chunk, out);
        if end == bases.len() {
            break;
        }
        start += step;
    }
}

/// A super-k-mer record borrowed from a shard
#[derive(Debug, Clone, Copy)]
pub struct PackedSuperKmer<'a> {
    len: usize,
    packed: &'a [u8],
}

impl<'a> PackedSuperKmer<'a> {
    /// Number of bases
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the record holds no base
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 2-bit code of base `i`
    #[inline]
    pub fn base(&self, i: usize) -> u8 {
        packed_base(self.packed, i)
    }

    /// Decode to ASCII
    pub fn to_bases(&self) -> Vec<u8> {
        unpack_bases(self.packed, self.len)
    }

    /// Canonical k-mers of the record, straight from the packed codes
    pub fn kmers(&self, k: usize) -> PackedKmerIter<'a> {
        PackedKmerIter {
            record: *self,
            k,
            mask: kmer_mask(k),
            rc_shift: 2 * (k - 1),
            fwd: 0,
            rvc: 0,
            pos: 0,
        }
    }
}

/// Canonical k-mers of a packed record
pub struct PackedKmerIter<'a> {
    record: PackedSuperKmer<'a>,
    k: usize,
    mask: u64,
    rc_shift: usize,
    fwd: u64,
    rvc: u64,
    pos: usize,
}

impl Iterator for PackedKmerIter<'_> {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        while self.pos < self.record.len {
            let code = self.record.base(self.pos) as u64;
            self.pos += 1;
            self.fwd = ((self.fwd << 2) | code) & self.mask;
            self.rvc = (self.rvc >> 2) | ((code ^ 0b11) << self.rc_shift);
            if self.pos >= self.k {
                return Some(self.fwd.min(self.rvc));
            }
        }
        None
    }
}

/// A memory-mapped, validated `.skm` shard
pub struct SkmShard {
    path: PathBuf,
    map: Option<Mmap>,
    num_records: usize,
    num_bases: u64,
}

impl SkmShard {
    /// Map a shard and validate its record framing
    ///
    /// A missing or zero-length file yields an empty shard.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(KmerError::io(&path, e)),
        };
        let size = file.metadata().at(&path)?.len();
        if size == 0 {
            return Ok(Self::empty(path));
        }
        // SAFETY: shards are private to the builder and not modified while mapped
        let map = unsafe { Mmap::map(&file) }.at(&path)?;

        let mut num_records = 0usize;
        let mut num_bases = 0u64;
        let mut pos = 0usize;
        while pos < map.len() {
            if pos + 2 > map.len() {
                return Err(KmerError::malformed(&path, "truncated record length"));
            }
            let len = LE::read_u16(&map[pos..pos + 2]) as usize;
            let end = pos + 2 + len.div_ceil(4);
            if end > map.len() {
                return Err(KmerError::malformed(
                    &path,
                    format!("record at byte {pos} runs past end of file"),
                ));
            }
            num_records += 1;
            num_bases += len as u64;
            pos = end;
        }

        Ok(Self {
            path,
            map: Some(map),
            num_records,
            num_bases,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            map: None,
            num_records: 0,
            num_bases: 0,
        }
    }

    /// Shard file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of super-k-mer records
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Total bases over all records
    pub fn num_bases(&self) -> u64 {
        self.num_bases
    }

    /// Upper bound on the number of k-mers stored in the shard
    pub fn num_kmers(&self, k: usize) -> usize {
        (self.num_bases as usize).saturating_sub(self.num_records * (k - 1))
    }

    /// Iterate records
    pub fn records(&self) -> SkmRecords<'_> {
        SkmRecords {
            data: self.map.as_deref().unwrap_or(&[]),
            pos: 0,
        }
    }
}

/// Iterator over the records of a validated shard
pub struct SkmRecords<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for SkmRecords<'a> {
    type Item = PackedSuperKmer<'a>;

    fn next(&mut self) -> Option<PackedSuperKmer<'a>> {
        if self.pos + 2 > self.data.len() {
            return None;
        }
        let len = LE::read_u16(&self.data[self.pos..self.pos + 2]) as usize;
        let start = self.pos + 2;
        let end = start + len.div_ceil(4);
        self.pos = end;
        Some(PackedSuperKmer {
            len,
            packed: &self.data[start..end],
        })
    }
}
