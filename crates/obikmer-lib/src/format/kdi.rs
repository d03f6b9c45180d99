//! `.kdi` sorted k-mer streams
//!
//! ```text
//! magic  : "KDI\x01"
//! count  : u64
//! first  : u64 (absent when count == 0)
//! deltas : (count - 1) unsigned varints, current - previous
//! ```
//!
//! The writer emits the side-car `.kdx` while it goes; the reader uses it,
//! when present, to jump forward in [`KdiReader::seek_to`].

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::constants::{KDI_HEADER_SIZE, KDI_MAGIC, KDX_STRIDE};
use crate::error::{IoContext, KmerError, Result};
use crate::format::kdx::KdxIndex;
use crate::varint::{read_varint, write_varint};

/// Path of the `.kdx` side-car of a `.kdi` file
pub fn kdx_path(kdi: &Path) -> PathBuf {
    kdi.with_extension("kdx")
}

/// Streaming writer of a strictly increasing k-mer sequence
///
/// Values must be pushed in strictly increasing order; this is checked in
/// debug builds only. Callers sort and deduplicate before writing.
pub struct KdiWriter {
    path: PathBuf,
    out: BufWriter<File>,
    count: u64,
    prev: u64,
    offset: u64,
    index: KdxIndex,
}

impl KdiWriter {
    /// Create (truncate) `path` and write a header with a placeholder count
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_stride(path, KDX_STRIDE)
    }

    /// Same as [`KdiWriter::create`] with a custom `.kdx` stride
    pub fn with_stride(path: impl AsRef<Path>, stride: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path).at(&path)?);
        out.write_all(KDI_MAGIC).at(&path)?;
        out.write_u64::<LE>(0).at(&path)?;
        Ok(Self {
            path,
            out,
            count: 0,
            prev: 0,
            offset: KDI_HEADER_SIZE,
            index: KdxIndex::new(stride),
        })
    }

    /// Append one k-mer
    pub fn write(&mut self, kmer: u64) -> Result<()> {
        if self.count == 0 {
            self.out.write_u64::<LE>(kmer).at(&self.path)?;
            self.offset += 8;
        } else {
            debug_assert!(kmer > self.prev, "kdi input must be strictly increasing");
            let n = write_varint(&mut self.out, kmer - self.prev).at(&self.path)?;
            self.offset += n as u64;
        }
        self.count += 1;
        self.prev = kmer;
        if self.count % self.index.stride() as u64 == 0 {
            self.index.push(kmer, self.offset);
        }
        Ok(())
    }

    /// Append every k-mer of an iterator
    pub fn write_all<I: IntoIterator<Item = u64>>(&mut self, kmers: I) -> Result<()> {
        for kmer in kmers {
            self.write(kmer)?;
        }
        Ok(())
    }

    /// Number of k-mers written so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Patch the count, flush and write the `.kdx`; returns the count
    pub fn finish(self) -> Result<u64> {
        let Self {
            path,
            out,
            count,
            index,
            ..
        } = self;
        let mut file = out
            .into_inner()
            .map_err(|e| KmerError::io(&path, e.into_error()))?;
        file.seek(SeekFrom::Start(4)).at(&path)?;
        file.write_u64::<LE>(count).at(&path)?;
        file.sync_data().at(&path)?;
        index.save(kdx_path(&path))?;
        Ok(count)
    }
}

/// Read the k-mer count of a `.kdi` from its header only
pub fn read_count(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path).at(path)?);
    read_header(&mut r, path)
}

fn read_header<R: Read>(r: &mut R, path: &Path) -> Result<u64> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| KmerError::malformed(path, "truncated kdi header"))?;
    if &magic != KDI_MAGIC {
        return Err(KmerError::malformed(path, "bad kdi magic"));
    }
    r.read_u64::<LE>()
        .map_err(|_| KmerError::malformed(path, "truncated kdi header"))
}

/// Streaming reader of a `.kdi` file
///
/// Works without a `.kdx`; seeking then degrades to a linear scan.
pub struct KdiReader {
    path: PathBuf,
    input: BufReader<File>,
    count: u64,
    consumed: u64,
    prev: u64,
    peeked: Option<u64>,
    index: Option<KdxIndex>,
}

impl KdiReader {
    /// Open a `.kdi` and its side-car `.kdx` if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut input = BufReader::new(File::open(&path).at(&path)?);
        let count = read_header(&mut input, &path)?;
        let index = KdxIndex::load(kdx_path(&path))?;
        if index.is_none() && count > KDX_STRIDE as u64 {
            debug!("no kdx next to {}, seeks will scan", path.display());
        }
        Ok(Self {
            path,
            input,
            count,
            consumed: 0,
            prev: 0,
            peeked: None,
            index,
        })
    }

    /// File being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of k-mers in the file
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether the file holds no k-mer
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether a `.kdx` was loaded
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Next k-mer in increasing order
    ///
    /// A varint cut short by end of file ends the stream.
    pub fn next(&mut self) -> Result<Option<u64>> {
        if let Some(kmer) = self.peeked.take() {
            return Ok(Some(kmer));
        }
        if self.consumed == self.count {
            return Ok(None);
        }
        let kmer = if self.consumed == 0 {
            match self.input.read_u64::<LE>() {
                Ok(first) => first,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(KmerError::malformed(&self.path, "missing first k-mer"));
                }
                Err(e) => return Err(KmerError::io(&self.path, e)),
            }
        } else {
            match read_varint(&mut self.input) {
                Ok(Some(delta)) => self.prev + delta,
                Ok(None) => {
                    self.consumed = self.count;
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(KmerError::malformed(&self.path, e.to_string()));
                }
                Err(e) => return Err(KmerError::io(&self.path, e)),
            }
        };
        self.consumed += 1;
        self.prev = kmer;
        Ok(Some(kmer))
    }

    /// Advance so that the next [`KdiReader::next`] returns the smallest k-mer `>= target`
    ///
    /// Seeks only move forward: a target at or before the current position
    /// leaves the reader where it is.
    pub fn seek_to(&mut self, target: u64) -> Result<()> {
        match self.peeked {
            Some(kmer) if kmer >= target => return Ok(()),
            Some(_) => self.peeked = None,
            None if self.consumed > 0 && self.prev >= target => return Ok(()),
            None => {}
        }

        if let Some(hit) = self.index.as_ref().and_then(|idx| idx.find(target)) {
            if hit.kmers_through_anchor > self.consumed {
                self.input
                    .seek(SeekFrom::Start(hit.offset))
                    .at(&self.path)?;
                self.consumed = hit.kmers_through_anchor;
                self.prev = hit.anchor;
                if hit.anchor == target {
                    self.peeked = Some(hit.anchor);
                    return Ok(());
                }
            }
        }

        while let Some(kmer) = self.next()? {
            if kmer >= target {
                self.peeked = Some(kmer);
                break;
            }
        }
        Ok(())
    }

    /// Drain the remaining k-mers into a vector
    pub fn read_all(&mut self) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity((self.count - self.consumed) as usize);
        while let Some(kmer) = self.next()? {
            out.push(kmer);
        }
        Ok(out)
    }
}
