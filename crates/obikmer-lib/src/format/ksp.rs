//! `.ksp` frequency spectra
//!
//! `"KSP\x01"`, varint `n`, then `n` pairs of varints `(frequency, count)`
//! sorted by increasing frequency.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::constants::KSP_MAGIC;
use crate::error::{IoContext, KmerError, Result};
use crate::varint::{read_varint, write_varint};

/// Write `(frequency, count)` pairs, which must be sorted by frequency
pub fn write_spectrum(path: impl AsRef<Path>, entries: &[(u64, u64)]) -> Result<()> {
    let path = path.as_ref();
    let mut w = BufWriter::new(File::create(path).at(path)?);
    w.write_all(KSP_MAGIC).at(path)?;
    write_varint(&mut w, entries.len() as u64).at(path)?;
    for &(frequency, count) in entries {
        write_varint(&mut w, frequency).at(path)?;
        write_varint(&mut w, count).at(path)?;
    }
    w.flush().at(path)
}

/// Read the `(frequency, count)` pairs of a spectrum file
pub fn read_spectrum(path: impl AsRef<Path>) -> Result<Vec<(u64, u64)>> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path).at(path)?);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| KmerError::malformed(path, "truncated ksp header"))?;
    if &magic != KSP_MAGIC {
        return Err(KmerError::malformed(path, "bad ksp magic"));
    }
    let mut next = || -> Result<u64> {
        read_varint(&mut r)
            .map_err(|e| KmerError::malformed(path, e.to_string()))?
            .ok_or_else(|| KmerError::malformed(path, "truncated ksp body"))
    };
    let n = next()?;
    let mut entries = Vec::with_capacity(n.min(1 << 20) as usize);
    for _ in 0..n {
        let frequency = next()?;
        let count = next()?;
        entries.push((frequency, count));
    }
    Ok(entries)
}
