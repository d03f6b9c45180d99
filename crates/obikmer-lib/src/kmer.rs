//! Streaming canonical k-mer iteration
//!
//! [`KmerIter`] slides a forward and a reverse-complement register over a
//! sequence, one base at a time, and yields `min(fwd, rvc)` for every
//! complete window. Three policies exist for bytes outside ACGTU:
//!
//! - [`Ambiguity::Collapse`] (default): the base is read as A.
//! - [`Ambiguity::Skip`]: windows containing the base are not emitted.
//! - [`Ambiguity::Tag`]: the base is read as A and the number of such bases
//!   in the window (capped at 3) is stored in bits 62-63 of the output.
//!   Only available for odd k.

use crate::constants::{ERROR_TAG_SHIFT, MAX_K};
use crate::encoding::{encode_base, encode_base_checked, kmer_mask, AMBIGUOUS};
use crate::error::{KmerError, Result};

/// How non-ACGT bases are handled while iterating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    /// Read them as A
    Collapse,
    /// Skip every k-mer that covers one
    Skip,
    /// Read them as A and count them in the ambiguity tag
    Tag,
}

/// Single-pass iterator over the canonical k-mers of a sequence
pub struct KmerIter<'a> {
    seq: &'a [u8],
    k: usize,
    mask: u64,
    rc_shift: usize,
    fwd: u64,
    rvc: u64,
    pos: usize,
    mode: Ambiguity,
    last_ambiguous: Option<usize>,
    ambiguous_in_window: u32,
}

impl<'a> KmerIter<'a> {
    /// Iterate canonical k-mers, collapsing ambiguous bases to A
    ///
    /// # Panics
    /// Panics if `k` is not in `1..=31`.
    pub fn new(seq: &'a [u8], k: usize) -> Self {
        Self::with_mode(seq, k, Ambiguity::Collapse)
    }

    /// Iterate canonical k-mers, skipping windows with ambiguous bases
    pub fn strict(seq: &'a [u8], k: usize) -> Self {
        Self::with_mode(seq, k, Ambiguity::Skip)
    }

    /// Iterate error-tagged canonical k-mers
    ///
    /// # Errors
    /// Returns `InvalidParameters` if `k` is even or larger than 31.
    pub fn error_aware(seq: &'a [u8], k: usize) -> Result<Self> {
        if k % 2 == 0 || k > MAX_K {
            return Err(KmerError::InvalidParameters(format!(
                "error-tagged k-mers need an odd k <= {MAX_K}, got k={k}"
            )));
        }
        Ok(Self::with_mode(seq, k, Ambiguity::Tag))
    }

    /// Iterate with an explicit ambiguity policy
    pub fn with_mode(seq: &'a [u8], k: usize, mode: Ambiguity) -> Self {
        assert!(
            (1..=MAX_K).contains(&k),
            "k must be in [1, {MAX_K}], got {k}"
        );
        Self {
            seq,
            k,
            mask: kmer_mask(k),
            rc_shift: 2 * (k - 1),
            fwd: 0,
            rvc: 0,
            pos: 0,
            mode,
            last_ambiguous: None,
            ambiguous_in_window: 0,
        }
    }

    /// k-mer size
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Next canonical k-mer together with the zero-based start of its window
    pub fn next_with_position(&mut self) -> Option<(usize, u64)> {
        while self.pos < self.seq.len() {
            let i = self.pos;
            self.pos += 1;
            let base = self.seq[i];

            let code = match self.mode {
                Ambiguity::Collapse => encode_base(base),
                Ambiguity::Skip | Ambiguity::Tag => {
                    let code = encode_base_checked(base);
                    if code == AMBIGUOUS {
                        self.last_ambiguous = Some(i);
                        if self.mode == Ambiguity::Tag {
                            self.ambiguous_in_window += 1;
                        }
                        0
                    } else {
                        code
                    }
                }
            };

            self.fwd = ((self.fwd << 2) | code as u64) & self.mask;
            self.rvc = (self.rvc >> 2) | (((code ^ 0b11) as u64) << self.rc_shift);

            if self.mode == Ambiguity::Tag
                && i >= self.k
                && encode_base_checked(self.seq[i - self.k]) == AMBIGUOUS
            {
                self.ambiguous_in_window -= 1;
            }

            if i + 1 < self.k {
                continue;
            }
            let start = i + 1 - self.k;

            let canonical = self.fwd.min(self.rvc);
            match self.mode {
                Ambiguity::Collapse => return Some((start, canonical)),
                Ambiguity::Skip => {
                    if matches!(self.last_ambiguous, Some(a) if a >= start) {
                        continue;
                    }
                    return Some((start, canonical));
                }
                Ambiguity::Tag => {
                    let tag = self.ambiguous_in_window.min(3) as u64;
                    return Some((start, canonical | (tag << ERROR_TAG_SHIFT)));
                }
            }
        }
        None
    }

    /// Drain the remaining k-mers into `buffer` (appending), returning how many were added
    pub fn extend_into(&mut self, buffer: &mut Vec<u64>) -> usize {
        let before = buffer.len();
        if self.seq.len() >= self.k {
            buffer.reserve(self.seq.len() + 1 - self.k);
        }
        while let Some((_, kmer)) = self.next_with_position() {
            buffer.push(kmer);
        }
        buffer.len() - before
    }
}

impl Iterator for KmerIter<'_> {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        self.next_with_position().map(|(_, kmer)| kmer)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.seq.len() - self.pos;
        let filled = self.pos.min(self.k - 1);
        let upper = (remaining + filled + 1).saturating_sub(self.k);
        match self.mode {
            Ambiguity::Skip => (0, Some(upper)),
            _ => (upper, Some(upper)),
        }
    }
}

/// All canonical k-mers of a sequence (ambiguous bases collapsed to A)
pub fn canonical_kmers(seq: &[u8], k: usize) -> Vec<u64> {
    let mut out = Vec::new();
    KmerIter::new(seq, k).extend_into(&mut out);
    out
}
