//! Minimizers and super-k-mer extraction
//!
//! The minimizer of a k-mer is its smallest canonical m-mer (plain unsigned
//! order, no hashing). Minimizers are tracked over a sequence with a
//! monotone deque of `(position, m-mer)` pairs:
//!
//! - expired entries (left of the current k-mer) are popped from the front,
//! - entries `>=` the incoming m-mer are popped from the back,
//! - the front is the minimizer of the current k-mer.
//!
//! A super-k-mer is a maximal run of consecutive k-mers sharing the same
//! minimizer value. It is emitted as the slice of bases spanning those
//! k-mers, so consecutive super-k-mers overlap by `k - 1` bases.

use std::collections::VecDeque;

use crate::encoding::{canonical, encode_base, kmer_mask};

/// A run of consecutive k-mers sharing one minimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperKmer<'a> {
    /// Canonical minimizer shared by every k-mer of the run
    pub minimizer: u64,
    /// Start of the first k-mer in the parent sequence
    pub start: usize,
    /// End (exclusive) of the last k-mer in the parent sequence
    pub end: usize,
    /// `parent[start..end]`
    pub bases: &'a [u8],
}

impl SuperKmer<'_> {
    /// Number of bases
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the super-k-mer holds no base (never true for emitted ones)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Number of k-mers in the run
    #[inline]
    pub fn num_kmers(&self, k: usize) -> usize {
        self.len() + 1 - k
    }
}

/// Iterator over the super-k-mers of one sequence
///
/// Ambiguous bases are read as A, consistently with [`crate::kmer::KmerIter::new`].
/// Runs in O(n) time and O(k - m + 1) space.
pub struct SuperKmerIter<'a> {
    seq: &'a [u8],
    k: usize,
    m: usize,
    m_mask: u64,
    m_rc_shift: usize,
    fwd: u64,
    rvc: u64,
    window: VecDeque<(usize, u64)>,
    pos: usize,
    super_start: usize,
    current: Option<u64>,
}

impl<'a> SuperKmerIter<'a> {
    /// Create an iterator for k-mer size `k` and minimizer size `m`
    ///
    /// # Panics
    /// Panics unless `1 <= m < k <= 31`.
    pub fn new(seq: &'a [u8], k: usize, m: usize) -> Self {
        assert!(
            crate::constants::is_valid_km(k, m),
            "invalid (k, m) = ({k}, {m}): need 1 <= m < k <= 31"
        );
        Self {
            seq,
            k,
            m,
            m_mask: kmer_mask(m),
            m_rc_shift: 2 * (m - 1),
            fwd: 0,
            rvc: 0,
            window: VecDeque::with_capacity(k - m + 1),
            pos: 0,
            super_start: 0,
            current: None,
        }
    }
}

impl<'a> Iterator for SuperKmerIter<'a> {
    type Item = SuperKmer<'a>;

    fn next(&mut self) -> Option<SuperKmer<'a>> {
        while self.pos < self.seq.len() {
            let i = self.pos;
            self.pos += 1;

            let code = encode_base(self.seq[i]) as u64;
            self.fwd = ((self.fwd << 2) | code) & self.m_mask;
            self.rvc = (self.rvc >> 2) | ((code ^ 0b11) << self.m_rc_shift);
            if i + 1 < self.m {
                continue;
            }

            let mmer = self.fwd.min(self.rvc);
            while matches!(self.window.back(), Some(&(_, v)) if v >= mmer) {
                self.window.pop_back();
            }
            self.window.push_back((i + 1 - self.m, mmer));

            if i + 1 < self.k {
                continue;
            }
            let kmer_start = i + 1 - self.k;
            while matches!(self.window.front(), Some(&(p, _)) if p < kmer_start) {
                self.window.pop_front();
            }
            // the m-mer just pushed is inside the window, so the deque is never empty here
            let minimizer = self.window.front().map_or(mmer, |&(_, v)| v);

            match self.current {
                None => {
                    self.current = Some(minimizer);
                    self.super_start = kmer_start;
                }
                Some(previous) if previous != minimizer => {
                    // previous run ends with the k-mer starting at kmer_start - 1
                    let start = self.super_start;
                    let end = i;
                    self.current = Some(minimizer);
                    self.super_start = kmer_start;
                    return Some(SuperKmer {
                        minimizer: previous,
                        start,
                        end,
                        bases: &self.seq[start..end],
                    });
                }
                Some(_) => {}
            }
        }

        self.current.take().map(|minimizer| SuperKmer {
            minimizer,
            start: self.super_start,
            end: self.seq.len(),
            bases: &self.seq[self.super_start..],
        })
    }
}

/// Iterate the super-k-mers of `seq`
pub fn super_kmers(seq: &[u8], k: usize, m: usize) -> SuperKmerIter<'_> {
    SuperKmerIter::new(seq, k, m)
}

/// Canonical minimizer of a single (untagged) k-mer code
pub fn kmer_minimizer(kmer: u64, k: usize, m: usize) -> u64 {
    debug_assert!(m >= 1 && m < k);
    let mask = kmer_mask(m);
    (0..=k - m)
        .map(|i| canonical((kmer >> (2 * (k - m - i))) & mask, m))
        .min()
        .unwrap_or(0)
}

/// Minimizer of a base sequence of length `>= k`: the minimizer of its first k-mer
///
/// For a super-k-mer this recovers the minimizer from the bases alone.
pub fn sequence_minimizer(bases: &[u8], k: usize, m: usize) -> Option<u64> {
    if bases.len() < k {
        return None;
    }
    let kmer = bases[..k]
        .iter()
        .fold(0u64, |acc, &b| (acc << 2) | encode_base(b) as u64);
    Some(kmer_minimizer(kmer, k, m))
}

/// Partition a minimizer is routed to
#[inline]
pub fn partition_of(minimizer: u64, partitions: usize) -> usize {
    (minimizer % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::KmerIter;

    const SEQ: &[u8] = b"ATTTTCAGGATGTTTTCAGGTTCATCATCTCCCTTCTTTGCAGGATAGTAGATAAGATCGCTCATCAACGGATGTTGTGT";

    #[test]
    fn test_kmers_share_minimizer() {
        for (k, m) in [(31, 13), (15, 7), (11, 5), (5, 1)] {
            for sk in super_kmers(SEQ, k, m) {
                assert!(sk.len() >= k);
                for kmer in KmerIter::new(sk.bases, k) {
                    assert_eq!(kmer_minimizer(kmer, k, m), sk.minimizer, "k={k} m={m}");
                }
            }
        }
    }

    #[test]
    fn test_super_kmers_cover_every_kmer() {
        let (k, m) = (15, 7);
        let all: Vec<u64> = KmerIter::new(SEQ, k).collect();
        let mut covered = Vec::new();
        let mut prev_end = None;
        for sk in super_kmers(SEQ, k, m) {
            if let Some(end) = prev_end {
                // consecutive runs overlap by k - 1 bases
                assert_eq!(sk.start + k - 1, end);
            }
            prev_end = Some(sk.end);
            covered.extend(KmerIter::new(sk.bases, k));
        }
        assert_eq!(covered, all);
        assert_eq!(prev_end, Some(SEQ.len()));
    }

    #[test]
    fn test_consecutive_minimizers_differ() {
        let minimizers: Vec<u64> = super_kmers(SEQ, 21, 9).map(|sk| sk.minimizer).collect();
        for pair in minimizers.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_bijection() {
        let (k, m) = (11, 5);
        for sk in super_kmers(SEQ, k, m) {
            assert_eq!(sequence_minimizer(sk.bases, k, m), Some(sk.minimizer));
        }
    }

    #[test]
    fn test_short_sequence_has_no_super_kmer() {
        assert_eq!(super_kmers(b"ACGTACG", 11, 5).count(), 0);
        assert_eq!(super_kmers(b"", 11, 5).count(), 0);
    }

    #[test]
    fn test_homopolymer_is_one_super_kmer() {
        let seq = vec![b'T'; 50];
        let sks: Vec<_> = super_kmers(&seq, 15, 7).collect();
        assert_eq!(sks.len(), 1);
        assert_eq!(sks[0].start, 0);
        assert_eq!(sks[0].end, 50);
        // poly-T canonicalizes to poly-A
        assert_eq!(sks[0].minimizer, 0);
        assert_eq!(sks[0].num_kmers(15), 36);
    }

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of(130, 64), 2);
        assert_eq!(partition_of(63, 64), 63);
    }
}
