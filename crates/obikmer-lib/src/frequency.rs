//! In-memory minimum-frequency filter without per-k-mer counters
//!
//! A ladder of sets `L_0 .. L_{min_freq - 1}`: inserting a k-mer adds it to
//! the first level that does not hold it yet. A k-mer seen `c` times sits in
//! levels `0..min(c, min_freq)`, so the last level holds exactly the k-mers
//! seen at least `min_freq` times.

use ahash::AHashSet;

use crate::kmer::KmerIter;

/// Frequency ladder
#[derive(Debug, Clone)]
pub struct FrequencyFilter {
    k: usize,
    levels: Vec<AHashSet<u64>>,
}

impl FrequencyFilter {
    /// Ladder keeping k-mers seen at least `min_freq` times
    ///
    /// # Panics
    /// Panics if `min_freq == 0`.
    pub fn new(k: usize, min_freq: usize) -> Self {
        assert!(min_freq >= 1, "min_freq must be at least 1");
        Self {
            k,
            levels: vec![AHashSet::new(); min_freq],
        }
    }

    /// Frequency threshold
    pub fn min_freq(&self) -> usize {
        self.levels.len()
    }

    /// Record one occurrence of a canonical k-mer
    pub fn insert(&mut self, kmer: u64) {
        for level in self.levels.iter_mut() {
            if level.insert(kmer) {
                return;
            }
        }
    }

    /// Record every canonical k-mer of a sequence
    pub fn add_sequence(&mut self, seq: &[u8]) {
        for kmer in KmerIter::new(seq, self.k) {
            self.insert(kmer);
        }
    }

    /// Number of distinct k-mers seen at least `c` times (`1 <= c <= min_freq`)
    pub fn count_at_least(&self, c: usize) -> usize {
        assert!(c >= 1 && c <= self.levels.len());
        self.levels[c - 1].len()
    }

    /// K-mers seen at least `min_freq` times
    pub fn frequent(&self) -> &AHashSet<u64> {
        // levels is never empty
        &self.levels[self.levels.len() - 1]
    }

    /// Frequent k-mers in increasing order, ready for a `.kdi` writer
    pub fn into_sorted(mut self) -> Vec<u64> {
        let last = self.levels.pop().unwrap_or_default();
        let mut out: Vec<u64> = last.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Memory held by the ladder, in distinct entries over all levels
    pub fn entries(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }
}
