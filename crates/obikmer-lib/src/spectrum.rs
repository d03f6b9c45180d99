//! K-mer frequency spectra and most frequent k-mers
//!
//! Both are filled while partitions are finalized, from the raw occurrence
//! counts (before any frequency or entropy filtering), then merged per set.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;

use crate::encoding::decode_kmer;
use crate::error::{IoContext, Result};
use crate::format::ksp;

/// Number of distinct k-mers per occurrence count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KmerSpectrum {
    counts: AHashMap<u64, u64>,
}

impl KmerSpectrum {
    /// Empty spectrum
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one distinct k-mer seen `frequency` times
    #[inline]
    pub fn add(&mut self, frequency: u64) {
        *self.counts.entry(frequency).or_insert(0) += 1;
    }

    /// Record `count` distinct k-mers seen `frequency` times
    pub fn add_many(&mut self, frequency: u64, count: u64) {
        if count > 0 {
            *self.counts.entry(frequency).or_insert(0) += count;
        }
    }

    /// Fold another spectrum into this one
    pub fn merge(&mut self, other: &KmerSpectrum) {
        for (&frequency, &count) in &other.counts {
            self.add_many(frequency, count);
        }
    }

    /// Distinct k-mers seen exactly `frequency` times
    pub fn get(&self, frequency: u64) -> u64 {
        self.counts.get(&frequency).copied().unwrap_or(0)
    }

    /// Largest observed frequency (0 when empty)
    pub fn max_frequency(&self) -> u64 {
        self.counts.keys().copied().max().unwrap_or(0)
    }

    /// Total number of distinct k-mers
    pub fn distinct(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Total number of k-mer occurrences
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(f, c)| f * c).sum()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(frequency, count)` pairs sorted by frequency
    pub fn entries(&self) -> Vec<(u64, u64)> {
        let mut entries: Vec<(u64, u64)> = self.counts.iter().map(|(&f, &c)| (f, c)).collect();
        entries.sort_unstable();
        entries
    }

    /// Write as a `.ksp` file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        ksp::write_spectrum(path, &self.entries())
    }

    /// Read a `.ksp` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut spectrum = Self::new();
        for (frequency, count) in ksp::read_spectrum(path)? {
            spectrum.add_many(frequency, count);
        }
        Ok(spectrum)
    }
}

/// Multi-set spectrum table: header `frequency,<id>...`, one row per frequency
///
/// Rows run from 1 to the largest observed frequency; all-zero rows are omitted.
pub fn spectrum_csv(columns: &[(String, KmerSpectrum)]) -> String {
    let mut out = String::from("frequency");
    for (id, _) in columns {
        out.push(',');
        out.push_str(id);
    }
    out.push('\n');
    let max = columns
        .iter()
        .map(|(_, s)| s.max_frequency())
        .max()
        .unwrap_or(0);
    for frequency in 1..=max {
        let row: Vec<u64> = columns.iter().map(|(_, s)| s.get(frequency)).collect();
        if row.iter().all(|&c| c == 0) {
            continue;
        }
        let _ = write!(out, "{frequency}");
        for count in row {
            let _ = write!(out, ",{count}");
        }
        out.push('\n');
    }
    out
}

/// Bounded collection of the most frequent k-mers
///
/// Ranking is by decreasing frequency, ties by increasing k-mer code.
#[derive(Debug, Clone)]
pub struct TopKmers {
    capacity: usize,
    // min-heap on (frequency, Reverse(kmer)): the root is the weakest entry
    heap: BinaryHeap<Reverse<(u64, Reverse<u64>)>>,
}

impl TopKmers {
    /// Keep at most `capacity` k-mers (0 disables collection)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(1 << 16) + 1),
        }
    }

    /// Maximum number of kept k-mers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of kept k-mers
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no k-mer is kept
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a k-mer with its frequency
    #[inline]
    pub fn push(&mut self, kmer: u64, frequency: u64) {
        if self.capacity == 0 {
            return;
        }
        let entry = Reverse((frequency, Reverse(kmer)));
        if self.heap.len() < self.capacity {
            self.heap.push(entry);
        } else if let Some(weakest) = self.heap.peek() {
            // Reverse flips the order: a smaller wrapper is a stronger entry
            if entry < *weakest {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Fold another collection into this one
    pub fn merge(&mut self, other: TopKmers) {
        for Reverse((frequency, Reverse(kmer))) in other.heap {
            self.push(kmer, frequency);
        }
    }

    /// `(kmer, frequency)` pairs, most frequent first
    pub fn into_sorted(self) -> Vec<(u64, u64)> {
        let mut entries: Vec<(u64, u64)> = self
            .heap
            .into_iter()
            .map(|Reverse((frequency, Reverse(kmer)))| (kmer, frequency))
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }

    /// Write a `kmer,count` CSV with k-mers spelled out
    pub fn write_csv(self, path: impl AsRef<Path>, k: usize) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path).at(path)?);
        writeln!(w, "kmer,count").at(path)?;
        for (kmer, frequency) in self.into_sorted() {
            writeln!(w, "{},{}", decode_kmer(kmer, k), frequency).at(path)?;
        }
        w.flush().at(path)
    }
}
