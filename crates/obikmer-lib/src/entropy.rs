//! Sequence complexity as normalized sub-word entropy
//!
//! For every sub-word size `ws` in `1..=level_max`, the `k - ws + 1`
//! sub-words of a k-mer are folded to their circular canonical form
//! (smallest rotation) and the Shannon entropy of their distribution is
//! divided by the best entropy reachable with that many observations over
//! `necklace_count(ws, 4)` classes. The score of a k-mer is the minimum of
//! these ratios, rounded to 4 decimals.
//!
//! [`EntropyTables`] holds the read-only rotation tables and is shared
//! through an `Arc`; each worker owns a [`KmerEntropyFilter`] with its own
//! counting scratch space.

use std::sync::Arc;

use crate::constants::MAX_ENTROPY_LEVEL;
use crate::encoding::{encode_base_checked, kmer_mask, AMBIGUOUS};
use crate::error::{KmerError, Result};

/// Euler's totient
fn euler_phi(mut n: u64) -> u64 {
    let mut result = n;
    let mut p = 2;
    while p * p <= n {
        if n % p == 0 {
            while n % p == 0 {
                n /= p;
            }
            result -= result / p;
        }
        p += 1;
    }
    if n > 1 {
        result -= result / n;
    }
    result
}

/// Number of necklaces of length `n` over an alphabet of size `a` (Moreau)
pub fn necklace_count(n: usize, a: u64) -> u64 {
    assert!(n > 0, "necklace length must be positive");
    let n64 = n as u64;
    let total: u64 = (1..=n64)
        .filter(|d| n64 % d == 0)
        .map(|d| euler_phi(d) * a.pow((n64 / d) as u32))
        .sum();
    total / n64
}

/// Smallest rotation of a `ws`-base code
fn smallest_rotation(code: u64, ws: usize) -> u64 {
    let mask = kmer_mask(ws);
    let mut best = code;
    let mut rotated = code;
    for _ in 1..ws {
        // move the leading base to the end
        rotated = ((rotated << 2) | (rotated >> (2 * (ws - 1)))) & mask;
        best = best.min(rotated);
    }
    best
}

/// `x ln x`, with `0 ln 0 = 0`
#[inline]
fn x_ln_x(x: f64) -> f64 {
    if x > 0.0 {
        x * x.ln()
    } else {
        0.0
    }
}

/// Read-only lookup tables for one `(k, level_max)` pair
#[derive(Debug)]
pub struct EntropyTables {
    k: usize,
    level_max: usize,
    /// `norm[ws][code]`: smallest rotation of `code`, indexed from `ws = 1`
    norm: Vec<Vec<u32>>,
    /// Maximum entropy reachable by the `k - ws + 1` sub-words of size `ws`
    h_max: Vec<f64>,
}

impl EntropyTables {
    /// Build the tables for k-mers of size `k`
    ///
    /// Sub-word sizes above `k - 1` are ignored, so the effective level is
    /// `min(level_max, k - 1)`.
    pub fn new(k: usize, level_max: usize) -> Result<Self> {
        if !(2..=crate::constants::MAX_K).contains(&k) {
            return Err(KmerError::InvalidParameters(format!(
                "entropy needs 2 <= k <= 31, got k={k}"
            )));
        }
        if !(1..=MAX_ENTROPY_LEVEL).contains(&level_max) {
            return Err(KmerError::InvalidParameters(format!(
                "entropy level must be in [1, {MAX_ENTROPY_LEVEL}], got {level_max}"
            )));
        }
        let level_max = level_max.min(k - 1);

        let mut norm = vec![Vec::new()];
        let mut h_max = vec![0.0];
        for ws in 1..=level_max {
            let table: Vec<u32> = (0..1u64 << (2 * ws))
                .map(|code| smallest_rotation(code, ws) as u32)
                .collect();
            norm.push(table);

            let n = (k - ws + 1) as f64;
            let classes = necklace_count(ws, 4) as f64;
            let h = if n < classes {
                n.ln()
            } else {
                let q = (n / classes).floor();
                let r = n - q * classes;
                n.ln() - (r * x_ln_x(q + 1.0) + (classes - r) * x_ln_x(q)) / n
            };
            h_max.push(h);
        }

        Ok(Self {
            k,
            level_max,
            norm,
            h_max,
        })
    }

    /// k-mer size
    pub fn k(&self) -> usize {
        self.k
    }

    /// Effective maximum sub-word size
    pub fn level_max(&self) -> usize {
        self.level_max
    }
}

/// Per-worker entropy scorer
#[derive(Debug, Clone)]
pub struct KmerEntropyFilter {
    tables: Arc<EntropyTables>,
    threshold: f64,
    counts: Vec<u32>,
    touched: Vec<u32>,
}

impl KmerEntropyFilter {
    /// Create a scorer over shared tables
    pub fn new(tables: Arc<EntropyTables>, threshold: f64) -> Self {
        let size = 1usize << (2 * tables.level_max);
        let touched = Vec::with_capacity(tables.k);
        Self {
            tables,
            threshold,
            counts: vec![0; size],
            touched,
        }
    }

    /// Acceptance threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// k-mer size
    pub fn k(&self) -> usize {
        self.tables.k
    }

    /// Entropy score of a k-mer code in `[0, 1]`
    pub fn entropy(&mut self, kmer: u64) -> f64 {
        let k = self.tables.k;
        let mut score = 1.0f64;
        for ws in 1..=self.tables.level_max {
            let mask = kmer_mask(ws);
            let n = k - ws + 1;
            let norm = &self.tables.norm[ws];

            for i in 0..n {
                let sub = (kmer >> (2 * (k - ws - i))) & mask;
                let class = norm[sub as usize];
                if self.counts[class as usize] == 0 {
                    self.touched.push(class);
                }
                self.counts[class as usize] += 1;
            }

            let mut sum = 0.0;
            for &class in &self.touched {
                sum += x_ln_x(self.counts[class as usize] as f64);
                self.counts[class as usize] = 0;
            }
            self.touched.clear();

            let n = n as f64;
            let h = n.ln() - sum / n;
            let h_max = self.tables.h_max[ws];
            let ratio = if h_max > 0.0 {
                (h / h_max).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let ratio = (ratio * 10_000.0).round() / 10_000.0;
            score = score.min(ratio);
        }
        score
    }

    /// Entropy score of a window of `k` ASCII bases; windows with a non-ACGT base score 0
    pub fn window_entropy(&mut self, window: &[u8]) -> f64 {
        debug_assert_eq!(window.len(), self.tables.k);
        let mut code = 0u64;
        for &b in window {
            let c = encode_base_checked(b);
            if c == AMBIGUOUS {
                return 0.0;
            }
            code = (code << 2) | c as u64;
        }
        self.entropy(code)
    }

    /// Whether a k-mer's score strictly exceeds the threshold
    #[inline]
    pub fn accept(&mut self, kmer: u64) -> bool {
        self.entropy(kmer) > self.threshold
    }
}
