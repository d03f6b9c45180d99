//! Low-complexity masking of whole sequences
//!
//! Every window of `k` bases gets an entropy score (windows covering a
//! non-ACGT base score 0). A base is low complexity when the smallest score
//! among the windows covering it is `<= threshold`, which stretches each
//! low-entropy window over all of its bases.

use std::ops::Range;
use std::sync::Arc;

use crate::encoding::is_acgt;
use crate::entropy::{EntropyTables, KmerEntropyFilter};
use crate::error::{KmerError, Result};

/// What to do with low-complexity regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskingMode {
    /// Replace low-complexity bases with the masking character
    #[default]
    Mask,
    /// Emit the high-complexity fragments
    Split,
    /// Emit the low-complexity fragments
    Extract,
}

/// Masker configuration
#[derive(Debug, Clone)]
pub struct LowMaskConfig {
    /// Window size
    pub k: usize,
    /// Maximum sub-word size of the entropy score
    pub level_max: usize,
    /// Windows scoring `<= threshold` are low complexity
    pub threshold: f64,
    /// Output mode
    pub mode: MaskingMode,
    /// Replacement byte in [`MaskingMode::Mask`]
    pub masking_char: u8,
    /// Keep split/extracted fragments shorter than `k`
    pub keep_shorter: bool,
}

impl Default for LowMaskConfig {
    fn default() -> Self {
        Self {
            k: 31,
            level_max: crate::constants::DEFAULT_ENTROPY_LEVEL_MAX,
            threshold: 0.5,
            mode: MaskingMode::Mask,
            masking_char: b'.',
            keep_shorter: false,
        }
    }
}

/// One output piece of a processed sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedFragment {
    /// Location in the input sequence
    pub range: Range<usize>,
    /// Bases (masked in [`MaskingMode::Mask`])
    pub bases: Vec<u8>,
}

/// Low-complexity masker, one per thread
#[derive(Debug, Clone)]
pub struct LowComplexityMasker {
    config: LowMaskConfig,
    filter: KmerEntropyFilter,
}

impl LowComplexityMasker {
    /// Build the masker and its entropy tables
    pub fn new(config: LowMaskConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(KmerError::InvalidParameters(format!(
                "entropy threshold must be in [0, 1], got {}",
                config.threshold
            )));
        }
        let tables = Arc::new(EntropyTables::new(config.k, config.level_max)?);
        let filter = KmerEntropyFilter::new(tables, config.threshold);
        Ok(Self { config, filter })
    }

    /// Configuration in use
    pub fn config(&self) -> &LowMaskConfig {
        &self.config
    }

    /// Entropy of each window; entry `i` is the window starting at `i`
    pub fn entropy_profile(&mut self, seq: &[u8]) -> Vec<f64> {
        let k = self.config.k;
        if seq.len() < k {
            return Vec::new();
        }
        seq.windows(k)
            .map(|w| self.filter.window_entropy(w))
            .collect()
    }

    /// Per-base low-complexity flags
    pub fn low_complexity(&mut self, seq: &[u8]) -> Vec<bool> {
        let k = self.config.k;
        let profile = self.entropy_profile(seq);
        let mut low = vec![false; seq.len()];
        for (start, &score) in profile.iter().enumerate() {
            if score <= self.config.threshold {
                low[start..start + k].iter_mut().for_each(|b| *b = true);
            }
        }
        // also holds for sequences shorter than k, which have no window
        for (flag, &base) in low.iter_mut().zip(seq) {
            *flag |= !is_acgt(base);
        }
        low
    }

    /// Apply the configured mode to one sequence
    pub fn process(&mut self, seq: &[u8]) -> Vec<MaskedFragment> {
        let low = self.low_complexity(seq);
        match self.config.mode {
            MaskingMode::Mask => {
                let bases = seq
                    .iter()
                    .zip(&low)
                    .map(|(&b, &l)| if l { self.config.masking_char } else { b })
                    .collect();
                vec![MaskedFragment {
                    range: 0..seq.len(),
                    bases,
                }]
            }
            MaskingMode::Split => self.fragments(seq, &low, false),
            MaskingMode::Extract => self.fragments(seq, &low, true),
        }
    }

    fn fragments(&self, seq: &[u8], low: &[bool], want_low: bool) -> Vec<MaskedFragment> {
        let mut out = Vec::new();
        let mut start = None;
        for i in 0..=seq.len() {
            let inside = i < seq.len() && low[i] == want_low;
            match (inside, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    if i - s >= self.config.k || self.config.keep_shorter {
                        out.push(MaskedFragment {
                            range: s..i,
                            bases: seq[s..i].to_vec(),
                        });
                    }
                    start = None;
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIGH: &[u8] = b"ACGGTCATTGCAAGTTCGA";

    fn masker(mode: MaskingMode, keep_shorter: bool) -> LowComplexityMasker {
        LowComplexityMasker::new(LowMaskConfig {
            k: 8,
            level_max: 3,
            threshold: 0.3,
            mode,
            masking_char: b'.',
            keep_shorter,
        })
        .unwrap()
    }

    fn sample() -> Vec<u8> {
        let mut seq = HIGH.to_vec();
        seq.extend_from_slice(&[b'A'; 20]);
        seq.extend_from_slice(HIGH);
        seq
    }

    #[test]
    fn test_mask_mode() {
        let seq = sample();
        let out = masker(MaskingMode::Mask, false).process(&seq);
        assert_eq!(out.len(), 1);
        let masked = &out[0].bases;
        assert_eq!(masked.len(), seq.len());
        // the homopolymer core is masked, the flanks are not
        assert!(masked[22..36].iter().all(|&b| b == b'.'));
        assert_eq!(&masked[..8], &HIGH[..8]);
        assert_eq!(&masked[masked.len() - 8..], &HIGH[HIGH.len() - 8..]);
    }

    #[test]
    fn test_short_sequence_masks_ambiguous_bases() {
        let out = masker(MaskingMode::Mask, false).process(b"ACNGT");
        assert_eq!(out[0].bases, b"AC.GT");
        let out = masker(MaskingMode::Mask, false).process(b"ACGT");
        assert_eq!(out[0].bases, b"ACGT");
    }

    #[test]
    fn test_split_and_extract_are_complementary() {
        let seq = sample();
        let high = masker(MaskingMode::Split, true).process(&seq);
        let low = masker(MaskingMode::Extract, true).process(&seq);
        let mut covered: Vec<Range<usize>> = high.iter().chain(&low).map(|f| f.range.clone()).collect();
        covered.sort_by_key(|r| r.start);
        assert_eq!(covered.first().map(|r| r.start), Some(0));
        for pair in covered.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(covered.last().map(|r| r.end), Some(seq.len()));
        assert!(low.iter().all(|f| f.bases.contains(&b'A')));
    }

    #[test]
    fn test_ambiguous_bases_are_low() {
        let mut seq = HIGH.to_vec();
        seq[9] = b'N';
        let low = masker(MaskingMode::Mask, false).low_complexity(&seq);
        assert!(low[9]);
        assert!(low[2..17].iter().all(|&l| l));
    }

    #[test]
    fn test_short_fragments_dropped_unless_kept() {
        let mut seq = b"ACGGTCA".to_vec();
        seq.extend_from_slice(&[b'T'; 30]);
        let dropped = masker(MaskingMode::Split, false).process(&seq);
        assert!(dropped.iter().all(|f| f.range.len() >= 8));
        let kept = masker(MaskingMode::Split, true).process(&seq);
        assert!(kept.len() >= dropped.len());
    }

    #[test]
    fn test_short_sequence_untouched() {
        let out = masker(MaskingMode::Mask, false).process(b"ACG");
        assert_eq!(out[0].bases, b"ACG".to_vec());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let config = LowMaskConfig {
            threshold: 1.5,
            ..LowMaskConfig::default()
        };
        assert!(LowComplexityMasker::new(config).is_err());
    }
}
