//! Build configuration for k-mer set groups
//!
//! Every knob of the two build stages lives here; defaults come from
//! [`crate::constants`] and nothing is process-wide.

use crate::constants::{
    default_partitions, default_reader_workers, is_valid_km, DEFAULT_BATCH_SIZE,
    DEFAULT_ENTROPY_LEVEL_MAX, MAX_ENTROPY_LEVEL, MAX_K,
};
use crate::error::{KmerError, Result};

/// Configuration parameters for building a k-mer set group
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    /// K-mer length (1 < k <= 31)
    pub k: usize,

    /// Minimizer length (1 <= m < k)
    pub m: usize,

    /// Number of partitions (`None` = `min(4096, max(64, 4^m))`)
    pub partitions: Option<usize>,

    /// Drop k-mers seen fewer times (1 = plain deduplication)
    pub min_frequency: u64,

    /// Drop k-mers seen more times (0 = no upper bound)
    pub max_frequency: u64,

    /// Number of most frequent k-mers written to `top_kmers.csv` (0 = none)
    pub save_top_n: usize,

    /// Reject k-mers whose entropy is `<=` this value (0 = filter off)
    pub entropy_threshold: f64,

    /// Largest sub-word size used by the entropy score
    pub entropy_level_max: usize,

    /// Number of worker threads (0 = all available cores)
    pub num_threads: usize,

    /// Number of shard readers in the finalize stage (0 = from core count)
    pub reader_workers: usize,

    /// Sequences handed to the sharding stage at once
    pub batch_size: usize,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            k: 31,
            m: 13,
            partitions: None,
            min_frequency: 1,
            max_frequency: 0,
            save_top_n: 0,
            entropy_threshold: 0.0,
            entropy_level_max: DEFAULT_ENTROPY_LEVEL_MAX,
            num_threads: 0,
            reader_workers: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BuildConfiguration {
    /// Create a configuration with the given k-mer and minimizer lengths
    pub fn new(k: usize, m: usize) -> Result<Self> {
        let config = Self {
            k,
            m,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.k < 2 || self.k > MAX_K {
            return Err(KmerError::InvalidParameters(format!(
                "k must be in range [2, {MAX_K}], got k={}",
                self.k
            )));
        }
        if !is_valid_km(self.k, self.m) {
            return Err(KmerError::InvalidParameters(format!(
                "m must be in range [1, k), got m={}, k={}",
                self.m, self.k
            )));
        }
        if self.partitions == Some(0) {
            return Err(KmerError::InvalidParameters(
                "number of partitions must be positive".into(),
            ));
        }
        if self.min_frequency == 0 {
            return Err(KmerError::InvalidParameters(
                "min_frequency must be at least 1".into(),
            ));
        }
        if self.max_frequency != 0 && self.max_frequency < self.min_frequency {
            return Err(KmerError::InvalidParameters(format!(
                "max_frequency ({}) is below min_frequency ({})",
                self.max_frequency, self.min_frequency
            )));
        }
        if !(0.0..=1.0).contains(&self.entropy_threshold) {
            return Err(KmerError::InvalidParameters(format!(
                "entropy_threshold must be in [0, 1], got {}",
                self.entropy_threshold
            )));
        }
        if !(1..=MAX_ENTROPY_LEVEL).contains(&self.entropy_level_max) {
            return Err(KmerError::InvalidParameters(format!(
                "entropy_level_max must be in [1, {MAX_ENTROPY_LEVEL}], got {}",
                self.entropy_level_max
            )));
        }
        Ok(())
    }

    /// Effective number of partitions
    pub fn num_partitions(&self) -> usize {
        self.partitions.unwrap_or_else(|| default_partitions(self.m))
    }

    /// Effective number of worker threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.num_threads
        }
    }

    /// Effective number of finalize-stage shard readers
    pub fn effective_reader_workers(&self) -> usize {
        if self.reader_workers == 0 {
            default_reader_workers(self.effective_threads())
        } else {
            self.reader_workers
        }
    }

    /// Whether the entropy filter is active
    pub fn entropy_filter_enabled(&self) -> bool {
        self.entropy_threshold > 0.0
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Build Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  m = {}", self.m);
        tracing::info!("  partitions = {}", self.num_partitions());
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::debug!("  reader_workers = {}", self.effective_reader_workers());
        tracing::info!("  min_frequency = {}", self.min_frequency);
        if self.max_frequency > 0 {
            tracing::info!("  max_frequency = {}", self.max_frequency);
        }
        if self.entropy_filter_enabled() {
            tracing::info!(
                "  entropy filter = {} (level {})",
                self.entropy_threshold,
                self.entropy_level_max
            );
        }
        tracing::debug!("  save_top_n = {}", self.save_top_n);
        tracing::debug!("  batch_size = {}", self.batch_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BuildConfiguration::default();
        assert_eq!(config.k, 31);
        assert_eq!(config.m, 13);
        assert!(config.validate().is_ok());
        assert_eq!(config.num_partitions(), 4096);
        assert!(!config.entropy_filter_enabled());
    }

    #[test]
    fn test_new_config() {
        let config = BuildConfiguration::new(15, 7).unwrap();
        assert_eq!(config.k, 15);
        assert_eq!(config.m, 7);
        assert_eq!(BuildConfiguration::new(15, 3).unwrap().num_partitions(), 64);
    }

    #[test]
    fn test_even_k_is_allowed() {
        assert!(BuildConfiguration::new(20, 9).is_ok());
    }

    #[test]
    fn test_validate_m_ge_k() {
        assert!(BuildConfiguration::new(21, 21).is_err());
        assert!(BuildConfiguration::new(21, 0).is_err());
    }

    #[test]
    fn test_validate_k_out_of_range() {
        assert!(BuildConfiguration::new(32, 13).is_err());
        assert!(BuildConfiguration::new(1, 0).is_err());
    }

    #[test]
    fn test_validate_frequencies_and_entropy() {
        let base = BuildConfiguration::new(15, 7).unwrap();
        let bad = [
            BuildConfiguration { min_frequency: 0, ..base.clone() },
            BuildConfiguration { min_frequency: 5, max_frequency: 2, ..base.clone() },
            BuildConfiguration { entropy_threshold: 1.5, ..base.clone() },
            BuildConfiguration { entropy_level_max: 0, ..base.clone() },
            BuildConfiguration { entropy_level_max: 11, ..base.clone() },
            BuildConfiguration { partitions: Some(0), ..base.clone() },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(KmerError::InvalidParameters(_))
            ));
        }
        let ok = BuildConfiguration { min_frequency: 2, max_frequency: 2, ..base };
        assert!(ok.validate().is_ok());
    }
}
