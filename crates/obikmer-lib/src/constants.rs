//! Constants and defaults for obikmer
//!
//! This module defines the on-disk magic numbers, the sparse index stride,
//! valid parameter ranges and the default values used by the builder.

/// Maximum k-mer size supported (2k bits must fit in a u64 with two spare tag bits)
pub const MAX_K: usize = 31;

/// Minimum k-mer size supported
pub const MIN_K: usize = 1;

/// Number of k-mers between two `.kdx` anchors
pub const KDX_STRIDE: u32 = 4096;

/// Magic bytes of a `.kdi` sorted k-mer stream
pub const KDI_MAGIC: &[u8; 4] = b"KDI\x01";

/// Magic bytes of a `.kdx` sparse index
pub const KDX_MAGIC: &[u8; 4] = b"KDX\x01";

/// Magic bytes of a `.ksp` frequency spectrum
pub const KSP_MAGIC: &[u8; 4] = b"KSP\x01";

/// Size of the `.kdi` header (magic + count)
pub const KDI_HEADER_SIZE: u64 = 12;

/// Longest super-k-mer a `.skm` record can hold (length is a u16)
pub const MAX_SKM_LENGTH: usize = u16::MAX as usize;

/// Mask selecting the ambiguity tag stored in bits 62-63 of an error-tagged k-mer
pub const ERROR_TAG_MASK: u64 = 0b11 << 62;

/// Shift of the ambiguity tag
pub const ERROR_TAG_SHIFT: u32 = 62;

/// Lower bound on the default number of partitions
pub const MIN_DEFAULT_PARTITIONS: usize = 64;

/// Upper bound on the default number of partitions
pub const MAX_DEFAULT_PARTITIONS: usize = 4096;

/// Default maximum sub-word size used by the entropy filter
pub const DEFAULT_ENTROPY_LEVEL_MAX: usize = 6;

/// Largest sub-word size the entropy tables are built for
pub const MAX_ENTROPY_LEVEL: usize = 10;

/// Default number of sequences handed to the sharding stage at once
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Bytes buffered per partition before the shard file is appended to
pub const SHARD_FLUSH_BYTES: usize = 64 * 1024;

/// Group metadata file name
pub const METADATA_FILE: &str = "metadata.toml";

/// Value of the `type` field in `metadata.toml`
pub const GROUP_TYPE: &str = "KmerSetGroup";

/// Temporary build directory name
pub const BUILD_DIR: &str = ".build";

/// Per-set spectrum file name
pub const SPECTRUM_FILE: &str = "spectrum.bin";

/// Per-set top-N frequent k-mers file name
pub const TOP_KMERS_FILE: &str = "top_kmers.csv";

/// Check if a (k, m) pair is valid
#[inline]
pub const fn is_valid_km(k: usize, m: usize) -> bool {
    k >= MIN_K && k <= MAX_K && m >= 1 && m < k
}

/// Default number of partitions for a minimizer size: `min(4096, max(64, 4^m))`
pub fn default_partitions(m: usize) -> usize {
    // 4^m overflows usize well after it exceeds the upper bound
    let four_pow_m = if m >= 16 { usize::MAX } else { 1usize << (2 * m) };
    four_pow_m.clamp(MIN_DEFAULT_PARTITIONS, MAX_DEFAULT_PARTITIONS)
}

/// Default number of stage-1 reader workers: `max(2, min(cores / 4, 4))`
pub fn default_reader_workers(cores: usize) -> usize {
    (cores / 4).min(4).max(2)
}
