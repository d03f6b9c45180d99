// obikmer: partitioned on-disk k-mer set groups
//
// Building groups of canonical k-mer sets from DNA sequences, streaming set
// algebra, Jaccard matrices and k-mer matching over the stored partitions.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod algebra;
pub mod builder;
pub mod constants;
pub mod encoding;
pub mod entropy;
pub mod error;
pub mod format;
pub mod frequency;
pub mod group;
pub mod jaccard;
pub mod kmer;
pub mod lowmask;
pub mod matching;
pub mod merge;
pub mod minimizer;
pub mod parse;
pub mod spectrum;
pub mod varint;

// Re-export common types at crate root
pub use algebra::{PairwiseOperation, SetOperation};
pub use builder::{BuildConfiguration, KmerSetGroupBuilder};
pub use entropy::{EntropyTables, KmerEntropyFilter};
pub use error::{KmerError, Result};
pub use group::{GroupMetadata, KmerSetGroup};
pub use jaccard::{PairCounts, TriangularMatrix};
pub use kmer::KmerIter;
pub use lowmask::{LowComplexityMasker, LowMaskConfig, MaskingMode};
pub use matching::{QueryBatch, SequenceMatches};
pub use minimizer::{super_kmers, SuperKmer};
pub use parse::{SequenceBatches, SequenceRecord};
pub use spectrum::{KmerSpectrum, TopKmers};

/// Version of the library, from the package manifest
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
