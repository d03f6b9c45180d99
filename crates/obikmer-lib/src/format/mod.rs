//! On-disk formats
//!
//! All multi-byte integers are little endian.
//!
//! - [`skm`]: temporary super-k-mer shards written while building
//! - [`kdi`]: sorted, delta-encoded k-mer streams (one per set and partition)
//! - [`kdx`]: sparse positional index next to each `.kdi`
//! - [`ksp`]: per-set frequency spectra

pub mod kdi;
pub mod kdx;
pub mod ksp;
pub mod skm;

pub use kdi::{KdiReader, KdiWriter};
pub use kdx::KdxIndex;
pub use skm::{PackedSuperKmer, SkmShard};

/// File name of partition `p` with the given extension (`part_0007.kdi`)
pub fn partition_file_name(partition: usize, extension: &str) -> String {
    format!("part_{partition:04}.{extension}")
}
