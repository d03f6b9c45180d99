//! Building k-mer set groups
//!
//! The build runs in two stages:
//! 1. Sharding: each sequence is cut into super-k-mers, which are appended
//!    to the `.skm` shard of their minimizer's partition
//! 2. Finalizing: each shard is sorted, counted, filtered and written as a
//!    delta-encoded `.kdi` partition with its `.kdx` side-car
//!
//! Stage 0 output lives under `<root>/.build/`, which doubles as the lock
//! preventing two builders from writing the same group.

pub mod config;
pub(crate) mod finalize;
pub mod group_builder;
pub(crate) mod shard;

pub use config::BuildConfiguration;
pub use group_builder::KmerSetGroupBuilder;
