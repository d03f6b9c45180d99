//! Streaming set algebra over groups
//!
//! Every operation works one partition at a time: the partitions `p` of the
//! operand sets are merged with a [`KWayMerge`] and each merged value is kept
//! or dropped from its occurrence count and origins. Partitions are
//! independent, so they run in parallel on the current rayon pool.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use toml::Table;
use tracing::{debug, info};

use crate::constants::{SPECTRUM_FILE, TOP_KMERS_FILE};
use crate::entropy::{EntropyTables, KmerEntropyFilter};
use crate::error::{IoContext, KmerError, Result};
use crate::format::{partition_file_name, KdiReader, KdiWriter};
use crate::group::{set_dir_name, GroupLock, GroupMetadata, KmerSetGroup};
use crate::merge::KWayMerge;

/// Reduction of several sets into one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    /// Present in at least one set
    Union,
    /// Present in every set
    Intersect,
    /// Present in the first set and in none of the others
    Difference,
    /// Present in at least `q` sets
    QuorumAtLeast(usize),
    /// Present in exactly `q` sets
    QuorumExactly(usize),
    /// Present in at most `q` sets
    QuorumAtMost(usize),
}

impl SetOperation {
    /// Whether a value seen `count` times, in the inputs listed by `origins`
    /// (sorted, relative to the operand list), out of `n` inputs, is kept
    pub fn keeps(&self, count: usize, origins: &[usize], n: usize) -> bool {
        match *self {
            SetOperation::Union => count >= 1,
            SetOperation::Intersect => count == n,
            SetOperation::Difference => origins == [0],
            SetOperation::QuorumAtLeast(q) => q > 0 && count >= q,
            SetOperation::QuorumExactly(q) => q > 0 && count == q,
            SetOperation::QuorumAtMost(q) => count >= 1 && count <= q,
        }
    }

    /// Short name, used as the identifier of the result set
    pub fn name(&self) -> String {
        match self {
            SetOperation::Union => "union".into(),
            SetOperation::Intersect => "intersect".into(),
            SetOperation::Difference => "difference".into(),
            SetOperation::QuorumAtLeast(q) => format!("quorum_at_least_{q}"),
            SetOperation::QuorumExactly(q) => format!("quorum_exactly_{q}"),
            SetOperation::QuorumAtMost(q) => format!("quorum_at_most_{q}"),
        }
    }
}

/// Set-wise operation between two groups of the same shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairwiseOperation {
    /// `A_i ∪ B_i`
    Union,
    /// `A_i ∩ B_i`
    Intersect,
}

impl PairwiseOperation {
    fn as_reduction(self) -> SetOperation {
        match self {
            PairwiseOperation::Union => SetOperation::Union,
            PairwiseOperation::Intersect => SetOperation::Intersect,
        }
    }
}

/// Merge the partition `p` of `sources` into `out`, keeping what `op` keeps
fn merge_partition(sources: Vec<KdiReader>, op: SetOperation, out: &Path) -> Result<u64> {
    let n = sources.len();
    let mut merge = KWayMerge::new(sources)?;
    let mut writer = KdiWriter::create(out)?;
    while let Some((kmer, count)) = merge.next()? {
        if op.keeps(count, merge.origins(), n) {
            writer.write(kmer)?;
        }
    }
    writer.finish()
}

/// Fresh output group in `out` with the layout of `like`
fn prepare_output(out: &Path, like: &GroupMetadata) -> Result<(GroupMetadata, GroupLock)> {
    if GroupMetadata::exists(out) {
        return Err(KmerError::InvalidParameters(format!(
            "{} already holds a k-mer set group",
            out.display()
        )));
    }
    fs::create_dir_all(out).at(out)?;
    let lock = GroupLock::acquire(out)?;
    Ok((GroupMetadata::new(like.k, like.m, like.partitions), lock))
}

impl KmerSetGroup {
    /// Reduce the selected sets into a single-set group written to `out`
    ///
    /// The operand order matters for [`SetOperation::Difference`]: the
    /// first selected set is the minuend.
    pub fn reduce(&self, op: SetOperation, sets: &[usize], out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        let out = out.as_ref();
        if sets.is_empty() {
            return Err(KmerError::InvalidParameters(format!(
                "{}: no input set",
                op.name()
            )));
        }
        for &set in sets {
            self.reader(set, 0)?;
        }
        let (mut meta, lock) = prepare_output(out, self.metadata())?;
        let set_dir = out.join(set_dir_name(0));
        fs::create_dir_all(&set_dir).at(&set_dir)?;

        info!(
            "{} of {} set(s) from {} into {}",
            op.name(),
            sets.len(),
            self.path().display(),
            out.display()
        );
        let counts = (0..self.partitions())
            .into_par_iter()
            .map(|p| {
                let readers = sets
                    .iter()
                    .map(|&set| self.reader(set, p))
                    .collect::<Result<Vec<_>>>()?;
                merge_partition(readers, op, &set_dir.join(partition_file_name(p, "kdi")))
            })
            .collect::<Result<Vec<u64>>>()?;
        let count = counts.iter().sum();
        debug!("{}: {count} k-mers", op.name());

        meta.push_set(op.name(), count, Table::new());
        meta.save(out)?;
        lock.release()?;
        Ok(KmerSetGroup::from_parts(out.to_path_buf(), meta))
    }

    /// Union of every set
    pub fn union(&self, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::Union, &self.all_sets(), out)
    }

    /// Intersection of every set
    pub fn intersect(&self, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::Intersect, &self.all_sets(), out)
    }

    /// Set 0 minus the union of the other sets
    pub fn difference(&self, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::Difference, &self.all_sets(), out)
    }

    /// K-mers present in at least `q` sets
    pub fn quorum_at_least(&self, q: usize, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::QuorumAtLeast(q), &self.all_sets(), out)
    }

    /// K-mers present in exactly `q` sets
    pub fn quorum_exactly(&self, q: usize, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::QuorumExactly(q), &self.all_sets(), out)
    }

    /// K-mers present in at most `q` sets
    pub fn quorum_at_most(&self, q: usize, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.reduce(SetOperation::QuorumAtMost(q), &self.all_sets(), out)
    }

    /// Set-wise `op` with `other`: set `i` of the result combines set `i` of both groups
    pub fn pairwise(&self, other: &KmerSetGroup, op: PairwiseOperation, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        let out = out.as_ref();
        let (a, b) = (self.metadata(), other.metadata());
        if !a.same_layout(b) || a.size != b.size {
            return Err(KmerError::IncompatibleGroup(format!(
                "{} has (k={}, m={}, P={}, N={}), {} has (k={}, m={}, P={}, N={})",
                self.path().display(),
                a.k,
                a.m,
                a.partitions,
                a.size,
                other.path().display(),
                b.k,
                b.m,
                b.partitions,
                b.size
            )));
        }
        let (mut meta, lock) = prepare_output(out, a)?;
        for set in 0..self.num_sets() {
            let dir = out.join(set_dir_name(set));
            fs::create_dir_all(&dir).at(&dir)?;
        }

        let reduction = op.as_reduction();
        let jobs: Vec<(usize, usize)> = (0..self.num_sets())
            .flat_map(|set| (0..self.partitions()).map(move |p| (set, p)))
            .collect();
        let counts = jobs
            .par_iter()
            .map(|&(set, p)| {
                let readers = vec![self.reader(set, p)?, other.reader(set, p)?];
                let path = out.join(set_dir_name(set)).join(partition_file_name(p, "kdi"));
                merge_partition(readers, reduction, &path).map(|n| (set, n))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut per_set = vec![0u64; self.num_sets()];
        for (set, n) in counts {
            per_set[set] += n;
        }

        for (set, count) in per_set.into_iter().enumerate() {
            meta.push_set(
                self.set_identifier(set).unwrap_or_default().to_string(),
                count,
                self.set_attributes(set)?.clone(),
            );
        }
        meta.save(out)?;
        lock.release()?;
        info!("pairwise {op:?} written to {}", out.display());
        Ok(KmerSetGroup::from_parts(out.to_path_buf(), meta))
    }

    /// Set-wise union with `other`
    pub fn pairwise_union(&self, other: &KmerSetGroup, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.pairwise(other, PairwiseOperation::Union, out)
    }

    /// Set-wise intersection with `other`
    pub fn pairwise_intersect(&self, other: &KmerSetGroup, out: impl AsRef<Path>) -> Result<KmerSetGroup> {
        self.pairwise(other, PairwiseOperation::Intersect, out)
    }

    /// Copy the selected sets into a new group at `out`, keeping only the
    /// k-mers whose entropy exceeds `threshold`
    ///
    /// Identifiers, attributes and the saved spectra of the sets are carried
    /// over; counts are those of the filtered sets.
    pub fn filter_entropy(
        &self,
        sets: &[usize],
        threshold: f64,
        level_max: usize,
        out: impl AsRef<Path>,
    ) -> Result<KmerSetGroup> {
        let out = out.as_ref();
        for &set in sets {
            self.reader(set, 0)?;
        }
        let tables = Arc::new(EntropyTables::new(self.k(), level_max)?);
        let (mut meta, lock) = prepare_output(out, self.metadata())?;
        meta.id = self.id().map(str::to_string);
        meta.user_metadata = self.attributes().clone();
        for (slot, &set) in sets.iter().enumerate() {
            let dir = out.join(set_dir_name(slot));
            fs::create_dir_all(&dir).at(&dir)?;
            for name in [SPECTRUM_FILE, TOP_KMERS_FILE] {
                let from = self.set_dir(set).join(name);
                if from.is_file() {
                    fs::copy(&from, dir.join(name)).at(&from)?;
                }
            }
        }

        info!(
            "filtering {} set(s) of {} on entropy > {threshold} (level {level_max})",
            sets.len(),
            self.path().display()
        );
        let jobs: Vec<(usize, usize)> = (0..sets.len())
            .flat_map(|slot| (0..self.partitions()).map(move |p| (slot, p)))
            .collect();
        let counts = jobs
            .par_iter()
            .map(|&(slot, p)| {
                let mut filter = KmerEntropyFilter::new(Arc::clone(&tables), threshold);
                let mut reader = self.reader(sets[slot], p)?;
                let path = out.join(set_dir_name(slot)).join(partition_file_name(p, "kdi"));
                let mut writer = KdiWriter::create(&path)?;
                while let Some(kmer) = reader.next()? {
                    if filter.accept(kmer) {
                        writer.write(kmer)?;
                    }
                }
                writer.finish().map(|n| (slot, n))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut per_set = vec![0u64; sets.len()];
        for (slot, n) in counts {
            per_set[slot] += n;
        }

        for (&set, count) in sets.iter().zip(per_set) {
            debug!("{}: {} -> {count} k-mers", self.set_label(set), self.len(set));
            meta.push_set(
                self.set_identifier(set).unwrap_or_default().to_string(),
                count,
                self.set_attributes(set)?.clone(),
            );
        }
        meta.save(out)?;
        lock.release()?;
        Ok(KmerSetGroup::from_parts(out.to_path_buf(), meta))
    }

    fn all_sets(&self) -> Vec<usize> {
        (0..self.num_sets()).collect()
    }
}
