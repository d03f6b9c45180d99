//! Locating the k-mers of query sequences in a group
//!
//! Queries are routed like indexed sequences: super-k-mers give each k-mer
//! its partition, so every partition is searched with one sorted list of
//! query k-mers and one forward scan of the `.kdi`.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{KmerError, Result};
use crate::group::KmerSetGroup;
use crate::kmer::KmerIter;
use crate::minimizer::{partition_of, super_kmers};

/// Positions of matched k-mers: query index in the batch -> sorted starts
pub type SequenceMatches = BTreeMap<usize, Vec<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueryKmer {
    kmer: u64,
    seq: u32,
    pos: u32,
}

/// Query k-mers of a batch, grouped by partition and sorted
#[derive(Debug, Clone)]
pub struct QueryBatch {
    partitions: Vec<Vec<QueryKmer>>,
    num_kmers: usize,
}

impl QueryBatch {
    /// Route the k-mers of `seqs`; those covering a non-ACGT base are left out
    ///
    /// Batches of more than `u32::MAX` sequences, or sequences longer than
    /// `u32::MAX` bases, are rejected.
    pub fn new<S: AsRef<[u8]>>(seqs: &[S], k: usize, m: usize, partitions: usize) -> Result<Self> {
        let seq_count = u32::try_from(seqs.len()).map_err(|_| {
            KmerError::InvalidParameters(format!("query batch of {} sequences is too large", seqs.len()))
        })?;
        let mut routed = vec![Vec::new(); partitions];
        let mut num_kmers = 0;
        for (seq, bases) in (0..seq_count).zip(seqs) {
            let bases = bases.as_ref();
            if u32::try_from(bases.len()).is_err() {
                return Err(KmerError::InvalidParameters(format!(
                    "query sequence {seq} has {} bases, more than a query can address",
                    bases.len()
                )));
            }
            for sk in super_kmers(bases, k, m) {
                let bucket = &mut routed[partition_of(sk.minimizer, partitions)];
                let mut kmers = KmerIter::strict(sk.bases, k);
                while let Some((offset, kmer)) = kmers.next_with_position() {
                    // bounded by the sequence length checked above
                    let pos = (sk.start + offset) as u32;
                    bucket.push(QueryKmer { kmer, seq, pos });
                    num_kmers += 1;
                }
            }
        }
        for bucket in &mut routed {
            bucket.sort_unstable();
        }
        Ok(Self {
            partitions: routed,
            num_kmers,
        })
    }

    /// Number of routed query k-mers
    pub fn num_kmers(&self) -> usize {
        self.num_kmers
    }

    /// Number of partitions
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
}

/// Scan one partition of one set for the sorted `queries`
fn scan_partition(group: &KmerSetGroup, set: usize, partition: usize, queries: &[QueryKmer]) -> Result<Vec<(u32, u32)>> {
    let mut hits = Vec::new();
    let Some(first) = queries.first() else {
        return Ok(hits);
    };
    let mut reader = group.reader(set, partition)?;
    reader.seek_to(first.kmer)?;
    let mut current = reader.next()?;
    let mut i = 0;
    while i < queries.len() {
        let Some(value) = current else {
            break;
        };
        let query = queries[i].kmer;
        if value < query {
            current = reader.next()?;
        } else if value == query {
            while i < queries.len() && queries[i].kmer == query {
                hits.push((queries[i].seq, queries[i].pos));
                i += 1;
            }
        } else {
            while i < queries.len() && queries[i].kmer == query {
                i += 1;
            }
        }
    }
    Ok(hits)
}

impl KmerSetGroup {
    /// Find the k-mers of `seqs` in each of `sets`
    ///
    /// The result holds one map per requested set, in the order of `sets`.
    /// Sequences without any hit in a set are absent from its map.
    pub fn match_batch<S: AsRef<[u8]> + Sync>(&self, sets: &[usize], seqs: &[S]) -> Result<Vec<SequenceMatches>> {
        let batch = QueryBatch::new(seqs, self.k(), self.m(), self.partitions())?;
        self.match_queries(sets, &batch)
    }

    /// Find the k-mers of an already routed batch in each of `sets`
    pub fn match_queries(&self, sets: &[usize], batch: &QueryBatch) -> Result<Vec<SequenceMatches>> {
        let jobs: Vec<(usize, usize)> = (0..sets.len())
            .flat_map(|slot| {
                batch
                    .partitions
                    .iter()
                    .enumerate()
                    .filter(|(_, queries)| !queries.is_empty())
                    .map(move |(p, _)| (slot, p))
            })
            .collect();
        let found = jobs
            .par_iter()
            .map(|&(slot, p)| {
                scan_partition(self, sets[slot], p, &batch.partitions[p]).map(|hits| (slot, hits))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut results = vec![SequenceMatches::new(); sets.len()];
        for (slot, hits) in found {
            for (seq, pos) in hits {
                results[slot].entry(seq as usize).or_default().push(pos as usize);
            }
        }
        for positions in results.iter_mut().flat_map(|r| r.values_mut()) {
            positions.sort_unstable();
            positions.dedup();
        }
        debug!(
            "{} query k-mers against {} set(s): {} sequence hit(s)",
            batch.num_kmers(),
            sets.len(),
            results.iter().map(BTreeMap::len).sum::<usize>()
        );
        Ok(results)
    }
}
