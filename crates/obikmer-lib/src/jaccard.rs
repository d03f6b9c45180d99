//! Pairwise Jaccard indices between the sets of a group
//!
//! Partition `p` of every set is merged at once; each merged value with
//! origins `o` adds one to the intersection of every pair in `o`. Pair
//! unions follow from `|A ∪ B| = |A| + |B| − |A ∩ B|` with the per-partition
//! sizes read from the same merge.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{KmerError, Result};
use crate::group::KmerSetGroup;
use crate::merge::KWayMerge;

/// Symmetric `n × n` matrix with a constant diagonal
///
/// Only the strict upper triangle is stored, row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriangularMatrix {
    n: usize,
    diagonal: f64,
    values: Vec<f64>,
}

impl TriangularMatrix {
    /// Matrix of size `n` filled with zeros off the diagonal
    pub fn new(n: usize, diagonal: f64) -> Self {
        Self {
            n,
            diagonal,
            values: vec![0.0; n * n.saturating_sub(1) / 2],
        }
    }

    /// Side of the matrix
    pub fn size(&self) -> usize {
        self.n
    }

    /// Value on the diagonal
    pub fn diagonal(&self) -> f64 {
        self.diagonal
    }

    fn index(&self, i: usize, j: usize) -> usize {
        assert!(
            i < self.n && j < self.n,
            "index ({i}, {j}) out of range for a {0}x{0} matrix",
            self.n
        );
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        i * (2 * self.n - i - 1) / 2 + (j - i - 1)
    }

    /// Value at `(i, j)`; panics when out of range
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            assert!(i < self.n, "index ({i}, {j}) out of range for a {0}x{0} matrix", self.n);
            return self.diagonal;
        }
        self.values[self.index(i, j)]
    }

    /// Set `(i, j)` and `(j, i)`; panics on the diagonal or out of range
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        assert!(i != j, "the diagonal of a triangular matrix is constant");
        let at = self.index(i, j);
        self.values[at] = value;
    }

    /// Dense rows, diagonal included
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self.get(i, j)).collect())
            .collect()
    }
}

/// Intersection and union sizes of every pair of sets
#[derive(Debug, Clone)]
pub struct PairCounts {
    sizes: Vec<u64>,
    intersections: Vec<u64>,
}

impl PairCounts {
    fn new(n: usize) -> Self {
        Self {
            sizes: vec![0; n],
            intersections: vec![0; n * n],
        }
    }

    fn add(&mut self, other: &PairCounts) {
        for (a, b) in self.sizes.iter_mut().zip(&other.sizes) {
            *a += b;
        }
        for (a, b) in self.intersections.iter_mut().zip(&other.intersections) {
            *a += b;
        }
    }

    /// Number of sets
    pub fn num_sets(&self) -> usize {
        self.sizes.len()
    }

    /// `|A_i ∩ A_j|`
    pub fn intersection(&self, i: usize, j: usize) -> u64 {
        if i == j {
            return self.sizes[i];
        }
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.intersections[i * self.num_sets() + j]
    }

    /// `|A_i ∪ A_j|`
    pub fn union(&self, i: usize, j: usize) -> u64 {
        self.sizes[i] + self.sizes[j] - self.intersection(i, j)
    }

    /// Jaccard similarity of `(i, j)`; two empty sets have similarity 0
    pub fn similarity(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 1.0;
        }
        let union = self.union(i, j);
        if union == 0 {
            return 0.0;
        }
        self.intersection(i, j) as f64 / union as f64
    }

    /// Jaccard distance of `(i, j)`, i.e. `1 − similarity`
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        1.0 - self.similarity(i, j)
    }

    /// Distance matrix (zero diagonal)
    pub fn distance_matrix(&self) -> TriangularMatrix {
        self.matrix(0.0, Self::distance)
    }

    /// Similarity matrix (unit diagonal)
    pub fn similarity_matrix(&self) -> TriangularMatrix {
        self.matrix(1.0, Self::similarity)
    }

    fn matrix(&self, diagonal: f64, f: fn(&Self, usize, usize) -> f64) -> TriangularMatrix {
        let n = self.num_sets();
        let mut matrix = TriangularMatrix::new(n, diagonal);
        for i in 0..n {
            for j in (i + 1)..n {
                matrix.set(i, j, f(self, i, j));
            }
        }
        matrix
    }
}

impl KmerSetGroup {
    /// Intersection and union sizes of every pair of sets, in one pass
    pub fn pair_counts(&self) -> Result<PairCounts> {
        let n = self.num_sets();
        // one accumulator per rayon split
        (0..self.partitions())
            .into_par_iter()
            .try_fold(
                || PairCounts::new(n),
                |mut counts, p| {
                    self.count_partition(p, &mut counts)?;
                    Ok::<_, KmerError>(counts)
                },
            )
            .try_reduce(
                || PairCounts::new(n),
                |mut a, b| {
                    a.add(&b);
                    Ok(a)
                },
            )
    }

    fn count_partition(&self, partition: usize, counts: &mut PairCounts) -> Result<()> {
        let n = self.num_sets();
        let readers = (0..n)
            .map(|set| self.reader(set, partition))
            .collect::<Result<Vec<_>>>()?;
        let mut merge = KWayMerge::new(readers)?;
        while merge.next()?.is_some() {
            let origins = merge.origins();
            for (x, &i) in origins.iter().enumerate() {
                counts.sizes[i] += 1;
                for &j in &origins[x + 1..] {
                    counts.intersections[i * n + j] += 1;
                }
            }
        }
        Ok(())
    }

    /// Jaccard distance matrix of the sets
    pub fn jaccard_distance_matrix(&self) -> Result<TriangularMatrix> {
        Ok(self.pair_counts()?.distance_matrix())
    }

    /// Jaccard similarity matrix of the sets
    pub fn jaccard_similarity_matrix(&self) -> Result<TriangularMatrix> {
        Ok(self.pair_counts()?.similarity_matrix())
    }
}
