//! K-way merge of sorted k-mer streams
//!
//! A min-heap of `(head_value, source_index)` yields every distinct value
//! once, together with the number of sources holding it and which ones.
//! Union, intersection, quorum and difference are all filters over that
//! output (see [`crate::algebra`]).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::format::KdiReader;

/// A stream of k-mers in strictly increasing order
pub trait SortedKmers {
    /// Next value, or `None` once exhausted
    fn next_kmer(&mut self) -> Result<Option<u64>>;
}

impl SortedKmers for KdiReader {
    #[inline]
    fn next_kmer(&mut self) -> Result<Option<u64>> {
        self.next()
    }
}

impl<S: SortedKmers + ?Sized> SortedKmers for Box<S> {
    #[inline]
    fn next_kmer(&mut self) -> Result<Option<u64>> {
        (**self).next_kmer()
    }
}

/// In-memory sorted stream
#[derive(Debug, Clone, Default)]
pub struct MemoryKmers {
    values: std::vec::IntoIter<u64>,
}

impl From<Vec<u64>> for MemoryKmers {
    fn from(values: Vec<u64>) -> Self {
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        Self {
            values: values.into_iter(),
        }
    }
}

impl SortedKmers for MemoryKmers {
    #[inline]
    fn next_kmer(&mut self) -> Result<Option<u64>> {
        Ok(self.values.next())
    }
}

/// Merge of `n` sorted streams
pub struct KWayMerge<S> {
    sources: Vec<S>,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
    origins: Vec<usize>,
}

impl<S: SortedKmers> KWayMerge<S> {
    /// Prime the heap with the head of every source
    pub fn new(mut sources: Vec<S>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(value) = source.next_kmer()? {
                heap.push(Reverse((value, i)));
            }
        }
        Ok(Self {
            sources,
            heap,
            origins: Vec::new(),
        })
    }

    /// Number of merged sources
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Next distinct value and the number of sources that contained it
    pub fn next(&mut self) -> Result<Option<(u64, usize)>> {
        self.origins.clear();
        let Some(Reverse((value, first))) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(first)?;
        while let Some(&Reverse((head, i))) = self.heap.peek() {
            if head != value {
                break;
            }
            self.heap.pop();
            self.advance(i)?;
        }
        Ok(Some((value, self.origins.len())))
    }

    /// Sources (in increasing index order) that held the value last returned by [`KWayMerge::next`]
    pub fn origins(&self) -> &[usize] {
        &self.origins
    }

    fn advance(&mut self, i: usize) -> Result<()> {
        self.origins.push(i);
        if let Some(next) = self.sources[i].next_kmer()? {
            self.heap.push(Reverse((next, i)));
        }
        Ok(())
    }
}
