//! Building a group, or appending sets to an existing one
//!
//! ```text
//! new/append  : claim <root>/.build, one shard directory per new set
//! add_*       : Stage 0, super-k-mers -> .build/set_<i>/part_<p>.skm
//! close       : Stage 1, shards -> set_<i>/part_<p>.kdi + .kdx,
//!               spectra, top-N CSVs, metadata.toml, remove .build
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;
use toml::{Table, Value};
use tracing::{debug, info, warn};

use crate::builder::config::BuildConfiguration;
use crate::builder::finalize::{finalize_partitions, FinalizeOptions, PartitionJob};
use crate::builder::shard::SetShards;
use crate::constants::{SPECTRUM_FILE, TOP_KMERS_FILE};
use crate::entropy::EntropyTables;
use crate::error::{IoContext, KmerError, Result};
use crate::format::partition_file_name;
use crate::group::{set_dir_name, GroupLock, GroupMetadata, KmerSetGroup};
use crate::parse::SequenceRecord;
use crate::spectrum::{KmerSpectrum, TopKmers};

/// Builder of a k-mer set group
///
/// Sets are numbered from 0 among the sets being built; in append mode they
/// land after the sets already in the group.
pub struct KmerSetGroupBuilder {
    root: PathBuf,
    config: BuildConfiguration,
    meta: GroupMetadata,
    first_set: usize,
    shards: Vec<SetShards>,
    set_ids: Vec<String>,
    set_attributes: Vec<Table>,
    cancel: Arc<AtomicBool>,
    pool: rayon::ThreadPool,
    lock: GroupLock,
}

impl KmerSetGroupBuilder {
    /// Start a new group with `num_sets` sets in `root`
    pub fn new(root: impl AsRef<Path>, num_sets: usize, config: BuildConfiguration) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        if GroupMetadata::exists(&root) {
            return Err(KmerError::InvalidParameters(format!(
                "{} already holds a k-mer set group, append to it instead",
                root.display()
            )));
        }
        fs::create_dir_all(&root).at(&root)?;
        let meta = GroupMetadata::new(config.k, config.m, config.num_partitions());
        Self::start(root, num_sets, config, meta)
    }

    /// Add `num_sets` sets to the group in `root`
    ///
    /// `(k, m)` and, when given, the partition count of `config` must match the group.
    pub fn append(root: impl AsRef<Path>, num_sets: usize, mut config: BuildConfiguration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let group = KmerSetGroup::open(&root)?;
        let meta = group.metadata().clone();
        if config.k != meta.k || config.m != meta.m {
            return Err(KmerError::IncompatibleGroup(format!(
                "group {} has k={}, m={}; requested k={}, m={}",
                root.display(),
                meta.k,
                meta.m,
                config.k,
                config.m
            )));
        }
        if let Some(p) = config.partitions {
            if p != meta.partitions {
                return Err(KmerError::IncompatibleGroup(format!(
                    "group {} has {} partitions; requested {p}",
                    root.display(),
                    meta.partitions
                )));
            }
        }
        config.partitions = Some(meta.partitions);
        config.validate()?;
        Self::start(root, num_sets, config, meta)
    }

    fn start(root: PathBuf, num_sets: usize, config: BuildConfiguration, meta: GroupMetadata) -> Result<Self> {
        if num_sets == 0 {
            return Err(KmerError::InvalidParameters("at least one set is needed".into()));
        }
        let lock = GroupLock::acquire(&root)?;
        let first_set = meta.size;
        let partitions = meta.partitions;
        let shards = (0..num_sets)
            .map(|i| SetShards::create(lock.dir().join(set_dir_name(first_set + i)), partitions))
            .collect::<Result<Vec<_>>>()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .build()
            .map_err(|e| KmerError::InvalidParameters(format!("cannot start thread pool: {e}")))?;

        info!(
            "Stage 0: sharding {num_sets} set(s) into {partitions} partitions under {}",
            lock.dir().display()
        );
        config.print();

        Ok(Self {
            root,
            config,
            meta,
            first_set,
            shards,
            set_ids: vec![String::new(); num_sets],
            set_attributes: vec![Table::new(); num_sets],
            cancel: Arc::new(AtomicBool::new(false)),
            pool,
            lock,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &BuildConfiguration {
        &self.config
    }

    /// Number of sets being built
    pub fn num_sets(&self) -> usize {
        self.shards.len()
    }

    /// Index, in the final group, of the first set being built
    pub fn first_set_index(&self) -> usize {
        self.first_set
    }

    /// Handle to cancel the build; checked between shards while closing
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Name set `set`
    pub fn set_set_id(&mut self, set: usize, id: impl Into<String>) -> Result<()> {
        self.check_set(set)?;
        self.set_ids[set] = id.into();
        Ok(())
    }

    /// Attach an attribute to set `set`
    pub fn set_set_attribute(&mut self, set: usize, key: impl Into<String>, value: Value) -> Result<()> {
        self.check_set(set)?;
        self.set_attributes[set].insert(key.into(), value);
        Ok(())
    }

    /// Name the group (kept as is in append mode unless set)
    pub fn set_group_id(&mut self, id: impl Into<String>) {
        self.meta.id = Some(id.into());
    }

    /// Attach a group-level attribute
    pub fn set_group_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.meta.user_metadata.insert(key.into(), value);
    }

    /// Shard one sequence into set `set`
    pub fn add_sequence(&self, set: usize, seq: &[u8]) -> Result<()> {
        self.check_set(set)?;
        self.shards[set].add_sequence(seq, self.config.k, self.config.m)?;
        Ok(())
    }

    /// Shard a batch of records into set `set`, in parallel
    pub fn add_batch(&self, set: usize, batch: &[SequenceRecord]) -> Result<()> {
        self.check_set(set)?;
        let shards = &self.shards[set];
        let (k, m) = (self.config.k, self.config.m);
        self.pool.install(|| {
            batch
                .par_iter()
                .try_for_each(|record| shards.add_sequence(&record.seq, k, m).map(|_| ()))
        })
    }

    /// Shard batches from an iterator into set `set`, returning the number of sequences read
    pub fn add_batches<I>(&self, set: usize, batches: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<Vec<SequenceRecord>>>,
    {
        let mut n = 0;
        for batch in batches {
            let batch = batch?;
            self.add_batch(set, &batch)?;
            n += batch.len();
        }
        debug!("set {set}: {n} sequence(s) sharded");
        Ok(n)
    }

    /// Finalize every set and write the group metadata
    pub fn close(self) -> Result<KmerSetGroup> {
        let Self {
            root,
            config,
            mut meta,
            first_set,
            shards,
            set_ids,
            set_attributes,
            cancel,
            pool: _,
            mut lock,
        } = self;

        let partitions = meta.partitions;
        let mut jobs = Vec::with_capacity(shards.len() * partitions);
        for (i, set_shards) in shards.iter().enumerate() {
            set_shards.flush_all()?;
            debug!(
                "set {i}: {} super-k-mers in {}",
                set_shards.num_records(),
                set_shards.dir().display()
            );
            let set_dir = root.join(set_dir_name(first_set + i));
            fs::create_dir_all(&set_dir).at(&set_dir)?;
            for p in 0..partitions {
                jobs.push(PartitionJob {
                    set: i,
                    partition: p,
                    skm: set_shards.shard_path(p),
                    kdi: set_dir.join(partition_file_name(p, "kdi")),
                });
            }
        }

        let entropy = if config.entropy_filter_enabled() {
            let tables = EntropyTables::new(config.k, config.entropy_level_max)?;
            Some((Arc::new(tables), config.entropy_threshold))
        } else {
            None
        };
        let options = FinalizeOptions {
            k: config.k,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            save_top_n: config.save_top_n,
            entropy,
            readers: config.effective_reader_workers(),
            workers: config.effective_threads(),
        };
        info!(
            "Stage 1: finalizing {} shard(s) with {} reader(s) and {} worker(s)",
            jobs.len(),
            options.readers,
            options.workers
        );
        let results = match finalize_partitions(jobs, &options, &cancel) {
            Ok(results) => results,
            Err(e) => {
                warn!("build of {} failed, leaving partial output", root.display());
                lock.keep();
                return Err(e);
            }
        };

        let n = shards.len();
        let mut counts = vec![0u64; n];
        let mut spectra = vec![KmerSpectrum::new(); n];
        let mut tops: Vec<TopKmers> = (0..n).map(|_| TopKmers::new(config.save_top_n)).collect();
        for result in results {
            counts[result.set] += result.count;
            spectra[result.set].merge(&result.spectrum);
            tops[result.set].merge(result.top);
        }

        for (i, (spectrum, top)) in spectra.iter().zip(tops).enumerate() {
            let set_dir = root.join(set_dir_name(first_set + i));
            spectrum.save(set_dir.join(SPECTRUM_FILE))?;
            if config.save_top_n > 0 {
                top.write_csv(set_dir.join(TOP_KMERS_FILE), config.k)?;
            }
            info!(
                "set {} ({}): {} k-mers kept out of {} distinct",
                first_set + i,
                if set_ids[i].is_empty() { "-" } else { set_ids[i].as_str() },
                counts[i],
                spectrum.distinct()
            );
        }

        for ((id, count), attributes) in set_ids.into_iter().zip(counts).zip(set_attributes) {
            meta.push_set(id, count, attributes);
        }
        meta.save(&root)?;
        drop(shards);
        lock.release()?;
        info!("group {} closed with {} set(s)", root.display(), meta.size);
        Ok(KmerSetGroup::from_parts(root, meta))
    }

    fn check_set(&self, set: usize) -> Result<()> {
        if set >= self.shards.len() {
            return Err(KmerError::InvalidParameters(format!(
                "set index {set} out of range (building {} sets)",
                self.shards.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BUILD_DIR;
    use crate::kmer::KmerIter;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const SEQ: &[u8] = b"ACGATCGATCTAGCTAGCTGATCGATCGATCG";

    fn config() -> BuildConfiguration {
        BuildConfiguration {
            num_threads: 2,
            ..BuildConfiguration::new(15, 7).unwrap()
        }
    }

    fn distinct(seq: &[u8], k: usize) -> Vec<u64> {
        let mut v: Vec<u64> = KmerIter::new(seq, k).collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    #[test]
    fn test_build_two_sets() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let mut b = KmerSetGroupBuilder::new(&root, 2, config()).unwrap();
        b.set_set_id(0, "first").unwrap();
        b.set_set_attribute(1, "source", Value::String("x.fa".into())).unwrap();
        b.set_group_id("test");
        b.add_sequence(0, SEQ).unwrap();
        b.add_batch(1, &[SequenceRecord::new("r", b"TTTTTTTTTTTTTTTTTTTT".to_vec())])
            .unwrap();
        let g = b.close().unwrap();

        assert_eq!(g.num_sets(), 2);
        assert_eq!(g.len(0), distinct(SEQ, 15).len() as u64);
        assert_eq!(g.len(1), 1);
        assert_eq!(g.id(), Some("test"));
        assert_eq!(g.set_label(0), "first");
        assert_eq!(g.set_label(1), "set_1");
        assert!(!root.join(BUILD_DIR).exists());

        let reopened = KmerSetGroup::open(&root).unwrap();
        let mut all: Vec<u64> = reopened.iter(0).unwrap().collect::<Result<_>>().unwrap();
        all.sort_unstable();
        assert_eq!(all, distinct(SEQ, 15));
        let spectrum = reopened.spectrum(0).unwrap().unwrap();
        assert_eq!(spectrum.distinct(), g.len(0));
    }

    #[test]
    fn test_append_and_compatibility() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let b = KmerSetGroupBuilder::new(&root, 1, config()).unwrap();
        b.add_sequence(0, SEQ).unwrap();
        b.close().unwrap();

        assert!(KmerSetGroupBuilder::new(&root, 1, config()).is_err());
        let wrong_k = BuildConfiguration::new(17, 7).unwrap();
        assert!(matches!(
            KmerSetGroupBuilder::append(&root, 1, wrong_k),
            Err(KmerError::IncompatibleGroup(_))
        ));

        let mut b = KmerSetGroupBuilder::append(&root, 1, config()).unwrap();
        assert_eq!(b.first_set_index(), 1);
        b.set_set_id(0, "second").unwrap();
        b.add_sequence(0, b"GGGGGGGGGGCCCCCCCCCCAAAAA").unwrap();
        let g = b.close().unwrap();
        assert_eq!(g.num_sets(), 2);
        assert_eq!(g.set_label(1), "second");
        assert!(g.len(1) > 0);
        assert_eq!(KmerSetGroup::open(&root).unwrap().len(0), g.len(0));
    }

    #[test]
    fn test_locked_group() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let _b = KmerSetGroupBuilder::new(&root, 1, config()).unwrap();
        assert!(matches!(
            KmerSetGroupBuilder::new(dir.path().join("idx"), 1, config()),
            Err(KmerError::GroupLocked(_))
        ));
    }

    #[test]
    fn test_cancelled_build() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let b = KmerSetGroupBuilder::new(&root, 1, config()).unwrap();
        b.add_sequence(0, SEQ).unwrap();
        b.cancel_handle().store(true, Ordering::SeqCst);
        assert!(matches!(b.close(), Err(KmerError::Cancelled)));
        // partial output stays for the caller to inspect or remove
        assert!(root.join(BUILD_DIR).exists());
    }

    #[test]
    fn test_top_kmers_csv() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let config = BuildConfiguration { save_top_n: 3, ..config() };
        let b = KmerSetGroupBuilder::new(&root, 1, config).unwrap();
        b.add_sequence(0, SEQ).unwrap();
        b.add_sequence(0, SEQ).unwrap();
        b.close().unwrap();
        let csv = std::fs::read_to_string(root.join("set_0").join(TOP_KMERS_FILE)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "kmer,count");
        assert_eq!(lines.len(), 4);
        let (kmer, count) = lines[1].split_once(',').unwrap();
        assert_eq!(kmer.len(), 15);
        assert!(count.parse::<u64>().unwrap() >= 2);
    }
}
