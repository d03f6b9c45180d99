//! Stage 1: turning `.skm` shards into sorted `.kdi` partitions
//!
//! A small pool of readers maps shards and hands them, one at a time, over
//! a rendezvous channel to CPU workers. Each worker sorts the k-mers of a
//! shard, counts runs, feeds the spectrum and top-N collections with the raw
//! counts, applies the frequency and entropy filters and writes the
//! partition's `.kdi` and `.kdx`.
//!
//! The first error wins and stops readers from picking up new shards;
//! workers drain whatever is still in flight before the error surfaces.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded};
use parking_lot::Mutex;
use tracing::debug;

use crate::entropy::{EntropyTables, KmerEntropyFilter};
use crate::error::{KmerError, Result};
use crate::format::{KdiWriter, SkmShard};
use crate::spectrum::{KmerSpectrum, TopKmers};

/// One shard to finalize
#[derive(Debug, Clone)]
pub(crate) struct PartitionJob {
    /// Index of the set among the sets being built
    pub set: usize,
    pub partition: usize,
    pub skm: PathBuf,
    pub kdi: PathBuf,
}

/// Outcome of one finalized shard
#[derive(Debug)]
pub(crate) struct PartitionResult {
    pub set: usize,
    pub partition: usize,
    pub count: u64,
    pub spectrum: KmerSpectrum,
    pub top: TopKmers,
}

/// Filtering and resource knobs of stage 1
#[derive(Debug, Clone)]
pub(crate) struct FinalizeOptions {
    pub k: usize,
    pub min_frequency: u64,
    pub max_frequency: u64,
    pub save_top_n: usize,
    pub entropy: Option<(Arc<EntropyTables>, f64)>,
    pub readers: usize,
    pub workers: usize,
}

/// Sort, count, filter and write one shard
fn finalize_shard(
    job: &PartitionJob,
    shard: &SkmShard,
    options: &FinalizeOptions,
    entropy: &mut Option<KmerEntropyFilter>,
) -> Result<PartitionResult> {
    let k = options.k;
    let mut kmers = Vec::with_capacity(shard.num_kmers(k));
    for record in shard.records() {
        kmers.extend(record.kmers(k));
    }
    kmers.sort_unstable();

    let mut spectrum = KmerSpectrum::new();
    let mut top = TopKmers::new(options.save_top_n);
    let mut writer = KdiWriter::create(&job.kdi)?;

    let mut i = 0;
    while i < kmers.len() {
        let value = kmers[i];
        let mut j = i + 1;
        while j < kmers.len() && kmers[j] == value {
            j += 1;
        }
        let frequency = (j - i) as u64;
        i = j;

        spectrum.add(frequency);
        top.push(value, frequency);

        if frequency < options.min_frequency {
            continue;
        }
        if options.max_frequency > 0 && frequency > options.max_frequency {
            continue;
        }
        if let Some(filter) = entropy.as_mut() {
            if !filter.accept(value) {
                continue;
            }
        }
        writer.write(value)?;
    }

    let count = writer.finish()?;
    debug!(
        "set {} partition {}: {} k-mers in, {} distinct, {} kept",
        job.set,
        job.partition,
        kmers.len(),
        spectrum.distinct(),
        count
    );
    Ok(PartitionResult {
        set: job.set,
        partition: job.partition,
        count,
        spectrum,
        top,
    })
}

/// Run the reader/worker pipeline over every job
pub(crate) fn finalize_partitions(
    jobs: Vec<PartitionJob>,
    options: &FinalizeOptions,
    cancel: &AtomicBool,
) -> Result<Vec<PartitionResult>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let n_jobs = jobs.len();
    let readers = options.readers.clamp(1, n_jobs);
    let workers = options.workers.clamp(1, n_jobs);

    let (job_tx, job_rx) = unbounded::<PartitionJob>();
    for job in jobs {
        // receiver is alive: job_rx is held below
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (shard_tx, shard_rx) = bounded::<(PartitionJob, SkmShard)>(0);
    let first_error: Mutex<Option<KmerError>> = Mutex::new(None);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<PartitionResult>> = Mutex::new(Vec::with_capacity(n_jobs));

    let fail = |e: KmerError| {
        let mut slot = first_error.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
        failed.store(true, Ordering::SeqCst);
    };

    std::thread::scope(|scope| {
        for _ in 0..readers {
            let job_rx = job_rx.clone();
            let shard_tx = shard_tx.clone();
            let fail = &fail;
            let failed = &failed;
            scope.spawn(move || {
                for job in job_rx.iter() {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    if cancel.load(Ordering::SeqCst) {
                        fail(KmerError::Cancelled);
                        break;
                    }
                    match SkmShard::load(&job.skm) {
                        Ok(shard) => {
                            if shard_tx.send((job, shard)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            fail(e);
                            break;
                        }
                    }
                }
            });
        }
        drop(shard_tx);

        for _ in 0..workers {
            let shard_rx = shard_rx.clone();
            let fail = &fail;
            let failed = &failed;
            let results = &results;
            scope.spawn(move || {
                let mut entropy = options
                    .entropy
                    .as_ref()
                    .map(|(tables, threshold)| KmerEntropyFilter::new(Arc::clone(tables), *threshold));
                for (job, shard) in shard_rx.iter() {
                    if failed.load(Ordering::SeqCst) {
                        continue;
                    }
                    if cancel.load(Ordering::SeqCst) {
                        fail(KmerError::Cancelled);
                        continue;
                    }
                    match finalize_shard(&job, &shard, options, &mut entropy) {
                        Ok(result) => results.lock().push(result),
                        Err(e) => fail(e),
                    }
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }
    let mut results = results.into_inner();
    results.sort_by_key(|r| (r.set, r.partition));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::skm::encode_super_kmer;
    use crate::format::KdiReader;
    use crate::kmer::KmerIter;
    use tempfile::TempDir;

    fn options(k: usize) -> FinalizeOptions {
        FinalizeOptions {
            k,
            min_frequency: 1,
            max_frequency: 0,
            save_top_n: 0,
            entropy: None,
            readers: 2,
            workers: 3,
        }
    }

    fn write_shard(path: &std::path::Path, seqs: &[&[u8]], k: usize) {
        let mut bytes = Vec::new();
        for seq in seqs {
            encode_super_kmer(seq, k, &mut bytes);
        }
        std::fs::write(path, bytes).unwrap();
    }

    fn jobs(dir: &std::path::Path, n: usize) -> Vec<PartitionJob> {
        (0..n)
            .map(|p| PartitionJob {
                set: 0,
                partition: p,
                skm: dir.join(format!("p{p}.skm")),
                kdi: dir.join(format!("p{p}.kdi")),
            })
            .collect()
    }

    #[test]
    fn test_sort_dedup_and_spectrum() {
        let dir = TempDir::new().unwrap();
        let k = 5;
        let jobs = jobs(dir.path(), 3);
        write_shard(&jobs[0].skm, &[b"ACGTTGCA", b"ACGTTGCA", b"GGGAT"], k);
        // jobs[1] has no shard file: empty partition
        std::fs::write(&jobs[2].skm, b"").unwrap();

        let cancel = AtomicBool::new(false);
        let results = finalize_partitions(jobs.clone(), &options(k), &cancel).unwrap();
        assert_eq!(results.len(), 3);

        let mut expected: Vec<u64> = KmerIter::new(b"ACGTTGCA", k)
            .chain(KmerIter::new(b"GGGAT", k))
            .collect();
        expected.sort_unstable();
        expected.dedup();
        let got = KdiReader::open(&jobs[0].kdi).unwrap().read_all().unwrap();
        assert_eq!(got, expected);
        assert_eq!(results[0].count, expected.len() as u64);
        // every k-mer of the doubled sequence was seen twice
        assert_eq!(results[0].spectrum.get(2), 4);
        assert_eq!(results[0].spectrum.get(1), 1);

        assert_eq!(results[1].count, 0);
        assert_eq!(std::fs::metadata(&jobs[1].kdi).unwrap().len(), 12);
        assert_eq!(results[2].count, 0);
    }

    #[test]
    fn test_frequency_bounds() {
        let dir = TempDir::new().unwrap();
        let k = 5;
        let jobs = jobs(dir.path(), 1);
        write_shard(&jobs[0].skm, &[b"ACGTTG", b"ACGTTG", b"ACGTTG", b"CCATG"], k);
        let cancel = AtomicBool::new(false);

        let mut opts = options(k);
        opts.min_frequency = 2;
        opts.save_top_n = 1;
        let results = finalize_partitions(jobs.clone(), &opts, &cancel).unwrap();
        assert_eq!(results[0].count, 2);
        assert_eq!(results[0].spectrum.get(1), 1);
        assert_eq!(results[0].top.len(), 1);

        opts.max_frequency = 2;
        let results = finalize_partitions(jobs, &opts, &cancel).unwrap();
        assert_eq!(results[0].count, 0);
    }

    #[test]
    fn test_entropy_filter() {
        let dir = TempDir::new().unwrap();
        let k = 9;
        let jobs = jobs(dir.path(), 1);
        write_shard(&jobs[0].skm, &[b"AAAAAAAAAAAA", b"ACGGTCATTG"], k);
        let cancel = AtomicBool::new(false);
        let mut opts = options(k);
        opts.entropy = Some((Arc::new(EntropyTables::new(k, 3).unwrap()), 0.5));
        let results = finalize_partitions(jobs.clone(), &opts, &cancel).unwrap();
        let got = KdiReader::open(&jobs[0].kdi).unwrap().read_all().unwrap();
        // poly-A is rejected, the two varied 9-mers are kept
        assert_eq!(got.len(), 2);
        assert!(!got.contains(&0));
        // the spectrum still counts the rejected k-mer
        assert_eq!(results[0].spectrum.distinct(), 3);
    }

    #[test]
    fn test_cancel_and_errors() {
        let dir = TempDir::new().unwrap();
        let jobs_ok = jobs(dir.path(), 4);
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            finalize_partitions(jobs_ok, &options(5), &cancel),
            Err(KmerError::Cancelled)
        ));

        let bad = jobs(dir.path(), 2);
        std::fs::write(&bad[1].skm, [9u8, 0, 1]).unwrap();
        let cancel = AtomicBool::new(false);
        assert!(matches!(
            finalize_partitions(bad, &options(5), &cancel),
            Err(KmerError::MalformedFile { .. })
        ));
    }
}
