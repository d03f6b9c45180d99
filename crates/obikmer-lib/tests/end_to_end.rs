//! End-to-end tests on real group directories
//!
//! These tests build groups through the public API, reopen them from disk
//! and check counts, partition layout, set algebra and Jaccard results.

use std::path::Path;

use obikmer_lib::format::{partition_file_name, KdiReader, KdiWriter};
use obikmer_lib::group::set_dir_name;
use obikmer_lib::merge::{KWayMerge, MemoryKmers};
use obikmer_lib::minimizer::{kmer_minimizer, partition_of};
use obikmer_lib::{
    BuildConfiguration, GroupMetadata, KmerIter, KmerSetGroup, KmerSetGroupBuilder, Result,
    SequenceBatches,
};
use tempfile::TempDir;

const MIXED: &[u8] = b"ACGATCGATCTAGCTAGCTGATCGATCGATCG";

fn distinct_kmers(seq: &[u8], k: usize) -> Vec<u64> {
    let mut v: Vec<u64> = KmerIter::new(seq, k).collect();
    v.sort_unstable();
    v.dedup();
    v
}

/// Group whose set `i` holds `sets[i]` in its single partition
fn single_partition_group(root: &Path, sets: &[Vec<u64>]) -> KmerSetGroup {
    let mut meta = GroupMetadata::new(15, 7, 1);
    for (i, values) in sets.iter().enumerate() {
        let dir = root.join(set_dir_name(i));
        std::fs::create_dir_all(&dir).unwrap();
        let mut writer = KdiWriter::create(dir.join(partition_file_name(0, "kdi"))).unwrap();
        writer.write_all(values.iter().copied()).unwrap();
        let count = writer.finish().unwrap();
        meta.push_set(format!("s{i}"), count, toml::Table::new());
    }
    meta.save(root).unwrap();
    KmerSetGroup::open(root).unwrap()
}

fn values(group: &KmerSetGroup) -> Vec<u64> {
    group.sorted_iter(0).unwrap().collect::<Result<_>>().unwrap()
}

#[test]
fn test_round_trip_single_sequence() {
    let dir = TempDir::new().unwrap();
    let seq = b"ACGTACGTACGTACGTACGTACGTACGT";
    assert_eq!(seq.len(), 28);
    let config = BuildConfiguration {
        partitions: Some(64),
        ..BuildConfiguration::new(15, 7).unwrap()
    };
    let builder = KmerSetGroupBuilder::new(dir.path(), 1, config).unwrap();
    builder.add_sequence(0, seq).unwrap();
    builder.close().unwrap();

    let group = KmerSetGroup::open(dir.path()).unwrap();
    let expected = distinct_kmers(seq, 15);
    assert!(expected.len() <= 14);
    assert_eq!(group.len(0), expected.len() as u64);

    // each k-mer sits in the partition of its minimizer
    for p in 0..group.partitions() {
        for kmer in group.reader(0, p).unwrap().read_all().unwrap() {
            assert_eq!(partition_of(kmer_minimizer(kmer, 15, 7), 64), p);
        }
    }

    let sorted: Vec<u64> = group.sorted_iter(0).unwrap().collect::<Result<_>>().unwrap();
    assert!(sorted.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sorted, expected);
}

#[test]
fn test_frequency_filter_rejects_everything() {
    let dir = TempDir::new().unwrap();
    let config = BuildConfiguration {
        min_frequency: 5,
        ..BuildConfiguration::new(15, 7).unwrap()
    };
    let builder = KmerSetGroupBuilder::new(dir.path(), 1, config).unwrap();
    builder.add_sequence(0, MIXED).unwrap();
    builder.add_sequence(0, MIXED).unwrap();
    let group = builder.close().unwrap();
    assert_eq!(group.len(0), 0);

    // the spectrum still saw every k-mer
    let spectrum = group.spectrum(0).unwrap().unwrap();
    assert_eq!(spectrum.distinct(), distinct_kmers(MIXED, 15).len() as u64);
}

#[test]
fn test_kdx_seek() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("even.kdi");
    let mut writer = KdiWriter::create(&path).unwrap();
    writer.write_all((0..10_000u64).map(|i| 2 * i)).unwrap();
    assert_eq!(writer.finish().unwrap(), 10_000);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 12 + 8 + 9999);

    let mut reader = KdiReader::open(&path).unwrap();
    assert!(reader.has_index());
    reader.seek_to(10_000).unwrap();
    assert_eq!(reader.next().unwrap(), Some(10_000));
    assert_eq!(reader.next().unwrap(), Some(10_002));
    assert_eq!(reader.next().unwrap(), Some(10_004));

    // an odd target lands on the next stored value
    reader.seek_to(15_001).unwrap();
    assert_eq!(reader.next().unwrap(), Some(15_002));
}

#[test]
fn test_k_way_merge_counts() {
    let streams = vec![vec![1, 3, 5, 7], vec![2, 3, 6, 7], vec![3, 4, 7, 8]];
    let mut merge = KWayMerge::new(streams.into_iter().map(MemoryKmers::from).collect()).unwrap();
    let mut got = Vec::new();
    while let Some(pair) = merge.next().unwrap() {
        got.push(pair);
    }
    assert_eq!(
        got,
        vec![(1, 1), (2, 1), (3, 3), (4, 1), (5, 1), (6, 1), (7, 3), (8, 1)]
    );
}

#[test]
fn test_quorum_identities() {
    let dir = TempDir::new().unwrap();
    // value v is held by exactly v of the five sets
    let sets: Vec<Vec<u64>> = (0..5u64).map(|s| ((s + 1)..=5).collect()).collect();
    let group = single_partition_group(&dir.path().join("g"), &sets);
    let out = |name: String| dir.path().join(name);

    for q in 1..=5u64 {
        let at_least = group.quorum_at_least(q as usize, out(format!("ge{q}"))).unwrap();
        assert_eq!(values(&at_least), (q..=5).collect::<Vec<_>>());
        let exactly = group.quorum_exactly(q as usize, out(format!("eq{q}"))).unwrap();
        assert_eq!(values(&exactly), vec![q]);
        let at_most = group.quorum_at_most(q as usize, out(format!("le{q}"))).unwrap();
        assert_eq!(values(&at_most), (1..=q).collect::<Vec<_>>());
    }

    let union = group.union(out("union".into())).unwrap();
    assert_eq!(values(&union), values(&KmerSetGroup::open(out("ge1".into())).unwrap()));
    let intersect = group.intersect(out("inter".into())).unwrap();
    assert_eq!(values(&intersect), vec![5]);
    let difference = group.difference(out("diff".into())).unwrap();
    assert_eq!(values(&difference), vec![1]);
}

#[test]
fn test_jaccard_matrix() {
    let dir = TempDir::new().unwrap();
    let config = BuildConfiguration::new(15, 7).unwrap();
    let builder = KmerSetGroupBuilder::new(dir.path(), 3, config).unwrap();
    builder.add_sequence(0, MIXED).unwrap();
    builder.add_sequence(1, MIXED).unwrap();
    builder.add_sequence(2, b"TTTTTTTTTTTTTTTTTTTTTTTTT").unwrap();
    let group = builder.close().unwrap();

    let distances = group.jaccard_distance_matrix().unwrap();
    assert_eq!(distances.size(), 3);
    assert_eq!(distances.get(0, 1), 0.0);
    assert_eq!(distances.get(0, 2), 1.0);
    for i in 0..3 {
        assert_eq!(distances.get(i, i), 0.0);
        for j in 0..3 {
            assert_eq!(distances.get(i, j), distances.get(j, i));
        }
    }
    let similarities = group.jaccard_similarity_matrix().unwrap();
    assert_eq!(similarities.get(0, 1), 1.0);
    assert_eq!(similarities.get(1, 1), 1.0);
}

#[test]
fn test_build_from_fasta_and_manage_sets() {
    let dir = TempDir::new().unwrap();
    let fasta = dir.path().join("input.fasta");
    std::fs::write(&fasta, format!(">a\n{}\n>b\nGGATTACAGGCATTAGGATTACA\n", std::str::from_utf8(MIXED).unwrap())).unwrap();
    let root = dir.path().join("idx");

    let config = BuildConfiguration {
        batch_size: 1,
        ..BuildConfiguration::new(15, 7).unwrap()
    };
    let mut builder = KmerSetGroupBuilder::new(&root, 2, config).unwrap();
    builder.set_set_id(0, "sample_a").unwrap();
    builder.set_set_id(1, "sample_b").unwrap();
    let n = builder
        .add_batches(0, SequenceBatches::new([&fasta], 1))
        .unwrap();
    assert_eq!(n, 2);
    builder.add_sequence(1, MIXED).unwrap();
    let mut group = builder.close().unwrap();
    assert!(group.len(0) > group.len(1));

    let selected = group.select_sets(&["sample_*"]).unwrap();
    assert_eq!(selected, vec![0, 1]);
    let copy = group.copy_sets_to(dir.path().join("copy"), &[1], false).unwrap();
    assert_eq!(copy.set_label(0), "sample_b");
    assert_eq!(copy.len(0), group.len(1));

    group.remove_sets(&[0]).unwrap();
    let reopened = KmerSetGroup::open(&root).unwrap();
    assert_eq!(reopened.num_sets(), 1);
    assert_eq!(reopened.set_label(0), "sample_b");
}
