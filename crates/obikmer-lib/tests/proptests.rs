use std::collections::BTreeSet;

use obikmer_lib::encoding::{kmer_mask, reverse_complement, reverse_complement_sequence};
use obikmer_lib::format::{KdiReader, KdiWriter};
use obikmer_lib::minimizer::{kmer_minimizer, partition_of, super_kmers};
use obikmer_lib::varint::varint_len;
use obikmer_lib::{BuildConfiguration, KmerIter, KmerSetGroupBuilder};
use proptest::prelude::*;
use tempfile::TempDir;

fn dna(min: usize, max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"ACGT".to_vec()), min..max)
}

proptest! {
    #[test]
    fn prop_reverse_complement_involution(k in 1usize..=31, raw in any::<u64>(), tag in 0u64..4) {
        let kmer = (raw & kmer_mask(k)) | (tag << 62);
        let rc = reverse_complement(kmer, k);
        prop_assert_eq!(rc >> 62, tag);
        prop_assert_eq!(reverse_complement(rc, k), kmer);
    }

    #[test]
    fn prop_canonical_strand_independence(k in 1usize..=31, seq in dna(0, 200)) {
        let mut fwd: Vec<u64> = KmerIter::new(&seq, k).collect();
        let rc = reverse_complement_sequence(&seq);
        let mut rev: Vec<u64> = KmerIter::new(&rc, k).collect();
        rev.reverse();
        // position i of one strand is position n-k-i of the other
        prop_assert_eq!(&fwd, &rev);
        fwd.sort_unstable();
        rev.sort_unstable();
        prop_assert_eq!(fwd, rev);
    }

    #[test]
    fn prop_super_kmers_share_minimizer(
        (k, m) in (2usize..=31).prop_flat_map(|k| (Just(k), 1..k)),
        seq in dna(0, 300),
    ) {
        let mut covered = 0;
        for sk in super_kmers(&seq, k, m) {
            for kmer in KmerIter::new(sk.bases, k) {
                prop_assert_eq!(kmer_minimizer(kmer, k, m), sk.minimizer);
                covered += 1;
            }
        }
        prop_assert_eq!(covered, seq.len().saturating_sub(k - 1));
    }

    #[test]
    fn prop_kdi_round_trip(values in prop::collection::btree_set(0u64..(1 << 62), 0..3000)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.kdi");
        let values: Vec<u64> = values.into_iter().collect();
        let mut writer = KdiWriter::create(&path).unwrap();
        writer.write_all(values.iter().copied()).unwrap();
        prop_assert_eq!(writer.finish().unwrap(), values.len() as u64);

        let expected_size = if values.is_empty() {
            12
        } else {
            12 + 8 + values.windows(2).map(|w| varint_len(w[1] - w[0]) as u64).sum::<u64>()
        };
        prop_assert_eq!(std::fs::metadata(&path).unwrap().len(), expected_size);
        prop_assert_eq!(KdiReader::open(&path).unwrap().read_all().unwrap(), values);
    }

    #[test]
    fn prop_kdi_seek(values in prop::collection::btree_set(0u64..1_000_000, 1..12_000), targets in prop::collection::vec(0u64..1_100_000, 1..8)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.kdi");
        let values: Vec<u64> = values.into_iter().collect();
        let mut writer = KdiWriter::create(&path).unwrap();
        writer.write_all(values.iter().copied()).unwrap();
        writer.finish().unwrap();

        let mut targets = targets;
        targets.sort_unstable();
        let mut reader = KdiReader::open(&path).unwrap();
        let mut floor = 0;
        for target in targets {
            // seeks never move backwards past values already returned
            let target = target.max(floor);
            reader.seek_to(target).unwrap();
            let expected = values.iter().copied().find(|&v| v >= target);
            let got = reader.next().unwrap();
            prop_assert_eq!(got, expected);
            match got {
                Some(v) => floor = v + 1,
                None => break,
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_partition_closure(seqs in prop::collection::vec(dna(20, 120), 1..4), partitions in 1usize..32) {
        let dir = TempDir::new().unwrap();
        let (k, m) = (15, 6);
        let config = BuildConfiguration {
            partitions: Some(partitions),
            num_threads: 2,
            ..BuildConfiguration::new(k, m).unwrap()
        };
        let builder = KmerSetGroupBuilder::new(dir.path(), 1, config).unwrap();
        for seq in &seqs {
            builder.add_sequence(0, seq).unwrap();
        }
        let group = builder.close().unwrap();

        let mut expected = BTreeSet::new();
        for seq in &seqs {
            expected.extend(KmerIter::new(seq, k));
        }
        let mut seen = BTreeSet::new();
        for p in 0..partitions {
            for kmer in group.reader(0, p).unwrap().read_all().unwrap() {
                prop_assert_eq!(partition_of(kmer_minimizer(kmer, k, m), partitions), p);
                prop_assert!(seen.insert(kmer));
            }
        }
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(group.len(0), group.sorted_iter(0).unwrap().count() as u64);
    }
}
