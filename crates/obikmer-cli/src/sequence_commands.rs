//! Subcommands streaming sequences to FASTA on stdout

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use obikmer_lib::encoding::decode_kmer;
use obikmer_lib::{
    super_kmers, BuildConfiguration, KmerSetGroup, LowComplexityMasker, LowMaskConfig,
    MaskingMode, SequenceBatches, SequenceRecord,
};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::output::write_fasta;
use crate::LowmaskArgs;

const BATCH_SIZE: usize = 1000;

/// Input files, or stdin when none is given
fn inputs(files: &[PathBuf]) -> Vec<PathBuf> {
    if files.is_empty() {
        vec![PathBuf::from("-")]
    } else {
        files.to_vec()
    }
}

fn header(record: &SequenceRecord) -> String {
    match &record.description {
        Some(d) => format!("{} {d}", record.id),
        None => record.id.clone(),
    }
}

/// Super-k-mer header: `<id>_sk<n> minimizer=<m-mer> start=<s> end=<e> parent=<id>`
fn super_kmer_header(parent: &str, n: usize, minimizer: &str, start: usize, end: usize) -> String {
    format!("{parent}_sk{n} minimizer={minimizer} start={start} end={end} parent={parent}")
}

/// Print every super-k-mer of the input as its own record
pub fn super_command<W: Write>(k: usize, m: usize, files: &[PathBuf], out: &mut W) -> anyhow::Result<()> {
    BuildConfiguration::new(k, m).context("invalid super-k-mer parameters")?;
    let mut total = 0;
    for batch in SequenceBatches::new(inputs(files), BATCH_SIZE) {
        let batch = batch.context("reading sequences")?;
        for record in &batch {
            for (n, sk) in super_kmers(&record.seq, k, m).enumerate() {
                let minimizer = decode_kmer(sk.minimizer, m);
                let name = super_kmer_header(&record.id, n, &minimizer, sk.start, sk.end);
                write_fasta(out, &name, sk.bases)?;
                total += 1;
            }
        }
    }
    out.flush()?;
    info!("{total} super-k-mer(s) written");
    Ok(())
}

/// Mask, split or extract low-complexity regions
pub fn lowmask_command<W: Write>(args: LowmaskArgs, out: &mut W) -> anyhow::Result<()> {
    let mode = if args.split_mode {
        MaskingMode::Split
    } else if args.low_mode {
        MaskingMode::Extract
    } else {
        MaskingMode::Mask
    };
    let masking_char = u8::try_from(args.masking_char)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("masking character {:?} is not ASCII", args.masking_char))?;
    let masker = LowComplexityMasker::new(LowMaskConfig {
        k: args.kmer_size,
        level_max: args.entropy_size,
        threshold: args.threshold,
        mode,
        masking_char,
        keep_shorter: args.keep_shorter,
    })
    .context("invalid masking parameters")?;
    debug!("{:?}", masker.config());

    for batch in SequenceBatches::new(inputs(&args.files), BATCH_SIZE) {
        let batch = batch.context("reading sequences")?;
        let processed: Vec<_> = batch
            .par_iter()
            .map_init(|| masker.clone(), |masker, record| masker.process(&record.seq))
            .collect();
        for (record, fragments) in batch.iter().zip(processed) {
            for fragment in fragments {
                let name = if mode == MaskingMode::Mask {
                    header(record)
                } else {
                    format!("{}_{}_{}", record.id, fragment.range.start, fragment.range.end)
                };
                write_fasta(out, &name, &fragment.bases)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Annotate sequences with the positions of their k-mers in each selected set
pub fn match_command<W: Write>(
    dir: &Path,
    files: &[PathBuf],
    patterns: &[String],
    batch_size: usize,
    out: &mut W,
) -> anyhow::Result<()> {
    let group = KmerSetGroup::open(dir).with_context(|| format!("opening group {}", dir.display()))?;
    let sets = group.select_sets(patterns).context("selecting sets")?;
    let labels: Vec<String> = sets.iter().map(|&s| group.set_label(s)).collect();

    let mut matched = 0;
    for batch in SequenceBatches::new(inputs(files), batch_size) {
        let batch = batch.context("reading sequences")?;
        let seqs: Vec<&[u8]> = batch.iter().map(|r| r.seq.as_slice()).collect();
        let results = group
            .match_batch(&sets, &seqs)
            .with_context(|| format!("matching against {}", dir.display()))?;
        for (i, record) in batch.iter().enumerate() {
            let mut name = header(record);
            for (label, hits) in labels.iter().zip(&results) {
                if let Some(positions) = hits.get(&i) {
                    name.push_str(&format!(" kmer_matched_{label}={}", serde_json::to_string(positions)?));
                    matched += 1;
                }
            }
            write_fasta(out, &name, &record.seq)?;
        }
    }
    out.flush()?;
    info!("{matched} sequence/set match(es)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inputs_default_to_stdin() {
        assert_eq!(inputs(&[]), vec![PathBuf::from("-")]);
        let files = vec![PathBuf::from("a.fa")];
        assert_eq!(inputs(&files), files);
    }

    #[test]
    fn test_headers() {
        let mut record = SequenceRecord::new("r1", b"ACGT".to_vec());
        assert_eq!(header(&record), "r1");
        record.description = Some("sample=x".into());
        assert_eq!(header(&record), "r1 sample=x");
        assert_eq!(
            super_kmer_header("r1", 2, "ACG", 4, 40),
            "r1_sk2 minimizer=ACG start=4 end=40 parent=r1"
        );
    }

    const SEQ: &[u8] = b"GATTACAGGCATTAGCCTAGGTCAAGTCCATGACTTGA";

    fn fasta(dir: &Path, name: &str, records: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for (id, seq) in records {
            write_fasta(&mut file, id, seq).unwrap();
        }
        path
    }

    fn lines(buf: Vec<u8>) -> Vec<String> {
        String::from_utf8(buf).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_match_headers() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("idx");
        let config = BuildConfiguration {
            partitions: Some(4),
            num_threads: 2,
            ..BuildConfiguration::new(15, 7).unwrap()
        };
        let mut b = obikmer_lib::KmerSetGroupBuilder::new(&root, 1, config).unwrap();
        b.set_set_id(0, "ref").unwrap();
        b.add_sequence(0, SEQ).unwrap();
        b.close().unwrap();

        let queries = fasta(
            dir.path(),
            "q.fa",
            &[("q1", &SEQ[..20]), ("q2", b"TTTTTTTTTTTTTTTTTTTT".as_slice())],
        );
        let mut buf = Vec::new();
        match_command(&root, &[queries], &[], 10, &mut buf).unwrap();
        assert_eq!(
            lines(buf),
            vec![
                ">q1 kmer_matched_ref=[0,1,2,3,4,5]".to_string(),
                String::from_utf8(SEQ[..20].to_vec()).unwrap(),
                ">q2".to_string(),
                "TTTTTTTTTTTTTTTTTTTT".to_string(),
            ]
        );
    }

    #[test]
    fn test_super_headers() {
        let dir = TempDir::new().unwrap();
        let input = fasta(dir.path(), "in.fa", &[("r1", SEQ)]);
        let mut buf = Vec::new();
        super_command(15, 7, &[input], &mut buf).unwrap();
        let out = lines(buf);
        assert!(!out.is_empty());
        assert!(out[0].starts_with(">r1_sk0 minimizer="));
        assert!(out[0].contains(" start=0 "));
        for pair in out.chunks(2) {
            assert!(pair[0].ends_with(" parent=r1"));
            assert!(pair[1].len() >= 15);
        }
    }

    fn lowmask_args(files: Vec<PathBuf>, split_mode: bool) -> LowmaskArgs {
        LowmaskArgs {
            files,
            kmer_size: 8,
            entropy_size: 3,
            threshold: 0.3,
            split_mode,
            low_mode: false,
            masking_char: '.',
            keep_shorter: false,
        }
    }

    #[test]
    fn test_lowmask_headers() {
        let dir = TempDir::new().unwrap();
        let mut seq = SEQ.to_vec();
        seq.extend_from_slice(&[b'A'; 20]);
        let input = fasta(dir.path(), "in.fa", &[("r1", seq.as_slice())]);

        let mut buf = Vec::new();
        lowmask_command(lowmask_args(vec![input.clone()], false), &mut buf).unwrap();
        let out = lines(buf);
        assert_eq!(out[0], ">r1");
        assert_eq!(out[1].len(), seq.len());
        assert!(out[1].ends_with("...."));

        let mut buf = Vec::new();
        lowmask_command(lowmask_args(vec![input], true), &mut buf).unwrap();
        let out = lines(buf);
        assert!(out[0].starts_with(">r1_0_"));
        assert!(out[1].len() < seq.len());
    }
}
