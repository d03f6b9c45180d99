//! FASTA/FASTQ input with automatic decompression
//!
//! Sequences are read through needletail (gzip, bzip2, xz and zstd are
//! detected transparently) and handed out one by one or in batches.
//! Unlike index construction in most k-mer tools, non-ACGT bases are not
//! rejected here: the k-mer iterators decide what to do with them.

use std::path::{Path, PathBuf};

use needletail::{parse_fastx_file, parse_fastx_stdin, FastxReader};

use crate::error::{KmerError, Result};

/// One input record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Identifier (first word of the header line)
    pub id: String,
    /// Rest of the header line, if any
    pub description: Option<String>,
    /// Bases, as read
    pub seq: Vec<u8>,
    /// Quality string for FASTQ input
    pub qual: Option<Vec<u8>>,
}

impl SequenceRecord {
    /// Record with no description and no quality
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            description: None,
            seq: seq.into(),
            qual: None,
        }
    }
}

fn open(path: &Path) -> Result<Box<dyn FastxReader>> {
    if path.as_os_str() == "-" {
        parse_fastx_stdin().map_err(|e| KmerError::malformed(path, e.to_string()))
    } else {
        parse_fastx_file(path).map_err(|e| KmerError::malformed(path, e.to_string()))
    }
}

fn next_record(reader: &mut dyn FastxReader, path: &Path) -> Option<Result<SequenceRecord>> {
    let record = match reader.next()? {
        Ok(record) => record,
        Err(e) => return Some(Err(KmerError::malformed(path, e.to_string()))),
    };
    let header = String::from_utf8_lossy(record.id()).into_owned();
    let (id, description) = match header.split_once(char::is_whitespace) {
        Some((id, rest)) => (id.to_string(), Some(rest.trim().to_string())),
        None => (header, None),
    };
    Some(Ok(SequenceRecord {
        id,
        description: description.filter(|d| !d.is_empty()),
        seq: record.seq().into_owned(),
        qual: record.qual().map(<[u8]>::to_vec),
    }))
}

/// Call `callback(id, seq)` for every record of a file (`-` reads stdin)
pub fn parse_sequences<P, F>(path: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = open(path)?;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| KmerError::malformed(path, e.to_string()))?;
        let seq = record.seq();
        callback(record.id(), &seq)?;
    }
    Ok(())
}

/// Count sequences and total bases in a file
pub fn count_sequences<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let mut num_sequences = 0;
    let mut total_bases = 0;
    parse_sequences(path, |_id, seq| {
        num_sequences += 1;
        total_bases += seq.len();
        Ok(())
    })?;
    Ok((num_sequences, total_bases))
}

/// Batches of records read from a list of files, one file after the other
pub struct SequenceBatches {
    paths: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Box<dyn FastxReader>)>,
    batch_size: usize,
}

impl SequenceBatches {
    /// Read `paths` in order, `batch_size` records at a time
    pub fn new<I, P>(paths: I, batch_size: usize) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(Into::into)
                .collect::<Vec<_>>()
                .into_iter(),
            current: None,
            batch_size: batch_size.max(1),
        }
    }
}

impl Iterator for SequenceBatches {
    type Item = Result<Vec<SequenceRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if self.current.is_none() {
                let Some(path) = self.paths.next() else {
                    break;
                };
                match open(&path) {
                    Ok(reader) => self.current = Some((path, reader)),
                    Err(e) => return Some(Err(e)),
                }
            }
            let Some((path, reader)) = self.current.as_mut() else {
                break;
            };
            match next_record(reader.as_mut(), path) {
                Some(Ok(record)) => batch.push(record),
                Some(Err(e)) => return Some(Err(e)),
                None => self.current = None,
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fasta(records: &[(&str, &str)]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for (id, seq) in records {
            writeln!(file, ">{id}").unwrap();
            writeln!(file, "{seq}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_fasta_file() -> Result<()> {
        let file = fasta(&[("seq1", "ACGT"), ("seq2", "TGCN")]);
        let mut sequences = Vec::new();
        parse_sequences(file.path(), |id, seq| {
            sequences.push((id.to_vec(), seq.to_vec()));
            Ok(())
        })?;
        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].0, b"seq1");
        assert_eq!(sequences[1].1, b"TGCN");
        Ok(())
    }

    #[test]
    fn test_count_sequences() -> Result<()> {
        let file = fasta(&[("a", "ACGT"), ("b", "TGCATGCA")]);
        assert_eq!(count_sequences(file.path())?, (2, 12));
        Ok(())
    }

    #[test]
    fn test_batches_span_files() {
        let a = fasta(&[("a1", "ACGT"), ("a2", "ACGT"), ("a3", "ACGT")]);
        let b = fasta(&[("b1 some description", "GGGG"), ("b2", "TTTT")]);
        let batches: Vec<Vec<SequenceRecord>> =
            SequenceBatches::new([a.path(), b.path()], 2)
                .collect::<Result<_>>()
                .unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert!(sizes.iter().all(|&s| s <= 2));
        let all: Vec<&SequenceRecord> = batches.iter().flatten().collect();
        assert_eq!(all[3].id, "b1");
        assert_eq!(all[3].description.as_deref(), Some("some description"));
        assert_eq!(all[4].seq, b"TTTT".to_vec());
    }

    #[test]
    fn test_missing_file() {
        let mut batches = SequenceBatches::new(["/nonexistent/input.fa"], 10);
        assert!(matches!(batches.next(), Some(Err(_))));
    }
}
