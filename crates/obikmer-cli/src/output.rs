//! Structured and FASTA output on stdout

use std::io::{self, BufWriter, StdoutLock, Write};

use anyhow::Context;
use clap::ValueEnum;
use serde::Serialize;

/// Format of structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    Csv,
}

/// Buffered stdout
pub fn stdout() -> BufWriter<StdoutLock<'static>> {
    BufWriter::new(io::stdout().lock())
}

/// Serialize `value` as pretty JSON or YAML
pub fn write_structured<W: Write, T: Serialize>(out: &mut W, value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, value).context("writing JSON")?;
            writeln!(out)?;
        }
        OutputFormat::Yaml => {
            serde_yaml::to_writer(&mut *out, value).context("writing YAML")?;
        }
        OutputFormat::Csv => anyhow::bail!("CSV is not available for this output"),
    }
    Ok(())
}

/// Quote a CSV field when needed
pub fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write one FASTA record, sequence on a single line
pub fn write_fasta<W: Write>(out: &mut W, header: &str, seq: &[u8]) -> io::Result<()> {
    writeln!(out, ">{header}")?;
    out.write_all(seq)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        index: usize,
        id: String,
    }

    #[test]
    fn test_structured() {
        let rows = vec![Row { index: 0, id: "a".into() }];
        let mut buf = Vec::new();
        write_structured(&mut buf, &rows, OutputFormat::Json).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"index\": 0"));

        let mut buf = Vec::new();
        write_structured(&mut buf, &rows, OutputFormat::Yaml).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("id: a"));

        assert!(write_structured(&mut Vec::new(), &rows, OutputFormat::Csv).is_err());
    }

    #[test]
    fn test_csv_field_and_fasta() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        let mut buf = Vec::new();
        write_fasta(&mut buf, "r1 x=1", b"ACGT").unwrap();
        assert_eq!(buf, b">r1 x=1\nACGT\n");
    }
}
