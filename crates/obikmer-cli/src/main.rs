use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod group_commands;
mod index;
mod output;
mod sequence_commands;

use output::{stdout, OutputFormat};

#[derive(Parser)]
#[command(name = "obik")]
#[command(version)]
#[command(about = "obik: partitioned on-disk k-mer set groups", long_about = None)]
struct Cli {
    /// Number of threads (0 = all available cores)
    #[arg(short = 't', long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a group, or append one set to an existing group
    Index(IndexArgs),

    /// List the sets of a group
    Ls {
        /// Group directory
        dir: PathBuf,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: OutputFormat,
    },

    /// Statistics of a group
    Summary {
        /// Group directory
        dir: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Add the pairwise Jaccard distance matrix
        #[arg(long)]
        jaccard: bool,
    },

    /// Copy sets into another group
    Cp {
        /// Source group
        src: PathBuf,

        /// Destination group (created if missing)
        dst: PathBuf,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,

        /// Replace destination sets with the same identifier
        #[arg(long)]
        force: bool,
    },

    /// Move sets into another group
    Mv {
        /// Source group
        src: PathBuf,

        /// Destination group (created if missing)
        dst: PathBuf,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,

        /// Replace destination sets with the same identifier
        #[arg(long)]
        force: bool,
    },

    /// Remove sets from a group
    Rm {
        /// Group directory
        dir: PathBuf,

        /// Glob on set identifiers (repeatable, at least one)
        #[arg(long = "set", value_name = "PATTERN", required = true)]
        sets: Vec<String>,
    },

    /// Print the k-mer frequency spectra as CSV
    Spectrum {
        /// Group directory
        dir: PathBuf,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,
    },

    /// Print the super-k-mers of sequences as FASTA
    Super {
        /// K-mer length
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Minimizer length
        #[arg(short, long, default_value = "13")]
        m: usize,

        /// FASTA/FASTQ files (default: stdin)
        files: Vec<PathBuf>,
    },

    /// Mask, split or extract low-complexity regions
    Lowmask(LowmaskArgs),

    /// Annotate sequences with the positions of their k-mers in a group
    Match {
        /// Group directory
        dir: PathBuf,

        /// FASTA/FASTQ files (default: stdin)
        files: Vec<PathBuf>,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,

        /// Sequences per query batch
        #[arg(long, default_value = "1000")]
        batch_size: usize,
    },

    /// Rewrite sets of a group into a new group, dropping low-entropy k-mers
    Filter {
        /// Source group
        src: PathBuf,

        /// Output group
        #[arg(long)]
        out: PathBuf,

        /// Keep k-mers whose entropy is above this value
        #[arg(long = "entropy-filter", default_value = "0.5")]
        entropy_filter: f64,

        /// Largest sub-word size of the entropy score
        #[arg(long = "entropy-size", default_value = "6")]
        entropy_size: usize,

        /// Glob on set identifiers (repeatable; default: every set)
        #[arg(long = "set", value_name = "PATTERN")]
        sets: Vec<String>,
    },
}

#[derive(Args)]
struct IndexArgs {
    /// FASTA/FASTQ files making up the new set
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Group directory (appended to when it already holds a group)
    #[arg(long, default_value = "obik_index")]
    out: PathBuf,

    /// K-mer length (default 31, or the group's when appending)
    #[arg(short, long)]
    k: Option<usize>,

    /// Minimizer length (default 13, or the group's when appending)
    #[arg(short, long)]
    m: Option<usize>,

    /// Number of partitions (default derived from m)
    #[arg(long)]
    partitions: Option<usize>,

    /// Drop k-mers seen fewer times
    #[arg(long = "min-occurrence", default_value = "1")]
    min_occurrence: u64,

    /// Drop k-mers seen more times (0 = no bound)
    #[arg(long = "max-occurrence", default_value = "0")]
    max_occurrence: u64,

    /// Drop k-mers whose entropy is at or below this value (0 = off)
    #[arg(long = "entropy-filter", default_value = "0")]
    entropy_filter: f64,

    /// Largest sub-word size of the entropy score
    #[arg(long = "entropy-size", default_value = "6")]
    entropy_size: usize,

    /// Write the N most frequent k-mers of the set to top_kmers.csv
    #[arg(long = "save-freq-kmer", default_value = "0")]
    save_freq_kmer: usize,

    /// Identifier of the new set
    #[arg(long = "index-id")]
    index_id: Option<String>,

    /// Group attribute, as key=value (repeatable)
    #[arg(short = 'T', value_name = "KEY=VALUE")]
    group_tags: Vec<String>,

    /// Set attribute, as key=value (repeatable)
    #[arg(short = 'S', value_name = "KEY=VALUE")]
    set_tags: Vec<String>,

    /// Sequences handed to the sharding stage at once
    #[arg(long, default_value = "1000")]
    batch_size: usize,
}

#[derive(Args)]
struct LowmaskArgs {
    /// FASTA/FASTQ files (default: stdin)
    files: Vec<PathBuf>,

    /// Window size
    #[arg(long = "kmer-size", default_value = "31")]
    kmer_size: usize,

    /// Largest sub-word size of the entropy score
    #[arg(long = "entropy-size", default_value = "6")]
    entropy_size: usize,

    /// Windows scoring at or below this value are low complexity
    #[arg(long, default_value = "0.5")]
    threshold: f64,

    /// Emit the high-complexity fragments instead of masking
    #[arg(long = "split-mode", conflicts_with = "low_mode")]
    split_mode: bool,

    /// Emit the low-complexity fragments instead of masking
    #[arg(long = "low-mode")]
    low_mode: bool,

    /// Replacement character when masking
    #[arg(long = "masking-char", default_value = ".")]
    masking_char: char,

    /// Keep fragments shorter than the window size
    #[arg(long = "keep-shorter")]
    keep_shorter: bool,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing on stderr: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Index(args) => index::index_command(args, cli.threads)?,
        Commands::Ls { dir, sets, format } => {
            group_commands::ls_command(&dir, &sets, format, &mut stdout())?
        }
        Commands::Summary { dir, format, jaccard } => {
            group_commands::summary_command(&dir, format, jaccard, &mut stdout())?
        }
        Commands::Cp { src, dst, sets, force } => {
            group_commands::copy_command(&src, &dst, &sets, force, false)?
        }
        Commands::Mv { src, dst, sets, force } => {
            group_commands::copy_command(&src, &dst, &sets, force, true)?
        }
        Commands::Rm { dir, sets } => group_commands::rm_command(&dir, &sets)?,
        Commands::Spectrum { dir, sets } => {
            group_commands::spectrum_command(&dir, &sets, &mut stdout())?
        }
        Commands::Super { k, m, files } => {
            sequence_commands::super_command(k, m, &files, &mut stdout())?
        }
        Commands::Lowmask(args) => sequence_commands::lowmask_command(args, &mut stdout())?,
        Commands::Match { dir, files, sets, batch_size } => {
            sequence_commands::match_command(&dir, &files, &sets, batch_size, &mut stdout())?
        }
        Commands::Filter { src, out, entropy_filter, entropy_size, sets } => {
            group_commands::filter_command(&src, &out, &sets, entropy_filter, entropy_size)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        let cli = Cli::try_parse_from([
            "obik", "index", "--out", "idx", "-k", "21", "-m", "11", "--min-occurrence", "2",
            "--index-id", "sample", "-T", "organism=E. coli", "-S", "depth=30", "a.fa", "b.fa",
        ])
        .unwrap();
        let Commands::Index(args) = cli.command else {
            panic!("expected index");
        };
        assert_eq!(args.k, Some(21));
        assert_eq!(args.m, Some(11));
        assert_eq!(args.min_occurrence, 2);
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.group_tags, vec!["organism=E. coli".to_string()]);
        assert_eq!(args.set_tags, vec!["depth=30".to_string()]);
    }

    #[test]
    fn test_parse_repeated_sets_and_format() {
        let cli = Cli::try_parse_from([
            "obik", "ls", "--set", "ecoli_*", "--set", "set_3", "--format", "yaml", "idx",
        ])
        .unwrap();
        let Commands::Ls { sets, format, .. } = cli.command else {
            panic!("expected ls");
        };
        assert_eq!(sets.len(), 2);
        assert_eq!(format, OutputFormat::Yaml);
        assert!(Cli::try_parse_from(["obik", "rm", "idx"]).is_err());
    }

    #[test]
    fn test_lowmask_modes_conflict() {
        assert!(Cli::try_parse_from(["obik", "lowmask", "--split-mode", "--low-mode", "a.fa"]).is_err());
        assert!(Cli::try_parse_from(["obik", "-t", "4", "lowmask", "--split-mode", "a.fa"]).is_ok());
    }
}
