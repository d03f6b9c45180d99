//! Subcommands reading or rewriting whole groups

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use obikmer_lib::spectrum::spectrum_csv;
use obikmer_lib::{KmerSetGroup, KmerSpectrum};
use serde::Serialize;
use tracing::{info, warn};

use crate::output::{csv_field, write_structured, OutputFormat};

#[derive(Debug, Serialize)]
struct SetEntry {
    index: usize,
    id: String,
    count: u64,
}

#[derive(Debug, Serialize)]
struct SetSummary {
    index: usize,
    id: String,
    count: u64,
    disk_bytes: u64,
    metadata: toml::Table,
}

#[derive(Debug, Serialize)]
struct GroupSummary {
    path: String,
    id: Option<String>,
    k: usize,
    m: usize,
    partitions: usize,
    total_sets: usize,
    total_kmers: u64,
    total_disk_bytes: u64,
    metadata: toml::Table,
    sets: Vec<SetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jaccard: Option<Vec<Vec<f64>>>,
}

fn open(dir: &Path) -> anyhow::Result<KmerSetGroup> {
    KmerSetGroup::open(dir).with_context(|| format!("opening group {}", dir.display()))
}

fn select(group: &KmerSetGroup, patterns: &[String]) -> anyhow::Result<Vec<usize>> {
    group
        .select_sets(patterns)
        .with_context(|| format!("selecting sets of {}", group.path().display()))
}

/// List sets with their counts
pub fn ls_command<W: Write>(
    dir: &Path,
    patterns: &[String],
    format: OutputFormat,
    out: &mut W,
) -> anyhow::Result<()> {
    let group = open(dir)?;
    let entries: Vec<SetEntry> = select(&group, patterns)?
        .into_iter()
        .map(|index| SetEntry {
            index,
            id: group.set_label(index),
            count: group.len(index),
        })
        .collect();

    match format {
        OutputFormat::Csv => {
            writeln!(out, "index,id,count")?;
            for e in &entries {
                writeln!(out, "{},{},{}", e.index, csv_field(&e.id), e.count)?;
            }
        }
        _ => write_structured(out, &entries, format)?,
    }
    out.flush()?;
    Ok(())
}

/// Group statistics, optionally with the Jaccard distance matrix
pub fn summary_command<W: Write>(
    dir: &Path,
    format: OutputFormat,
    jaccard: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    let group = open(dir)?;
    let sets = (0..group.num_sets())
        .map(|index| {
            Ok(SetSummary {
                index,
                id: group.set_label(index),
                count: group.len(index),
                disk_bytes: group.disk_bytes(index)?,
                metadata: group.set_attributes(index)?.clone(),
            })
        })
        .collect::<obikmer_lib::Result<Vec<_>>>()
        .context("measuring sets")?;
    let jaccard = if jaccard {
        info!("computing Jaccard distances between {} sets", group.num_sets());
        Some(
            group
                .jaccard_distance_matrix()
                .context("computing Jaccard distances")?
                .to_rows(),
        )
    } else {
        None
    };
    let summary = GroupSummary {
        path: group.path().display().to_string(),
        id: group.id().map(str::to_string),
        k: group.k(),
        m: group.m(),
        partitions: group.partitions(),
        total_sets: group.num_sets(),
        total_kmers: group.total_kmers(),
        total_disk_bytes: group.total_disk_bytes()?,
        metadata: group.attributes().clone(),
        sets,
        jaccard,
    };

    match format {
        OutputFormat::Csv => {
            writeln!(out, "index,id,count,disk_bytes")?;
            for s in &summary.sets {
                writeln!(out, "{},{},{},{}", s.index, csv_field(&s.id), s.count, s.disk_bytes)?;
            }
            if let Some(rows) = &summary.jaccard {
                writeln!(out)?;
                let labels: Vec<String> = summary.sets.iter().map(|s| csv_field(&s.id)).collect();
                writeln!(out, "jaccard,{}", labels.join(","))?;
                for (label, row) in labels.iter().zip(rows) {
                    let cells: Vec<String> = row.iter().map(|d| format!("{d:.6}")).collect();
                    writeln!(out, "{label},{}", cells.join(","))?;
                }
            }
        }
        _ => write_structured(out, &summary, format)?,
    }
    out.flush()?;
    Ok(())
}

/// Copy (or move) selected sets to another group
pub fn copy_command(src: &Path, dst: &Path, patterns: &[String], force: bool, remove: bool) -> anyhow::Result<()> {
    let mut group = open(src)?;
    let sets = select(&group, patterns)?;
    let target = if remove {
        group.move_sets_to(dst, &sets, force)
    } else {
        group.copy_sets_to(dst, &sets, force)
    }
    .with_context(|| format!("transferring sets to {}", dst.display()))?;
    info!(
        "{} set(s) {} to {} ({} set(s) there)",
        sets.len(),
        if remove { "moved" } else { "copied" },
        dst.display(),
        target.num_sets()
    );
    Ok(())
}

/// Remove selected sets
pub fn rm_command(dir: &Path, patterns: &[String]) -> anyhow::Result<()> {
    let mut group = open(dir)?;
    let sets = select(&group, patterns)?;
    group
        .remove_sets(&sets)
        .with_context(|| format!("removing sets from {}", dir.display()))?;
    Ok(())
}

/// Frequency spectra of the selected sets, one CSV column per set
pub fn spectrum_command<W: Write>(dir: &Path, patterns: &[String], out: &mut W) -> anyhow::Result<()> {
    let group = open(dir)?;
    let mut columns = Vec::new();
    for set in select(&group, patterns)? {
        let spectrum = group
            .spectrum(set)
            .with_context(|| format!("reading the spectrum of {}", group.set_label(set)))?
            .unwrap_or_else(|| {
                warn!("set {} has no saved spectrum", group.set_label(set));
                KmerSpectrum::new()
            });
        columns.push((group.set_label(set), spectrum));
    }
    out.write_all(spectrum_csv(&columns).as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Copy selected sets into a new group, keeping high-entropy k-mers only
pub fn filter_command(
    src: &Path,
    out: &Path,
    patterns: &[String],
    threshold: f64,
    level_max: usize,
) -> anyhow::Result<()> {
    let group = open(src)?;
    let sets = select(&group, patterns)?;
    let filtered = group
        .filter_entropy(&sets, threshold, level_max, out)
        .with_context(|| format!("filtering {} into {}", src.display(), out.display()))?;
    for set in 0..filtered.num_sets() {
        info!(
            "{}: {} -> {} k-mers",
            filtered.set_label(set),
            group.len(sets[set]),
            filtered.len(set)
        );
    }
    Ok(())
}
