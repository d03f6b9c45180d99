use anyhow::Context;
use obikmer_lib::group::{parse_key_value, GroupMetadata};
use obikmer_lib::{BuildConfiguration, KmerSetGroupBuilder, SequenceBatches};
use tracing::info;

use crate::IndexArgs;

/// Build a new group, or append a set to the group in `--out`
pub fn index_command(args: IndexArgs, threads: usize) -> anyhow::Result<()> {
    let existing = if GroupMetadata::exists(&args.out) {
        Some(GroupMetadata::load(&args.out).with_context(|| format!("reading {}", args.out.display()))?)
    } else {
        None
    };

    let defaults = BuildConfiguration::default();
    let (k, m) = match &existing {
        Some(meta) => (args.k.unwrap_or(meta.k), args.m.unwrap_or(meta.m)),
        None => (args.k.unwrap_or(defaults.k), args.m.unwrap_or(defaults.m)),
    };
    let config = BuildConfiguration {
        k,
        m,
        partitions: args.partitions,
        min_frequency: args.min_occurrence,
        max_frequency: args.max_occurrence,
        save_top_n: args.save_freq_kmer,
        entropy_threshold: args.entropy_filter,
        entropy_level_max: args.entropy_size,
        num_threads: threads,
        batch_size: args.batch_size,
        ..defaults
    };
    config.validate().context("invalid index parameters")?;

    let mut builder = if existing.is_some() {
        info!("appending a set to {}", args.out.display());
        KmerSetGroupBuilder::append(&args.out, 1, config.clone())
    } else {
        info!("creating group {}", args.out.display());
        KmerSetGroupBuilder::new(&args.out, 1, config.clone())
    }
    .with_context(|| format!("opening {} for writing", args.out.display()))?;

    if let Some(id) = &args.index_id {
        builder.set_set_id(0, id.clone())?;
    }
    for tag in &args.group_tags {
        let (key, value) = parse_key_value(tag).with_context(|| format!("bad -T {tag:?}"))?;
        builder.set_group_attribute(key, value);
    }
    for tag in &args.set_tags {
        let (key, value) = parse_key_value(tag).with_context(|| format!("bad -S {tag:?}"))?;
        builder.set_set_attribute(0, key, value)?;
    }

    let batches = SequenceBatches::new(args.files.iter(), config.batch_size);
    let n = builder
        .add_batches(0, batches)
        .context("reading input sequences")?;
    info!("{n} sequence(s) read from {} file(s)", args.files.len());

    let group = builder.close().context("finalizing the group")?;
    let set = group.num_sets() - 1;
    info!(
        "set {set} ({}) holds {} k-mers; group {} now has {} set(s)",
        group.set_label(set),
        group.len(set),
        group.path().display(),
        group.num_sets()
    );
    Ok(())
}
