//! Finalized k-mer set groups
//!
//! A group is a directory of `N` sets sharing `(k, m, P)`:
//!
//! ```text
//! <root>/
//!   metadata.toml
//!   set_<i>/part_<pppp>.kdi, part_<pppp>.kdx, spectrum.bin, top_kmers.csv
//! ```
//!
//! [`KmerSetGroup`] owns the path and the parsed metadata; readers are
//! opened per `(set, partition)` on demand. Besides reading, a group can
//! rewrite its metadata, and copy, move or remove whole sets.

pub mod metadata;

use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::{debug, info, warn};

use crate::constants::{BUILD_DIR, SPECTRUM_FILE};
use crate::error::{IoContext, KmerError, Result};
use crate::format::kdi::{self, KdiReader};
use crate::format::partition_file_name;
use crate::merge::KWayMerge;
use crate::spectrum::KmerSpectrum;

pub use metadata::{parse_key_value, parse_value, GroupMetadata};

/// Directory name of set `i`
pub fn set_dir_name(set: usize) -> String {
    format!("set_{set}")
}

/// An exclusive claim on a group directory, released on drop
///
/// The claim is the `.build/` directory itself: `create_dir` is atomic, so
/// two writers can never both succeed.
#[derive(Debug)]
pub struct GroupLock {
    dir: PathBuf,
    keep: bool,
}

impl GroupLock {
    /// Claim `root`, failing with `GroupLocked` if `.build/` already exists
    pub fn acquire(root: &Path) -> Result<Self> {
        let dir = root.join(BUILD_DIR);
        match fs::create_dir(&dir) {
            Ok(()) => Ok(Self { dir, keep: false }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(KmerError::GroupLocked(root.to_path_buf()))
            }
            Err(e) => Err(KmerError::io(&dir, e)),
        }
    }

    /// The `.build/` directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Leave the directory behind on drop (failed or cancelled builds)
    pub fn keep(&mut self) {
        self.keep = true;
    }

    /// Remove the directory now
    pub fn release(mut self) -> Result<()> {
        self.keep = true;
        fs::remove_dir_all(&self.dir).at(&self.dir)
    }
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// A finalized group of k-mer sets
#[derive(Debug, Clone)]
pub struct KmerSetGroup {
    root: PathBuf,
    meta: GroupMetadata,
}

impl KmerSetGroup {
    /// Open the group stored in `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut meta = GroupMetadata::load(&root)?;
        let mut group = Self {
            root,
            meta: meta.clone(),
        };
        let stale = meta.counts.as_ref().map_or(true, |c| c.len() != meta.size);
        if stale {
            warn!(
                "counts missing from {}, reading partition headers",
                group.root.display()
            );
            let counts = (0..meta.size)
                .map(|set| group.count_from_headers(set))
                .collect::<Result<Vec<_>>>()?;
            meta.counts = Some(counts);
            group.meta = meta;
        }
        debug!(
            "opened group {} (k={}, m={}, P={}, N={})",
            group.root.display(),
            group.meta.k,
            group.meta.m,
            group.meta.partitions,
            group.meta.size
        );
        Ok(group)
    }

    /// Create an empty group in `root`, which must not hold one already
    pub fn create(root: impl AsRef<Path>, k: usize, m: usize, partitions: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if GroupMetadata::exists(&root) {
            return Err(KmerError::InvalidParameters(format!(
                "{} already holds a k-mer set group",
                root.display()
            )));
        }
        fs::create_dir_all(&root).at(&root)?;
        let meta = GroupMetadata::new(k, m, partitions);
        meta.save(&root)?;
        Ok(Self { root, meta })
    }

    pub(crate) fn from_parts(root: PathBuf, meta: GroupMetadata) -> Self {
        Self { root, meta }
    }

    /// Group directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Parsed metadata
    pub fn metadata(&self) -> &GroupMetadata {
        &self.meta
    }

    /// K-mer size
    pub fn k(&self) -> usize {
        self.meta.k
    }

    /// Minimizer size
    pub fn m(&self) -> usize {
        self.meta.m
    }

    /// Number of partitions per set
    pub fn partitions(&self) -> usize {
        self.meta.partitions
    }

    /// Number of sets
    pub fn num_sets(&self) -> usize {
        self.meta.size
    }

    /// Group identifier
    pub fn id(&self) -> Option<&str> {
        self.meta.id.as_deref()
    }

    /// Set the group identifier (call [`KmerSetGroup::save_metadata`] to persist)
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.meta.id = Some(id.into());
    }

    /// Identifier of set `i`, if it has one
    pub fn set_identifier(&self, set: usize) -> Option<&str> {
        self.meta
            .sets_ids
            .get(set)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Identifier of set `i`, or `set_<i>` when it has none
    pub fn set_label(&self, set: usize) -> String {
        self.set_identifier(set)
            .map_or_else(|| set_dir_name(set), str::to_string)
    }

    /// Name set `i`
    pub fn set_set_identifier(&mut self, set: usize, id: impl Into<String>) -> Result<()> {
        self.check_set(set)?;
        self.meta.sets_ids[set] = id.into();
        Ok(())
    }

    /// Number of k-mers in set `i`
    pub fn len(&self, set: usize) -> u64 {
        self.meta
            .counts
            .as_ref()
            .and_then(|c| c.get(set))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of k-mers over all sets
    pub fn total_kmers(&self) -> u64 {
        (0..self.num_sets()).map(|set| self.len(set)).sum()
    }

    /// Group-level attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.meta.user_metadata.get(key)
    }

    /// Group-level attributes
    pub fn attributes(&self) -> &Table {
        &self.meta.user_metadata
    }

    /// Set a group-level attribute
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.meta.user_metadata.insert(key.into(), value);
    }

    /// Attributes of set `i`
    pub fn set_attributes(&self, set: usize) -> Result<&Table> {
        self.check_set(set)?;
        Ok(&self.meta.sets_metadata[set])
    }

    /// Set an attribute of set `i`
    pub fn set_set_attribute(&mut self, set: usize, key: impl Into<String>, value: Value) -> Result<()> {
        self.check_set(set)?;
        self.meta.sets_metadata[set].insert(key.into(), value);
        Ok(())
    }

    /// Persist the in-memory metadata
    pub fn save_metadata(&self) -> Result<()> {
        self.meta.save(&self.root)
    }

    /// Directory of set `i`
    pub fn set_dir(&self, set: usize) -> PathBuf {
        self.root.join(set_dir_name(set))
    }

    /// `.kdi` file of `(set, partition)`
    pub fn partition_path(&self, set: usize, partition: usize) -> PathBuf {
        self.set_dir(set).join(partition_file_name(partition, "kdi"))
    }

    /// Reader over `(set, partition)`
    pub fn reader(&self, set: usize, partition: usize) -> Result<KdiReader> {
        self.check_set(set)?;
        KdiReader::open(self.partition_path(set, partition))
    }

    /// Readers over every partition of a set, in partition order
    pub fn readers(&self, set: usize) -> Result<Vec<KdiReader>> {
        (0..self.partitions())
            .map(|p| self.reader(set, p))
            .collect()
    }

    /// Every k-mer of set `i`, partition after partition
    ///
    /// Values are strictly increasing within a partition but not across
    /// partitions; see [`KmerSetGroup::sorted_iter`] for a global order.
    pub fn iter(&self, set: usize) -> Result<SetIter<'_>> {
        self.check_set(set)?;
        Ok(SetIter {
            group: self,
            set,
            partition: 0,
            current: None,
        })
    }

    /// Every k-mer of set `i` in increasing order (one open file per partition)
    pub fn sorted_iter(&self, set: usize) -> Result<SortedSetIter> {
        Ok(SortedSetIter {
            merge: KWayMerge::new(self.readers(set)?)?,
        })
    }

    /// Spectrum of set `i`, if one was saved
    pub fn spectrum(&self, set: usize) -> Result<Option<KmerSpectrum>> {
        self.check_set(set)?;
        let path = self.set_dir(set).join(SPECTRUM_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        KmerSpectrum::load(path).map(Some)
    }

    /// Bytes used on disk by set `i`
    pub fn disk_bytes(&self, set: usize) -> Result<u64> {
        self.check_set(set)?;
        dir_size(&self.set_dir(set))
    }

    /// Bytes used on disk by the whole group
    pub fn total_disk_bytes(&self) -> Result<u64> {
        dir_size(&self.root)
    }

    /// Indices of the sets matching any of the glob patterns
    ///
    /// Patterns are matched against set identifiers, or `set_<i>` for sets
    /// without one. An empty pattern list selects every set.
    pub fn select_sets<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<usize>> {
        if patterns.is_empty() {
            return Ok((0..self.num_sets()).collect());
        }
        let compiled = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref()).map_err(|e| {
                    KmerError::InvalidParameters(format!("bad pattern {:?}: {e}", p.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let selected: Vec<usize> = (0..self.num_sets())
            .filter(|&set| {
                let label = self.set_label(set);
                compiled.iter().any(|p| p.matches(&label))
            })
            .collect();
        if selected.is_empty() {
            let joined: Vec<&str> = patterns.iter().map(AsRef::as_ref).collect();
            return Err(KmerError::PatternMatchesNothing(joined.join(", ")));
        }
        Ok(selected)
    }

    /// Copy sets into the group at `dst`, creating it if needed
    ///
    /// An existing destination must share `(k, m, P)`. A copied set whose
    /// identifier already exists in the destination is an error, unless
    /// `force` is set, in which case the destination set is replaced.
    /// Conflicts are found before the destination is modified.
    pub fn copy_sets_to(&self, dst: impl AsRef<Path>, sets: &[usize], force: bool) -> Result<KmerSetGroup> {
        let dst = dst.as_ref();
        let mut seen = Vec::with_capacity(sets.len());
        for &set in sets {
            self.check_set(set)?;
            let id = self.meta.sets_ids[set].as_str();
            if !id.is_empty() && seen.contains(&id) {
                return Err(KmerError::InvalidParameters(format!(
                    "set {id:?} is selected twice from {}",
                    self.root.display()
                )));
            }
            seen.push(id);
        }
        let mut target = if GroupMetadata::exists(dst) {
            let target = KmerSetGroup::open(dst)?;
            if !target.meta.same_layout(&self.meta) {
                return Err(KmerError::IncompatibleGroup(format!(
                    "{} has (k={}, m={}, P={}), {} has (k={}, m={}, P={})",
                    self.root.display(),
                    self.k(),
                    self.m(),
                    self.partitions(),
                    dst.display(),
                    target.k(),
                    target.m(),
                    target.partitions()
                )));
            }
            target
        } else {
            KmerSetGroup::create(dst, self.k(), self.m(), self.partitions())?
        };
        let lock = GroupLock::acquire(dst)?;

        // every destination slot is resolved before anything is written
        let mut plan = Vec::with_capacity(sets.len());
        let mut next = target.num_sets();
        for &set in sets {
            let id = &self.meta.sets_ids[set];
            let existing = if id.is_empty() {
                None
            } else {
                target.meta.sets_ids.iter().position(|t| t == id)
            };
            match existing {
                Some(_) if !force => {
                    return Err(KmerError::InvalidParameters(format!(
                        "set {id:?} already exists in {} (use force to replace it)",
                        dst.display()
                    )));
                }
                Some(slot) => plan.push((set, slot)),
                None => {
                    plan.push((set, next));
                    next += 1;
                }
            }
        }

        // stage under .build/, which the lock removes if anything fails
        for &(set, slot) in &plan {
            copy_dir(&self.set_dir(set), &lock.dir().join(set_dir_name(slot)))?;
        }
        for &(set, slot) in &plan {
            let dir = target.set_dir(slot);
            if dir.exists() {
                if slot >= target.num_sets() {
                    warn!("removing stray directory {}", dir.display());
                }
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            let staged = lock.dir().join(set_dir_name(slot));
            fs::rename(&staged, &dir).at(&staged)?;
            if slot == target.num_sets() {
                target.meta.push_set(String::new(), 0, Table::new());
            }
            target.meta.sets_ids[slot] = self.meta.sets_ids[set].clone();
            target.meta.sets_metadata[slot] = self.meta.sets_metadata[set].clone();
            if let Some(counts) = target.meta.counts.as_mut() {
                counts[slot] = self.len(set);
            }
            info!(
                "copied {} to {} as set {slot}",
                self.set_label(set),
                dst.display()
            );
        }

        target.save_metadata()?;
        lock.release()?;
        Ok(target)
    }

    /// Remove sets, renumbering the remaining ones so indices stay dense
    pub fn remove_sets(&mut self, sets: &[usize]) -> Result<()> {
        for &set in sets {
            self.check_set(set)?;
        }
        let lock = GroupLock::acquire(&self.root)?;
        let mut doomed = vec![false; self.num_sets()];
        for &set in sets {
            doomed[set] = true;
        }
        for (set, &gone) in doomed.iter().enumerate() {
            if gone {
                let dir = self.set_dir(set);
                fs::remove_dir_all(&dir).at(&dir)?;
            }
        }

        let mut meta = self.meta.clone();
        meta.sets_ids.clear();
        meta.sets_metadata.clear();
        let mut counts = Vec::new();
        let mut next = 0;
        for (set, &gone) in doomed.iter().enumerate() {
            if gone {
                continue;
            }
            if set != next {
                let from = self.set_dir(set);
                let to = self.set_dir(next);
                fs::rename(&from, &to).at(&from)?;
            }
            meta.sets_ids.push(self.meta.sets_ids[set].clone());
            meta.sets_metadata.push(self.meta.sets_metadata[set].clone());
            counts.push(self.len(set));
            next += 1;
        }
        meta.size = next;
        meta.counts = Some(counts);
        meta.save(&self.root)?;
        self.meta = meta;
        lock.release()?;
        info!("removed {} set(s) from {}", sets.len(), self.root.display());
        Ok(())
    }

    /// Copy sets to `dst` then remove them from this group
    pub fn move_sets_to(&mut self, dst: impl AsRef<Path>, sets: &[usize], force: bool) -> Result<KmerSetGroup> {
        let target = self.copy_sets_to(dst, sets, force)?;
        self.remove_sets(sets)?;
        Ok(target)
    }

    fn count_from_headers(&self, set: usize) -> Result<u64> {
        let mut total = 0;
        for p in 0..self.partitions() {
            let path = self.partition_path(set, p);
            if path.is_file() {
                total += kdi::read_count(&path)?;
            }
        }
        Ok(total)
    }

    fn check_set(&self, set: usize) -> Result<()> {
        if set >= self.num_sets() {
            return Err(KmerError::InvalidParameters(format!(
                "set index {set} out of range (group has {} sets)",
                self.num_sets()
            )));
        }
        Ok(())
    }
}

/// Partition-ordered iterator over one set
pub struct SetIter<'a> {
    group: &'a KmerSetGroup,
    set: usize,
    partition: usize,
    current: Option<KdiReader>,
}

impl Iterator for SetIter<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Result<u64>> {
        loop {
            if self.current.is_none() {
                if self.partition >= self.group.partitions() {
                    return None;
                }
                match self.group.reader(self.set, self.partition) {
                    Ok(reader) => self.current = Some(reader),
                    Err(e) => {
                        self.partition = self.group.partitions();
                        return Some(Err(e));
                    }
                }
                self.partition += 1;
            }
            let reader = self.current.as_mut()?;
            match reader.next() {
                Ok(Some(kmer)) => return Some(Ok(kmer)),
                Ok(None) => self.current = None,
                Err(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Globally sorted iterator over one set
pub struct SortedSetIter {
    merge: KWayMerge<KdiReader>,
}

impl Iterator for SortedSetIter {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Result<u64>> {
        self.merge.next().map(|o| o.map(|(kmer, _)| kmer)).transpose()
    }
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let meta = entry.metadata().at(entry.path())?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).at(to)?;
    for entry in fs::read_dir(from).at(from)? {
        let entry = entry.at(from)?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if entry.file_type().at(&src)?.is_dir() {
            copy_dir(&src, &dst)?;
        } else {
            fs::copy(&src, &dst).at(&src)?;
        }
    }
    Ok(())
}
