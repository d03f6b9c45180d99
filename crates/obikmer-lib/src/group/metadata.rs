//! `metadata.toml`: the authoritative description of a group
//!
//! ```toml
//! id = "my_index"
//! k = 31
//! m = 13
//! partitions = 4096
//! type = "KmerSetGroup"
//! size = 2
//! sets_ids = ["sample_a", "sample_b"]
//! counts = [123456, 98765]
//!
//! [user_metadata]
//! organism = "E. coli"
//!
//! [[sets_metadata]]
//! source = "a.fasta"
//!
//! [[sets_metadata]]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::constants::{GROUP_TYPE, METADATA_FILE};
use crate::error::{IoContext, KmerError, Result};

/// Serialized group metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    /// Group identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// K-mer size
    pub k: usize,
    /// Minimizer size
    pub m: usize,
    /// Number of partitions
    pub partitions: usize,
    /// Always `"KmerSetGroup"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Number of sets
    pub size: usize,
    /// Per-set identifiers; an empty string means no identifier
    #[serde(default)]
    pub sets_ids: Vec<String>,
    /// Per-set k-mer counts; recomputed from the `.kdi` headers when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u64>>,
    /// Group-level attributes
    #[serde(default)]
    pub user_metadata: Table,
    /// Per-set attributes
    #[serde(default)]
    pub sets_metadata: Vec<Table>,
}

impl GroupMetadata {
    /// Metadata of an empty group
    pub fn new(k: usize, m: usize, partitions: usize) -> Self {
        Self {
            id: None,
            k,
            m,
            partitions,
            kind: GROUP_TYPE.to_string(),
            size: 0,
            sets_ids: Vec::new(),
            counts: Some(Vec::new()),
            user_metadata: Table::new(),
            sets_metadata: Vec::new(),
        }
    }

    /// Whether `dir` holds a `metadata.toml`
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).is_file()
    }

    /// Read `dir/metadata.toml`
    ///
    /// Per-set vectors shorter than `size` are padded; `counts` is left as
    /// read so callers can tell whether it must be recomputed.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let text = fs::read_to_string(&path).at(&path)?;
        let mut meta: Self = toml::from_str(&text).map_err(|e| KmerError::Metadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if meta.kind != GROUP_TYPE {
            return Err(KmerError::Metadata {
                path,
                reason: format!("type is {:?}, expected {GROUP_TYPE:?}", meta.kind),
            });
        }
        meta.sets_ids.resize(meta.size, String::new());
        meta.sets_metadata.resize(meta.size, Table::new());
        Ok(meta)
    }

    /// Write `dir/metadata.toml` (through a temporary file and a rename)
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let text = toml::to_string_pretty(self).map_err(|e| KmerError::Metadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&tmp, text).at(&tmp)?;
        fs::rename(&tmp, &path).at(&path)
    }

    /// Append a set entry
    pub fn push_set(&mut self, id: String, count: u64, attributes: Table) {
        self.sets_ids.push(id);
        self.sets_metadata.push(attributes);
        self.counts.get_or_insert_with(Vec::new).push(count);
        self.size += 1;
    }

    /// Whether two groups share `(k, m, partitions)`
    pub fn same_layout(&self, other: &GroupMetadata) -> bool {
        self.k == other.k && self.m == other.m && self.partitions == other.partitions
    }
}

/// Parse `key=value`, typing the value as integer, float, boolean or string
pub fn parse_key_value(text: &str) -> Result<(String, Value)> {
    let (key, value) = text.split_once('=').ok_or_else(|| {
        KmerError::InvalidParameters(format!("expected key=value, got {text:?}"))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(KmerError::InvalidParameters(format!(
            "empty key in {text:?}"
        )));
    }
    Ok((key.to_string(), parse_value(value.trim())))
}

/// Type a raw attribute value
pub fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Boolean(b)
    } else {
        Value::String(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let mut meta = GroupMetadata::new(15, 7, 64);
        meta.id = Some("idx".into());
        meta.user_metadata.insert("organism".into(), Value::String("E. coli".into()));
        let mut attrs = Table::new();
        attrs.insert("depth".into(), Value::Integer(30));
        meta.push_set("a".into(), 10, attrs);
        meta.push_set(String::new(), 20, Table::new());
        meta.save(dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        assert!(text.contains("type = \"KmerSetGroup\""));
        assert!(text.contains("[user_metadata]"));

        let loaded = GroupMetadata::load(dir.path()).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.counts, Some(vec![10, 20]));
    }

    #[test]
    fn test_missing_counts_and_padding() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "k = 15\nm = 7\npartitions = 64\ntype = \"KmerSetGroup\"\nsize = 2\nsets_ids = [\"a\"]\n",
        )
        .unwrap();
        let meta = GroupMetadata::load(dir.path()).unwrap();
        assert_eq!(meta.counts, None);
        assert_eq!(meta.sets_ids, vec!["a".to_string(), String::new()]);
        assert_eq!(meta.sets_metadata.len(), 2);
    }

    #[test]
    fn test_wrong_type() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "k = 15\nm = 7\npartitions = 64\ntype = \"Other\"\nsize = 0\n",
        )
        .unwrap();
        assert!(matches!(
            GroupMetadata::load(dir.path()),
            Err(KmerError::Metadata { .. })
        ));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("n=3").unwrap(), ("n".into(), Value::Integer(3)));
        assert_eq!(parse_key_value("x = 0.5").unwrap(), ("x".into(), Value::Float(0.5)));
        assert_eq!(parse_key_value("ok=true").unwrap(), ("ok".into(), Value::Boolean(true)));
        assert_eq!(
            parse_key_value("name=E. coli").unwrap(),
            ("name".into(), Value::String("E. coli".into()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=3").is_err());
    }
}
