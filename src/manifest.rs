//! Database manifest: the `<database_name>.json` file mapping collection
//! name to its serialized configuration, per spec.md §6.
//!
//! Grounded on the teacher's `manifest.rs` atomic-commit technique (write a
//! temp file, fsync, `rename` into place) but trimmed to the single-file,
//! single-rename shape this store actually needs — there is one manifest
//! file, not a generation of `MANIFEST-NNNNNN` versions, since collection
//! snapshots (not manifest entries) are the thing that changes on every
//! write.

use crate::config::{CollectionConfig, IdGenerator, IndexDef, RotationSchedule};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One `indexList[]` entry, matching spec.md §6's field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndexEntry {
    pub key: Option<String>,
    pub keys: Option<Vec<(String, crate::config::SortDirection)>>,
    pub separator: Option<u8>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    #[serde(rename = "ignoreCase")]
    pub ignore_case: Option<bool>,
    pub required: Option<bool>,
    /// `gen`/`process` are registry keys rather than the teacher's source
    /// text evaluated at load time (spec.md §9 REDESIGN FLAGS).
    pub process: Option<u32>,
}

impl From<&IndexDef> for (String, ManifestIndexEntry) {
    fn from(def: &IndexDef) -> Self {
        let (key, keys) = if def.is_composite() {
            (None, Some(def.fields.clone()))
        } else {
            (Some(def.fields[0].0.clone()), None)
        };
        let process = match def.process {
            crate::config::FieldProcess::Custom(k) => Some(k),
            _ => None,
        };
        (
            def.name.clone(),
            ManifestIndexEntry {
                key,
                keys,
                separator: Some(def.separator),
                unique: Some(def.unique),
                sparse: Some(def.sparse),
                ignore_case: Some(def.ignore_case),
                required: Some(def.required),
                process,
            },
        )
    }
}

fn index_def_from_entry(name: &str, entry: &ManifestIndexEntry) -> IndexDef {
    use crate::config::SortDirection;
    let fields = match (&entry.keys, &entry.key) {
        (Some(keys), _) => keys.clone(),
        (None, Some(key)) => vec![(key.clone(), SortDirection::Asc)],
        (None, None) => vec![(name.to_string(), SortDirection::Asc)],
    };
    let mut def = IndexDef {
        name: name.to_string(),
        fields,
        unique: entry.unique.unwrap_or(false),
        sparse: entry.sparse.unwrap_or(false),
        required: entry.required.unwrap_or(false),
        ignore_case: entry.ignore_case.unwrap_or(false),
        process: crate::config::FieldProcess::None,
        separator: entry.separator.unwrap_or(crate::types::DEFAULT_SEPARATOR),
    };
    if let Some(key) = entry.process {
        def.process = crate::config::FieldProcess::Custom(key);
    }
    def
}

/// One manifest entry: a collection's persisted configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub root: String,
    pub adapter: String,
    pub id: String,
    pub audit: Option<bool>,
    pub ttl: Option<u64>,
    pub rotate: Option<RotationSchedule>,
    pub auto: Option<IdGenerator>,
    #[serde(rename = "indexList")]
    pub index_list: Vec<ManifestIndexEntry>,
}

impl ManifestEntry {
    pub fn from_config(config: &CollectionConfig, root: &str, adapter: &str) -> Self {
        let index_list = config.index_defs.iter().map(|def| <(String, ManifestIndexEntry)>::from(def).1).collect();
        Self {
            name: config.name.clone(),
            root: root.to_string(),
            adapter: adapter.to_string(),
            id: config.primary_key_field.clone(),
            audit: Some(config.audit),
            ttl: config.ttl_ms,
            rotate: config.rotate,
            auto: Some(config.id_generator),
            index_list,
        }
    }

    pub fn to_config(&self) -> CollectionConfig {
        let mut config = CollectionConfig::new(self.name.clone());
        config.primary_key_field = self.id.clone();
        config.id_generator = self.auto.unwrap_or_default();
        config.ttl_ms = self.ttl;
        config.rotate = self.rotate;
        config.audit = self.audit.unwrap_or(false);
        config.index_defs = self
            .index_list
            .iter()
            .map(|entry| {
                let name = entry.key.clone().unwrap_or_else(|| "index".to_string());
                index_def_from_entry(&name, entry)
            })
            .collect();
        config
    }
}

/// The whole manifest file: collection name → entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub collections: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_for(database_root: &Path, database_name: &str) -> PathBuf {
        database_root.join(format!("{database_name}.json"))
    }

    /// Reads the manifest file at `path`, if present.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes the manifest atomically: write to a `.tmp` sibling, fsync, then
    /// `rename` into place (the teacher's atomic-commit-point technique).
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
            file.write_all(serde_json::to_vec_pretty(self)?.as_slice())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexDef;

    #[test]
    fn manifest_roundtrips_collection_config() {
        let config = CollectionConfig::new("users")
            .with_index(IndexDef::new("by_email", "email").unique().sparse())
            .with_audit();
        let entry = ManifestEntry::from_config(&config, ":memory:", "memory");
        let restored = entry.to_config();
        assert_eq!(restored.name, "users");
        assert!(restored.audit);
        assert_eq!(restored.index_defs.len(), 1);
        assert!(restored.index_defs[0].unique);
        assert!(restored.index_defs[0].sparse);
    }

    #[test]
    fn manifest_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Manifest::path_for(dir.path(), "mydb");
        let mut manifest = Manifest::new();
        let config = CollectionConfig::new("users");
        manifest.collections.insert(
            "users".to_string(),
            ManifestEntry::from_config(&config, dir.path().to_str().unwrap(), "file"),
        );
        manifest.write_atomic(&path).unwrap();

        let reloaded = Manifest::read(&path).unwrap().unwrap();
        assert!(reloaded.collections.contains_key("users"));
    }

    #[test]
    fn missing_manifest_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = Manifest::path_for(dir.path(), "absent");
        assert!(Manifest::read(&path).unwrap().is_none());
    }
}
