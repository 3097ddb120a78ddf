//! JSON-backed registry of known people.
//!
//! On disk: `{"<name>": {"idade": "<age>", "num_fotos": <count>}, ...}`,
//! indented with four spaces and replaced atomically on every save.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to access registry {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed registry {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },
}

/// Metadata kept for each registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    #[serde(rename = "idade", deserialize_with = "string_or_number")]
    pub age: String,
    #[serde(rename = "num_fotos")]
    pub photo_count: u32,
}

/// Ages typed as bare numbers in a hand-edited file are kept as text.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// In-memory registry bound to its backing file.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    people: BTreeMap<String, PersonRecord>,
}

impl Registry {
    /// Read the registry at `path`, or start empty if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let people = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| RegistryError::Malformed {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let registry = Self { path, people };
        tracing::info!(
            path = %registry.path.display(),
            people = registry.people.len(),
            "loaded registry"
        );
        Ok(registry)
    }

    /// Write the whole registry to a temp file next to the target, then rename it over.
    pub fn save(&self) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let mut bytes = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut bytes, formatter);
        self.people
            .serialize(&mut ser)
            .map_err(|source| RegistryError::Malformed {
                path: self.path.display().to_string(),
                source,
            })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = tmp_path(&self.path);
        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::debug!(path = %self.path.display(), people = self.people.len(), "saved registry");
        Ok(())
    }

    /// Insert or wholesale replace the record for `name`.
    pub fn upsert(&mut self, name: &str, age: &str, photo_count: u32) {
        self.people.insert(
            name.to_string(),
            PersonRecord {
                age: age.to_string(),
                photo_count,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&PersonRecord> {
        self.people.get(name)
    }

    /// Registered names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.people.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::load(dir.path().join("data.json")).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Registry::load(&path), Err(RegistryError::Malformed { .. })));
    }

    #[test]
    fn test_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut reg = Registry::load(&path).unwrap();
        reg.upsert("alice", "30", 8);
        reg.save().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\n    \"alice\": {\n        \"idade\": \"30\",\n        \"num_fotos\": 8\n    }\n}"
        );
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_save_load_roundtrip_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut reg = Registry::load(&path).unwrap();
        reg.upsert("bob", "", 4);
        reg.upsert("alice", "30", 8);
        reg.save().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.get("alice"), reg.get("alice"));
        assert_eq!(reloaded.get("bob"), reg.get("bob"));
        reloaded.save().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_upsert_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::load(dir.path().join("data.json")).unwrap();
        reg.upsert("alice", "30", 8);
        reg.upsert("alice", "31", 20);
        assert_eq!(reg.len(), 1);
        assert_eq!(
            reg.get("alice"),
            Some(&PersonRecord { age: "31".into(), photo_count: 20 })
        );
    }

    #[test]
    fn test_names_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::load(dir.path().join("data.json")).unwrap();
        reg.upsert("zoe", "1", 0);
        reg.upsert("adam", "2", 0);
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["adam", "zoe"]);
    }

    #[test]
    fn test_numeric_age_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"carol": {"idade": 42, "num_fotos": 2}}"#).unwrap();
        let reg = Registry::load(&path).unwrap();
        assert_eq!(reg.get("carol").unwrap().age, "42");
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/faces/data.json");
        let mut reg = Registry::load(&path).unwrap();
        reg.upsert("dan", "5", 2);
        reg.save().unwrap();
        assert!(path.exists());
    }
}
