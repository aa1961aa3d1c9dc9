//! Directory-backed definition store.
//!
//! Every `.yaml`, `.yml` and `.json` file below the root directory holds one
//! skill document. Documents that fail to parse or validate are skipped,
//! logged, and reported through [`DefinitionStore::rejected`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use crate::skills::skill_def::SkillDefinition;

use super::{matches_category, DefinitionStore, StoreError};

/// A document that could not be turned into a definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedDocument {
    /// File path or row key the document came from.
    pub source: String,
    pub reason: String,
}

/// Loads skill documents from a directory tree.
#[derive(Debug)]
pub struct FileDefinitionStore {
    root: PathBuf,
    rejected: RwLock<Vec<RejectedDocument>>,
}

impl FileDefinitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rejected: RwLock::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_skill_document(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml" || ext == "json")
}

/// Collect document paths below `dir`, sorted so later files win ties in a
/// stable way.
fn collect_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_paths(&path, out)?;
        } else if is_skill_document(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn parse_document(path: &Path) -> Result<SkillDefinition, StoreError> {
    let text = std::fs::read_to_string(path)?;
    if path.extension().map_or(false, |ext| ext == "json") {
        SkillDefinition::from_json(&text)
    } else {
        SkillDefinition::from_yaml(&text)
    }
}

fn scan(root: &Path) -> Result<(Vec<SkillDefinition>, Vec<RejectedDocument>), StoreError> {
    let mut paths = Vec::new();
    if root.exists() {
        collect_paths(root, &mut paths)?;
    } else {
        log::warn!("Skills directory {} does not exist", root.display());
    }
    paths.sort();

    let mut defs = Vec::new();
    let mut rejected = Vec::new();
    for path in paths {
        match parse_document(&path) {
            Ok(def) => defs.push(def),
            Err(e) => {
                log::warn!("Failed to load skill from {}: {}", path.display(), e);
                rejected.push(RejectedDocument {
                    source: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((defs, rejected))
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn list_active_definitions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SkillDefinition>, StoreError> {
        let root = self.root.clone();
        let (defs, rejected) = tokio::task::spawn_blocking(move || scan(&root)).await??;

        *self.rejected.write() = rejected;
        Ok(defs
            .into_iter()
            .filter(|d| matches_category(d, category))
            .collect())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }

    fn rejected(&self) -> Vec<RejectedDocument> {
        self.rejected.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_loads_yaml_and_json_recursively() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pitch.yaml", "name: pitch\nversion: \"1.0.0\"\n");
        let nested = tmp.path().join("sales");
        fs::create_dir(&nested).unwrap();
        write(
            &nested,
            "followup.json",
            r#"{"name": "followup", "version": "2.1", "category": "sales"}"#,
        );
        write(tmp.path(), "notes.txt", "not a skill");

        let store = FileDefinitionStore::new(tmp.path());
        let defs = store.list_active_definitions(None).await.unwrap();
        let mut keys: Vec<String> = defs.iter().map(|d| d.key()).collect();
        keys.sort();
        assert_eq!(keys, vec!["followup@2.1", "pitch@1.0.0"]);
        assert!(store.rejected().is_empty());

        let sales = store.list_active_definitions(Some("sales")).await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].name, "followup");
    }

    #[tokio::test]
    async fn test_malformed_documents_are_quarantined() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.yml", "name: good\nversion: \"1.0.0\"\n");
        write(tmp.path(), "bad_version.yaml", "name: bad\nversion: \"one\"\n");
        write(tmp.path(), "broken.json", "{ this is not json");

        let store = FileDefinitionStore::new(tmp.path());
        let defs = store.list_active_definitions(None).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "good");

        let rejected = store.rejected();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().any(|r| r.source.ends_with("broken.json")));
        let bad_version = rejected
            .iter()
            .find(|r| r.source.ends_with("bad_version.yaml"))
            .unwrap();
        assert!(
            bad_version.reason.contains("invalid version \"one\""),
            "{}",
            bad_version.reason
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileDefinitionStore::new(tmp.path().join("nope"));
        assert!(store.list_active_definitions(None).await.unwrap().is_empty());
        assert!(store.describe().starts_with("file:"));
    }
}
