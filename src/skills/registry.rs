//! Skill Registry - in-memory index of definitions by `(name, version)`.
//!
//! Each name keeps its versions sorted ascending by numeric precedence at
//! insertion time, so resolving `"latest"` is a look at the last element.
//! The registry is a derived projection of a [`DefinitionStore`]; `reload`
//! rebuilds it from scratch.
//!
//! Reads take a shared lock. `register` and `reload` take the write lock
//! only for the final mutation; a reload builds the new index off-lock and
//! swaps it in whole, so readers see either the old or the new index and
//! never a partial one.
//!
//! The `*_with` variants run a callback while the lock is still held. The
//! engine fills its cache under the read lock and invalidates it under the
//! write lock, so a fill can never land after a newer registration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::store::DefinitionStore;

use super::error::SkillError;
use super::skill_def::SkillDefinition;
use super::version::{SkillVersion, VersionToken};

/// Versions of one skill, ascending.
#[derive(Debug, Default, Clone)]
struct VersionList {
    entries: Vec<(SkillVersion, Arc<SkillDefinition>)>,
}

impl VersionList {
    /// Insert or overwrite, keeping the list sorted.
    fn upsert(&mut self, def: Arc<SkillDefinition>) {
        match self
            .entries
            .binary_search_by(|(v, _)| v.cmp(&def.version))
        {
            Ok(i) => self.entries[i] = (def.version.clone(), def),
            Err(i) => self.entries.insert(i, (def.version.clone(), def)),
        }
    }

    fn latest(&self) -> Option<&Arc<SkillDefinition>> {
        self.entries.last().map(|(_, d)| d)
    }

    fn get(&self, version: &SkillVersion) -> Option<&Arc<SkillDefinition>> {
        self.entries
            .binary_search_by(|(v, _)| v.cmp(version))
            .ok()
            .map(|i| &self.entries[i].1)
    }
}

#[derive(Debug, Default, Clone)]
struct RegistryIndex {
    skills: HashMap<String, VersionList>,
}

impl RegistryIndex {
    fn insert(&mut self, def: Arc<SkillDefinition>) {
        self.skills
            .entry(def.name.clone())
            .or_default()
            .upsert(def);
    }

    fn len(&self) -> usize {
        self.skills.values().map(|v| v.entries.len()).sum()
    }
}

/// Summary of one skill name across its versions.
#[derive(Debug, Clone, Serialize)]
pub struct SkillSummary {
    pub name: String,
    /// All registered versions, ascending.
    pub versions: Vec<String>,
    pub latest: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Registry of skill definitions.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    index: RwLock<RegistryIndex>,
}

impl SkillRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the `(name, version)` slot.
    ///
    /// Registering the same key twice leaves a single entry holding the
    /// second definition.
    pub fn register(&self, def: SkillDefinition) {
        self.register_with(def, |_| {});
    }

    /// [`register`](Self::register), calling `on_commit` with the skill name
    /// before the write lock is released.
    pub fn register_with<F>(&self, def: SkillDefinition, on_commit: F)
    where
        F: FnOnce(&str),
    {
        log::debug!("Registering skill {}", def.key());
        let name = def.name.clone();
        let mut index = self.index.write();
        index.insert(Arc::new(def));
        on_commit(&name);
    }

    /// Resolve a name and version token to a registered definition.
    pub fn resolve(
        &self,
        name: &str,
        token: &VersionToken,
    ) -> Result<Arc<SkillDefinition>, SkillError> {
        self.resolve_with(name, token, |_| {})
    }

    /// [`resolve`](Self::resolve), calling `on_hit` with the definition
    /// before the read lock is released.
    pub fn resolve_with<F>(
        &self,
        name: &str,
        token: &VersionToken,
        on_hit: F,
    ) -> Result<Arc<SkillDefinition>, SkillError>
    where
        F: FnOnce(&Arc<SkillDefinition>),
    {
        let index = self.index.read();
        let versions = index
            .skills
            .get(name)
            .ok_or_else(|| SkillError::not_found(name, token))?;

        let def = match token {
            VersionToken::Latest => versions
                .latest()
                .cloned()
                .ok_or_else(|| SkillError::not_found(name, token))?,
            VersionToken::Exact(raw) => {
                let version =
                    SkillVersion::parse(raw).map_err(|_| SkillError::not_found(name, raw))?;
                versions
                    .get(&version)
                    .cloned()
                    .ok_or_else(|| SkillError::not_found(name, raw))?
            }
        };
        on_hit(&def);
        Ok(def)
    }

    /// Greatest registered version of `name`.
    pub fn latest_version(&self, name: &str) -> Option<SkillVersion> {
        self.index
            .read()
            .skills
            .get(name)
            .and_then(|v| v.latest())
            .map(|d| d.version.clone())
    }

    /// Registered versions of `name`, ascending.
    pub fn versions(&self, name: &str) -> Vec<SkillVersion> {
        self.index
            .read()
            .skills
            .get(name)
            .map(|v| v.entries.iter().map(|(ver, _)| ver.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether any version of `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.read().skills.contains_key(name)
    }

    /// One summary per skill name, sorted by name.
    pub fn list(&self) -> Vec<SkillSummary> {
        let index = self.index.read();
        let mut out: Vec<SkillSummary> = index
            .skills
            .iter()
            .filter_map(|(name, versions)| {
                let latest = versions.latest()?;
                Some(SkillSummary {
                    name: name.clone(),
                    versions: versions
                        .entries
                        .iter()
                        .map(|(v, _)| v.to_string())
                        .collect(),
                    latest: latest.version.to_string(),
                    description: latest.description.clone(),
                    category: latest.category.clone(),
                    tags: latest.tags.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Total number of `(name, version)` entries.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().skills.is_empty()
    }

    /// Replace the whole index with the store's active definitions.
    ///
    /// On error the current index is kept.
    pub async fn reload(&self, store: &dyn DefinitionStore) -> Result<usize, SkillError> {
        self.reload_with(store, || {}).await
    }

    /// [`reload`](Self::reload), calling `on_swap` before the write lock is
    /// released. Not called when loading fails.
    pub async fn reload_with<F>(
        &self,
        store: &dyn DefinitionStore,
        on_swap: F,
    ) -> Result<usize, SkillError>
    where
        F: FnOnce(),
    {
        let defs = store
            .list_active_definitions(None)
            .await
            .map_err(|e| SkillError::System(format!("Failed to load skills: {}", e)))?;

        let mut fresh = RegistryIndex::default();
        for def in defs {
            fresh.insert(Arc::new(def));
        }
        let count = fresh.len();

        {
            let mut index = self.index.write();
            *index = fresh;
            on_swap();
        }
        log::info!("Skill registry loaded {} skill versions", count);
        Ok(count)
    }
}
