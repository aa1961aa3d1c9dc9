//! Cache of resolved skill definitions.
//!
//! Entries are keyed `"{name}@{resolved version}"`. A `"latest"` lookup is
//! stored as an extra `"{name}@latest"` entry pointing at the same
//! definition, so repeated `latest` calls skip resolution until the cache is
//! cleared or the name is invalidated. A disabled cache misses on every
//! read and ignores writes.

use std::sync::Arc;

use dashmap::DashMap;

use super::skill_def::SkillDefinition;
use super::version::{VersionToken, LATEST};

/// Memoizes `SkillRegistry::resolve` results.
#[derive(Debug, Clone)]
pub struct SkillCache {
    entries: Arc<DashMap<String, Arc<SkillDefinition>>>,
    enabled: bool,
}

impl Default for SkillCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SkillCache {
    /// Create a new empty cache.
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(name: &str, token: &VersionToken) -> String {
        match token {
            VersionToken::Latest => format!("{}@{}", name, LATEST),
            VersionToken::Exact(v) => format!("{}@{}", name, v),
        }
    }

    /// Look up a cached definition.
    pub fn get(&self, name: &str, token: &VersionToken) -> Option<Arc<SkillDefinition>> {
        if !self.enabled {
            return None;
        }
        self.entries
            .get(&Self::key(name, token))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Store a resolved definition under its concrete version, and under
    /// `latest` when that was the requested token.
    pub fn put(&self, name: &str, token: &VersionToken, def: Arc<SkillDefinition>) {
        if !self.enabled {
            return;
        }
        let resolved = VersionToken::from(&def.version);
        if token.is_latest() {
            self.entries.insert(Self::key(name, token), Arc::clone(&def));
        }
        self.entries.insert(Self::key(name, &resolved), def);
    }

    /// Drop every entry for `name`.
    pub fn invalidate(&self, name: &str) {
        let prefix = format!("{}@", name);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
