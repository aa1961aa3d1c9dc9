//! In-memory implementation of every store trait.
//!
//! Useful for embedding the runtime without persistence and as the test
//! double for the engine. Failure switches let tests simulate an
//! unavailable backend.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::skills::skill_def::SkillDefinition;

use super::{
    matches_category, select_binding, AuditQuery, AuditRecord, AuditStore, Binding, BindingStore,
    DefinitionStore, StoreError,
};

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: RwLock<Vec<SkillDefinition>>,
    bindings: RwLock<Vec<Binding>>,
    records: RwLock<Vec<AuditRecord>>,
    fail_definitions: AtomicBool,
    fail_bindings: AtomicBool,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition returned by `list_active_definitions`.
    pub fn add_definition(&self, def: SkillDefinition) {
        self.definitions.write().push(def);
    }

    /// Make definition reads fail.
    pub fn fail_definitions(&self, fail: bool) {
        self.fail_definitions.store(fail, Ordering::SeqCst);
    }

    /// Make binding reads and writes fail.
    pub fn fail_bindings(&self, fail: bool) {
        self.fail_bindings.store(fail, Ordering::SeqCst);
    }

    /// Make audit inserts fail.
    pub fn fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every audit record, in insertion order.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{} store offline", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn list_active_definitions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SkillDefinition>, StoreError> {
        Self::check(&self.fail_definitions, "definition")?;
        Ok(self
            .definitions
            .read()
            .iter()
            .filter(|d| matches_category(d, category))
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn get_binding(
        &self,
        org_id: &str,
        actor_id: Option<&str>,
        skill: &str,
    ) -> Result<Option<Binding>, StoreError> {
        Self::check(&self.fail_bindings, "binding")?;
        let bindings = self.bindings.read();
        Ok(select_binding(
            bindings
                .iter()
                .filter(|b| b.org_id == org_id && b.skill == skill),
            actor_id,
        ))
    }

    async fn list_bindings(&self, org_id: &str) -> Result<Vec<Binding>, StoreError> {
        Self::check(&self.fail_bindings, "binding")?;
        Ok(self
            .bindings
            .read()
            .iter()
            .filter(|b| b.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn upsert_binding(&self, binding: Binding) -> Result<Binding, StoreError> {
        Self::check(&self.fail_bindings, "binding")?;
        let mut bindings = self.bindings.write();
        match bindings.iter_mut().find(|b| b.id == binding.id) {
            Some(existing) => *existing = binding.clone(),
            None => bindings.push(binding.clone()),
        }
        Ok(binding)
    }

    async fn delete_binding(&self, id: Uuid) -> Result<bool, StoreError> {
        Self::check(&self.fail_bindings, "binding")?;
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|b| b.id != id);
        Ok(bindings.len() != before)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        Self::check(&self.fail_audit, "audit")?;
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read();
        let mut matching: Vec<AuditRecord> =
            records.iter().filter(|r| query.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect())
    }

    async fn records_since(
        &self,
        org_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.created_at >= since)
            .filter(|r| org_id.map_or(true, |o| r.org_id == o))
            .cloned()
            .collect())
    }
}
