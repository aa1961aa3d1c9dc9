//! Persistence collaborators of the skill runtime.
//!
//! The engine only sees the traits defined here:
//!
//! - [`DefinitionStore`] - source of truth for skill definitions
//! - [`BindingStore`] - per-organization / per-actor enablement
//! - [`AuditStore`] - append-only invocation history
//!
//! Concrete backends:
//!
//! - [`FileDefinitionStore`] - directory of YAML / JSON documents
//! - [`SqliteStore`] - all three traits over a single SQLite file
//! - [`MemoryStore`] - all three traits in memory
//! - `PgStore` - all three traits over PostgreSQL (feature `postgres`)

pub mod file_store;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod pg_store;
pub mod sqlite_store;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::skills::error::DefinitionError;
use crate::skills::skill_def::SkillDefinition;

pub use file_store::{FileDefinitionStore, RejectedDocument};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use pg_store::PgStore;
pub use sqlite_store::SqliteStore;

// ============================================================================
// Errors
// ============================================================================

/// Errors from store backends and document parsing.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document parsed but failed definition checks.
    #[error("Invalid skill definition: {0}")]
    Definition(#[from] DefinitionError),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A blocking storage task was cancelled or panicked.
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Backend refused or could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Definitions
// ============================================================================

/// Source of skill definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// All active definitions. `category` restricts the result to one
    /// category when given.
    async fn list_active_definitions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SkillDefinition>, StoreError>;

    /// Human-readable description of where definitions come from.
    fn describe(&self) -> String;

    /// Documents skipped by the last `list_active_definitions` call.
    fn rejected(&self) -> Vec<RejectedDocument> {
        Vec::new()
    }
}

pub(crate) fn matches_category(def: &SkillDefinition, category: Option<&str>) -> bool {
    match category {
        Some(wanted) => def.category.as_deref() == Some(wanted),
        None => true,
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// Per-organization (and optionally per-actor) enablement of a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub org_id: String,
    /// `None` applies to the whole organization.
    #[serde(default)]
    pub actor_id: Option<String>,
    pub skill: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form overrides (`model`, `temperature`, `max_tokens`, ...).
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Binding {
    pub fn new(org_id: impl Into<String>, skill: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            actor_id: None,
            skill: skill.into(),
            enabled,
            config: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn for_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Whether this binding applies to `actor_id` within its organization.
    fn applies_to(&self, actor_id: Option<&str>) -> bool {
        match (&self.actor_id, actor_id) {
            (None, _) => true,
            (Some(bound), Some(actor)) => bound == actor,
            (Some(_), None) => false,
        }
    }
}

/// Pick the binding that governs `actor_id`: an actor-specific binding wins
/// over an organization-wide one.
pub(crate) fn select_binding<'a, I>(candidates: I, actor_id: Option<&str>) -> Option<Binding>
where
    I: IntoIterator<Item = &'a Binding>,
{
    candidates
        .into_iter()
        .filter(|b| b.applies_to(actor_id))
        .max_by_key(|b| (b.actor_id.is_some(), b.created_at))
        .cloned()
}

/// Enablement lookups and administration.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// The binding governing `skill` for this org/actor, if any.
    async fn get_binding(
        &self,
        org_id: &str,
        actor_id: Option<&str>,
        skill: &str,
    ) -> Result<Option<Binding>, StoreError>;

    /// All bindings of an organization.
    async fn list_bindings(&self, org_id: &str) -> Result<Vec<Binding>, StoreError>;

    /// Create or replace a binding (matched by `id`).
    async fn upsert_binding(&self, binding: Binding) -> Result<Binding, StoreError>;

    /// Remove a binding. Returns whether it existed.
    async fn delete_binding(&self, id: Uuid) -> Result<bool, StoreError>;
}

// ============================================================================
// Audit
// ============================================================================

/// Durable record of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub org_id: String,
    pub actor_id: Option<String>,
    pub skill: String,
    /// Resolved version, or the requested token when resolution failed.
    pub version: String,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Filter and page for audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default = "AuditQuery::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            org_id: None,
            skill: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    fn default_limit() -> usize {
        Self::DEFAULT_LIMIT
    }

    /// Limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    pub(crate) fn matches(&self, record: &AuditRecord) -> bool {
        self.org_id.as_deref().map_or(true, |o| record.org_id == o)
            && self.skill.as_deref().map_or(true, |s| record.skill == s)
    }
}

/// Per-skill slice of [`UsageStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillUsage {
    pub skill: String,
    pub invocations: u64,
    pub failures: u64,
    pub tokens_used: u64,
}

/// Rollup of audit records over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub since: Option<DateTime<Utc>>,
    pub total_invocations: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_tokens: u64,
    pub avg_duration_ms: f64,
    /// Sorted by invocation count, descending.
    pub per_skill: Vec<SkillUsage>,
}

impl UsageStats {
    /// Aggregate a set of records.
    pub fn from_records<'a, I>(since: DateTime<Utc>, records: I) -> Self
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut stats = UsageStats {
            since: Some(since),
            ..Default::default()
        };
        let mut per_skill: BTreeMap<&str, SkillUsage> = BTreeMap::new();
        let mut total_duration = 0u64;

        for record in records {
            stats.total_invocations += 1;
            total_duration += record.duration_ms;
            let tokens = record.tokens_used.unwrap_or(0);
            stats.total_tokens += tokens;

            let usage = per_skill.entry(&record.skill).or_insert_with(|| SkillUsage {
                skill: record.skill.clone(),
                ..Default::default()
            });
            usage.invocations += 1;
            usage.tokens_used += tokens;

            if record.succeeded() {
                stats.successful += 1;
            } else {
                stats.failed += 1;
                usage.failures += 1;
            }
        }

        if stats.total_invocations > 0 {
            stats.avg_duration_ms = total_duration as f64 / stats.total_invocations as f64;
        }
        stats.per_skill = per_skill.into_values().collect();
        stats
            .per_skill
            .sort_by(|a, b| b.invocations.cmp(&a.invocations).then(a.skill.cmp(&b.skill)));
        stats
    }
}

/// Append-only invocation history.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record.
    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Records matching `query`, newest first.
    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;

    /// Records created at or after `since`, optionally for one org.
    async fn records_since(
        &self,
        org_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError>;

    /// Usage rollup over the window starting at `since`.
    async fn usage_stats(
        &self,
        org_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<UsageStats, StoreError> {
        let records = self.records_since(org_id, since).await?;
        Ok(UsageStats::from_records(since, &records))
    }
}
