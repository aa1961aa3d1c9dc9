//! SQLite backend for definitions, bindings and audit records.
//!
//! rusqlite is synchronous, so every operation opens a connection inside
//! `tokio::task::spawn_blocking`. Timestamps are stored as RFC 3339 text
//! with fixed precision so lexical order matches chronological order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::skills::skill_def::SkillDefinition;

use super::{
    matches_category, select_binding, AuditQuery, AuditRecord, AuditStore, Binding, BindingStore,
    DefinitionStore, RejectedDocument, StoreError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS skill_versions (
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    manifest TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (name, version)
);
CREATE TABLE IF NOT EXISTS skill_bindings (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    actor_id TEXT,
    skill TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    config TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_skill_bindings_lookup ON skill_bindings (org_id, skill);
CREATE TABLE IF NOT EXISTS skill_invocations (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    actor_id TEXT,
    skill TEXT NOT NULL,
    version TEXT NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT,
    error TEXT,
    duration_ms INTEGER NOT NULL,
    tokens_used INTEGER,
    confidence REAL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_skill_invocations_created ON skill_invocations (org_id, created_at);
";

/// Status of a row in `skill_versions`. Only `active` rows are loaded.
pub const STATUS_ACTIVE: &str = "active";

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str::<Value>(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn binding_from_row(row: &Row<'_>) -> rusqlite::Result<Binding> {
    let config = match get_json(row, 5)? {
        Some(Value::Object(map)) => map,
        _ => Default::default(),
    };
    Ok(Binding {
        id: get_uuid(row, 0)?,
        org_id: row.get(1)?,
        actor_id: row.get(2)?,
        skill: row.get(3)?,
        enabled: row.get(4)?,
        config,
        created_at: get_timestamp(row, 6)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let duration_ms: i64 = row.get(8)?;
    let tokens_used: Option<i64> = row.get(9)?;
    Ok(AuditRecord {
        id: get_uuid(row, 0)?,
        org_id: row.get(1)?,
        actor_id: row.get(2)?,
        skill: row.get(3)?,
        version: row.get(4)?,
        inputs: get_json(row, 5)?.unwrap_or(Value::Null),
        outputs: get_json(row, 6)?,
        error: row.get(7)?,
        duration_ms: duration_ms.max(0) as u64,
        tokens_used: tokens_used.map(|t| t.max(0) as u64),
        confidence: row.get(10)?,
        created_at: get_timestamp(row, 11)?,
    })
}

const BINDING_COLUMNS: &str = "id, org_id, actor_id, skill, enabled, config, created_at";
const RECORD_COLUMNS: &str = "id, org_id, actor_id, skill, version, inputs, outputs, error, \
                              duration_ms, tokens_used, confidence, created_at";

/// SQLite-backed store implementing every store trait.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
    rejected: RwLock<Vec<RejectedDocument>>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db_path,
            rejected: RwLock::new(Vec::new()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            f(&conn)
        })
        .await?
    }

    /// Store `def` as the active manifest for its `(name, version)`.
    pub async fn publish(&self, def: &SkillDefinition) -> Result<(), StoreError> {
        let manifest = serde_json::to_string(def)?;
        self.publish_raw(&def.name, def.version.as_str(), &manifest)
            .await
    }

    /// Store a raw manifest document without checking it.
    pub async fn publish_raw(
        &self,
        name: &str,
        version: &str,
        manifest: &str,
    ) -> Result<(), StoreError> {
        let (name, version, manifest) = (name.to_string(), version.to_string(), manifest.to_string());
        let created_at = timestamp(&Utc::now());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO skill_versions (name, version, status, manifest, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, version, STATUS_ACTIVE, manifest, created_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Change the status of one version. Returns whether the row exists.
    pub async fn set_status(
        &self,
        name: &str,
        version: &str,
        status: &str,
    ) -> Result<bool, StoreError> {
        let (name, version, status) = (name.to_string(), version.to_string(), status.to_string());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE skill_versions SET status = ?3 WHERE name = ?1 AND version = ?2",
                params![name, version, status],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl DefinitionStore for SqliteStore {
    async fn list_active_definitions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SkillDefinition>, StoreError> {
        let rows: Vec<(String, String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, version, manifest FROM skill_versions
                     WHERE status = ?1 ORDER BY name, created_at",
                )?;
                let rows = stmt
                    .query_map(params![STATUS_ACTIVE], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut defs = Vec::new();
        let mut rejected = Vec::new();
        for (name, version, manifest) in rows {
            match SkillDefinition::from_json(&manifest) {
                Ok(def) => defs.push(def),
                Err(e) => {
                    log::warn!("Skipping stored skill {}@{}: {}", name, version, e);
                    rejected.push(RejectedDocument {
                        source: format!("skill_versions:{}@{}", name, version),
                        reason: e.to_string(),
                    });
                }
            }
        }
        *self.rejected.write() = rejected;

        Ok(defs
            .into_iter()
            .filter(|d| matches_category(d, category))
            .collect())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }

    fn rejected(&self) -> Vec<RejectedDocument> {
        self.rejected.read().clone()
    }
}

#[async_trait]
impl BindingStore for SqliteStore {
    async fn get_binding(
        &self,
        org_id: &str,
        actor_id: Option<&str>,
        skill: &str,
    ) -> Result<Option<Binding>, StoreError> {
        let (org_id, skill) = (org_id.to_string(), skill.to_string());
        let candidates: Vec<Binding> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM skill_bindings WHERE org_id = ?1 AND skill = ?2",
                    BINDING_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![org_id, skill], binding_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(select_binding(&candidates, actor_id))
    }

    async fn list_bindings(&self, org_id: &str) -> Result<Vec<Binding>, StoreError> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM skill_bindings WHERE org_id = ?1 ORDER BY skill, created_at",
                BINDING_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![org_id], binding_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn upsert_binding(&self, binding: Binding) -> Result<Binding, StoreError> {
        let config = serde_json::to_string(&binding.config)?;
        let row = binding.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO skill_bindings
                 (id, org_id, actor_id, skill, enabled, config, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.org_id,
                    row.actor_id,
                    row.skill,
                    row.enabled,
                    config,
                    timestamp(&row.created_at),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(binding)
    }

    async fn delete_binding(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM skill_bindings WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let inputs = serde_json::to_string(&record.inputs)?;
        let outputs = record
            .outputs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO skill_invocations ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    RECORD_COLUMNS
                ),
                params![
                    record.id.to_string(),
                    record.org_id,
                    record.actor_id,
                    record.skill,
                    record.version,
                    inputs,
                    outputs,
                    record.error,
                    record.duration_ms as i64,
                    record.tokens_used.map(|t| t as i64),
                    record.confidence,
                    timestamp(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let org_id = query.org_id.clone();
        let skill = query.skill.clone();
        let limit = query.effective_limit() as i64;
        let offset = query.offset as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM skill_invocations
                 WHERE (?1 IS NULL OR org_id = ?1) AND (?2 IS NULL OR skill = ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3 OFFSET ?4",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![org_id, skill, limit, offset], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn records_since(
        &self,
        org_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let org_id = org_id.map(String::from);
        let since = timestamp(&since);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM skill_invocations
                 WHERE (?1 IS NULL OR org_id = ?1) AND created_at >= ?2
                 ORDER BY created_at",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![org_id, since], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn open() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(tmp.path().join("skills.db")).unwrap();
        (tmp, store)
    }

    fn skill(name: &str, version: &str) -> SkillDefinition {
        SkillDefinition::from_yaml(&format!(
            "name: {}\nversion: \"{}\"\ninputs:\n  - name: topic\n    type: string\n    required: true\n",
            name, version
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_list_active() {
        let (_tmp, store) = open();
        store.publish(&skill("pitch", "1.0.0")).await.unwrap();
        store.publish(&skill("pitch", "1.1.0")).await.unwrap();
        store.publish(&skill("tone", "0.1.0")).await.unwrap();
        assert!(store.set_status("tone", "0.1.0", "retired").await.unwrap());

        let defs = store.list_active_definitions(None).await.unwrap();
        let keys: Vec<String> = defs.iter().map(|d| d.key()).collect();
        assert_eq!(keys, vec!["pitch@1.0.0", "pitch@1.1.0"]);
        assert!(defs[0].input("topic").unwrap().required);
    }

    #[tokio::test]
    async fn test_manifest_rows_and_quarantine() {
        let (_tmp, store) = open();
        let manifest = json!({
            "key": "pitch_draft",
            "version": "2.0.0",
            "io": {
                "input_schema": {
                    "properties": {"track": {"type": "object"}},
                    "required": ["track"]
                }
            },
            "prompt": {"system": "s", "user": "{{track}}"}
        });
        store
            .publish_raw("pitch_draft", "2.0.0", &manifest.to_string())
            .await
            .unwrap();
        store.publish_raw("junk", "1.0.0", "{\"nope\": true}").await.unwrap();

        let defs = store.list_active_definitions(None).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "pitch_draft");
        let rejected = store.rejected();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].source, "skill_versions:junk@1.0.0");
    }

    #[tokio::test]
    async fn test_bindings_roundtrip() {
        let (_tmp, store) = open();
        let mut config = serde_json::Map::new();
        config.insert("model".into(), json!("claude-3-5-sonnet-20241022"));
        let org = store
            .upsert_binding(Binding::new("org", "pitch", true).with_config(config))
            .await
            .unwrap();
        let actor = store
            .upsert_binding(Binding::new("org", "pitch", false).for_actor("u1"))
            .await
            .unwrap();

        let found = store.get_binding("org", Some("u1"), "pitch").await.unwrap().unwrap();
        assert_eq!(found.id, actor.id);
        assert!(!found.enabled);

        let found = store.get_binding("org", None, "pitch").await.unwrap().unwrap();
        assert_eq!(found.config["model"], json!("claude-3-5-sonnet-20241022"));

        assert_eq!(store.list_bindings("org").await.unwrap().len(), 2);
        assert!(store.delete_binding(org.id).await.unwrap());
        assert!(store.get_binding("org", None, "pitch").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_insert_list_and_stats() {
        let (_tmp, store) = open();
        for (i, skill) in ["a", "b", "a"].iter().enumerate() {
            let record = AuditRecord {
                id: Uuid::new_v4(),
                org_id: "org".into(),
                actor_id: Some("u1".into()),
                skill: skill.to_string(),
                version: "1.0.0".into(),
                inputs: json!({"topic": "x"}),
                outputs: if i == 1 { None } else { Some(json!({"ok": true})) },
                error: if i == 1 { Some("boom".into()) } else { None },
                duration_ms: 100,
                tokens_used: Some(7),
                confidence: Some(0.5),
                created_at: Utc::now() - Duration::minutes(10 - i as i64),
            };
            store.insert(&record).await.unwrap();
        }

        let all = store.list(&AuditQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].created_at >= all[1].created_at);
        assert_eq!(all[0].inputs, json!({"topic": "x"}));

        let only_a = store
            .list(&AuditQuery {
                skill: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);

        let stats = store
            .usage_stats(Some("org"), Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stats.total_invocations, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_tokens, 21);
    }
}
