//! PostgreSQL backend for definitions, bindings and audit records.
//!
//! Requires the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! skill-runtime = { features = ["postgres"] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::skills::skill_def::SkillDefinition;

use super::{
    matches_category, select_binding, AuditQuery, AuditRecord, AuditStore, Binding, BindingStore,
    DefinitionStore, RejectedDocument, StoreError,
};

/// PostgreSQL store implementing every store trait.
#[derive(Debug)]
pub struct PgStore {
    pool: PgPool,
    rejected: RwLock<Vec<RejectedDocument>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            rejected: RwLock::new(Vec::new()),
        }
    }

    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the skill tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skill_versions (
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                manifest JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (name, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skill_bindings (
                id UUID PRIMARY KEY,
                org_id TEXT NOT NULL,
                actor_id TEXT,
                skill TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT true,
                config JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skill_invocations (
                id UUID PRIMARY KEY,
                org_id TEXT NOT NULL,
                actor_id TEXT,
                skill TEXT NOT NULL,
                version TEXT NOT NULL,
                inputs JSONB NOT NULL DEFAULT 'null'::jsonb,
                outputs JSONB,
                error TEXT,
                duration_ms BIGINT NOT NULL,
                tokens_used BIGINT,
                confidence DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        log::debug!("Skill runtime tables migrated");
        Ok(())
    }

    /// Store `def` as the active manifest for its `(name, version)`.
    pub async fn publish(&self, def: &SkillDefinition) -> Result<(), StoreError> {
        let manifest = serde_json::to_value(def)?;
        sqlx::query(
            r#"
            INSERT INTO skill_versions (name, version, status, manifest)
            VALUES ($1, $2, 'active', $3)
            ON CONFLICT (name, version) DO UPDATE SET
                status = EXCLUDED.status,
                manifest = EXCLUDED.manifest
            "#,
        )
        .bind(&def.name)
        .bind(def.version.as_str())
        .bind(manifest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn binding_from_row(row: &PgRow) -> Result<Binding, sqlx::Error> {
    let config = match row.try_get::<Value, _>("config")? {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    Ok(Binding {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        actor_id: row.try_get("actor_id")?,
        skill: row.try_get("skill")?,
        enabled: row.try_get("enabled")?,
        config,
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<AuditRecord, sqlx::Error> {
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let tokens_used: Option<i64> = row.try_get("tokens_used")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        actor_id: row.try_get("actor_id")?,
        skill: row.try_get("skill")?,
        version: row.try_get("version")?,
        inputs: row.try_get("inputs")?,
        outputs: row.try_get("outputs")?,
        error: row.try_get("error")?,
        duration_ms: duration_ms.max(0) as u64,
        tokens_used: tokens_used.map(|t| t.max(0) as u64),
        confidence: row.try_get("confidence")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DefinitionStore for PgStore {
    async fn list_active_definitions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<SkillDefinition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, version, manifest FROM skill_versions
            WHERE status = 'active'
            ORDER BY name, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut defs = Vec::new();
        let mut rejected = Vec::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            let version: String = row.try_get("version")?;
            let manifest: Value = row.try_get("manifest")?;
            match SkillDefinition::from_json(&manifest.to_string()) {
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
        "postgres".to_string()
    }

    fn rejected(&self) -> Vec<RejectedDocument> {
        self.rejected.read().clone()
    }
}

#[async_trait]
impl BindingStore for PgStore {
    async fn get_binding(
        &self,
        org_id: &str,
        actor_id: Option<&str>,
        skill: &str,
    ) -> Result<Option<Binding>, StoreError> {
        let rows = sqlx::query("SELECT * FROM skill_bindings WHERE org_id = $1 AND skill = $2")
            .bind(org_id)
            .bind(skill)
            .fetch_all(&self.pool)
            .await?;
        let candidates = rows
            .iter()
            .map(binding_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(select_binding(&candidates, actor_id))
    }

    async fn list_bindings(&self, org_id: &str) -> Result<Vec<Binding>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM skill_bindings WHERE org_id = $1 ORDER BY skill, created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(binding_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn upsert_binding(&self, binding: Binding) -> Result<Binding, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO skill_bindings (id, org_id, actor_id, skill, enabled, config, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                actor_id = EXCLUDED.actor_id,
                skill = EXCLUDED.skill,
                enabled = EXCLUDED.enabled,
                config = EXCLUDED.config
            "#,
        )
        .bind(binding.id)
        .bind(&binding.org_id)
        .bind(&binding.actor_id)
        .bind(&binding.skill)
        .bind(binding.enabled)
        .bind(Value::Object(binding.config.clone()))
        .bind(binding.created_at)
        .execute(&self.pool)
        .await?;
        Ok(binding)
    }

    async fn delete_binding(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM skill_bindings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO skill_invocations
                (id, org_id, actor_id, skill, version, inputs, outputs, error,
                 duration_ms, tokens_used, confidence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.org_id)
        .bind(&record.actor_id)
        .bind(&record.skill)
        .bind(&record.version)
        .bind(&record.inputs)
        .bind(&record.outputs)
        .bind(&record.error)
        .bind(record.duration_ms as i64)
        .bind(record.tokens_used.map(|t| t as i64))
        .bind(record.confidence)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM skill_invocations
            WHERE ($1::text IS NULL OR org_id = $1)
              AND ($2::text IS NULL OR skill = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&query.org_id)
        .bind(&query.skill)
        .bind(query.effective_limit() as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn records_since(
        &self,
        org_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM skill_invocations
            WHERE ($1::text IS NULL OR org_id = $1) AND created_at >= $2
            ORDER BY created_at
            "#,
        )
        .bind(org_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
