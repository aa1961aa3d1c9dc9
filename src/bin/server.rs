//! skill-runtime HTTP server binary.
//!
//! Loads skill definitions, builds a [`SkillEngine`] and serves the
//! administration routes.
//!
//! # Environment Variables
//!
//! - `PORT` - HTTP port (default: 8080)
//! - `SKILL_RUNTIME_CONFIG` - optional YAML config file
//! - `SKILL_RUNTIME_STORE` - "file" (default), "sqlite" or "postgres"
//! - `SKILLS_DIR` - skill documents directory for the file store
//! - `SKILL_RUNTIME_DB` - SQLite database path
//! - `DATABASE_URL` - PostgreSQL connection string (store=postgres)
//! - `SKILL_RUNTIME_BACKEND` - "anthropic" (default) or "static"
//! - `ANTHROPIC_API_KEY` - API key for the Anthropic backend
//! - `RUST_LOG` - Tracing filter (default: "info,skill_runtime=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! # or with postgres:
//! cargo run --bin server --features postgres
//! ```

use std::sync::Arc;

use anyhow::Context;

use skill_runtime::config::{BackendKind, RuntimeConfig, StoreKind};
use skill_runtime::llms::{AnthropicBackend, CompletionBackend, StaticBackend};
use skill_runtime::server::{app_router, AppState};
use skill_runtime::skills::SkillEngine;
use skill_runtime::store::{AuditStore, BindingStore, DefinitionStore, FileDefinitionStore, SqliteStore};

type Stores = (
    Arc<dyn DefinitionStore>,
    Arc<dyn BindingStore>,
    Arc<dyn AuditStore>,
);

async fn open_stores(config: &RuntimeConfig) -> anyhow::Result<Stores> {
    match config.store {
        StoreKind::File => {
            let sqlite = Arc::new(
                SqliteStore::open(&config.sqlite_path)
                    .with_context(|| format!("opening {}", config.sqlite_path.display()))?,
            );
            let files = Arc::new(FileDefinitionStore::new(&config.skills_dir));
            Ok((files, sqlite.clone(), sqlite))
        }
        StoreKind::Sqlite => {
            let sqlite = Arc::new(
                SqliteStore::open(&config.sqlite_path)
                    .with_context(|| format!("opening {}", config.sqlite_path.display()))?,
            );
            Ok((sqlite.clone(), sqlite.clone(), sqlite))
        }
        #[cfg(feature = "postgres")]
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not set")?;
            tracing::info!("Connecting to PostgreSQL...");
            let pg = Arc::new(skill_runtime::store::PgStore::connect(url).await?);
            tracing::info!("PostgreSQL migrations complete");
            Ok((pg.clone(), pg.clone(), pg))
        }
        #[cfg(not(feature = "postgres"))]
        StoreKind::Postgres => {
            anyhow::bail!("SKILL_RUNTIME_STORE=postgres requires the `postgres` feature")
        }
    }
}

fn backend(config: &RuntimeConfig) -> Arc<dyn CompletionBackend> {
    match config.backend {
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(config.anthropic_api_key.clone())),
        BackendKind::Static => Arc::new(StaticBackend::new(config.static_response.clone())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skill_runtime=debug".into()),
        )
        .init();

    let config = RuntimeConfig::load()?;
    config.validate()?;

    let (definitions, bindings, audit) = open_stores(&config).await?;
    let engine = SkillEngine::builder(definitions, backend(&config))
        .bindings(bindings)
        .audit_store(audit)
        .config(config.engine.clone())
        .build();

    let loaded = engine.initialize().await?;
    for rejected in engine.rejected_documents() {
        tracing::warn!("Rejected {}: {}", rejected.source, rejected.reason);
    }
    tracing::info!("Loaded {} skill versions", loaded);

    let app = app_router(AppState::new(Arc::new(engine)));
    let bind_addr = format!("0.0.0.0:{}", config.port);

    tracing::info!("skill-runtime server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health              - liveness probe");
    tracing::info!("  GET  /skills              - list skills");
    tracing::info!("  POST /skills/:name/invoke - invoke a skill");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
