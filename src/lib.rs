//! # skill-runtime
//!
//! Executes versioned, declaratively defined LLM skills.
//!
//! A skill is a document describing typed inputs, an expected output shape,
//! prompt material and execution settings. The runtime indexes definitions
//! by `(name, version)`, checks caller arguments against the input contract,
//! compiles the prompt, calls a completion backend, pulls a JSON object out
//! of the reply and records an audit entry for every attempt.
//!
//! ```no_run
//! use std::sync::Arc;
//! use skill_runtime::{InvocationRequest, SkillEngine};
//! use skill_runtime::llms::StaticBackend;
//! use skill_runtime::store::FileDefinitionStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SkillEngine::builder(
//!     Arc::new(FileDefinitionStore::new("skills")),
//!     Arc::new(StaticBackend::new(r#"{"drafts": []}"#)),
//! )
//! .build();
//! engine.initialize().await?;
//!
//! let result = engine
//!     .invoke(InvocationRequest::new("email-pitch", "org-1").arg("company", serde_json::json!("Acme")))
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod llms;
pub mod server;
pub mod skills;
pub mod store;

pub use config::RuntimeConfig;
pub use llms::{CompletionBackend, CompletionRequest};
pub use skills::{
    InvocationRequest, InvocationResult, SkillDefinition, SkillEngine, SkillError, VersionToken,
};
pub use store::{AuditStore, BindingStore, DefinitionStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
