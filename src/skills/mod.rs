//! Skill definitions and their execution.
//!
//! - [`skill_def`] - definition model and accepted document forms
//! - [`version`] - numeric versions and `latest` tokens
//! - [`registry`] - `(name, version)` index with latest resolution
//! - [`cache`] - memoized resolutions
//! - [`validator`] - input contract checks and output shape warnings
//! - [`compiler`] - system/user prompt rendering
//! - [`extract`] - JSON object extraction from model text
//! - [`audit`] - best-effort invocation history
//! - [`engine`] - the staged orchestrator

pub mod audit;
pub mod cache;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod extract;
pub mod invocation;
pub mod registry;
pub mod skill_def;
pub mod validator;
pub mod version;

pub use audit::{AuditMode, AuditRecorder};
pub use cache::SkillCache;
pub use compiler::{CompiledPrompt, CompilerOptions, PromptCompiler};
pub use engine::{EngineConfig, SkillEngine, SkillEngineBuilder};
pub use error::{DefinitionError, SkillError, ValidationRule};
pub use extract::{extract_json_object, ExtractError};
pub use invocation::{
    ErrorDetail, InvocationMetadata, InvocationRequest, InvocationResult, InvocationStage,
};
pub use registry::{SkillRegistry, SkillSummary};
pub use skill_def::{
    Dependency, ExecutionConfig, InputSpec, OutputSpec, ParamType, PromptExample, PromptTemplate,
    Rule, RuleKind, RulePriority, SkillDefinition, SkillDocument, ValidationRules,
};
pub use version::{SkillVersion, VersionToken, LATEST};
