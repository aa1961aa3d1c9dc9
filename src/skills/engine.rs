//! Skill execution engine.
//!
//! [`SkillEngine::invoke`] runs one request through a fixed sequence of
//! stages. The first failing stage short-circuits to auditing; auditing
//! always runs and never changes the result.
//!
//! ```text
//! Pending → CheckingEnablement → Resolving → Validating → CheckingDependencies
//!         → Compiling → Invoking → ValidatingOutput → Auditing → Succeeded | Failed
//! ```
//!
//! The engine owns its registry and cache and receives every collaborator
//! explicitly, so several isolated engines can coexist in one process.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::llms::{CompletionBackend, CompletionRequest};
use crate::store::{
    AuditRecord, AuditStore, BindingStore, DefinitionStore, MemoryStore, RejectedDocument,
};

use super::audit::{AuditMode, AuditRecorder};
use super::cache::SkillCache;
use super::compiler::{CompilerOptions, PromptCompiler};
use super::error::SkillError;
use super::extract::extract_json_object;
use super::invocation::{InvocationMetadata, InvocationRequest, InvocationResult, InvocationStage};
use super::registry::{SkillRegistry, SkillSummary};
use super::skill_def::{ExecutionConfig, SkillDefinition};
use super::validator::{validate_inputs, validate_outputs};
use super::version::VersionToken;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Engine-wide defaults and switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_model: String,
    pub default_max_tokens: u32,
    pub default_temperature: f64,
    /// Passed to the backend when neither binding nor skill sets one.
    pub default_timeout_ms: Option<u64>,
    pub cache_enabled: bool,
    pub audit_mode: AuditMode,
    pub compiler: CompilerOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            default_temperature: DEFAULT_TEMPERATURE,
            default_timeout_ms: None,
            cache_enabled: true,
            audit_mode: AuditMode::default(),
            compiler: CompilerOptions::default(),
        }
    }
}

impl EngineConfig {
    fn defaults(&self) -> ExecutionConfig {
        ExecutionConfig {
            model: Some(self.default_model.clone()),
            temperature: Some(self.default_temperature),
            max_tokens: Some(self.default_max_tokens),
            timeout_ms: self.default_timeout_ms,
        }
    }
}

/// Facts gathered while running the stages, used for the envelope and the
/// audit record whether or not the invocation succeeds.
#[derive(Debug, Default)]
struct Trace {
    version: Option<String>,
    model: Option<String>,
    tokens_used: Option<u64>,
    warnings: Vec<String>,
}

/// Registry, cache, compiler and collaborators behind `invoke`.
pub struct SkillEngine {
    config: EngineConfig,
    registry: SkillRegistry,
    cache: SkillCache,
    compiler: PromptCompiler,
    definitions: Arc<dyn DefinitionStore>,
    bindings: Arc<dyn BindingStore>,
    audit: AuditRecorder,
    backend: Arc<dyn CompletionBackend>,
}

impl SkillEngine {
    /// Start building an engine around its two mandatory collaborators.
    pub fn builder(
        definitions: Arc<dyn DefinitionStore>,
        backend: Arc<dyn CompletionBackend>,
    ) -> SkillEngineBuilder {
        SkillEngineBuilder {
            config: EngineConfig::default(),
            definitions,
            backend,
            bindings: None,
            audit_store: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SkillCache {
        &self.cache
    }

    pub fn bindings(&self) -> &Arc<dyn BindingStore> {
        &self.bindings
    }

    pub fn audit_store(&self) -> &Arc<dyn AuditStore> {
        self.audit.store()
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// First load of the registry from the definition store.
    pub async fn initialize(&self) -> Result<usize, SkillError> {
        let count = self.reload().await?;
        log::info!(
            "Skill engine initialized from {} ({} skill versions)",
            self.definitions.describe(),
            count
        );
        Ok(count)
    }

    /// Rebuild the registry from the definition store and clear the cache.
    ///
    /// On failure the previous registry stays in place.
    pub async fn reload(&self) -> Result<usize, SkillError> {
        let count = self
            .registry
            .reload_with(self.definitions.as_ref(), || self.cache.clear())
            .await?;
        let rejected = self.definitions.rejected();
        if !rejected.is_empty() {
            log::warn!("{} skill documents were rejected", rejected.len());
        }
        Ok(count)
    }

    /// Documents the definition store skipped on the last load.
    pub fn rejected_documents(&self) -> Vec<RejectedDocument> {
        self.definitions.rejected()
    }

    /// Validate and register a definition directly.
    pub fn register(&self, def: SkillDefinition) -> Result<(), SkillError> {
        def.validate()
            .map_err(|e| SkillError::System(format!("Invalid skill definition: {}", e)))?;
        self.registry
            .register_with(def, |name| self.cache.invalidate(name));
        Ok(())
    }

    pub fn list_skills(&self) -> Vec<SkillSummary> {
        self.registry.list()
    }

    /// Resolve a definition for inspection.
    pub fn describe(
        &self,
        name: &str,
        token: &VersionToken,
    ) -> Result<Arc<SkillDefinition>, SkillError> {
        self.resolve(name, token)
    }

    fn resolve(&self, name: &str, token: &VersionToken) -> Result<Arc<SkillDefinition>, SkillError> {
        if let Some(def) = self.cache.get(name, token) {
            return Ok(def);
        }
        self.registry
            .resolve_with(name, token, |def| self.cache.put(name, token, Arc::clone(def)))
    }

    /// Run independent invocations concurrently.
    pub async fn invoke_many(&self, requests: Vec<InvocationRequest>) -> Vec<InvocationResult> {
        futures::future::join_all(requests.into_iter().map(|r| self.invoke(r))).await
    }

    /// Run one invocation. Never fails: every error becomes a failed result.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let started = Instant::now();
        let mut trace = Trace::default();

        let outcome = self.run_stages(&request, &mut trace).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        self.enter(&request, InvocationStage::Auditing);
        let confidence = outcome
            .as_ref()
            .ok()
            .and_then(|outputs| outputs.get("confidence"))
            .and_then(Value::as_f64);

        let record = AuditRecord {
            id: Uuid::new_v4(),
            org_id: request.org_id.clone(),
            actor_id: request.actor_id.clone(),
            skill: request.skill.clone(),
            version: trace
                .version
                .clone()
                .unwrap_or_else(|| request.version.to_string()),
            inputs: Value::Object(request.arguments.clone()),
            outputs: outcome.as_ref().ok().cloned().map(Value::Object),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            duration_ms: execution_time_ms,
            tokens_used: trace.tokens_used,
            confidence,
            created_at: Utc::now(),
        };
        self.audit.record(record).await;

        let metadata = InvocationMetadata {
            execution_time_ms,
            tokens_used: trace.tokens_used,
            confidence,
            warnings: trace.warnings,
            skill: request.skill.clone(),
            version: trace.version,
            model: trace.model,
        };

        match outcome {
            Ok(outputs) => {
                self.enter(&request, InvocationStage::Succeeded);
                InvocationResult::succeeded(outputs, metadata)
            }
            Err(e) => {
                log::debug!("Invocation of {} failed: {}", request.skill, e);
                self.enter(&request, InvocationStage::Failed);
                InvocationResult::failed(&e, metadata)
            }
        }
    }

    fn enter(&self, request: &InvocationRequest, stage: InvocationStage) {
        log::debug!("{}@{} [{}] -> {}", request.skill, request.version, request.org_id, stage);
    }

    async fn run_stages(
        &self,
        request: &InvocationRequest,
        trace: &mut Trace,
    ) -> Result<Map<String, Value>, SkillError> {
        self.enter(request, InvocationStage::CheckingEnablement);
        let overrides = self.check_enablement(request).await?;

        self.enter(request, InvocationStage::Resolving);
        let def = self.resolve(&request.skill, &request.version)?;
        trace.version = Some(def.version.to_string());

        self.enter(request, InvocationStage::Validating);
        validate_inputs(&def, &request.arguments)?;

        self.enter(request, InvocationStage::CheckingDependencies);
        self.check_dependencies(&def, trace)?;

        self.enter(request, InvocationStage::Compiling);
        let prompt = self.compiler.compile(&def, &request.arguments);

        self.enter(request, InvocationStage::Invoking);
        let exec = overrides
            .or(def.config.as_ref().unwrap_or(&ExecutionConfig::default()))
            .or(&self.config.defaults());
        let model = exec
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        trace.model = Some(model.clone());

        let completion = self
            .backend
            .complete(CompletionRequest {
                system_text: prompt.system_text,
                user_text: prompt.user_text,
                model,
                max_tokens: exec.max_tokens.unwrap_or(self.config.default_max_tokens),
                temperature: exec.temperature.unwrap_or(self.config.default_temperature),
                timeout_ms: exec.timeout_ms,
            })
            .await?;
        trace.tokens_used = Some(completion.usage.total());
        let outputs = extract_json_object(&completion.text)?;

        self.enter(request, InvocationStage::ValidatingOutput);
        trace.warnings.extend(validate_outputs(&def, &outputs));
        if let Some(Value::Array(reported)) = outputs.get("warnings") {
            trace
                .warnings
                .extend(reported.iter().filter_map(Value::as_str).map(String::from));
        }

        Ok(outputs)
    }

    /// Returns the binding's execution overrides. No binding means enabled.
    async fn check_enablement(
        &self,
        request: &InvocationRequest,
    ) -> Result<ExecutionConfig, SkillError> {
        let binding = self
            .bindings
            .get_binding(&request.org_id, request.actor_id.as_deref(), &request.skill)
            .await
            .map_err(|e| SkillError::System(format!("Failed to check skill binding: {}", e)))?;

        match binding {
            Some(b) if !b.enabled => Err(SkillError::Permission(format!(
                "Skill {} is not enabled for organization {}",
                request.skill, request.org_id
            ))),
            Some(b) => Ok(ExecutionConfig::from_overrides(&b.config)),
            None => Ok(ExecutionConfig::default()),
        }
    }

    fn check_dependencies(&self, def: &SkillDefinition, trace: &mut Trace) -> Result<(), SkillError> {
        for dep in &def.dependencies {
            if self.resolve(&dep.skill, &dep.version).is_ok() {
                continue;
            }
            if dep.required {
                return Err(SkillError::Dependency(format!(
                    "Required dependency {}@{} not found",
                    dep.skill, dep.version
                )));
            }
            log::warn!(
                "Optional dependency {}@{} of {} not found",
                dep.skill,
                dep.version,
                def.key()
            );
            trace.warnings.push(format!(
                "Optional dependency {}@{} not found",
                dep.skill, dep.version
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SkillEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillEngine")
            .field("config", &self.config)
            .field("definitions", &self.definitions.describe())
            .field("backend", &self.backend.provider())
            .field("skills", &self.registry.len())
            .finish()
    }
}

/// Builder for [`SkillEngine`].
///
/// Bindings and audit default to an in-memory store: every skill enabled,
/// history kept for the life of the process.
pub struct SkillEngineBuilder {
    config: EngineConfig,
    definitions: Arc<dyn DefinitionStore>,
    backend: Arc<dyn CompletionBackend>,
    bindings: Option<Arc<dyn BindingStore>>,
    audit_store: Option<Arc<dyn AuditStore>>,
}

impl SkillEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bindings(mut self, bindings: Arc<dyn BindingStore>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn audit_store(mut self, audit_store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(audit_store);
        self
    }

    pub fn build(self) -> SkillEngine {
        let fallback = Arc::new(MemoryStore::new());
        let bindings: Arc<dyn BindingStore> = match self.bindings {
            Some(bindings) => bindings,
            None => fallback.clone(),
        };
        let audit_store: Arc<dyn AuditStore> = match self.audit_store {
            Some(store) => store,
            None => fallback,
        };

        SkillEngine {
            registry: SkillRegistry::new(),
            cache: SkillCache::new(self.config.cache_enabled),
            compiler: PromptCompiler::new(self.config.compiler),
            audit: AuditRecorder::new(audit_store, self.config.audit_mode),
            definitions: self.definitions,
            bindings,
            backend: self.backend,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::ScriptedBackend;
    use crate::store::Binding;
    use serde_json::json;

    const PITCH: &str = r#"
name: pitch_draft
version: "1.0.0"
description: Draft pitch emails
inputs:
  - name: track
    type: object
    required: true
  - name: tone
    type: string
    required: true
    validation:
      enum: [warm, formal]
  - name: note
    type: string
outputs:
  - name: drafts
    type: array
  - name: confidence
    type: number
rules:
  - id: r1
    description: Never invent chart positions
    priority: critical
prompt:
  system: You write pitch emails.
  user: "Track: {{track}}\nTone: {{tone}}\nNote: {{note}}"
"#;

    struct Harness {
        store: Arc<MemoryStore>,
        backend: Arc<ScriptedBackend>,
        engine: SkillEngine,
    }

    fn harness_with(backend: ScriptedBackend, config: EngineConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(backend);
        let engine = SkillEngine::builder(store.clone(), backend.clone())
            .bindings(store.clone())
            .audit_store(store.clone())
            .config(config)
            .build();
        Harness {
            store,
            backend,
            engine,
        }
    }

    fn inline() -> EngineConfig {
        EngineConfig {
            audit_mode: AuditMode::Inline,
            ..Default::default()
        }
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        let h = harness_with(backend, inline());
        h.engine
            .register(SkillDefinition::from_yaml(PITCH).unwrap())
            .unwrap();
        h
    }

    fn skill(yaml: &str) -> SkillDefinition {
        SkillDefinition::from_yaml(yaml).unwrap()
    }

    fn pitch_request() -> InvocationRequest {
        InvocationRequest::new("pitch_draft", "org-1")
            .arg("track", json!({"title": "Night Drive"}))
            .arg("tone", json!("warm"))
    }

    const GOOD_REPLY: &str = "Here you go:\n```json\n{\"drafts\": [\"Hi!\"], \"confidence\": 0.82}\n```";

    #[tokio::test]
    async fn test_successful_invocation_envelope() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 100, 40));
        let result = h.engine.invoke(pitch_request()).await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.outputs["drafts"], json!(["Hi!"]));
        assert_eq!(result.metadata.tokens_used, Some(140));
        assert_eq!(result.metadata.confidence, Some(0.82));
        assert_eq!(result.metadata.version.as_deref(), Some("1.0.0"));
        assert_eq!(result.metadata.model.as_deref(), Some(DEFAULT_MODEL));
        assert!(result.metadata.warnings.is_empty());
        assert!(result.errors.is_none());
    }

    #[tokio::test]
    async fn test_backend_receives_compiled_prompt_and_defaults() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        h.engine.invoke(pitch_request()).await;

        let requests = h.backend.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert!(req.system_text.starts_with("You write pitch emails."));
        assert!(req
            .system_text
            .contains("\n\nCRITICAL RULES:\n- Never invent chart positions\n"));
        assert!(req.user_text.contains("\"title\": \"Night Drive\""));
        assert!(req.user_text.contains("Tone: \"warm\""));
        // No `note` argument: the placeholder stays.
        assert!(req.user_text.contains("Note: {{note}}"));
        assert_eq!(req.max_tokens, 1024);
        assert!((req.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_latest_resolution_is_numeric() {
        let h = harness_with(ScriptedBackend::new().reply("{}", 0, 0), inline());
        for v in ["1.2.0", "2.0.0", "1.10.0"] {
            h.engine
                .register(skill(&format!("name: ver\nversion: \"{}\"\n", v)))
                .unwrap();
        }
        let result = h.engine.invoke(InvocationRequest::new("ver", "org")).await;
        assert!(result.success);
        assert_eq!(result.metadata.version.as_deref(), Some("2.0.0"));

        let result = h
            .engine
            .invoke(InvocationRequest::new("ver", "org").version("1.10.0"))
            .await;
        assert_eq!(result.metadata.version.as_deref(), Some("1.10.0"));
    }

    #[tokio::test]
    async fn test_missing_required_inputs_fail_fast_on_first() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        let result = h
            .engine
            .invoke(InvocationRequest::new("pitch_draft", "org-1"))
            .await;

        assert!(!result.success);
        let errors = result.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "validation");
        assert_eq!(errors[0].field.as_deref(), Some("track"));
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_validation_error() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        let result = h
            .engine
            .invoke(pitch_request().arg("tone", json!(42)))
            .await;

        let errors = result.errors.unwrap();
        assert_eq!(errors[0].code, "validation");
        assert_eq!(errors[0].field.as_deref(), Some("tone"));
        assert_eq!(errors[0].rule, Some(crate::skills::error::ValidationRule::Type));
    }

    #[tokio::test]
    async fn test_enum_violation() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        let result = h
            .engine
            .invoke(pitch_request().arg("tone", json!("angry")))
            .await;
        let errors = result.errors.unwrap();
        assert_eq!(errors[0].rule, Some(crate::skills::error::ValidationRule::Enum));
    }

    #[tokio::test]
    async fn test_unknown_skill_and_version_are_not_found() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        let result = h.engine.invoke(InvocationRequest::new("nope", "org")).await;
        assert_eq!(result.error_code(), Some("not_found"));

        let result = h.engine.invoke(pitch_request().version("9.0.0")).await;
        assert_eq!(result.error_code(), Some("not_found"));

        let audit = h.store.audit_records();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].version, "latest");
        assert_eq!(audit[1].version, "9.0.0");
    }

    #[tokio::test]
    async fn test_idempotent_registration_keeps_latest_body() {
        let h = harness_with(ScriptedBackend::new().reply("{}", 0, 0), inline());
        h.engine
            .register(skill("name: dup\nversion: \"1.0.0\"\ndescription: old\n"))
            .unwrap();
        h.engine.describe("dup", &VersionToken::Latest).unwrap();
        h.engine
            .register(skill("name: dup\nversion: \"1.0.0\"\ndescription: new\n"))
            .unwrap();

        assert_eq!(h.engine.registry().len(), 1);
        let def = h.engine.describe("dup", &VersionToken::Latest).unwrap();
        assert_eq!(def.description, "new");
    }

    #[tokio::test]
    async fn test_missing_outputs_are_warnings() {
        let h = harness(
            ScriptedBackend::new().reply(r#"{"subject": "x", "warnings": ["short track"]}"#, 5, 5),
        );
        let result = h.engine.invoke(pitch_request()).await;

        assert!(result.success);
        let warnings = &result.metadata.warnings;
        assert!(warnings
            .iter()
            .any(|w| w == "Expected output \"drafts\" not found in skill result"));
        assert!(warnings.iter().any(|w| w == "short track"));
        assert_eq!(result.metadata.confidence, None);
    }

    #[tokio::test]
    async fn test_audit_failure_never_blocks() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        h.store.fail_audit(true);
        let result = h.engine.invoke(pitch_request()).await;
        assert!(result.success);
        assert!(h.store.audit_records().is_empty());
    }

    #[tokio::test]
    async fn test_audit_records_success_and_failure() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 10, 5));
        h.engine.invoke(pitch_request().actor("u1")).await;
        h.engine.invoke(InvocationRequest::new("pitch_draft", "org-1")).await;

        let audit = h.store.audit_records();
        assert_eq!(audit.len(), 2);
        assert!(audit[0].succeeded());
        assert_eq!(audit[0].actor_id.as_deref(), Some("u1"));
        assert_eq!(audit[0].tokens_used, Some(15));
        assert_eq!(audit[0].confidence, Some(0.82));
        assert_eq!(audit[0].inputs["tone"], json!("warm"));
        assert!(audit[0].outputs.is_some());

        assert!(!audit[1].succeeded());
        assert_eq!(audit[1].version, "1.0.0");
        assert!(audit[1].outputs.is_none());
        assert!(audit[1].error.as_deref().unwrap().contains("track"));
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let h = harness_with(ScriptedBackend::new().reply("{}", 0, 0), inline());
        h.engine
            .register(skill(
                "name: needs\nversion: \"1.0.0\"\ndependencies:\n  - name: helper\n    required: true\n",
            ))
            .unwrap();
        h.engine
            .register(skill(
                "name: wants\nversion: \"1.0.0\"\ndependencies:\n  - name: helper\n    required: false\n",
            ))
            .unwrap();

        let result = h.engine.invoke(InvocationRequest::new("needs", "org")).await;
        assert_eq!(result.error_code(), Some("dependency"));
        assert_eq!(h.backend.calls(), 0);

        let result = h.engine.invoke(InvocationRequest::new("wants", "org")).await;
        assert!(result.success);
        assert_eq!(result.metadata.warnings.len(), 1);
        assert!(result.metadata.warnings[0].contains("helper"));

        h.engine.register(skill("name: helper\nversion: \"0.1.0\"\n")).unwrap();
        let result = h.engine.invoke(InvocationRequest::new("needs", "org")).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_disabled_binding_denies() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        h.store
            .upsert_binding(Binding::new("org-1", "pitch_draft", false))
            .await
            .unwrap();

        let result = h.engine.invoke(pitch_request()).await;
        assert_eq!(result.error_code(), Some("permissions"));
        assert_eq!(h.backend.calls(), 0);
        assert_eq!(h.store.audit_records().len(), 1);

        // Other organizations are unaffected.
        let other = h
            .engine
            .invoke(InvocationRequest {
                org_id: "org-2".into(),
                ..pitch_request()
            })
            .await;
        assert!(other.success);
    }

    #[tokio::test]
    async fn test_actor_binding_overrides_org_binding() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        h.store
            .upsert_binding(Binding::new("org-1", "pitch_draft", false))
            .await
            .unwrap();
        h.store
            .upsert_binding(Binding::new("org-1", "pitch_draft", true).for_actor("vip"))
            .await
            .unwrap();

        assert!(h.engine.invoke(pitch_request().actor("vip")).await.success);
        assert_eq!(
            h.engine.invoke(pitch_request().actor("other")).await.error_code(),
            Some("permissions")
        );
    }

    #[tokio::test]
    async fn test_binding_config_overrides_model() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        let mut config = Map::new();
        config.insert("model".into(), json!("claude-3-5-sonnet-20241022"));
        config.insert("maxTokens".into(), json!(2048));
        h.store
            .upsert_binding(Binding::new("org-1", "pitch_draft", true).with_config(config))
            .await
            .unwrap();

        let result = h.engine.invoke(pitch_request()).await;
        assert_eq!(
            result.metadata.model.as_deref(),
            Some("claude-3-5-sonnet-20241022")
        );
        let req = &h.backend.requests()[0];
        assert_eq!(req.max_tokens, 2048);
        assert!((req.temperature - DEFAULT_TEMPERATURE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_skill_config_beats_engine_defaults() {
        let h = harness_with(ScriptedBackend::new().reply("{}", 0, 0), inline());
        h.engine
            .register(skill(
                "name: tuned\nversion: \"1.0.0\"\nconfig:\n  model: claude-3-opus-20240229\n  temperature: 0.2\n  timeoutMs: 5000\n",
            ))
            .unwrap();
        h.engine.invoke(InvocationRequest::new("tuned", "org")).await;

        let req = &h.backend.requests()[0];
        assert_eq!(req.model, "claude-3-opus-20240229");
        assert!((req.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(req.timeout_ms, Some(5000));
        assert_eq!(req.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_binding_store_failure_is_system_error() {
        let h = harness(ScriptedBackend::new().reply(GOOD_REPLY, 1, 1));
        h.store.fail_bindings(true);
        let result = h.engine.invoke(pitch_request()).await;
        assert_eq!(result.error_code(), Some("system"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_execution_error() {
        let h = harness(ScriptedBackend::new().fail(529, "overloaded"));
        let result = h.engine.invoke(pitch_request()).await;
        assert_eq!(result.error_code(), Some("execution"));
        let message = &result.errors.unwrap()[0].message;
        assert!(message.contains("LLM execution failed"));
        assert_eq!(h.backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_reply_without_json_is_execution_error() {
        let h = harness(ScriptedBackend::new().reply("Sorry, I can't help with that.", 30, 12));
        let result = h.engine.invoke(pitch_request()).await;
        assert_eq!(result.error_code(), Some("execution"));
        assert!(result.errors.unwrap()[0]
            .message
            .contains("No JSON output found"));
        assert_eq!(result.metadata.tokens_used, Some(42));
        assert_eq!(h.store.audit_records()[0].tokens_used, Some(42));
    }

    #[tokio::test]
    async fn test_cache_on_and_off_give_identical_results() {
        let mut results = Vec::new();
        for cache_enabled in [true, false] {
            let h = harness_with(
                ScriptedBackend::new().reply("{\"ok\": true}", 1, 1),
                EngineConfig {
                    cache_enabled,
                    ..inline()
                },
            );
            h.engine.register(skill("name: c\nversion: \"1.0.0\"\n")).unwrap();
            let first = h.engine.invoke(InvocationRequest::new("c", "org")).await;
            h.engine.register(skill("name: c\nversion: \"1.1.0\"\n")).unwrap();
            let second = h.engine.invoke(InvocationRequest::new("c", "org")).await;
            results.push((
                first.metadata.version,
                second.metadata.version,
                second.outputs,
            ));
            assert_eq!(h.engine.cache().is_enabled(), cache_enabled);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].1.as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_register_during_cache_fill_leaves_no_stale_latest() {
        let h = harness_with(ScriptedBackend::new(), inline());
        h.engine
            .register(skill("name: s\nversion: \"1.0.0\"\n"))
            .unwrap();

        // A register that starts while a `latest` fill is in flight must
        // wait for it and then invalidate what it wrote.
        std::thread::scope(|scope| {
            let mut writer = None;
            h.engine
                .registry()
                .resolve_with("s", &VersionToken::Latest, |def| {
                    writer = Some(scope.spawn(|| {
                        h.engine
                            .register(skill("name: s\nversion: \"1.1.0\"\n"))
                            .unwrap();
                    }));
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    h.engine
                        .cache()
                        .put("s", &VersionToken::Latest, Arc::clone(def));
                })
                .unwrap();
            writer.unwrap().join().unwrap();
        });

        assert!(h.engine.cache().get("s", &VersionToken::Latest).is_none());
        let def = h.engine.describe("s", &VersionToken::Latest).unwrap();
        assert_eq!(def.version.to_string(), "1.1.0");
    }

    #[tokio::test]
    async fn test_initialize_and_reload_from_store() {
        let h = harness_with(ScriptedBackend::new().reply("{}", 0, 0), inline());
        h.store.add_definition(skill("name: a\nversion: \"1.0.0\"\n"));
        h.store.add_definition(skill("name: a\nversion: \"1.1.0\"\n"));

        assert_eq!(h.engine.initialize().await.unwrap(), 2);
        assert_eq!(h.engine.list_skills()[0].latest, "1.1.0");

        h.store.fail_definitions(true);
        let err = h.engine.reload().await.unwrap_err();
        assert_eq!(err.code(), "system");
        assert!(h.engine.registry().contains("a"));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let h = harness_with(ScriptedBackend::new(), inline());
        let mut def = skill("name: bad\nversion: \"1.0.0\"\n");
        def.name = " ".into();
        assert_eq!(h.engine.register(def).unwrap_err().code(), "system");
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_many_runs_independently() {
        let h = harness(
            ScriptedBackend::new()
                .reply(GOOD_REPLY, 1, 1)
                .with_delay(std::time::Duration::from_millis(5)),
        );
        let results = h
            .engine
            .invoke_many(vec![
                pitch_request(),
                InvocationRequest::new("missing", "org-1"),
                pitch_request().actor("u2"),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error_code(), Some("not_found"));
        assert!(results[2].success);
        assert_eq!(h.backend.calls(), 2);
        assert_eq!(h.store.audit_records().len(), 3);
    }

    #[tokio::test]
    async fn test_garbled_anthropic_body_is_execution_error_and_audited() {
        use crate::llms::AnthropicBackend;
        use axum::{routing::post, Router};

        // Not JSON, and a two-byte character straddles the excerpt cut.
        let body = format!("x{}", "é".repeat(400));
        let app = Router::new().route("/v1/messages", post(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = Arc::new(MemoryStore::new());
        let backend =
            AnthropicBackend::new(Some("test-key".into())).with_base_url(format!("http://{}", addr));
        let engine = SkillEngine::builder(store.clone(), Arc::new(backend))
            .bindings(store.clone())
            .audit_store(store.clone())
            .config(inline())
            .build();
        engine.register(skill(PITCH)).unwrap();

        let result = engine.invoke(pitch_request()).await;
        assert_eq!(result.error_code(), Some("execution"));

        let audit = store.audit_records();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].succeeded());
    }
}
