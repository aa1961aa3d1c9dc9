//! Invocation request / result envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{SkillError, ValidationRule};
use super::version::VersionToken;

/// A caller's request to run one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(alias = "capabilityName", alias = "name")]
    pub skill: String,
    #[serde(default)]
    pub version: VersionToken,
    #[serde(alias = "orgScope", alias = "orgId")]
    pub org_id: String,
    #[serde(default, alias = "actorId")]
    pub actor_id: Option<String>,
    #[serde(default, alias = "args", alias = "inputs")]
    pub arguments: Map<String, Value>,
}

impl InvocationRequest {
    pub fn new(skill: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            version: VersionToken::Latest,
            org_id: org_id.into(),
            actor_id: None,
            arguments: Map::new(),
        }
    }

    pub fn version(mut self, version: impl Into<VersionToken>) -> Self {
        self.version = version.into();
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// One entry of [`InvocationResult::errors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<ValidationRule>,
}

impl From<&SkillError> for ErrorDetail {
    fn from(err: &SkillError) -> Self {
        ErrorDetail {
            code: err.code().to_string(),
            message: err.to_string(),
            field: err.field().map(String::from),
            rule: err.rule(),
        }
    }
}

/// Timing, cost and diagnostics of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationMetadata {
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub skill: String,
    /// Resolved version, when resolution got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Outcome of [`super::engine::SkillEngine::invoke`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    pub metadata: InvocationMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDetail>>,
}

impl InvocationResult {
    pub fn succeeded(outputs: Map<String, Value>, metadata: InvocationMetadata) -> Self {
        Self {
            success: true,
            outputs,
            metadata,
            errors: None,
        }
    }

    pub fn failed(error: &SkillError, metadata: InvocationMetadata) -> Self {
        Self {
            success: false,
            outputs: Map::new(),
            metadata,
            errors: Some(vec![ErrorDetail::from(error)]),
        }
    }

    /// Code of the first error, if the invocation failed.
    pub fn error_code(&self) -> Option<&str> {
        self.errors
            .as_ref()
            .and_then(|errs| errs.first())
            .map(|e| e.code.as_str())
    }
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStage {
    Pending,
    CheckingEnablement,
    Resolving,
    Validating,
    CheckingDependencies,
    Compiling,
    Invoking,
    ValidatingOutput,
    Auditing,
    Succeeded,
    Failed,
}

impl InvocationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStage::Pending => "pending",
            InvocationStage::CheckingEnablement => "checking_enablement",
            InvocationStage::Resolving => "resolving",
            InvocationStage::Validating => "validating",
            InvocationStage::CheckingDependencies => "checking_dependencies",
            InvocationStage::Compiling => "compiling",
            InvocationStage::Invoking => "invoking",
            InvocationStage::ValidatingOutput => "validating_output",
            InvocationStage::Auditing => "auditing",
            InvocationStage::Succeeded => "succeeded",
            InvocationStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationStage::Succeeded | InvocationStage::Failed)
    }
}

impl fmt::Display for InvocationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
