//! Skill definition types - the declarative schema for executable skills.
//!
//! A `SkillDefinition` is pure data: metadata, the typed input/output
//! contract, behavioral rules, prompt templates and execution settings.
//! Documents arrive in one of a closed set of shapes ([`SkillDocument`]) and
//! are converted and validated into a `SkillDefinition` before anything else
//! in the runtime sees them.
//!
//! # Example YAML
//!
//! ```yaml
//! skill:
//!   name: pitch_draft
//!   version: "1.2.0"
//!   description: "Draft a short pitch email"
//!   category: outreach
//!   tags: [email, pitch]
//!   inputs:
//!     - name: trackTitle
//!       type: string
//!       required: true
//!       validation: { min_length: 3, max_length: 100 }
//!   outputs:
//!     - name: drafts
//!       type: array
//!       description: "Candidate drafts"
//!   rules:
//!     - id: no_hype
//!       description: "Never invent chart positions"
//!       priority: critical
//!       kind: constraint
//!   prompt:
//!     system: "You write concise pitches."
//!     user: "Track: {{trackTitle}}"
//!   config:
//!     model: claude-3-5-haiku-20241022
//!     max_tokens: 1024
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DefinitionError;
use super::version::{SkillVersion, VersionToken};

// ============================================================================
// SkillDefinition
// ============================================================================

/// A named, versioned, declarative unit of behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    // --- Identity ---
    /// Stable identifier, unique together with `version`.
    #[serde(alias = "key")]
    pub name: String,
    /// Numeric version.
    pub version: SkillVersion,

    // --- Descriptive metadata ---
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    // --- Contract ---
    /// Declared parameters, checked in order.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Expected result fields. Advisory only.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,

    // --- Behavior ---
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default, alias = "promptTemplate")]
    pub prompt: PromptTemplate,
    #[serde(default, alias = "executionConfig")]
    pub config: Option<ExecutionConfig>,
}

impl SkillDefinition {
    /// Parse any supported document form from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::store::StoreError> {
        Ok(SkillDocument::from_yaml(yaml)?.into_definition()?)
    }

    /// Parse any supported document form from JSON text.
    pub fn from_json(json: &str) -> Result<Self, crate::store::StoreError> {
        Ok(SkillDocument::from_json(json)?.into_definition()?)
    }

    /// `name@version` key used in logs and cache entries.
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Look up a declared input by name.
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Rules marked `critical`, in declaration order.
    pub fn critical_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.priority == RulePriority::Critical)
    }

    /// Load-time structural checks.
    ///
    /// A definition that passes is safe to hand to the registry: names are
    /// present, inputs are unique, regex patterns compile and numeric
    /// settings are in range.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(DefinitionError::DuplicateInput(input.name.clone()));
            }
            if let Some(rules) = &input.validation {
                if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
                    if min > max {
                        return Err(DefinitionError::LengthBounds {
                            field: input.name.clone(),
                            min,
                            max,
                        });
                    }
                }
                if let Some(pattern) = &rules.pattern {
                    regex::Regex::new(pattern).map_err(|e| DefinitionError::InvalidPattern {
                        field: input.name.clone(),
                        reason: e.to_string(),
                    })?;
                }
            }
        }

        for dep in &self.dependencies {
            if dep.skill.trim().is_empty() {
                return Err(DefinitionError::EmptyDependency);
            }
            if dep.skill == self.name {
                return Err(DefinitionError::SelfDependency(self.name.clone()));
            }
        }

        if let Some(temp) = self.config.as_ref().and_then(|c| c.temperature) {
            if !temp.is_finite() || temp < 0.0 {
                return Err(DefinitionError::InvalidTemperature(temp));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Inputs / outputs
// ============================================================================

/// The JSON type of a parameter or result field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Object,
    Array,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_param_type() -> ParamType {
    ParamType::Object
}

/// A declared input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "validationRules", skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

/// Optional per-input constraints, applied in field order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, alias = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, alias = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

/// An expected field of the produced result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Rules
// ============================================================================

/// How strongly a rule is enforced in the compiled prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RulePriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl RulePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RulePriority::Critical => "critical",
            RulePriority::High => "high",
            RulePriority::Medium => "medium",
            RulePriority::Low => "low",
        }
    }
}

/// What sort of rule this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Constraint,
    #[default]
    Guideline,
    BestPractice,
}

/// A behavioral rule injected into the compiled prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: RulePriority,
    #[serde(default, alias = "type")]
    pub kind: RuleKind,
}

// ============================================================================
// Dependencies
// ============================================================================

fn default_true() -> bool {
    true
}

/// Another skill that must be resolvable before this one runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(alias = "capabilityName", alias = "name")]
    pub skill: String,
    #[serde(default)]
    pub version: VersionToken,
    #[serde(default = "default_true")]
    pub required: bool,
}

// ============================================================================
// Prompt + execution config
// ============================================================================

/// Template text with `{{param}}` placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default, alias = "systemText")]
    pub system: String,
    #[serde(default, alias = "userText")]
    pub user: String,
    #[serde(default)]
    pub examples: Vec<PromptExample>,
}

/// A worked input/output pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExample {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
}

/// Backend settings passed through opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecutionConfig {
    /// Fill unset fields from `other`.
    pub fn or(&self, other: &ExecutionConfig) -> ExecutionConfig {
        ExecutionConfig {
            model: self.model.clone().or_else(|| other.model.clone()),
            temperature: self.temperature.or(other.temperature),
            max_tokens: self.max_tokens.or(other.max_tokens),
            timeout_ms: self.timeout_ms.or(other.timeout_ms),
        }
    }

    /// Read overrides out of a binding's free-form config map.
    pub fn from_overrides(config: &Map<String, Value>) -> ExecutionConfig {
        let get = |snake: &str, camel: &str| config.get(snake).or_else(|| config.get(camel));
        ExecutionConfig {
            model: get("model", "model")
                .and_then(Value::as_str)
                .map(String::from),
            temperature: get("temperature", "temperature").and_then(Value::as_f64),
            max_tokens: get("max_tokens", "maxTokens")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            timeout_ms: get("timeout_ms", "timeoutMs").and_then(Value::as_u64),
        }
    }
}

// ============================================================================
// Document forms
// ============================================================================

/// The closed set of document shapes a definition may arrive in.
///
/// The shape is picked from the top-level keys (`skill` for the wrapper,
/// `io` for a manifest, otherwise bare) and the document is then parsed as
/// that shape only, so errors name the actual problem.
#[derive(Debug)]
pub enum SkillDocument {
    /// `skill:` wrapper key around the definition.
    Wrapped { skill: SkillDefinition },
    /// Manifest shape with JSON-schema style `io` block.
    Manifest(ManifestDocument),
    /// Definition fields at the top level.
    Bare(SkillDefinition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentShape {
    Wrapped,
    Manifest,
    Bare,
}

impl DocumentShape {
    fn detect(has_key: impl Fn(&str) -> bool) -> Self {
        if has_key("skill") {
            DocumentShape::Wrapped
        } else if has_key("io") {
            DocumentShape::Manifest
        } else {
            DocumentShape::Bare
        }
    }
}

#[derive(Deserialize)]
struct WrappedDocument {
    skill: SkillDefinition,
}

impl SkillDocument {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let shape = DocumentShape::detect(|key| value.get(key).is_some());
        Self::parse(shape, value)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        let shape = DocumentShape::detect(|key| value.get(key).is_some());
        Self::parse(shape, value)
    }

    fn parse<'de, D>(shape: DocumentShape, document: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match shape {
            DocumentShape::Wrapped => SkillDocument::Wrapped {
                skill: WrappedDocument::deserialize(document)?.skill,
            },
            DocumentShape::Manifest => {
                SkillDocument::Manifest(ManifestDocument::deserialize(document)?)
            }
            DocumentShape::Bare => SkillDocument::Bare(SkillDefinition::deserialize(document)?),
        })
    }

    /// Convert into a validated definition.
    pub fn into_definition(self) -> Result<SkillDefinition, DefinitionError> {
        let def = match self {
            SkillDocument::Wrapped { skill } => skill,
            SkillDocument::Bare(def) => def,
            SkillDocument::Manifest(manifest) => manifest.into_definition(),
        };
        def.validate()?;
        Ok(def)
    }
}

/// Manifest form stored by relational backends.
///
/// ```json
/// {
///   "key": "pitch_draft",
///   "version": "1.0.0",
///   "io": {
///     "input_schema": {
///       "properties": { "track": { "type": "object" } },
///       "required": ["track"]
///     },
///     "output_schema": { "properties": { "drafts": { "type": "array" } } }
///   },
///   "prompt": { "system": "...", "user": "{{track}}" }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct ManifestDocument {
    pub key: String,
    pub version: SkillVersion,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub io: ManifestIo,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub prompt: PromptTemplate,
    #[serde(default)]
    pub config: Option<ExecutionConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestIo {
    #[serde(default)]
    pub input_schema: Option<ManifestSchema>,
    #[serde(default)]
    pub output_schema: Option<ManifestSchema>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestSchema {
    /// Properties in document order.
    #[serde(default, deserialize_with = "ordered_properties")]
    pub properties: Vec<(String, ManifestProperty)>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestProperty {
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "validationRules")]
    pub validation: Option<ValidationRules>,
}

/// Read a property map as an ordered list so declaration order drives
/// fail-fast validation.
fn ordered_properties<'de, D>(deserializer: D) -> Result<Vec<(String, ManifestProperty)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct PropertiesVisitor;

    impl<'de> serde::de::Visitor<'de> for PropertiesVisitor {
        type Value = Vec<(String, ManifestProperty)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of property name to schema")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((name, prop)) = map.next_entry::<String, ManifestProperty>()? {
                out.push((name, prop));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(PropertiesVisitor)
}

impl ManifestDocument {
    fn into_definition(self) -> SkillDefinition {
        let input_schema = self.io.input_schema.unwrap_or_default();
        let inputs = input_schema
            .properties
            .into_iter()
            .map(|(name, prop)| InputSpec {
                required: input_schema.required.contains(&name),
                name,
                param_type: prop.param_type,
                description: prop.description,
                validation: prop.validation,
            })
            .collect();
        let outputs = self
            .io
            .output_schema
            .unwrap_or_default()
            .properties
            .into_iter()
            .map(|(name, prop)| OutputSpec {
                name,
                param_type: prop.param_type,
                description: prop.description,
            })
            .collect();

        SkillDefinition {
            name: self.key,
            version: self.version,
            description: self.description,
            category: self.category,
            tags: self.tags,
            inputs,
            outputs,
            rules: self.rules,
            dependencies: self.dependencies,
            prompt: self.prompt,
            config: self.config,
        }
    }
}
