//! Skill runtime errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llms::BackendError;
use crate::store::StoreError;

use super::extract::ExtractError;

/// The declared rule an input argument violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationRule {
    /// A required argument is missing.
    #[serde(rename = "required")]
    Required,
    /// The argument has the wrong JSON type.
    #[serde(rename = "type")]
    Type,
    /// String or array shorter than `min_length`.
    #[serde(rename = "minLength")]
    MinLength,
    /// String or array longer than `max_length`.
    #[serde(rename = "maxLength")]
    MaxLength,
    /// Value does not match `pattern`.
    #[serde(rename = "pattern")]
    Pattern,
    /// Value is not one of the `enum` members.
    #[serde(rename = "enum")]
    Enum,
}

impl ValidationRule {
    /// Stable code reported to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRule::Required => "required",
            ValidationRule::Type => "type",
            ValidationRule::MinLength => "minLength",
            ValidationRule::MaxLength => "maxLength",
            ValidationRule::Pattern => "pattern",
            ValidationRule::Enum => "enum",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while resolving, validating or executing a skill.
///
/// Every variant maps to a stable error code (see [`SkillError::code`]) that
/// is surfaced in [`super::invocation::ErrorDetail`].
#[derive(Debug, Error)]
pub enum SkillError {
    /// Skill name or explicit version is not registered.
    #[error("Skill not found: {name}@{version}")]
    NotFound { name: String, version: String },

    /// An input argument is missing, mistyped, or breaks a declared rule.
    #[error("Validation failed for \"{field}\" ({rule}): {message}")]
    Validation {
        field: String,
        rule: ValidationRule,
        message: String,
    },

    /// Skill disabled for the calling scope.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// A required dependency could not be resolved.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Backend call failed or returned an unusable payload.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Initialization, reload, or collaborator failure of the runtime itself.
    #[error("System error: {0}")]
    System(String),
}

impl SkillError {
    /// Stable error code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            SkillError::NotFound { .. } => "not_found",
            SkillError::Validation { .. } => "validation",
            SkillError::Permission(_) => "permissions",
            SkillError::Dependency(_) => "dependency",
            SkillError::Execution(_) => "execution",
            SkillError::System(_) => "system",
        }
    }

    /// The offending input field, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            SkillError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The violated rule, for validation errors.
    pub fn rule(&self) -> Option<ValidationRule> {
        match self {
            SkillError::Validation { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub(crate) fn not_found(name: &str, version: impl fmt::Display) -> Self {
        SkillError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub(crate) fn validation(field: &str, rule: ValidationRule, message: impl Into<String>) -> Self {
        SkillError::Validation {
            field: field.to_string(),
            rule,
            message: message.into(),
        }
    }
}

impl From<StoreError> for SkillError {
    fn from(e: StoreError) -> Self {
        SkillError::System(e.to_string())
    }
}

impl From<BackendError> for SkillError {
    fn from(e: BackendError) -> Self {
        SkillError::Execution(format!("LLM execution failed: {}", e))
    }
}

impl From<ExtractError> for SkillError {
    fn from(e: ExtractError) -> Self {
        SkillError::Execution(e.to_string())
    }
}

/// Errors found while checking a definition at load time.
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("skill name must not be empty")]
    EmptyName,

    #[error("invalid version \"{0}\": expected dot-separated integers")]
    InvalidVersion(String),

    #[error("duplicate input \"{0}\"")]
    DuplicateInput(String),

    #[error("input \"{field}\" has an invalid pattern: {reason}")]
    InvalidPattern { field: String, reason: String },

    #[error("input \"{field}\" has min_length {min} greater than max_length {max}")]
    LengthBounds { field: String, min: usize, max: usize },

    #[error("dependency entry has an empty skill name")]
    EmptyDependency,

    #[error("skill \"{0}\" depends on itself")]
    SelfDependency(String),

    #[error("temperature {0} must be a finite, non-negative number")]
    InvalidTemperature(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(SkillError::not_found("x", "latest").code(), "not_found");
        assert_eq!(
            SkillError::validation("a", ValidationRule::Required, "missing").code(),
            "validation"
        );
        assert_eq!(SkillError::Permission("off".into()).code(), "permissions");
        assert_eq!(SkillError::Dependency("d".into()).code(), "dependency");
        assert_eq!(SkillError::Execution("e".into()).code(), "execution");
        assert_eq!(SkillError::System("s".into()).code(), "system");
    }

    #[test]
    fn test_validation_accessors() {
        let err = SkillError::validation("trackTitle", ValidationRule::MinLength, "too short");
        assert_eq!(err.field(), Some("trackTitle"));
        assert_eq!(err.rule(), Some(ValidationRule::MinLength));
        assert!(err.to_string().contains("minLength"));
    }

    #[test]
    fn test_validation_rule_serde_names() {
        let json = serde_json::to_string(&ValidationRule::MaxLength).unwrap();
        assert_eq!(json, "\"maxLength\"");
        let rule: ValidationRule = serde_json::from_str("\"type\"").unwrap();
        assert_eq!(rule, ValidationRule::Type);
    }
}
