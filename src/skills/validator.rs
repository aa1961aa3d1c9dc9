//! Contract validation for skill inputs and outputs.
//!
//! Input validation is fail-fast: fields are checked in declaration order
//! and the first violation is returned. Output validation never fails; a
//! missing declared field becomes a warning because model output is not
//! guaranteed to be perfectly shaped.

use regex::Regex;
use serde_json::{Map, Value};

use super::error::{SkillError, ValidationRule};
use super::skill_def::{InputSpec, SkillDefinition, ValidationRules};

/// Name of a value's runtime JSON type. Arrays report `array` rather than
/// `object`.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check caller arguments against the declared inputs.
pub fn validate_inputs(def: &SkillDefinition, args: &Map<String, Value>) -> Result<(), SkillError> {
    for spec in &def.inputs {
        let Some(value) = args.get(&spec.name) else {
            if spec.required {
                return Err(SkillError::validation(
                    &spec.name,
                    ValidationRule::Required,
                    format!("Required input \"{}\" is missing", spec.name),
                ));
            }
            continue;
        };

        validate_field(spec, value)?;
    }
    Ok(())
}

fn validate_field(spec: &InputSpec, value: &Value) -> Result<(), SkillError> {
    let actual = json_type_name(value);
    if actual != spec.param_type.as_str() {
        return Err(SkillError::validation(
            &spec.name,
            ValidationRule::Type,
            format!(
                "Input \"{}\" must be of type {}, got {}",
                spec.name, spec.param_type, actual
            ),
        ));
    }

    match &spec.validation {
        Some(rules) => apply_rules(&spec.name, rules, value),
        None => Ok(()),
    }
}

fn apply_rules(field: &str, rules: &ValidationRules, value: &Value) -> Result<(), SkillError> {
    if let Some(len) = value_length(value) {
        if let Some(min) = rules.min_length {
            if len < min {
                return Err(SkillError::validation(
                    field,
                    ValidationRule::MinLength,
                    format!("Input \"{}\" must have length >= {}, got {}", field, min, len),
                ));
            }
        }
        if let Some(max) = rules.max_length {
            if len > max {
                return Err(SkillError::validation(
                    field,
                    ValidationRule::MaxLength,
                    format!("Input \"{}\" must have length <= {}, got {}", field, max, len),
                ));
            }
        }
    }

    if let Some(pattern) = &rules.pattern {
        let re = Regex::new(pattern).map_err(|e| {
            SkillError::validation(
                field,
                ValidationRule::Pattern,
                format!("Input \"{}\" has an unusable pattern: {}", field, e),
            )
        })?;
        let text = coerce_to_string(value);
        if !re.is_match(&text) {
            return Err(SkillError::validation(
                field,
                ValidationRule::Pattern,
                format!("Input \"{}\" does not match pattern {}", field, pattern),
            ));
        }
    }

    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|candidate| candidate == value) {
            return Err(SkillError::validation(
                field,
                ValidationRule::Enum,
                format!(
                    "Input \"{}\" must be one of {}",
                    field,
                    Value::Array(allowed.clone())
                ),
            ));
        }
    }

    Ok(())
}

/// Length in characters for strings, elements for arrays.
fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare a produced result against the declared outputs.
///
/// Returns one warning per missing field; each is also logged.
pub fn validate_outputs(def: &SkillDefinition, outputs: &Map<String, Value>) -> Vec<String> {
    def.outputs
        .iter()
        .filter(|spec| !outputs.contains_key(&spec.name))
        .map(|spec| {
            let warning = format!(
                "Expected output \"{}\" not found in skill result",
                spec.name
            );
            log::warn!("[{}] {}", def.key(), warning);
            warning
        })
        .collect()
}
