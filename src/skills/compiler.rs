//! Prompt compilation.
//!
//! Turns a definition's templates plus caller arguments into the concrete
//! system and user text sent to the backend. Compilation does no I/O and is
//! deterministic for a given `(definition, arguments, options)`.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::skill_def::{RulePriority, SkillDefinition};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder regex is valid")
});

/// Optional sections appended to the system text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Append non-critical rules under a `GUIDELINES:` heading.
    #[serde(default)]
    pub include_guidelines: bool,
    /// Append the definition's worked examples.
    #[serde(default)]
    pub include_examples: bool,
}

/// The rendered prompt pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPrompt {
    pub system_text: String,
    pub user_text: String,
}

/// Renders skill templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptCompiler {
    options: CompilerOptions,
}

impl PromptCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Compile `def` against `args`.
    pub fn compile(&self, def: &SkillDefinition, args: &Map<String, Value>) -> CompiledPrompt {
        CompiledPrompt {
            system_text: self.system_text(def),
            user_text: render_template(&def.prompt.user, args),
        }
    }

    fn system_text(&self, def: &SkillDefinition) -> String {
        let mut text = def.prompt.system.clone();

        let mut critical = def.critical_rules().peekable();
        if critical.peek().is_some() {
            text.push_str("\n\nCRITICAL RULES:\n");
            for rule in critical {
                let _ = writeln!(text, "- {}", rule.description);
            }
        }

        if self.options.include_guidelines {
            let mut others = def
                .rules
                .iter()
                .filter(|r| r.priority != RulePriority::Critical)
                .peekable();
            if others.peek().is_some() {
                text.push_str("\n\nGUIDELINES:\n");
                for rule in others {
                    let _ = writeln!(text, "- [{}] {}", rule.priority.as_str(), rule.description);
                }
            }
        }

        if self.options.include_examples && !def.prompt.examples.is_empty() {
            text.push_str("\n\nEXAMPLES:\n");
            for (i, example) in def.prompt.examples.iter().enumerate() {
                let _ = write!(
                    text,
                    "\nExample {}:\nInput:\n{}\nOutput:\n{}\n",
                    i + 1,
                    pretty(&example.input),
                    pretty(&example.output)
                );
            }
        }

        text
    }
}

/// Replace every `{{key}}` with the pretty-printed JSON of `args[key]`.
///
/// Placeholders without a matching argument are left as written. Runs as a
/// single pass, so substituted values are never re-scanned.
pub fn render_template(template: &str, args: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match args.get(&caps[1]) {
            Some(value) => pretty(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
