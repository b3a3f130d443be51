//! MCP Prompt Templates
//!
//! Named message templates with `{{argument}}` placeholders.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

/// A prompt argument definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// A prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A prompt message (the actual content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: PromptContent,
}

/// Prompt content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptContent {
    Text { text: String },
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Template for generating prompt messages.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

/// Prompt registry, fixed for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, (Prompt, PromptTemplate)>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt. A name that is already taken is refused.
    pub fn register(&mut self, prompt: Prompt, template: PromptTemplate) -> Result<()> {
        if self.prompts.contains_key(&prompt.name) {
            return Err(Error::Config(format!("duplicate prompt name: {}", prompt.name)));
        }
        self.prompts.insert(prompt.name.clone(), (prompt, template));
        Ok(())
    }

    /// List all prompts, ordered by name.
    pub fn list(&self) -> Vec<Prompt> {
        self.prompts.values().map(|(p, _)| p.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Resolve a prompt with its arguments substituted.
    ///
    /// Declared arguments that were not supplied become empty strings;
    /// a missing required argument is an error.
    pub fn get(&self, name: &str, arguments: &HashMap<String, String>) -> Result<GetPromptResult> {
        let (prompt, template) = self
            .prompts
            .get(name)
            .ok_or_else(|| Error::PromptNotFound(name.to_string()))?;

        if let Some(missing) = prompt
            .arguments
            .iter()
            .find(|arg| arg.required && !arguments.contains_key(&arg.name))
        {
            return Err(Error::InvalidArguments(format!(
                "missing required argument: {}",
                missing.name
            )));
        }

        let text = render(&template.template, prompt, arguments);

        Ok(GetPromptResult {
            description: Some(prompt.description.clone()),
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: PromptContent::Text { text },
            }],
        })
    }
}

/// Fill declared `{{name}}` placeholders in one pass over the template.
///
/// Substituted values are never scanned again; undeclared placeholders stay as written.
fn render(template: &str, prompt: &Prompt, arguments: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };

        let name = &after[..end];
        if prompt.arguments.iter().any(|arg| arg.name == name) {
            out.push_str(arguments.get(name).map(String::as_str).unwrap_or(""));
        } else {
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
