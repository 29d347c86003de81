//! Tool definitions and structured usage guidance.
//!
//! Tools are advertised to the model in the system prompt rather than via a
//! native function-calling API, so the description text carries all of the
//! guidance. [`ToolSpec`] assembles that text from structured fields
//! (purpose, when to use, when not to use, examples) and produces the
//! [`ToolDef`] the registry exports.

use schemars::JsonSchema;
use serde::Serialize;

/// Name, description, and JSON Schema of one tool.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Top-level parameter names declared by the schema.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Prompt listing entry: `- name: description` plus an argument hint.
    pub fn to_prompt_entry(&self) -> String {
        let mut entry = format!("- {}: {}", self.name, self.description);
        let params = self.parameter_names();
        if !params.is_empty() {
            entry.push_str(&format!("\n  Arguments: {}", params.join(", ")));
        }
        entry
    }
}

/// Generate a JSON Schema for `T`.
///
/// Falls back to an empty object schema if serialization fails.
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

/// A structured tool specification with usage guidance.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    /// One-sentence imperative purpose.
    pub purpose: String,
    pub when_to_use: Option<String>,
    /// Prevents confusion between similar tools.
    pub when_not_to_use: Option<String>,
    pub parameters: serde_json::Value,
    /// `(call, expected behaviour)` pairs.
    pub examples: Vec<(String, String)>,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>, purpose: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            spec: ToolSpec {
                name: name.into(),
                purpose: purpose.into(),
                when_to_use: None,
                when_not_to_use: None,
                parameters: serde_json::json!({"type": "object", "properties": {}}),
                examples: Vec::new(),
            },
        }
    }

    /// Render the description text shown to the model.
    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if let Some(when) = &self.when_to_use {
            desc.push_str(&format!("\n  When to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            desc.push_str(&format!("\n  When NOT to use: {when_not}"));
        }
        for (input, output) in &self.examples {
            desc.push_str(&format!("\n  Example: {input} -> {output}"));
        }
        desc
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn parameters(mut self, params: serde_json::Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Derive the parameter schema from a `schemars::JsonSchema` type, so the
    /// schema and deserialization logic cannot diverge.
    pub fn parameters_for<T: JsonSchema>(self) -> Self {
        self.parameters(json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push((input.into(), output.into()));
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }

    /// Shortcut for `.build().to_tool_def()`.
    pub fn to_tool_def(self) -> ToolDef {
        self.spec.to_tool_def()
    }
}
