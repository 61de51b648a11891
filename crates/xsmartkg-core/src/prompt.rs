//! Extraction prompt templates with `{name}` placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A placeholder declared by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// A reusable extraction prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt_content: String,
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

impl PromptTemplate {
    /// Values pre-filled from the declared defaults. Empty defaults are skipped.
    pub fn defaults(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .filter_map(|v| {
                v.default
                    .as_ref()
                    .filter(|d| !d.is_empty())
                    .map(|d| (v.name.clone(), d.clone()))
            })
            .collect()
    }

    /// Fill every `{name}` occurrence. `values` override the defaults;
    /// placeholders with no value are left as written.
    pub fn render(&self, values: &BTreeMap<String, String>) -> String {
        let mut merged = self.defaults();
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut prompt = self.prompt_content.clone();
        for (name, value) in &merged {
            prompt = prompt.replace(&format!("{{{}}}", name), value);
        }

        let unfilled: Vec<&str> = self
            .variables
            .iter()
            .map(|v| v.name.as_str())
            .filter(|name| !merged.contains_key(*name))
            .collect();
        if !unfilled.is_empty() {
            tracing::debug!(template = %self.name, ?unfilled, "Template variables left unfilled");
        }
        prompt
    }
}
