//! Template file loading
//!
//! The YAML format: a `version` plus named `templates`, each with a
//! Handlebars body and optional example input/output used in tests.

use serde::Deserialize;
use std::collections::HashMap;

use crate::RenderError;

/// Built-in template set compiled into the crate
pub const BUILTIN_TEMPLATES: &str = include_str!("../templates/summary-templates.yaml");

/// Top-level templates file structure
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesFile {
    pub version: String,
    pub templates: HashMap<String, Template>,
}

/// A single template definition
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub example: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<String>,
}

impl TemplatesFile {
    /// Load templates from a YAML file
    pub fn load(path: &str) -> Result<Self, RenderError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Template(format!("failed to read {}: {}", path, e)))?;
        Self::from_yaml(&content)
    }

    /// Parse templates from YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, RenderError> {
        serde_yaml::from_str(yaml).map_err(|e| RenderError::Template(e.to_string()))
    }

    pub fn builtin() -> Result<Self, RenderError> {
        Self::from_yaml(BUILTIN_TEMPLATES)
    }

    /// Overlay another file; its templates replace same-named ones
    pub fn merged(mut self, other: TemplatesFile) -> Self {
        self.templates.extend(other.templates);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// List all template names
    pub fn list_templates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
