use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Frameworks, the operation types each supports, and the command run for
/// each pair. Loaded once at startup.
///
/// ```yaml
/// version: 1
/// workflow_template: cloudops-single-step
/// frameworks:
///   cdk:
///     sync: cdk deploy --require-approval never
///     diff: cdk diff
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowCatalog {
    pub version: u32,
    pub workflow_template: String,
    #[serde(default)]
    pub frameworks: BTreeMap<String, BTreeMap<String, String>>,
}

impl WorkflowCatalog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workflow catalog {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("invalid workflow catalog {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let catalog: Self = serde_yaml::from_str(raw)?;
        if catalog.workflow_template.is_empty() {
            anyhow::bail!("workflow_template must not be empty");
        }
        if catalog.frameworks.is_empty() {
            anyhow::bail!("at least one framework must be configured");
        }
        Ok(catalog)
    }

    pub fn has_framework(&self, framework: &str) -> bool {
        self.frameworks.contains_key(framework)
    }

    /// Command for `(framework, kind)`, if that pair is supported.
    pub fn command(&self, framework: &str, kind: &str) -> Option<&str> {
        self.frameworks
            .get(framework)?
            .get(kind)
            .map(String::as_str)
    }

    /// Operation types supported by `framework`, sorted.
    pub fn types(&self, framework: &str) -> Vec<&str> {
        self.frameworks
            .get(framework)
            .map(|types| types.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
