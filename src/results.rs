//! Structured function results and run aggregation
//!
//! Functions report findings through `results` entries in their output
//! envelope. The aggregator collects them per invocation, assigns sequence
//! ids, classifies the overall run, and optionally persists one
//! `NNNN-<function>.yaml` file per invocation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KrmpackError, Result};

/// Result severity; ordering is by increasing urgency so `max()` yields the
/// overall run classification.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// One finding reported by a function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    /// Monotonic id assigned by the aggregator, not by the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl FunctionResult {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Results of one function invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResults {
    pub function: String,
    pub exit_code: i32,
    pub items: Vec<FunctionResult>,
}

impl InvocationResults {
    fn classification(&self) -> Option<Severity> {
        self.items.iter().map(|r| r.severity).max()
    }
}

/// Collects results across a whole run (render or eval).
#[derive(Debug, Default)]
pub struct ResultAggregator {
    invocations: Vec<InvocationResults>,
    next_sequence: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation's results, stamping sequence ids.
    pub fn record(
        &mut self,
        function: impl Into<String>,
        mut items: Vec<FunctionResult>,
        exit_code: i32,
    ) {
        for item in &mut items {
            item.sequence = Some(self.next_sequence);
            self.next_sequence += 1;
        }
        self.invocations.push(InvocationResults {
            function: function.into(),
            exit_code,
            items,
        });
    }

    /// Merge another aggregator's invocations (child package results).
    pub fn absorb(&mut self, other: ResultAggregator) {
        for invocation in other.invocations {
            self.record(invocation.function, invocation.items, invocation.exit_code);
        }
    }

    pub fn invocations(&self) -> &[InvocationResults] {
        &self.invocations
    }

    /// Overall run classification: `error > warning > info > none`.
    pub fn classification(&self) -> Option<Severity> {
        self.invocations
            .iter()
            .filter_map(InvocationResults::classification)
            .max()
    }

    /// All error-severity results, for lifting into `ValidationFailed`.
    pub fn errors(&self) -> Vec<FunctionResult> {
        self.invocations
            .iter()
            .flat_map(|inv| inv.items.iter())
            .filter(|r| r.severity == Severity::Error)
            .cloned()
            .collect()
    }

    /// Write one `NNNN-<function>.yaml` file per invocation.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| KrmpackError::FileWriteFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        for (i, invocation) in self.invocations.iter().enumerate() {
            let file_name = format!("{:04}-{}.yaml", i, sanitize(&invocation.function));
            let path = dir.join(file_name);
            let doc = ResultFile {
                api_version: "kpt.dev/v1".to_string(),
                kind: "FunctionResultList".to_string(),
                exit_code: invocation.exit_code,
                items: invocation.items.clone(),
            };
            let yaml = serde_yaml::to_string(&doc)?;
            std::fs::write(&path, yaml).map_err(|e| KrmpackError::file_write(&path, &e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultFile {
    api_version: String,
    kind: String,
    exit_code: i32,
    items: Vec<FunctionResult>,
}

/// Function names (image refs, command lines) are not filesystem-safe.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_serde_lowercase() {
        let yaml = serde_yaml::to_string(&Severity::Warning).unwrap();
        assert_eq!(yaml.trim(), "warning");
        let parsed: Severity = serde_yaml::from_str("error").unwrap();
        assert_eq!(parsed, Severity::Error);
    }

    #[test]
    fn test_sequence_ids_monotonic() {
        let mut agg = ResultAggregator::new();
        agg.record(
            "set-namespace",
            vec![FunctionResult::info("a"), FunctionResult::info("b")],
            0,
        );
        agg.record("kubeval", vec![FunctionResult::info("c")], 0);

        let sequences: Vec<usize> = agg
            .invocations()
            .iter()
            .flat_map(|inv| inv.items.iter())
            .filter_map(|r| r.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_classification_takes_max() {
        let mut agg = ResultAggregator::new();
        assert_eq!(agg.classification(), None);

        agg.record("a", vec![FunctionResult::info("fine")], 0);
        assert_eq!(agg.classification(), Some(Severity::Info));

        agg.record(
            "b",
            vec![FunctionResult {
                message: "bad".to_string(),
                severity: Severity::Error,
                ..Default::default()
            }],
            1,
        );
        assert_eq!(agg.classification(), Some(Severity::Error));
        assert_eq!(agg.errors().len(), 1);
    }

    #[test]
    fn test_write_to_dir_numbering() {
        let temp = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new();
        agg.record(
            "gcr.io/kpt-fn/set-namespace:v0.4",
            vec![FunctionResult::info("ok")],
            0,
        );
        agg.record("kubeval", vec![], 0);
        agg.write_to_dir(temp.path()).unwrap();

        assert!(temp
            .path()
            .join("0000-gcr.io-kpt-fn-set-namespace-v0.4.yaml")
            .exists());
        assert!(temp.path().join("0001-kubeval.yaml").exists());

        let content =
            std::fs::read_to_string(temp.path().join("0001-kubeval.yaml")).unwrap();
        assert!(content.contains("kind: FunctionResultList"));
    }
}
