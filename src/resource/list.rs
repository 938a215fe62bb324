//! The ResourceList envelope exchanged with KRM functions
//!
//! This module handles:
//! - Serializing the function input (items + optional functionConfig)
//! - Parsing function output envelopes and embedded results
//! - Reading bare multi-document streams (stdin input, unwrap output)

use serde_yaml::{Mapping, Value};

use crate::error::{KrmpackError, Result};
use crate::resource::Resource;
use crate::results::FunctionResult;

pub const RESOURCE_LIST_API_VERSION: &str = "config.kubernetes.io/v1";
pub const RESOURCE_LIST_KIND: &str = "ResourceList";

/// The function I/O envelope.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    pub items: Vec<Resource>,
    pub function_config: Option<Resource>,
    pub results: Vec<FunctionResult>,
}

impl ResourceList {
    pub fn new(items: Vec<Resource>) -> Self {
        Self {
            items,
            function_config: None,
            results: Vec::new(),
        }
    }

    pub fn with_function_config(mut self, config: Option<Resource>) -> Self {
        self.function_config = config;
        self
    }

    /// Serialize the envelope for a function's stdin.
    pub fn to_yaml(&self) -> Result<String> {
        let mut envelope = Mapping::new();
        envelope.insert(
            Value::String("apiVersion".to_string()),
            Value::String(RESOURCE_LIST_API_VERSION.to_string()),
        );
        envelope.insert(
            Value::String("kind".to_string()),
            Value::String(RESOURCE_LIST_KIND.to_string()),
        );
        let items: Vec<Value> = self.items.iter().map(|r| r.body().clone()).collect();
        envelope.insert(Value::String("items".to_string()), Value::Sequence(items));
        if let Some(config) = &self.function_config {
            envelope.insert(
                Value::String("functionConfig".to_string()),
                config.body().clone(),
            );
        }
        Ok(serde_yaml::to_string(&Value::Mapping(envelope))?)
    }

    /// Parse an envelope (function stdout, or `eval -` stdin).
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        if kind != RESOURCE_LIST_KIND {
            return Err(KrmpackError::InputParse {
                path: "<resource list>".to_string(),
                line: 1,
                reason: format!("expected kind {RESOURCE_LIST_KIND}, got '{kind}'"),
            });
        }

        let mut items = Vec::new();
        if let Some(seq) = value.get("items").and_then(Value::as_sequence) {
            for (i, item) in seq.iter().enumerate() {
                let resource = Resource::from_value(item.clone()).ok_or_else(|| {
                    KrmpackError::InputParse {
                        path: "<resource list>".to_string(),
                        line: 1,
                        reason: format!("items[{i}] is not a KRM object"),
                    }
                })?;
                items.push(resource);
            }
        }

        let function_config = value
            .get("functionConfig")
            .and_then(|v| Resource::from_value(v.clone()));

        let results = match value.get("results") {
            Some(v) => serde_yaml::from_value(v.clone())?,
            None => Vec::new(),
        };

        Ok(Self {
            items,
            function_config,
            results,
        })
    }

    /// Parse either an envelope or a bare multi-document stream into items.
    pub fn parse_stream(text: &str) -> Result<Vec<Resource>> {
        let first: std::result::Result<Value, _> = serde_yaml::from_str(text);
        if let Ok(value) = &first {
            if value.get("kind").and_then(Value::as_str) == Some(RESOURCE_LIST_KIND) {
                return Ok(Self::parse(text)?.items);
            }
        }

        let mut items = Vec::new();
        for document in split_documents(text) {
            if document.trim().is_empty() {
                continue;
            }
            if let Some(resource) = Resource::parse_document(&document)? {
                items.push(resource);
            }
        }
        Ok(items)
    }

    /// Emit items as a bare multi-document stream (the `unwrap` output mode).
    pub fn to_multidoc(&self) -> Result<String> {
        let mut out = String::new();
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            out.push_str(&item.to_yaml()?);
        }
        Ok(out)
    }
}

/// Split a YAML stream on `---` document separators at column zero.
pub fn split_documents(text: &str) -> Vec<String> {
    split_documents_indexed(text)
        .into_iter()
        .map(|(_, doc)| doc)
        .collect()
}

/// Like [`split_documents`], but each document carries the 1-based line
/// number where it starts, for error reporting.
pub fn split_documents_indexed(text: &str) -> Vec<(usize, String)> {
    let mut documents = Vec::new();
    let mut current = String::new();
    let mut current_start = 1usize;
    for (i, line) in text.lines().enumerate() {
        if line == "---" || line.starts_with("--- ") {
            documents.push((current_start, std::mem::take(&mut current)));
            current_start = i + 2;
        } else if line == "..." {
            documents.push((current_start, std::mem::take(&mut current)));
            current_start = i + 2;
            break;
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        documents.push((current_start, current));
    }
    documents.retain(|(_, d)| !d.trim().is_empty());
    documents
}
