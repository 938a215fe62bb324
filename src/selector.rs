//! Resource selectors for scoping function input
//!
//! A selector is a predicate over resource identity, annotations and labels.
//! Empty fields are wildcards; matching is AND across fields of one selector
//! and OR across a list of selectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KrmpackError, Result};
use crate::resource::Resource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.api_version.is_empty()
            && self.kind.is_empty()
            && self.name.is_empty()
            && self.namespace.is_empty()
            && self.annotations.is_empty()
            && self.labels.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(KrmpackError::SelectorInvalid {
                reason: "selector constrains no fields".to_string(),
            });
        }
        Ok(())
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        if !self.api_version.is_empty() && resource.api_version() != self.api_version {
            return false;
        }
        if !self.kind.is_empty() && resource.kind() != self.kind {
            return false;
        }
        if !self.name.is_empty() && resource.name() != self.name {
            return false;
        }
        if !self.namespace.is_empty() && resource.namespace() != self.namespace {
            return false;
        }
        for (key, value) in &self.annotations {
            if resource.annotation(key) != Some(value.as_str()) {
                return false;
            }
        }
        for (key, value) in &self.labels {
            if resource.label(key) != Some(value.as_str()) {
                return false;
            }
        }
        true
    }
}

pub fn validate_selectors(include: &[Selector], exclude: &[Selector]) -> Result<()> {
    for selector in include.iter().chain(exclude) {
        selector.validate()?;
    }
    Ok(())
}

/// Partition `items` into the subset a function sees and the rest.
///
/// A resource is matched when it satisfies at least one include selector (or
/// include is empty) and no exclude selector. Relative order is preserved in
/// both halves.
pub fn select(
    items: Vec<Resource>,
    include: &[Selector],
    exclude: &[Selector],
) -> (Vec<Resource>, Vec<Resource>) {
    if include.is_empty() && exclude.is_empty() {
        return (items, Vec::new());
    }

    let mut matched = Vec::new();
    let mut rest = Vec::new();
    for resource in items {
        let included = include.is_empty() || include.iter().any(|s| s.matches(&resource));
        let excluded = exclude.iter().any(|s| s.matches(&resource));
        if included && !excluded {
            matched.push(resource);
        } else {
            rest.push(resource);
        }
    }
    (matched, rest)
}
