//! In-memory KRM resource model
//!
//! This module handles:
//! - Typed access to `apiVersion`/`kind`/`metadata` over an opaque YAML body
//! - The reserved location annotations that tie a resource to its file
//! - Comment preservation across read → transform → write

pub mod comments;
pub mod list;

use serde_yaml::{Mapping, Value};

use crate::error::{KrmpackError, Result};
use comments::CommentMap;

/// Annotation carrying the package-relative file path of a resource.
pub const PATH_ANNOTATION: &str = "internal.config.kubernetes.io/path";

/// Annotation carrying the 0-based document index within that file.
pub const INDEX_ANNOTATION: &str = "internal.config.kubernetes.io/index";

pub const KPTFILE_KIND: &str = "Kptfile";

/// Identity tuple used to correlate resources across function input/output
/// and across the three sides of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}/{}", self.api_version, self.kind, self.name)
        } else {
            write!(
                f,
                "{}/{}/{}/{}",
                self.api_version, self.kind, self.namespace, self.name
            )
        }
    }
}

/// A single KRM object: structured YAML body plus the comments that were
/// attached to it in its source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    body: Value,
    comments: CommentMap,
}

impl Resource {
    /// Wrap an already-parsed YAML document. Returns `None` when the document
    /// is not a KRM object (missing `apiVersion` or `kind`).
    pub fn from_value(body: Value) -> Option<Self> {
        let is_krm = body.get("apiVersion").and_then(Value::as_str).is_some()
            && body.get("kind").and_then(Value::as_str).is_some();
        is_krm.then(|| Self {
            body,
            comments: CommentMap::default(),
        })
    }

    /// Parse one YAML document. `None` when it parses but is not KRM.
    pub fn parse_document(text: &str) -> Result<Option<Self>> {
        let body: Value = serde_yaml::from_str(text)?;
        Ok(Self::from_value(body).map(|mut r| {
            r.comments = comments::extract(text);
            r
        }))
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    pub fn comments(&self) -> &CommentMap {
        &self.comments
    }

    pub fn set_comments(&mut self, comments: CommentMap) {
        self.comments = comments;
    }

    pub fn api_version(&self) -> &str {
        self.body
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.body
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.body
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.body
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn id(&self) -> ResourceId {
        ResourceId {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }

    pub fn is_manifest(&self) -> bool {
        self.kind() == KPTFILE_KIND
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.body
            .get("metadata")?
            .get("annotations")?
            .get(key)?
            .as_str()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.body
            .get("metadata")?
            .get("labels")?
            .get(key)?
            .as_str()
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let metadata = ensure_mapping_value(&mut self.body, "metadata");
        let annotations = ensure_mapping(metadata, "annotations");
        annotations.insert(
            Value::String(key.to_string()),
            Value::String(value.to_string()),
        );
    }

    pub fn remove_annotation(&mut self, key: &str) {
        let Some(metadata) = self.body.get_mut("metadata") else {
            return;
        };
        let Some(annotations) = metadata
            .get_mut("annotations")
            .and_then(Value::as_mapping_mut)
        else {
            return;
        };
        annotations.remove(key);
        // An annotations map we emptied ourselves is dropped rather than
        // written back as `annotations: {}`.
        if annotations.is_empty() {
            if let Some(m) = metadata.as_mapping_mut() {
                m.remove("annotations");
            }
        }
    }

    /// Package-relative path this resource was read from (or assigned to).
    pub fn path(&self) -> Option<&str> {
        self.annotation(PATH_ANNOTATION)
    }

    /// Document index within the file; 0 when unannotated.
    pub fn index(&self) -> usize {
        self.annotation(INDEX_ANNOTATION)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_location(&mut self, path: &str, index: usize) {
        self.set_annotation(PATH_ANNOTATION, path);
        self.set_annotation(INDEX_ANNOTATION, &index.to_string());
    }

    /// Strip the reserved location annotations before final emission.
    pub fn strip_location(&mut self) {
        self.remove_annotation(INDEX_ANNOTATION);
        self.remove_annotation(PATH_ANNOTATION);
    }

    /// Body with the location annotations removed, for change comparison and
    /// final emission.
    pub fn body_without_location(&self) -> Value {
        let mut copy = self.clone();
        copy.strip_location();
        copy.body
    }

    /// Serialize to YAML with this resource's comments reattached.
    pub fn to_yaml(&self) -> Result<String> {
        let text = serde_yaml::to_string(&self.body)?;
        Ok(comments::attach(&text, &self.comments))
    }

    /// Serialize without the location annotations, comments reattached.
    pub fn to_yaml_stripped(&self) -> Result<String> {
        let body = self.body_without_location();
        let text = serde_yaml::to_string(&body)?;
        Ok(comments::attach(&text, &self.comments))
    }
}

fn ensure_mapping_value<'a>(value: &'a mut Value, key: &str) -> &'a mut Mapping {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    let map = match value.as_mapping_mut() {
        Some(m) => m,
        None => unreachable!("value was just coerced to a mapping"),
    };
    ensure_mapping(map, key)
}

fn ensure_mapping<'a>(map: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    if !matches!(map.get(key), Some(Value::Mapping(_))) {
        map.insert(
            Value::String(key.to_string()),
            Value::Mapping(Mapping::new()),
        );
    }
    match map.get_mut(key) {
        Some(Value::Mapping(m)) => m,
        _ => unreachable!("mapping was just inserted"),
    }
}
