//! Function declarations and their resolution
//!
//! This module handles:
//! - The `Function` entry of a Kptfile pipeline (image or exec, config source,
//!   selectors)
//! - Preflight validation (exactly one executor, one config source)
//! - Resolving the executor and the functionConfig resource

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{KrmpackError, Result};
use crate::resource::Resource;
use crate::selector::{validate_selectors, Selector};

/// Registry prepended to unqualified function images.
pub const DEFAULT_IMAGE_REGISTRY: &str = "gcr.io/kpt-fn";

/// Name of the ConfigMap synthesized from inline key/value config.
pub const SYNTHESIZED_CONFIG_NAME: &str = "function-input";

/// One function entry in a pipeline's mutators or validators list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Container functions may request network access; the caller must still
    /// allow it explicitly.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub network: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<Selector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<Selector>,
}

impl FunctionSpec {
    pub fn validate(&self) -> Result<()> {
        match (&self.image, &self.exec) {
            (Some(_), Some(_)) => {
                return Err(KrmpackError::InvalidFunctionSpec {
                    reason: "both 'image' and 'exec' are set".to_string(),
                })
            }
            (None, None) => {
                return Err(KrmpackError::InvalidFunctionSpec {
                    reason: "neither 'image' nor 'exec' is set".to_string(),
                })
            }
            _ => {}
        }
        if self.config_path.is_some() && !self.config_map.is_empty() {
            return Err(KrmpackError::InvalidFunctionSpec {
                reason: "both 'configPath' and 'configMap' are set".to_string(),
            });
        }
        if self.exec.is_some() && self.network {
            return Err(KrmpackError::InvalidFunctionSpec {
                reason: "'network' is only valid for container functions".to_string(),
            });
        }
        validate_selectors(&self.selectors, &self.exclude)?;
        Ok(())
    }

    /// Human-readable name for logs, results files and errors.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(image) = &self.image {
            // Last path segment without the tag reads best in results files
            let tail = image.rsplit('/').next().unwrap_or(image);
            return tail.split(':').next().unwrap_or(tail).to_string();
        }
        if let Some(exec) = &self.exec {
            let head = exec.split_whitespace().next().unwrap_or(exec);
            return Path::new(head)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| head.to_string());
        }
        "function".to_string()
    }
}

/// The closed set of executors.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorKind {
    Container { image: String },
    Exec { path: String, args: Vec<String> },
}

/// A declaration resolved against its package: executor plus functionConfig.
#[derive(Debug, Clone)]
pub struct ResolvedFunction {
    pub name: String,
    pub executor: ExecutorKind,
    pub config: Option<Resource>,
    pub network: bool,
    pub selectors: Vec<Selector>,
    pub exclude: Vec<Selector>,
}

/// Resolve a declaration: qualify/validate the executor and load the config.
pub fn resolve(spec: &FunctionSpec, package_dir: &Path) -> Result<ResolvedFunction> {
    spec.validate()?;

    let executor = if let Some(image) = &spec.image {
        let qualified = qualify_image(image);
        validate_image(&qualified)?;
        ExecutorKind::Container { image: qualified }
    } else if let Some(exec) = &spec.exec {
        let mut parts = split_command(exec)?;
        if parts.is_empty() {
            return Err(KrmpackError::InvalidExec {
                command: exec.clone(),
                reason: "empty command line".to_string(),
            });
        }
        let path = parts.remove(0);
        ExecutorKind::Exec { path, args: parts }
    } else {
        // validate() guarantees one executor is present
        unreachable!("function spec validated with no executor")
    };

    let config = if let Some(config_path) = &spec.config_path {
        Some(load_config_file(&package_dir.join(config_path))?)
    } else if !spec.config_map.is_empty() {
        Some(synthesize_config_map("ConfigMap", &spec.config_map))
    } else {
        None
    };

    Ok(ResolvedFunction {
        name: spec.display_name(),
        executor,
        config,
        network: spec.network,
        selectors: spec.selectors.clone(),
        exclude: spec.exclude.clone(),
    })
}

/// Load a functionConfig file; the first document must be a KRM object.
pub fn load_config_file(path: &Path) -> Result<Resource> {
    if !path.is_file() {
        return Err(KrmpackError::FunctionConfigNotFound {
            path: path.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|e| KrmpackError::file_read(path, &e))?;
    Resource::parse_document(&text)
        .map_err(|e| KrmpackError::InputParse {
            path: path.display().to_string(),
            line: 0,
            reason: e.to_string(),
        })?
        .ok_or_else(|| KrmpackError::InputParse {
            path: path.display().to_string(),
            line: 0,
            reason: "function config is not a KRM object".to_string(),
        })
}

/// Synthesize a config resource from key/value data.
///
/// The kind defaults to `ConfigMap` but the eval CLI lets a bare leading arg
/// override it.
pub fn synthesize_config_map(kind: &str, data: &BTreeMap<String, String>) -> Resource {
    let mut metadata = Mapping::new();
    metadata.insert(
        Value::String("name".to_string()),
        Value::String(SYNTHESIZED_CONFIG_NAME.to_string()),
    );

    let mut data_map = Mapping::new();
    for (key, value) in data {
        data_map.insert(
            Value::String(key.clone()),
            Value::String(value.clone()),
        );
    }

    let mut body = Mapping::new();
    body.insert(
        Value::String("apiVersion".to_string()),
        Value::String("v1".to_string()),
    );
    body.insert(
        Value::String("kind".to_string()),
        Value::String(kind.to_string()),
    );
    body.insert(Value::String("metadata".to_string()), Value::Mapping(metadata));
    body.insert(Value::String("data".to_string()), Value::Mapping(data_map));

    match Resource::from_value(Value::Mapping(body)) {
        Some(resource) => resource,
        None => unreachable!("synthesized config always has apiVersion and kind"),
    }
}

/// Prefix the default registry when the image reference has no registry host.
pub fn qualify_image(image: &str) -> String {
    let first = image.split('/').next().unwrap_or_default();
    let has_registry = image.contains('/')
        && (first.contains('.') || first.contains(':') || first == "localhost");
    if has_registry {
        image.to_string()
    } else {
        format!("{DEFAULT_IMAGE_REGISTRY}/{image}")
    }
}

/// Permissive image-reference grammar: `registry/path/name[:tag][@digest]`.
pub fn validate_image(image: &str) -> Result<()> {
    let pattern = Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(?::[0-9]+)?(?:/[a-zA-Z0-9][a-zA-Z0-9._-]*)*(?::[a-zA-Z0-9._-]+)?(?:@sha256:[a-f0-9]{64})?$",
    )
    .map_err(|e| KrmpackError::InvalidImage {
        image: e.to_string(),
    })?;
    if !pattern.is_match(image) {
        return Err(KrmpackError::InvalidImage {
            image: image.to_string(),
        });
    }
    Ok(())
}

/// Split a command line by POSIX shell quoting rules.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(KrmpackError::InvalidExec {
                                command: line.to_string(),
                                reason: "unterminated single quote".to_string(),
                            })
                        }
                    }
                }
            }
            '"' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(KrmpackError::InvalidExec {
                                    command: line.to_string(),
                                    reason: "unterminated double quote".to_string(),
                                })
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(KrmpackError::InvalidExec {
                                command: line.to_string(),
                                reason: "unterminated double quote".to_string(),
                            })
                        }
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => {
                    has_token = true;
                    current.push(escaped);
                }
                None => {
                    return Err(KrmpackError::InvalidExec {
                        command: line.to_string(),
                        reason: "trailing backslash".to_string(),
                    })
                }
            },
            ' ' | '\t' => {
                if has_token {
                    parts.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            other => {
                has_token = true;
                current.push(other);
            }
        }
    }
    if has_token {
        parts.push(current);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_spec(image: &str) -> FunctionSpec {
        FunctionSpec {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exactly_one_executor() {
        let both = FunctionSpec {
            image: Some("a".to_string()),
            exec: Some("b".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let neither = FunctionSpec::default();
        assert!(neither.validate().is_err());

        assert!(image_spec("set-namespace:v0.4").validate().is_ok());
    }

    #[test]
    fn test_one_config_source() {
        let mut spec = image_spec("fn");
        spec.config_path = Some("cfg.yaml".to_string());
        spec.config_map
            .insert("namespace".to_string(), "staging".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_network_rejected_for_exec() {
        let spec = FunctionSpec {
            exec: Some("./fn.sh".to_string()),
            network: true,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_qualify_image() {
        assert_eq!(
            qualify_image("set-namespace:v0.4"),
            "gcr.io/kpt-fn/set-namespace:v0.4"
        );
        assert_eq!(
            qualify_image("example.com/fns/set-labels:v1"),
            "example.com/fns/set-labels:v1"
        );
        assert_eq!(
            qualify_image("localhost/my-fn:latest"),
            "localhost/my-fn:latest"
        );
        assert_eq!(
            qualify_image("registry:5000/fn"),
            "registry:5000/fn"
        );
        // A path without a registry host still gets qualified
        assert_eq!(
            qualify_image("team/custom-fn"),
            "gcr.io/kpt-fn/team/custom-fn"
        );
    }

    #[test]
    fn test_validate_image() {
        assert!(validate_image("gcr.io/kpt-fn/set-namespace:v0.4.1").is_ok());
        assert!(validate_image("example.com:5000/a/b:latest").is_ok());
        assert!(validate_image("fn name with spaces").is_err());
        assert!(validate_image("").is_err());
    }

    #[test]
    fn test_split_command_plain() {
        assert_eq!(
            split_command("./fn.sh --flag value").unwrap(),
            vec!["./fn.sh", "--flag", "value"]
        );
    }

    #[test]
    fn test_split_command_quotes() {
        assert_eq!(
            split_command(r#"./fn.sh 'single arg' "double arg""#).unwrap(),
            vec!["./fn.sh", "single arg", "double arg"]
        );
        assert_eq!(
            split_command(r#"echo "a \"quoted\" word""#).unwrap(),
            vec!["echo", r#"a "quoted" word"#]
        );
        assert_eq!(split_command(r"a\ b c").unwrap(), vec!["a b", "c"]);
    }

    #[test]
    fn test_split_command_unterminated() {
        assert!(split_command("echo 'oops").is_err());
        assert!(split_command("echo \"oops").is_err());
    }

    #[test]
    fn test_resolve_exec() {
        let spec = FunctionSpec {
            exec: Some("./validate.sh --strict".to_string()),
            ..Default::default()
        };
        let resolved = resolve(&spec, Path::new("/pkg")).unwrap();
        assert_eq!(
            resolved.executor,
            ExecutorKind::Exec {
                path: "./validate.sh".to_string(),
                args: vec!["--strict".to_string()],
            }
        );
        assert_eq!(resolved.name, "validate.sh");
    }

    #[test]
    fn test_resolve_config_map() {
        let mut spec = image_spec("set-namespace:v0.4");
        spec.config_map
            .insert("namespace".to_string(), "staging".to_string());
        let resolved = resolve(&spec, Path::new("/pkg")).unwrap();

        let config = resolved.config.unwrap();
        assert_eq!(config.kind(), "ConfigMap");
        assert_eq!(config.name(), SYNTHESIZED_CONFIG_NAME);
        assert_eq!(
            config
                .body()
                .get("data")
                .and_then(|d| d.get("namespace"))
                .and_then(serde_yaml::Value::as_str),
            Some("staging")
        );
    }

    #[test]
    fn test_resolve_config_path() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("cfg.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  a: b\n",
        )
        .unwrap();

        let mut spec = image_spec("fn:v1");
        spec.config_path = Some("cfg.yaml".to_string());
        let resolved = resolve(&spec, temp.path()).unwrap();
        assert_eq!(resolved.config.unwrap().name(), "cfg");

        let mut missing = image_spec("fn:v1");
        missing.config_path = Some("absent.yaml".to_string());
        let err = resolve(&missing, temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::FunctionConfigNotFound { .. }));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            image_spec("gcr.io/kpt-fn/set-namespace:v0.4").display_name(),
            "set-namespace"
        );
        let spec = FunctionSpec {
            exec: Some("/usr/local/bin/validate --strict".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.display_name(), "validate");
        let named = FunctionSpec {
            image: Some("x".to_string()),
            name: Some("my-fn".to_string()),
            ..Default::default()
        };
        assert_eq!(named.display_name(), "my-fn");
    }
}
