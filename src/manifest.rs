//! The package manifest (Kptfile)
//!
//! This module handles:
//! - The typed Kptfile model (upstream, upstreamLock, info, pipeline, inventory)
//! - Loading with apiVersion/kind gating (deprecated versions are rejected)
//! - Saving after an update rewrites the upstream pin

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KrmpackError, Result};
use crate::fnspec::FunctionSpec;

pub const MANIFEST_FILE_NAME: &str = "Kptfile";
pub const MANIFEST_API_VERSION: &str = "kpt.dev/v1";
pub const MANIFEST_KIND: &str = "Kptfile";

const DEPRECATED_API_VERSIONS: &[&str] = &["kpt.dev/v1alpha1", "kpt.dev/v1alpha2"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_lock: Option<UpstreamLock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<PackageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    #[serde(rename = "type")]
    pub origin_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitRef {
    pub repo: String,
    pub directory: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamLock {
    #[serde(rename = "type")]
    pub origin_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitLock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitLock {
    pub repo: String,
    pub directory: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Full SHA of the materialized upstream commit.
    pub commit: String,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    #[default]
    ResourceMerge,
    FastForward,
    ForceDeleteReplace,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<FunctionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<FunctionSpec>,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty() && self.validators.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "inventoryID")]
    pub inventory_id: String,
}

impl Manifest {
    /// Whether `dir` is a package root.
    pub fn exists_in(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE_NAME).is_file()
    }

    /// Load and gate the manifest of the package at `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE_NAME);
        if !path.is_file() {
            return Err(KrmpackError::ManifestMissing {
                path: dir.display().to_string(),
            });
        }
        let text =
            std::fs::read_to_string(&path).map_err(|e| KrmpackError::file_read(&path, &e))?;
        Self::parse(&text, &path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| KrmpackError::manifest_parse(path, e.to_string()))?;

        let api_version = value
            .get("apiVersion")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();
        if DEPRECATED_API_VERSIONS.contains(&api_version) {
            return Err(KrmpackError::ManifestDeprecated {
                path: path.display().to_string(),
                api_version: api_version.to_string(),
            });
        }
        if api_version != MANIFEST_API_VERSION {
            return Err(KrmpackError::manifest_parse(
                path,
                format!("unsupported apiVersion '{api_version}'"),
            ));
        }

        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();
        if kind != MANIFEST_KIND {
            return Err(KrmpackError::ManifestUnknownKind {
                path: path.display().to_string(),
                kind: kind.to_string(),
            });
        }

        let manifest: Manifest = serde_yaml::from_value(value)
            .map_err(|e| KrmpackError::manifest_parse(path, e.to_string()))?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(pipeline) = &self.pipeline {
            for function in pipeline.mutators.iter().chain(&pipeline.validators) {
                function.validate()?;
            }
        }
        if let Some(lock) = &self.upstream_lock {
            if let Some(git) = &lock.git {
                if git.commit.len() != 40 || !git.commit.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(KrmpackError::manifest_parse(
                        path,
                        format!("upstreamLock.git.commit '{}' is not a full SHA", git.commit),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Write the manifest back to its package directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(&path, yaml).map_err(|e| KrmpackError::file_write(&path, &e))?;
        Ok(())
    }

    /// The declared pipeline, empty when absent.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "\
apiVersion: kpt.dev/v1
kind: Kptfile
metadata:
  name: app
upstream:
  type: git
  git:
    repo: https://example.com/pkgs.git
    directory: /app
    ref: v1.2.0
  updateStrategy: resource-merge
upstreamLock:
  type: git
  git:
    repo: https://example.com/pkgs.git
    directory: /app
    ref: v1.2.0
    commit: 0123456789abcdef0123456789abcdef01234567
pipeline:
  mutators:
  - image: set-namespace:v0.4
    configMap:
      namespace: staging
  validators:
  - exec: ./validate.sh
";

    fn write_manifest(dir: &Path, text: &str) {
        std::fs::write(dir.join(MANIFEST_FILE_NAME), text).unwrap();
    }

    #[test]
    fn test_load_full_manifest() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), MANIFEST);

        let manifest = Manifest::load(temp.path()).unwrap();
        assert_eq!(manifest.metadata.name, "app");

        let upstream = manifest.upstream.as_ref().unwrap();
        assert_eq!(upstream.git.as_ref().unwrap().git_ref, "v1.2.0");
        assert_eq!(
            upstream.update_strategy,
            Some(UpdateStrategy::ResourceMerge)
        );

        let pipeline = manifest.pipeline();
        assert_eq!(pipeline.mutators.len(), 1);
        assert_eq!(pipeline.validators.len(), 1);
        assert_eq!(
            pipeline.mutators[0].config_map.get("namespace"),
            Some(&"staging".to_string())
        );
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = Manifest::load(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::ManifestMissing { .. }));
    }

    #[test]
    fn test_deprecated_version_rejected() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "apiVersion: kpt.dev/v1alpha2\nkind: Kptfile\nmetadata:\n  name: old\n",
        );
        let err = Manifest::load(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::ManifestDeprecated { .. }));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "apiVersion: kpt.dev/v1\nkind: Package\nmetadata:\n  name: x\n",
        );
        let err = Manifest::load(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::ManifestUnknownKind { .. }));
    }

    #[test]
    fn test_short_commit_rejected() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "\
apiVersion: kpt.dev/v1
kind: Kptfile
metadata:
  name: app
upstreamLock:
  type: git
  git:
    repo: r
    directory: /
    ref: main
    commit: abc123
",
        );
        let err = Manifest::load(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::ManifestParse { .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), MANIFEST);
        let manifest = Manifest::load(temp.path()).unwrap();

        let out = TempDir::new().unwrap();
        manifest.save(out.path()).unwrap();
        let reloaded = Manifest::load(out.path()).unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn test_update_strategy_serde() {
        let s: UpdateStrategy = serde_yaml::from_str("fast-forward").unwrap();
        assert_eq!(s, UpdateStrategy::FastForward);
        assert_eq!(
            serde_yaml::to_string(&UpdateStrategy::ForceDeleteReplace)
                .unwrap()
                .trim(),
            "force-delete-replace"
        );
    }
}
