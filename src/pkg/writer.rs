//! Package writer
//!
//! Emits a (possibly mutated) resource set back to a package directory. A
//! file is rewritten only when at least one of its documents changed, so an
//! untouched package round-trips byte-for-byte. Deleted resources remove
//! their document (and the file, once empty); resources without a location
//! annotation land in `<kind>_<name>.yaml`. The location annotations are
//! stripped from everything that is written.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{KrmpackError, Result};
use crate::pkg::reader::{from_slash, PackageContents, SourceDocument};
use crate::resource::Resource;

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Write every file, changed or not, and copy opaque blobs. Used when the
    /// destination differs from the source directory.
    pub materialize_all: bool,
}

#[derive(Debug, Default)]
pub struct WriteSummary {
    pub written: Vec<String>,
    pub deleted: Vec<String>,
}

impl WriteSummary {
    pub fn is_noop(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty()
    }
}

/// Write `output` to `dir`, using `contents` (the reader's view of the
/// original package) for change detection and document ordering.
pub fn write_package(
    dir: &Path,
    contents: &PackageContents,
    output: &[Resource],
    options: &WriteOptions,
) -> Result<WriteSummary> {
    let mut claims = claim_locations(contents, output)?;
    let mut summary = WriteSummary::default();

    let mut paths: Vec<String> = contents.files.keys().cloned().collect();
    for path in claims.keys() {
        if !contents.files.contains_key(path) {
            paths.push(path.clone());
        }
    }
    paths.sort();
    paths.dedup();

    for path in paths {
        let original = contents.files.get(&path);
        let mut file_claims = claims.remove(&path).unwrap_or_default();
        let mut documents: Vec<String> = Vec::new();
        let mut changed = false;

        if let Some(source_docs) = original {
            for (index, source) in source_docs.iter().enumerate() {
                match source {
                    SourceDocument::Opaque { raw } => {
                        if file_claims.remove(&index).is_some() {
                            return Err(KrmpackError::OutputCollision {
                                path: path.clone(),
                                index,
                            });
                        }
                        documents.push(raw.clone());
                    }
                    SourceDocument::Resource { raw, parsed } => {
                        match file_claims.remove(&index) {
                            Some(resource) => {
                                if resource.body_without_location() == *parsed {
                                    documents.push(raw.clone());
                                } else {
                                    documents.push(resource.to_yaml_stripped()?);
                                    changed = true;
                                }
                            }
                            // No output resource claims this slot: deletion.
                            None => changed = true,
                        }
                    }
                }
            }
        }

        // Documents appended beyond the original file, in index order.
        for (_, resource) in file_claims {
            documents.push(resource.to_yaml_stripped()?);
            changed = true;
        }

        let target = dir.join(from_slash(&path));
        if documents.is_empty() {
            if target.is_file() {
                std::fs::remove_file(&target)
                    .map_err(|e| KrmpackError::file_write(&target, &e))?;
                summary.deleted.push(path);
            }
            continue;
        }

        if !changed && !options.materialize_all {
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KrmpackError::file_write(parent, &e))?;
        }
        std::fs::write(&target, join_documents(&documents))
            .map_err(|e| KrmpackError::file_write(&target, &e))?;
        summary.written.push(path);
    }

    if options.materialize_all {
        for blob in &contents.blobs {
            let target = dir.join(from_slash(&blob.path));
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| KrmpackError::file_write(parent, &e))?;
            }
            std::fs::write(&target, &blob.data)
                .map_err(|e| KrmpackError::file_write(&target, &e))?;
            summary.written.push(blob.path.clone());
        }
    }

    Ok(summary)
}

/// Assign every output resource a `(path, index)` slot, diagnosing
/// collisions and placing unannotated resources in a default file.
fn claim_locations(
    contents: &PackageContents,
    output: &[Resource],
) -> Result<BTreeMap<String, BTreeMap<usize, Resource>>> {
    let mut claims: BTreeMap<String, BTreeMap<usize, Resource>> = BTreeMap::new();

    for resource in output {
        let (path, index) = match resource.path() {
            Some(path) => {
                validate_rel_path(path)?;
                (path.to_string(), resource.index())
            }
            None => {
                let path = default_path(resource);
                let taken = claims.get(&path).map(BTreeMap::len).unwrap_or(0);
                let base = contents.files.get(&path).map(Vec::len).unwrap_or(0);
                (path, base + taken)
            }
        };

        if contents.has_blob(&path) {
            return Err(KrmpackError::OutputCollision { path, index });
        }

        let slots = claims.entry(path.clone()).or_default();
        if slots.insert(index, resource.clone()).is_some() {
            return Err(KrmpackError::OutputCollision { path, index });
        }
    }

    Ok(claims)
}

fn default_path(resource: &Resource) -> String {
    let kind = resource.kind().to_lowercase();
    let name = resource.name();
    if name.is_empty() {
        format!("{kind}.yaml")
    } else {
        format!("{kind}_{name}.yaml")
    }
}

/// A path annotation must stay inside the package.
fn validate_rel_path(path: &str) -> Result<()> {
    let p = Path::new(path);
    if p.is_absolute()
        || p.components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(KrmpackError::OutputCollision {
            path: path.to_string(),
            index: 0,
        });
    }
    Ok(())
}

fn join_documents(documents: &[String]) -> String {
    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(doc);
        if !doc.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::reader::{read_package, ReaderOptions};
    use serde_yaml::Value;
    use tempfile::TempDir;

    const DEPLOY: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx # primary workload
spec:
  replicas: 3
";

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Kptfile"),
            "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: app\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("deploy.yaml"), DEPLOY).unwrap();
        temp
    }

    #[test]
    fn test_unchanged_package_is_noop() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let output = contents.resources.clone();

        let summary =
            write_package(temp.path(), &contents, &output, &WriteOptions::default()).unwrap();
        assert!(summary.is_noop());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("deploy.yaml")).unwrap(),
            DEPLOY
        );
    }

    #[test]
    fn test_mutated_resource_rewrites_file_preserving_comments() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut output = contents.resources.clone();

        let deployment = output.iter_mut().find(|r| r.kind() == "Deployment").unwrap();
        *deployment
            .body_mut()
            .get_mut("spec")
            .unwrap()
            .get_mut("replicas")
            .unwrap() = Value::Number(5.into());

        let summary =
            write_package(temp.path(), &contents, &output, &WriteOptions::default()).unwrap();
        assert_eq!(summary.written, vec!["deploy.yaml".to_string()]);

        let text = std::fs::read_to_string(temp.path().join("deploy.yaml")).unwrap();
        assert!(text.contains("replicas: 5"));
        assert!(text.contains("name: nginx # primary workload"));
        assert!(!text.contains("internal.config.kubernetes.io"));
    }

    #[test]
    fn test_deleted_resource_removes_file() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let output: Vec<_> = contents
            .resources
            .iter()
            .filter(|r| r.kind() != "Deployment")
            .cloned()
            .collect();

        let summary =
            write_package(temp.path(), &contents, &output, &WriteOptions::default()).unwrap();
        assert_eq!(summary.deleted, vec!["deploy.yaml".to_string()]);
        assert!(!temp.path().join("deploy.yaml").exists());
        // The Kptfile was untouched
        assert!(temp.path().join("Kptfile").exists());
    }

    #[test]
    fn test_new_resource_gets_default_path() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut output = contents.resources.clone();
        output.push(
            Resource::parse_document(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
            )
            .unwrap()
            .unwrap(),
        );

        let summary =
            write_package(temp.path(), &contents, &output, &WriteOptions::default()).unwrap();
        assert!(summary.written.contains(&"configmap_settings.yaml".to_string()));
        let text =
            std::fs::read_to_string(temp.path().join("configmap_settings.yaml")).unwrap();
        assert!(text.contains("name: settings"));
    }

    #[test]
    fn test_collision_detected() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut output = contents.resources.clone();
        let mut duplicate = output
            .iter()
            .find(|r| r.kind() == "Deployment")
            .unwrap()
            .clone();
        duplicate.set_location("deploy.yaml", 0);
        output.push(duplicate);

        let err = write_package(temp.path(), &contents, &output, &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, KrmpackError::OutputCollision { .. }));
    }

    #[test]
    fn test_escaping_path_rejected() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut escape = contents.resources[0].clone();
        escape.set_location("../outside.yaml", 0);

        let err = write_package(temp.path(), &contents, &[escape], &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, KrmpackError::OutputCollision { .. }));
    }

    #[test]
    fn test_multidoc_partial_change() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("both.yaml"),
            "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: second # keep me
",
        )
        .unwrap();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut output = contents.resources.clone();
        output[0]
            .body_mut()
            .as_mapping_mut()
            .unwrap()
            .insert(
                Value::String("data".into()),
                serde_yaml::from_str("a: b").unwrap(),
            );

        write_package(temp.path(), &contents, &output, &WriteOptions::default()).unwrap();
        let text = std::fs::read_to_string(temp.path().join("both.yaml")).unwrap();
        assert!(text.contains("a: b"));
        // The unchanged second document keeps its original bytes
        assert!(text.contains("name: second # keep me"));
        assert_eq!(text.matches("---").count(), 1);
    }

    #[test]
    fn test_materialize_all_copies_blobs() {
        let temp = fixture();
        std::fs::write(temp.path().join("README.md"), "# app\n").unwrap();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();

        let dest = TempDir::new().unwrap();
        write_package(
            dest.path(),
            &contents,
            &contents.resources,
            &WriteOptions {
                materialize_all: true,
            },
        )
        .unwrap();
        assert!(dest.path().join("deploy.yaml").exists());
        assert!(dest.path().join("README.md").exists());
        assert_eq!(
            std::fs::read_to_string(dest.path().join("deploy.yaml")).unwrap(),
            DEPLOY
        );
    }
}
