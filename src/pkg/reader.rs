//! Package reader
//!
//! Loads a package directory into an ordered resource set. Every YAML
//! document with `apiVersion` and `kind` is promoted to a [`Resource`] and
//! annotated with its origin `(path, index)`; everything else — non-KRM YAML
//! documents and non-YAML files — is preserved verbatim for faithful
//! emission. Raw document text is retained so the writer can emit unchanged
//! documents byte-identically.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde_yaml::Value;
use walkdir::WalkDir;
use wax::Pattern;

use crate::error::{KrmpackError, Result};
use crate::manifest::Manifest;
use crate::pkg::tree::check_symlink;
use crate::pkg::IGNORE_FILE_NAME;
use crate::resource::list::split_documents_indexed;
use crate::resource::Resource;

#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Read nested subpackages as plain content instead of stopping at their
    /// roots (used by `eval`, which sees the whole tree as one set).
    pub include_subpackages: bool,
    /// Prefix for path annotations, the package's location relative to the
    /// render root. Empty for the root itself.
    pub path_prefix: String,
}

/// One document of a YAML source file, in file order.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    /// A KRM object; `parsed` is the original value without location
    /// annotations, kept for change detection.
    Resource { raw: String, parsed: Value },
    /// A syntactically valid YAML document that is not a KRM object.
    Opaque { raw: String },
}

/// A non-YAML file carried through untouched.
#[derive(Debug, Clone)]
pub struct OpaqueBlob {
    pub path: String,
    pub data: Vec<u8>,
}

/// Everything read from one package directory.
#[derive(Debug, Clone, Default)]
pub struct PackageContents {
    /// Resources in discovery order, annotated with `(path, index)`.
    pub resources: Vec<Resource>,
    /// YAML files by annotation path, each a list of documents in file order.
    pub files: BTreeMap<String, Vec<SourceDocument>>,
    pub blobs: Vec<OpaqueBlob>,
}

impl PackageContents {
    /// Absorb another package's contents (a subpackage read with its own
    /// prefix). Paths are disjoint by construction.
    pub fn merge(&mut self, other: PackageContents) {
        self.resources.extend(other.resources);
        self.files.extend(other.files);
        self.blobs.extend(other.blobs);
    }

    pub fn has_blob(&self, path: &str) -> bool {
        self.blobs.iter().any(|b| b.path == path)
    }
}

/// Load the package at `dir`.
pub fn read_package(dir: &Path, options: &ReaderOptions) -> Result<PackageContents> {
    if !dir.is_dir() {
        return Err(KrmpackError::NotADirectory {
            path: dir.display().to_string(),
        });
    }
    let canonical = dir
        .canonicalize()
        .map_err(|e| KrmpackError::file_read(dir, &e))?;
    let ignore_globs = load_ignore_globs(dir)?;

    let mut contents = PackageContents::default();
    let mut it = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = it.next() {
        let entry = entry.map_err(|e| KrmpackError::IoError {
            message: e.to_string(),
        })?;
        let path = entry.path().to_path_buf();
        if path == dir {
            continue;
        }
        let rel = path
            .strip_prefix(dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        let rel_str = slash_path(&rel);

        if entry.path_is_symlink() {
            check_symlink(&path, &canonical)?;
            continue;
        }

        if entry.file_type().is_dir() {
            if path.file_name().is_some_and(|n| n == ".git") {
                it.skip_current_dir();
                continue;
            }
            if is_ignored(&ignore_globs, &rel_str) {
                it.skip_current_dir();
                continue;
            }
            if !options.include_subpackages && Manifest::exists_in(&path) {
                it.skip_current_dir();
                continue;
            }
            continue;
        }

        if is_ignored(&ignore_globs, &rel_str) {
            continue;
        }

        let annotated_path = if options.path_prefix.is_empty() {
            rel_str.clone()
        } else {
            format!("{}/{}", options.path_prefix, rel_str)
        };

        let data = std::fs::read(&path).map_err(|e| KrmpackError::file_read(&path, &e))?;
        if !is_yaml_file(&path) {
            contents.blobs.push(OpaqueBlob {
                path: annotated_path,
                data,
            });
            continue;
        }

        let text = match String::from_utf8(data) {
            Ok(text) => text,
            // Not actually YAML; carry it like any other binary file.
            Err(e) => {
                contents.blobs.push(OpaqueBlob {
                    path: annotated_path,
                    data: e.into_bytes(),
                });
                continue;
            }
        };

        let documents = read_documents(&text, &rel_str, &annotated_path, &mut contents.resources)?;
        contents.files.insert(annotated_path, documents);
    }

    Ok(contents)
}

fn read_documents(
    text: &str,
    rel_path: &str,
    annotated_path: &str,
    resources: &mut Vec<Resource>,
) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();
    for (index, (start_line, raw)) in split_documents_indexed(text).into_iter().enumerate() {
        match Resource::parse_document(&raw) {
            Ok(Some(mut resource)) => {
                let parsed = resource.body().clone();
                resource.set_location(annotated_path, index);
                resources.push(resource);
                documents.push(SourceDocument::Resource { raw, parsed });
            }
            Ok(None) => documents.push(SourceDocument::Opaque { raw }),
            Err(e) => {
                let doc_line = match &e {
                    KrmpackError::InputParse { line, .. } => *line,
                    _ => 0,
                };
                return Err(KrmpackError::InputParse {
                    path: rel_path.to_string(),
                    line: start_line + doc_line.saturating_sub(1),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(documents)
}

fn load_ignore_globs(dir: &Path) -> Result<Vec<wax::Glob<'static>>> {
    let path = dir.join(IGNORE_FILE_NAME);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| KrmpackError::file_read(&path, &e))?;
    let mut globs = Vec::new();
    for line in text.lines() {
        let pattern = line.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            continue;
        }
        let glob = wax::Glob::new(pattern)
            .map_err(|e| KrmpackError::InputParse {
                path: path.display().to_string(),
                line: 0,
                reason: e.to_string(),
            })?
            .into_owned();
        globs.push(glob);
    }
    Ok(globs)
}

fn is_ignored(globs: &[wax::Glob<'static>], rel_path: &str) -> bool {
    globs.iter().any(|g| g.is_match(rel_path))
}

fn is_yaml_file(path: &Path) -> bool {
    if path.file_name().is_some_and(|n| n == "Kptfile") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Forward-slash form of a relative path, used in annotations.
pub fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        if let Component::Normal(part) = component {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }
    out
}

/// Inverse of [`slash_path`], for joining annotation paths onto directories.
pub fn from_slash(path: &str) -> PathBuf {
    path.split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Kptfile"),
            "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: app\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("deploy.yaml"),
            "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx # primary
spec:
  replicas: 3
---
apiVersion: v1
kind: Service
metadata:
  name: nginx
",
        )
        .unwrap();
        std::fs::write(temp.path().join("README.md"), "# app\n").unwrap();
        temp
    }

    #[test]
    fn test_read_promotes_krm_documents() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();

        // Kptfile + Deployment + Service
        assert_eq!(contents.resources.len(), 3);
        let deployment = contents
            .resources
            .iter()
            .find(|r| r.kind() == "Deployment")
            .unwrap();
        assert_eq!(deployment.path(), Some("deploy.yaml"));
        assert_eq!(deployment.index(), 0);

        let service = contents
            .resources
            .iter()
            .find(|r| r.kind() == "Service")
            .unwrap();
        assert_eq!(service.index(), 1);

        assert_eq!(contents.blobs.len(), 1);
        assert_eq!(contents.blobs[0].path, "README.md");
    }

    #[test]
    fn test_location_annotations_unique() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let mut seen = HashSet::new();
        for resource in &contents.resources {
            let key = (resource.path().map(str::to_string), resource.index());
            assert!(seen.insert(key), "duplicate (path, index)");
        }
    }

    #[test]
    fn test_comments_survive_read() {
        let temp = fixture();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let deployment = contents
            .resources
            .iter()
            .find(|r| r.kind() == "Deployment")
            .unwrap();
        assert_eq!(
            deployment
                .comments()
                .get("metadata.name")
                .unwrap()
                .line
                .as_deref(),
            Some("# primary")
        );
    }

    #[test]
    fn test_subpackages_excluded_by_default() {
        let temp = fixture();
        let sub = temp.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(
            sub.join("Kptfile"),
            "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: sub\n",
        )
        .unwrap();
        std::fs::write(
            sub.join("cm.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
        )
        .unwrap();

        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        assert!(!contents.resources.iter().any(|r| r.kind() == "ConfigMap"));

        let all = read_package(
            temp.path(),
            &ReaderOptions {
                include_subpackages: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(all.resources.iter().any(|r| r.kind() == "ConfigMap"));
    }

    #[test]
    fn test_path_prefix_applied() {
        let temp = fixture();
        let contents = read_package(
            temp.path(),
            &ReaderOptions {
                path_prefix: "sub/pkg".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let deployment = contents
            .resources
            .iter()
            .find(|r| r.kind() == "Deployment")
            .unwrap();
        assert_eq!(deployment.path(), Some("sub/pkg/deploy.yaml"));
    }

    #[test]
    fn test_krmignore() {
        let temp = fixture();
        std::fs::write(temp.path().join(IGNORE_FILE_NAME), "skip-*.yaml\n").unwrap();
        std::fs::write(
            temp.path().join("skip-me.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: skipped\n",
        )
        .unwrap();

        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        assert!(!contents.resources.iter().any(|r| r.name() == "skipped"));
        // The ignore file itself is package content
        assert!(contents.has_blob(IGNORE_FILE_NAME));
    }

    #[test]
    fn test_malformed_yaml_cites_path() {
        let temp = fixture();
        std::fs::write(temp.path().join("bad.yaml"), "apiVersion: [unclosed\n").unwrap();
        let err = read_package(temp.path(), &ReaderOptions::default()).unwrap_err();
        match err {
            KrmpackError::InputParse { path, .. } => assert_eq!(path, "bad.yaml"),
            other => panic!("expected InputParse, got {other:?}"),
        }
    }

    #[test]
    fn test_non_krm_yaml_is_opaque() {
        let temp = fixture();
        std::fs::write(temp.path().join("values.yaml"), "replicas: 3\nname: app\n").unwrap();
        let contents = read_package(temp.path(), &ReaderOptions::default()).unwrap();
        let docs = contents.files.get("values.yaml").unwrap();
        assert!(matches!(docs[0], SourceDocument::Opaque { .. }));
    }

    #[test]
    fn test_slash_path_round_trip() {
        let p = PathBuf::from("a").join("b").join("c.yaml");
        assert_eq!(slash_path(&p), "a/b/c.yaml");
        assert_eq!(from_slash("a/b/c.yaml"), p);
    }
}
