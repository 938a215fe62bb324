//! Package tree traversal
//!
//! `walk` enumerates a root package and every nested subpackage in
//! depth-first post-order, so a parent's pipeline always runs after its
//! subpackages have been rendered. The order is a pure function of the
//! filesystem tree: children are visited lexicographically.

use std::path::{Path, PathBuf};

use crate::error::{KrmpackError, Result};
use crate::manifest::Manifest;

/// One package in the traversal.
#[derive(Debug, Clone)]
pub struct PackageNode {
    /// Absolute package directory.
    pub path: PathBuf,
    /// Package directory relative to the walk root; empty for the root.
    pub rel_path: PathBuf,
    pub manifest: Manifest,
}

impl PackageNode {
    pub fn display_name(&self) -> String {
        if self.rel_path.as_os_str().is_empty() {
            self.manifest.metadata.name.clone()
        } else {
            self.rel_path.display().to_string()
        }
    }
}

/// Enumerate the package tree rooted at `root` in post-order.
///
/// The root must itself be a package. A directory anywhere below the root is
/// a package iff it contains a Kptfile; intermediate non-package directories
/// are plain content of the enclosing package. Symlinks are not followed;
/// a symlink pointing outside the root is an error.
pub fn walk(root: &Path) -> Result<Vec<PackageNode>> {
    if !root.is_dir() {
        return Err(KrmpackError::NotADirectory {
            path: root.display().to_string(),
        });
    }
    let canonical_root = root
        .canonicalize()
        .map_err(|e| KrmpackError::file_read(root, &e))?;

    let mut nodes = Vec::new();
    visit(&canonical_root, &canonical_root, &mut nodes)?;

    if nodes.last().map(|n| n.path.as_path()) != Some(canonical_root.as_path()) {
        // visit only records directories containing a Kptfile; the root is
        // required to be one.
        return Err(KrmpackError::ManifestMissing {
            path: root.display().to_string(),
        });
    }
    Ok(nodes)
}

fn visit(dir: &Path, root: &Path, nodes: &mut Vec<PackageNode>) -> Result<()> {
    let mut children: Vec<PathBuf> = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| KrmpackError::file_read(dir, &e))?;
    for entry in entries {
        let entry = entry.map_err(|e| KrmpackError::file_read(dir, &e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| KrmpackError::file_read(&path, &e))?;

        if file_type.is_symlink() {
            check_symlink(&path, root)?;
            continue;
        }
        if !file_type.is_dir() {
            continue;
        }
        if path.file_name().is_some_and(|n| n == ".git") {
            continue;
        }
        children.push(path);
    }
    children.sort();

    for child in children {
        visit(&child, root, nodes)?;
    }

    if Manifest::exists_in(dir) {
        let manifest = Manifest::load(dir)?;
        let rel_path = dir
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        nodes.push(PackageNode {
            path: dir.to_path_buf(),
            rel_path,
            manifest,
        });
    }
    Ok(())
}

/// A symlink is tolerated (and skipped) only when its target stays inside the
/// root.
pub(crate) fn check_symlink(path: &Path, root: &Path) -> Result<()> {
    let target = path
        .canonicalize()
        .map_err(|_| KrmpackError::symlink_escape(path.to_path_buf()))?;
    if !target.starts_with(root) {
        return Err(KrmpackError::symlink_escape(path.to_path_buf()));
    }
    Ok(())
}

/// Direct subpackages of `parent`: packages below it with no intermediate
/// package in between.
pub fn direct_children<'a>(
    nodes: &'a [PackageNode],
    parent: &PackageNode,
) -> Vec<&'a PackageNode> {
    nodes
        .iter()
        .filter(|candidate| {
            candidate.path != parent.path
                && candidate.path.starts_with(&parent.path)
                && !nodes.iter().any(|between| {
                    between.path != parent.path
                        && between.path != candidate.path
                        && between.path.starts_with(&parent.path)
                        && candidate.path.starts_with(&between.path)
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_kptfile(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("Kptfile"),
            format!("apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: {name}\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_walk_post_order() {
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        write_kptfile(&temp.path().join("a"), "a");
        write_kptfile(&temp.path().join("b"), "b");
        write_kptfile(&temp.path().join("a/deep"), "deep");

        let nodes = walk(temp.path()).unwrap();
        let names: Vec<String> = nodes
            .iter()
            .map(|n| n.manifest.metadata.name.clone())
            .collect();
        assert_eq!(names, vec!["deep", "a", "b", "root"]);
        assert_eq!(nodes[3].rel_path, PathBuf::new());
        assert_eq!(nodes[0].rel_path, PathBuf::from("a/deep"));
    }

    #[test]
    fn test_walk_is_deterministic() {
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        for name in ["zeta", "alpha", "mid"] {
            write_kptfile(&temp.path().join(name), name);
        }

        let first = walk(temp.path()).unwrap();
        let second = walk(temp.path()).unwrap();
        let order: Vec<_> = first.iter().map(|n| n.rel_path.clone()).collect();
        assert_eq!(
            order,
            second.iter().map(|n| n.rel_path.clone()).collect::<Vec<_>>()
        );
        assert_eq!(
            order,
            vec![
                PathBuf::from("alpha"),
                PathBuf::from("mid"),
                PathBuf::from("zeta"),
                PathBuf::new(),
            ]
        );
    }

    #[test]
    fn test_non_package_dirs_are_content() {
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        std::fs::create_dir_all(temp.path().join("plain/nested")).unwrap();
        write_kptfile(&temp.path().join("plain/nested/pkg"), "pkg");

        let nodes = walk(temp.path()).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].rel_path, PathBuf::from("plain/nested/pkg"));
    }

    #[test]
    fn test_root_without_manifest_fails() {
        let temp = TempDir::new().unwrap();
        let err = walk(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::ManifestMissing { .. }));
    }

    #[test]
    fn test_walk_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let err = walk(&file).unwrap_err();
        assert!(matches!(err, KrmpackError::NotADirectory { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_detected() {
        let outside = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();

        let err = walk(temp.path()).unwrap_err();
        assert!(matches!(err, KrmpackError::SymlinkEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_internal_symlink_is_skipped() {
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        write_kptfile(&temp.path().join("real"), "real");
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("alias")).unwrap();

        let nodes = walk(temp.path()).unwrap();
        // The alias is not traversed; only the real package appears once.
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_direct_children() {
        let temp = TempDir::new().unwrap();
        write_kptfile(temp.path(), "root");
        write_kptfile(&temp.path().join("a"), "a");
        write_kptfile(&temp.path().join("a/inner"), "inner");
        write_kptfile(&temp.path().join("b"), "b");

        let nodes = walk(temp.path()).unwrap();
        let root = nodes.last().unwrap();
        let children = direct_children(&nodes, root);
        let names: Vec<_> = children
            .iter()
            .map(|n| n.manifest.metadata.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let a = nodes
            .iter()
            .find(|n| n.manifest.metadata.name == "a")
            .unwrap();
        let inner = direct_children(&nodes, a);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].manifest.metadata.name, "inner");
    }
}
