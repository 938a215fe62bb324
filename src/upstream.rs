//! Upstream package materialization
//!
//! `update` needs two upstream trees on disk: the original (the pinned
//! commit the local fork was taken from) and the new upstream at the
//! requested ref. The [`PackageGetter`] trait abstracts how a
//! `(repo, directory, ref)` triple becomes a directory; [`GitGetter`] is the
//! git2-backed implementation. Authentication is delegated to git's native
//! credential story for https; there is no custom credential plumbing here.

use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::Repository;
use tempfile::TempDir;

use crate::error::{KrmpackError, Result};

/// A materialized upstream: a directory tree plus the commit it was taken
/// from. The backing checkout lives as long as this value.
#[derive(Debug)]
pub struct MaterializedUpstream {
    pub dir: PathBuf,
    /// Full SHA of the resolved commit.
    pub commit: String,
    _checkout: Option<TempDir>,
}

impl MaterializedUpstream {
    /// Wrap an existing directory (tests, pre-fetched trees).
    pub fn local(dir: PathBuf, commit: impl Into<String>) -> Self {
        Self {
            dir,
            commit: commit.into(),
            _checkout: None,
        }
    }
}

pub trait PackageGetter {
    /// Materialize `directory` of `repo` at `reference` into a local tree.
    fn materialize(
        &self,
        repo: &str,
        directory: &str,
        reference: &str,
    ) -> Result<MaterializedUpstream>;
}

/// Fetches upstreams by cloning with git2.
#[derive(Debug, Default)]
pub struct GitGetter;

impl PackageGetter for GitGetter {
    fn materialize(
        &self,
        repo: &str,
        directory: &str,
        reference: &str,
    ) -> Result<MaterializedUpstream> {
        let fetch_err = |reason: String| KrmpackError::UpstreamFetch {
            repo: repo.to_string(),
            reference: reference.to_string(),
            reason,
        };

        let checkout = TempDir::new().map_err(|e| fetch_err(e.to_string()))?;
        tracing::debug!(repo, reference, "cloning upstream");

        // A full clone: resolving arbitrary refs (tags, commit SHAs) rules
        // out depth-limited fetches.
        let repository = RepoBuilder::new()
            .clone(repo, checkout.path())
            .map_err(|e| fetch_err(e.message().to_string()))?;

        let commit = checkout_reference(&repository, reference)
            .map_err(|e| fetch_err(e.message().to_string()))?;

        let dir = checkout.path().join(directory.trim_start_matches('/'));
        if !dir.is_dir() {
            return Err(fetch_err(format!(
                "directory '{directory}' does not exist at {reference}"
            )));
        }

        Ok(MaterializedUpstream {
            dir,
            commit,
            _checkout: Some(checkout),
        })
    }
}

/// Resolve a branch, tag or commit and check out its tree detached.
/// Returns the full commit SHA.
fn checkout_reference(
    repository: &Repository,
    reference: &str,
) -> std::result::Result<String, git2::Error> {
    let object = repository
        .revparse_single(reference)
        .or_else(|_| repository.revparse_single(&format!("refs/remotes/origin/{reference}")))?;
    let commit = object.peel_to_commit()?;

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repository.checkout_tree(commit.as_object(), Some(&mut checkout))?;
    repository.set_head_detached(commit.id())?;

    Ok(commit.id().to_string())
}
