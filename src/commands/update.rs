//! `krmpack update`: merge upstream changes into a local package

use std::path::PathBuf;

use console::style;

use crate::cli::UpdateArgs;
use crate::error::{KrmpackError, Result};
use crate::manifest::{GitLock, Manifest, UpstreamLock};
use crate::merge;
use crate::upstream::{GitGetter, PackageGetter};

pub fn run(args: UpdateArgs) -> Result<()> {
    run_with_getter(args, &GitGetter)
}

/// Separated so tests can substitute the getter.
pub fn run_with_getter(args: UpdateArgs, getter: &dyn PackageGetter) -> Result<()> {
    let local_dir = PathBuf::from(&args.dir);
    let manifest = Manifest::load(&local_dir)?;

    let upstream = manifest.upstream.clone().ok_or(KrmpackError::UpstreamMissing)?;
    let git = upstream.git.clone().ok_or(KrmpackError::UpstreamMissing)?;
    let lock = manifest
        .upstream_lock
        .as_ref()
        .and_then(|l| l.git.as_ref())
        .ok_or_else(|| KrmpackError::UpstreamFetch {
            repo: git.repo.clone(),
            reference: git.git_ref.clone(),
            reason: "package has no upstreamLock; it was never fetched".to_string(),
        })?;

    let target_ref = args.git_ref.clone().unwrap_or_else(|| git.git_ref.clone());
    let strategy = args
        .strategy
        .or(upstream.update_strategy)
        .unwrap_or_default();

    let progress = crate::progress::ProgressDisplay::new(format!(
        "Fetching {} @ {}",
        git.repo, lock.commit
    ));
    let original = match getter.materialize(&git.repo, &git.directory, &lock.commit) {
        Ok(upstream) => upstream,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    progress.update(format!("Fetching {} @ {target_ref}", git.repo));
    let updated = match getter.materialize(&git.repo, &git.directory, &target_ref) {
        Ok(upstream) => upstream,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    progress.finish();

    let outcome = merge::merge_packages(&local_dir, &original.dir, &updated.dir, strategy)?;

    for conflict in &outcome.conflicts {
        eprintln!(
            "{} merge conflict, kept local value: {conflict}",
            style("warning:").yellow().bold()
        );
    }

    // Re-pin the manifest to the freshly resolved commit.
    let mut manifest = Manifest::load(&local_dir)?;
    let mut upstream = upstream;
    if let Some(git_ref) = &mut upstream.git {
        git_ref.git_ref = target_ref.clone();
    }
    manifest.upstream = Some(upstream);
    manifest.upstream_lock = Some(UpstreamLock {
        origin_type: "git".to_string(),
        git: Some(GitLock {
            repo: git.repo.clone(),
            directory: git.directory.clone(),
            git_ref: target_ref,
            commit: updated.commit.clone(),
        }),
    });
    manifest.save(&local_dir)?;

    eprintln!(
        "Updated {} to {}",
        manifest.metadata.name,
        &updated.commit[..12.min(updated.commit.len())]
    );
    Ok(())
}
