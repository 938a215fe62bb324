//! Command implementations
//!
//! Argument structs live under `crate::cli`; each submodule here owns one
//! command's `run`.

pub mod eval;
pub mod render;
pub mod update;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::pkg::reader::PackageContents;
use crate::pkg::writer::{self, WriteOptions};
use crate::resource::list::ResourceList;
use crate::resource::Resource;
use crate::runtime::{BindMount, EnvSpec, ImagePullPolicy, RunnerOptions};

/// Where a command's transformed resources go.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    InPlace,
    Stdout,
    Unwrap,
    Dir(PathBuf),
}

impl OutputTarget {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            None => OutputTarget::InPlace,
            Some("stdout") => OutputTarget::Stdout,
            Some("unwrap") => OutputTarget::Unwrap,
            Some(dir) => OutputTarget::Dir(PathBuf::from(dir)),
        }
    }
}

/// Emit transformed resources to the chosen target. Only the in-place and
/// directory targets touch the filesystem.
pub fn emit(
    target: &OutputTarget,
    source_dir: &std::path::Path,
    contents: &PackageContents,
    resources: &[Resource],
) -> Result<()> {
    match target {
        OutputTarget::InPlace => {
            writer::write_package(source_dir, contents, resources, &WriteOptions::default())?;
        }
        OutputTarget::Dir(dir) => {
            writer::write_package(
                dir,
                contents,
                resources,
                &WriteOptions {
                    materialize_all: true,
                },
            )?;
        }
        OutputTarget::Stdout => {
            let list = ResourceList::new(resources.to_vec());
            print!("{}", list.to_yaml()?);
        }
        OutputTarget::Unwrap => {
            let stripped: Vec<Resource> = resources
                .iter()
                .cloned()
                .map(|mut r| {
                    r.strip_location();
                    r
                })
                .collect();
            let list = ResourceList::new(stripped);
            print!("{}", list.to_multidoc()?);
        }
    }
    Ok(())
}

pub fn runner_options(
    pull_policy: ImagePullPolicy,
    network: bool,
    as_current_user: bool,
    timeout_secs: Option<u64>,
    mounts: &[String],
    env: &[String],
) -> Result<RunnerOptions> {
    let mut options = RunnerOptions {
        pull_policy,
        network_allowed: network,
        as_current_user,
        timeout: timeout_secs.map(Duration::from_secs),
        ..Default::default()
    };
    for flag in mounts {
        options.mounts.push(BindMount::parse(flag)?);
    }
    options.env = env.iter().map(|e| EnvSpec(e.clone())).collect();
    Ok(options)
}
