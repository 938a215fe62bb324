//! Container runtime collaborator
//!
//! Container functions run through the `docker` binary. The handle is passed
//! explicitly into the pipeline rather than living in a process global, so
//! tests and parallel renders stay tractable. Images resolve according to a
//! pull policy; runs get no network, a non-root user and resource limits by
//! default.

use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{KrmpackError, Result};
use crate::runtime::RunnerOptions;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum ImagePullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

/// A read-only bind mount for a container function.
#[derive(Debug, Clone, PartialEq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl BindMount {
    /// Parse a docker-style mount flag: `type=bind,src=/host,dst=/container`.
    pub fn parse(flag: &str) -> Result<Self> {
        let mut mount_type = None;
        let mut source = None;
        let mut target = None;
        for part in flag.split(',') {
            match part.split_once('=') {
                Some(("type", v)) => mount_type = Some(v),
                Some(("src" | "source", v)) => source = Some(v),
                Some(("dst" | "target", v)) => target = Some(v),
                Some(("rw", "false")) | Some(("readonly", _)) => {}
                Some(("rw", _)) => {
                    return Err(KrmpackError::InvalidFunctionSpec {
                        reason: format!("writable mounts are not supported: {flag}"),
                    })
                }
                _ => {
                    return Err(KrmpackError::InvalidFunctionSpec {
                        reason: format!("unrecognized mount option in '{flag}'"),
                    })
                }
            }
        }
        if mount_type != Some("bind") {
            return Err(KrmpackError::InvalidFunctionSpec {
                reason: format!("only bind mounts are supported: {flag}"),
            });
        }
        match (source, target) {
            (Some(src), Some(dst)) => Ok(Self {
                source: PathBuf::from(src),
                target: PathBuf::from(dst),
            }),
            _ => Err(KrmpackError::InvalidFunctionSpec {
                reason: format!("mount needs both src and dst: {flag}"),
            }),
        }
    }
}

/// Handle on the container runtime binary.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: std::env::var("KRMPACK_CONTAINER_RUNTIME")
                .unwrap_or_else(|_| "docker".to_string()),
        }
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolve the image per the pull policy before running it.
    pub fn ensure_image(&self, image: &str, policy: ImagePullPolicy) -> Result<()> {
        match policy {
            ImagePullPolicy::Never => Ok(()),
            ImagePullPolicy::Always => self.pull(image),
            ImagePullPolicy::IfNotPresent => {
                if self.image_present(image)? {
                    Ok(())
                } else {
                    self.pull(image)
                }
            }
        }
    }

    fn image_present(&self, image: &str) -> Result<bool> {
        let status = Command::new(&self.binary)
            .args(["image", "inspect", image])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| KrmpackError::RuntimeUnavailable {
                reason: format!("failed to run '{}': {e}", self.binary),
            })?;
        Ok(status.success())
    }

    fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image, "pulling function image");
        let output = Command::new(&self.binary)
            .args(["image", "pull", image])
            .output()
            .map_err(|e| KrmpackError::RuntimeUnavailable {
                reason: format!("failed to run '{}': {e}", self.binary),
            })?;
        if !output.status.success() {
            return Err(KrmpackError::RuntimeUnavailable {
                reason: format!(
                    "pull of {image} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    /// Arguments for one `docker run` function invocation.
    pub fn run_args(&self, image: &str, network: bool, options: &RunnerOptions) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--security-opt=no-new-privileges".to_string(),
        ];

        if network {
            args.push("--network=bridge".to_string());
        } else {
            args.push("--network=none".to_string());
        }

        let user = if options.as_current_user {
            current_user_spec()
        } else {
            crate::runtime::DEFAULT_CONTAINER_USER.to_string()
        };
        args.push("--user".to_string());
        args.push(user);

        args.push(format!("--memory={}", options.memory_limit));
        args.push(format!("--cpus={}", options.cpu_limit));

        for mount in &options.mounts {
            args.push("--mount".to_string());
            args.push(format!(
                "type=bind,source={},target={},readonly",
                mount.source.display(),
                mount.target.display()
            ));
        }

        for env in &options.env {
            if let Some((key, value)) = env.resolve() {
                args.push("-e".to_string());
                args.push(format!("{key}={value}"));
            }
        }

        args.push(image.to_string());
        args
    }
}

#[cfg(unix)]
fn current_user_spec() -> String {
    // SAFETY: getuid/getgid take no arguments and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    format!("{uid}:{gid}")
}

#[cfg(not(unix))]
fn current_user_spec() -> String {
    crate::runtime::DEFAULT_CONTAINER_USER.to_string()
}
