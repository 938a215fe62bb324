//! Function execution runtime
//!
//! The set of executors is closed: a function runs either as a container
//! (through the [`docker`] collaborator) or as a local executable. Both share
//! one stdio contract — the serialized input ResourceList on stdin, the
//! output envelope on stdout, stderr streamed to the log sink — and one
//! watchdog handling timeout and cooperative cancellation.

pub mod docker;
pub mod process;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KrmpackError, Result};
use crate::fnspec::{ExecutorKind, ResolvedFunction};
use crate::resource::list::ResourceList;

pub use docker::{BindMount, DockerRuntime, ImagePullPolicy};

/// Default UID:GID for container functions when `--as-current-user` is not
/// set.
pub const DEFAULT_CONTAINER_USER: &str = "65534:65534";

/// Cooperative cancellation signal threaded through every I/O boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Environment entry passed to a function: `KEY=VALUE` sets a value, a bare
/// `KEY` lifts it from the caller's environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSpec(pub String);

impl EnvSpec {
    pub fn resolve(&self) -> Option<(String, String)> {
        match self.0.split_once('=') {
            Some((key, value)) => Some((key.to_string(), value.to_string())),
            None => std::env::var(&self.0).ok().map(|v| (self.0.clone(), v)),
        }
    }
}

/// Per-invocation execution settings, assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub pull_policy: ImagePullPolicy,
    /// `--network` was passed; a container still needs `network: true` in its
    /// declaration to actually get network access.
    pub network_allowed: bool,
    pub mounts: Vec<BindMount>,
    pub env: Vec<EnvSpec>,
    pub as_current_user: bool,
    pub timeout: Option<Duration>,
    pub memory_limit: String,
    pub cpu_limit: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            pull_policy: ImagePullPolicy::IfNotPresent,
            network_allowed: false,
            mounts: Vec::new(),
            env: Vec::new(),
            as_current_user: false,
            timeout: None,
            memory_limit: "512m".to_string(),
            cpu_limit: "1.0".to_string(),
        }
    }
}

/// Executes resolved functions against ResourceList envelopes.
pub struct FunctionRunner<'a> {
    pub docker: &'a DockerRuntime,
    pub options: RunnerOptions,
    pub cancel: CancellationToken,
    /// Working directory for exec functions (the package being rendered).
    pub package_dir: PathBuf,
}

impl FunctionRunner<'_> {
    /// Run one function invocation and parse its output envelope.
    ///
    /// A non-zero exit becomes `FunctionExecution`, carrying any results the
    /// function managed to emit. A zero exit with unparseable stdout becomes
    /// `FunctionOutput`.
    pub fn invoke(&self, function: &ResolvedFunction, input: &ResourceList) -> Result<ResourceList> {
        if self.cancel.is_cancelled() {
            return Err(KrmpackError::Cancelled);
        }
        let input_yaml = input.to_yaml()?;

        let request = match &function.executor {
            ExecutorKind::Container { image } => {
                self.docker.ensure_image(image, self.options.pull_policy)?;
                let network = function.network && self.options.network_allowed;
                process::ProcessRequest {
                    program: self.docker.binary().to_string(),
                    args: self.docker.run_args(image, network, &self.options),
                    envs: None,
                    cwd: None,
                    input: input_yaml,
                    timeout: self.options.timeout,
                    cancel: self.cancel.clone(),
                    function_name: function.name.clone(),
                }
            }
            ExecutorKind::Exec { path, args } => process::ProcessRequest {
                program: path.clone(),
                args: args.clone(),
                envs: Some(scrubbed_env(&self.options.env)),
                cwd: Some(self.package_dir.clone()),
                input: input_yaml,
                timeout: self.options.timeout,
                cancel: self.cancel.clone(),
                function_name: function.name.clone(),
            },
        };

        let output = process::run(request)?;

        let parsed = ResourceList::parse(&output.stdout);
        if output.exit_code != 0 {
            let results = parsed.map(|list| list.results).unwrap_or_default();
            return Err(KrmpackError::function_execution(
                &function.name,
                output.exit_code,
                output.stderr_tail,
                results,
            ));
        }

        parsed.map_err(|e| KrmpackError::FunctionOutput {
            name: function.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// The environment handed to exec functions: the caller's, minus variables
/// that look like host credentials. `--env KEY` lifts one back explicitly.
fn scrubbed_env(lifts: &[EnvSpec]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars()
        .filter(|(key, _)| !looks_like_secret(key))
        .collect();
    for lift in lifts {
        if let Some((key, value)) = lift.resolve() {
            env.retain(|(k, _)| k != &key);
            env.push((key, value));
        }
    }
    env
}

fn looks_like_secret(key: &str) -> bool {
    const SUFFIXES: [&str; 5] = ["_TOKEN", "_SECRET", "_PASSWORD", "_CREDENTIALS", "_API_KEY"];
    const EXACT: [&str; 3] = [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "GOOGLE_APPLICATION_CREDENTIALS",
    ];
    SUFFIXES.iter().any(|s| key.ends_with(s)) || EXACT.contains(&key)
}
