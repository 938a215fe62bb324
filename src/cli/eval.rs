//! Eval command arguments

use std::path::PathBuf;

use clap::Args;

use crate::runtime::ImagePullPolicy;

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Package directory, or '-' to read a resource stream from stdin
    #[arg(default_value = ".")]
    pub dir: String,

    /// Function container image
    #[arg(long, short = 'i')]
    pub image: Option<String>,

    /// Function executable command line (quote-aware)
    #[arg(long, short = 'e')]
    pub exec: Option<String>,

    /// Path to a functionConfig resource file
    #[arg(long = "fn-config")]
    pub fn_config: Option<PathBuf>,

    /// Write per-invocation result files into this directory
    #[arg(long, env = "KRMPACK_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Allow network access for container functions that request it
    #[arg(long)]
    pub network: bool,

    /// Read-only bind mount, docker syntax: type=bind,src=...,dst=...
    #[arg(long)]
    pub mount: Vec<String>,

    /// Environment for the function: KEY=VALUE, or KEY to lift from the host
    #[arg(long)]
    pub env: Vec<String>,

    /// Run container functions as the host user instead of a non-root default
    #[arg(long)]
    pub as_current_user: bool,

    #[arg(long, value_enum, default_value_t = ImagePullPolicy::IfNotPresent)]
    pub image_pull_policy: ImagePullPolicy,

    /// Per-function timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Scope the function to resources with this apiVersion
    #[arg(long)]
    pub match_api_version: Option<String>,

    /// Scope the function to resources of this kind
    #[arg(long)]
    pub match_kind: Option<String>,

    /// Scope the function to resources with this name
    #[arg(long)]
    pub match_name: Option<String>,

    /// Scope the function to resources in this namespace
    #[arg(long)]
    pub match_namespace: Option<String>,

    /// Pass Kptfiles to the function as data
    #[arg(long)]
    pub include_meta_resources: bool,

    /// Where to write the result: 'stdout', 'unwrap', or a directory
    #[arg(long, short = 'o')]
    pub output: Option<String>,

    /// key=value entries for a synthesized ConfigMap; a first bare argument
    /// overrides the kind
    #[arg(last = true)]
    pub fn_args: Vec<String>,
}
