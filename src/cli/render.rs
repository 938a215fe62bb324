//! Render command arguments

use std::path::PathBuf;

use clap::Args;

use crate::runtime::ImagePullPolicy;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Root package directory
    #[arg(default_value = ".")]
    pub dir: String,

    /// Write per-invocation result files into this directory
    #[arg(long, env = "KRMPACK_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Where to write the result: 'stdout', 'unwrap', or a directory
    /// (default: in place)
    #[arg(long, short = 'o')]
    pub output: Option<String>,

    /// Render disjoint sibling subpackages in parallel. Ordering between
    /// siblings is unspecified; pipelines must not depend on sibling
    /// visibility.
    #[arg(long)]
    pub parallel: bool,

    /// Allow network access for container functions that request it
    #[arg(long)]
    pub network: bool,

    /// Run container functions as the host user instead of a non-root default
    #[arg(long)]
    pub as_current_user: bool,

    #[arg(long, value_enum, default_value_t = ImagePullPolicy::IfNotPresent)]
    pub image_pull_policy: ImagePullPolicy,

    /// Per-function timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Pass Kptfiles through the pipeline as data
    #[arg(long)]
    pub include_meta_resources: bool,
}
