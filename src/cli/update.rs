//! Update command arguments

use clap::Args;

use crate::manifest::UpdateStrategy;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Local package directory
    #[arg(default_value = ".")]
    pub dir: String,

    /// Merge strategy; defaults to the manifest's updateStrategy, then
    /// resource-merge
    #[arg(long, value_enum)]
    pub strategy: Option<UpdateStrategy>,

    /// Update to this ref instead of the one declared in the manifest
    #[arg(long, short = 'r')]
    pub git_ref: Option<String>,
}
