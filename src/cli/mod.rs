//! CLI definitions using clap derive API
//!
//! This module is organized into submodules for each command's argument types:
//! - eval: ad-hoc function evaluation arguments
//! - render: declarative pipeline rendering arguments
//! - update: upstream update arguments

use clap::builder::{styling::AnsiColor, Styles};
use clap::{Parser, Subcommand};

pub mod eval;
pub mod render;
pub mod update;

pub use eval::EvalArgs;
pub use render::RenderArgs;
pub use update::UpdateArgs;

/// krmpack - KRM configuration package tool
#[derive(Parser, Debug)]
#[command(
    name = "krmpack",
    author,
    version,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Package tool for KRM configuration",
    long_about = "krmpack renders declarative pipelines of KRM functions over package trees, \
                  evaluates ad-hoc functions against a package or a stdin stream, and merges \
                  upstream package updates into local forks.",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n   \
                  krmpack render                              \x1b[90m# Render the package in the current directory\x1b[0m\n   \
                  krmpack render pkg --results-dir results   \x1b[90m# Persist function results\x1b[0m\n   \
                  krmpack eval pkg --image set-namespace:v0.4 -- namespace=staging\n   \
                  krmpack eval - --exec ./fn.sh < input.yaml \x1b[90m# Evaluate over a stdin stream\x1b[0m\n   \
                  krmpack update pkg --strategy resource-merge\n\n\
                  "
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render the declared pipelines of a package tree
    Render(RenderArgs),

    /// Evaluate one function against a package or stdin
    Eval(EvalArgs),

    /// Merge upstream changes into a local package
    Update(UpdateArgs),
}
