//! krmpack - KRM configuration package tool
//!
//! Renders declarative pipelines of KRM functions over package trees,
//! evaluates ad-hoc functions against a package or a stdin stream, and merges
//! upstream package updates into local forks.

use clap::Parser;

mod cli;
mod commands;
mod error;
mod fnspec;
mod manifest;
mod merge;
mod pipeline;
mod pkg;
mod progress;
mod resource;
mod results;
mod runtime;
mod selector;
mod upstream;

use cli::{Cli, Commands};

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "krmpack=debug" } else { "krmpack=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Eval(args) => commands::eval::run(args),
        Commands::Update(args) => commands::update::run(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
