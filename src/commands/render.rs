//! `krmpack render`: run the declared pipelines of a package tree

use std::path::PathBuf;

use crate::cli::RenderArgs;
use crate::commands::{emit, runner_options, OutputTarget};
use crate::error::Result;
use crate::pipeline::Renderer;
use crate::results::ResultAggregator;
use crate::runtime::{CancellationToken, DockerRuntime};

pub fn run(args: RenderArgs) -> Result<()> {
    let root = PathBuf::from(&args.dir);
    let target = OutputTarget::parse(args.output.as_deref());

    let docker = DockerRuntime::default();
    let renderer = Renderer {
        docker: &docker,
        options: runner_options(
            args.image_pull_policy,
            args.network,
            args.as_current_user,
            args.timeout,
            &[],
            &[],
        )?,
        cancel: CancellationToken::new(),
        parallel: args.parallel,
        include_meta_resources: args.include_meta_resources,
    };

    let mut aggregator = ResultAggregator::new();
    let outcome = renderer.render(&root, &mut aggregator);

    // Results persist even when the render fails, so validator findings are
    // never lost.
    if let Some(dir) = &args.results_dir {
        aggregator.write_to_dir(dir)?;
    }
    let outcome = outcome?;

    emit(&target, &root, &outcome.contents, &outcome.resources)?;

    if target == OutputTarget::InPlace {
        let functions = aggregator.invocations().len();
        eprintln!(
            "Rendered {} resource(s) through {} function invocation(s)",
            outcome.resources.len(),
            functions
        );
    }
    Ok(())
}
