//! `krmpack eval`: evaluate one function against a package or a stdin stream

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use crate::cli::EvalArgs;
use crate::commands::{emit, runner_options, OutputTarget};
use crate::error::{KrmpackError, Result};
use crate::fnspec::{self, FunctionSpec};
use crate::pipeline::apply_function;
use crate::pkg::reader::{self, PackageContents, ReaderOptions};
use crate::resource::list::ResourceList;
use crate::resource::Resource;
use crate::results::{ResultAggregator, Severity};
use crate::runtime::{CancellationToken, DockerRuntime, FunctionRunner};
use crate::selector::Selector;

pub fn run(args: EvalArgs) -> Result<()> {
    let from_stdin = args.dir == "-";
    if args.exec.is_some() && (args.network || !args.mount.is_empty() || !args.env.is_empty()) {
        return Err(KrmpackError::InvalidFunctionSpec {
            reason: "--network, --mount and --env are only valid for container functions"
                .to_string(),
        });
    }

    let spec = build_spec(&args)?;
    let package_dir = if from_stdin {
        std::env::current_dir()?
    } else {
        PathBuf::from(&args.dir)
    };
    let mut function = fnspec::resolve(&spec, &package_dir)?;
    if let Some(config) = inline_config(&args)? {
        if function.config.is_some() {
            return Err(KrmpackError::InvalidFunctionSpec {
                reason: "--fn-config cannot be combined with key=value arguments".to_string(),
            });
        }
        function.config = Some(config);
    }

    // Stdin input has nowhere to write back to; default to stdout.
    let target = match (&args.output, from_stdin) {
        (None, true) => OutputTarget::Stdout,
        (flag, _) => OutputTarget::parse(flag.as_deref()),
    };

    let (contents, input) = if from_stdin {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        (PackageContents::default(), ResourceList::parse_stream(&text)?)
    } else {
        let contents = reader::read_package(
            &package_dir,
            &ReaderOptions {
                include_subpackages: true,
                ..Default::default()
            },
        )?;
        let input = contents.resources.clone();
        (contents, input)
    };

    let (working, manifests): (Vec<Resource>, Vec<Resource>) = if args.include_meta_resources {
        (input, Vec::new())
    } else {
        input.into_iter().partition(|r| !r.is_manifest())
    };

    let docker = DockerRuntime::default();
    let runner = FunctionRunner {
        docker: &docker,
        options: runner_options(
            args.image_pull_policy,
            args.network,
            args.as_current_user,
            args.timeout,
            &args.mount,
            &args.env,
        )?,
        cancel: CancellationToken::new(),
        package_dir,
    };

    let mut aggregator = ResultAggregator::new();
    let applied = apply_function(&runner, &function, working, &mut aggregator, false);

    if let Some(dir) = &args.results_dir {
        aggregator.write_to_dir(dir)?;
    }
    let mut resources = applied?;
    resources.extend(manifests);

    if aggregator.classification() == Some(Severity::Error) {
        return Err(KrmpackError::validation_failed(aggregator.errors()));
    }

    emit(&target, &PathBuf::from(&args.dir), &contents, &resources)
}

fn build_spec(args: &EvalArgs) -> Result<FunctionSpec> {
    let mut selector = Selector::default();
    if let Some(v) = &args.match_api_version {
        selector.api_version = v.clone();
    }
    if let Some(v) = &args.match_kind {
        selector.kind = v.clone();
    }
    if let Some(v) = &args.match_name {
        selector.name = v.clone();
    }
    if let Some(v) = &args.match_namespace {
        selector.namespace = v.clone();
    }

    let config_path = match &args.fn_config {
        // Resolved against the invocation cwd, not the package, so absolutize
        // before handing it to the package-relative resolver.
        Some(path) => Some(
            path.canonicalize()
                .map_err(|_| KrmpackError::FunctionConfigNotFound {
                    path: path.display().to_string(),
                })?
                .display()
                .to_string(),
        ),
        None => None,
    };

    Ok(FunctionSpec {
        image: args.image.clone(),
        exec: args.exec.clone(),
        config_path,
        network: args.network && args.image.is_some(),
        selectors: if selector.is_empty() {
            vec![]
        } else {
            vec![selector]
        },
        ..Default::default()
    })
}

/// `-- key=value ...` synthesizes a ConfigMap; a first bare argument
/// overrides its kind.
fn inline_config(args: &EvalArgs) -> Result<Option<Resource>> {
    if args.fn_args.is_empty() {
        return Ok(None);
    }
    let mut kind = "ConfigMap".to_string();
    let mut data = BTreeMap::new();
    for (i, arg) in args.fn_args.iter().enumerate() {
        match arg.split_once('=') {
            Some((key, value)) => {
                data.insert(key.to_string(), value.to_string());
            }
            None if i == 0 => kind = arg.clone(),
            None => {
                return Err(KrmpackError::InvalidFunctionSpec {
                    reason: format!("function argument '{arg}' is not key=value"),
                })
            }
        }
    }
    Ok(Some(fnspec::synthesize_config_map(&kind, &data)))
}
