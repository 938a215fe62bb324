//! Pipeline execution over a package tree
//!
//! Packages render in post-order: every subpackage completes before its
//! parent's pipeline starts, so a parent's functions see already-transformed
//! child resources. Within one package, mutators run in declared order, then
//! validators; validator output items are ignored and error-severity results
//! are lifted into `ValidationFailed` only after the whole validator list has
//! run. Sibling subpackages may render in parallel behind an explicit flag —
//! their subtrees are disjoint, and ordering between siblings is
//! deliberately unspecified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{KrmpackError, Result};
use crate::fnspec::{self, ResolvedFunction};
use crate::pkg::reader::{self, PackageContents, ReaderOptions};
use crate::pkg::tree::{self, PackageNode};
use crate::resource::list::ResourceList;
use crate::resource::Resource;
use crate::results::{ResultAggregator, Severity};
use crate::runtime::{CancellationToken, DockerRuntime, FunctionRunner, RunnerOptions};
use crate::selector;

/// Renders the declared pipelines of a package tree.
pub struct Renderer<'a> {
    pub docker: &'a DockerRuntime,
    pub options: RunnerOptions,
    pub cancel: CancellationToken,
    /// Render disjoint sibling subpackages on separate threads.
    pub parallel: bool,
    /// Pass Kptfiles through the pipeline as data.
    pub include_meta_resources: bool,
}

/// The transformed resource set plus the reader state the writer needs.
#[derive(Debug)]
pub struct RenderOutcome {
    pub resources: Vec<Resource>,
    pub contents: PackageContents,
}

impl Renderer<'_> {
    /// Render the tree rooted at `root`. Results accumulate into `aggregator`
    /// even when rendering fails, so the caller can persist them.
    pub fn render(&self, root: &Path, aggregator: &mut ResultAggregator) -> Result<RenderOutcome> {
        let nodes = tree::walk(root)?;

        let mut contents_by_node: HashMap<PathBuf, PackageContents> = HashMap::new();
        for node in &nodes {
            let options = ReaderOptions {
                include_subpackages: false,
                path_prefix: reader::slash_path(&node.rel_path),
            };
            contents_by_node.insert(node.path.clone(), reader::read_package(&node.path, &options)?);
        }

        let mut merged = PackageContents::default();
        for node in &nodes {
            if let Some(contents) = contents_by_node.get(&node.path) {
                merged.merge(contents.clone());
            }
        }

        let root_node = match nodes.last() {
            Some(node) => node,
            None => {
                return Err(KrmpackError::ManifestMissing {
                    path: root.display().to_string(),
                })
            }
        };

        let mut resources = self.render_node(root_node, &nodes, &contents_by_node, aggregator)?;

        if !self.include_meta_resources {
            // Manifests never entered the working set; restore them so the
            // writer does not read their absence as deletion.
            resources.extend(
                merged
                    .resources
                    .iter()
                    .filter(|r| r.is_manifest())
                    .cloned(),
            );
        }

        Ok(RenderOutcome {
            resources,
            contents: merged,
        })
    }

    fn render_node(
        &self,
        node: &PackageNode,
        nodes: &[PackageNode],
        contents: &HashMap<PathBuf, PackageContents>,
        aggregator: &mut ResultAggregator,
    ) -> Result<Vec<Resource>> {
        let children = tree::direct_children(nodes, node);

        let child_sets = if self.parallel && children.len() > 1 {
            self.render_children_parallel(&children, nodes, contents, aggregator)?
        } else {
            let mut sets = Vec::with_capacity(children.len());
            for child in &children {
                sets.push(self.render_node(child, nodes, contents, aggregator)?);
            }
            sets
        };

        let own = contents
            .get(&node.path)
            .map(|c| c.resources.clone())
            .unwrap_or_default();
        let mut working: Vec<Resource> = own
            .into_iter()
            .filter(|r| self.include_meta_resources || !r.is_manifest())
            .collect();
        for set in child_sets {
            working.extend(set);
        }

        let pipeline = node.manifest.pipeline();
        if pipeline.is_empty() {
            return Ok(working);
        }
        tracing::info!(package = %node.display_name(), "rendering pipeline");

        let runner = FunctionRunner {
            docker: self.docker,
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            package_dir: node.path.clone(),
        };

        for spec in &pipeline.mutators {
            let function = fnspec::resolve(spec, &node.path)?;
            working = apply_function(&runner, &function, working, aggregator, false)?;
        }

        let mut validation_errors = Vec::new();
        for spec in &pipeline.validators {
            let function = fnspec::resolve(spec, &node.path)?;
            working = apply_function(&runner, &function, working, aggregator, true)?;
            if let Some(invocation) = aggregator.invocations().last() {
                validation_errors.extend(
                    invocation
                        .items
                        .iter()
                        .filter(|r| r.severity == Severity::Error)
                        .cloned(),
                );
            }
        }
        if !validation_errors.is_empty() {
            return Err(KrmpackError::validation_failed(validation_errors));
        }

        Ok(working)
    }

    fn render_children_parallel(
        &self,
        children: &[&PackageNode],
        nodes: &[PackageNode],
        contents: &HashMap<PathBuf, PackageContents>,
        aggregator: &mut ResultAggregator,
    ) -> Result<Vec<Vec<Resource>>> {
        let outcomes: Vec<(Result<Vec<Resource>>, ResultAggregator)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = children
                    .iter()
                    .map(|child| {
                        scope.spawn(move || {
                            let mut child_aggregator = ResultAggregator::new();
                            let result =
                                self.render_node(child, nodes, contents, &mut child_aggregator);
                            (result, child_aggregator)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            (
                                Err(KrmpackError::IoError {
                                    message: "render worker panicked".to_string(),
                                }),
                                ResultAggregator::new(),
                            )
                        })
                    })
                    .collect()
            });

        // Child results absorb in declaration order so sequence ids stay
        // causally consistent within each sibling.
        let mut sets = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (result, child_aggregator) in outcomes {
            aggregator.absorb(child_aggregator);
            match result {
                Ok(set) => sets.push(set),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(sets),
        }
    }
}

/// Run one function against a working set: scope through selectors, invoke,
/// reconcile. Used by both `render` and `eval`.
///
/// With `validate_only` the function's output items are discarded and the
/// matched input flows back unchanged. In both modes the invocation's results
/// are recorded into `aggregator`; a failed invocation records whatever
/// results it emitted before propagating the error.
pub fn apply_function(
    runner: &FunctionRunner<'_>,
    function: &ResolvedFunction,
    working: Vec<Resource>,
    aggregator: &mut ResultAggregator,
    validate_only: bool,
) -> Result<Vec<Resource>> {
    let (matched, rest) = selector::select(working, &function.selectors, &function.exclude);

    let input = ResourceList::new(matched.clone()).with_function_config(function.config.clone());

    match runner.invoke(function, &input) {
        Ok(output) => {
            aggregator.record(&function.name, output.results.clone(), 0);
            let items = if validate_only {
                matched
            } else {
                reconcile(matched, output.items)
            };
            Ok(items.into_iter().chain(rest).collect())
        }
        Err(KrmpackError::FunctionExecution {
            name,
            exit_code,
            stderr_tail,
            results,
        }) => {
            aggregator.record(&name, results.clone(), exit_code);
            Err(KrmpackError::FunctionExecution {
                name,
                exit_code,
                stderr_tail,
                results,
            })
        }
        Err(e) => Err(e),
    }
}

/// Correlate function output with its input by resource identity.
///
/// Matched outputs inherit the input's comments and, when the function did
/// not set one, its location. Unmatched outputs are new resources; unmatched
/// inputs are deletions. Output order is preserved as emitted.
fn reconcile(inputs: Vec<Resource>, outputs: Vec<Resource>) -> Vec<Resource> {
    let mut remaining: Vec<Option<Resource>> = inputs.into_iter().map(Some).collect();

    outputs
        .into_iter()
        .map(|mut output| {
            let matched = remaining.iter_mut().find_map(|slot| {
                if slot.as_ref().is_some_and(|input| input.id() == output.id()) {
                    slot.take()
                } else {
                    None
                }
            });
            if let Some(input) = matched {
                output.set_comments(input.comments().clone());
                if output.path().is_none() {
                    if let Some(path) = input.path() {
                        let path = path.to_string();
                        output.set_location(&path, input.index());
                    }
                }
            }
            output
        })
        .collect()
}
