//! The pass scheduler: ordered pass groups over dependency waves.
//!
//! Control flow is single-threaded and deterministic. A parallel-safe
//! pass fans its per-node visits out across a rayon pool, one dependency
//! wave at a time; visits are read-only and record node ops, which the
//! scheduler applies in ascending-id order at each wave barrier. The
//! result is bit-identical to sequential execution, and no pass ever
//! overlaps another.
//!
//! Registration order within a group is execution order and is
//! load-bearing: later passes may depend on invariants established by
//! earlier ones.

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::graph::ModuleGraph;
use crate::namespace::NameResolver;
use crate::propagate::{apply_feature_split, FeatureSpec, MarkPass, SplitPass};
use crate::report::{GraphError, RunReport};
use crate::split::{split, SplitKind};
use crate::types::{
    DepEdge, DepTag, FeatureMark, KindRegistry, KindSpec, Module, ModuleId, PropValue,
    PropertyBag,
};

/// Traversal direction of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies are visited before their dependents.
    BottomUp,
    /// Dependents are visited before their dependencies.
    TopDown,
}

/// The three ordered pass groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassGroup {
    /// Property normalization before any splitting.
    PreArch,
    /// Variant splitting by architecture, link mode and the like.
    PreDeps,
    /// Propagation, selection and checking over the split graph.
    PostDeps,
}

/// Static description of a registered pass.
#[derive(Debug, Clone)]
pub struct PassDescriptor {
    /// The pass name, used in diagnostics.
    pub name: String,
    /// Which group the pass runs in.
    pub group: PassGroup,
    /// Traversal direction.
    pub direction: Direction,
    /// Whether per-node visits may run concurrently within this pass.
    pub parallel: bool,
}

impl PassDescriptor {
    /// Convenience constructor.
    pub fn new(
        name: impl Into<String>,
        group: PassGroup,
        direction: Direction,
        parallel: bool,
    ) -> Self {
        Self {
            name: name.into(),
            group,
            direction,
            parallel,
        }
    }
}

/// A graph transformation pass.
///
/// `visit` is called once per live node, in dependency-wave order. It
/// observes the graph read-only and records mutations on the context;
/// the scheduler applies them at the wave barrier. A returned error
/// fails the node: the error is collected, the node's recorded ops are
/// discarded, and the node's dependents are skipped for the rest of the
/// run.
pub trait Pass: Send + Sync {
    /// This pass's static description.
    fn descriptor(&self) -> PassDescriptor;

    /// Visit one node.
    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError>;

    /// Epilogue run once at the pass's closing barrier, after every wave
    /// has completed and all ops are applied. Whole-graph bookkeeping
    /// that needs the pass's final wiring (e.g. suppressing replicas
    /// nothing ended up referencing) goes here.
    fn finish(&self, graph: &mut ModuleGraph, report: &mut RunReport) {
        let _ = (graph, report);
    }
}

/// A mutation recorded by a visit, applied at the wave barrier.
#[derive(Debug, Clone)]
pub(crate) enum NodeOp {
    SetProperty {
        path: String,
        value: PropValue,
    },
    ReplaceProperties(PropertyBag),
    SetEnabled(bool),
    SetSuppressed(bool),
    SetFeatureMark {
        feature: String,
        mark: FeatureMark,
    },
    Split {
        axis: String,
        values: Vec<String>,
        kind: SplitKind,
    },
    FeatureSplit {
        feature: String,
        enabled_value: String,
        direct: bool,
    },
    Rename(String),
    ReplaceDependencies {
        old: ModuleId,
        new: ModuleId,
    },
}

/// Read-only view plus op recorder handed to each visit.
pub struct VisitContext<'a> {
    graph: &'a ModuleGraph,
    config: &'a PipelineConfig,
    resolver: &'a NameResolver,
    kinds: &'a KindRegistry,
    id: ModuleId,
    ops: Vec<(ModuleId, NodeOp)>,
    errors: Vec<GraphError>,
}

impl<'a> VisitContext<'a> {
    fn new(
        graph: &'a ModuleGraph,
        config: &'a PipelineConfig,
        resolver: &'a NameResolver,
        kinds: &'a KindRegistry,
        id: ModuleId,
    ) -> Self {
        Self {
            graph,
            config,
            resolver,
            kinds,
            id,
            ops: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// The graph being transformed.
    pub fn graph(&self) -> &ModuleGraph {
        self.graph
    }

    /// The frozen configuration.
    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    /// The namespace resolver.
    pub fn resolver(&self) -> &NameResolver {
        self.resolver
    }

    /// The kind/capability registry.
    pub fn kinds(&self) -> &KindRegistry {
        self.kinds
    }

    /// The id of the node being visited.
    pub fn module_id(&self) -> ModuleId {
        self.id
    }

    /// The node being visited.
    pub fn module(&self) -> &Module {
        self.graph.module(self.id)
    }

    /// Resolved dependency edges of the visited node with their targets.
    pub fn dep_modules(&self) -> impl Iterator<Item = (&DepEdge, &Module)> {
        self.graph
            .resolved_deps(self.id)
            .map(|(_, e)| (e, self.graph.module(e.resolved.expect("resolved"))))
    }

    /// Walk the visited node's dependency closure depth-first, following
    /// only edges whose tag passes `follows`, calling `f` on each node
    /// reached (once, in visit order).
    pub fn walk_deps_depth_first(
        &self,
        follows: impl Fn(DepTag) -> bool,
        mut f: impl FnMut(&Module),
    ) {
        let mut visited: BTreeSet<ModuleId> = BTreeSet::new();
        let mut stack: Vec<ModuleId> = self
            .graph
            .resolved_deps(self.id)
            .filter(|(_, e)| follows(e.tag))
            .filter_map(|(_, e)| e.resolved)
            .collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            f(self.graph.module(next));
            let mut children: Vec<ModuleId> = self
                .graph
                .resolved_deps(next)
                .filter(|(_, e)| follows(e.tag))
                .filter_map(|(_, e)| e.resolved)
                .filter(|t| !visited.contains(t))
                .collect();
            children.reverse();
            stack.extend(children);
        }
    }

    /// Record a property write on the visited node.
    pub fn set_property(&mut self, path: &str, value: impl Into<PropValue>) {
        self.ops.push((
            self.id,
            NodeOp::SetProperty {
                path: path.to_string(),
                value: value.into(),
            },
        ));
    }

    /// Replace the visited node's whole property bag.
    pub fn replace_properties(&mut self, bag: PropertyBag) {
        self.ops.push((self.id, NodeOp::ReplaceProperties(bag)));
    }

    /// Enable or disable the visited node.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.ops.push((self.id, NodeOp::SetEnabled(enabled)));
    }

    /// Suppress emission/installation of the visited node.
    pub fn set_suppressed(&mut self, suppressed: bool) {
        self.ops.push((self.id, NodeOp::SetSuppressed(suppressed)));
    }

    /// Suppress emission/installation of another node.
    pub fn set_suppressed_on(&mut self, id: ModuleId, suppressed: bool) {
        self.ops.push((id, NodeOp::SetSuppressed(suppressed)));
    }

    /// Record a feature mark write on any node (mark passes write into
    /// their dependency closure).
    pub fn set_feature_mark_on(&mut self, id: ModuleId, feature: &str, mark: FeatureMark) {
        self.ops.push((
            id,
            NodeOp::SetFeatureMark {
                feature: feature.to_string(),
                mark,
            },
        ));
    }

    /// Set a property on another node.
    pub fn set_property_on(&mut self, id: ModuleId, path: &str, value: impl Into<PropValue>) {
        self.ops.push((
            id,
            NodeOp::SetProperty {
                path: path.to_string(),
                value: value.into(),
            },
        ));
    }

    /// Request a variant split of the visited node.
    pub fn request_split(&mut self, axis: &str, values: Vec<String>, kind: SplitKind) {
        self.ops.push((
            self.id,
            NodeOp::Split {
                axis: axis.to_string(),
                values,
                kind,
            },
        ));
    }

    /// Request a feature split of the visited node (see the propagation
    /// module for the materialization rules).
    pub fn request_feature_split(&mut self, feature: &str, enabled_value: &str, direct: bool) {
        self.ops.push((
            self.id,
            NodeOp::FeatureSplit {
                feature: feature.to_string(),
                enabled_value: enabled_value.to_string(),
                direct,
            },
        ));
    }

    /// Rename the visited node.
    pub fn rename(&mut self, new_name: &str) {
        self.ops.push((self.id, NodeOp::Rename(new_name.to_string())));
    }

    /// Rewire every dependency on `old` anywhere in the graph to `new`.
    pub fn replace_dependencies(&mut self, old: ModuleId, new: ModuleId) {
        self.ops
            .push((self.id, NodeOp::ReplaceDependencies { old, new }));
    }

    /// Collect a non-fatal error without failing the visited node.
    pub fn error(&mut self, error: GraphError) {
        self.errors.push(error);
    }
}

/// Builder for a pipeline: pass registrations, module kinds, features.
///
/// There is no ambient registry; everything a run needs is owned here,
/// so several independent pipelines can run in one process.
#[derive(Default)]
pub struct PipelineBuilder {
    passes: Vec<Arc<dyn Pass>>,
    kinds: KindRegistry,
}

impl PipelineBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module kind.
    pub fn register_kind(mut self, name: impl Into<String>, spec: KindSpec) -> Self {
        self.kinds.register(name, spec);
        self
    }

    /// Register a pass. Registration order within a group is execution
    /// order.
    pub fn register_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Arc::new(pass));
        self
    }

    /// Register a propagation feature: its mark pass and split pass are
    /// appended, in that order, to the post-deps group.
    pub fn register_feature(mut self, feature: impl FeatureSpec + 'static) -> Self {
        let feature = Arc::new(feature);
        self.passes.push(Arc::new(MarkPass::new(feature.clone())));
        self.passes.push(Arc::new(SplitPass::new(feature)));
        self
    }

    /// Finish building.
    pub fn build(self) -> Pipeline {
        Pipeline {
            passes: self.passes,
            kinds: self.kinds,
        }
    }
}

/// A runnable pass pipeline.
pub struct Pipeline {
    passes: Vec<Arc<dyn Pass>>,
    kinds: KindRegistry,
}

impl Pipeline {
    /// The kind/capability registry the pipeline was built with.
    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Run the full pipeline over `graph`.
    ///
    /// Prologue: resolve namespace imports (terminal on failure) and
    /// freeze the configuration. The `pre-arch` and `pre-deps` groups
    /// run before dependency references resolve, so renames and
    /// arch/link splitting settle first; resolution is then
    /// variant-aware, and the `post-deps` group runs over the wired
    /// graph. All non-fatal errors are collected into the returned
    /// report; the run continues past them so independent errors
    /// surface together.
    pub fn run(
        &self,
        graph: &mut ModuleGraph,
        resolver: &NameResolver,
        config: &PipelineConfig,
    ) -> RunReport {
        let mut report = RunReport::new();

        if let Err(err) = resolver.resolve_imports() {
            report.collect(GraphError::Namespace(err));
            return report;
        }
        config.freeze();

        for group in [PassGroup::PreArch, PassGroup::PreDeps, PassGroup::PostDeps] {
            if group == PassGroup::PostDeps {
                graph.resolve_edges(resolver, config, &mut report);
            }
            for pass in &self.passes {
                if pass.descriptor().group != group {
                    continue;
                }
                if self
                    .run_pass(pass.as_ref(), graph, resolver, config, &mut report)
                    .is_err()
                {
                    return report;
                }
            }
        }

        // A uniqueness violation here means the splitter misbehaved; the
        // pipeline is inconsistent and its output cannot be trusted.
        if let Err(msg) = graph.verify_variant_identity() {
            panic!("variant identity invariant violated after run: {msg}");
        }

        report
    }

    /// Run one pass to completion. `Err` aborts the remaining passes
    /// (structural failure such as a dependency cycle).
    fn run_pass(
        &self,
        pass: &dyn Pass,
        graph: &mut ModuleGraph,
        resolver: &NameResolver,
        config: &PipelineConfig,
        report: &mut RunReport,
    ) -> Result<(), ()> {
        let desc = pass.descriptor();
        debug!(pass = %desc.name, "running pass");

        let waves = match desc.direction {
            Direction::BottomUp => graph.bottom_up_waves(),
            Direction::TopDown => graph.top_down_waves(),
        };
        let waves = match waves {
            Ok(waves) => waves,
            Err(err) => {
                report.collect(err);
                return Err(());
            }
        };

        for wave in waves {
            // A node whose dependency failed is itself failed and skipped
            // for the remainder of the run; the rest of the wave runs so
            // independent errors surface together.
            let mut eligible: Vec<ModuleId> = Vec::with_capacity(wave.len());
            for id in wave {
                if !graph.module(id).is_live() {
                    continue;
                }
                let dep_failed = graph
                    .resolved_deps(id)
                    .filter_map(|(_, e)| e.resolved)
                    .any(|t| graph.module(t).failed);
                if dep_failed {
                    graph.module_mut(id).failed = true;
                } else {
                    eligible.push(id);
                }
            }

            let visit_one = |&id: &ModuleId| {
                let graph: &ModuleGraph = graph;
                let mut ctx = VisitContext::new(graph, config, resolver, &self.kinds, id);
                let failure = pass.visit(graph.module(id), &mut ctx).err();
                (id, ctx.ops, ctx.errors, failure)
            };

            let results: Vec<(ModuleId, Vec<(ModuleId, NodeOp)>, Vec<GraphError>, Option<GraphError>)> =
                if desc.parallel {
                    eligible.par_iter().map(visit_one).collect()
                } else {
                    eligible.iter().map(visit_one).collect()
                };

            // Barrier: apply recorded ops in ascending visit order.
            for (id, ops, errors, failure) in results {
                for error in errors {
                    report.collect(error);
                }
                if let Some(error) = failure {
                    report.collect(error);
                    graph.module_mut(id).failed = true;
                    continue;
                }
                for (target, op) in ops {
                    self.apply_op(graph, resolver, report, &desc.name, target, op);
                }
            }
        }
        pass.finish(graph, report);
        Ok(())
    }

    fn apply_op(
        &self,
        graph: &mut ModuleGraph,
        resolver: &NameResolver,
        report: &mut RunReport,
        pass: &str,
        target: ModuleId,
        op: NodeOp,
    ) {
        match op {
            NodeOp::SetProperty { path, value } => {
                graph.module_mut(target).properties.set(&path, value);
            }
            NodeOp::ReplaceProperties(bag) => {
                graph.module_mut(target).properties = bag;
            }
            NodeOp::SetEnabled(enabled) => {
                graph.module_mut(target).enabled = enabled;
            }
            NodeOp::SetSuppressed(suppressed) => {
                graph.module_mut(target).suppressed = suppressed;
            }
            NodeOp::SetFeatureMark { feature, mark } => {
                graph.module_mut(target).set_feature_mark(&feature, mark);
            }
            NodeOp::Split { axis, values, kind } => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                let _ = split(graph, target, &axis, &values, kind);
            }
            NodeOp::FeatureSplit {
                feature,
                enabled_value,
                direct,
            } => {
                apply_feature_split(graph, target, &feature, &enabled_value, direct);
            }
            NodeOp::Rename(new_name) => {
                if let Err(err) = graph.rename(target, &new_name, resolver) {
                    let module = graph.module(target);
                    report.collect(GraphError::Pass {
                        pass: pass.to_string(),
                        module: module.display_name(),
                        message: err.to_string(),
                    });
                }
            }
            NodeOp::ReplaceDependencies { old, new } => {
                graph.replace_dependencies(old, new);
            }
        }
    }
}
