//! Generic propagation of cross-cutting requirements: mark, then split.
//!
//! Every feature of the form "anything statically linked into an
//! X-enabled binary must itself be X" is two passes sharing the node's
//! per-feature mark:
//!
//! 1. **Mark** (top-down): for every node that directly requires the
//!    feature, walk its dependency closure along the feature's edge-tag
//!    subset and set the `dependency_requires` flag on each node reached,
//!    leaving their own direct requirement untouched.
//! 2. **Split** (bottom-up): materialize the variants. A root with the
//!    direct requirement becomes a single enabled replica in place; any
//!    other flagged node becomes a (disabled, enabled) pair. Dependents
//!    reach the right replica through the splitter's axis matching when
//!    their own split runs; dependents without the feature stay on the
//!    disabled primary. The replica nothing will request is suppressed,
//!    never deleted.
//!
//! A feature author supplies only the edge-tag filter and the
//! direct-requirement predicate; the materialization and rewiring above
//! is shared.

use std::sync::Arc;

use tracing::debug;

use crate::graph::ModuleGraph;
use crate::report::{GraphError, RunReport};
use crate::scheduler::{Direction, Pass, PassDescriptor, PassGroup, VisitContext};
use crate::split::{split, SplitKind};
use crate::types::{DepTag, FeatureMark, Module, ModuleId};

/// Two mutually exclusive values of one feature requested on one node.
///
/// Reported at mark time as a terminal per-module error, never resolved
/// by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureConflict {
    /// The first requested value.
    pub first: String,
    /// The incompatible second value.
    pub second: String,
}

/// A cross-cutting requirement propagated with mark-then-split.
pub trait FeatureSpec: Send + Sync {
    /// The feature's axis name, e.g. `sanitize`.
    fn name(&self) -> &str;

    /// The variant value of the enabled replica, e.g. `asan`.
    fn enabled_value(&self) -> &str;

    /// Which edges the requirement flows along.
    fn follows(&self, tag: DepTag) -> bool;

    /// Whether the node's own configuration requires the feature.
    fn direct_requirement(&self, module: &Module) -> Result<bool, FeatureConflict>;

    /// Nodes that may never carry the feature are skipped by both passes.
    fn eligible(&self, module: &Module) -> bool {
        let _ = module;
        true
    }
}

fn conflict_error(module: &Module, feature: &str, conflict: FeatureConflict) -> GraphError {
    GraphError::FeatureConflict {
        module: module.display_name(),
        feature: feature.to_string(),
        first: conflict.first,
        second: conflict.second,
    }
}

/// The top-down marking half of a feature.
pub struct MarkPass<F: FeatureSpec> {
    feature: Arc<F>,
}

impl<F: FeatureSpec> MarkPass<F> {
    /// Wrap a feature.
    pub fn new(feature: Arc<F>) -> Self {
        Self { feature }
    }
}

impl<F: FeatureSpec> Pass for MarkPass<F> {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            format!("{}_mark", self.feature.name()),
            PassGroup::PostDeps,
            Direction::TopDown,
            true,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        let name = self.feature.name();
        let direct = self
            .feature
            .direct_requirement(module)
            .map_err(|c| conflict_error(module, name, c))?;
        if !direct || !self.feature.eligible(module) {
            return Ok(());
        }

        // Marking is monotonic (flags only turn on), so re-running the
        // pass reproduces the same flag set.
        let mut reached: Vec<(ModuleId, FeatureMark)> = Vec::new();
        ctx.walk_deps_depth_first(
            |tag| self.feature.follows(tag),
            |dep| {
                if dep.is_live()
                    && self.feature.eligible(dep)
                    && !dep.feature_mark(name).dependency_requires
                {
                    reached.push((dep.id, dep.feature_mark(name)));
                }
            },
        );
        for (id, mut mark) in reached {
            mark.dependency_requires = true;
            ctx.set_feature_mark_on(id, name, mark);
        }
        Ok(())
    }
}

/// The bottom-up splitting half of a feature.
pub struct SplitPass<F: FeatureSpec> {
    feature: Arc<F>,
}

impl<F: FeatureSpec> SplitPass<F> {
    /// Wrap a feature.
    pub fn new(feature: Arc<F>) -> Self {
        Self { feature }
    }
}

impl<F: FeatureSpec> Pass for SplitPass<F> {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            format!("{}_split", self.feature.name()),
            PassGroup::PostDeps,
            Direction::BottomUp,
            false,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        let name = self.feature.name();
        // A node that already carries the axis was materialized by an
        // earlier run of this pass; re-splitting is a no-op by contract.
        if module.variant().has_axis(name) {
            return Ok(());
        }
        if !self.feature.eligible(module) {
            return Ok(());
        }
        let direct = self
            .feature
            .direct_requirement(module)
            .map_err(|c| conflict_error(module, name, c))?;
        let mark = module.feature_mark(name);
        if direct || mark.dependency_requires {
            ctx.request_feature_split(name, self.feature.enabled_value(), direct);
        }
        Ok(())
    }

    fn finish(&self, graph: &mut ModuleGraph, _report: &mut RunReport) {
        // Only now is referenced-ness known: dependers rewired to their
        // matching replica as their own splits ran during this pass. A
        // replica of a two-way split that nothing ended up referencing is
        // suppressed, never deleted (its sibling edges stay structurally
        // valid). Root splits produce a single replica and are exempt.
        let name = self.feature.name().to_string();
        let ids: Vec<ModuleId> = graph.ids().collect();
        for id in ids {
            let module = graph.module(id);
            if !module.is_live() || module.variant().value_of(&name).is_none() {
                continue;
            }
            let two_way = graph
                .split_group(id, &name)
                .is_some_and(|g| g.members.len() == 2);
            if !two_way {
                continue;
            }
            let referenced = graph
                .dependers(id)
                .iter()
                .any(|&d| graph.module(d).is_live());
            if !referenced {
                graph.module_mut(id).suppressed = true;
            }
        }
    }
}

/// Materialize a feature split on one node.
///
/// Called by the scheduler when applying a split pass's recorded op; the
/// shared routine every feature reuses.
pub(crate) fn apply_feature_split(
    graph: &mut ModuleGraph,
    id: ModuleId,
    feature: &str,
    enabled_value: &str,
    direct: bool,
) {
    if graph.module(id).variant().has_axis(feature) {
        return;
    }

    if direct && graph.is_root(id) {
        // Nothing refers to a root, so no "off" sibling is needed; the
        // single replica flips to enabled in place.
        let members = split(graph, id, feature, &[enabled_value], SplitKind::Global);
        graph.module_mut(members[0]).set_feature_mark(
            feature,
            FeatureMark {
                enabled: true,
                dependency_requires: false,
            },
        );
        debug!(module = %graph.module(id).display_name(), feature, "root feature split");
        return;
    }

    let members = split(graph, id, feature, &["", enabled_value], SplitKind::Global);
    let (off, on) = (members[0], members[1]);
    graph
        .module_mut(off)
        .set_feature_mark(feature, FeatureMark::default());
    graph.module_mut(on).set_feature_mark(
        feature,
        FeatureMark {
            enabled: true,
            dependency_requires: false,
        },
    );
    debug!(
        module = %graph.module(off).base_name(),
        feature,
        direct,
        "feature split into disabled/enabled pair"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::features::Sanitizer;
    use crate::namespace::{NameResolver, NamespaceId};
    use crate::scheduler::PipelineBuilder;
    use crate::types::{Module, PropertyBag, TargetRef};

    fn module(name: &str, props: PropertyBag) -> Module {
        Module::new(name, "library", NamespaceId::ROOT, "a", "a/BUILD", props)
    }

    fn sanitized_binary_over_static_lib() -> (ModuleGraph, NameResolver) {
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();

        let lib = graph.add_module(module("libutil", PropertyBag::new()));
        resolver
            .declare_module(NamespaceId::ROOT, "libutil", lib)
            .unwrap();

        let mut props = PropertyBag::new();
        props.set("sanitize.address", true);
        let bin = graph.add_module(module("app", props));
        resolver.declare_module(NamespaceId::ROOT, "app", bin).unwrap();
        graph.add_dependency(bin, TargetRef::parse("libutil"), DepTag::StaticLink);

        (graph, resolver)
    }

    #[test]
    fn binary_gets_one_variant_lib_gets_two() {
        let (mut graph, resolver) = sanitized_binary_over_static_lib();
        let pipeline = PipelineBuilder::new().register_feature(Sanitizer).build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);
        assert!(!report.is_failed(), "{}", report.render());

        let lib_variants = graph.variants(NamespaceId::ROOT, "libutil").to_vec();
        let bin_variants = graph.variants(NamespaceId::ROOT, "app").to_vec();
        assert_eq!(lib_variants.len(), 2);
        assert_eq!(bin_variants.len(), 1, "roots get no disabled sibling");

        let bin = graph.module(bin_variants[0]);
        assert_eq!(bin.variant().value_of("sanitize"), Some("asan"));
        assert!(bin.feature_mark("sanitize").enabled);

        // The binary's static-link edge lands on the enabled lib replica.
        let (_, edge) = graph.resolved_deps(bin.id).next().unwrap();
        let target = graph.module(edge.resolved.unwrap());
        assert_eq!(target.variant().value_of("sanitize"), Some("asan"));
        assert!(target.feature_mark("sanitize").enabled);
        assert!(!target.suppressed, "the requested replica is emitted");

        // The disabled replica survives but only as a wired ghost.
        let off = lib_variants
            .iter()
            .map(|&v| graph.module(v))
            .find(|m| m.variant().value_of("sanitize") == Some(""))
            .unwrap();
        assert!(!off.feature_mark("sanitize").enabled);
        assert!(off.suppressed, "nothing requests the disabled replica");
    }

    #[test]
    fn shared_link_edges_do_not_propagate() {
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();
        let lib = graph.add_module(module("libshared", PropertyBag::new()));
        resolver
            .declare_module(NamespaceId::ROOT, "libshared", lib)
            .unwrap();
        let mut props = PropertyBag::new();
        props.set("sanitize.address", true);
        let bin = graph.add_module(module("app", props));
        resolver.declare_module(NamespaceId::ROOT, "app", bin).unwrap();
        graph.add_dependency(bin, TargetRef::parse("libshared"), DepTag::SharedLink);

        let pipeline = PipelineBuilder::new().register_feature(Sanitizer).build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);
        assert!(!report.is_failed(), "{}", report.render());

        assert_eq!(
            graph.variants(NamespaceId::ROOT, "libshared").len(),
            1,
            "a shared dependency is never marked"
        );
    }

    #[test]
    fn propagation_is_transitive() {
        // app -(static)-> libmid -(static)-> libleaf
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();
        let leaf = graph.add_module(module("libleaf", PropertyBag::new()));
        resolver
            .declare_module(NamespaceId::ROOT, "libleaf", leaf)
            .unwrap();
        let mid = graph.add_module(module("libmid", PropertyBag::new()));
        resolver
            .declare_module(NamespaceId::ROOT, "libmid", mid)
            .unwrap();
        graph.add_dependency(mid, TargetRef::parse("libleaf"), DepTag::StaticLink);
        let mut props = PropertyBag::new();
        props.set("sanitize.address", true);
        let bin = graph.add_module(module("app", props));
        resolver.declare_module(NamespaceId::ROOT, "app", bin).unwrap();
        graph.add_dependency(bin, TargetRef::parse("libmid"), DepTag::StaticLink);

        let pipeline = PipelineBuilder::new().register_feature(Sanitizer).build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);
        assert!(!report.is_failed(), "{}", report.render());

        assert_eq!(graph.variants(NamespaceId::ROOT, "libleaf").len(), 2);
        assert_eq!(graph.variants(NamespaceId::ROOT, "libmid").len(), 2);

        // The enabled mid replica links the enabled leaf replica.
        let mid_on = graph
            .variants(NamespaceId::ROOT, "libmid")
            .iter()
            .map(|&v| graph.module(v))
            .find(|m| m.variant().value_of("sanitize") == Some("asan"))
            .unwrap();
        let (_, edge) = graph.resolved_deps(mid_on.id).next().unwrap();
        let leaf_linked = graph.module(edge.resolved.unwrap());
        assert_eq!(leaf_linked.variant().value_of("sanitize"), Some("asan"));
    }

    #[test]
    fn conflicting_direct_values_fail_the_module() {
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();
        let mut props = PropertyBag::new();
        props.set("sanitize.address", true);
        props.set("sanitize.hwaddress", true);
        let bin = graph.add_module(module("app", props));
        resolver.declare_module(NamespaceId::ROOT, "app", bin).unwrap();

        let pipeline = PipelineBuilder::new().register_feature(Sanitizer).build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);

        assert!(report.is_failed());
        assert!(matches!(
            report.errors()[0],
            GraphError::FeatureConflict { .. }
        ));
        assert!(graph.module(bin).failed);
    }

    #[test]
    fn never_eligible_modules_are_not_marked_or_split() {
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();
        let mut lib_props = PropertyBag::new();
        lib_props.set("sanitize.never", true);
        let lib = graph.add_module(module("libraw", lib_props));
        resolver
            .declare_module(NamespaceId::ROOT, "libraw", lib)
            .unwrap();
        let mut props = PropertyBag::new();
        props.set("sanitize.address", true);
        let bin = graph.add_module(module("app", props));
        resolver.declare_module(NamespaceId::ROOT, "app", bin).unwrap();
        graph.add_dependency(bin, TargetRef::parse("libraw"), DepTag::StaticLink);

        let pipeline = PipelineBuilder::new().register_feature(Sanitizer).build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);
        assert!(!report.is_failed(), "{}", report.render());
        assert_eq!(graph.variants(NamespaceId::ROOT, "libraw").len(), 1);
    }
}
