//! Property tests for the structural invariants of the kernel.
//!
//! - variant identity: no two live nodes share (namespace, base name,
//!   variant key), under any sequence of splits
//! - rewiring completeness: every edge stays resolved and the reverse
//!   index stays consistent with the forward edges
//! - mark idempotence and transitivity: marking twice equals marking
//!   once, and every propagated flag is justified by a filtered path
//!   from a directly-requiring node

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use metabuild_kernel::{
    split, DepTag, MarkPass, Module, ModuleGraph, ModuleId, NameResolver, NamespaceId,
    PipelineBuilder, PipelineConfig, PropertyBag, RunReport, Sanitizer, SplitKind,
};

fn module_name(i: usize) -> String {
    format!("m{i}")
}

/// Build a DAG where node i+1 depends on node parents[i] % (i+1); edge
/// tags alternate by the paired flag (static vs shared).
fn build_graph(parents: &[(usize, bool)], direct: &[bool]) -> (ModuleGraph, NameResolver) {
    let resolver = NameResolver::new();
    let mut graph = ModuleGraph::new();

    let count = parents.len() + 1;
    for i in 0..count {
        let mut props = PropertyBag::new();
        if direct.get(i).copied().unwrap_or(false) {
            props.set("sanitize.address", true);
        }
        let id = graph.add_module(Module::new(
            module_name(i),
            "library",
            NamespaceId::ROOT,
            ".",
            "./BUILD",
            props,
        ));
        resolver
            .declare_module(NamespaceId::ROOT, &module_name(i), id)
            .unwrap();
    }
    for (i, &(parent, is_static)) in parents.iter().enumerate() {
        let child = graph.primary_variant(NamespaceId::ROOT, &module_name(i + 1)).unwrap();
        let tag = if is_static {
            DepTag::StaticLink
        } else {
            DepTag::SharedLink
        };
        graph.add_dependency(
            child,
            metabuild_kernel::TargetRef::parse(&module_name(parent % (i + 1))),
            tag,
        );
    }
    (graph, resolver)
}

fn resolve(graph: &mut ModuleGraph, resolver: &NameResolver) {
    resolver.resolve_imports().unwrap();
    let config = PipelineConfig::new();
    config.freeze();
    let mut report = RunReport::new();
    graph.resolve_edges(resolver, &config, &mut report);
    assert!(!report.is_failed(), "{}", report.render());
}

fn assert_reverse_index_consistent(graph: &ModuleGraph) {
    for id in graph.ids() {
        for (_, edge) in graph.resolved_deps(id) {
            let target = edge.resolved.unwrap();
            assert!(
                graph.dependers(target).contains(&id),
                "edge {id} -> {target} missing from reverse index"
            );
        }
        for depender in graph.dependers(id) {
            assert!(
                graph
                    .resolved_deps(depender)
                    .any(|(_, e)| e.resolved == Some(id)),
                "reverse entry {depender} -> {id} has no forward edge"
            );
        }
    }
}

proptest! {
    #[test]
    fn identity_and_rewiring_hold_under_any_split_sequence(
        parents in prop::collection::vec((0usize..8, any::<bool>()), 0..8),
        plan in prop::collection::vec((0usize..8, 1usize..3, any::<bool>()), 0..6),
    ) {
        let node_count = parents.len() + 1;
        let (mut graph, resolver) = build_graph(&parents, &[]);
        resolve(&mut graph, &resolver);

        for (step, &(node, value_count, global)) in plan.iter().enumerate() {
            let axis = format!("axis{step}");
            let values: Vec<String> = (0..value_count).map(|v| format!("v{v}")).collect();
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            let target = graph
                .primary_variant(NamespaceId::ROOT, &module_name(node % node_count))
                .unwrap();
            let kind = if global { SplitKind::Global } else { SplitKind::Local };
            let replicas = split(&mut graph, target, &axis, &values, kind);
            prop_assert_eq!(replicas.len(), value_count);
        }

        prop_assert!(graph.verify_variant_identity().is_ok());
        assert_reverse_index_consistent(&graph);

        // No edge was dropped: every declared edge is still resolved.
        for id in graph.ids() {
            for edge in graph.module(id).deps() {
                prop_assert!(edge.resolved.is_some(), "dangling edge on {id}");
            }
        }
    }

    #[test]
    fn marking_twice_equals_marking_once(
        parents in prop::collection::vec((0usize..8, any::<bool>()), 0..8),
        direct in prop::collection::vec(any::<bool>(), 0..9),
    ) {
        let (mut graph, resolver) = build_graph(&parents, &direct);
        let pipeline = PipelineBuilder::new()
            .register_pass(MarkPass::new(Arc::new(Sanitizer)))
            .build();
        let config = PipelineConfig::new();

        let report = pipeline.run(&mut graph, &resolver, &config);
        prop_assert!(!report.is_failed(), "{}", report.render());
        let first: Vec<bool> = graph
            .modules()
            .map(|m| m.feature_mark("sanitize").dependency_requires)
            .collect();

        let report = pipeline.run(&mut graph, &resolver, &config);
        prop_assert!(!report.is_failed());
        let second: Vec<bool> = graph
            .modules()
            .map(|m| m.feature_mark("sanitize").dependency_requires)
            .collect();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_propagated_flag_has_a_filtered_path_from_a_direct_node(
        parents in prop::collection::vec((0usize..8, any::<bool>()), 0..8),
        direct in prop::collection::vec(any::<bool>(), 0..9),
    ) {
        let (mut graph, resolver) = build_graph(&parents, &direct);
        let pipeline = PipelineBuilder::new()
            .register_pass(MarkPass::new(Arc::new(Sanitizer)))
            .build();
        let config = PipelineConfig::new();
        let report = pipeline.run(&mut graph, &resolver, &config);
        prop_assert!(!report.is_failed());

        // Independent oracle: BFS along static edges from direct nodes.
        let mut expected: BTreeSet<ModuleId> = BTreeSet::new();
        let mut frontier: Vec<ModuleId> = graph
            .modules()
            .filter(|m| m.properties.bool_at("sanitize.address").unwrap_or(false))
            .map(|m| m.id)
            .collect();
        while let Some(id) = frontier.pop() {
            for (_, edge) in graph.resolved_deps(id) {
                if !edge.tag.links_statically() {
                    continue;
                }
                let target = edge.resolved.unwrap();
                if expected.insert(target) {
                    frontier.push(target);
                }
            }
        }

        let actual: BTreeSet<ModuleId> = graph
            .modules()
            .filter(|m| m.feature_mark("sanitize").dependency_requires)
            .map(|m| m.id)
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
