//! The variant splitter: clone a node into variant-tagged replicas and
//! rewire every affected edge.
//!
//! Splitting is the one operation that changes node identity, so its
//! contract is strict:
//!
//! - replica 0 keeps the identity (and id) of the pre-split node;
//! - every replica is a structural copy of the node's property state at
//!   split time, with the new (axis, value) appended to its key;
//! - edge tags are preserved exactly;
//! - re-splitting on the same axis with the same values is a no-op
//!   returning the existing group, so re-running a pass that already
//!   split a node cannot split it again;
//! - re-splitting with *different* values panics: the pipeline is
//!   inconsistent and no output should be trusted.

use tracing::debug;

use crate::graph::ModuleGraph;
use crate::types::{ModuleId, VariantGroup};

/// Whether a split is visible to the rest of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    /// The axis value set is published globally and inbound edges are
    /// rewired to the replica matching each depender's own value.
    Global,
    /// Private clones: inbound edges keep pointing at replica 0 and only
    /// the node's own outbound edges are considered for rewiring.
    Local,
}

/// Split `node` into one replica per value on `axis`.
///
/// Returns the replica ids in value order; `[0]` is the pre-split node.
pub fn split(
    graph: &mut ModuleGraph,
    node: ModuleId,
    axis: &str,
    values: &[&str],
    kind: SplitKind,
) -> Vec<ModuleId> {
    assert!(
        !values.is_empty(),
        "split of {} on axis {axis:?} with no variant names",
        graph.module(node).display_name()
    );

    // Idempotence: an already-split node either re-requests the exact
    // same group (no-op) or exposes pipeline inconsistency (fatal).
    if graph.module(node).variant().has_axis(axis) {
        let group = graph
            .split_group(node, axis)
            .unwrap_or_else(|| {
                panic!(
                    "{} carries axis {axis:?} without a recorded split group",
                    graph.module(node).display_name()
                )
            })
            .clone();
        let existing: Vec<&str> = group
            .members
            .iter()
            .map(|&m| graph.module(m).variant().value_of(axis).unwrap_or(""))
            .collect();
        assert!(
            existing == values,
            "{} already split on axis {axis:?} into {existing:?}, re-split requested {values:?}",
            graph.module(node).display_name()
        );
        return group.members;
    }

    if kind == SplitKind::Global {
        let owned: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        graph.axes().register(axis, &owned);
    }

    // Snapshot the node's current state; replicas copy it verbatim.
    let snapshot = graph.module(node).clone();

    // Replica 0 keeps the original identity.
    let mut members = Vec::with_capacity(values.len());
    {
        let module = graph.module_mut(node);
        let key = module.variant().clone().with(axis, values[0]);
        module.set_variant(key);
    }
    members.push(node);

    for value in &values[1..] {
        let mut replica = snapshot.clone();
        replica.set_variant(snapshot.variant().clone().with(axis, *value));
        let id = graph.add_module(replica);
        // The clone carried resolved outbound edges; index them.
        let targets: Vec<ModuleId> = graph
            .resolved_deps(id)
            .filter_map(|(_, e)| e.resolved)
            .collect();
        for target in targets {
            graph.note_depender(target, id);
        }
        members.push(id);
    }

    let group = VariantGroup {
        axis: axis.to_string(),
        members: members.clone(),
    };
    graph.record_split(group);

    // Outbound rewiring: each replica points its edges at the target
    // sibling compatible with its own value on this axis, when the
    // target split first (bottom-up passes guarantee that ordering).
    for &replica in &members {
        let value = graph
            .module(replica)
            .variant()
            .value_of(axis)
            .expect("replica carries the split axis")
            .to_string();
        let edges: Vec<(usize, ModuleId)> = graph
            .resolved_deps(replica)
            .map(|(idx, e)| (idx, e.resolved.expect("filtered to resolved")))
            .collect();
        for (edge_idx, target) in edges {
            let target_value = graph.module(target).variant().value_of(axis).map(str::to_string);
            match target_value {
                Some(tv) if tv != value => {
                    if let Some(sibling) = graph.sibling_with(target, axis, &value) {
                        graph.retarget_edge(replica, edge_idx, sibling);
                    }
                }
                _ => {}
            }
        }
    }

    // Inbound rewiring: only a global split changes how dependents see
    // the node. A depender that already carries a value on this axis is
    // moved to the matching replica; one that does not stays on the
    // primary until (and unless) its own split moves it.
    if kind == SplitKind::Global {
        for depender in graph.dependers(node) {
            let Some(dv) = graph
                .module(depender)
                .variant()
                .value_of(axis)
                .map(str::to_string)
            else {
                continue;
            };
            if dv == values[0] {
                continue;
            }
            let Some(sibling) = graph.sibling_with(node, axis, &dv) else {
                continue;
            };
            let edges: Vec<usize> = graph
                .resolved_deps(depender)
                .filter(|(_, e)| e.resolved == Some(node))
                .map(|(idx, _)| idx)
                .collect();
            for edge_idx in edges {
                graph.retarget_edge(depender, edge_idx, sibling);
            }
        }
    }

    debug!(
        module = %graph.module(node).base_name(),
        axis,
        ?values,
        ?kind,
        replicas = members.len(),
        "split module"
    );

    members
}
