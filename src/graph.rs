//! The module graph: node slab, tagged edges, bidirectional adjacency.
//!
//! Forward edges live on their source node; the reverse index is
//! maintained transactionally by every edge operation, so passes can walk
//! dependers without a second graph traversal. All iteration orders are
//! deterministic (slab order for nodes, `BTreeSet` order for dependers).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::PipelineConfig;
use crate::namespace::{NameResolver, NamespaceError, NamespaceId};
use crate::report::{GraphError, MissingDependency, RunReport};
use crate::types::{AxisRegistry, DepEdge, DepTag, Module, ModuleId, TargetRef, VariantGroup};

/// The per-configuration module graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<Module>,
    /// Reverse adjacency, index-parallel to `nodes`.
    dependers: Vec<BTreeSet<ModuleId>>,
    /// (namespace, base name) -> variant ids in creation order; [0] primary.
    name_index: BTreeMap<(NamespaceId, String), Vec<ModuleId>>,
    /// (member, axis) -> the variant group the member belongs to.
    split_groups: BTreeMap<(ModuleId, String), VariantGroup>,
    axes: AxisRegistry,
}

impl ModuleGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The global variant-axis registry.
    pub fn axes(&self) -> &AxisRegistry {
        &self.axes
    }

    /// Number of nodes, live or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node, assigning its id and indexing its name.
    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        let id = ModuleId(self.nodes.len() as u32);
        module.id = id;
        self.name_index
            .entry((module.namespace, module.base_name().to_string()))
            .or_default()
            .push(id);
        self.nodes.push(module);
        self.dependers.push(BTreeSet::new());
        id
    }

    /// Immutable access to a node.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.nodes[id.index()]
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.nodes[id.index()]
    }

    /// All node ids in slab order.
    pub fn ids(&self) -> impl Iterator<Item = ModuleId> {
        (0..self.nodes.len() as u32).map(ModuleId)
    }

    /// All nodes in slab order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.nodes.iter()
    }

    /// Declare a dependency edge. Edges start unresolved.
    pub fn add_dependency(&mut self, from: ModuleId, target: TargetRef, tag: DepTag) {
        self.nodes[from.index()].deps.push(DepEdge::new(target, tag));
    }

    /// Resolve every unresolved edge through the namespace resolver.
    ///
    /// Resolution is variant-aware: the name table yields the target's
    /// primary, then the variant compatible with the depender's own key
    /// is selected, so a depends-on-B relationship always lands on a B
    /// variant matching the depender (first compatible in creation
    /// order, i.e. the primary when the depender is indifferent).
    ///
    /// Unresolvable references fail their module (and are collected), or
    /// are recorded as missing when the configuration tolerates that.
    pub fn resolve_edges(
        &mut self,
        resolver: &NameResolver,
        config: &PipelineConfig,
        report: &mut RunReport,
    ) {
        let allow_missing = config.allow_missing_dependencies();
        for idx in 0..self.nodes.len() {
            let from = ModuleId(idx as u32);
            for edge_idx in 0..self.nodes[idx].deps.len() {
                if self.nodes[idx].deps[edge_idx].resolved.is_some() {
                    continue;
                }
                let target = self.nodes[idx].deps[edge_idx].target.clone();
                let namespace = self.nodes[idx].namespace;
                match resolver.resolve(&target, namespace) {
                    Some(table_entry) => match self.select_variant(table_entry, from) {
                        Some(resolved) => {
                            self.nodes[idx].deps[edge_idx].resolved = Some(resolved);
                            self.dependers[resolved.index()].insert(from);
                        }
                        None => {
                            report.collect(GraphError::Resolution {
                                module: self.nodes[idx].display_name(),
                                namespace: resolver.path(namespace),
                                file: self.nodes[idx].file.clone(),
                                target: target.to_string(),
                                detail: format!(
                                    "\nno variant of \"{}\" is compatible with {}",
                                    self.nodes[table_entry.index()].base_name(),
                                    self.nodes[idx].variant(),
                                ),
                            });
                            self.nodes[idx].failed = true;
                        }
                    },
                    None if allow_missing => {
                        self.nodes[idx].deps[edge_idx].missing = true;
                        report.collect_missing(MissingDependency {
                            module: self.nodes[idx].display_name(),
                            target,
                            tag: self.nodes[idx].deps[edge_idx].tag,
                        });
                    }
                    None => {
                        let module = self.nodes[idx].display_name();
                        let file = self.nodes[idx].file.clone();
                        report.collect(resolver.missing_dependency_error(
                            &module, &file, namespace, &target,
                        ));
                        self.nodes[idx].failed = true;
                    }
                }
            }
        }
    }

    /// Pick the variant of `table_entry`'s base name compatible with the
    /// depender's variant key: every axis the candidate carries that the
    /// depender also carries must agree. Candidates are scanned in
    /// creation order, so the primary wins on axes the depender lacks.
    fn select_variant(&self, table_entry: ModuleId, depender: ModuleId) -> Option<ModuleId> {
        let entry = &self.nodes[table_entry.index()];
        let (ns, base) = (entry.namespace, entry.base_name().to_string());
        let dep_key = self.nodes[depender.index()].variant();
        self.variants(ns, &base)
            .iter()
            .copied()
            .find(|&candidate| {
                self.nodes[candidate.index()]
                    .variant()
                    .variations()
                    .all(|v| match dep_key.value_of(&v.axis) {
                        Some(dv) => dv == v.value,
                        None => true,
                    })
            })
    }

    /// Point one edge of `from` at `new_target`, keeping the reverse
    /// index consistent.
    pub(crate) fn retarget_edge(&mut self, from: ModuleId, edge_idx: usize, new_target: ModuleId) {
        let old = self.nodes[from.index()].deps[edge_idx].resolved;
        if old == Some(new_target) {
            return;
        }
        self.nodes[from.index()].deps[edge_idx].resolved = Some(new_target);
        if let Some(old) = old {
            let still_referenced = self.nodes[from.index()]
                .deps
                .iter()
                .any(|e| e.resolved == Some(old));
            if !still_referenced {
                self.dependers[old.index()].remove(&from);
            }
        }
        self.dependers[new_target.index()].insert(from);
    }

    /// Record `depender` in `target`'s reverse set (used when a replica
    /// inherits already-resolved outbound edges).
    pub(crate) fn note_depender(&mut self, target: ModuleId, depender: ModuleId) {
        self.dependers[target.index()].insert(depender);
    }

    /// Rewire every edge in the graph pointing at `old` to `new`.
    ///
    /// Used by prebuilt-vs-source selection; tags are preserved.
    pub fn replace_dependencies(&mut self, old: ModuleId, new: ModuleId) {
        let dependers: Vec<ModuleId> = self.dependers[old.index()].iter().copied().collect();
        for from in dependers {
            for edge_idx in 0..self.nodes[from.index()].deps.len() {
                if self.nodes[from.index()].deps[edge_idx].resolved == Some(old) {
                    self.retarget_edge(from, edge_idx, new);
                }
            }
        }
    }

    /// The nodes holding a resolved edge to `id`, in ascending id order.
    pub fn dependers(&self, id: ModuleId) -> Vec<ModuleId> {
        self.dependers[id.index()].iter().copied().collect()
    }

    /// Whether nothing live depends on `id` (a final binary, typically).
    pub fn is_root(&self, id: ModuleId) -> bool {
        self.dependers[id.index()]
            .iter()
            .all(|d| !self.nodes[d.index()].is_live())
    }

    /// The resolved dependency edges of `id` with their indices.
    pub fn resolved_deps(&self, id: ModuleId) -> impl Iterator<Item = (usize, &DepEdge)> {
        self.nodes[id.index()]
            .deps
            .iter()
            .enumerate()
            .filter(|(_, e)| e.resolved.is_some())
    }

    /// All variants of a base name in creation order; `[0]` is primary.
    pub fn variants(&self, namespace: NamespaceId, base: &str) -> &[ModuleId] {
        self.name_index
            .get(&(namespace, base.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The primary variant of a base name, if the name exists.
    pub fn primary_variant(&self, namespace: NamespaceId, base: &str) -> Option<ModuleId> {
        self.variants(namespace, base).first().copied()
    }

    /// Visit every enabled, unsuppressed variant of a base name, in
    /// creation order. This is the build-action emitter's entry point.
    pub fn for_each_enabled_variant(
        &self,
        namespace: NamespaceId,
        base: &str,
        mut f: impl FnMut(&Module),
    ) {
        for &id in self.variants(namespace, base) {
            let module = &self.nodes[id.index()];
            if module.enabled && !module.suppressed && !module.failed {
                f(module);
            }
        }
    }

    /// Rename a node, updating the name index and the namespace table.
    pub fn rename(
        &mut self,
        id: ModuleId,
        new_base: &str,
        resolver: &NameResolver,
    ) -> Result<(), NamespaceError> {
        let namespace = self.nodes[id.index()].namespace;
        let old_base = self.nodes[id.index()].base_name().to_string();
        if old_base == new_base {
            return Ok(());
        }
        resolver.rename_module(namespace, &old_base, new_base)?;
        let key = (namespace, old_base);
        let emptied = match self.name_index.get_mut(&key) {
            Some(ids) => {
                ids.retain(|&v| v != id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.name_index.remove(&key);
        }
        self.name_index
            .entry((namespace, new_base.to_string()))
            .or_default()
            .push(id);
        self.nodes[id.index()].set_base_name(new_base.to_string());
        Ok(())
    }

    pub(crate) fn record_split(&mut self, group: VariantGroup) {
        for &member in &group.members {
            self.split_groups
                .insert((member, group.axis.clone()), group.clone());
        }
    }

    /// The variant group `id` belongs to on `axis`, if it was split on it.
    pub fn split_group(&self, id: ModuleId, axis: &str) -> Option<&VariantGroup> {
        self.split_groups.get(&(id, axis.to_string()))
    }

    /// Find the sibling of `id` whose variant key matches `id`'s except
    /// for carrying `value` on `axis`.
    pub fn sibling_with(&self, id: ModuleId, axis: &str, value: &str) -> Option<ModuleId> {
        let group = self.split_group(id, axis)?;
        group
            .members
            .iter()
            .copied()
            .find(|&m| self.nodes[m.index()].variant().value_of(axis) == Some(value))
    }

    /// Group live nodes into dependency waves: every node appears in a
    /// wave strictly after all of its live dependencies. Within a wave,
    /// nodes are mutually independent and listed in ascending id order.
    pub fn bottom_up_waves(&self) -> Result<Vec<Vec<ModuleId>>, GraphError> {
        let live: BTreeSet<ModuleId> = self
            .ids()
            .filter(|&id| self.nodes[id.index()].is_live())
            .collect();

        let mut dep_sets: BTreeMap<ModuleId, BTreeSet<ModuleId>> = BTreeMap::new();
        for &id in &live {
            let deps: BTreeSet<ModuleId> = self
                .resolved_deps(id)
                .filter_map(|(_, e)| e.resolved)
                .filter(|t| live.contains(t) && *t != id)
                .collect();
            dep_sets.insert(id, deps);
        }

        let mut waves = Vec::new();
        let mut remaining = live;
        while !remaining.is_empty() {
            let ready: Vec<ModuleId> = remaining
                .iter()
                .copied()
                .filter(|id| dep_sets[id].iter().all(|d| !remaining.contains(d)))
                .collect();
            if ready.is_empty() {
                let involved = remaining
                    .iter()
                    .map(|id| self.nodes[id.index()].display_name())
                    .collect();
                return Err(GraphError::Cycle { involved });
            }
            for id in &ready {
                remaining.remove(id);
            }
            waves.push(ready);
        }
        Ok(waves)
    }

    /// Dependency waves in parent-before-child order.
    pub fn top_down_waves(&self) -> Result<Vec<Vec<ModuleId>>, GraphError> {
        let mut waves = self.bottom_up_waves()?;
        waves.reverse();
        Ok(waves)
    }

    /// Check the variant-identity invariant: no two live nodes share a
    /// (namespace, base name, variant key) triple.
    pub fn verify_variant_identity(&self) -> Result<(), String> {
        let mut seen = BTreeMap::new();
        for module in &self.nodes {
            if !module.is_live() {
                continue;
            }
            let key = (
                module.namespace,
                module.base_name().to_string(),
                module.variant().clone(),
            );
            if let Some(&other) = seen.get(&key) {
                return Err(format!(
                    "modules {other} and {} both are {} {} in namespace {:?}",
                    module.id,
                    module.base_name(),
                    module.variant(),
                    module.namespace,
                ));
            }
            seen.insert(key, module.id);
        }
        Ok(())
    }
}
