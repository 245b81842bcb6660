//! Module nodes and the kind/capability registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::namespace::NamespaceId;

use super::edge::DepEdge;
use super::property::PropertyBag;
use super::variant::VariantKey;

/// Identifier of a module node: a dense index into the graph's node slab.
///
/// Ids are never reused; a disabled or suppressed node keeps its id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    /// The raw index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-feature propagation state stored on a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMark {
    /// This replica carries the feature.
    pub enabled: bool,
    /// Something in this node's reverse closure requires the feature
    /// (set by the mark pass, cleared by the split pass).
    pub dependency_requires: bool,
}

/// A module instance: one node of the graph.
///
/// Before splitting there is exactly one node per declaration; splitting
/// clones it into variant-tagged replicas. Within a namespace the
/// (base name, variant key) pair is unique among live nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// This node's id, assigned on insertion.
    pub id: ModuleId,
    base_name: String,
    variant: VariantKey,
    /// The module type name, resolved through the [`KindRegistry`].
    pub kind: String,
    /// Owning namespace.
    pub namespace: NamespaceId,
    /// Directory of the declaring definition file.
    pub dir: String,
    /// The declaring definition file.
    pub file: String,
    /// The declaration's property bag, mutated by passes.
    pub properties: PropertyBag,
    /// Disabled nodes are removed from further traversal.
    pub enabled: bool,
    /// Suppressed nodes stay in the graph but are not emitted/installed.
    pub suppressed: bool,
    /// Failed nodes are excluded from later passes; their dependers skip too.
    pub failed: bool,
    pub(crate) deps: Vec<DepEdge>,
    feature_marks: BTreeMap<String, FeatureMark>,
}

impl Module {
    /// Create an enabled, unsplit module.
    pub fn new(
        base_name: impl Into<String>,
        kind: impl Into<String>,
        namespace: NamespaceId,
        dir: impl Into<String>,
        file: impl Into<String>,
        properties: PropertyBag,
    ) -> Self {
        let enabled = properties.bool_at("enabled").unwrap_or(true);
        Self {
            id: ModuleId(u32::MAX),
            base_name: base_name.into(),
            variant: VariantKey::empty(),
            kind: kind.into(),
            namespace,
            dir: dir.into(),
            file: file.into(),
            properties,
            enabled,
            suppressed: false,
            failed: false,
            deps: Vec::new(),
            feature_marks: BTreeMap::new(),
        }
    }

    /// The logical name, stable across variants.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub(crate) fn set_base_name(&mut self, name: String) {
        self.base_name = name;
    }

    /// The variant key identifying this replica.
    pub fn variant(&self) -> &VariantKey {
        &self.variant
    }

    pub(crate) fn variant_mut(&mut self) -> &mut VariantKey {
        &mut self.variant
    }

    pub(crate) fn set_variant(&mut self, key: VariantKey) {
        self.variant = key;
    }

    /// Diagnostic name: base name plus variant key, e.g. `libfoo{arch:arm64}`.
    pub fn display_name(&self) -> String {
        if self.variant.is_empty() {
            self.base_name.clone()
        } else {
            format!("{}{}", self.base_name, self.variant)
        }
    }

    /// This node's outbound dependency edges.
    pub fn deps(&self) -> &[DepEdge] {
        &self.deps
    }

    /// Live nodes participate in traversal and emission ordering.
    pub fn is_live(&self) -> bool {
        self.enabled && !self.failed
    }

    /// The propagation state for `feature` (default if never marked).
    pub fn feature_mark(&self, feature: &str) -> FeatureMark {
        self.feature_marks.get(feature).copied().unwrap_or_default()
    }

    /// Overwrite the propagation state for `feature`.
    pub fn set_feature_mark(&mut self, feature: &str, mark: FeatureMark) {
        self.feature_marks.insert(feature.to_string(), mark);
    }
}

/// An optional behavior a module kind may implement.
///
/// Kinds are an assembly of independent capabilities; passes query them
/// explicitly instead of switching on the kind name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Capability {
    /// The kind turns sources into objects and is split per architecture.
    CompilesSources,
    /// The kind links objects into an output.
    LinksObjects,
    /// The kind installs its output into an image partition.
    InstallsOutput,
}

/// What a registered module kind can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSpec {
    /// The capabilities the kind implements.
    pub capabilities: BTreeSet<Capability>,
    /// Whether modules of this kind stand in for a same-named source
    /// module (prebuilt-vs-source selection).
    pub prebuilt: bool,
}

impl KindSpec {
    /// A spec with the given capabilities.
    pub fn with_capabilities(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: caps.into_iter().collect(),
            prebuilt: false,
        }
    }

    /// Mark the kind as a prebuilt stand-in.
    pub fn prebuilt(mut self) -> Self {
        self.prebuilt = true;
        self
    }
}

/// Registry mapping module type names to their [`KindSpec`].
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, KindSpec>,
}

impl KindRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Re-registering a name replaces its spec.
    pub fn register(&mut self, name: impl Into<String>, spec: KindSpec) {
        self.kinds.insert(name.into(), spec);
    }

    /// Whether `name` names a registered kind.
    pub fn is_registered(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// The spec for `name`, if registered.
    pub fn spec(&self, name: &str) -> Option<&KindSpec> {
        self.kinds.get(name)
    }

    /// Capability query for a kind name.
    pub fn has_capability(&self, kind: &str, cap: Capability) -> bool {
        self.kinds
            .get(kind)
            .is_some_and(|spec| spec.capabilities.contains(&cap))
    }

    /// Whether `kind` is a prebuilt stand-in kind.
    pub fn is_prebuilt(&self, kind: &str) -> bool {
        self.kinds.get(kind).is_some_and(|spec| spec.prebuilt)
    }
}
