//! Dependency edges: tags, target references and edge records.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::module::ModuleId;

/// Classifier describing how the source module uses its target.
///
/// Tags are opaque to the graph itself; propagation features use them to
/// select which edges a requirement flows along, and the build-action
/// emitter uses them to decide how to consume the resolved target. A tag
/// never encodes the target's variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DepTag {
    /// Target is linked into the source as a static archive.
    StaticLink,
    /// Target is linked whole-archive; every object is pulled in.
    WholeStaticLink,
    /// Target is linked as a shared library.
    SharedLink,
    /// Target only exports headers to the source.
    HeaderLink,
    /// Target generates sources consumed by the source module.
    GeneratedSource,
    /// Target is needed at runtime but not at link time.
    Runtime,
    /// Unclassified dependency.
    Default,
}

impl DepTag {
    /// Parse a tag from its lower-case string form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "static" => Some(Self::StaticLink),
            "whole_static" => Some(Self::WholeStaticLink),
            "shared" => Some(Self::SharedLink),
            "header" => Some(Self::HeaderLink),
            "generated" => Some(Self::GeneratedSource),
            "runtime" => Some(Self::Runtime),
            "default" | "" => Some(Self::Default),
            _ => None,
        }
    }

    /// Whether the target's code ends up inside the source's output.
    ///
    /// These are the edges along which link-time cross-cutting
    /// requirements (sanitizers, LTO) must flow.
    pub fn links_statically(self) -> bool {
        matches!(self, Self::StaticLink | Self::WholeStaticLink)
    }
}

impl Default for DepTag {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for DepTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticLink => write!(f, "static"),
            Self::WholeStaticLink => write!(f, "whole_static"),
            Self::SharedLink => write!(f, "shared"),
            Self::HeaderLink => write!(f, "header"),
            Self::GeneratedSource => write!(f, "generated"),
            Self::Runtime => write!(f, "runtime"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Prefix introducing a fully qualified target reference.
pub const NAMESPACE_PREFIX: &str = "//";
/// Separator between namespace path and module name.
pub const MODULE_SEPARATOR: &str = ":";

/// A dependency target as written in a declaration, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetRef {
    /// A bare name, resolved through the declaring namespace's visible set.
    Bare(String),
    /// A fully qualified `//namespace:name` reference; bypasses visibility.
    Qualified {
        /// The namespace path named before the separator.
        namespace: String,
        /// The module name after the separator.
        name: String,
    },
}

impl TargetRef {
    /// Parse a reference. `//ns:name` becomes [`TargetRef::Qualified`];
    /// anything else, including a malformed `//`-prefixed string, stays
    /// bare (and will fail resolution with a diagnostic naming it).
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix(NAMESPACE_PREFIX) {
            let mut parts = rest.splitn(2, MODULE_SEPARATOR);
            if let (Some(ns), Some(name)) = (parts.next(), parts.next()) {
                if !ns.is_empty() && !name.is_empty() && !name.contains(MODULE_SEPARATOR) {
                    return Self::Qualified {
                        namespace: ns.to_string(),
                        name: name.to_string(),
                    };
                }
            }
        }
        Self::Bare(s.to_string())
    }

    /// The referenced module name, without any namespace qualifier.
    pub fn name(&self) -> &str {
        match self {
            Self::Bare(name) => name,
            Self::Qualified { name, .. } => name,
        }
    }

    /// Whether this is a fully qualified reference.
    pub fn is_qualified(&self) -> bool {
        matches!(self, Self::Qualified { .. })
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare(name) => write!(f, "{name}"),
            Self::Qualified { namespace, name } => {
                write!(f, "{NAMESPACE_PREFIX}{namespace}{MODULE_SEPARATOR}{name}")
            }
        }
    }
}

/// A directed dependency edge, stored on its source module.
///
/// Edges are created variant-generic at declaration time and rewritten in
/// place by splitting. They are never silently dropped: an edge that fails
/// to resolve either fails its module or, under the missing-dependency
/// configuration, is recorded with `missing` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    /// The declared target.
    pub target: TargetRef,
    /// How the source uses the target.
    pub tag: DepTag,
    /// The node this edge currently points at, once resolved.
    pub resolved: Option<ModuleId>,
    /// Recorded-but-tolerated unresolved target (opt-in, see config).
    pub missing: bool,
}

impl DepEdge {
    /// Create an unresolved edge.
    pub fn new(target: TargetRef, tag: DepTag) -> Self {
        Self {
            target,
            tag,
            resolved: None,
            missing: false,
        }
    }
}
