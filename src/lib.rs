//! # metabuild-kernel
//!
//! The module graph transformation engine at the core of a meta-build
//! system: declarative module definitions in, a fully resolved
//! per-configuration dependency graph out, ready for a build-action
//! emitter.
//!
//! ## Architecture
//!
//! ```text
//! ModuleSource -> load_graph -> Pipeline::run -> emitter accessors
//!                                   |
//!               pre-arch  ->  pre-deps  ->  resolve  ->  post-deps
//!               (expand,      (arch/link     (variant     (prebuilts,
//!                prebuilt      splits)        aware)       mark+split,
//!                detect)                                   policy)
//! ```
//!
//! The hard part is not emitting build actions but transforming the
//! graph: ordered passes mutate module properties, clone one logical
//! module into per-configuration *variants*, rewire every dependency
//! edge at the correct variant, and propagate cross-cutting requirements
//! ("anything statically linked into a sanitized binary must itself be
//! sanitized") transitively.
//!
//! ## Determinism Guarantees
//!
//! - Pass order is registration order, group by group
//! - Parallel visits record ops applied in ascending node order at each
//!   wave barrier, so parallel and sequential runs are bit-identical
//! - All iteration is over ordered containers; fingerprints are
//!   canonical hashes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod features;
pub mod graph;
pub mod namespace;
pub mod passes;
pub mod policy;
pub mod prebuilt;
pub mod propagate;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod split;
pub mod types;

// Re-exports
pub use canonical::{canonical_hash, canonical_hash_hex, combined_hash_hex, to_canonical_bytes};
pub use config::PipelineConfig;
pub use features::{Lto, Sanitizer};
pub use graph::ModuleGraph;
pub use namespace::{NameResolver, NamespaceError, NamespaceId};
pub use passes::{ArchSplit, LinkSplit, VariableExpansion};
pub use policy::{PolicyChecker, PolicyRule};
pub use prebuilt::{PrebuiltDetect, PrebuiltReplace, PrebuiltSelect, PREBUILT_PREFIX};
pub use propagate::{FeatureConflict, FeatureSpec, MarkPass, SplitPass};
pub use report::{GraphError, MissingDependency, RunReport};
pub use scheduler::{
    Direction, Pass, PassDescriptor, PassGroup, Pipeline, PipelineBuilder, VisitContext,
};
pub use source::{
    load_graph, DepDeclaration, GlobResult, InMemorySource, ModuleDefinition, ModuleSource,
};
pub use split::{split, SplitKind};
pub use types::{
    AxisRegistry, Capability, DepEdge, DepTag, FeatureMark, KindRegistry, KindSpec, Module,
    ModuleId, PropValue, PropertyBag, TargetRef, VariantGroup, VariantKey, Variation,
};

/// Schema version for exported graph and report types.
/// Increment on breaking changes to any exported schema.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0.0";

/// The variant axis used by the architecture split.
pub const ARCH_AXIS: &str = "arch";

/// The variant axis used by the link-mode split.
pub const LINK_AXIS: &str = "link";
