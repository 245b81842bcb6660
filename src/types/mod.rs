//! Core types for the module graph kernel.

pub mod edge;
pub mod module;
pub mod property;
pub mod variant;

pub use edge::{DepEdge, DepTag, TargetRef};
pub use module::{Capability, FeatureMark, KindRegistry, KindSpec, Module, ModuleId};
pub use property::{expand_string, ExpandError, PropValue, PropertyBag};
pub use variant::{AxisRegistry, VariantGroup, VariantKey, Variation};
