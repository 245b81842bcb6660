//! Variant identity: axes, keys and replica groups.
//!
//! A *variant* is one concrete build configuration of a logical module.
//! Its identity is the [`VariantKey`], an ordered list of (axis, value)
//! choices appended in the order the splits ran. The append order is
//! load-bearing: two keys with the same choices in different orders name
//! different variants.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::module::ModuleId;

/// One (axis, value) choice in a variant key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Variation {
    /// The split axis, e.g. `arch` or `link`.
    pub axis: String,
    /// The chosen value on that axis, e.g. `arm64` or `shared`.
    ///
    /// The empty string is a legal value; feature splits use it for the
    /// feature-disabled replica.
    pub value: String,
}

impl Variation {
    /// Create a new variation.
    pub fn new(axis: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            axis: axis.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.axis, self.value)
    }
}

/// The ordered set of (axis, value) choices identifying a variant.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VariantKey {
    variations: Vec<Variation>,
}

impl VariantKey {
    /// The empty key, identifying the sole variant of an unsplit module.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether no split has been applied yet.
    pub fn is_empty(&self) -> bool {
        self.variations.is_empty()
    }

    /// Number of axes in the key.
    pub fn len(&self) -> usize {
        self.variations.len()
    }

    /// The value chosen on `axis`, if this key has been split on it.
    pub fn value_of(&self, axis: &str) -> Option<&str> {
        self.variations
            .iter()
            .find(|v| v.axis == axis)
            .map(|v| v.value.as_str())
    }

    /// Whether this key already carries a choice on `axis`.
    pub fn has_axis(&self, axis: &str) -> bool {
        self.value_of(axis).is_some()
    }

    /// Append a choice, consuming and returning the key.
    ///
    /// Panics if the key already carries `axis`: appending a second choice
    /// on the same axis means the pipeline double-split a node, which is a
    /// programming-invariant violation.
    pub fn with(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        let axis = axis.into();
        assert!(
            !self.has_axis(&axis),
            "variant key {self} already split on axis {axis:?}"
        );
        self.variations.push(Variation::new(axis, value));
        self
    }

    /// Iterate the choices in append order.
    pub fn variations(&self) -> impl Iterator<Item = &Variation> {
        self.variations.iter()
    }

    /// Render the key as an output-name suffix, e.g. `arm64_shared`.
    ///
    /// Empty values are skipped, so a feature-disabled replica keeps the
    /// suffix of its pre-split key. The empty key renders as `""`.
    pub fn suffix(&self) -> String {
        let parts: Vec<&str> = self
            .variations
            .iter()
            .filter(|v| !v.value.is_empty())
            .map(|v| v.value.as_str())
            .collect();
        parts.join("_")
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variations.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        for (i, v) in self.variations.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")
    }
}

/// The set of sibling replicas produced by one split call on one node.
///
/// `members[0]` is the primary, carrying the identity of the pre-split
/// node; reverse-dependency attribution goes through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantGroup {
    /// The axis the split introduced.
    pub axis: String,
    /// Replica ids, in variant-name order. Index 0 is the primary.
    pub members: Vec<ModuleId>,
}

impl VariantGroup {
    /// The primary replica (index 0).
    pub fn primary(&self) -> ModuleId {
        self.members[0]
    }
}

/// Registry of globally visible variant-axis values.
///
/// A global split publishes its axis values here so every other module's
/// rewiring sees the same value set. Registration takes the write lock
/// (axis-value creation is exclusive); lookups share a read lock.
#[derive(Debug, Default)]
pub struct AxisRegistry {
    axes: RwLock<BTreeMap<String, Vec<String>>>,
}

impl AxisRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `values` under `axis`.
    ///
    /// Values already registered for the axis are kept in their original
    /// position; new ones append in call order. Many modules splitting on
    /// the same axis with the same values is the normal case.
    pub fn register(&self, axis: &str, values: &[String]) {
        let mut axes = self.axes.write();
        let known = axes.entry(axis.to_string()).or_default();
        for value in values {
            if !known.contains(value) {
                known.push(value.clone());
            }
        }
    }

    /// All values registered for `axis`, in registration order.
    pub fn values(&self, axis: &str) -> Option<Vec<String>> {
        self.axes.read().get(axis).cloned()
    }

    /// Whether `value` has been published under `axis`.
    pub fn is_registered(&self, axis: &str, value: &str) -> bool {
        self.axes
            .read()
            .get(axis)
            .is_some_and(|vs| vs.iter().any(|v| v == value))
    }

    /// All known axes, sorted by name.
    pub fn axes(&self) -> Vec<String> {
        self.axes.read().keys().cloned().collect()
    }
}
