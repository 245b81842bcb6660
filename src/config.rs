//! Frozen pipeline configuration with declared-input recording.
//!
//! Incremental re-runs are only sound if every configuration value a pass
//! observed is part of the recorded input set. The config therefore
//! freezes before the first pass runs, every read goes through accessors
//! that record the key, and the fingerprint covers both the values and
//! the set of keys actually read.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::canonical::{combined_hash_hex, to_canonical_bytes};
use crate::types::PropValue;

/// Pipeline-wide configuration, immutable once frozen.
#[derive(Debug, Default)]
pub struct PipelineConfig {
    values: BTreeMap<String, PropValue>,
    target_arches: Vec<String>,
    allow_missing_dependencies: bool,
    frozen: AtomicBool,
    accessed: Mutex<BTreeSet<String>>,
}

impl PipelineConfig {
    /// An empty, unfrozen configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration value. Panics if the config is frozen:
    /// mutating configuration mid-run makes incremental re-runs unsound,
    /// so it is a programming-invariant violation.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropValue>) -> &mut Self {
        self.assert_unfrozen();
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set the target architectures the `arch` axis splits over.
    pub fn set_target_arches(&mut self, arches: impl IntoIterator<Item = String>) -> &mut Self {
        self.assert_unfrozen();
        self.target_arches = arches.into_iter().collect();
        self
    }

    /// Opt in to tolerating unresolved dependency references.
    pub fn set_allow_missing_dependencies(&mut self, allow: bool) -> &mut Self {
        self.assert_unfrozen();
        self.allow_missing_dependencies = allow;
        self
    }

    /// Freeze the configuration. Idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether the configuration has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn assert_unfrozen(&self) {
        assert!(
            !self.is_frozen(),
            "configuration may not change after the pipeline has started"
        );
    }

    fn record_access(&self, key: &str) {
        self.accessed.lock().insert(key.to_string());
    }

    /// Read a value, recording the key as a declared input.
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.record_access(key);
        self.values.get(key)
    }

    /// Read a string value, recording the key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropValue::as_str)
    }

    /// Read a boolean value, recording the key.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(PropValue::as_bool)
    }

    /// The target architectures. Recorded like any other input.
    pub fn target_arches(&self) -> &[String] {
        self.record_access("target_arches");
        &self.target_arches
    }

    /// Whether unresolved dependencies are tolerated (recorded).
    pub fn allow_missing_dependencies(&self) -> bool {
        self.record_access("allow_missing_dependencies");
        self.allow_missing_dependencies
    }

    /// The set of keys reads have touched so far.
    pub fn accessed_keys(&self) -> BTreeSet<String> {
        self.accessed.lock().clone()
    }

    /// Fingerprint of the configuration values plus the accessed-key set.
    ///
    /// Stable across runs that read the same keys of the same values;
    /// changes if a value changes or a pass starts reading a new key.
    pub fn fingerprint(&self) -> String {
        let values = to_canonical_bytes(&self.values);
        let arches = to_canonical_bytes(&self.target_arches);
        let accessed = to_canonical_bytes(&self.accessed_keys());
        combined_hash_hex([values.as_slice(), arches.as_slice(), accessed.as_slice()])
    }
}
