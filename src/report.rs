//! Error taxonomy and end-of-run aggregation.
//!
//! Non-fatal errors are collected across all passes and reported together
//! at the end of the run with enough context to locate the offending
//! declaration. Programming-invariant violations (splitting after freeze,
//! conflicting re-splits, namespace registration after freeze) are not
//! represented here: they panic at the violation site, since a pipeline
//! that reaches one is inconsistent and its output cannot be trusted.

use serde::{Deserialize, Serialize};

use crate::namespace::NamespaceError;
use crate::types::{DepTag, TargetRef};

/// A collected, non-fatal graph error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Malformed property value, duplicate name, unknown module kind.
    #[error("{file}: module \"{module}\": {message}")]
    Declaration {
        /// Offending module's name.
        module: String,
        /// Owning namespace path.
        namespace: String,
        /// Declaring file.
        file: String,
        /// What is wrong with the declaration.
        message: String,
    },
    /// A dependency reference that resolves to nothing.
    #[error("\"{module}\" depends on undefined module \"{target}\"{detail}")]
    Resolution {
        /// The referencing module.
        module: String,
        /// Its namespace path.
        namespace: String,
        /// Its declaring file.
        file: String,
        /// The reference as written.
        target: String,
        /// Extra diagnostic lines (namespaces that do declare the name).
        detail: String,
    },
    /// A malformed or illegal property, reported with its dotted path.
    #[error("{file}: module \"{module}\": property \"{property}\": {message}")]
    Property {
        /// Offending module's name.
        module: String,
        /// Declaring file.
        file: String,
        /// Dotted property path.
        property: String,
        /// What is wrong with the value.
        message: String,
    },
    /// Two mutually exclusive values of one feature requested together.
    #[error("module \"{module}\" requests conflicting {feature} variants: {first} and {second}")]
    FeatureConflict {
        /// Offending module's name.
        module: String,
        /// The feature axis.
        feature: String,
        /// First requested value.
        first: String,
        /// Second, incompatible value.
        second: String,
    },
    /// A declarative policy rule matched an enabled node.
    #[error("module \"{module}\" violates {rule}")]
    Policy {
        /// Offending module's name.
        module: String,
        /// The violated rule, rendered with its reason.
        rule: String,
    },
    /// A namespace declaration or import problem; import errors are
    /// terminal for the run.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    /// The dependency wiring contains a cycle.
    #[error("dependency cycle involving {involved:?}")]
    Cycle {
        /// Display names of modules on the cycle.
        involved: Vec<String>,
    },
    /// A pass failed on one node for a reason of its own.
    #[error("pass {pass}: module \"{module}\": {message}")]
    Pass {
        /// The pass that failed.
        pass: String,
        /// The module it was visiting.
        module: String,
        /// Failure description.
        message: String,
    },
}

/// A tolerated unresolved dependency (recorded, not fatal).
///
/// Only produced when the configuration explicitly opts in to proceeding
/// without named targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// The module that declared the dependency.
    pub module: String,
    /// The unresolved reference.
    pub target: TargetRef,
    /// The edge's tag.
    pub tag: DepTag,
}

/// Aggregate of everything a pipeline run collected.
#[derive(Debug, Default)]
pub struct RunReport {
    errors: Vec<GraphError>,
    missing: Vec<MissingDependency>,
}

impl RunReport {
    /// An empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal error.
    pub fn collect(&mut self, error: GraphError) {
        tracing::error!(error = %error, "graph error");
        self.errors.push(error);
    }

    /// Record a tolerated missing dependency.
    pub fn collect_missing(&mut self, missing: MissingDependency) {
        tracing::warn!(
            module = %missing.module,
            target = %missing.target,
            "missing dependency allowed by configuration"
        );
        self.missing.push(missing);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: RunReport) {
        self.errors.extend(other.errors);
        self.missing.extend(other.missing);
    }

    /// The collected errors, in collection order.
    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    /// The tolerated missing dependencies.
    pub fn missing(&self) -> &[MissingDependency] {
        &self.missing
    }

    /// A run fails if any error was collected, regardless of count.
    pub fn is_failed(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Render every error, one per line.
    pub fn render(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_iff_errors_collected() {
        let mut report = RunReport::new();
        assert!(!report.is_failed());

        report.collect_missing(MissingDependency {
            module: "libfoo".to_string(),
            target: TargetRef::parse("libgone"),
            tag: DepTag::SharedLink,
        });
        assert!(!report.is_failed(), "missing deps alone do not fail the run");

        report.collect(GraphError::Policy {
            module: "libfoo".to_string(),
            rule: "disallow vndk.enabled=true".to_string(),
        });
        assert!(report.is_failed());
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn render_joins_errors() {
        let mut report = RunReport::new();
        report.collect(GraphError::Declaration {
            module: "a".to_string(),
            namespace: ".".to_string(),
            file: "BUILD".to_string(),
            message: "duplicate module name".to_string(),
        });
        report.collect(GraphError::Declaration {
            module: "b".to_string(),
            namespace: ".".to_string(),
            file: "BUILD".to_string(),
            message: "unknown module kind \"zap\"".to_string(),
        });
        let text = report.render();
        assert!(text.contains("\"a\""));
        assert!(text.contains("\"b\""));
        assert_eq!(text.lines().count(), 2);
    }
}
