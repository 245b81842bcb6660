//! Declarative policy rules over directories and property bags.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{PropValue, PropertyBag};

/// One property predicate of a rule: dotted path plus pattern.
///
/// The pattern `"*"` matches any non-default value; the empty pattern
/// matches a missing or default value; anything else compares against
/// the value's canonical string form (any element, for lists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleProperty {
    path: String,
    pattern: String,
}

impl RuleProperty {
    fn matches(&self, bag: &PropertyBag) -> bool {
        let value = bag.get(&self.path);
        if self.pattern == "*" {
            return value.is_some_and(|v| !v.is_default());
        }
        match value {
            None => self.pattern.is_empty(),
            Some(v) => v.matches_pattern(&self.pattern),
        }
    }
}

/// A declarative rule rejecting disallowed graph states.
///
/// A rule applies to a node when its declaring directory passes the
/// include/exclude prefixes and its property bag satisfies every `with`
/// predicate and no `without` predicate. Applying is the violation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    paths: Vec<String>,
    unless_paths: Vec<String>,
    props: Vec<RuleProperty>,
    unless_props: Vec<RuleProperty>,
    reason: Option<String>,
}

fn clean_path(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

impl PolicyRule {
    /// Start an empty rule; chain the builder methods below.
    pub fn disallow() -> Self {
        Self::default()
    }

    /// Restrict the rule to nodes declared under any of `paths`.
    pub fn in_dir(mut self, paths: &[&str]) -> Self {
        self.paths.extend(paths.iter().map(|p| clean_path(p)));
        self
    }

    /// Exempt nodes declared under any of `paths`.
    pub fn not_in(mut self, paths: &[&str]) -> Self {
        self.unless_paths.extend(paths.iter().map(|p| clean_path(p)));
        self
    }

    /// Require `path` to match `pattern` for the rule to apply.
    pub fn with(mut self, path: &str, pattern: &str) -> Self {
        self.props.push(RuleProperty {
            path: path.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    /// Exempt nodes whose `path` matches `pattern`.
    pub fn without(mut self, path: &str, pattern: &str) -> Self {
        self.unless_props.push(RuleProperty {
            path: path.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    /// Attach the human-readable reason reported on violation.
    pub fn because(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Whether the rule's path predicates select `dir` (which must carry
    /// a trailing slash).
    pub fn applies_to_dir(&self, dir: &str) -> bool {
        let included = self.paths.is_empty() || self.paths.iter().any(|p| dir.starts_with(p));
        let excluded = self.unless_paths.iter().any(|p| dir.starts_with(p));
        included && !excluded
    }

    /// Whether the rule's property predicates select `bag`.
    pub fn applies_to(&self, bag: &PropertyBag) -> bool {
        let included = self.props.iter().all(|p| p.matches(bag));
        let excluded = self.unless_props.iter().any(|p| p.matches(bag));
        included && !excluded
    }
}

// Rendering is the rule's diagnostic identity; a violation message
// should read like the rule source.
impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "disallow")?;
        for p in &self.paths {
            write!(f, " dir:{p}*")?;
        }
        for p in &self.unless_paths {
            write!(f, " -dir:{p}*")?;
        }
        for p in &self.props {
            write!(f, " {}={}", p.path, p.pattern)?;
        }
        for p in &self.unless_props {
            write!(f, " -{}={}", p.path, p.pattern)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " which is restricted because {reason}")?;
        }
        Ok(())
    }
}
