//! Typed property bags.
//!
//! Module declarations carry an open set of properties. Instead of
//! reflecting over field names, the kernel models them as an explicit
//! [`PropValue`] tree with typed accessors and dotted-path lookup, and
//! configuration substitution is a pure function over (bag, lookup fn).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// String value.
    String(String),
    /// Ordered list.
    List(Vec<PropValue>),
    /// Nested map, ordered by key.
    Map(BTreeMap<String, PropValue>),
}

impl PropValue {
    /// Typed access: boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Typed access: integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Typed access: string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Typed access: list.
    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Typed access: map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this value is its type's default (`false`, `0`, `""`,
    /// empty list, empty map). Wildcard rule predicates match any
    /// non-default value.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(m) => m.is_empty(),
        }
    }

    /// Whether this value matches a rule pattern string.
    ///
    /// Scalars compare against their canonical string form; a list
    /// matches if any element does. Maps never match a scalar pattern.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        match self {
            Self::Bool(b) => pattern == if *b { "true" } else { "false" },
            Self::Int(i) => pattern == i.to_string(),
            Self::String(s) => pattern == s,
            Self::List(items) => items.iter().any(|v| v.matches_pattern(pattern)),
            Self::Map(_) => false,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<&str>> for PropValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(PropValue::from).collect())
    }
}

/// Error raised while expanding configuration references in a property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    /// A `$` at the end of the string with nothing after it.
    #[error("expected character after '$'")]
    TrailingDollar,
    /// A `$(` without the closing `)`.
    #[error("missing )")]
    Unterminated,
    /// A `$` followed by something other than `(` or `$`.
    #[error("expected '(' after '$', did you mean $({0})?")]
    BareReference(String),
    /// The lookup function knows no value for the name.
    #[error("unknown variable ${{{0}}}")]
    UnknownVariable(String),
}

/// Expand `$(name)` references in `s` via `lookup`. `$$` escapes to a
/// literal `$`.
pub fn expand_string(
    s: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ExpandError> {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            // Copy the run up to the next '$' in one go.
            let start = i;
            while i < bytes.len() && bytes[i] != b'$' {
                i += 1;
            }
            out.push_str(&s[start..i]);
            continue;
        }
        if i + 1 >= bytes.len() {
            return Err(ExpandError::TrailingDollar);
        }
        match bytes[i + 1] {
            b'$' => {
                out.push('$');
                i += 2;
            }
            b'(' => {
                let rest = &s[i + 2..];
                let close = rest.find(')').ok_or(ExpandError::Unterminated)?;
                let name = rest[..close].trim();
                let value = lookup(name)
                    .ok_or_else(|| ExpandError::UnknownVariable(name.to_string()))?;
                out.push_str(&value);
                i += 2 + close + 1;
            }
            _ => {
                let rest = &s[i + 1..];
                let word: String = rest
                    .chars()
                    .take_while(|c| !c.is_whitespace())
                    .collect();
                return Err(ExpandError::BareReference(word));
            }
        }
    }
    Ok(out)
}

/// A module's property bag: a named tree of [`PropValue`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBag {
    values: BTreeMap<String, PropValue>,
}

impl PropertyBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by dotted path, e.g. `vndk.enabled`.
    pub fn get(&self, path: &str) -> Option<&PropValue> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.as_map()?.get(part)?;
        }
        Some(current)
    }

    /// Set a value by dotted path, creating intermediate maps.
    ///
    /// A non-map value on the path is replaced by a map.
    pub fn set(&mut self, path: &str, value: impl Into<PropValue>) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let leaf = parts.pop().unwrap_or(path);
        let mut current = &mut self.values;
        for part in parts {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| PropValue::Map(BTreeMap::new()));
            if !matches!(entry, PropValue::Map(_)) {
                *entry = PropValue::Map(BTreeMap::new());
            }
            match entry {
                PropValue::Map(m) => current = m,
                _ => unreachable!(),
            }
        }
        current.insert(leaf.to_string(), value.into());
    }

    /// Boolean at `path`, if present and boolean.
    pub fn bool_at(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(PropValue::as_bool)
    }

    /// String at `path`, if present and a string.
    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(PropValue::as_str)
    }

    /// List at `path`, if present and a list.
    pub fn list_at(&self, path: &str) -> Option<&[PropValue]> {
        self.get(path).and_then(PropValue::as_list)
    }

    /// The strings of the list at `path`; non-string elements skipped.
    pub fn strings_at(&self, path: &str) -> Vec<String> {
        self.list_at(path)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate top-level entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
        self.values.iter()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Expand `$(name)` references in every string leaf, in place.
    ///
    /// Returns the dotted path of the offending property on failure so the
    /// error can name the declaration that caused it.
    pub fn expand(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), (String, ExpandError)> {
        fn walk(
            value: &mut PropValue,
            path: &mut String,
            lookup: &dyn Fn(&str) -> Option<String>,
        ) -> Result<(), (String, ExpandError)> {
            match value {
                PropValue::String(s) => {
                    if s.contains('$') {
                        *s = expand_string(s, lookup).map_err(|e| (path.clone(), e))?;
                    }
                    Ok(())
                }
                PropValue::List(items) => {
                    for (i, item) in items.iter_mut().enumerate() {
                        let len = path.len();
                        path.push_str(&format!("[{i}]"));
                        walk(item, path, lookup)?;
                        path.truncate(len);
                    }
                    Ok(())
                }
                PropValue::Map(m) => {
                    for (k, v) in m.iter_mut() {
                        let len = path.len();
                        if !path.is_empty() {
                            path.push('.');
                        }
                        path.push_str(k);
                        walk(v, path, lookup)?;
                        path.truncate(len);
                    }
                    Ok(())
                }
                PropValue::Bool(_) | PropValue::Int(_) => Ok(()),
            }
        }

        let mut path = String::new();
        for (k, v) in self.values.iter_mut() {
            path.clear();
            path.push_str(k);
            walk(v, &mut path, lookup)?;
        }
        Ok(())
    }
}
