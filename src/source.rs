//! The module-source collaborator boundary.
//!
//! Reading and parsing definition files happens outside the kernel. A
//! [`ModuleSource`] supplies, per directory, the declared modules and
//! content-addressed glob expansions; [`load_graph`] turns them into the
//! initial graph, collecting declaration errors instead of aborting.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::graph::ModuleGraph;
use crate::namespace::NameResolver;
use crate::report::{GraphError, RunReport};
use crate::types::{DepTag, KindRegistry, Module, PropertyBag, TargetRef};

/// A dependency as declared in a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepDeclaration {
    /// The target reference as written (bare or `//ns:name`).
    pub target: String,
    /// How the declaring module uses the target.
    pub tag: DepTag,
}

/// One module declaration, as handed over by the source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// The module type name.
    pub kind: String,
    /// The declared module name.
    pub name: String,
    /// The declaration's properties.
    pub properties: PropertyBag,
    /// The declaring file.
    pub file: String,
    /// Declared dependencies.
    pub deps: Vec<DepDeclaration>,
}

/// A content-addressed glob expansion.
///
/// The fingerprint covers the pattern, the excludes and the sorted file
/// list, so re-running with unchanged inputs reproduces an identical
/// graph and changed inputs are detectable without comparing lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobResult {
    /// The glob pattern.
    pub pattern: String,
    /// Patterns removed from the expansion.
    pub excludes: Vec<String>,
    /// Matching files, sorted.
    pub files: Vec<String>,
    /// Canonical hash of (pattern, excludes, files).
    pub fingerprint: String,
}

impl GlobResult {
    /// Build a result, sorting the files and fingerprinting the triple.
    pub fn new(pattern: impl Into<String>, excludes: Vec<String>, mut files: Vec<String>) -> Self {
        let pattern = pattern.into();
        files.sort();
        files.dedup();
        let fingerprint = canonical_hash_hex(&(&pattern, &excludes, &files));
        Self {
            pattern,
            excludes,
            files,
            fingerprint,
        }
    }
}

/// Supplies module declarations and glob expansions to the kernel.
pub trait ModuleSource {
    /// Every directory containing declarations.
    fn directories(&self) -> Vec<String>;

    /// The declarations in one directory.
    fn modules_in(&self, dir: &str) -> Vec<ModuleDefinition>;

    /// Expand a glob pattern. Results must be content-addressed.
    fn glob(&self, pattern: &str, excludes: &[String]) -> GlobResult;
}

/// Build the initial graph from a source.
///
/// Unknown kinds and duplicate names are declaration errors: collected,
/// the offending node failed, the load continues so independent errors
/// surface together.
pub fn load_graph(
    source: &dyn ModuleSource,
    resolver: &NameResolver,
    kinds: &KindRegistry,
    report: &mut RunReport,
) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    let mut dirs = source.directories();
    dirs.sort();

    for dir in dirs {
        let namespace = resolver.namespace_for_dir(&dir);
        for def in source.modules_in(&dir) {
            if !kinds.is_registered(&def.kind) {
                report.collect(GraphError::Declaration {
                    module: def.name.clone(),
                    namespace: resolver.path(namespace),
                    file: def.file.clone(),
                    message: format!("unknown module kind \"{}\"", def.kind),
                });
                continue;
            }
            let module = Module::new(
                def.name.clone(),
                def.kind,
                namespace,
                dir.clone(),
                def.file.clone(),
                def.properties,
            );
            let id = graph.add_module(module);
            if let Err(err) = resolver.declare_module(namespace, &def.name, id) {
                report.collect(GraphError::Declaration {
                    module: def.name.clone(),
                    namespace: resolver.path(namespace),
                    file: def.file,
                    message: err.to_string(),
                });
                graph.module_mut(id).failed = true;
                continue;
            }
            for dep in def.deps {
                graph.add_dependency(id, TargetRef::parse(&dep.target), dep.tag);
            }
        }
    }
    graph
}

/// In-memory source for tests and embedding hosts.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    dirs: BTreeMap<String, Vec<ModuleDefinition>>,
    files: BTreeSet<String>,
}

impl InMemorySource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module declaration under `dir`.
    pub fn add_module(&mut self, dir: &str, def: ModuleDefinition) -> &mut Self {
        self.dirs.entry(dir.to_string()).or_default().push(def);
        self
    }

    /// Register a file path for glob expansion.
    pub fn add_file(&mut self, path: &str) -> &mut Self {
        self.files.insert(path.to_string());
        self
    }

    // Single-`*` matching is all the in-memory source needs.
    fn matches(pattern: &str, path: &str) -> bool {
        match pattern.split_once('*') {
            Some((prefix, suffix)) => {
                path.len() >= prefix.len() + suffix.len()
                    && path.starts_with(prefix)
                    && path.ends_with(suffix)
            }
            None => pattern == path,
        }
    }
}

impl ModuleSource for InMemorySource {
    fn directories(&self) -> Vec<String> {
        self.dirs.keys().cloned().collect()
    }

    fn modules_in(&self, dir: &str) -> Vec<ModuleDefinition> {
        self.dirs.get(dir).cloned().unwrap_or_default()
    }

    fn glob(&self, pattern: &str, excludes: &[String]) -> GlobResult {
        let files: Vec<String> = self
            .files
            .iter()
            .filter(|f| Self::matches(pattern, f))
            .filter(|f| !excludes.iter().any(|e| Self::matches(e, f)))
            .cloned()
            .collect();
        GlobResult::new(pattern, excludes.to_vec(), files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, kind: &str) -> ModuleDefinition {
        ModuleDefinition {
            kind: kind.to_string(),
            name: name.to_string(),
            properties: PropertyBag::new(),
            file: "a/BUILD".to_string(),
            deps: Vec::new(),
        }
    }

    fn kinds() -> KindRegistry {
        let mut kinds = KindRegistry::new();
        kinds.register("library", Default::default());
        kinds
    }

    #[test]
    fn load_collects_unknown_kind_and_continues() {
        let mut source = InMemorySource::new();
        source
            .add_module("a", def("good", "library"))
            .add_module("a", def("bad", "mystery_kind"));

        let resolver = NameResolver::new();
        let mut report = RunReport::new();
        let graph = load_graph(&source, &resolver, &kinds(), &mut report);

        assert_eq!(graph.len(), 1, "the bad declaration produced no node");
        assert!(report.is_failed());
        assert!(report.errors()[0].to_string().contains("mystery_kind"));
    }

    #[test]
    fn duplicate_names_fail_the_second_declaration() {
        let mut source = InMemorySource::new();
        source
            .add_module("a", def("util", "library"))
            .add_module("a", def("util", "library"));

        let resolver = NameResolver::new();
        let mut report = RunReport::new();
        let graph = load_graph(&source, &resolver, &kinds(), &mut report);

        assert!(report.is_failed());
        assert_eq!(graph.len(), 2);
        let failed: Vec<bool> = graph.modules().map(|m| m.failed).collect();
        assert_eq!(failed, vec![false, true]);
    }

    #[test]
    fn glob_results_are_content_addressed() {
        let mut source = InMemorySource::new();
        source.add_file("src/a.c").add_file("src/b.c").add_file("src/b.h");

        let first = source.glob("src/*.c", &[]);
        assert_eq!(first.files, vec!["src/a.c", "src/b.c"]);

        let again = source.glob("src/*.c", &[]);
        assert_eq!(first.fingerprint, again.fingerprint, "unchanged inputs");

        source.add_file("src/c.c");
        let changed = source.glob("src/*.c", &[]);
        assert_ne!(first.fingerprint, changed.fingerprint);

        let excluded = source.glob("src/*.c", &["src/b*".to_string()]);
        assert_eq!(excluded.files, vec!["src/a.c", "src/c.c"]);
    }

    #[test]
    fn fingerprint_independent_of_supply_order() {
        let a = GlobResult::new("*", vec![], vec!["b".into(), "a".into()]);
        let b = GlobResult::new("*", vec![], vec!["a".into(), "b".into()]);
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
