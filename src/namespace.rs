//! Namespace-scoped module name resolution.
//!
//! Module names live in a forest of directory-keyed scopes. A namespace
//! sees its own names, the names of namespaces it imports (in declaration
//! order), and the forest root, searched in that order. Fully qualified
//! `//ns:name` references bypass visibility entirely.
//!
//! The registry is monotonic: namespaces are declared during loading,
//! then [`NameResolver::resolve_imports`] computes every visible set,
//! sorts the namespaces by path and assigns stable small-integer ids, and
//! freezes the registry. Declaring a namespace after the freeze is a
//! programming-invariant violation and panics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::report::GraphError;
use crate::types::{ModuleId, TargetRef};

/// Identifier of a namespace: index into the resolver's table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NamespaceId(pub(crate) u32);

impl NamespaceId {
    /// The forest root namespace, always present.
    pub const ROOT: NamespaceId = NamespaceId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Error from namespace declaration or import resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    /// Two namespaces declared for the same directory.
    #[error("namespace {0} already exists")]
    AlreadyExists(String),
    /// An import names a namespace that was never declared.
    #[error("namespace {namespace} imports {import}, which does not exist")]
    UndeclaredImport {
        /// The importing namespace's path.
        namespace: String,
        /// The undeclared import.
        import: String,
    },
    /// Two modules with the same name declared in one namespace.
    #[error("module {name} already declared in namespace {namespace}")]
    DuplicateModule {
        /// The namespace path.
        namespace: String,
        /// The duplicated module name.
        name: String,
    },
}

#[derive(Debug)]
struct NamespaceData {
    path: String,
    imports: Vec<String>,
    /// Search order: self, imports in declaration order, forest root.
    visible: Vec<NamespaceId>,
    /// Stable output id assigned at freeze (sorted-path index); the root
    /// keeps `None` and is elided from unique names.
    output_id: Option<u32>,
    modules: BTreeMap<String, ModuleId>,
}

/// The namespace registry and module name authority.
#[derive(Debug)]
pub struct NameResolver {
    namespaces: RwLock<Vec<NamespaceData>>,
    /// Declared directory -> namespace.
    declared: RwLock<BTreeMap<String, NamespaceId>>,
    /// Cache of directory -> governing namespace for undeclared dirs.
    dir_cache: Mutex<BTreeMap<String, NamespaceId>>,
    frozen: AtomicBool,
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver {
    /// Create a resolver holding only the forest root (path `.`).
    pub fn new() -> Self {
        let root = NamespaceData {
            path: ".".to_string(),
            imports: Vec::new(),
            visible: vec![NamespaceId::ROOT],
            output_id: None,
            modules: BTreeMap::new(),
        };
        let mut declared = BTreeMap::new();
        declared.insert(".".to_string(), NamespaceId::ROOT);
        Self {
            namespaces: RwLock::new(vec![root]),
            declared: RwLock::new(declared),
            dir_cache: Mutex::new(BTreeMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Whether imports have been resolved and the registry frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn assert_unfrozen(&self) {
        assert!(
            !self.is_frozen(),
            "namespaces may not be declared after the registry is frozen"
        );
    }

    /// Declare a namespace for `path` with the given imports.
    ///
    /// Panics if called after the registry froze.
    pub fn declare(
        &self,
        path: impl Into<String>,
        imports: impl IntoIterator<Item = String>,
    ) -> Result<NamespaceId, NamespaceError> {
        self.assert_unfrozen();
        let path = path.into();
        let mut declared = self.declared.write();
        if declared.contains_key(&path) {
            return Err(NamespaceError::AlreadyExists(path));
        }
        let mut namespaces = self.namespaces.write();
        let id = NamespaceId(namespaces.len() as u32);
        namespaces.push(NamespaceData {
            path: path.clone(),
            imports: imports.into_iter().collect(),
            visible: Vec::new(),
            output_id: None,
            modules: BTreeMap::new(),
        });
        declared.insert(path, id);
        Ok(id)
    }

    /// The namespace governing `dir`: the one declared for the nearest
    /// ancestor directory, the root if none. Cached per directory.
    pub fn namespace_for_dir(&self, dir: &str) -> NamespaceId {
        if let Some(&id) = self.declared.read().get(dir) {
            return id;
        }
        if let Some(&id) = self.dir_cache.lock().get(dir) {
            return id;
        }
        let parent = match dir.rfind('/') {
            Some(idx) => &dir[..idx],
            None => ".",
        };
        let id = if parent == dir {
            NamespaceId::ROOT
        } else {
            self.namespace_for_dir(parent)
        };
        self.dir_cache.lock().insert(dir.to_string(), id);
        id
    }

    /// The declared path of a namespace.
    pub fn path(&self, id: NamespaceId) -> String {
        self.namespaces.read()[id.index()].path.clone()
    }

    /// Compute every namespace's visible set, assign stable output ids in
    /// sorted-path order and freeze the registry. Idempotent once frozen.
    ///
    /// An import naming an undeclared namespace is a terminal error.
    pub fn resolve_imports(&self) -> Result<(), NamespaceError> {
        if self.is_frozen() {
            return Ok(());
        }
        let declared = self.declared.read();
        let mut namespaces = self.namespaces.write();

        for idx in 0..namespaces.len() {
            if idx == NamespaceId::ROOT.index() {
                continue;
            }
            let mut visible = Vec::with_capacity(2 + namespaces[idx].imports.len());
            visible.push(NamespaceId(idx as u32));
            for import in &namespaces[idx].imports {
                let &imported = declared.get(import).ok_or_else(|| {
                    NamespaceError::UndeclaredImport {
                        namespace: namespaces[idx].path.clone(),
                        import: import.clone(),
                    }
                })?;
                visible.push(imported);
            }
            visible.push(NamespaceId::ROOT);
            namespaces[idx].visible = visible;
        }

        // Sorted-path order gives every non-root namespace its stable id,
        // used to disambiguate identical module names in output.
        let mut order: Vec<usize> = (0..namespaces.len()).collect();
        order.sort_by(|&a, &b| namespaces[a].path.cmp(&namespaces[b].path));
        for (sorted_idx, &idx) in order.iter().enumerate() {
            if idx != NamespaceId::ROOT.index() {
                namespaces[idx].output_id = Some(sorted_idx as u32);
            }
        }

        drop(namespaces);
        drop(declared);
        self.frozen.store(true, Ordering::Release);
        Ok(())
    }

    /// Record `name` as declared in `namespace`.
    pub fn declare_module(
        &self,
        namespace: NamespaceId,
        name: &str,
        id: ModuleId,
    ) -> Result<(), NamespaceError> {
        let mut namespaces = self.namespaces.write();
        let data = &mut namespaces[namespace.index()];
        if data.modules.contains_key(name) {
            return Err(NamespaceError::DuplicateModule {
                namespace: data.path.clone(),
                name: name.to_string(),
            });
        }
        data.modules.insert(name.to_string(), id);
        Ok(())
    }

    /// Move a module's table entry from `old` to `new` within its namespace.
    pub fn rename_module(
        &self,
        namespace: NamespaceId,
        old: &str,
        new: &str,
    ) -> Result<(), NamespaceError> {
        let mut namespaces = self.namespaces.write();
        let data = &mut namespaces[namespace.index()];
        if data.modules.contains_key(new) {
            return Err(NamespaceError::DuplicateModule {
                namespace: data.path.clone(),
                name: new.to_string(),
            });
        }
        if let Some(id) = data.modules.remove(old) {
            data.modules.insert(new.to_string(), id);
        }
        Ok(())
    }

    /// Resolve a target reference from the point of view of `from`.
    ///
    /// Bare names search `from`'s visible set in order; qualified names
    /// search exactly the named namespace. Panics if called before
    /// imports were resolved, since visible sets do not exist yet.
    pub fn resolve(&self, target: &TargetRef, from: NamespaceId) -> Option<ModuleId> {
        assert!(
            self.is_frozen(),
            "module references cannot resolve before namespace imports are resolved"
        );
        let namespaces = self.namespaces.read();
        match target {
            TargetRef::Qualified { namespace, name } => {
                let &id = self.declared.read().get(namespace)?;
                namespaces[id.index()].modules.get(name).copied()
            }
            TargetRef::Bare(name) => {
                for &candidate in &namespaces[from.index()].visible {
                    if let Some(&id) = namespaces[candidate.index()].modules.get(name) {
                        return Some(id);
                    }
                }
                None
            }
        }
    }

    /// Build the resolution error for an unresolvable reference,
    /// including which namespaces do declare the name and which ones the
    /// depender can read.
    pub fn missing_dependency_error(
        &self,
        depender: &str,
        depender_file: &str,
        from: NamespaceId,
        target: &TargetRef,
    ) -> GraphError {
        let namespaces = self.namespaces.read();
        let mut detail = String::new();

        if let TargetRef::Bare(name) = target {
            let mut declared_in: Vec<&str> = Vec::new();
            let mut order: Vec<usize> = (0..namespaces.len()).collect();
            order.sort_by(|&a, &b| namespaces[a].path.cmp(&namespaces[b].path));
            for idx in order {
                if namespaces[idx].modules.contains_key(name) {
                    declared_in.push(&namespaces[idx].path);
                }
            }
            if !declared_in.is_empty() {
                let readable: Vec<&str> = namespaces[from.index()]
                    .visible
                    .iter()
                    .map(|ns| namespaces[ns.index()].path.as_str())
                    .collect();
                detail.push_str(&format!(
                    "\nmodule \"{}\" is defined in namespace \"{}\" which can read these {} namespaces: {:?}",
                    depender,
                    namespaces[from.index()].path,
                    readable.len(),
                    readable
                ));
                detail.push_str(&format!(
                    "\nmodule \"{}\" can be found in these namespaces: {:?}",
                    name, declared_in
                ));
            }
        }

        GraphError::Resolution {
            module: depender.to_string(),
            namespace: namespaces[from.index()].path.clone(),
            file: depender_file.to_string(),
            target: target.to_string(),
            detail,
        }
    }

    /// A name unique across all namespaces, for generated output:
    /// `<id>-<name>`, with the root's prefix elided.
    pub fn unique_name(&self, namespace: NamespaceId, name: &str) -> String {
        let namespaces = self.namespaces.read();
        match namespaces[namespace.index()].output_id {
            Some(id) => format!("{id}-{name}"),
            None => name.to_string(),
        }
    }

    /// The stable output id assigned at freeze; `None` for the root.
    pub fn output_id(&self, namespace: NamespaceId) -> Option<u32> {
        self.namespaces.read()[namespace.index()].output_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(id: u32) -> ModuleId {
        ModuleId(id)
    }

    #[test]
    fn visible_set_search_order() {
        let resolver = NameResolver::new();
        let a = resolver.declare("a", []).unwrap();
        let b = resolver.declare("b", ["a".to_string()]).unwrap();
        resolver.resolve_imports().unwrap();

        // util in both a and b; b's own declaration wins.
        resolver.declare_module(a, "util", dummy(1)).unwrap();
        resolver.declare_module(b, "util", dummy(2)).unwrap();

        let bare = TargetRef::parse("util");
        assert_eq!(resolver.resolve(&bare, b), Some(dummy(2)));
        assert_eq!(resolver.resolve(&bare, a), Some(dummy(1)));
    }

    #[test]
    fn import_fallback_then_root() {
        let resolver = NameResolver::new();
        let a = resolver.declare("a", []).unwrap();
        let b = resolver.declare("b", ["a".to_string()]).unwrap();
        resolver.resolve_imports().unwrap();

        resolver.declare_module(a, "util", dummy(1)).unwrap();
        resolver
            .declare_module(NamespaceId::ROOT, "global", dummy(3))
            .unwrap();

        let bare = TargetRef::parse("util");
        assert_eq!(resolver.resolve(&bare, b), Some(dummy(1)), "import fallback");
        assert_eq!(
            resolver.resolve(&TargetRef::parse("global"), b),
            Some(dummy(3)),
            "root fallback"
        );
        assert_eq!(resolver.resolve(&bare, NamespaceId::ROOT), None);
    }

    #[test]
    fn qualified_bypasses_visibility() {
        let resolver = NameResolver::new();
        let a = resolver.declare("a", []).unwrap();
        let c = resolver.declare("c", []).unwrap();
        resolver.resolve_imports().unwrap();
        resolver.declare_module(a, "util", dummy(1)).unwrap();

        // c does not import a: bare fails, qualified succeeds.
        assert_eq!(resolver.resolve(&TargetRef::parse("util"), c), None);
        assert_eq!(
            resolver.resolve(&TargetRef::parse("//a:util"), c),
            Some(dummy(1))
        );
        assert_eq!(resolver.resolve(&TargetRef::parse("//nope:util"), c), None);
    }

    #[test]
    fn undeclared_import_is_terminal() {
        let resolver = NameResolver::new();
        resolver.declare("b", ["ghost".to_string()]).unwrap();
        let err = resolver.resolve_imports().unwrap_err();
        assert_eq!(
            err,
            NamespaceError::UndeclaredImport {
                namespace: "b".to_string(),
                import: "ghost".to_string(),
            }
        );
    }

    #[test]
    #[should_panic(expected = "after the registry is frozen")]
    fn declare_after_freeze_panics() {
        let resolver = NameResolver::new();
        resolver.resolve_imports().unwrap();
        let _ = resolver.declare("late", []);
    }

    #[test]
    fn duplicate_module_rejected() {
        let resolver = NameResolver::new();
        let a = resolver.declare("a", []).unwrap();
        resolver.declare_module(a, "util", dummy(1)).unwrap();
        let err = resolver.declare_module(a, "util", dummy(2)).unwrap_err();
        assert!(matches!(err, NamespaceError::DuplicateModule { .. }));
    }

    #[test]
    fn dir_lookup_walks_ancestors() {
        let resolver = NameResolver::new();
        let a = resolver.declare("vendor/acme", []).unwrap();
        resolver.resolve_imports().unwrap();

        assert_eq!(resolver.namespace_for_dir("vendor/acme"), a);
        assert_eq!(resolver.namespace_for_dir("vendor/acme/libs/core"), a);
        assert_eq!(resolver.namespace_for_dir("other/dir"), NamespaceId::ROOT);
    }

    #[test]
    fn unique_names_use_sorted_ids() {
        let resolver = NameResolver::new();
        let b = resolver.declare("b", []).unwrap();
        let a = resolver.declare("a", []).unwrap();
        resolver.resolve_imports().unwrap();

        // Sorted order: ".", "a", "b" -> ids 1 and 2; root elided.
        assert_eq!(resolver.output_id(NamespaceId::ROOT), None);
        assert_eq!(resolver.unique_name(a, "util"), "1-util");
        assert_eq!(resolver.unique_name(b, "util"), "2-util");
        assert_eq!(resolver.unique_name(NamespaceId::ROOT, "util"), "util");
    }

    #[test]
    fn missing_dependency_error_lists_candidates() {
        let resolver = NameResolver::new();
        let a = resolver.declare("a", []).unwrap();
        let c = resolver.declare("c", []).unwrap();
        resolver.resolve_imports().unwrap();
        resolver.declare_module(a, "util", dummy(1)).unwrap();

        let err = resolver.missing_dependency_error(
            "consumer",
            "c/BUILD",
            c,
            &TargetRef::parse("util"),
        );
        let text = err.to_string();
        assert!(text.contains("depends on undefined module \"util\""));
        assert!(text.contains("can be found in these namespaces"));
        assert!(text.contains('a'));
    }
}
