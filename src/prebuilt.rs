//! Prebuilt-vs-source selection.
//!
//! A prebuilt module is named `prebuilt_<source>` and stands in for the
//! source module of that name. Detection (pre-arch) records whether the
//! source actually exists, renaming sourceless prebuilts to take the
//! source's place outright. Selection (post-deps, top-down) decides
//! which of the pair wins; replacement (post-deps, bottom-up) rewires
//! every depender of the loser through the graph's reverse index and
//! suppresses the loser's installation.

use crate::report::GraphError;
use crate::scheduler::{Direction, Pass, PassDescriptor, PassGroup, VisitContext};
use crate::types::{Module, TargetRef};

/// The name prefix marking a prebuilt stand-in.
pub const PREBUILT_PREFIX: &str = "prebuilt_";

fn source_name(module: &Module) -> Option<&str> {
    module.base_name().strip_prefix(PREBUILT_PREFIX)
}

fn has_srcs(module: &Module) -> bool {
    !module.properties.strings_at("srcs").is_empty()
}

/// Pre-arch: detect whether each prebuilt's source module exists.
pub struct PrebuiltDetect;

impl Pass for PrebuiltDetect {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            "prebuilt_detect",
            PassGroup::PreArch,
            Direction::BottomUp,
            true,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        if !ctx.kinds().is_prebuilt(&module.kind) {
            return Ok(());
        }
        let Some(source) = source_name(module) else {
            return Ok(());
        };
        let target = TargetRef::Bare(source.to_string());
        if ctx.resolver().resolve(&target, module.namespace).is_some() {
            ctx.set_property("prebuilt.source_exists", true);
        } else {
            // No source anywhere visible: the prebuilt takes the source's
            // name and every bare reference resolves straight to it.
            let source = source.to_string();
            ctx.rename(&source);
        }
        Ok(())
    }
}

/// Post-deps, top-down: decide which of the (source, prebuilt) pair wins.
pub struct PrebuiltSelect;

impl PrebuiltSelect {
    fn use_prebuilt(prebuilt: &Module, source: Option<&Module>) -> bool {
        if !has_srcs(prebuilt) {
            return false;
        }
        if prebuilt.properties.bool_at("prefer").unwrap_or(false) {
            return true;
        }
        source.map_or(true, |s| !s.enabled)
    }
}

impl Pass for PrebuiltSelect {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            "prebuilt_select",
            PassGroup::PostDeps,
            Direction::TopDown,
            true,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        if ctx.kinds().is_prebuilt(&module.kind) {
            // An enabled source decides for the pair when it is visited
            // below; a missing or disabled source is never visited, so
            // the prebuilt side decides here.
            let source = source_name(module)
                .and_then(|s| {
                    ctx.resolver()
                        .resolve(&TargetRef::Bare(s.to_string()), module.namespace)
                })
                .map(|id| ctx.graph().module(id));
            let source_decides = source.map_or(false, |s| s.enabled);
            if !source_decides && Self::use_prebuilt(module, source) {
                ctx.set_property("prebuilt.use_prebuilt", true);
            }
            return Ok(());
        }

        let counterpart = TargetRef::Bare(format!("{PREBUILT_PREFIX}{}", module.base_name()));
        let Some(prebuilt_id) = ctx.resolver().resolve(&counterpart, module.namespace) else {
            return Ok(());
        };
        let prebuilt = ctx.graph().module(prebuilt_id);
        if !ctx.kinds().is_prebuilt(&prebuilt.kind) {
            return Ok(());
        }
        if Self::use_prebuilt(prebuilt, Some(module)) {
            ctx.set_property_on(prebuilt_id, "prebuilt.use_prebuilt", true);
            ctx.set_suppressed(true);
        }
        Ok(())
    }
}

/// Post-deps, bottom-up: rewire dependers of a replaced source to the
/// winning prebuilt, suppress losing prebuilts.
pub struct PrebuiltReplace;

impl Pass for PrebuiltReplace {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            "prebuilt_replace",
            PassGroup::PostDeps,
            Direction::BottomUp,
            false,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        if !ctx.kinds().is_prebuilt(&module.kind) {
            return Ok(());
        }
        let use_prebuilt = module
            .properties
            .bool_at("prebuilt.use_prebuilt")
            .unwrap_or(false);
        if !use_prebuilt {
            ctx.set_suppressed(true);
            return Ok(());
        }
        let source_exists = module
            .properties
            .bool_at("prebuilt.source_exists")
            .unwrap_or(false);
        if !source_exists {
            return Ok(());
        }
        let Some(source) = source_name(module) else {
            return Ok(());
        };
        let target = TargetRef::Bare(source.to_string());
        if let Some(source_id) = ctx.resolver().resolve(&target, module.namespace) {
            ctx.replace_dependencies(source_id, module.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::graph::ModuleGraph;
    use crate::namespace::{NameResolver, NamespaceId};
    use crate::report::RunReport;
    use crate::scheduler::{Pipeline, PipelineBuilder};
    use crate::types::{DepTag, KindSpec, ModuleId, PropValue, PropertyBag};

    fn pipeline() -> Pipeline {
        PipelineBuilder::new()
            .register_kind("library", KindSpec::default())
            .register_kind("prebuilt_library", KindSpec::default().prebuilt())
            .register_pass(PrebuiltDetect)
            .register_pass(PrebuiltSelect)
            .register_pass(PrebuiltReplace)
            .build()
    }

    struct Fixture {
        graph: ModuleGraph,
        resolver: NameResolver,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: ModuleGraph::new(),
                resolver: NameResolver::new(),
            }
        }

        fn add(&mut self, name: &str, kind: &str, props: PropertyBag) -> ModuleId {
            let id = self.graph.add_module(Module::new(
                name,
                kind,
                NamespaceId::ROOT,
                "a",
                "a/BUILD",
                props,
            ));
            self.resolver
                .declare_module(NamespaceId::ROOT, name, id)
                .unwrap();
            id
        }

        fn run(&mut self) -> RunReport {
            let config = PipelineConfig::new();
            pipeline().run(&mut self.graph, &self.resolver, &config)
        }
    }

    fn prebuilt_props(prefer: bool) -> PropertyBag {
        let mut props = PropertyBag::new();
        props.set("srcs", PropValue::from(vec!["libfoo.a"]));
        if prefer {
            props.set("prefer", true);
        }
        props
    }

    #[test]
    fn preferred_prebuilt_replaces_source() {
        let mut fx = Fixture::new();
        let source = fx.add("libfoo", "library", PropertyBag::new());
        let prebuilt = fx.add("prebuilt_libfoo", "prebuilt_library", prebuilt_props(true));
        let consumer = fx.add("app", "library", PropertyBag::new());
        fx.graph
            .add_dependency(consumer, TargetRef::parse("libfoo"), DepTag::StaticLink);

        let report = fx.run();
        assert!(!report.is_failed(), "{}", report.render());

        let (_, edge) = fx.graph.resolved_deps(consumer).next().unwrap();
        assert_eq!(edge.resolved, Some(prebuilt), "depender rewired to prebuilt");
        assert_eq!(edge.tag, DepTag::StaticLink);
        assert!(fx.graph.module(source).suppressed, "losing source not installed");
        assert!(!fx.graph.module(prebuilt).suppressed);
    }

    #[test]
    fn enabled_source_wins_without_prefer() {
        let mut fx = Fixture::new();
        let source = fx.add("libfoo", "library", PropertyBag::new());
        let prebuilt = fx.add("prebuilt_libfoo", "prebuilt_library", prebuilt_props(false));
        let consumer = fx.add("app", "library", PropertyBag::new());
        fx.graph
            .add_dependency(consumer, TargetRef::parse("libfoo"), DepTag::StaticLink);

        let report = fx.run();
        assert!(!report.is_failed(), "{}", report.render());

        let (_, edge) = fx.graph.resolved_deps(consumer).next().unwrap();
        assert_eq!(edge.resolved, Some(source), "source keeps its dependers");
        assert!(fx.graph.module(prebuilt).suppressed, "losing prebuilt not installed");
        assert!(!fx.graph.module(source).suppressed);
    }

    #[test]
    fn disabled_source_cedes_to_prebuilt() {
        let mut fx = Fixture::new();
        let mut disabled = PropertyBag::new();
        disabled.set("enabled", false);
        fx.add("libfoo", "library", disabled);
        let prebuilt = fx.add("prebuilt_libfoo", "prebuilt_library", prebuilt_props(false));

        let report = fx.run();
        assert!(!report.is_failed(), "{}", report.render());
        assert!(!fx.graph.module(prebuilt).suppressed);
        assert!(
            fx.graph
                .module(prebuilt)
                .properties
                .bool_at("prebuilt.use_prebuilt")
                .unwrap_or(false)
        );
    }

    #[test]
    fn sourceless_prebuilt_takes_the_source_name() {
        let mut fx = Fixture::new();
        let prebuilt = fx.add("prebuilt_libfoo", "prebuilt_library", prebuilt_props(false));
        let consumer = fx.add("app", "library", PropertyBag::new());
        fx.graph
            .add_dependency(consumer, TargetRef::parse("libfoo"), DepTag::SharedLink);

        let report = fx.run();
        assert!(!report.is_failed(), "{}", report.render());

        assert_eq!(fx.graph.module(prebuilt).base_name(), "libfoo");
        let (_, edge) = fx.graph.resolved_deps(consumer).next().unwrap();
        assert_eq!(edge.resolved, Some(prebuilt));
        assert!(!fx.graph.module(prebuilt).suppressed);
    }

    #[test]
    fn srcless_prebuilt_is_never_used() {
        let mut fx = Fixture::new();
        let source = fx.add("libfoo", "library", PropertyBag::new());
        let mut props = PropertyBag::new();
        props.set("prefer", true);
        let prebuilt = fx.add("prebuilt_libfoo", "prebuilt_library", props);

        let report = fx.run();
        assert!(!report.is_failed(), "{}", report.render());
        assert!(fx.graph.module(prebuilt).suppressed);
        assert!(!fx.graph.module(source).suppressed);
    }
}
