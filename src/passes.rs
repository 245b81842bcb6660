//! Built-in passes: property expansion and the arch/link splits.

use crate::report::GraphError;
use crate::scheduler::{Direction, Pass, PassDescriptor, PassGroup, VisitContext};
use crate::split::SplitKind;
use crate::types::{Capability, Module};

/// Pre-arch: expand `$(name)` configuration references in every string
/// property, in place.
pub struct VariableExpansion;

impl Pass for VariableExpansion {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new(
            "variable_expansion",
            PassGroup::PreArch,
            Direction::BottomUp,
            true,
        )
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        let mut bag = module.properties.clone();
        let lookup = |name: &str| ctx.config().get_str(name).map(str::to_string);
        match bag.expand(&lookup) {
            Ok(()) => {
                if bag != module.properties {
                    ctx.replace_properties(bag);
                }
                Ok(())
            }
            Err((path, err)) => Err(GraphError::Property {
                module: module.display_name(),
                file: module.file.clone(),
                property: path,
                message: err.to_string(),
            }),
        }
    }
}

/// Pre-deps: split every compiling module per target architecture.
///
/// `arch_neutral: true` opts a module out (its outputs are the same on
/// every architecture). With zero or one configured arch there is still
/// a split so the variant key records the choice.
pub struct ArchSplit;

impl Pass for ArchSplit {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new("arch_split", PassGroup::PreDeps, Direction::BottomUp, false)
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        if module.variant().has_axis("arch") {
            return Ok(());
        }
        if !ctx.kinds().has_capability(&module.kind, Capability::CompilesSources) {
            return Ok(());
        }
        if module.properties.bool_at("arch_neutral").unwrap_or(false) {
            return Ok(());
        }
        let arches = ctx.config().target_arches().to_vec();
        if arches.is_empty() {
            return Ok(());
        }
        ctx.request_split("arch", arches, SplitKind::Global);
        Ok(())
    }
}

/// Pre-deps: split linkable modules into their declared link modes.
///
/// A module declaring `link_variants: ["shared", "static"]` becomes one
/// replica per mode; dependers reach the matching replica through
/// variant-aware resolution and their own link split.
pub struct LinkSplit;

impl Pass for LinkSplit {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new("link_split", PassGroup::PreDeps, Direction::BottomUp, false)
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        if module.variant().has_axis("link") {
            return Ok(());
        }
        if !ctx.kinds().has_capability(&module.kind, Capability::LinksObjects) {
            return Ok(());
        }
        let modes = module.properties.strings_at("link_variants");
        if modes.is_empty() {
            return Ok(());
        }
        ctx.request_split("link", modes, SplitKind::Global);
        Ok(())
    }
}
