//! Declarative policy checking.
//!
//! Rules are (path predicates, property predicates, reason); the checker
//! is a plain read-only bottom-up pass run after all splitting, so every
//! replica's final property state is what gets judged. Violations are
//! collected hard errors naming the rule and its reason.

pub mod rule;

pub use rule::{PolicyRule, RuleProperty};

use crate::report::GraphError;
use crate::scheduler::{Direction, Pass, PassDescriptor, PassGroup, VisitContext};
use crate::types::Module;

/// The rule-evaluation pass.
pub struct PolicyChecker {
    rules: Vec<PolicyRule>,
}

impl PolicyChecker {
    /// A checker over the given rules.
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }
}

impl Pass for PolicyChecker {
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor::new("policy_check", PassGroup::PostDeps, Direction::BottomUp, true)
    }

    fn visit(&self, module: &Module, ctx: &mut VisitContext<'_>) -> Result<(), GraphError> {
        let dir = format!("{}/", module.dir.trim_end_matches('/'));
        for rule in &self.rules {
            if rule.applies_to_dir(&dir) && rule.applies_to(&module.properties) {
                ctx.error(GraphError::Policy {
                    module: module.display_name(),
                    rule: rule.to_string(),
                });
            }
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
    use crate::scheduler::PipelineBuilder;
    use crate::types::PropertyBag;

    fn run_with_rule(props: PropertyBag, dir: &str, rule: PolicyRule) -> crate::report::RunReport {
        let resolver = NameResolver::new();
        let mut graph = ModuleGraph::new();
        let id = graph.add_module(Module::new(
            "libvendor",
            "library",
            NamespaceId::ROOT,
            dir,
            format!("{dir}/BUILD"),
            props,
        ));
        resolver
            .declare_module(NamespaceId::ROOT, "libvendor", id)
            .unwrap();
        let pipeline = PipelineBuilder::new()
            .register_pass(PolicyChecker::new(vec![rule]))
            .build();
        let config = PipelineConfig::new();
        pipeline.run(&mut graph, &resolver, &config)
    }

    fn vndk_rule() -> PolicyRule {
        PolicyRule::disallow()
            .with("vndk.enabled", "true")
            .without("vendor", "true")
            .because("a VNDK library must be a vendor library")
    }

    #[test]
    fn violation_is_collected_with_rule_text() {
        let mut props = PropertyBag::new();
        props.set("vndk.enabled", true);
        let report = run_with_rule(props, "vendor/acme", vndk_rule());

        assert!(report.is_failed());
        let text = report.errors()[0].to_string();
        assert!(text.contains("violates disallow"));
        assert!(text.contains("which is restricted because"));
    }

    #[test]
    fn satisfying_the_exemption_passes() {
        let mut props = PropertyBag::new();
        props.set("vndk.enabled", true);
        props.set("vendor", true);
        let report = run_with_rule(props, "vendor/acme", vndk_rule());
        assert!(!report.is_failed(), "{}", report.render());
    }

    #[test]
    fn path_scoping_limits_the_rule() {
        let mut props = PropertyBag::new();
        props.set("vndk.enabled", true);
        let scoped = PolicyRule::disallow()
            .in_dir(&["vendor"])
            .with("vndk.enabled", "true");
        let report = run_with_rule(props, "system/core", scoped);
        assert!(!report.is_failed());
    }
}
