//! Shipped propagation features.
//!
//! Each is a thin [`FeatureSpec`]: an edge-tag filter plus a
//! direct-requirement predicate over the module's properties. The
//! marking, splitting and rewiring live in the propagation module.

use crate::propagate::{FeatureConflict, FeatureSpec};
use crate::types::{DepTag, Module};

/// Address-sanitizer instrumentation.
///
/// Flows along static and whole-archive link edges only: code linked
/// into a sanitized image must be instrumented, code behind a shared
/// boundary must not be touched. `sanitize.never` opts a module out
/// entirely; requesting both `sanitize.address` and `sanitize.hwaddress`
/// is a conflict.
pub struct Sanitizer;

impl FeatureSpec for Sanitizer {
    fn name(&self) -> &str {
        "sanitize"
    }

    fn enabled_value(&self) -> &str {
        "asan"
    }

    fn follows(&self, tag: DepTag) -> bool {
        tag.links_statically()
    }

    fn direct_requirement(&self, module: &Module) -> Result<bool, FeatureConflict> {
        let address = module.properties.bool_at("sanitize.address").unwrap_or(false);
        let hwaddress = module
            .properties
            .bool_at("sanitize.hwaddress")
            .unwrap_or(false);
        if address && hwaddress {
            return Err(FeatureConflict {
                first: "address".to_string(),
                second: "hwaddress".to_string(),
            });
        }
        Ok(address || hwaddress)
    }

    fn eligible(&self, module: &Module) -> bool {
        !module.properties.bool_at("sanitize.never").unwrap_or(false)
    }
}

/// Link-time optimization.
///
/// Follows static link edges; `lto.thin` and `lto.full` on one module is
/// a conflict.
pub struct Lto;

impl FeatureSpec for Lto {
    fn name(&self) -> &str {
        "lto"
    }

    fn enabled_value(&self) -> &str {
        "lto"
    }

    fn follows(&self, tag: DepTag) -> bool {
        tag.links_statically()
    }

    fn direct_requirement(&self, module: &Module) -> Result<bool, FeatureConflict> {
        let thin = module.properties.bool_at("lto.thin").unwrap_or(false);
        let full = module.properties.bool_at("lto.full").unwrap_or(false);
        if thin && full {
            return Err(FeatureConflict {
                first: "thin".to_string(),
                second: "full".to_string(),
            });
        }
        Ok(thin || full)
    }

    fn eligible(&self, module: &Module) -> bool {
        !module.properties.bool_at("lto.never").unwrap_or(false)
    }
}
