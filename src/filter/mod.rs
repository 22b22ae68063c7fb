//! Pre-render object filtering and attribute derivation.
//!
//! Both stages run between loading and rendering: [`transformer`] derives new
//! attributes from existing ones, [`limiter`] then decides which objects are
//! forwarded at all.

pub mod limiter;
pub mod transformer;

pub use limiter::{LimiterSpec, LoadLimiter};
pub use transformer::{TransformSpec, Transformer};

use regex::Regex;

/// Compile a pattern that must match a whole value, mirroring how match
/// patterns behave everywhere in the configuration surface (limiters,
/// transformers, virtual-group generation).
pub(crate) fn full_match_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}
