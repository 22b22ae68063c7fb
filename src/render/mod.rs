//! Rendering: loaded objects to SCIM JSON.
//!
//! [`template`] expands the per-type JSON template against an object's
//! attributes, [`plugin`] runs the post-processing pipeline over the result,
//! and [`renderer`] ties the two together into the loaded-object →
//! rendered-object boundary the reconciliation engine consumes.

pub mod plugin;
pub mod renderer;
pub mod template;

pub use plugin::{resolve_plugins, PluginDisposition, PostProcessor};
pub use renderer::Renderer;
