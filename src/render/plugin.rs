//! Post-processing plugins.
//!
//! After template expansion every object passes through an ordered pipeline
//! of plugins. A plugin first classifies the object's endpoint type: `Skip`
//! leaves the object alone, `Process` transforms its JSON, and `Block` from
//! any plugin drops the object entirely (it is neither sent nor cached).
//!
//! Plugins are in-process trait objects registered at startup: the
//! configuration names them (`plugins = ["prune-empty", ...]`) and
//! [`resolve_plugins`] maps each name onto a compiled-in implementation.

use crate::error::{ConfigError, ConfigResult, RenderError, RenderResult};
use serde_json::Value;

/// How a plugin wants to handle a given endpoint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginDisposition {
    /// Drop objects of this type
    Block,
    /// Transform objects of this type
    Process,
    /// Leave objects of this type alone
    Skip,
}

/// A post-processing step over rendered JSON.
pub trait PostProcessor: std::fmt::Debug {
    /// Name used in error reporting.
    fn name(&self) -> &str;

    /// Classify an endpoint type (`User`, `StudentGroup`, ...).
    fn classify(&self, scim_type: &str) -> PluginDisposition;

    /// Transform the JSON of one object. Only called for types classified
    /// as [`PluginDisposition::Process`].
    fn process(&self, scim_type: &str, json: &str) -> Result<String, String>;
}

/// Run a pipeline over one object's JSON.
///
/// Returns `Ok(None)` when some plugin blocks the type, otherwise the JSON
/// after every processing plugin has been applied in order.
pub fn process_pipeline(
    plugins: &[Box<dyn PostProcessor>],
    scim_type: &str,
    json: String,
) -> RenderResult<Option<String>> {
    for plugin in plugins {
        if plugin.classify(scim_type) == PluginDisposition::Block {
            return Ok(None);
        }
    }

    let mut current = json;
    for plugin in plugins {
        if plugin.classify(scim_type) == PluginDisposition::Process {
            current = plugin
                .process(scim_type, &current)
                .map_err(|message| RenderError::Plugin {
                    plugin: plugin.name().to_string(),
                    message,
                })?;
        }
    }
    Ok(Some(current))
}

/// Resolve configured plugin names to compiled-in implementations, in order.
///
/// Built-ins:
///
/// - `compact-json`: reserializes every object's JSON without insignificant
///   whitespace
/// - `prune-empty`: removes top-level members holding an empty string or an
///   empty array
/// - `block:<Type>`: drops every object of the given endpoint type
///   (`User`, `StudentGroup`, ...)
pub fn resolve_plugins(names: &[String]) -> ConfigResult<Vec<Box<dyn PostProcessor>>> {
    let mut plugins: Vec<Box<dyn PostProcessor>> = Vec::new();
    for name in names {
        if let Some(scim_type) = name.strip_prefix("block:") {
            plugins.push(Box::new(BlockType {
                name: name.clone(),
                scim_type: scim_type.to_string(),
            }));
            continue;
        }
        match name.as_str() {
            "compact-json" => plugins.push(Box::new(CompactJson)),
            "prune-empty" => plugins.push(Box::new(PruneEmpty)),
            other => {
                return Err(ConfigError::invalid(format!(
                    "unknown post-processing plugin \"{other}\""
                )));
            }
        }
    }
    Ok(plugins)
}

/// Reserializes JSON without insignificant whitespace.
#[derive(Debug)]
struct CompactJson;

impl PostProcessor for CompactJson {
    fn name(&self) -> &str {
        "compact-json"
    }

    fn classify(&self, _scim_type: &str) -> PluginDisposition {
        PluginDisposition::Process
    }

    fn process(&self, _scim_type: &str, json: &str) -> Result<String, String> {
        let value: Value = serde_json::from_str(json).map_err(|error| error.to_string())?;
        serde_json::to_string(&value).map_err(|error| error.to_string())
    }
}

/// Drops top-level members whose value is `""` or `[]`. Some SCIM servers
/// reject empty strings for typed attributes that an absent template value
/// leaves behind.
#[derive(Debug)]
struct PruneEmpty;

impl PostProcessor for PruneEmpty {
    fn name(&self) -> &str {
        "prune-empty"
    }

    fn classify(&self, _scim_type: &str) -> PluginDisposition {
        PluginDisposition::Process
    }

    fn process(&self, _scim_type: &str, json: &str) -> Result<String, String> {
        let mut value: Value = serde_json::from_str(json).map_err(|error| error.to_string())?;
        if let Value::Object(members) = &mut value {
            members.retain(|_, member| match member {
                Value::String(text) => !text.is_empty(),
                Value::Array(items) => !items.is_empty(),
                _ => true,
            });
        }
        serde_json::to_string(&value).map_err(|error| error.to_string())
    }
}

/// Blocks every object of one endpoint type.
#[derive(Debug)]
struct BlockType {
    name: String,
    scim_type: String,
}

impl PostProcessor for BlockType {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, scim_type: &str) -> PluginDisposition {
        if scim_type == self.scim_type {
            PluginDisposition::Block
        } else {
            PluginDisposition::Skip
        }
    }

    fn process(&self, _scim_type: &str, json: &str) -> Result<String, String> {
        Ok(json.to_string())
    }
}
