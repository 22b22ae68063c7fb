//! Attribute transformers: derive new attributes from existing ones.
//!
//! Two functions exist: a regex rewrite that routes each value of a source
//! attribute through an ordered rule list, and a URL decoder. Transformers
//! run after loading and before limiting/rendering, so derived attributes are
//! visible to limiters and templates alike.

use crate::error::{ConfigError, ConfigResult};
use crate::filter::full_match_regex;
use crate::model::LoadedObject;
use regex::Regex;
use serde::Deserialize;

/// One transformer specification, as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Source attribute
    pub from: String,
    /// `"regex"` (default) or `"urldecode"`
    #[serde(default = "default_function")]
    pub function: String,
    /// Regex rules: `[pattern, target-attribute, replacement]`
    #[serde(default)]
    pub transforms: Vec<(String, String, String)>,
    /// Whether every matching rule fires, or only the first
    #[serde(default = "default_true")]
    pub match_all: bool,
    /// Attribute receiving values no rule matched
    #[serde(default)]
    pub no_match: Option<String>,
    /// Target attribute for `urldecode`; defaults to `from`
    #[serde(default)]
    pub to: Option<String>,
}

fn default_function() -> String {
    "regex".to_string()
}

fn default_true() -> bool {
    true
}

/// One compiled rewrite rule: pattern, target attribute, replacement recipe.
pub struct RegexRule {
    pattern: Regex,
    to: String,
    replace: String,
}

/// A compiled transformer.
pub enum Transformer {
    /// Does nothing; used for types without transform configuration
    Null,
    /// Applies a sequence of transformers in order
    Multi(Vec<Transformer>),
    /// Regex rewrite of one source attribute
    Rewrite {
        from: String,
        rules: Vec<RegexRule>,
        match_all: bool,
        no_match: Option<String>,
    },
    /// URL-decodes one attribute into another
    UrlDecode { from: String, to: String },
}

impl Transformer {
    /// Compile a transformer pipeline from the per-type spec list.
    pub fn from_specs(specs: &[TransformSpec]) -> ConfigResult<Self> {
        if specs.is_empty() {
            return Ok(Self::Null);
        }
        let compiled = specs
            .iter()
            .map(Self::from_spec)
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self::Multi(compiled))
    }

    fn from_spec(spec: &TransformSpec) -> ConfigResult<Self> {
        match spec.function.as_str() {
            "regex" => {
                let rules = spec
                    .transforms
                    .iter()
                    .map(|(pattern, to, replace)| {
                        let pattern = full_match_regex(pattern).map_err(|error| {
                            ConfigError::invalid(format!(
                                "bad transform regex '{pattern}': {error}"
                            ))
                        })?;
                        Ok(RegexRule {
                            pattern,
                            to: to.clone(),
                            replace: replace.clone(),
                        })
                    })
                    .collect::<ConfigResult<Vec<_>>>()?;
                Ok(Self::Rewrite {
                    from: spec.from.clone(),
                    rules,
                    match_all: spec.match_all,
                    no_match: spec.no_match.clone(),
                })
            }
            "urldecode" => Ok(Self::UrlDecode {
                from: spec.from.clone(),
                to: spec.to.clone().unwrap_or_else(|| spec.from.clone()),
            }),
            other => Err(ConfigError::invalid(format!(
                "unknown transformer function \"{other}\""
            ))),
        }
    }

    /// Apply the transformer to one loaded object.
    pub fn apply(&self, object: &mut LoadedObject) {
        match self {
            Self::Null => {}
            Self::Multi(transformers) => {
                for transformer in transformers {
                    transformer.apply(object);
                }
            }
            Self::Rewrite {
                from,
                rules,
                match_all,
                no_match,
            } => {
                let values = object.values(from).to_vec();
                for value in &values {
                    let mut found_match = false;
                    for rule in rules {
                        if let Some(captures) = rule.pattern.captures(value) {
                            let mut rewritten = String::new();
                            captures.expand(&rule.replace, &mut rewritten);
                            object.append_values(&rule.to, [rewritten]);

                            found_match = true;
                            if !match_all {
                                break;
                            }
                        }
                    }
                    if !found_match {
                        if let Some(no_match) = no_match {
                            object.append_values(no_match, [value.clone()]);
                        }
                    }
                }
            }
            Self::UrlDecode { from, to } => {
                let decoded: Vec<String> = object
                    .values(from)
                    .iter()
                    .map(|value| {
                        urlencoding::decode(value)
                            .map(|decoded| decoded.into_owned())
                            .unwrap_or_default()
                    })
                    .collect();
                object.set_attribute(to.clone(), decoded);
            }
        }
    }
}
