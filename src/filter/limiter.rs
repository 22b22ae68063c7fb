//! Load limiting: predicate trees applied to loaded objects.
//!
//! A limiter decides whether a loaded object is forwarded to rendering.
//! Limiters compose as a tree of list membership, regex matches and boolean
//! operators; the null limiter at the root of an unconfigured type admits
//! everything.

use crate::error::{ConfigError, ConfigResult};
use crate::filter::full_match_regex;
use crate::model::LoadedObject;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Declarative limiter specification, as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "with", rename_all = "lowercase")]
pub enum LimiterSpec {
    /// Admit objects whose attribute (or UID) appears in a values file
    List {
        /// Path of a whitespace-separated values file
        list: PathBuf,
        /// Attribute to test; the object's UID when absent
        #[serde(default)]
        by: Option<String>,
    },
    /// Admit objects with an attribute value fully matching a pattern
    Regex {
        /// The pattern; must match a whole value
        regex: String,
        /// Attribute to test
        by: String,
    },
    /// Negate a limiter
    Not {
        /// The limiter to negate
        child: Box<LimiterSpec>,
    },
    /// Admit only objects admitted by every child
    And {
        /// The composed limiters
        children: Vec<LimiterSpec>,
    },
    /// Admit objects admitted by any child
    Or {
        /// The composed limiters
        children: Vec<LimiterSpec>,
    },
}

/// A compiled limiter, ready to evaluate against loaded objects.
#[derive(Debug)]
pub enum LoadLimiter {
    /// Admits everything
    Null,
    /// List membership over an attribute, or over the UID when `attribute`
    /// is `None`
    List {
        values: HashSet<String>,
        attribute: Option<String>,
    },
    /// Full regex match over an attribute's values
    Regex { attribute: String, pattern: Regex },
    /// Negation
    Not(Box<LoadLimiter>),
    /// Conjunction
    And(Vec<LoadLimiter>),
    /// Disjunction
    Or(Vec<LoadLimiter>),
}

impl LoadLimiter {
    /// Compile a limiter from its configuration spec.
    ///
    /// Relative list-file paths resolve against `base_dir`, the directory of
    /// the configuration file.
    pub fn from_spec(spec: &LimiterSpec, base_dir: &Path) -> ConfigResult<Self> {
        match spec {
            LimiterSpec::List { list, by } => {
                let path = if list.is_absolute() {
                    list.clone()
                } else {
                    base_dir.join(list)
                };
                let contents = fs::read_to_string(&path).map_err(|error| {
                    ConfigError::invalid(format!(
                        "failed to read limiter list {}: {error}",
                        path.display()
                    ))
                })?;
                let values = contents
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<HashSet<_>>();
                Ok(Self::List {
                    values,
                    attribute: by.clone(),
                })
            }
            LimiterSpec::Regex { regex, by } => {
                let pattern = full_match_regex(regex).map_err(|error| {
                    ConfigError::invalid(format!("bad limiter regex '{regex}': {error}"))
                })?;
                Ok(Self::Regex {
                    attribute: by.clone(),
                    pattern,
                })
            }
            LimiterSpec::Not { child } => {
                Ok(Self::Not(Box::new(Self::from_spec(child, base_dir)?)))
            }
            LimiterSpec::And { children } => Ok(Self::And(Self::from_specs(children, base_dir)?)),
            LimiterSpec::Or { children } => Ok(Self::Or(Self::from_specs(children, base_dir)?)),
        }
    }

    fn from_specs(specs: &[LimiterSpec], base_dir: &Path) -> ConfigResult<Vec<Self>> {
        specs
            .iter()
            .map(|spec| Self::from_spec(spec, base_dir))
            .collect()
    }

    /// Build the blacklist form used for `user-blacklist`: everything except
    /// the listed values.
    pub fn blacklist(list_file: &Path, attribute: Option<String>, base_dir: &Path) -> ConfigResult<Self> {
        let spec = LimiterSpec::List {
            list: list_file.to_path_buf(),
            by: attribute,
        };
        Ok(Self::Not(Box::new(Self::from_spec(&spec, base_dir)?)))
    }

    /// AND this limiter with another one (used to fold the user blacklist
    /// into the limiter of every `Users`-endpoint type).
    pub fn and(self, other: LoadLimiter) -> Self {
        Self::And(vec![self, other])
    }

    /// Decide whether an object is forwarded.
    ///
    /// `uid_attribute` names the attribute a list limiter without `by` tests.
    pub fn include(&self, object: &LoadedObject, uid_attribute: &str) -> bool {
        match self {
            Self::Null => true,
            Self::List { values, attribute } => {
                let attribute = attribute.as_deref().unwrap_or(uid_attribute);
                object.values(attribute).iter().any(|v| values.contains(v))
            }
            Self::Regex { attribute, pattern } => {
                object.values(attribute).iter().any(|v| pattern.is_match(v))
            }
            Self::Not(child) => !child.include(object, uid_attribute),
            Self::And(children) => children
                .iter()
                .all(|child| child.include(object, uid_attribute)),
            Self::Or(children) => children
                .iter()
                .any(|child| child.include(object, uid_attribute)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn object_with(attribute: &str, values: &[&str]) -> LoadedObject {
        let mut object = LoadedObject::new("Student");
        object.set_attribute("GUID", vec!["u1".to_string()]);
        object.set_attribute(attribute, values.iter().map(|v| v.to_string()).collect());
        object
    }

    fn list_file(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("allowed.txt");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{contents}").unwrap();
        path
    }

    #[test]
    fn test_null_admits_everything() {
        let limiter = LoadLimiter::Null;
        assert!(limiter.include(&LoadedObject::new("Student"), "GUID"));
    }

    #[test]
    fn test_list_limiter_on_attribute() {
        let dir = tempdir().unwrap();
        let path = list_file(dir.path(), "anna berit\ncesar");
        let spec = LimiterSpec::List {
            list: path,
            by: Some("userName".to_string()),
        };
        let limiter = LoadLimiter::from_spec(&spec, dir.path()).unwrap();

        assert!(limiter.include(&object_with("userName", &["berit"]), "GUID"));
        assert!(!limiter.include(&object_with("userName", &["doris"]), "GUID"));
    }

    #[test]
    fn test_list_limiter_defaults_to_uid() {
        let dir = tempdir().unwrap();
        let path = list_file(dir.path(), "u1 u9");
        let spec = LimiterSpec::List { list: path, by: None };
        let limiter = LoadLimiter::from_spec(&spec, dir.path()).unwrap();

        assert!(limiter.include(&object_with("userName", &["anna"]), "GUID"));

        let mut other = LoadedObject::new("Student");
        other.set_attribute("GUID", vec!["u2".to_string()]);
        assert!(!limiter.include(&other, "GUID"));
    }

    #[test]
    fn test_regex_limiter_full_match() {
        let spec = LimiterSpec::Regex {
            regex: "1[A-C]".to_string(),
            by: "groupName".to_string(),
        };
        let limiter = LoadLimiter::from_spec(&spec, Path::new(".")).unwrap();

        assert!(limiter.include(&object_with("groupName", &["1B"]), "GUID"));
        assert!(!limiter.include(&object_with("groupName", &["11B"]), "GUID"));
        assert!(!limiter.include(&object_with("groupName", &[]), "GUID"));
    }

    #[test]
    fn test_boolean_composition() {
        let starts_a = LimiterSpec::Regex {
            regex: "a.*".to_string(),
            by: "userName".to_string(),
        };
        let ends_z = LimiterSpec::Regex {
            regex: ".*z".to_string(),
            by: "userName".to_string(),
        };

        let both = LoadLimiter::from_spec(
            &LimiterSpec::And {
                children: vec![starts_a.clone(), ends_z.clone()],
            },
            Path::new("."),
        )
        .unwrap();
        assert!(both.include(&object_with("userName", &["aoz"]), "GUID"));
        assert!(!both.include(&object_with("userName", &["aox"]), "GUID"));

        let either = LoadLimiter::from_spec(
            &LimiterSpec::Or {
                children: vec![starts_a.clone(), ends_z],
            },
            Path::new("."),
        )
        .unwrap();
        assert!(either.include(&object_with("userName", &["aox"]), "GUID"));
        assert!(!either.include(&object_with("userName", &["box"]), "GUID"));

        let negated = LoadLimiter::from_spec(
            &LimiterSpec::Not {
                child: Box::new(starts_a),
            },
            Path::new("."),
        )
        .unwrap();
        assert!(negated.include(&object_with("userName", &["box"]), "GUID"));
    }

    #[test]
    fn test_blacklist_composition() {
        let dir = tempdir().unwrap();
        let path = list_file(dir.path(), "blocked-user");

        let blacklist =
            LoadLimiter::blacklist(&path, Some("userName".to_string()), dir.path()).unwrap();
        let combined = LoadLimiter::Null.and(blacklist);

        assert!(combined.include(&object_with("userName", &["anna"]), "GUID"));
        assert!(!combined.include(&object_with("userName", &["blocked-user"]), "GUID"));
    }
}
