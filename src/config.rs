//! Typed run configuration.
//!
//! One TOML file describes one sync target: where the SCIM server is, where
//! the cache lives, which EGIL types to load and send (and in which order),
//! and a `[types.<name>]` table per type with its identifier attribute,
//! endpoint, JSON template and optional limiter/transformer/generation keys.
//!
//! A `[types.Object]` pseudo-table supplies generic threshold fallbacks for
//! types without their own.

use crate::error::{ConfigError, ConfigResult};
use crate::filter::{LimiterSpec, TransformSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fallback pseudo-type for thresholds.
const GENERIC_TYPE: &str = "Object";

const DEFAULT_ORGANISATION_TEMPLATE: &str = r#"
{
  "schemas": ["urn:scim:schemas:extension:sis:school:1.0:Organisation"],
  "externalId": "${uuid}",
  "displayName": "${displayName}"
}
"#;

fn default_true() -> bool {
    true
}

fn default_lock_timeout() -> u64 {
    30
}

/// A `Type.attribute` reference, written as a dotted string in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AttributePath {
    /// The EGIL type part
    pub egil_type: String,
    /// The attribute part
    pub attribute: String,
}

impl TryFrom<String> for AttributePath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((egil_type, attribute)) if !egil_type.is_empty() && !attribute.is_empty() => {
                Ok(Self {
                    egil_type: egil_type.to_string(),
                    attribute: attribute.to_string(),
                })
            }
            _ => Err(format!("expected 'Type.attribute', got '{value}'")),
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.egil_type, self.attribute)
    }
}

/// The process-global user blacklist; AND-ed into the limiter of every type
/// whose SCIM endpoint is `Users`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlacklistConfig {
    /// Whitespace-separated values file
    pub file: PathBuf,
    /// Attribute to test; the UID when absent
    #[serde(default)]
    pub attribute: Option<String>,
}

/// One attribute specification for virtual student-group generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupAttributeSpec {
    /// Source attribute on the user object
    pub from: String,
    /// Full-match pattern selecting group-bearing values
    #[serde(rename = "match")]
    pub pattern: String,
    /// Capture-group recipe producing the UUID basis
    pub uuid: String,
    /// `[attribute-name, capture-group recipe]` pairs filling the group
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

/// A relation the loader resolves after a type has been loaded or generated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteRelation {
    /// Type of the object on the other side
    pub related_type: String,
    /// Attribute on this type holding the foreign key
    pub local_attribute: String,
    /// Attribute on the related type the key refers to
    pub remote_attribute: String,
}

/// Per-type configuration table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TypeConfig {
    /// Attribute holding the object's UID
    #[serde(default)]
    pub unique_identifier: Option<String>,
    /// SCIM endpoint (`Users`, `StudentGroups`, ...)
    #[serde(default)]
    pub scim_url_endpoint: Option<String>,
    /// JSON template for rendering
    #[serde(default)]
    pub scim_json_template: Option<String>,
    /// Endpoint-type override; Student and Teacher default to `User`
    #[serde(default)]
    pub ss12000_type: Option<String>,
    /// Absolute delta threshold
    #[serde(default)]
    pub threshold: Option<i64>,
    /// Relative delta threshold, percent of the cached count
    #[serde(default)]
    pub threshold_relative: Option<i64>,
    /// Load limiter
    #[serde(default)]
    pub limit: Option<LimiterSpec>,
    /// Attribute transformers, applied in order before limiting
    #[serde(default)]
    pub transform_attributes: Vec<TransformSpec>,
    /// Attribute used for human-readable log identities
    #[serde(default)]
    pub readable_id: Option<String>,
    /// Whether this type is synthesised instead of loaded
    #[serde(default)]
    pub is_generated: bool,
    /// Master type for Activity-style generation
    #[serde(default)]
    pub generate_type: Option<String>,
    /// Master `Type.attribute` key for Employment-style generation
    #[serde(default)]
    pub generate_key: Option<AttributePath>,
    /// Related side of a generated relation
    #[serde(default)]
    pub generate_remote_part: Option<AttributePath>,
    /// Attribute on the related type matched against the master's key values
    #[serde(default)]
    pub remote_relation_id: Option<String>,
    /// Master side of a generated relation
    #[serde(default)]
    pub generate_local_part: Option<AttributePath>,
    /// `Type.attribute` entries populating the synthesised object
    #[serde(default)]
    pub scim_variables: Vec<String>,
    /// Extra attributes copied like `scim-variables` but never rendered
    #[serde(default)]
    pub hidden_attributes: Vec<String>,
    /// The two `Type.attribute` references whose values form the UUID basis
    /// for Activity-style generation
    #[serde(default)]
    pub guid_generation_ids: Vec<String>,
    /// Source types for virtual group generation
    #[serde(default)]
    pub generate_from_types: Vec<String>,
    /// Attribute specifications for virtual group generation
    #[serde(default)]
    pub generate_from_attributes: Vec<GroupAttributeSpec>,
    /// Fixed UUID for the static Organisation object
    #[serde(default)]
    pub static_uuid: Option<String>,
    /// Display name for the static Organisation object
    #[serde(default)]
    pub display_name: Option<String>,
    /// Suppress warnings about masters whose related object is missing
    #[serde(default)]
    pub ignore_missing_related: bool,
    /// Relations resolved through the loader after this type is in place
    #[serde(default)]
    pub remote_relations: Vec<RemoteRelation>,
}

/// Configuration for one sync target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AppConfig {
    /// Base URL of the SCIM server
    pub scim_url: String,
    /// Client certificate (PEM) for the TLS channel
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Client private key (PEM)
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Path of the rendered-object cache file
    pub cache_file: PathBuf,
    /// Types to reconcile, in dependency order
    pub scim_type_send_order: Vec<String>,
    /// Types to load, in order; defaults to the send order
    #[serde(default)]
    pub scim_type_load_order: Vec<String>,
    /// Optional process-global user blacklist
    #[serde(default)]
    pub user_blacklist: Option<BlacklistConfig>,
    /// Whether bare `${name}` template replacements escape for JSON strings
    #[serde(default = "default_true")]
    pub escape_template_values: bool,
    /// Post-processing plugins, by name, applied in order after rendering
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Audit journal; absent disables auditing
    #[serde(default)]
    pub audit_log_file: Option<PathBuf>,
    /// Seconds to wait for the cache lock before breaking it
    #[serde(default = "default_lock_timeout")]
    pub file_lock_timeout: u64,
    /// Input file for the JSON source backend
    #[serde(default)]
    pub data_source_file: Option<PathBuf>,
    /// Per-type tables
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,

    #[serde(skip)]
    base_dir: PathBuf,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self::parse(&text, base_dir).map_err(|error| match error {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration text; `base_dir` anchors relative paths.
    pub fn parse(text: &str, base_dir: PathBuf) -> ConfigResult<Self> {
        let mut config: AppConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source: Box::new(source),
        })?;
        config.base_dir = base_dir;
        if config.scim_type_load_order.is_empty() {
            config.scim_type_load_order = config.scim_type_send_order.clone();
        }
        config.apply_organisation_defaults();
        config.register_virtual_group_attributes();
        config.validate()?;
        Ok(config)
    }

    /// Directory of the configuration file; relative paths resolve here.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a possibly-relative path against the configuration directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// The cache-lock timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.file_lock_timeout)
    }

    /// The table for a type.
    pub fn type_config(&self, egil_type: &str) -> ConfigResult<&TypeConfig> {
        self.types
            .get(egil_type)
            .ok_or_else(|| ConfigError::UnknownType(egil_type.to_string()))
    }

    /// The UID attribute of a type.
    pub fn unique_identifier(&self, egil_type: &str) -> ConfigResult<&str> {
        self.type_config(egil_type)?
            .unique_identifier
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(egil_type, "unique-identifier"))
    }

    /// The SCIM endpoint of a type.
    pub fn endpoint(&self, egil_type: &str) -> ConfigResult<&str> {
        self.type_config(egil_type)?
            .scim_url_endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(egil_type, "scim-url-endpoint"))
    }

    /// The JSON template of a type.
    pub fn template(&self, egil_type: &str) -> ConfigResult<&str> {
        self.type_config(egil_type)?
            .scim_json_template
            .as_deref()
            .ok_or_else(|| ConfigError::missing_key(egil_type, "scim-json-template"))
    }

    /// The endpoint type used for plugin classification. Student and Teacher
    /// map to `User` unless the type carries an explicit override.
    pub fn standard_type(&self, egil_type: &str) -> String {
        if let Ok(type_config) = self.type_config(egil_type) {
            if let Some(standard) = &type_config.ss12000_type {
                return standard.clone();
            }
        }
        match egil_type {
            "Student" | "Teacher" => "User".to_string(),
            other => other.to_string(),
        }
    }

    /// Absolute threshold for a type, falling back to `Object-threshold`.
    pub fn absolute_threshold(&self, egil_type: &str) -> Option<i64> {
        self.threshold_field(egil_type, |type_config| type_config.threshold)
    }

    /// Relative threshold for a type, falling back to
    /// `Object-threshold-relative`.
    pub fn relative_threshold(&self, egil_type: &str) -> Option<i64> {
        self.threshold_field(egil_type, |type_config| type_config.threshold_relative)
    }

    fn threshold_field(
        &self,
        egil_type: &str,
        field: impl Fn(&TypeConfig) -> Option<i64>,
    ) -> Option<i64> {
        self.types
            .get(egil_type)
            .and_then(&field)
            .or_else(|| self.types.get(GENERIC_TYPE).and_then(&field))
    }

    /// A generated Organisation type gets endpoint, identifier attribute and
    /// a minimal template unless explicitly configured.
    fn apply_organisation_defaults(&mut self) {
        if let Some(organisation) = self.types.get_mut("Organisation") {
            if !organisation.is_generated {
                return;
            }
            organisation
                .scim_url_endpoint
                .get_or_insert_with(|| "Organisations".to_string());
            organisation
                .unique_identifier
                .get_or_insert_with(|| "uuid".to_string());
            organisation
                .scim_json_template
                .get_or_insert_with(|| DEFAULT_ORGANISATION_TEMPLATE.to_string());
        }
    }

    /// The attributes virtual groups are generated from are typically not
    /// mentioned in any template, so backends would not fetch them. Register
    /// them as scim-variables on the source types.
    fn register_virtual_group_attributes(&mut self) {
        let mut additions: Vec<(String, String)> = Vec::new();
        for type_config in self.types.values() {
            if !type_config.is_generated || type_config.generate_from_attributes.is_empty() {
                continue;
            }
            for from_type in &type_config.generate_from_types {
                for attribute in &type_config.generate_from_attributes {
                    additions.push((from_type.clone(), attribute.from.clone()));
                }
            }
        }
        for (from_type, attribute) in additions {
            let entry = self.types.entry(from_type).or_default();
            if !entry.scim_variables.contains(&attribute) {
                entry.scim_variables.push(attribute);
            }
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.scim_type_send_order.is_empty() {
            return Err(ConfigError::invalid("scim-type-send-order is empty"));
        }
        for egil_type in &self.scim_type_send_order {
            self.unique_identifier(egil_type)?;
            self.endpoint(egil_type)?;
            self.template(egil_type)?;
        }
        Ok(())
    }
}
