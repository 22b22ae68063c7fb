//! Error types for the sync client.
//!
//! Every fallible operation in the crate returns a typed error. Errors are
//! split by blast radius: some abort the whole run for a configuration file
//! (configuration, thresholds, transport, cache format), others are contained
//! to a single object (rendering, individual SCIM operations) and only show
//! up in the audit trail.

use std::path::PathBuf;

/// Top-level error for one configuration-file run.
///
/// Any of these aborts the current configuration file; the binary then moves
/// on to the next one and exits non-zero at the end.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed or incomplete configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A source backend failed or produced malformed data
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// The per-type delta guard rejected the run
    #[error("{0}")]
    Threshold(#[from] ThresholdError),

    /// The rendered-object cache could not be read or written
    #[error("cache file error: {0}")]
    Cache(#[from] CacheError),

    /// The SCIM channel itself is unusable (TLS, connection refused)
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while loading and validating a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the configuration file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path of the configuration file
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A required key is absent
    #[error("missing configuration key '{key}' for type '{egil_type}'")]
    MissingKey {
        /// The type whose table is incomplete
        egil_type: String,
        /// The missing key
        key: String,
    },

    /// A type is referenced but has no `[types.<name>]` table
    #[error("type '{0}' is not configured")]
    UnknownType(String),

    /// A value failed validation
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of what is wrong
        message: String,
    },
}

/// Errors raised by a source backend or by the relation generator.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Backend I/O failure
    #[error("backend error for type '{egil_type}': {message}")]
    Backend {
        /// The type being loaded
        egil_type: String,
        /// Description from the backend
        message: String,
    },

    /// The backend handed us data we cannot interpret
    #[error("malformed data for type '{egil_type}': {message}")]
    Malformed {
        /// The type being loaded
        egil_type: String,
        /// Description of the malformation
        message: String,
    },

    /// A generated type is missing one of its generation keys
    #[error("cannot generate type '{egil_type}': {message}")]
    Generation {
        /// The type being generated
        egil_type: String,
        /// Description of the missing piece
        message: String,
    },
}

/// Per-object rendering failures.
///
/// These never abort a run: the object is dropped from the current set and
/// the cached copy, if any, is carried over unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Template expansion failed
    #[error("failed to expand template for type '{egil_type}': {source}")]
    Template {
        /// The type whose template failed
        egil_type: String,
        /// The expansion error with position information
        #[source]
        source: TemplateError,
    },

    /// The expanded template is not a JSON document
    #[error("rendered JSON for type '{egil_type}' does not parse: {source}")]
    InvalidJson {
        /// The type whose output failed to parse
        egil_type: String,
        /// The JSON parse error
        #[source]
        source: serde_json::Error,
    },

    /// A post-processing plugin reported an error
    #[error("post-processing plugin '{plugin}' failed: {message}")]
    Plugin {
        /// Name of the failing plugin
        plugin: String,
        /// Error text reported by the plugin
        message: String,
    },
}

/// A syntax or expansion error inside a JSON template.
#[derive(Debug, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct TemplateError {
    /// 1-based line in the template
    pub line: usize,
    /// 1-based column in the template
    pub column: usize,
    /// Description of the error
    pub message: String,
}

/// The per-type delta guard rejected a run.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    /// The absolute object-count delta is too large
    #[error(
        "threshold exceeded for {egil_type} (old count: {old_count}, new count: {new_count}, threshold: {threshold})"
    )]
    Absolute {
        /// The type whose delta tripped the guard
        egil_type: String,
        /// Count of cached objects of this type
        old_count: usize,
        /// Count of current objects of this type
        new_count: usize,
        /// Configured absolute limit
        threshold: i64,
    },

    /// The delta relative to the cached count is too large
    #[error(
        "threshold exceeded for {egil_type} (old count: {old_count}, new count: {new_count}, threshold (relative): {threshold}%)"
    )]
    Relative {
        /// The type whose delta tripped the guard
        egil_type: String,
        /// Count of cached objects of this type
        old_count: usize,
        /// Count of current objects of this type
        new_count: usize,
        /// Configured relative limit in percent of the cached count
        threshold: i64,
    },
}

/// Errors reading or writing the binary rendered-object cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The file does not start with the cache magic number
    #[error("not a cache file (bad magic number)")]
    BadFormat,

    /// The file was written by a newer version of this client
    #[error("cache file version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version byte found in the file
        found: u8,
        /// Highest version this build understands
        supported: u8,
    },

    /// The file ended in the middle of a record
    #[error("cache file is truncated")]
    Truncated,

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The SCIM channel is unusable.
///
/// Unlike per-operation failures this is fatal for the configuration file:
/// there is no point retrying object after object against a connection that
/// cannot be established.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Description of the channel failure
    pub message: String,
}

impl TransportError {
    /// Create a transport error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Create a missing-key error.
    pub fn missing_key(egil_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            egil_type: egil_type.into(),
            key: key.into(),
        }
    }

    /// Create a general validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl LoadError {
    /// Create a backend error.
    pub fn backend(egil_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            egil_type: egil_type.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-data error.
    pub fn malformed(egil_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            egil_type: egil_type.into(),
            message: message.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(egil_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            egil_type: egil_type.into(),
            message: message.into(),
        }
    }
}

// Result type aliases for convenience
pub type SyncResult<T> = Result<T, SyncError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RenderResult<T> = Result<T, RenderError>;
pub type CacheResult<T> = Result<T, CacheError>;
