//! # EGIL SCIM client
//!
//! A provisioning client that keeps a SCIM server in sync with an upstream
//! source of school-domain records (students, teachers, groups, school
//! units, employments, activities).
//!
//! Each run loads a tree of related objects from a source backend, derives
//! and synthesises what the source does not carry (relation objects with
//! deterministic UUIDs), renders every object through a per-type JSON
//! template, and then diffs the result against a persisted cache of the
//! previously sent renderings. Only the differences travel: unchanged
//! objects cost no traffic, new objects are created, changed ones updated,
//! vanished ones deleted. The cache is replaced atomically at the end of a
//! successful run, so partial progress (including per-object failures)
//! survives into the next run.
//!
//! ## Highlights
//!
//! - Byte-for-byte diffing of rendered JSON against a versioned binary cache
//! - Deterministic version-5 UUIDs for synthesised relation objects
//! - Per-type delta thresholds that veto runaway syncs before any traffic
//! - Per-operation audit journal with human-readable object descriptions
//! - Best-effort cross-process cache lock with atomic-rename safety net
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use egil_scim_client::{run_config_file, RunOptions};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = RunOptions::default();
//!     run_config_file(Path::new("municipality.toml"), &options)?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod generate;
pub mod load;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod scim;
pub mod uuid_factory;

// Core re-exports for library users
pub use config::AppConfig;
pub use engine::audit::AuditLogger;
pub use engine::reconcile::{ReconcileOptions, ReconcileOutcome, TypeStatistics};
pub use error::{
    CacheError, ConfigError, LoadError, RenderError, SyncError, SyncResult, ThresholdError,
    TransportError,
};
pub use load::{JsonFileLoader, ObjectLoader};
pub use model::{LoadedObject, ObjectStore, RenderedObject, RenderedObjectList};
pub use orchestrator::{run_config_file, run_with, RunOptions};
pub use render::{resolve_plugins, PluginDisposition, PostProcessor, Renderer};
pub use scim::{
    CreateOutcome, DeleteOutcome, FailureClass, HttpDispatcher, ScimDispatcher, UpdateOutcome,
};
pub use uuid_factory::{derive_relation_uuid, derive_uuid};
