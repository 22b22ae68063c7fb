//! One sync run per configuration file.
//!
//! The sequence is strictly: load → transform/limit/generate → render →
//! (under the cache lock) read cache → threshold guard → reconcile → write
//! cache. A threshold violation or transport failure aborts the run with the
//! cache untouched; per-object failures are contained by the engine.

use crate::cache::codec;
use crate::cache::AdvisoryFileLock;
use crate::config::AppConfig;
use crate::engine::audit::AuditLogger;
use crate::engine::reconcile::{self, ReconcileOptions};
use crate::engine::thresholds;
use crate::error::{ConfigError, SyncError, SyncResult};
use crate::load::{self, JsonFileLoader, ObjectLoader};
use crate::model::{ObjectStore, RenderedObjectList};
use crate::render::plugin::resolve_plugins;
use crate::render::Renderer;
use crate::scim::{HttpDispatcher, ScimDispatcher};
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;

/// Options from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Send every current object as a create and rebuild the cache
    pub rebuild_cache: bool,
    /// Types excluded from loading
    pub skip_types: Vec<String>,
    /// Stop before dispatching any SCIM operation
    pub dry_run: bool,
}

/// Run one configuration file end to end.
pub fn run_config_file(path: &Path, options: &RunOptions) -> SyncResult<()> {
    let config = AppConfig::load(path)?;

    let data_source = config
        .data_source_file
        .clone()
        .ok_or_else(|| ConfigError::invalid("data-source-file is required"))?;
    let mut loader = JsonFileLoader::open(&config.resolve_path(&data_source))?;

    let plugins = resolve_plugins(&config.plugins)?;
    let mut renderer = Renderer::new(config.escape_template_values, plugins);

    if options.dry_run {
        return dry_run(&config, &mut loader, &mut renderer, options);
    }

    let mut dispatcher = HttpDispatcher::open(&config)?;
    let mut audit = open_audit(&config)?;

    run_with(
        &config,
        &mut loader,
        &mut renderer,
        &mut dispatcher,
        &mut audit,
        options,
    )
}

fn open_audit(config: &AppConfig) -> SyncResult<AuditLogger> {
    match &config.audit_log_file {
        Some(path) => {
            let path = config.resolve_path(path);
            AuditLogger::open(&path).map_err(|error| {
                SyncError::Config(ConfigError::invalid(format!(
                    "failed to open audit log {}: {error}",
                    path.display()
                )))
            })
        }
        None => Ok(AuditLogger::disabled()),
    }
}

/// The run proper, with every collaborator injected; this is the seam the
/// integration tests drive.
pub fn run_with(
    config: &AppConfig,
    loader: &mut dyn ObjectLoader,
    renderer: &mut Renderer,
    dispatcher: &mut dyn ScimDispatcher,
    audit: &mut AuditLogger,
    options: &RunOptions,
) -> SyncResult<()> {
    let store = load::load_all(config, loader, &options.skip_types)?;
    let (current, render_failures) = render_all(config, &store, renderer)?;

    let cache_path = config.resolve_path(&config.cache_file);
    let _lock = AdvisoryFileLock::acquire(&cache_path, config.lock_timeout());

    let cached = codec::read(&cache_path)?;
    thresholds::verify(&cached, &current, config)?;

    // Reserve the worst case up front so a full disk fails the run before
    // any SCIM traffic, not after.
    let estimate = codec::size_estimate(&current, &cached);

    let reconcile_options = ReconcileOptions {
        rebuild_cache: options.rebuild_cache,
    };
    let outcome = reconcile::reconcile(
        &current,
        &cached,
        config,
        dispatcher,
        audit,
        &render_failures,
        &reconcile_options,
    )?;

    codec::write(&cache_path, &outcome.new_cache, estimate)?;
    info!(
        "cache now holds {} objects ({} before)",
        outcome.new_cache.len(),
        cached.len()
    );
    Ok(())
}

/// `--test`: everything up to and including the threshold guard, then a
/// report of what would be dispatched. No SCIM traffic, no cache rewrite.
fn dry_run(
    config: &AppConfig,
    loader: &mut dyn ObjectLoader,
    renderer: &mut Renderer,
    options: &RunOptions,
) -> SyncResult<()> {
    let store = load::load_all(config, loader, &options.skip_types)?;
    let (current, _) = render_all(config, &store, renderer)?;

    let cache_path = config.resolve_path(&config.cache_file);
    let _lock = AdvisoryFileLock::acquire(&cache_path, config.lock_timeout());

    let cached = codec::read(&cache_path)?;
    thresholds::verify(&cached, &current, config)?;

    let reconcile_options = ReconcileOptions {
        rebuild_cache: options.rebuild_cache,
    };
    for (egil_type, operations) in reconcile::plan(&current, &cached, config, &reconcile_options) {
        info!(
            "{egil_type}: would copy {}, create {}, update {}, delete {}",
            operations.copies, operations.creates, operations.updates, operations.deletes
        );
    }
    Ok(())
}

/// Render every loaded object of the send-order types.
///
/// Returns the current rendered list plus the UIDs of objects that could not
/// be rendered (or were blocked by a plugin); the engine keeps their cached
/// renderings instead of deleting live objects.
pub fn render_all(
    config: &AppConfig,
    store: &ObjectStore,
    renderer: &mut Renderer,
) -> SyncResult<(RenderedObjectList, HashSet<String>)> {
    let mut current = RenderedObjectList::new();
    let mut failures = HashSet::new();

    for egil_type in &config.scim_type_send_order {
        let Some(objects) = store.get_type(egil_type) else {
            continue;
        };
        let uid_attribute = config.unique_identifier(egil_type)?;
        let template = config.template(egil_type)?;
        let standard_type = config.standard_type(egil_type);

        for (uid, object) in objects.iter() {
            match renderer.render(object, uid, template, &standard_type) {
                Ok(Some(rendered)) => current.add(rendered),
                Ok(None) => {
                    // Blocked by a plugin: neither sent nor deleted.
                    failures.insert(uid.to_string());
                }
                Err(error) => {
                    warn!("{error}; keeping the cached rendering of {uid} if any");
                    failures.insert(uid.to_string());
                }
            }
        }
    }
    Ok((current, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoadedObject;
    use std::path::PathBuf;

    fn config() -> AppConfig {
        AppConfig::parse(
            r#"
                scim-url = "https://scim.example.com"
                cache-file = "cache.bin"
                scim-type-send-order = ["Student"]

                [types.Student]
                unique-identifier = "GUID"
                scim-url-endpoint = "Users"
                scim-json-template = '{"userName": "${userName}"}'
            "#,
            PathBuf::from("."),
        )
        .unwrap()
    }

    fn store_with(students: &[(&str, &str)]) -> ObjectStore {
        let mut store = ObjectStore::new();
        for (uid, name) in students {
            let mut object = LoadedObject::new("Student");
            object.set_attribute("GUID", vec![uid.to_string()]);
            object.set_attribute("userName", vec![name.to_string()]);
            store.insert("Student", *uid, object);
        }
        store
    }

    #[test]
    fn test_render_all_renders_send_order_types() {
        let config = config();
        let store = store_with(&[("u1", "anna"), ("u2", "berit")]);
        let mut renderer = Renderer::new(true, Vec::new());

        let (current, failures) = render_all(&config, &store, &mut renderer).unwrap();

        assert_eq!(current.len(), 2);
        assert!(failures.is_empty());
        assert_eq!(
            current.get("u1").unwrap().json(),
            r#"{"userName": "anna"}"#
        );
    }

    #[test]
    fn test_render_all_skips_types_not_in_store() {
        let config = config();
        let store = ObjectStore::new();
        let mut renderer = Renderer::new(true, Vec::new());

        let (current, failures) = render_all(&config, &store, &mut renderer).unwrap();
        assert!(current.is_empty());
        assert!(failures.is_empty());
    }
}
