//! Diff-and-dispatch: converge the SCIM server on the freshly rendered set.
//!
//! For each type in the configured send order, every current object is
//! compared byte-for-byte against its cached rendering: equal objects are
//! copied into the new cache without traffic, changed objects are updated,
//! unknown objects are created, and cached objects of the type that are
//! gone from the current set are deleted.
//!
//! Per-object failures never abort the run. What a failure means for the new
//! cache differs per operation:
//!
//! - a failed create is left out, so the next run retries it;
//! - a failed update still records the fresh rendering, so the engine's
//!   notion of "last seen" is what it tried to send, not what succeeded;
//! - a failed delete keeps the cached record, so the delete is retried
//!   (a 404 counts as success, the object is already gone).
//!
//! The new cache therefore reflects exactly which objects are believed to
//! exist on the server when the run ends, and partial progress survives into
//! the next run.

use crate::config::AppConfig;
use crate::engine::audit::{AuditLogger, ScimOperation};
use crate::error::{SyncError, SyncResult};
use crate::model::{RenderedObject, RenderedObjectList};
use crate::scim::{FailureClass, ScimDispatcher};
use log::{error, info, warn};
use std::collections::HashSet;

/// Knobs the CLI exposes.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Send every current object as a create and drop cached-only objects
    /// silently; used to rebuild a lost cache from the server's perspective.
    pub rebuild_cache: bool,
}

/// Success/failure counters for one type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeStatistics {
    pub copies: usize,
    pub copy_failures: usize,
    pub creates: usize,
    pub create_failures: usize,
    pub updates: usize,
    pub update_failures: usize,
    pub deletes: usize,
    pub delete_failures: usize,
}

impl TypeStatistics {
    fn log(&self, egil_type: &str) {
        info!("status for type {egil_type}: success / failure / total");
        info!(
            "  copy:   {:>7} {:>7} {:>7}",
            self.copies - self.copy_failures,
            self.copy_failures,
            self.copies
        );
        info!(
            "  create: {:>7} {:>7} {:>7}",
            self.creates - self.create_failures,
            self.create_failures,
            self.creates
        );
        info!(
            "  update: {:>7} {:>7} {:>7}",
            self.updates - self.update_failures,
            self.update_failures,
            self.updates
        );
        info!(
            "  delete: {:>7} {:>7} {:>7}",
            self.deletes - self.delete_failures,
            self.delete_failures,
            self.deletes
        );
    }
}

/// What a reconciliation produced.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// The list to persist as the new cache
    pub new_cache: RenderedObjectList,
    /// Counters per type, in send order
    pub statistics: Vec<(String, TypeStatistics)>,
}

/// Operation counts for a dry run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannedOperations {
    pub copies: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

/// Compute what a run would dispatch, without dispatching anything.
pub fn plan(
    current: &RenderedObjectList,
    cached: &RenderedObjectList,
    config: &AppConfig,
    options: &ReconcileOptions,
) -> Vec<(String, PlannedOperations)> {
    let mut planned = Vec::new();
    for egil_type in &config.scim_type_send_order {
        let mut operations = PlannedOperations::default();
        for object in current.iter_of_type(egil_type) {
            if options.rebuild_cache {
                operations.creates += 1;
            } else {
                match cached.get(object.id()) {
                    None => operations.creates += 1,
                    Some(cached_object) if cached_object == object => operations.copies += 1,
                    Some(_) => operations.updates += 1,
                }
            }
        }
        if !options.rebuild_cache {
            for cached_object in cached.iter_of_type(egil_type) {
                if !current.contains(cached_object.id()) {
                    operations.deletes += 1;
                }
            }
        }
        planned.push((egil_type.clone(), operations));
    }
    planned
}

/// Run the reconciliation.
///
/// `render_failures` holds the UIDs of objects that failed to render this
/// run; their cached renderings are carried over untouched instead of being
/// deleted from the server.
pub fn reconcile(
    current: &RenderedObjectList,
    cached: &RenderedObjectList,
    config: &AppConfig,
    dispatcher: &mut dyn ScimDispatcher,
    audit: &mut AuditLogger,
    render_failures: &HashSet<String>,
    options: &ReconcileOptions,
) -> SyncResult<ReconcileOutcome> {
    let mut new_cache = RenderedObjectList::new();
    let mut statistics = Vec::new();

    let send_order: HashSet<&str> = config
        .scim_type_send_order
        .iter()
        .map(String::as_str)
        .collect();

    // Types outside the send order are never reconciled; their cached
    // objects survive verbatim. A rebuild starts from a clean slate instead.
    if !options.rebuild_cache {
        for object in cached.iter() {
            if !send_order.contains(object.egil_type()) {
                new_cache.add(object.clone());
            }
        }
    }

    for egil_type in &config.scim_type_send_order {
        let endpoint = config.endpoint(egil_type)?;
        let mut stats = TypeStatistics::default();

        for object in current.iter_of_type(egil_type) {
            let cached_object = if options.rebuild_cache {
                None
            } else {
                cached.get(object.id())
            };

            match cached_object {
                None => {
                    create_object(
                        dispatcher, audit, endpoint, egil_type, object, &mut new_cache, &mut stats,
                    )?;
                }
                Some(cached_object) if cached_object == object => {
                    stats.copies += 1;
                    new_cache.add(cached_object.clone());
                }
                Some(cached_object) => {
                    update_object(
                        dispatcher,
                        audit,
                        endpoint,
                        egil_type,
                        object,
                        cached_object,
                        &mut new_cache,
                        &mut stats,
                    )?;
                }
            }
        }

        if !options.rebuild_cache {
            for cached_object in cached.iter_of_type(egil_type) {
                if current.contains(cached_object.id()) {
                    continue;
                }
                if render_failures.contains(cached_object.id()) {
                    // Not currently renderable; keep the last good rendering
                    // rather than deleting a live object.
                    new_cache.add(cached_object.clone());
                    continue;
                }
                delete_object(
                    dispatcher,
                    audit,
                    endpoint,
                    egil_type,
                    cached_object,
                    &mut new_cache,
                    &mut stats,
                )?;
            }
        }

        stats.log(egil_type);
        statistics.push((egil_type.clone(), stats));
    }

    Ok(ReconcileOutcome {
        new_cache,
        statistics,
    })
}

#[allow(clippy::too_many_arguments)]
fn create_object(
    dispatcher: &mut dyn ScimDispatcher,
    audit: &mut AuditLogger,
    endpoint: &str,
    egil_type: &str,
    object: &RenderedObject,
    new_cache: &mut RenderedObjectList,
    stats: &mut TypeStatistics,
) -> Result<(), SyncError> {
    stats.creates += 1;
    let outcome = dispatcher.create(endpoint, object.json())?;

    if outcome.is_success() {
        audit.log(
            true,
            FailureClass::Other,
            ScimOperation::Create,
            egil_type,
            object.id(),
            None,
            Some(object),
        );
        new_cache.add(object.clone());
    } else {
        stats.create_failures += 1;
        let class = outcome.failure_class();
        error!("failed to create {egil_type} {} ({class})", object.id());
        audit.log(
            false,
            class,
            ScimOperation::Create,
            egil_type,
            object.id(),
            None,
            Some(object),
        );
        // Left out of the new cache: the next run retries the create.
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn update_object(
    dispatcher: &mut dyn ScimDispatcher,
    audit: &mut AuditLogger,
    endpoint: &str,
    egil_type: &str,
    object: &RenderedObject,
    cached_object: &RenderedObject,
    new_cache: &mut RenderedObjectList,
    stats: &mut TypeStatistics,
) -> Result<(), SyncError> {
    stats.updates += 1;
    let outcome = dispatcher.update(endpoint, object.id(), object.json())?;

    let success = outcome.is_success();
    if !success {
        stats.update_failures += 1;
        let class = outcome.failure_class();
        error!("failed to update {egil_type} {} ({class})", object.id());
        audit.log(
            false,
            class,
            ScimOperation::Update,
            egil_type,
            object.id(),
            Some(cached_object),
            Some(object),
        );
    } else {
        audit.log(
            true,
            FailureClass::Other,
            ScimOperation::Update,
            egil_type,
            object.id(),
            Some(cached_object),
            Some(object),
        );
    }

    // The fresh rendering enters the cache either way; retrying a body the
    // server keeps rejecting would wedge the sync on one object.
    new_cache.add(object.clone());
    Ok(())
}

fn delete_object(
    dispatcher: &mut dyn ScimDispatcher,
    audit: &mut AuditLogger,
    endpoint: &str,
    egil_type: &str,
    cached_object: &RenderedObject,
    new_cache: &mut RenderedObjectList,
    stats: &mut TypeStatistics,
) -> Result<(), SyncError> {
    stats.deletes += 1;
    let outcome = dispatcher.delete(endpoint, cached_object.id())?;

    if outcome.is_success() {
        audit.log(
            true,
            FailureClass::Other,
            ScimOperation::Delete,
            egil_type,
            cached_object.id(),
            Some(cached_object),
            None,
        );
    } else {
        stats.delete_failures += 1;
        let class = outcome.failure_class();
        warn!(
            "failed to delete {egil_type} {} ({class}); keeping it cached for retry",
            cached_object.id()
        );
        audit.log(
            false,
            class,
            ScimOperation::Delete,
            egil_type,
            cached_object.id(),
            Some(cached_object),
            None,
        );
        new_cache.add(cached_object.clone());
    }
    Ok(())
}
