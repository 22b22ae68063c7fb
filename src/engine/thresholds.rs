//! The per-type delta guard.
//!
//! Runs after rendering and before any SCIM operation is dispatched: a sync
//! whose per-type object count swings more than the configured limits is
//! rejected wholesale, leaving the cache untouched. This is the safety net
//! against a half-broken source backend deleting a school's worth of users.

use crate::config::AppConfig;
use crate::error::ThresholdError;
use crate::model::RenderedObjectList;

/// Check every type in the send order against its thresholds.
pub fn verify(
    cached: &RenderedObjectList,
    current: &RenderedObjectList,
    config: &AppConfig,
) -> Result<(), ThresholdError> {
    for egil_type in &config.scim_type_send_order {
        verify_for_type(
            egil_type,
            cached.count_of_type(egil_type),
            current.count_of_type(egil_type),
            config.absolute_threshold(egil_type),
            config.relative_threshold(egil_type),
        )?;
    }
    Ok(())
}

fn verify_for_type(
    egil_type: &str,
    old_count: usize,
    new_count: usize,
    absolute: Option<i64>,
    relative: Option<i64>,
) -> Result<(), ThresholdError> {
    if absolute.is_none() && relative.is_none() {
        return Ok(());
    }

    let delta = old_count.abs_diff(new_count);

    if let Some(threshold) = absolute {
        if delta as i64 > threshold {
            return Err(ThresholdError::Absolute {
                egil_type: egil_type.to_string(),
                old_count,
                new_count,
                threshold,
            });
        }
    }

    if let Some(threshold) = relative {
        if delta as f64 > threshold as f64 * 0.01 * old_count as f64 {
            return Err(ThresholdError::Relative {
                egil_type: egil_type.to_string(),
                old_count,
                new_count,
                threshold,
            });
        }
    }

    Ok(())
}
