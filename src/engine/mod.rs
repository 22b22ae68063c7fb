//! The reconciliation engine.
//!
//! [`reconcile`] diffs the freshly rendered object set against the cached
//! set and dispatches the minimum SCIM operations to converge the server,
//! [`thresholds`] gates the dispatch on per-type delta limits, and [`audit`]
//! journals every dispatched operation.

pub mod audit;
pub mod reconcile;
pub mod thresholds;

pub use audit::{AuditLogger, ScimOperation};
pub use reconcile::{ReconcileOptions, ReconcileOutcome, TypeStatistics};
