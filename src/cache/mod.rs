//! The persisted rendered-object cache.
//!
//! One binary file on disk holds the list of rendered objects most recently
//! confirmed-sent to the SCIM server. [`codec`] implements the versioned file
//! format and the atomic replace protocol; [`lock`] provides the best-effort
//! cross-process lock held around read-reconcile-replace.

pub mod codec;
pub mod lock;

pub use lock::AdvisoryFileLock;
