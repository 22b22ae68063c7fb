//! Core data model.
//!
//! Two object shapes flow through a run:
//!
//! - [`LoadedObject`]: an attribute multimap straight from a source backend
//!   (or from the relation generator). Lives only for the duration of a run.
//! - [`RenderedObject`]: the JSON form after template expansion and
//!   post-processing. This is the unit of cache persistence and SCIM traffic.
//!
//! [`LoadedObject`]: loaded::LoadedObject
//! [`RenderedObject`]: rendered::RenderedObject

pub mod loaded;
pub mod rendered;

pub use loaded::{LoadedObject, ObjectList, ObjectStore};
pub use rendered::{RenderedObject, RenderedObjectList};
