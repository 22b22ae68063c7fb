//! The SCIM operation dispatcher.
//!
//! The reconciliation engine does not speak HTTP; it hands each operation to
//! a [`ScimDispatcher`] and acts on the typed outcome. [`http`] provides the
//! production implementation over a client-certificate TLS channel.
//!
//! [`ScimDispatcher`]: dispatcher::ScimDispatcher

pub mod dispatcher;
pub mod http;

pub use dispatcher::{
    CreateOutcome, DeleteOutcome, FailureClass, ScimDispatcher, UpdateOutcome,
};
pub use http::HttpDispatcher;
