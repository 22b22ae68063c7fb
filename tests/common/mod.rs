//! Shared helpers for the integration tests.

use egil_scim_client::{
    CreateOutcome, DeleteOutcome, ScimDispatcher, TransportError, UpdateOutcome,
};
use std::collections::HashMap;

/// Records every dispatched operation and answers success unless a failure
/// status has been scripted for the object id.
///
/// Create bodies are expected to carry the id as `externalId` (the templates
/// in these tests do).
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: Vec<String>,
    pub create_failures: HashMap<String, u16>,
    pub update_failures: HashMap<String, u16>,
    pub delete_failures: HashMap<String, u16>,
    pub fail_transport: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    fn check_transport(&self) -> Result<(), TransportError> {
        if self.fail_transport {
            Err(TransportError::new("connection refused"))
        } else {
            Ok(())
        }
    }

    fn id_from_body(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("externalId")
                    .and_then(|id| id.as_str())
                    .map(String::from)
            })
            .unwrap_or_default()
    }
}

impl ScimDispatcher for RecordingDispatcher {
    fn create(&mut self, endpoint: &str, body: &str) -> Result<CreateOutcome, TransportError> {
        self.check_transport()?;
        let id = Self::id_from_body(body);
        self.calls.push(format!("create {endpoint} {id}"));
        Ok(match self.create_failures.get(&id) {
            Some(&409) => CreateOutcome::Conflict,
            Some(&status) => CreateOutcome::Other(status),
            None => CreateOutcome::Created(String::new()),
        })
    }

    fn update(
        &mut self,
        endpoint: &str,
        uid: &str,
        _body: &str,
    ) -> Result<UpdateOutcome, TransportError> {
        self.check_transport()?;
        self.calls.push(format!("update {endpoint} {uid}"));
        Ok(match self.update_failures.get(uid) {
            Some(&404) => UpdateOutcome::NotFound,
            Some(&status) => UpdateOutcome::Other(status),
            None => UpdateOutcome::Ok(String::new()),
        })
    }

    fn delete(&mut self, endpoint: &str, uid: &str) -> Result<DeleteOutcome, TransportError> {
        self.check_transport()?;
        self.calls.push(format!("delete {endpoint} {uid}"));
        Ok(match self.delete_failures.get(uid) {
            Some(&404) => DeleteOutcome::NotFound,
            Some(&status) => DeleteOutcome::Other(status),
            None => DeleteOutcome::NoContent,
        })
    }
}
