//! The audit journal: one human-readable line per dispatched operation.
//!
//! Format:
//!
//! ```text
//! YYYY-MM-DD HH:MM:SS <verb> [(<failure-class>)] <type> <description>
//! ```
//!
//! The description is a best-effort friendly name extracted from the
//! rendered JSON, followed by the UUID; when nothing friendly can be found
//! the bare UUID stands alone.

use crate::model::RenderedObject;
use crate::scim::FailureClass;
use chrono::Local;
use log::warn;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// The three operation kinds the journal distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScimOperation {
    Create,
    Update,
    Delete,
}

fn verb(success: bool, operation: ScimOperation) -> &'static str {
    match (operation, success) {
        (ScimOperation::Create, true) => "Created",
        (ScimOperation::Create, false) => "Failed to create",
        (ScimOperation::Update, true) => "Updated",
        (ScimOperation::Update, false) => "Failed to update",
        (ScimOperation::Delete, true) => "Deleted",
        (ScimOperation::Delete, false) => "Failed to delete",
    }
}

/// Writes audit lines to a sink; a disabled logger swallows them.
pub struct AuditLogger {
    sink: Option<Box<dyn Write>>,
}

impl AuditLogger {
    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Append to a journal file, creating it if necessary.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Some(Box::new(file)),
        })
    }

    /// Write to an arbitrary sink.
    pub fn to_writer(writer: Box<dyn Write>) -> Self {
        Self { sink: Some(writer) }
    }

    /// Record one dispatched operation.
    ///
    /// `previous` is the cached rendering, `current` the fresh one; which of
    /// the two the description is based on depends on the operation.
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &mut self,
        success: bool,
        failure_class: FailureClass,
        operation: ScimOperation,
        egil_type: &str,
        uuid: &str,
        previous: Option<&RenderedObject>,
        current: Option<&RenderedObject>,
    ) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let message = operation_message(
            success,
            failure_class,
            operation,
            egil_type,
            uuid,
            previous,
            current,
        );
        if let Err(error) = writeln!(sink, "{timestamp} {message}") {
            warn!("failed to write audit record: {error}");
        }
    }
}

/// The audit line without its timestamp.
pub fn operation_message(
    success: bool,
    failure_class: FailureClass,
    operation: ScimOperation,
    egil_type: &str,
    uuid: &str,
    previous: Option<&RenderedObject>,
    current: Option<&RenderedObject>,
) -> String {
    let basis = match operation {
        ScimOperation::Create | ScimOperation::Update => current.or(previous),
        ScimOperation::Delete => previous,
    };
    let description = basis
        .map(object_description)
        .unwrap_or_else(|| uuid.to_string());

    let mut message = String::from(verb(success, operation));
    if failure_class != FailureClass::Other {
        message.push_str(&format!(" ({failure_class})"));
    }
    message.push(' ');
    message.push_str(egil_type);
    message.push(' ');
    message.push_str(&description);
    message
}

/// `<friendly-name> (<uuid>)` when a friendly name can be extracted from the
/// rendered JSON, the bare UUID otherwise.
///
/// Preference order: `userName`, then `displayName` (with `owner.value`
/// appended when present), then for Employments the `user.value` /
/// `employedAt.value` pair.
pub fn object_description(object: &RenderedObject) -> String {
    let uuid = object.id();
    let Ok(root) = serde_json::from_str::<Value>(object.json()) else {
        return uuid.to_string();
    };

    if let Some(user_name) = root.get("userName").and_then(Value::as_str) {
        return format!("{user_name} ({uuid})");
    }

    if let Some(display_name) = root.get("displayName").and_then(Value::as_str) {
        let mut friendly = display_name.to_string();
        if let Some(owner) = root.pointer("/owner/value").and_then(Value::as_str) {
            friendly.push_str(&format!(" owner: {owner}"));
        }
        return format!("{friendly} ({uuid})");
    }

    if object.egil_type() == "Employment" {
        let user = root.pointer("/user/value").and_then(Value::as_str);
        let employed_at = root.pointer("/employedAt/value").and_then(Value::as_str);
        if user.is_some() || employed_at.is_some() {
            let mut friendly = String::new();
            if let Some(user) = user {
                friendly.push_str(&format!("user: {user}"));
            }
            if let Some(employed_at) = employed_at {
                if !friendly.is_empty() {
                    friendly.push(' ');
                }
                friendly.push_str(&format!("employed at: {employed_at}"));
            }
            return format!("{friendly} ({uuid})");
        }
    }

    uuid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(id: &str, egil_type: &str, json: &str) -> RenderedObject {
        RenderedObject::new(id, egil_type, json)
    }

    #[test]
    fn test_description_prefers_user_name() {
        let object = rendered(
            "u1",
            "Student",
            r#"{"userName": "anna", "displayName": "Anna"}"#,
        );
        assert_eq!(object_description(&object), "anna (u1)");
    }

    #[test]
    fn test_description_display_name_with_owner() {
        let object = rendered(
            "g1",
            "StudentGroup",
            r#"{"displayName": "7a", "owner": {"value": "su1"}}"#,
        );
        assert_eq!(object_description(&object), "7a owner: su1 (g1)");
    }

    #[test]
    fn test_description_employment_pair() {
        let object = rendered(
            "e1",
            "Employment",
            r#"{"user": {"value": "u1"}, "employedAt": {"value": "su1"}}"#,
        );
        assert_eq!(
            object_description(&object),
            "user: u1 employed at: su1 (e1)"
        );
    }

    #[test]
    fn test_description_falls_back_to_uuid() {
        let object = rendered("x1", "SchoolUnit", r#"{"schoolUnitCode": "1010"}"#);
        assert_eq!(object_description(&object), "x1");

        let unparsable = rendered("x2", "SchoolUnit", "not json");
        assert_eq!(object_description(&unparsable), "x2");
    }

    #[test]
    fn test_message_success_has_no_failure_class() {
        let object = rendered("u1", "Student", r#"{"userName": "anna"}"#);
        let message = operation_message(
            true,
            FailureClass::Other,
            ScimOperation::Create,
            "Student",
            "u1",
            None,
            Some(&object),
        );
        assert_eq!(message, "Created Student anna (u1)");
    }

    #[test]
    fn test_message_failure_with_class() {
        let object = rendered("u1", "Student", r#"{"userName": "anna"}"#);
        let message = operation_message(
            false,
            FailureClass::Conflict,
            ScimOperation::Create,
            "Student",
            "u1",
            None,
            Some(&object),
        );
        assert_eq!(message, "Failed to create (conflict) Student anna (u1)");
    }

    #[test]
    fn test_message_other_failure_class_is_omitted() {
        let message = operation_message(
            false,
            FailureClass::Other,
            ScimOperation::Update,
            "Student",
            "u1",
            None,
            None,
        );
        assert_eq!(message, "Failed to update Student u1");
    }

    #[test]
    fn test_delete_describes_previous_rendering() {
        let previous = rendered("u1", "Student", r#"{"userName": "anna"}"#);
        let message = operation_message(
            true,
            FailureClass::Other,
            ScimOperation::Delete,
            "Student",
            "u1",
            Some(&previous),
            None,
        );
        assert_eq!(message, "Deleted Student anna (u1)");
    }

    #[test]
    fn test_logger_writes_lines() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Shared(Arc<Mutex<Vec<u8>>>);

        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Shared(Arc::new(Mutex::new(Vec::new())));
        let mut logger = AuditLogger::to_writer(Box::new(buffer.clone()));
        let object = rendered("u1", "Student", r#"{"userName": "anna"}"#);
        logger.log(
            true,
            FailureClass::Other,
            ScimOperation::Create,
            "Student",
            "u1",
            None,
            Some(&object),
        );

        let contents = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(contents.ends_with("Created Student anna (u1)\n"));
        // Leading timestamp: "YYYY-MM-DD HH:MM:SS ".
        assert_eq!(contents.split(' ').next().unwrap().len(), 10);
    }
}
