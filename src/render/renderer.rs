//! The renderer: one loaded object in, one rendered object out.

use crate::error::{RenderError, RenderResult};
use crate::model::{LoadedObject, RenderedObject};
use crate::render::plugin::{process_pipeline, PostProcessor};
use crate::render::template;
use std::collections::HashSet;

/// Renders loaded objects to their SCIM JSON form.
///
/// The renderer owns the post-processing pipeline and the per-type JSON
/// validation memo: a type whose expanded template has parsed once is not
/// re-parsed for every object of that type.
pub struct Renderer {
    escape_by_default: bool,
    plugins: Vec<Box<dyn PostProcessor>>,
    verified_types: HashSet<String>,
}

impl Renderer {
    /// Create a renderer.
    ///
    /// `escape_by_default` is the global flag controlling what bare
    /// `${name}` replacements do (see the template module).
    pub fn new(escape_by_default: bool, plugins: Vec<Box<dyn PostProcessor>>) -> Self {
        Self {
            escape_by_default,
            plugins,
            verified_types: HashSet::new(),
        }
    }

    /// Render one object.
    ///
    /// `standard_type` is the endpoint type used for plugin classification
    /// (`User` for Students and Teachers). Returns `Ok(None)` when a plugin
    /// blocks the type.
    pub fn render(
        &mut self,
        object: &LoadedObject,
        uid: &str,
        template_text: &str,
        standard_type: &str,
    ) -> RenderResult<Option<RenderedObject>> {
        let egil_type = object.egil_type();

        let expanded = template::expand(template_text, object, self.escape_by_default).map_err(
            |source| RenderError::Template {
                egil_type: egil_type.to_string(),
                source,
            },
        )?;

        self.verify_json(&expanded, egil_type)?;

        let processed = process_pipeline(&self.plugins, standard_type, expanded)?;
        Ok(processed.map(|json| RenderedObject::new(uid, egil_type, json)))
    }

    /// Parse the expanded JSON once per type; success is memoised.
    fn verify_json(&mut self, json: &str, egil_type: &str) -> RenderResult<()> {
        if self.verified_types.contains(egil_type) {
            return Ok(());
        }
        serde_json::from_str::<serde_json::Value>(json).map_err(|source| {
            RenderError::InvalidJson {
                egil_type: egil_type.to_string(),
                source,
            }
        })?;
        self.verified_types.insert(egil_type.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::plugin::PluginDisposition;

    fn student(name: &str) -> LoadedObject {
        let mut object = LoadedObject::new("Student");
        object.set_attribute("GUID", vec!["u1".to_string()]);
        object.set_attribute("userName", vec![name.to_string()]);
        object
    }

    #[test]
    fn test_render_produces_rendered_object() {
        let mut renderer = Renderer::new(true, Vec::new());
        let rendered = renderer
            .render(
                &student("anna"),
                "u1",
                r#"{"userName": "${userName}"}"#,
                "User",
            )
            .unwrap()
            .unwrap();

        assert_eq!(rendered.id(), "u1");
        assert_eq!(rendered.egil_type(), "Student");
        assert_eq!(rendered.json(), r#"{"userName": "anna"}"#);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut renderer = Renderer::new(true, Vec::new());
        let error = renderer
            .render(&student("anna"), "u1", r#"{"unterminated": "#, "User")
            .unwrap_err();
        assert!(matches!(error, RenderError::InvalidJson { .. }));
    }

    #[test]
    fn test_json_validation_is_memoised_per_type() {
        let mut renderer = Renderer::new(true, Vec::new());

        renderer
            .render(&student("anna"), "u1", r#"{"ok": true}"#, "User")
            .unwrap();

        // Same type: validation skipped, so even a non-JSON expansion passes.
        let rendered = renderer
            .render(&student("berit"), "u2", "not json at all", "User")
            .unwrap();
        assert!(rendered.is_some());
    }

    #[derive(Debug)]
    struct BlockUsers;

    impl PostProcessor for BlockUsers {
        fn name(&self) -> &str {
            "block-users"
        }

        fn classify(&self, scim_type: &str) -> PluginDisposition {
            if scim_type == "User" {
                PluginDisposition::Block
            } else {
                PluginDisposition::Skip
            }
        }

        fn process(&self, _scim_type: &str, json: &str) -> Result<String, String> {
            Ok(json.to_string())
        }
    }

    #[test]
    fn test_blocked_type_renders_to_none() {
        let mut renderer = Renderer::new(true, vec![Box::new(BlockUsers)]);
        let rendered = renderer
            .render(&student("anna"), "u1", "{}", "User")
            .unwrap();
        assert!(rendered.is_none());

        let rendered = renderer
            .render(&student("anna"), "u1", "{}", "SchoolUnit")
            .unwrap();
        assert!(rendered.is_some());
    }

    #[test]
    fn test_classification_uses_standard_type() {
        // A Student renders under the User endpoint type; the blocking
        // plugin above must see "User", not "Student".
        let mut renderer = Renderer::new(true, vec![Box::new(BlockUsers)]);
        let rendered = renderer
            .render(&student("anna"), "u1", "{}", "User")
            .unwrap();
        assert!(rendered.is_none());
    }
}
