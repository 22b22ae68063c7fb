//! Rendered objects and the id-indexed list the engine diffs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An object after template expansion and post-processing.
///
/// Equality is byte-for-byte over all three fields; any change in the
/// rendered JSON, however cosmetic, makes two rendered objects unequal and
/// therefore triggers an update during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedObject {
    id: String,
    egil_type: String,
    json: String,
}

impl RenderedObject {
    /// Wrap an id, type and rendered JSON body.
    pub fn new(
        id: impl Into<String>,
        egil_type: impl Into<String>,
        json: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            egil_type: egil_type.into(),
            json: json.into(),
        }
    }

    /// The UID of the source object, verbatim.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The EGIL type tag.
    pub fn egil_type(&self) -> &str {
        &self.egil_type
    }

    /// The SCIM representation as a UTF-8 JSON string.
    pub fn json(&self) -> &str {
        &self.json
    }
}

/// An insertion-ordered list of rendered objects with O(1) lookup by id.
///
/// Ids are unique within a list; inserting an existing id replaces the
/// previous object in place, keeping its position.
#[derive(Debug, Clone, Default)]
pub struct RenderedObjectList {
    objects: Vec<RenderedObject>,
    index: HashMap<String, usize>,
}

impl RenderedObjectList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, replacing any existing object with the same id.
    pub fn add(&mut self, object: RenderedObject) {
        match self.index.get(object.id()) {
            Some(&position) => self.objects[position] = object,
            None => {
                self.index.insert(object.id().to_string(), self.objects.len());
                self.objects.push(object);
            }
        }
    }

    /// Look up an object by id.
    pub fn get(&self, id: &str) -> Option<&RenderedObject> {
        self.index.get(id).map(|&position| &self.objects[position])
    }

    /// Whether the list holds an object with the given id.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderedObject> {
        self.objects.iter()
    }

    /// Iterate over the objects of one type, in insertion order.
    pub fn iter_of_type<'a>(
        &'a self,
        egil_type: &'a str,
    ) -> impl Iterator<Item = &'a RenderedObject> {
        self.objects
            .iter()
            .filter(move |object| object.egil_type() == egil_type)
    }

    /// Count the objects of one type.
    pub fn count_of_type(&self, egil_type: &str) -> usize {
        self.iter_of_type(egil_type).count()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl FromIterator<RenderedObject> for RenderedObjectList {
    fn from_iter<I: IntoIterator<Item = RenderedObject>>(iter: I) -> Self {
        let mut list = Self::new();
        for object in iter {
            list.add(object);
        }
        list
    }
}

impl PartialEq for RenderedObjectList {
    fn eq(&self, other: &Self) -> bool {
        self.objects == other.objects
    }
}

impl Eq for RenderedObjectList {}
