//! Loaded objects and the per-run object store.

use std::collections::BTreeMap;

/// An object as produced by a source backend.
///
/// Attributes map a case-sensitive name to an ordered sequence of string
/// values. Duplicates are permitted; an empty sequence reads the same as an
/// absent attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedObject {
    egil_type: String,
    attributes: BTreeMap<String, Vec<String>>,
}

impl LoadedObject {
    /// Create an empty object of the given type.
    pub fn new(egil_type: impl Into<String>) -> Self {
        Self {
            egil_type: egil_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The EGIL type tag (`Student`, `StudentGroup`, `Employment`, ...).
    pub fn egil_type(&self) -> &str {
        &self.egil_type
    }

    /// All values of an attribute; empty slice if the attribute is absent.
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The first value of an attribute, if any.
    pub fn first_value(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }

    /// The unique identifier, read from the configured UID attribute.
    ///
    /// Objects without exactly one value here are dropped before rendering;
    /// when more than one value is present the first wins.
    pub fn uid(&self, uid_attribute: &str) -> Option<&str> {
        self.first_value(uid_attribute)
    }

    /// Replace the values of an attribute.
    pub fn set_attribute(&mut self, attribute: impl Into<String>, values: Vec<String>) {
        self.attributes.insert(attribute.into(), values);
    }

    /// Append values to an attribute, creating it if necessary.
    pub fn append_values(&mut self, attribute: &str, values: impl IntoIterator<Item = String>) {
        self.attributes
            .entry(attribute.to_string())
            .or_default()
            .extend(values);
    }

    /// Append values, skipping ones the attribute already holds.
    pub fn append_values_unique(
        &mut self,
        attribute: &str,
        values: impl IntoIterator<Item = String>,
    ) {
        let existing = self.attributes.entry(attribute.to_string()).or_default();
        for value in values {
            if !existing.contains(&value) {
                existing.push(value);
            }
        }
    }

    /// Whether the attribute holds the given value.
    pub fn has_value(&self, attribute: &str, value: &str) -> bool {
        self.values(attribute).iter().any(|v| v == value)
    }

    /// Iterate over `(attribute, values)` pairs in attribute-name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

/// Objects of one type, keyed by UID.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    objects: BTreeMap<String, LoadedObject>,
}

impl ObjectList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, replacing any previous object with the same UID.
    pub fn insert(&mut self, uid: impl Into<String>, object: LoadedObject) {
        self.objects.insert(uid.into(), object);
    }

    /// Look up an object by UID.
    pub fn get(&self, uid: &str) -> Option<&LoadedObject> {
        self.objects.get(uid)
    }

    /// Mutable lookup by UID.
    pub fn get_mut(&mut self, uid: &str) -> Option<&mut LoadedObject> {
        self.objects.get_mut(uid)
    }

    /// Find the first object whose attribute holds the given value.
    pub fn find_by_attribute(&self, attribute: &str, value: &str) -> Option<&LoadedObject> {
        self.objects
            .values()
            .find(|object| object.has_value(attribute, value))
    }

    /// Iterate over `(uid, object)` pairs in UID order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoadedObject)> {
        self.objects
            .iter()
            .map(|(uid, object)| (uid.as_str(), object))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// All loaded objects of a run, indexed by type.
///
/// Objects reference each other by UUID only; the store is the arena those
/// references resolve against.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    by_type: BTreeMap<String, ObjectList>,
}

impl ObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a list of objects into a type, replacing duplicates by UID.
    pub fn add_all(&mut self, egil_type: &str, list: ObjectList) {
        let target = self.by_type.entry(egil_type.to_string()).or_default();
        for (uid, object) in list.objects {
            target.objects.insert(uid, object);
        }
    }

    /// Insert a single object under a type.
    pub fn insert(&mut self, egil_type: &str, uid: impl Into<String>, object: LoadedObject) {
        self.by_type
            .entry(egil_type.to_string())
            .or_default()
            .insert(uid, object);
    }

    /// All objects of a type, if any were loaded.
    pub fn get_type(&self, egil_type: &str) -> Option<&ObjectList> {
        self.by_type.get(egil_type)
    }

    /// Mutable access to a type's list.
    pub fn get_type_mut(&mut self, egil_type: &str) -> Option<&mut ObjectList> {
        self.by_type.get_mut(egil_type)
    }

    /// Find an object of a type by an arbitrary attribute value.
    pub fn find_by_attribute(
        &self,
        egil_type: &str,
        attribute: &str,
        value: &str,
    ) -> Option<&LoadedObject> {
        self.by_type
            .get(egil_type)?
            .find_by_attribute(attribute, value)
    }

    /// Whether any object of the type holds the attribute value.
    pub fn contains_attribute_value(&self, egil_type: &str, attribute: &str, value: &str) -> bool {
        self.find_by_attribute(egil_type, attribute, value).is_some()
    }

    /// The types currently present in the store.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.values().all(ObjectList::is_empty)
    }
}
