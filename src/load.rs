//! Loading: source backends, the load order, and the pre-render pipeline.
//!
//! Backends are behind the [`ObjectLoader`] seam; the engine only cares
//! about the object stream they produce. Each type in the load order is
//! either loaded through the seam or synthesised by the relation generator,
//! then transformed, limited, checked for a UID and put into the run's
//! object store. Types may declare remote relations, which are resolved by
//! loading the referenced objects on demand.

use crate::config::AppConfig;
use crate::error::{LoadError, SyncError, SyncResult};
use crate::filter::{LoadLimiter, Transformer};
use crate::generate;
use crate::model::{LoadedObject, ObjectList, ObjectStore};
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A source backend: produces loaded objects for the engine.
pub trait ObjectLoader {
    /// Load every object of a type.
    fn load_type(&mut self, egil_type: &str) -> Result<Vec<LoadedObject>, LoadError>;

    /// Load the objects of a type whose attribute holds the given value,
    /// used to resolve remote relations.
    fn load_by_attribute(
        &mut self,
        egil_type: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<LoadedObject>, LoadError>;
}

/// JSON-file backend.
///
/// The input document maps type names to arrays of objects; attribute values
/// may be single strings or arrays of strings:
///
/// ```json
/// {
///   "Student": [
///     {"GUID": "u1", "userName": "anna", "email": ["a@x.se", "b@x.se"]}
///   ]
/// }
/// ```
pub struct JsonFileLoader {
    objects: BTreeMap<String, Vec<LoadedObject>>,
}

impl JsonFileLoader {
    /// Read a backend file.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            LoadError::backend("*", format!("failed to read {}: {error}", path.display()))
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|error| {
            LoadError::malformed("*", format!("{} is not JSON: {error}", path.display()))
        })?;
        Self::from_value(value)
    }

    /// Build a loader from an in-memory document.
    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        let Value::Object(types) = value else {
            return Err(LoadError::malformed("*", "top level must be an object"));
        };

        let mut objects = BTreeMap::new();
        for (egil_type, entries) in types {
            let Value::Array(entries) = entries else {
                return Err(LoadError::malformed(
                    &egil_type,
                    "type entry must be an array",
                ));
            };
            let mut list = Vec::new();
            for entry in entries {
                list.push(Self::object_from_value(&egil_type, entry)?);
            }
            objects.insert(egil_type, list);
        }
        Ok(Self { objects })
    }

    fn object_from_value(egil_type: &str, entry: Value) -> Result<LoadedObject, LoadError> {
        let Value::Object(attributes) = entry else {
            return Err(LoadError::malformed(egil_type, "object entry must be a map"));
        };

        let mut object = LoadedObject::new(egil_type);
        for (attribute, value) in attributes {
            let values = match value {
                Value::String(single) => vec![single],
                Value::Array(many) => many
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        other => Err(LoadError::malformed(
                            egil_type,
                            format!("attribute '{attribute}' holds non-string value {other}"),
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => {
                    return Err(LoadError::malformed(
                        egil_type,
                        format!("attribute '{attribute}' holds non-string value {other}"),
                    ));
                }
            };
            object.set_attribute(attribute, values);
        }
        Ok(object)
    }
}

impl ObjectLoader for JsonFileLoader {
    fn load_type(&mut self, egil_type: &str) -> Result<Vec<LoadedObject>, LoadError> {
        Ok(self.objects.get(egil_type).cloned().unwrap_or_default())
    }

    fn load_by_attribute(
        &mut self,
        egil_type: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<LoadedObject>, LoadError> {
        Ok(self
            .objects
            .get(egil_type)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|object| object.has_value(attribute, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Human-readable identity for log messages: `attr=value (UUID=...)` when
/// the type configures a readable-id attribute, `UUID=...` otherwise.
pub fn readable_id(object: &LoadedObject, config: &AppConfig) -> String {
    let egil_type = object.egil_type();
    let uid = config
        .unique_identifier(egil_type)
        .ok()
        .and_then(|attribute| object.uid(attribute))
        .unwrap_or("<unset>");
    let base = format!("UUID={uid}");

    let readable_attribute = config
        .type_config(egil_type)
        .ok()
        .and_then(|type_config| type_config.readable_id.as_deref());
    match readable_attribute {
        Some(attribute) => {
            let value = object.first_value(attribute).unwrap_or("<unset>");
            format!("{attribute}={value} ({base})")
        }
        None => base,
    }
}

/// Load, transform, limit and (where configured) generate every type in the
/// load order, resolving remote relations along the way.
pub fn load_all(
    config: &AppConfig,
    loader: &mut dyn ObjectLoader,
    skip_types: &[String],
) -> SyncResult<ObjectStore> {
    let mut store = ObjectStore::new();

    for egil_type in &config.scim_type_load_order {
        if skip_types.iter().any(|skipped| skipped == egil_type) {
            info!("skipping load of type {egil_type}");
            continue;
        }

        let type_config = config.type_config(egil_type)?;

        if type_config.is_generated {
            let generated = generate::generate(egil_type, config, &mut store)?;
            info!("generated {} objects of type {egil_type}", generated.len());
            store.add_all(egil_type, generated);
        } else {
            let raw = loader.load_type(egil_type)?;
            let prepared = prepare_objects(egil_type, raw, config)?;
            info!("loaded {} objects of type {egil_type}", prepared.len());
            store.add_all(egil_type, prepared);
        }

        let mut visited = HashSet::new();
        visited.insert(egil_type.clone());
        load_related(egil_type, config, loader, &mut store, &mut visited)?;
    }

    Ok(store)
}

/// Transformer → limiter → UID check, in that order.
fn prepare_objects(
    egil_type: &str,
    raw: Vec<LoadedObject>,
    config: &AppConfig,
) -> SyncResult<ObjectList> {
    let uid_attribute = config.unique_identifier(egil_type)?;
    let transformer = Transformer::from_specs(&config.type_config(egil_type)?.transform_attributes)?;
    let limiter = limiter_for(egil_type, config)?;

    let mut prepared = ObjectList::new();
    for mut object in raw {
        transformer.apply(&mut object);

        if !limiter.include(&object, uid_attribute) {
            continue;
        }

        let uid_values = object.values(uid_attribute);
        let uid = match uid_values.first() {
            Some(uid) => uid.clone(),
            None => {
                warn!(
                    "dropping {egil_type} object without attribute {uid_attribute}: {}",
                    readable_id(&object, config)
                );
                continue;
            }
        };
        if uid_values.len() > 1 {
            warn!(
                "{egil_type} object has {} values for {uid_attribute}, using the first: {}",
                uid_values.len(),
                readable_id(&object, config)
            );
        }

        prepared.insert(uid, object);
    }
    Ok(prepared)
}

/// The limiter for a type: its own, else one configured for its SCIM
/// endpoint name, else the null limiter. Types sent to the `Users` endpoint
/// additionally get the user blacklist AND-ed in.
fn limiter_for(egil_type: &str, config: &AppConfig) -> SyncResult<LoadLimiter> {
    let type_config = config.type_config(egil_type)?;

    let mut limiter = match &type_config.limit {
        Some(spec) => LoadLimiter::from_spec(spec, config.base_dir())?,
        None => {
            let endpoint_spec = config
                .endpoint(egil_type)
                .ok()
                .filter(|endpoint| *endpoint != egil_type)
                .and_then(|endpoint| config.type_config(endpoint).ok())
                .and_then(|endpoint_config| endpoint_config.limit.as_ref());
            match endpoint_spec {
                Some(spec) => LoadLimiter::from_spec(spec, config.base_dir())?,
                None => LoadLimiter::Null,
            }
        }
    };

    let is_user_endpoint = config.endpoint(egil_type).ok() == Some("Users");
    if is_user_endpoint {
        if let Some(blacklist) = &config.user_blacklist {
            let blacklist = LoadLimiter::blacklist(
                &blacklist.file,
                blacklist.attribute.clone(),
                config.base_dir(),
            )?;
            limiter = limiter.and(blacklist);
        }
    }

    Ok(limiter)
}

/// Resolve the remote relations of a type by loading referenced objects
/// that are not yet in the store, recursively.
fn load_related(
    egil_type: &str,
    config: &AppConfig,
    loader: &mut dyn ObjectLoader,
    store: &mut ObjectStore,
    visited: &mut HashSet<String>,
) -> SyncResult<()> {
    let relations = config.type_config(egil_type)?.remote_relations.clone();
    if relations.is_empty() {
        return Ok(());
    }

    for relation in relations {
        let keys: Vec<String> = match store.get_type(egil_type) {
            Some(objects) => objects
                .iter()
                .flat_map(|(_, object)| object.values(&relation.local_attribute).to_vec())
                .collect(),
            None => continue,
        };

        let mut newly_loaded = false;
        for key in keys {
            if store.contains_attribute_value(
                &relation.related_type,
                &relation.remote_attribute,
                &key,
            ) {
                continue;
            }
            let raw =
                loader.load_by_attribute(&relation.related_type, &relation.remote_attribute, &key)?;
            if raw.is_empty() {
                continue;
            }
            let prepared = prepare_objects(&relation.related_type, raw, config)?;
            if !prepared.is_empty() {
                newly_loaded = true;
            }
            store.add_all(&relation.related_type, prepared);
        }

        if newly_loaded && visited.insert(relation.related_type.clone()) {
            load_related(&relation.related_type, config, loader, store, visited)?;
        }
    }
    Ok(())
}
