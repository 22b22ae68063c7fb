//! Synthesised relation objects.
//!
//! Employments, Activities, virtual StudentGroups and the static
//! Organisation record do not exist in the source system; they are generated
//! by joining previously loaded types. Every synthesised object gets a
//! deterministic UUID derived from its inputs, so repeated runs mint
//! identical identities and the reconciler sees no spurious changes.

use crate::config::{AppConfig, AttributePath, TypeConfig};
use crate::error::LoadError;
use crate::filter::full_match_regex;
use crate::model::{LoadedObject, ObjectList, ObjectStore};
use crate::uuid_factory::{derive_relation_uuid, derive_uuid};
use log::{debug, warn};
use std::collections::BTreeSet;

/// How many orphaned masters to name when reporting missing related objects.
const ORPHAN_REPORT_LIMIT: usize = 10;

/// Generate all objects of a synthesised type.
///
/// The store must already hold the types the generation joins over (the load
/// order puts generated types after their inputs).
pub fn generate(
    egil_type: &str,
    config: &AppConfig,
    store: &mut ObjectStore,
) -> Result<ObjectList, LoadError> {
    match egil_type {
        "Employment" => generate_employment(egil_type, config, store),
        "Activity" => generate_activity(egil_type, config, store),
        "StudentGroup" => generate_student_group(egil_type, config, store),
        "Organisation" => generate_organisation(egil_type, config),
        other => Err(LoadError::generation(
            other,
            "type has no generation recipe",
        )),
    }
}

fn type_config<'a>(
    egil_type: &str,
    config: &'a AppConfig,
) -> Result<&'a TypeConfig, LoadError> {
    config
        .type_config(egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))
}

fn require<'a, T>(
    egil_type: &str,
    key: &str,
    value: Option<&'a T>,
) -> Result<&'a T, LoadError> {
    value.ok_or_else(|| LoadError::generation(egil_type, format!("missing {key}")))
}

/// Mint the relation UUID from the remote-part and local-part identifier
/// attributes already copied onto the synthesised object, and store it under
/// the type's UID attribute.
///
/// Returns `None` (with a warning) when either identifier is missing.
fn store_relation_id(
    object: &mut LoadedObject,
    remote_part: &AttributePath,
    local_part: &AttributePath,
    uid_attribute: &str,
) -> Option<String> {
    let remote = object.first_value(&remote_part.to_string())?.to_string();
    let local = match object.first_value(&local_part.to_string()) {
        Some(local) => local.to_string(),
        None => {
            warn!(
                "failed to create {} relation: missing {}",
                object.egil_type(),
                local_part
            );
            return None;
        }
    };

    let uuid = derive_relation_uuid(&remote, &local);
    object.set_attribute(uid_attribute, vec![uuid.clone()]);
    Some(uuid)
}

/// Employment-style generation: one object per (master, key value) pair that
/// resolves to a related object.
fn generate_employment(
    egil_type: &str,
    config: &AppConfig,
    store: &ObjectStore,
) -> Result<ObjectList, LoadError> {
    let type_config = type_config(egil_type, config)?;
    let master_key = require(egil_type, "generate-key", type_config.generate_key.as_ref())?;
    let remote_part = require(
        egil_type,
        "generate-remote-part",
        type_config.generate_remote_part.as_ref(),
    )?;
    let local_part = require(
        egil_type,
        "generate-local-part",
        type_config.generate_local_part.as_ref(),
    )?;
    let relation_id = require(
        egil_type,
        "remote-relation-id",
        type_config.remote_relation_id.as_ref(),
    )?;
    let uid_attribute = config
        .unique_identifier(egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))?;

    let mut scim_variables = type_config.scim_variables.clone();
    scim_variables.extend(type_config.hidden_attributes.iter().cloned());

    let mut generated = ObjectList::new();
    let mut missing_keys: BTreeSet<String> = BTreeSet::new();
    let mut orphaned_masters: BTreeSet<String> = BTreeSet::new();

    let masters = match store.get_type(&master_key.egil_type) {
        Some(masters) => masters,
        None => return Ok(generated),
    };

    for (master_uid, master) in masters.iter() {
        let key_values = master.values(&master_key.attribute).to_vec();
        if key_values.is_empty() {
            warn!(
                "generating {egil_type}: no values for {} on {} {master_uid}",
                master_key.attribute, master_key.egil_type
            );
        }

        for key_value in &key_values {
            if missing_keys.contains(key_value) {
                orphaned_masters.insert(format!("{} : {master_uid}", master_key.egil_type));
                continue;
            }

            let related = match store.find_by_attribute(
                &remote_part.egil_type,
                relation_id,
                key_value,
            ) {
                Some(related) => related,
                None => {
                    missing_keys.insert(key_value.clone());
                    orphaned_masters.insert(format!("{} : {master_uid}", master_key.egil_type));
                    continue;
                }
            };

            let mut object = LoadedObject::new(egil_type);
            object.set_attribute(master_key.to_string(), vec![key_value.clone()]);

            for variable in &scim_variables {
                let Some((var_type, var_attribute)) = variable.split_once('.') else {
                    continue;
                };
                if var_type == master_key.egil_type && var_attribute != master_key.attribute {
                    object.set_attribute(variable.clone(), master.values(var_attribute).to_vec());
                } else if var_type == remote_part.egil_type {
                    object.set_attribute(variable.clone(), related.values(var_attribute).to_vec());
                }
            }

            if let Some(uuid) =
                store_relation_id(&mut object, remote_part, local_part, uid_attribute)
            {
                debug!(
                    "generated {egil_type} {uuid} from {} {master_uid} and {} {}",
                    master_key.egil_type,
                    remote_part.egil_type,
                    key_value
                );
                generated.insert(uuid, object);
            }
        }
    }

    if !missing_keys.is_empty() && !type_config.ignore_missing_related {
        report_orphans(egil_type, &remote_part.egil_type, &missing_keys, &orphaned_masters);
    }

    Ok(generated)
}

fn report_orphans(
    egil_type: &str,
    related_type: &str,
    missing_keys: &BTreeSet<String>,
    orphaned_masters: &BTreeSet<String>,
) {
    let keys: Vec<&str> = missing_keys.iter().map(String::as_str).collect();
    warn!(
        "missing {related_type} objects while generating {egil_type}: {}",
        keys.join(", ")
    );

    let mut masters: Vec<&str> = orphaned_masters
        .iter()
        .map(String::as_str)
        .take(ORPHAN_REPORT_LIMIT)
        .collect();
    if orphaned_masters.len() > ORPHAN_REPORT_LIMIT {
        masters.push("...");
    }
    warn!("objects with missing {related_type}: {}", masters.join(", "));
}

/// Activity-style generation: one object per master, collecting related
/// objects through the master's multi-valued relation attribute.
fn generate_activity(
    egil_type: &str,
    config: &AppConfig,
    store: &ObjectStore,
) -> Result<ObjectList, LoadError> {
    let type_config = type_config(egil_type, config)?;
    let master_type = require(
        egil_type,
        "generate-type",
        type_config.generate_type.as_ref(),
    )?
    .clone();
    let relation_id = require(
        egil_type,
        "remote-relation-id",
        type_config.remote_relation_id.as_ref(),
    )?;
    let remote_part = require(
        egil_type,
        "generate-remote-part",
        type_config.generate_remote_part.as_ref(),
    )?;
    let local_part = require(
        egil_type,
        "generate-local-part",
        type_config.generate_local_part.as_ref(),
    )?;
    let uid_attribute = config
        .unique_identifier(egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))?;

    let id_basis = &type_config.guid_generation_ids;
    if id_basis.len() != 2 {
        return Err(LoadError::generation(
            egil_type,
            "guid-generation-ids must name exactly 2 references like \
             [\"StudentGroup.GUID\", \"SchoolUnit.GUID\"]",
        ));
    }

    let related_uid_attribute = config
        .unique_identifier(&remote_part.egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))?;

    let mut generated = ObjectList::new();
    let masters = match store.get_type(&master_type) {
        Some(masters) => masters,
        None => return Ok(generated),
    };

    for (master_uid, master) in masters.iter() {
        let mut object = LoadedObject::new(egil_type);
        object.set_attribute(
            local_part.to_string(),
            master.values(&local_part.attribute).to_vec(),
        );

        for member in master.values(relation_id) {
            let related =
                store.find_by_attribute(&remote_part.egil_type, relation_id, member);
            if let Some(related) = related {
                if let Some(related_uid) = related.uid(related_uid_attribute) {
                    object.append_values(&remote_part.to_string(), [related_uid.to_string()]);
                }
            }
        }

        for variable in &type_config.scim_variables {
            if variable == uid_attribute {
                continue;
            }
            let values = match variable.split_once('.') {
                Some((var_type, var_attribute)) if var_type == master_type => {
                    master.values(var_attribute).to_vec()
                }
                _ => master.values(variable).to_vec(),
            };
            if !values.is_empty() {
                object.set_attribute(variable.clone(), values);
            }
        }

        let missing = id_basis
            .iter()
            .find(|reference| object.values(reference.as_str()).is_empty());
        if let Some(reference) = missing {
            warn!(
                "failed to create {egil_type} for {master_type} {master_uid}: \
                 missing attribute {reference}"
            );
            continue;
        }

        let uuid = derive_relation_uuid(
            &object.values(&id_basis[0])[0].clone(),
            &object.values(&id_basis[1])[0].clone(),
        );
        object.set_attribute(uid_attribute, vec![uuid.clone()]);
        debug!("generated {egil_type} {uuid} from {master_type} {master_uid}");
        generated.insert(uuid, object);
    }

    Ok(generated)
}

/// Virtual student groups generated from a multi-valued attribute on users.
fn generate_student_group(
    egil_type: &str,
    config: &AppConfig,
    store: &mut ObjectStore,
) -> Result<ObjectList, LoadError> {
    let type_config = type_config(egil_type, config)?.clone();
    let uid_attribute = config
        .unique_identifier(egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))?
        .to_string();

    let mut generated = ObjectList::new();
    // Reciprocal group references to write back onto the source objects;
    // applied after iteration since the store is borrowed while we read it.
    let mut back_references: Vec<(String, String, String, Vec<String>)> = Vec::new();

    for from_type in &type_config.generate_from_types {
        let from_type_variables = config
            .type_config(from_type)
            .map(|c| c.scim_variables.clone())
            .unwrap_or_default();

        let Some(users) = store.get_type(from_type) else {
            continue;
        };

        for (user_uid, user) in users.iter() {
            for attribute in &type_config.generate_from_attributes {
                let pattern = full_match_regex(&attribute.pattern).map_err(|error| {
                    LoadError::generation(
                        egil_type,
                        format!("bad generate-from pattern '{}': {error}", attribute.pattern),
                    )
                })?;

                for from_value in user.values(&attribute.from) {
                    let Some(captures) = pattern.captures(from_value) else {
                        continue;
                    };

                    let mut uuid_basis = String::new();
                    captures.expand(&attribute.uuid, &mut uuid_basis);
                    let uuid = derive_uuid(&uuid_basis);

                    if generated.get(&uuid).is_none() {
                        let mut group = LoadedObject::new(egil_type);
                        group.set_attribute(uid_attribute.clone(), vec![uuid.clone()]);
                        for (name, recipe) in &attribute.attributes {
                            let mut value = String::new();
                            captures.expand(recipe, &mut value);
                            group.set_attribute(name.clone(), vec![value]);
                        }
                        debug!(
                            "generated {egil_type} {uuid} from {from_type} {user_uid}"
                        );
                        generated.insert(uuid.clone(), group);
                    }
                    let group = generated.get_mut(&uuid).expect("group just inserted");

                    // Group → user references, from this type's scim-variables.
                    for variable in &type_config.scim_variables {
                        if let Some((var_type, var_attribute)) = variable.split_once('.') {
                            if var_type == from_type {
                                let values = user.values(var_attribute).to_vec();
                                group.append_values(variable, values);
                            }
                        }
                    }

                    // User → group references, from the source type's
                    // scim-variables.
                    for variable in &from_type_variables {
                        if let Some((var_type, var_attribute)) = variable.split_once('.') {
                            if var_type == egil_type {
                                let values = group.values(var_attribute).to_vec();
                                if !values.is_empty() {
                                    back_references.push((
                                        from_type.clone(),
                                        user_uid.to_string(),
                                        format!("{egil_type}.{var_attribute}"),
                                        values,
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    for (from_type, user_uid, attribute, values) in back_references {
        if let Some(users) = store.get_type_mut(&from_type) {
            if let Some(user) = users.get_mut(&user_uid) {
                user.append_values_unique(&attribute, values);
            }
        }
    }

    Ok(generated)
}

/// The static Organisation record.
fn generate_organisation(egil_type: &str, config: &AppConfig) -> Result<ObjectList, LoadError> {
    let type_config = type_config(egil_type, config)?;
    let uuid = require(egil_type, "static-uuid", type_config.static_uuid.as_ref())?;
    let display_name = require(
        egil_type,
        "display-name",
        type_config.display_name.as_ref(),
    )?;
    let uid_attribute = config
        .unique_identifier(egil_type)
        .map_err(|error| LoadError::generation(egil_type, error.to_string()))?;

    let mut object = LoadedObject::new(egil_type);
    object.set_attribute(uid_attribute, vec![uuid.clone()]);
    object.set_attribute("displayName", vec![display_name.clone()]);

    debug!("generated {egil_type} {display_name} with id {uuid}");

    let mut generated = ObjectList::new();
    generated.insert(uuid.clone(), object);
    Ok(generated)
}
