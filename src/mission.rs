//! Mission overlays: stateful variants of message types.
//!
//! A `mission.json` lists mission types in state order. Mission type *k* names an
//! existing message type and overrides some of its field constraints; applying the
//! overlay adds `<name>_STATE_<k>` to the schema. A later mission type with exactly
//! the same overrides of the same base reuses the earlier derived type and only
//! records the extra state id.

use crate::ast::{Attributes, MessageTypeSpec, MissionOrigin, Schema, SchemaError};
use crate::parser::field_constraint;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct MissionField {
    pub name: String,
    /// Constraint expression, interpreted against the base field's type.
    pub value: JsonValue,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionType {
    pub name: String,
    pub fields: Vec<MissionField>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissionSpec {
    pub mission_types: Vec<MissionType>,
}

#[derive(Deserialize)]
struct RawMission {
    mission_types: Vec<Map<String, JsonValue>>,
}

fn name_of(obj: &Map<String, JsonValue>, keys: &[&str], owner: &str) -> Result<String, SchemaError> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(JsonValue::as_str))
        .map(str::to_string)
        .ok_or_else(|| SchemaError::Invalid { owner: owner.to_string(), message: format!("missing {}", keys.join(" / ")) })
}

fn rest(obj: &Map<String, JsonValue>, known: &[&str]) -> Attributes {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl MissionSpec {
    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        let raw: RawMission = serde_json::from_str(source)?;
        let mut mission_types = Vec::with_capacity(raw.mission_types.len());
        for obj in &raw.mission_types {
            let name = name_of(obj, &["msg_name", "name"], "mission_types")?;
            let mut fields = Vec::new();
            if let Some(list) = obj.get("fields").and_then(JsonValue::as_array) {
                for f in list {
                    let f = f.as_object().ok_or_else(|| SchemaError::Invalid {
                        owner: name.clone(),
                        message: "mission fields must be objects".to_string(),
                    })?;
                    fields.push(MissionField {
                        name: name_of(f, &["field_name", "name"], &name)?,
                        value: f.get("value").cloned().unwrap_or(JsonValue::Null),
                        attributes: rest(f, &["name", "field_name", "value"]),
                    });
                }
            }
            let attributes = rest(obj, &["name", "msg_name", "fields"]);
            mission_types.push(MissionType { name, fields, attributes });
        }
        Ok(MissionSpec { mission_types })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| SchemaError::Io { path: path.display().to_string(), source })?;
        Self::parse(&source)
    }
}

impl Schema {
    /// Add the stateful message types described by `mission`. State ids are the
    /// mission types' positions.
    pub fn apply_mission(&mut self, mission: &MissionSpec) -> Result<(), SchemaError> {
        for (state_id, mt) in mission.mission_types.iter().enumerate() {
            let derived = derive(self, mt, state_id)?;
            let origin = derived.origin.clone();
            if let Some(existing) = self.message_types.iter_mut().find(|m| m.origin.is_some() && m.origin == origin) {
                tracing::info!(message_type = %existing.name, state_id, "mission state reuses derived type");
                existing.state_ids.push(state_id);
                continue;
            }
            if self.get_message(&derived.name).is_some() {
                return Err(SchemaError::DuplicateName { owner: "protocol_types".to_string(), name: derived.name });
            }
            tracing::info!(message_type = %derived.name, base = %mt.name, "mission type added");
            self.message_types.push(derived);
        }
        Ok(())
    }
}

fn derive(schema: &Schema, mt: &MissionType, state_id: usize) -> Result<MessageTypeSpec, SchemaError> {
    let base = schema
        .message_types
        .iter()
        .find(|m| m.name == mt.name && m.origin.is_none())
        .ok_or_else(|| SchemaError::UnknownMessage(mt.name.clone()))?;
    let mut derived = base.clone();
    derived.name = format!("{}_STATE_{}", base.name, state_id);
    derived.state_ids = vec![state_id];

    let mut overrides = Vec::with_capacity(mt.fields.len());
    for mf in &mt.fields {
        let field = derived.fields.iter_mut().find(|f| f.name == mf.name).ok_or_else(|| SchemaError::Invalid {
            owner: format!("{}_STATE_{}", base.name, state_id),
            message: format!("mission field {} does not exist in {}", mf.name, base.name),
        })?;
        let constraint = field_constraint(field, &base.name, &mf.value)?;
        overrides.push((mf.name.clone(), constraint.to_string()));
        field.constraint = constraint;
        field.attributes.extend(mf.attributes.clone());
    }
    derived.attributes.extend(mt.attributes.clone());
    derived.origin = Some(MissionOrigin { base: base.name.clone(), overrides });
    Ok(derived)
}
