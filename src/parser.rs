//! Parse specification documents (JSON) into the AST, using PEST for the embedded
//! type-token and constraint-expression languages.

use crate::ast::*;
use crate::constraint::{Constraint, Scalar};
use pest::Parser;
use pest_derive::Parser as PestParser;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SpecParser;

/// File name of the specification document inside a protocol directory.
pub const PROTOCOL_FILE: &str = "protocol.json";
/// Optional mission overlay next to the specification document.
pub const MISSION_FILE: &str = "mission.json";

const FIELD_KEYS: &[&str] = &["name", "field_name", "type", "value", "dependee", "dependency", "strict", "ignore"];
const MESSAGE_KEYS: &[&str] = &["name", "msg_name", "fields", "ignore"];

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    structs: Vec<Map<String, JsonValue>>,
    #[serde(default)]
    protocol_types: Vec<Map<String, JsonValue>>,
}

fn syntax_error(input: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Syntax { input: input.to_string(), message: message.into() }
}

/// Parse a specification document into a schema. Struct references, cycles,
/// constraint syntax and sibling dependencies are all checked here.
pub fn parse(source: &str) -> Result<Schema, SchemaError> {
    let raw: RawDocument = serde_json::from_str(source)?;
    let mut schema = Schema::default();

    for obj in &raw.structs {
        let s = build_struct(obj)?;
        if schema.structs.iter().any(|other| other.name == s.name) {
            return Err(SchemaError::DuplicateName { owner: "structs".to_string(), name: s.name });
        }
        schema.structs.push(s);
    }
    for obj in &raw.protocol_types {
        let m = build_message(obj)?;
        if schema.message_types.iter().any(|other| other.name == m.name) {
            return Err(SchemaError::DuplicateName { owner: "protocol_types".to_string(), name: m.name });
        }
        schema.message_types.push(m);
    }

    StructGraph::new(&schema).check()?;
    for m in schema.message_types.iter().filter(|m| !m.ignore) {
        for f in m.fields.iter().filter(|f| !f.ignore) {
            if let Some(name) = f.ty.struct_ref() {
                if schema.get_struct(name).is_none() {
                    return Err(SchemaError::UnknownStruct(name.to_string()));
                }
            }
        }
    }
    tracing::info!(
        structs = schema.structs.len(),
        message_types = schema.message_types.len(),
        "parsed specification"
    );
    Ok(schema)
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<Schema, SchemaError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|source| SchemaError::Io { path: path.display().to_string(), source })?;
    parse(&source)
}

/// Load `protocol.json` from a protocol directory and apply `mission.json` when present.
/// An empty mission file, or one listing no mission types, is treated as absent.
pub fn load_protocol(dir: impl AsRef<Path>) -> Result<Schema, SchemaError> {
    let dir = dir.as_ref();
    let mut schema = parse_file(dir.join(PROTOCOL_FILE))?;
    let mission_path = dir.join(MISSION_FILE);
    if !mission_path.is_file() {
        return Ok(schema);
    }
    let source = std::fs::read_to_string(&mission_path)
        .map_err(|source| SchemaError::Io { path: mission_path.display().to_string(), source })?;
    if source.trim().is_empty() {
        tracing::warn!(path = %mission_path.display(), "mission file is empty, ignored");
        return Ok(schema);
    }
    let mission = crate::mission::MissionSpec::parse(&source)?;
    if mission.mission_types.is_empty() {
        tracing::warn!(path = %mission_path.display(), "mission file lists no mission types, ignored");
        return Ok(schema);
    }
    schema.apply_mission(&mission)?;
    Ok(schema)
}

/// Parse a field type token: `U16`, `<I32`, `F32`, `Header`, `U8[4]`, `U8[LENGTH]`.
pub fn parse_type(token: &str) -> Result<FieldType, SchemaError> {
    let pair = SpecParser::parse(Rule::type_token, token)
        .map_err(|e| syntax_error(token, e.to_string()))?
        .next()
        .ok_or_else(|| syntax_error(token, "empty type"))?;

    let mut little = false;
    let mut base = None;
    let mut length = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::byte_order => little = inner.as_str() == "<",
            Rule::primitive => {
                base = Some(FieldType::Primitive(
                    build_primitive(inner.as_str()).map_err(|m| syntax_error(token, m))?,
                ))
            }
            Rule::struct_ref => base = Some(FieldType::Struct(inner.as_str().to_string())),
            Rule::array_suffix => {
                let n = inner.into_inner().next().ok_or_else(|| syntax_error(token, "empty array length"))?;
                length = Some(match n.as_rule() {
                    Rule::count => ArrayLength::Fixed(
                        n.as_str().parse().map_err(|_| syntax_error(token, "array length out of range"))?,
                    ),
                    _ => ArrayLength::Dependee(n.as_str().to_string()),
                });
            }
            _ => {}
        }
    }

    let base = match base.ok_or_else(|| syntax_error(token, "missing base type"))? {
        FieldType::Primitive(p) if little => FieldType::Primitive(p.little_endian()),
        FieldType::Struct(_) if little => return Err(syntax_error(token, "byte order marker on a struct type")),
        other => other,
    };
    Ok(match length {
        Some(length) => FieldType::Array { element: Box::new(base), length },
        None => base,
    })
}

fn build_primitive(s: &str) -> Result<PrimitiveType, String> {
    let width: u32 = s[1..].parse().map_err(|_| format!("bad width in {}", s))?;
    match &s[..1] {
        "U" | "I" if !(1..=64).contains(&width) => Err(format!("integer width must be 1..=64, got {}", width)),
        "U" => Ok(PrimitiveType::unsigned(width)),
        "I" => Ok(PrimitiveType::signed(width)),
        "F" if width != PrimitiveType::FLOAT_WIDTH => Err(format!("only F32 floats are supported, got F{}", width)),
        "F" => Ok(PrimitiveType::float32()),
        other => Err(format!("unknown numeric kind {}", other)),
    }
}

/// Parse a constraint expression: `5`, `0x7E`, `'a'`, `(1,512)`, `1|2|(8,9)`,
/// `[1,(2,3),4|5]`, `[1,2]|[3,4]`. An empty expression means unconstrained.
pub fn parse_constraint(expr: &str) -> Result<Constraint, SchemaError> {
    if expr.trim().is_empty() {
        return Ok(Constraint::None);
    }
    let pair = SpecParser::parse(Rule::constraint, expr)
        .map_err(|e| syntax_error(expr, e.to_string()))?
        .next()
        .ok_or_else(|| syntax_error(expr, "empty constraint"))?;
    let inner = pair.into_inner().next().ok_or_else(|| syntax_error(expr, "empty constraint"))?;
    build_constraint(inner).map_err(|m| syntax_error(expr, m))
}

fn build_constraint(pair: pest::iterators::Pair<Rule>) -> Result<Constraint, String> {
    match pair.as_rule() {
        Rule::list_choice | Rule::scalar_choice => Ok(Constraint::Choice(
            pair.into_inner().map(build_constraint).collect::<Result<_, _>>()?,
        )),
        Rule::list => Ok(Constraint::List(pair.into_inner().map(build_constraint).collect::<Result<_, _>>()?)),
        Rule::range => {
            let mut it = pair.into_inner();
            let min = build_scalar(it.next().ok_or("range: missing lower bound")?)?;
            let max = build_scalar(it.next().ok_or("range: missing upper bound")?)?;
            Ok(Constraint::Range { min, max })
        }
        _ => Ok(Constraint::Exact(build_scalar(pair)?)),
    }
}

fn build_scalar(pair: pest::iterators::Pair<Rule>) -> Result<Scalar, String> {
    let s = pair.as_str();
    let out_of_range = || format!("literal {} is out of range", s);
    match pair.as_rule() {
        Rule::hex_lit => i128::from_str_radix(&s[2..], 16).map(Scalar::Int).map_err(|_| out_of_range()),
        Rule::bin_lit => i128::from_str_radix(&s[2..], 2).map(Scalar::Int).map_err(|_| out_of_range()),
        Rule::int_lit => s.parse::<i128>().map(Scalar::Int).map_err(|_| out_of_range()),
        Rule::float_lit => s.parse::<f64>().map(Scalar::Float).map_err(|e| e.to_string()),
        Rule::char_lit => {
            let c = pair.into_inner().next().and_then(|p| p.as_str().chars().next()).ok_or("empty character literal")?;
            Ok(Scalar::Int(c as u32 as i128))
        }
        other => Err(format!("unexpected {:?}", other)),
    }
}

/// Interpret a JSON `value` attribute for `field`: a string expression, a bare
/// number, or an array of element expressions forming a list.
pub(crate) fn field_constraint(field: &FieldSpec, owner: &str, value: &JsonValue) -> Result<Constraint, SchemaError> {
    let field_name = format!("{}.{}", owner, field.name);
    let expr = match value {
        JsonValue::Null => return Ok(Constraint::None),
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => Ok(s.clone()),
                    JsonValue::Number(n) => Ok(n.to_string()),
                    _ => Err(SchemaError::Constraint {
                        field: field_name.clone(),
                        message: "list elements must be strings or numbers".to_string(),
                    }),
                })
                .collect::<Result<_, _>>()?;
            let joined = parts.join(",");
            if joined.trim_start().starts_with('[') {
                joined
            } else {
                format!("[{}]", joined)
            }
        }
        _ => {
            return Err(SchemaError::Constraint {
                field: field_name,
                message: "value must be a string, number or array".to_string(),
            })
        }
    };
    let constraint = parse_constraint(&expr)?;
    if constraint.is_none() {
        return Ok(constraint);
    }
    let invalid = |message: String| SchemaError::Constraint { field: field_name.clone(), message };

    let Some(primitive) = field.ty.primitive() else {
        return Err(invalid("struct-typed fields cannot carry a value".to_string()));
    };
    let constraint = constraint.check(primitive).map_err(invalid)?;
    if constraint.is_list() {
        let FieldType::Array { length, .. } = &field.ty else {
            return Err(invalid("list constraint on a scalar field".to_string()));
        };
        if let ArrayLength::Fixed(n) = length {
            if longest_list(&constraint) as u64 > *n {
                return Err(invalid(format!("list constraint is longer than the array length {}", n)));
            }
        }
    }
    Ok(constraint)
}

fn longest_list(c: &Constraint) -> usize {
    match c {
        Constraint::List(items) => items.len(),
        Constraint::Choice(alts) => alts.iter().map(longest_list).max().unwrap_or(0),
        _ => 0,
    }
}

fn flag(obj: &Map<String, JsonValue>, key: &str, owner: &str) -> Result<bool, SchemaError> {
    match obj.get(key) {
        None | Some(JsonValue::Null) => Ok(false),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("false") || s.is_empty() => Ok(false),
        Some(other) => Err(SchemaError::Invalid {
            owner: owner.to_string(),
            message: format!("{} must be a boolean, got {}", key, other),
        }),
    }
}

fn name_of(obj: &Map<String, JsonValue>, keys: &[&str], owner: &str) -> Result<String, SchemaError> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(JsonValue::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SchemaError::Invalid {
            owner: owner.to_string(),
            message: format!("missing {}", keys.join(" / ")),
        })
}

fn objects<'a>(
    obj: &'a Map<String, JsonValue>,
    key: &str,
    owner: &str,
) -> Result<Vec<&'a Map<String, JsonValue>>, SchemaError> {
    let missing = || SchemaError::Invalid { owner: owner.to_string(), message: format!("{} must be a list of objects", key) };
    obj.get(key)
        .and_then(JsonValue::as_array)
        .ok_or_else(missing)?
        .iter()
        .map(|v| v.as_object().ok_or_else(missing))
        .collect()
}

fn build_struct(obj: &Map<String, JsonValue>) -> Result<StructSpec, SchemaError> {
    let name = name_of(obj, &["struct_name", "name"], "structs")?;
    if obj.get("value").is_some_and(|v| !v.is_null()) {
        return Err(SchemaError::Invalid { owner: name, message: "structs cannot have a value".to_string() });
    }
    let ignore = flag(obj, "ignore", &name)?;
    let members = objects(obj, "members", &name)?
        .into_iter()
        .map(|m| build_field(m, &name))
        .collect::<Result<Vec<_>, _>>()?;
    check_siblings(&name, &members)?;
    Ok(StructSpec { name, members, ignore })
}

fn build_message(obj: &Map<String, JsonValue>) -> Result<MessageTypeSpec, SchemaError> {
    let name = name_of(obj, &["msg_name", "name"], "protocol_types")?;
    let fields = objects(obj, "fields", &name)?
        .into_iter()
        .map(|f| build_field(f, &name))
        .collect::<Result<Vec<_>, _>>()?;
    check_siblings(&name, &fields)?;
    let mut message = MessageTypeSpec::new(name, fields);
    message.ignore = flag(obj, "ignore", &message.name)?;
    message.attributes = extra_attributes(obj, MESSAGE_KEYS);
    Ok(message)
}

fn extra_attributes(obj: &Map<String, JsonValue>, known: &[&str]) -> Attributes {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn build_field(obj: &Map<String, JsonValue>, owner: &str) -> Result<FieldSpec, SchemaError> {
    let name = name_of(obj, &["field_name", "name"], owner)?;
    let path = format!("{}.{}", owner, name);
    let token = obj
        .get("type")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SchemaError::Invalid { owner: path.clone(), message: "missing type".to_string() })?;
    let mut ty = parse_type(token)?;

    if let Some(dep) = obj.get("dependency").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
        let agrees = match &ty {
            FieldType::Array { length: ArrayLength::Dependee(bound), .. } => Some(bound.as_str() == dep),
            FieldType::Array { .. } => Some(false),
            _ => None,
        };
        match agrees {
            Some(true) => {}
            Some(false) => {
                return Err(SchemaError::Dependency {
                    field: path,
                    dependency: dep.to_string(),
                    reason: format!("disagrees with the length in type {}", token),
                })
            }
            None => ty = FieldType::Array { element: Box::new(ty), length: ArrayLength::Dependee(dep.to_string()) },
        }
    }

    let mut field = FieldSpec::new(name, ty);
    field.dependee = flag(obj, "dependee", &path)?;
    field.strict = flag(obj, "strict", &path)?;
    field.ignore = flag(obj, "ignore", &path)?;
    if let Some(value) = obj.get("value") {
        field.constraint = field_constraint(&field, owner, value)?;
    }
    field.attributes = extra_attributes(obj, FIELD_KEYS);
    if !field.attributes.is_empty() {
        tracing::debug!(field = %path, keys = field.attributes.len(), "custom attributes");
    }
    Ok(field)
}

/// Names are unique per owner; dependees are scalar integers; a dependency names an
/// earlier, non-ignored dependee sibling.
fn check_siblings(owner: &str, fields: &[FieldSpec]) -> Result<(), SchemaError> {
    let mut earlier: HashMap<&str, &FieldSpec> = HashMap::new();
    for f in fields {
        if f.dependee && !f.ignore && (f.ty.is_array() || !matches!(&f.ty, FieldType::Primitive(p) if p.is_integer())) {
            return Err(SchemaError::Invalid {
                owner: format!("{}.{}", owner, f.name),
                message: "dependee fields must be scalar integers".to_string(),
            });
        }
        if let (Some(dep), false) = (f.dependency(), f.ignore) {
            let reason = match earlier.get(dep) {
                None => Some("does not name an earlier field"),
                Some(d) if d.ignore => Some("names an ignored field"),
                Some(d) if !d.dependee => Some("names a field that is not a dependee"),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                return Err(SchemaError::Dependency {
                    field: format!("{}.{}", owner, f.name),
                    dependency: dep.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        if earlier.insert(&f.name, f).is_some() {
            return Err(SchemaError::DuplicateName { owner: owner.to_string(), name: f.name.clone() });
        }
    }
    Ok(())
}
