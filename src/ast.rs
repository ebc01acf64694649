//! Specification model: primitive types, fields, structs, message types, and the
//! resolved (flattened, dependency-checked) form consumed by the codec and generator.

use crate::constraint::Constraint;
use std::collections::{HashMap, HashSet};

/// Unrecognized attributes, kept verbatim for downstream backends.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A specification or mission file could not be read.
    #[error("IO: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid JSON or lacks the expected top-level shape.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A type token or constraint expression does not match the grammar.
    #[error("Syntax error in {input:?}: {message}")]
    Syntax { input: String, message: String },
    /// Structurally wrong entry: missing name or type, bad flag, misplaced dependee.
    #[error("{owner}: {message}")]
    Invalid { owner: String, message: String },
    /// Two structs, message types, or sibling fields share a name.
    #[error("Duplicate name in {owner}: {name}")]
    DuplicateName { owner: String, name: String },
    /// A field type names a struct that is not declared.
    #[error("Unknown struct: {0}")]
    UnknownStruct(String),
    /// A mission type names a message type that is not declared.
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),
    /// Struct nesting loops back on itself; the path ends where it starts.
    #[error("Cyclic struct nesting: {}", .0.join(" -> "))]
    CyclicStruct(Vec<String>),
    /// An array length does not bind to an earlier dependee integer.
    #[error("{field}: dependency {dependency:?} {reason}")]
    Dependency {
        field: String,
        dependency: String,
        reason: String,
    },
    /// A `value` does not fit the field: out of range literal, list on a scalar, etc.
    #[error("{field}: {message}")]
    Constraint { field: String, message: String },
    /// A fixed-length message is not byte aligned.
    #[error("Message {message}: {bits} bits is not a whole number of bytes")]
    Alignment { message: String, bits: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Unsigned,
    Signed,
    Float,
}

/// A fixed-width numeric type (`U16`, `<I32`, `F32`, `U3`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveType {
    pub kind: NumericKind,
    pub width: u32,
    pub byte_order: ByteOrder,
}

impl PrimitiveType {
    pub const FLOAT_WIDTH: u32 = 32;

    pub fn unsigned(width: u32) -> Self {
        PrimitiveType { kind: NumericKind::Unsigned, width, byte_order: ByteOrder::Big }
    }

    pub fn signed(width: u32) -> Self {
        PrimitiveType { kind: NumericKind::Signed, width, byte_order: ByteOrder::Big }
    }

    pub fn float32() -> Self {
        PrimitiveType { kind: NumericKind::Float, width: Self::FLOAT_WIDTH, byte_order: ByteOrder::Big }
    }

    pub fn little_endian(mut self) -> Self {
        self.byte_order = ByteOrder::Little;
        self
    }

    pub fn is_integer(&self) -> bool {
        self.kind != NumericKind::Float
    }

    /// Inclusive integer bounds. Only meaningful for integer kinds.
    pub fn int_bounds(&self) -> (i128, i128) {
        match self.kind {
            NumericKind::Signed => (-(1i128 << (self.width - 1)), (1i128 << (self.width - 1)) - 1),
            _ => (0, (1i128 << self.width) - 1),
        }
    }

    /// Whether the field's own bytes are swapped on the wire. Sub-byte and single-byte
    /// widths are always packed MSB-first.
    pub fn reorders_bytes(&self) -> bool {
        self.byte_order == ByteOrder::Little && self.width > 8 && self.width % 8 == 0
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.byte_order == ByteOrder::Little {
            write!(f, "<")?;
        }
        let c = match self.kind {
            NumericKind::Unsigned => 'U',
            NumericKind::Signed => 'I',
            NumericKind::Float => 'F',
        };
        write!(f, "{}{}", c, self.width)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLength {
    Fixed(u64),
    /// Bound at generation/decode time to the value of an earlier dependee field.
    Dependee(String),
}

/// Declared field type. Array elements are never arrays themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Struct(String),
    Array {
        element: Box<FieldType>,
        length: ArrayLength,
    },
}

impl FieldType {
    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::Array { .. })
    }

    pub fn primitive(&self) -> Option<&PrimitiveType> {
        match self {
            FieldType::Primitive(p) => Some(p),
            FieldType::Array { element, .. } => element.primitive(),
            FieldType::Struct(_) => None,
        }
    }

    pub fn struct_ref(&self) -> Option<&str> {
        match self {
            FieldType::Struct(name) => Some(name),
            FieldType::Array { element, .. } => element.struct_ref(),
            FieldType::Primitive(_) => None,
        }
    }

    pub fn dependency(&self) -> Option<&str> {
        match self {
            FieldType::Array { length: ArrayLength::Dependee(name), .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub constraint: Constraint,
    pub dependee: bool,
    pub strict: bool,
    pub ignore: bool,
    pub attributes: Attributes,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            ty,
            constraint: Constraint::None,
            dependee: false,
            strict: false,
            ignore: false,
            attributes: Attributes::new(),
        }
    }

    /// Name of the dependee this array's length is bound to.
    pub fn dependency(&self) -> Option<&str> {
        self.ty.dependency()
    }
}

#[derive(Debug, Clone)]
pub struct StructSpec {
    pub name: String,
    pub members: Vec<FieldSpec>,
    pub ignore: bool,
}

/// Where a message type derived from a mission overlay came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionOrigin {
    pub base: String,
    pub overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct MessageTypeSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub ignore: bool,
    pub attributes: Attributes,
    pub state_ids: Vec<usize>,
    pub origin: Option<MissionOrigin>,
}

impl MessageTypeSpec {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        MessageTypeSpec {
            name: name.into(),
            fields,
            ignore: false,
            attributes: Attributes::new(),
            state_ids: Vec::new(),
            origin: None,
        }
    }
}

/// Parsed specification document.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub structs: Vec<StructSpec>,
    pub message_types: Vec<MessageTypeSpec>,
}

impl Schema {
    pub fn get_struct(&self, name: &str) -> Option<&StructSpec> {
        self.structs.iter().find(|s| s.name == name && !s.ignore)
    }

    pub fn get_message(&self, name: &str) -> Option<&MessageTypeSpec> {
        self.message_types.iter().find(|m| m.name == name)
    }
}

/// Struct nesting graph keyed by struct name. Edges point from a struct to the
/// structs its members reference.
pub struct StructGraph<'s> {
    edges: HashMap<&'s str, Vec<&'s str>>,
}

impl<'s> StructGraph<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        let mut edges = HashMap::new();
        for s in schema.structs.iter().filter(|s| !s.ignore) {
            let refs = s
                .members
                .iter()
                .filter(|m| !m.ignore)
                .filter_map(|m| m.ty.struct_ref())
                .collect();
            edges.insert(s.name.as_str(), refs);
        }
        StructGraph { edges }
    }

    /// Reject unknown references and cycles. Iterative DFS with an explicit
    /// visiting path so deep nesting cannot exhaust the call stack.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut roots: Vec<&str> = self.edges.keys().copied().collect();
        roots.sort_unstable();
        for root in roots {
            if done.contains(root) {
                continue;
            }
            let mut path: Vec<&str> = vec![root];
            let mut cursor: Vec<usize> = vec![0];
            while let Some(node) = path.last().copied() {
                let children = self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
                let depth = cursor.len() - 1;
                let Some(&child) = children.get(cursor[depth]) else {
                    done.insert(node);
                    path.pop();
                    cursor.pop();
                    continue;
                };
                cursor[depth] += 1;
                if !self.edges.contains_key(child) {
                    return Err(SchemaError::UnknownStruct(child.to_string()));
                }
                if let Some(pos) = path.iter().position(|&n| n == child) {
                    let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(child.to_string());
                    return Err(SchemaError::CyclicStruct(cycle));
                }
                if !done.contains(child) {
                    path.push(child);
                    cursor.push(0);
                }
            }
        }
        Ok(())
    }
}

/// Resolved array length: literal, or the index of the dependee leaf in the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLength {
    Fixed(u64),
    Dependee(usize),
}

/// A primitive (or primitive array) field after struct expansion.
#[derive(Debug, Clone)]
pub struct LeafField {
    /// Dotted path from the message root, e.g. `header.flags` or `items[1].id`.
    pub name: String,
    pub primitive: PrimitiveType,
    pub length: Option<ResolvedLength>,
    pub constraint: Constraint,
    pub dependee: bool,
    pub strict: bool,
    pub attributes: Attributes,
}

impl LeafField {
    pub fn is_array(&self) -> bool {
        self.length.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    pub dependee: usize,
    pub dependent: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub name: String,
    pub fields: Vec<LeafField>,
    pub edges: Vec<DependencyEdge>,
    pub attributes: Attributes,
    pub state_ids: Vec<usize>,
}

impl ResolvedMessage {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&LeafField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Total width in bits when no array length depends on a generated value.
    pub fn fixed_bits(&self) -> Option<u64> {
        let mut bits = 0u64;
        for f in &self.fields {
            let count = match f.length {
                None => 1,
                Some(ResolvedLength::Fixed(n)) => n,
                Some(ResolvedLength::Dependee(_)) => return None,
            };
            bits += f.primitive.width as u64 * count;
        }
        Some(bits)
    }
}

/// Resolved schema: message types flattened into leaf fields, by name for codec and generator.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub messages: Vec<ResolvedMessage>,
    messages_by_name: HashMap<String, usize>,
}

impl ResolvedSchema {
    pub fn resolve(schema: &Schema) -> Result<Self, SchemaError> {
        StructGraph::new(schema).check()?;
        let mut messages = Vec::new();
        let mut messages_by_name = HashMap::new();
        for m in schema.message_types.iter().filter(|m| !m.ignore) {
            if messages_by_name.insert(m.name.clone(), messages.len()).is_some() {
                return Err(SchemaError::DuplicateName {
                    owner: "protocol_types".to_string(),
                    name: m.name.clone(),
                });
            }
            messages.push(resolve_message(schema, m)?);
        }
        Ok(ResolvedSchema { messages, messages_by_name })
    }

    pub fn get_message(&self, name: &str) -> Option<&ResolvedMessage> {
        self.messages_by_name.get(name).map(|&i| &self.messages[i])
    }
}

struct Frame<'s> {
    fields: &'s [FieldSpec],
    next: usize,
    prefix: String,
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Expand struct references in declaration order (pre-order), dropping ignored fields.
fn resolve_message(schema: &Schema, message: &MessageTypeSpec) -> Result<ResolvedMessage, SchemaError> {
    let mut fields: Vec<LeafField> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut edges = Vec::new();
    let mut stack = vec![Frame { fields: &message.fields, next: 0, prefix: String::new() }];

    while let Some(frame) = stack.last_mut() {
        let members = frame.fields;
        let Some(field) = members.get(frame.next) else {
            stack.pop();
            continue;
        };
        frame.next += 1;
        if field.ignore {
            continue;
        }
        let prefix = frame.prefix.clone();
        let path = join_path(&prefix, &field.name);

        match &field.ty {
            FieldType::Primitive(p) => {
                index.insert(path.clone(), fields.len());
                fields.push(leaf(field, path, *p, None));
            }
            FieldType::Struct(name) => {
                let s = schema.get_struct(name).ok_or_else(|| SchemaError::UnknownStruct(name.clone()))?;
                stack.push(Frame { fields: &s.members, next: 0, prefix: path });
            }
            FieldType::Array { element, length } => match element.as_ref() {
                FieldType::Primitive(p) => {
                    let length = match length {
                        ArrayLength::Fixed(n) => ResolvedLength::Fixed(*n),
                        ArrayLength::Dependee(dep) => {
                            let dep_path = join_path(&prefix, dep);
                            let dep_index = *index.get(&dep_path).ok_or_else(|| SchemaError::Dependency {
                                field: path.clone(),
                                dependency: dep.clone(),
                                reason: "does not name an earlier field".to_string(),
                            })?;
                            let dependee = &fields[dep_index];
                            if !dependee.dependee || dependee.is_array() || !dependee.primitive.is_integer() {
                                return Err(SchemaError::Dependency {
                                    field: path.clone(),
                                    dependency: dep.clone(),
                                    reason: "is not a dependee integer field".to_string(),
                                });
                            }
                            edges.push(DependencyEdge { dependee: dep_index, dependent: fields.len() });
                            ResolvedLength::Dependee(dep_index)
                        }
                    };
                    index.insert(path.clone(), fields.len());
                    fields.push(leaf(field, path, *p, Some(length)));
                }
                FieldType::Struct(name) => {
                    let s = schema.get_struct(name).ok_or_else(|| SchemaError::UnknownStruct(name.clone()))?;
                    let count = match length {
                        ArrayLength::Fixed(n) => *n,
                        ArrayLength::Dependee(dep) => {
                            return Err(SchemaError::Dependency {
                                field: path,
                                dependency: dep.clone(),
                                reason: "cannot size an array of structs".to_string(),
                            })
                        }
                    };
                    for i in (0..count).rev() {
                        stack.push(Frame { fields: &s.members, next: 0, prefix: format!("{}[{}]", path, i) });
                    }
                }
                FieldType::Array { .. } => {
                    return Err(SchemaError::Invalid { owner: path, message: "nested arrays are not supported".to_string() })
                }
            },
        }
    }

    if edges.iter().any(|e| e.dependee >= e.dependent) {
        return Err(SchemaError::Invalid {
            owner: message.name.clone(),
            message: "dependee must precede its dependents".to_string(),
        });
    }

    let resolved = ResolvedMessage {
        name: message.name.clone(),
        fields,
        edges,
        attributes: message.attributes.clone(),
        state_ids: message.state_ids.clone(),
    };
    if let Some(bits) = resolved.fixed_bits() {
        if bits % 8 != 0 {
            return Err(SchemaError::Alignment { message: message.name.clone(), bits });
        }
    }
    Ok(resolved)
}

fn leaf(field: &FieldSpec, name: String, primitive: PrimitiveType, length: Option<ResolvedLength>) -> LeafField {
    LeafField {
        name,
        primitive,
        length,
        constraint: field.constraint.clone(),
        dependee: field.dependee,
        strict: field.strict,
        attributes: field.attributes.clone(),
    }
}
