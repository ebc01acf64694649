//! Specification document tests: syntax (parse success/failure) and semantics
//! (resolve, struct references, dependencies).

use bitspec::ast::{ArrayLength, FieldType, PrimitiveType, ResolvedLength};
use bitspec::constraint::{Constraint, Scalar};
use bitspec::{parse, ResolvedSchema, SchemaError};
use serde_json::Value as JsonValue;

fn message(fields: &str) -> String {
    format!(r#"{{"protocol_types": [{{"name": "M", "fields": [{}]}}]}}"#, fields)
}

fn constraint_of(ty: &str, value: &str) -> Result<Constraint, SchemaError> {
    let src = message(&format!(r#"{{"name": "f", "type": "{}", "value": {}}}"#, ty, value));
    parse(&src).map(|s| s.message_types[0].fields[0].constraint.clone())
}

// ==================== Syntax: valid documents ====================

#[test]
fn parse_empty_document() {
    let s = parse("{}").expect("empty document parses");
    assert!(s.structs.is_empty());
    assert!(s.message_types.is_empty());
}

#[test]
fn parse_minimal_message() {
    let s = parse(&message(r#"{"name": "x", "type": "U8"}"#)).expect("parse");
    assert_eq!(s.message_types.len(), 1);
    assert_eq!(s.message_types[0].name, "M");
    assert_eq!(s.message_types[0].fields[0].name, "x");
    assert_eq!(s.message_types[0].fields[0].ty, FieldType::Primitive(PrimitiveType::unsigned(8)));
    assert_eq!(s.message_types[0].fields[0].constraint, Constraint::None);
}

#[test]
fn parse_name_aliases() {
    let src = r#"{
        "structs": [{"struct_name": "S", "members": [{"field_name": "a", "type": "U8"}]}],
        "protocol_types": [{"msg_name": "M", "fields": [{"field_name": "s", "type": "S"}]}]
    }"#;
    let s = parse(src).expect("parse");
    assert_eq!(s.structs[0].name, "S");
    assert_eq!(s.structs[0].members[0].name, "a");
    assert_eq!(s.message_types[0].name, "M");
    assert_eq!(s.message_types[0].fields[0].ty, FieldType::Struct("S".to_string()));
}

#[test]
fn parse_all_primitive_widths() {
    let src = message(
        r#"{"name": "a", "type": "U1"}, {"name": "b", "type": "I7"}, {"name": "c", "type": "U64"},
           {"name": "d", "type": "I64"}, {"name": "e", "type": "F32"}, {"name": "f", "type": "<U24"}"#,
    );
    let s = parse(&src).expect("parse");
    let types: Vec<String> = s.message_types[0]
        .fields
        .iter()
        .map(|f| f.ty.primitive().expect("primitive").to_string())
        .collect();
    assert_eq!(types, ["U1", "I7", "U64", "I64", "F32", "<U24"]);
}

#[test]
fn parse_string_and_bool_flags() {
    let src = message(
        r#"{"name": "n", "type": "U8", "dependee": "true", "strict": true},
           {"name": "xs", "type": "U8[n]", "strict": "false", "ignore": false}"#,
    );
    let s = parse(&src).expect("parse");
    let fields = &s.message_types[0].fields;
    assert!(fields[0].dependee && fields[0].strict);
    assert!(!fields[1].dependee && !fields[1].strict && !fields[1].ignore);
}

#[test]
fn parse_rejects_non_boolean_flag() {
    let err = parse(&message(r#"{"name": "a", "type": "U8", "strict": "yes"}"#)).unwrap_err();
    assert!(matches!(err, SchemaError::Invalid { .. }), "{:?}", err);
}

#[test]
fn parse_keeps_custom_attributes() {
    let src = r#"{"protocol_types": [{"name": "M", "direction": "uplink", "fields": [
        {"name": "a", "type": "U8", "unit": "m/s", "scale": 0.5}
    ]}]}"#;
    let s = parse(src).expect("parse");
    let m = &s.message_types[0];
    assert_eq!(m.attributes.get("direction"), Some(&JsonValue::from("uplink")));
    assert_eq!(m.fields[0].attributes.get("unit"), Some(&JsonValue::from("m/s")));
    assert_eq!(m.fields[0].attributes.get("scale"), Some(&JsonValue::from(0.5)));
    assert!(!m.fields[0].attributes.contains_key("type"));

    let resolved = ResolvedSchema::resolve(&s).expect("resolve");
    assert_eq!(resolved.messages[0].fields[0].attributes.get("unit"), Some(&JsonValue::from("m/s")));
    assert_eq!(resolved.messages[0].attributes.get("direction"), Some(&JsonValue::from("uplink")));
}

// ==================== Syntax: invalid documents ====================

#[test]
fn parse_fail_malformed_json() {
    assert!(matches!(parse("{\"protocol_types\": ["), Err(SchemaError::Json(_))));
}

#[test]
fn parse_fail_missing_type() {
    assert!(matches!(parse(&message(r#"{"name": "a"}"#)), Err(SchemaError::Invalid { .. })));
}

#[test]
fn parse_fail_bad_type_tokens() {
    for ty in ["U0", "U65", "I99", "F64", "<Header", "U8[", "U8[-1]", "U8[2][2]"] {
        let src = format!(
            r#"{{"structs": [{{"name": "Header", "members": [{{"name": "a", "type": "U8"}}]}}],
                "protocol_types": [{{"name": "M", "fields": [{{"name": "f", "type": "{}"}}]}}]}}"#,
            ty
        );
        assert!(matches!(parse(&src), Err(SchemaError::Syntax { .. })), "{} should not parse", ty);
    }
}

#[test]
fn parse_fail_duplicate_names() {
    let dup_field = message(r#"{"name": "a", "type": "U8"}, {"name": "a", "type": "U8"}"#);
    assert!(matches!(parse(&dup_field), Err(SchemaError::DuplicateName { .. })));

    let dup_message = r#"{"protocol_types": [
        {"name": "M", "fields": [{"name": "a", "type": "U8"}]},
        {"name": "M", "fields": [{"name": "a", "type": "U8"}]}
    ]}"#;
    assert!(matches!(parse(dup_message), Err(SchemaError::DuplicateName { .. })));

    let dup_struct = r#"{"structs": [
        {"name": "S", "members": [{"name": "a", "type": "U8"}]},
        {"name": "S", "members": [{"name": "a", "type": "U8"}]}
    ]}"#;
    assert!(matches!(parse(dup_struct), Err(SchemaError::DuplicateName { .. })));
}

// ==================== Constraints ====================

#[test]
fn constraint_literal_forms() {
    assert_eq!(constraint_of("U8", r#""0x7E""#).expect("hex"), Constraint::Exact(Scalar::Int(0x7E)));
    assert_eq!(constraint_of("U8", r#""0b101""#).expect("bin"), Constraint::Exact(Scalar::Int(5)));
    assert_eq!(constraint_of("U8", r#""'a'""#).expect("char"), Constraint::Exact(Scalar::Int(97)));
    assert_eq!(constraint_of("U8", "5").expect("json number"), Constraint::Exact(Scalar::Int(5)));
    assert_eq!(constraint_of("U8", r#""""#).expect("empty"), Constraint::None);
    assert_eq!(
        constraint_of("I8", r#""(-5,5)""#).expect("range"),
        Constraint::Range { min: Scalar::Int(-5), max: Scalar::Int(5) }
    );
    assert_eq!(
        constraint_of("U8", r#""1|(3,4)""#).expect("choice"),
        Constraint::Choice(vec![
            Constraint::Exact(Scalar::Int(1)),
            Constraint::Range { min: Scalar::Int(3), max: Scalar::Int(4) },
        ])
    );
}

#[test]
fn constraint_list_forms() {
    assert_eq!(
        constraint_of("U8[3]", r#"["1", "(2,3)"]"#).expect("json list"),
        Constraint::List(vec![
            Constraint::Exact(Scalar::Int(1)),
            Constraint::Range { min: Scalar::Int(2), max: Scalar::Int(3) },
        ])
    );
    let c = constraint_of("U8[2]", r#""[1,2]|[3,4]""#).expect("list choice");
    assert!(c.is_list());
    assert!(matches!(c, Constraint::Choice(ref alts) if alts.len() == 2));
}

#[test]
fn constraint_out_of_type_bounds() {
    assert!(matches!(constraint_of("U8", r#""256""#), Err(SchemaError::Constraint { .. })));
    assert!(matches!(constraint_of("U8", r#""-1""#), Err(SchemaError::Constraint { .. })));
    assert!(matches!(constraint_of("I8", r#""(-129,0)""#), Err(SchemaError::Constraint { .. })));
    assert!(matches!(constraint_of("U4", r#""0x10""#), Err(SchemaError::Constraint { .. })));
    assert!(matches!(constraint_of("U8", r#""1.5""#), Err(SchemaError::Constraint { .. })));
}

#[test]
fn constraint_inverted_range_is_rejected() {
    assert!(matches!(constraint_of("U8", r#""(5,1)""#), Err(SchemaError::Constraint { .. })));
}

#[test]
fn constraint_list_on_scalar_is_rejected() {
    assert!(matches!(constraint_of("U8", r#""[1,2]""#), Err(SchemaError::Constraint { .. })));
}

#[test]
fn constraint_list_longer_than_array_is_rejected() {
    assert!(matches!(constraint_of("U8[2]", r#""[1,2,3]""#), Err(SchemaError::Constraint { .. })));
    assert!(constraint_of("U8[3]", r#""[1,2,3]""#).is_ok());
}

#[test]
fn constraint_integers_widen_on_float_fields() {
    assert_eq!(
        constraint_of("F32", r#""(0,10)""#).expect("float range"),
        Constraint::Range { min: Scalar::Float(0.0), max: Scalar::Float(10.0) }
    );
    assert_eq!(constraint_of("F32", r#""0x10""#).expect("hex"), Constraint::Exact(Scalar::Float(16.0)));
    assert_eq!(constraint_of("F32", r#""1.5""#).expect("float"), Constraint::Exact(Scalar::Float(1.5)));
}

#[test]
fn constraint_syntax_errors() {
    for expr in ["(1,", "1||2", "[[1]]", "0xZZ", "abc"] {
        let r = constraint_of("U8[4]", &format!("{:?}", expr));
        assert!(r.is_err(), "{} should be rejected", expr);
    }
}

#[test]
fn struct_fields_cannot_carry_values() {
    let src = r#"{
        "structs": [{"name": "S", "members": [{"name": "a", "type": "U8"}]}],
        "protocol_types": [{"name": "M", "fields": [{"name": "s", "type": "S", "value": "1"}]}]
    }"#;
    assert!(matches!(parse(src), Err(SchemaError::Constraint { .. })));
}

// ==================== Dependencies ====================

#[test]
fn dependency_from_bracket_and_attribute() {
    let src = message(
        r#"{"name": "n", "type": "U8", "dependee": true},
           {"name": "a", "type": "U8[n]"},
           {"name": "b", "type": "U8", "dependency": "n"},
           {"name": "c", "type": "U8[n]", "dependency": "n"}"#,
    );
    let s = parse(&src).expect("parse");
    for f in &s.message_types[0].fields[1..] {
        assert_eq!(f.dependency(), Some("n"), "{}", f.name);
        assert!(matches!(&f.ty, FieldType::Array { length: ArrayLength::Dependee(d), .. } if d == "n"));
    }

    let resolved = ResolvedSchema::resolve(&s).expect("resolve");
    let m = &resolved.messages[0];
    assert_eq!(m.edges.len(), 3);
    assert!(m.fields[1..].iter().all(|f| f.length == Some(ResolvedLength::Dependee(0))));
    assert_eq!(m.fixed_bits(), None);
}

#[test]
fn dependency_disagreeing_with_bracket() {
    let src = message(
        r#"{"name": "n", "type": "U8", "dependee": true},
           {"name": "m", "type": "U8", "dependee": true},
           {"name": "a", "type": "U8[n]", "dependency": "m"}"#,
    );
    assert!(matches!(parse(&src), Err(SchemaError::Dependency { .. })));
}

#[test]
fn dependency_must_name_earlier_dependee() {
    let later = message(r#"{"name": "a", "type": "U8[n]"}, {"name": "n", "type": "U8", "dependee": true}"#);
    assert!(matches!(parse(&later), Err(SchemaError::Dependency { .. })));

    let not_dependee = message(r#"{"name": "n", "type": "U8"}, {"name": "a", "type": "U8[n]"}"#);
    assert!(matches!(parse(&not_dependee), Err(SchemaError::Dependency { .. })));

    let missing = message(r#"{"name": "a", "type": "U8[nope]"}"#);
    assert!(matches!(parse(&missing), Err(SchemaError::Dependency { .. })));

    let ignored = message(
        r#"{"name": "n", "type": "U8", "dependee": true, "ignore": true}, {"name": "a", "type": "U8[n]"}"#,
    );
    assert!(matches!(parse(&ignored), Err(SchemaError::Dependency { .. })));
}

#[test]
fn dependee_must_be_scalar_integer() {
    let float = message(r#"{"name": "n", "type": "F32", "dependee": true}"#);
    assert!(matches!(parse(&float), Err(SchemaError::Invalid { .. })));
    let array = message(r#"{"name": "n", "type": "U8[2]", "dependee": true}"#);
    assert!(matches!(parse(&array), Err(SchemaError::Invalid { .. })));
}

#[test]
fn dependency_inside_struct_resolves_per_instance() {
    let src = r#"{
        "structs": [{"name": "Blob", "members": [
            {"name": "len", "type": "U8", "dependee": true},
            {"name": "data", "type": "U8[len]"}
        ]}],
        "protocol_types": [{"name": "M", "fields": [
            {"name": "a", "type": "Blob"},
            {"name": "b", "type": "Blob"}
        ]}]
    }"#;
    let resolved = ResolvedSchema::resolve(&parse(src).expect("parse")).expect("resolve");
    let m = &resolved.messages[0];
    let names: Vec<&str> = m.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.len", "a.data", "b.len", "b.data"]);
    assert_eq!(m.fields[1].length, Some(ResolvedLength::Dependee(0)));
    assert_eq!(m.fields[3].length, Some(ResolvedLength::Dependee(2)));
}

// ==================== Structs ====================

#[test]
fn forward_struct_reference() {
    let src = r#"{
        "structs": [
            {"name": "Outer", "members": [{"name": "inner", "type": "Inner"}, {"name": "z", "type": "U8"}]},
            {"name": "Inner", "members": [{"name": "x", "type": "U4"}, {"name": "y", "type": "U4"}]}
        ],
        "protocol_types": [{"name": "M", "fields": [{"name": "o", "type": "Outer"}]}]
    }"#;
    let resolved = ResolvedSchema::resolve(&parse(src).expect("parse")).expect("resolve");
    let names: Vec<&str> = resolved.messages[0].fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["o.inner.x", "o.inner.y", "o.z"]);
}

#[test]
fn unknown_struct_reference() {
    let src = message(r#"{"name": "s", "type": "Nowhere"}"#);
    assert!(matches!(parse(&src), Err(SchemaError::UnknownStruct(name)) if name == "Nowhere"));
}

#[test]
fn cyclic_structs_are_rejected() {
    let mutual = r#"{"structs": [
        {"name": "A", "members": [{"name": "b", "type": "B"}]},
        {"name": "B", "members": [{"name": "a", "type": "A"}]}
    ]}"#;
    assert!(matches!(parse(mutual), Err(SchemaError::CyclicStruct(_))));

    let own = r#"{"structs": [{"name": "A", "members": [{"name": "a", "type": "A[2]"}]}]}"#;
    assert!(matches!(parse(own), Err(SchemaError::CyclicStruct(_))));
}

#[test]
fn struct_array_needs_fixed_length() {
    let src = r#"{
        "structs": [{"name": "S", "members": [{"name": "a", "type": "U8"}]}],
        "protocol_types": [{"name": "M", "fields": [
            {"name": "n", "type": "U8", "dependee": true},
            {"name": "items", "type": "S[n]"}
        ]}]
    }"#;
    let schema = parse(src).expect("parse");
    assert!(matches!(ResolvedSchema::resolve(&schema), Err(SchemaError::Dependency { .. })));
}

// ==================== Resolve ====================

#[test]
fn ignored_fields_and_messages_are_dropped() {
    let src = r#"{"protocol_types": [
        {"name": "A", "fields": [{"name": "x", "type": "U8"}, {"name": "skip", "type": "U8", "ignore": "true"}]},
        {"name": "B", "ignore": true, "fields": [{"name": "x", "type": "U8"}]}
    ]}"#;
    let resolved = ResolvedSchema::resolve(&parse(src).expect("parse")).expect("resolve");
    assert_eq!(resolved.messages.len(), 1);
    assert!(resolved.get_message("B").is_none());
    assert_eq!(resolved.messages[0].fields.len(), 1);
}

#[test]
fn misaligned_fixed_message_is_rejected() {
    let schema = parse(&message(r#"{"name": "a", "type": "U3"}, {"name": "b", "type": "U8"}"#)).expect("parse");
    assert!(matches!(ResolvedSchema::resolve(&schema), Err(SchemaError::Alignment { bits: 11, .. })));
}

#[test]
fn misaligned_variable_message_is_accepted() {
    let schema = parse(&message(
        r#"{"name": "n", "type": "U3", "dependee": true}, {"name": "xs", "type": "U8[n]"}"#,
    ))
    .expect("parse");
    assert!(ResolvedSchema::resolve(&schema).is_ok());
}
