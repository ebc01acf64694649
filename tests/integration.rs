//! Integration tests: parse a specification, generate valid and invalid instances,
//! read them back, and write/load testcase directories.

use bitspec::codec::{decode, decode_with_lengths};
use bitspec::testcase::{LEDGER_FILE, TESTCASES_DIR};
use bitspec::{
    load_protocol, parse, BatchSize, Conformance, EmptyPoolPolicy, GenerateError, Generator, GeneratorConfig,
    Modifier, ResolvedSchema, Testcase, TestcaseError, TestcaseRequest, Value,
};
use std::fs;

const UDP_SPEC: &str = r#"{
  "protocol_types": [
    {
      "name": "UDP",
      "fields": [
        { "name": "SRC_PORT",  "type": "U16" },
        { "name": "DEST_PORT", "type": "U16" },
        { "name": "LENGTH",    "type": "U16", "value": "(1,512)", "dependee": true },
        { "name": "CHECKSUM",  "type": "U16" },
        { "name": "DATA",      "type": "U8[LENGTH]" }
      ]
    }
  ]
}"#;

const UDP_AND_PLAIN: &str = r#"{
  "protocol_types": [
    {
      "name": "UDP",
      "fields": [
        { "name": "LENGTH", "type": "U16", "value": "(1,32)", "dependee": true },
        { "name": "DATA",   "type": "U8[LENGTH]" }
      ]
    },
    {
      "name": "PLAIN",
      "fields": [
        { "name": "a", "type": "U8" },
        { "name": "b", "type": "U16" },
        { "name": "c", "type": "U32" }
      ]
    }
  ]
}"#;

const NESTED_SPEC: &str = r#"{
  "structs": [
    { "name": "Header", "members": [
        { "name": "version", "type": "U4", "value": "1" },
        { "name": "flags",   "type": "U4", "value": "0b0000|0b1000" } ] },
    { "name": "Item", "members": [
        { "name": "id",  "type": "U8", "value": "(1,9)" },
        { "name": "val", "type": "<I16" } ] }
  ],
  "protocol_types": [
    { "name": "LIST", "fields": [
        { "name": "hdr",   "type": "Header" },
        { "name": "items", "type": "Item[2]" },
        { "name": "crc",   "type": "U16", "strict": true } ] }
  ]
}"#;

fn resolved(source: &str) -> ResolvedSchema {
    ResolvedSchema::resolve(&parse(source).expect("parse")).expect("resolve")
}

fn seeded(seed: u64) -> GeneratorConfig {
    GeneratorConfig { seed: Some(seed), ..GeneratorConfig::default() }
}

fn list_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_list).map(<[Value]>::len).expect("array value")
}

#[test]
fn test_valid_udp_instances_conform() {
    let schema = resolved(UDP_SPEC);
    let message = schema.get_message("UDP").expect("UDP");
    let mut generator = Generator::new(&schema, seeded(1));
    for _ in 0..200 {
        let inst = generator.generate_valid("UDP").expect("valid");
        assert!(inst.is_valid());
        assert!(inst.corruption().is_none());
        assert!(inst.outcomes().iter().all(|o| o.validity.is_valid()));

        let length = inst.value("LENGTH").and_then(Value::as_u64).expect("LENGTH");
        assert!((1..=512).contains(&length), "LENGTH {}", length);
        assert_eq!(list_len(inst.value("DATA")) as u64, length);
        assert_eq!(inst.bytes().len() as u64, 8 + length);

        let decoded = decode(message, inst.bytes()).expect("decode");
        assert_eq!(decoded, inst.values());
    }
}

#[test]
fn test_invalid_udp_instances_break_exactly_one_field() {
    let schema = resolved(UDP_SPEC);
    let message = schema.get_message("UDP").expect("UDP");
    let mut generator = Generator::new(&schema, seeded(7));
    let mut seen = Vec::new();
    for _ in 0..1000 {
        let inst = generator.generate_invalid("UDP").expect("invalid");
        assert!(!inst.is_valid());
        let invalid: Vec<_> = inst.outcomes().iter().filter(|o| !o.validity.is_valid()).collect();
        assert_eq!(invalid.len(), 1);

        let length = inst.value("LENGTH").and_then(Value::as_u64).expect("LENGTH");
        let data_len = list_len(inst.value("DATA")) as u64;
        let (field, modifier) = inst.invalid_field().expect("invalid field");
        match (field, modifier) {
            ("LENGTH", Modifier::GreaterThanBounds) => {
                assert!(length > 512 && length <= 65535, "LENGTH {}", length);
                assert!((1..=512).contains(&data_len));
            }
            ("LENGTH", Modifier::LessThanBounds) => {
                assert_eq!(length, 0);
                assert!((1..=512).contains(&data_len));
            }
            ("DATA", Modifier::HighListLength) => {
                assert!((1..=512).contains(&length));
                assert!(data_len > length && data_len <= length + 4);
            }
            ("DATA", Modifier::LowListLength) => {
                assert!((1..=512).contains(&length));
                assert!(data_len < length);
            }
            other => panic!("unexpected corruption {:?}", other),
        }
        if !seen.contains(&modifier) {
            seen.push(modifier);
        }

        let decoded = decode_with_lengths(message, inst.bytes(), &inst.array_lengths()).expect("decode");
        assert_eq!(decoded, inst.values());
    }
    assert_eq!(seen.len(), 4, "modifiers seen: {:?}", seen);
}

#[test]
fn test_wide_dependee_invalid_batch_stays_bounded() {
    let schema = resolved(
        r#"{"protocol_types": [{"name": "WIDE", "fields": [
            {"name": "LENGTH", "type": "U32", "value": "(1,512)", "dependee": true},
            {"name": "DATA", "type": "U8[LENGTH]"}
        ]}]}"#,
    );
    let message = schema.get_message("WIDE").expect("WIDE");
    let request = TestcaseRequest::new("wide", BatchSize::Count(100), Conformance::Invalid);
    let testcase = Testcase::generate(&schema, seeded(1), &request).expect("generate");
    assert_eq!(testcase.instances().len(), 100);
    for inst in testcase.instances() {
        assert!(!inst.is_valid());
        assert!(list_len(inst.value("DATA")) <= 512 + 4);
        let decoded = decode_with_lengths(message, inst.bytes(), &inst.array_lengths()).expect("decode");
        assert_eq!(decoded, inst.values());
    }
}

#[test]
fn test_unconstrained_message_has_no_invalid_instances() {
    let schema = resolved(UDP_AND_PLAIN);
    let mut generator = Generator::new(&schema, seeded(3));
    match generator.generate_invalid("PLAIN") {
        Err(GenerateError::EmptyCandidatePool { message }) => assert_eq!(message, "PLAIN"),
        other => panic!("expected EmptyCandidatePool, got {:?}", other),
    }
    assert_eq!(generator.next_id(), 0);
    assert!(generator.generate_valid("PLAIN").expect("valid").is_valid());
}

#[test]
fn test_short_list_constraint_on_longer_array() {
    let schema = resolved(
        r#"{"protocol_types": [{"name": "P", "fields": [
            {"name": "xs", "type": "U8[8]", "value": ["1", "2", "3"]}
        ]}]}"#,
    );
    let mut generator = Generator::new(&schema, seeded(5));
    for _ in 0..100 {
        let inst = generator.generate_valid("P").expect("valid");
        let xs = inst.value("xs").and_then(Value::as_list).expect("xs");
        assert_eq!(xs.len(), 8);
        assert_eq!(&xs[..3], &[Value::Unsigned(1), Value::Unsigned(2), Value::Unsigned(3)]);
    }
}

#[test]
fn test_struct_expansion_and_generation() {
    let schema = resolved(NESTED_SPEC);
    let message = schema.get_message("LIST").expect("LIST");
    let names: Vec<&str> = message.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        ["hdr.version", "hdr.flags", "items[0].id", "items[0].val", "items[1].id", "items[1].val", "crc"]
    );
    assert_eq!(message.fixed_bits(), Some(8 + 2 * 24 + 16));

    let mut generator = Generator::new(&schema, seeded(9));
    for _ in 0..100 {
        let inst = generator.generate_valid("LIST").expect("valid");
        assert_eq!(inst.bytes().len(), 9);
        assert_eq!(inst.bytes()[0] >> 4, 1);
        assert!(matches!(inst.bytes()[0] & 0x0F, 0 | 8));
        assert_eq!(decode(message, inst.bytes()).expect("decode"), inst.values());

        let bad = generator.generate_invalid("LIST").expect("invalid");
        let (field, _) = bad.invalid_field().expect("invalid field");
        assert_ne!(field, "crc");
    }
}

#[test]
fn test_one_per_type_uses_declaration_order() {
    let schema = resolved(UDP_AND_PLAIN);
    let request = TestcaseRequest::new("smoke", BatchSize::OnePerType, Conformance::Valid);
    let testcase = Testcase::generate(&schema, seeded(1), &request).expect("generate");
    let types: Vec<&str> = testcase.instances().iter().map(|i| i.message_type()).collect();
    assert_eq!(types, ["UDP", "PLAIN"]);
    let ids: Vec<usize> = testcase.instances().iter().map(|i| i.id()).collect();
    assert_eq!(ids, [0, 1]);
}

#[test]
fn test_empty_pool_policies() {
    let schema = resolved(UDP_AND_PLAIN);
    let mut request = TestcaseRequest::new("bad", BatchSize::OnePerType, Conformance::Invalid);

    match Testcase::generate(&schema, seeded(2), &request) {
        Err(TestcaseError::Generate(GenerateError::EmptyCandidatePool { message })) => assert_eq!(message, "PLAIN"),
        other => panic!("expected abort, got {:?}", other.map(|t| t.instances().len())),
    }

    request.on_empty_pool = EmptyPoolPolicy::Skip;
    let skipped = Testcase::generate(&schema, seeded(2), &request).expect("skip");
    assert_eq!(skipped.instances().len(), 1);
    assert_eq!(skipped.instances()[0].message_type(), "UDP");
    assert!(!skipped.instances()[0].is_valid());

    request.on_empty_pool = EmptyPoolPolicy::SubstituteValid;
    let substituted = Testcase::generate(&schema, seeded(2), &request).expect("substitute");
    assert_eq!(substituted.instances().len(), 2);
    assert_eq!(substituted.instances()[1].message_type(), "PLAIN");
    assert_eq!(substituted.instances()[1].id(), 1);
    assert!(substituted.instances()[1].is_valid());
}

#[test]
fn test_testcase_write_and_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("protocol.json"), UDP_SPEC).expect("write protocol");
    let schema = ResolvedSchema::resolve(&load_protocol(dir.path()).expect("load")).expect("resolve");

    let request = TestcaseRequest::new("fuzz_01", BatchSize::Count(10), Conformance::Invalid);
    let testcase = Testcase::generate(&schema, seeded(11), &request).expect("generate");
    let out = testcase.write(dir.path()).expect("write");
    assert_eq!(out, dir.path().join(TESTCASES_DIR).join("fuzz_01"));

    let ledger = fs::read_to_string(out.join(LEDGER_FILE)).expect("ledger");
    assert_eq!(ledger, testcase.ledger_text());
    assert_eq!(ledger.lines().count(), 10);
    assert!(ledger.ends_with('\n'));
    assert!(ledger.lines().all(|l| l.starts_with("00") && l.contains(" - invalid - ")));

    let dump = fs::read_to_string(out.join("fuzz_01.xxd")).expect("xxd");
    assert!(dump.starts_with("[INVALID] 0 UDP\n00000000: "));
    assert!(!dump.ends_with('\n'));
    assert_eq!(dump.matches("[INVALID] ").count(), 10);

    let blobs = fs::read_dir(&out)
        .expect("read_dir")
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "bin"))
        .count();
    assert_eq!(blobs, 10);

    let entries: Vec<_> = fs::read_dir(dir.path().join(TESTCASES_DIR))
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name())
        .collect();
    assert_eq!(entries, ["fuzz_01"], "staging directory left behind");

    let loaded = Testcase::load(&out).expect("load");
    assert_eq!(loaded.name, "fuzz_01");
    assert_eq!(loaded.records.len(), 10);
    for (record, inst) in loaded.records.iter().zip(testcase.instances()) {
        assert_eq!(record.entry.id, inst.id());
        assert_eq!(record.entry.message_type, "UDP");
        assert!(!record.entry.is_valid());
        assert_eq!(record.bytes, inst.bytes());
    }
}

#[test]
fn test_existing_testcase_is_never_overwritten() {
    let dir = tempfile::tempdir().expect("tempdir");
    let schema = resolved(UDP_SPEC);
    let request = TestcaseRequest::new("once", BatchSize::Count(2), Conformance::Valid);
    let first = Testcase::generate(&schema, seeded(1), &request).expect("first");
    let out = first.write(dir.path()).expect("write");
    let before = fs::read_to_string(out.join(LEDGER_FILE)).expect("ledger");

    let second = Testcase::generate(&schema, seeded(2), &request).expect("second");
    assert!(matches!(second.write(dir.path()), Err(TestcaseError::OutputCollision(_))));
    assert_eq!(fs::read_to_string(out.join(LEDGER_FILE)).expect("ledger"), before);

    let leftovers: Vec<_> = fs::read_dir(dir.path().join(TESTCASES_DIR))
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "staging directory left behind: {:?}", leftovers);
}

#[test]
fn test_invalid_testcase_names_are_rejected() {
    let schema = resolved(UDP_SPEC);
    for name in ["", "../escape", ".hidden", "a/b"] {
        let request = TestcaseRequest::new(name, BatchSize::Count(1), Conformance::Valid);
        assert!(matches!(Testcase::generate(&schema, seeded(1), &request), Err(TestcaseError::InvalidName(_))));
    }
}

#[test]
fn test_protocol_directory_with_mission() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("protocol.json"), UDP_SPEC).expect("write protocol");
    fs::write(
        dir.path().join("mission.json"),
        r#"{"mission_types": [
            {"msg_name": "UDP", "fields": [{"field_name": "LENGTH", "value": "(1,4)"}]},
            {"msg_name": "UDP", "fields": [{"field_name": "SRC_PORT", "value": "53"}]}
        ]}"#,
    )
    .expect("write mission");

    let schema = ResolvedSchema::resolve(&load_protocol(dir.path()).expect("load")).expect("resolve");
    let names: Vec<&str> = schema.messages.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["UDP", "UDP_STATE_0", "UDP_STATE_1"]);
    assert_eq!(schema.get_message("UDP_STATE_1").expect("state 1").state_ids, vec![1]);

    let mut generator = Generator::new(&schema, seeded(4));
    for _ in 0..50 {
        let inst = generator.generate_valid("UDP_STATE_0").expect("valid");
        let length = inst.value("LENGTH").and_then(Value::as_u64).expect("LENGTH");
        assert!((1..=4).contains(&length));
        let inst = generator.generate_valid("UDP_STATE_1").expect("valid");
        assert_eq!(inst.value("SRC_PORT"), Some(&Value::Unsigned(53)));
    }
}

#[test]
fn test_empty_mission_file_is_ignored() {
    for mission in ["", "  \n", r#"{"mission_types": []}"#] {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("protocol.json"), UDP_SPEC).expect("write protocol");
        fs::write(dir.path().join("mission.json"), mission).expect("write mission");
        let schema = load_protocol(dir.path()).expect("load");
        let names: Vec<&str> = schema.message_types.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["UDP"], "mission {:?}", mission);
    }
}

#[test]
fn test_malformed_mission_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("protocol.json"), UDP_SPEC).expect("write protocol");
    fs::write(dir.path().join("mission.json"), "{\"mission_types\": [").expect("write mission");
    assert!(matches!(load_protocol(dir.path()), Err(bitspec::SchemaError::Json(_))));
}

#[test]
fn test_same_seed_same_testcase() {
    let schema = resolved(UDP_SPEC);
    let request = TestcaseRequest::new("repro", BatchSize::Count(25), Conformance::Invalid);
    let a = Testcase::generate(&schema, seeded(99), &request).expect("a");
    let b = Testcase::generate(&schema, seeded(99), &request).expect("b");
    assert_eq!(a.instances(), b.instances());
    assert_eq!(a.hexdump_text(), b.hexdump_text());
}
