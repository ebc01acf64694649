//! Specification fuzz target: feed arbitrary text to the document and constraint
//! parsers. Documents that resolve are also generated from and decoded back.
//! Neither step may panic.
//! Build with: cargo fuzz run spec_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = bitspec::parse_constraint(s);
    let _ = bitspec::parse_type(s);
    let Ok(schema) = bitspec::parse(s) else { return };
    let Ok(resolved) = bitspec::ResolvedSchema::resolve(&schema) else { return };
    let config = bitspec::GeneratorConfig { seed: Some(0), max_array_length: 4096, ..Default::default() };
    let mut generator = bitspec::Generator::new(&resolved, config);
    for message in &resolved.messages {
        if let Ok(inst) = generator.generate_for(message, bitspec::Conformance::Valid) {
            let decoded = bitspec::codec::decode(message, inst.bytes()).expect("valid instance decodes");
            assert_eq!(decoded, inst.values());
        }
        let _ = generator.generate_for(message, bitspec::Conformance::Invalid);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run spec_fuzz");
}
