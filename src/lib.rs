//! # bitspec: declarative binary messages, bit-exact codec, corruption-aware test data
//!
//! Describe a binary message format in a JSON specification document, resolve it into
//! a flat bit layout, and generate conformant and deliberately non-conformant instances
//! for exercising parsers.
//!
//! ## Specification document
//!
//! ```text
//! {
//!   "structs": [
//!     { "name": "Header", "members": [
//!         { "name": "version", "type": "U4", "value": "1" },
//!         { "name": "flags",   "type": "U4" } ] }
//!   ],
//!   "protocol_types": [
//!     { "name": "UDP", "fields": [
//!         { "name": "hdr",      "type": "Header" },
//!         { "name": "SRC_PORT", "type": "<U16" },
//!         { "name": "LENGTH",   "type": "U16", "value": "(1,512)", "dependee": true },
//!         { "name": "DATA",     "type": "U8[LENGTH]" } ] }
//!   ]
//! }
//! ```
//!
//! ## Field types
//!
//! - `U<n>` / `I<n>` for 1..=64 bits, `F32`; a leading `<` selects little endian
//! - struct names; `T[n]` fixed arrays and `T[FIELD]` arrays sized by a dependee
//!
//! ## Constraints
//!
//! `5`, `0x7E`, `0b101`, `'a'`, `(min,max)`, `a|b|(c,d)`, `[a,(b,c),d]`, `[1,2]|[3,4]`
//!
//! ## Pipeline
//!
//! [`parser::parse`] → [`ResolvedSchema::resolve`] → [`Generator`] → [`codec::encode`] →
//! [`Testcase::write`]. See `tests/integration.rs` for full examples.

pub mod ast;
pub mod codec;
pub mod constraint;
pub mod dump;
pub mod fuzz;
pub mod lint;
pub mod mission;
pub mod parser;
pub mod testcase;
pub mod value;

pub use ast::{ResolvedMessage, ResolvedSchema, Schema, SchemaError};
pub use codec::{Codec, CodecError};
pub use constraint::{Constraint, Modifier, NotInvalidatable};
pub use fuzz::{Conformance, GenerateError, Generator, GeneratorConfig, MessageInstance, Validity};
pub use mission::MissionSpec;
pub use parser::{load_protocol, parse, parse_constraint, parse_file, parse_type};
pub use testcase::{BatchSize, EmptyPoolPolicy, LedgerEntry, Testcase, TestcaseError, TestcaseRequest};
pub use value::Value;
