//! Bit-exact encoding and decoding of resolved messages.
//!
//! Fields are packed back to back, most-significant bit first, using exactly their
//! declared width. Little-endian fields whose width is a whole number of bytes have
//! their own bytes swapped before packing. A message that ends off a byte boundary
//! (only possible when array lengths vary) is zero-padded.

use crate::ast::*;
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),
    #[error("{message}: expected {expected} values, got {got}")]
    FieldCount { message: String, expected: usize, got: usize },
    #[error("{field}: value {value} does not fit {ty}")]
    ValueMismatch { field: String, value: String, ty: String },
    #[error("{field}: needs {needed} bits, {remaining} remaining")]
    Truncated { field: String, needed: u128, remaining: u64 },
    #[error("{message}: {bytes} trailing bytes")]
    TrailingData { message: String, bytes: u64 },
}

/// Append-only bit buffer, MSB first within each byte.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    used: u8, // bits filled in `cur`, 0..8
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> u64 {
        self.bytes.len() as u64 * 8 + self.used as u64
    }

    /// Write the low `width` bits of `value` (width 1..=64).
    pub fn write_bits(&mut self, value: u64, width: u32) {
        let mut remaining = width;
        while remaining > 0 {
            let free = 8 - self.used as u32;
            let take = free.min(remaining);
            let chunk = ((value >> (remaining - take)) & low_mask(take)) as u8;
            self.cur |= chunk << (free - take);
            self.used += take as u8;
            remaining -= take;
            if self.used == 8 {
                self.bytes.push(self.cur);
                self.cur = 0;
                self.used = 0;
            }
        }
    }

    /// Flush, zero-padding the last partial byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.bytes.push(self.cur);
        }
        self.bytes
    }
}

/// Reads bits MSB first from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.bytes.len() as u64 * 8 - self.pos
    }

    /// Read `width` bits (1..=64) as an unsigned value. `None` if not enough bits remain.
    pub fn read_bits(&mut self, width: u32) -> Option<u64> {
        if (width as u64) > self.remaining() {
            return None;
        }
        let mut out = 0u64;
        let mut remaining = width;
        while remaining > 0 {
            let byte = self.bytes[(self.pos / 8) as usize] as u64;
            let avail = 8 - (self.pos % 8) as u32;
            let take = avail.min(remaining);
            let chunk = (byte >> (avail - take)) & low_mask(take);
            out = (out << take) | chunk;
            self.pos += take as u64;
            remaining -= take;
        }
        Some(out)
    }
}

fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Swap the bytes of a `width`-bit value (width a multiple of 8). Self-inverse.
fn swap_bytes(raw: u64, width: u32) -> u64 {
    let n = (width / 8) as usize;
    let mut buf = [0u8; 8];
    BigEndian::write_uint(&mut buf[..n], raw, n);
    LittleEndian::read_uint(&buf[..n], n)
}

fn mismatch(field: &LeafField, value: &Value) -> CodecError {
    CodecError::ValueMismatch {
        field: field.name.clone(),
        value: value.to_string(),
        ty: field.primitive.to_string(),
    }
}

fn to_raw(field: &LeafField, value: &Value) -> Result<u64, CodecError> {
    let p = &field.primitive;
    let raw = match (p.kind, value) {
        (NumericKind::Float, Value::Float(f)) => f.to_bits() as u64,
        (NumericKind::Float, _) | (_, Value::Float(_)) | (_, Value::List(_)) => return Err(mismatch(field, value)),
        (_, v) => {
            let n = v.as_i128().ok_or_else(|| mismatch(field, value))?;
            let (lo, hi) = p.int_bounds();
            if n < lo || n > hi {
                return Err(mismatch(field, value));
            }
            (n as i64 as u64) & low_mask(p.width)
        }
    };
    Ok(if p.reorders_bytes() { swap_bytes(raw, p.width) } else { raw })
}

fn from_raw(p: &PrimitiveType, raw: u64) -> Value {
    let raw = if p.reorders_bytes() { swap_bytes(raw, p.width) } else { raw };
    match p.kind {
        NumericKind::Unsigned => Value::Unsigned(raw),
        NumericKind::Signed => {
            let shift = 64 - p.width;
            Value::Signed(((raw << shift) as i64) >> shift)
        }
        NumericKind::Float => Value::Float(f32::from_bits(raw as u32)),
    }
}

/// Serialize one value per leaf field, in field order. Array values are emitted
/// element by element; their length is not checked against the dependee.
pub fn encode(message: &ResolvedMessage, values: &[Value]) -> Result<Vec<u8>, CodecError> {
    if values.len() != message.fields.len() {
        return Err(CodecError::FieldCount {
            message: message.name.clone(),
            expected: message.fields.len(),
            got: values.len(),
        });
    }
    let mut w = BitWriter::new();
    for (field, value) in message.fields.iter().zip(values) {
        if field.is_array() {
            let items = value.as_list().ok_or_else(|| mismatch(field, value))?;
            for item in items {
                w.write_bits(to_raw(field, item)?, field.primitive.width);
            }
        } else {
            w.write_bits(to_raw(field, value)?, field.primitive.width);
        }
    }
    Ok(w.finish())
}

/// Inverse of [`encode`]: array lengths come from the declared literal or the
/// already-decoded dependee value (negative values read as zero).
pub fn decode(message: &ResolvedMessage, bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    decode_with_lengths(message, bytes, &HashMap::new())
}

/// Like [`decode`], with explicit element counts for some array fields (keyed by
/// field index). Used to read back instances whose array length was perturbed.
pub fn decode_with_lengths(
    message: &ResolvedMessage,
    bytes: &[u8],
    lengths: &HashMap<usize, u64>,
) -> Result<Vec<Value>, CodecError> {
    let mut r = BitReader::new(bytes);
    let mut out: Vec<Value> = Vec::with_capacity(message.fields.len());
    for (i, field) in message.fields.iter().enumerate() {
        let width = field.primitive.width;
        let truncated = |needed: u128, remaining: u64| CodecError::Truncated {
            field: field.name.clone(),
            needed,
            remaining,
        };
        match field.length {
            None => {
                let raw = r.read_bits(width).ok_or_else(|| truncated(width as u128, r.remaining()))?;
                out.push(from_raw(&field.primitive, raw));
            }
            Some(length) => {
                let count = match (lengths.get(&i), length) {
                    (Some(n), _) => *n,
                    (None, ResolvedLength::Fixed(n)) => n,
                    (None, ResolvedLength::Dependee(d)) => dependee_length(&out[d]),
                };
                let needed = count as u128 * width as u128;
                if needed > r.remaining() as u128 {
                    return Err(truncated(needed, r.remaining()));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let raw = r.read_bits(width).ok_or_else(|| truncated(width as u128, r.remaining()))?;
                    items.push(from_raw(&field.primitive, raw));
                }
                out.push(Value::List(items));
            }
        }
    }
    if r.remaining() >= 8 {
        return Err(CodecError::TrailingData { message: message.name.clone(), bytes: r.remaining() / 8 });
    }
    Ok(out)
}

/// Element count implied by a dependee value.
pub fn dependee_length(value: &Value) -> u64 {
    value.as_i128().map(|n| n.clamp(0, u64::MAX as i128) as u64).unwrap_or(0)
}

/// Encoder/decoder bound to a resolved schema, addressing messages by name.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'a> {
    schema: &'a ResolvedSchema,
}

impl<'a> Codec<'a> {
    pub fn new(schema: &'a ResolvedSchema) -> Self {
        Codec { schema }
    }

    fn message(&self, name: &str) -> Result<&'a ResolvedMessage, CodecError> {
        self.schema.get_message(name).ok_or_else(|| CodecError::UnknownMessage(name.to_string()))
    }

    pub fn encode_message(&self, message_name: &str, values: &[Value]) -> Result<Vec<u8>, CodecError> {
        encode(self.message(message_name)?, values)
    }

    pub fn decode_message(&self, message_name: &str, bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
        decode(self.message(message_name)?, bytes)
    }

    /// Decode into a map keyed by leaf field name.
    pub fn decode_named(&self, message_name: &str, bytes: &[u8]) -> Result<HashMap<String, Value>, CodecError> {
        let message = self.message(message_name)?;
        let values = decode(message, bytes)?;
        Ok(message.fields.iter().map(|f| f.name.clone()).zip(values).collect())
    }
}
