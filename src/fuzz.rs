//! Instance generator: fills resolved messages with conformant values, or with
//! exactly one deliberately non-conformant field, and serializes them.

use crate::ast::{LeafField, ResolvedLength, ResolvedMessage, ResolvedSchema};
use crate::codec::{self, CodecError};
use crate::constraint::NotInvalidatable;
use crate::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

pub use crate::constraint::Modifier;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Message type {message} has no field that can be made invalid")]
    EmptyCandidatePool { message: String },
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),
    #[error("Schema declares no message types")]
    NoMessageTypes,
    #[error("{field}: array length {length} exceeds the limit of {limit}")]
    ArrayTooLong { field: String, length: u64, limit: u64 },
    #[error("Codec: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Fixed seed for a reproducible run; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Largest change applied to an array length when corrupting it.
    pub max_length_delta: u64,
    /// Upper bound on any generated array length.
    pub max_array_length: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig { seed: None, max_length_delta: 4, max_array_length: 1 << 20 }
    }
}

/// Requested (or resulting) conformance of a whole instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conformance {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(Modifier),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldOutcome {
    pub name: String,
    pub value: Value,
    pub validity: Validity,
}

/// The field chosen as corruption target and what was done to it. `ValidValue`
/// means the attempt degenerated and the field holds a conformant value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub field: String,
    pub modifier: Modifier,
}

/// One generated, serialized message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInstance {
    id: usize,
    message_type: String,
    outcomes: Vec<FieldOutcome>,
    corruption: Option<Corruption>,
    bytes: Vec<u8>,
}

impl MessageInstance {
    /// Assemble an instance from parts; `Generator` is the usual source.
    pub fn new(
        id: usize,
        message_type: impl Into<String>,
        outcomes: Vec<FieldOutcome>,
        corruption: Option<Corruption>,
        bytes: Vec<u8>,
    ) -> Self {
        MessageInstance { id, message_type: message_type.into(), outcomes, corruption, bytes }
    }

    /// Zero-based sequence id, unique within a generation run.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Name of the resolved message type this instance was built from.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// One outcome per leaf field, in field order.
    pub fn outcomes(&self) -> &[FieldOutcome] {
        &self.outcomes
    }

    /// The corruption attempt, for instances requested as invalid.
    pub fn corruption(&self) -> Option<&Corruption> {
        self.corruption.as_ref()
    }

    /// Serialized bytes, exactly as written to the `.bin` file.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Outcome of the leaf field with this dotted name.
    pub fn outcome(&self, name: &str) -> Option<&FieldOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Value of the leaf field with this dotted name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.outcome(name).map(|o| &o.value)
    }

    /// All field values in field order, as accepted by `codec::encode`.
    pub fn values(&self) -> Vec<Value> {
        self.outcomes.iter().map(|o| o.value.clone()).collect()
    }

    /// Invalid iff any field outcome is invalid.
    pub fn validity(&self) -> Conformance {
        if self.outcomes.iter().all(|o| o.validity.is_valid()) {
            Conformance::Valid
        } else {
            Conformance::Invalid
        }
    }

    /// Shorthand for `validity() == Conformance::Valid`.
    pub fn is_valid(&self) -> bool {
        self.validity() == Conformance::Valid
    }

    /// First invalid field and its modifier.
    pub fn invalid_field(&self) -> Option<(&str, Modifier)> {
        self.outcomes.iter().find_map(|o| match o.validity {
            Validity::Invalid(m) => Some((o.name.as_str(), m)),
            Validity::Valid => None,
        })
    }

    /// Actual element count of every array field, keyed by field index, for
    /// reading back instances whose lengths were perturbed.
    pub fn array_lengths(&self) -> HashMap<usize, u64> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.value.as_list().map(|l| (i, l.len() as u64)))
            .collect()
    }

    /// File stem: zero-padded id and message type.
    pub fn basename(&self) -> String {
        format!("{:04}_{}", self.id, self.message_type)
    }

    /// This instance's line in `results.txt`, without the newline.
    pub fn ledger_line(&self) -> String {
        match self.invalid_field() {
            None => format!("{} - valid", self.basename()),
            Some((field, m)) => format!("{} - invalid - {} - {}", self.basename(), field, m),
        }
    }
}

/// Fields eligible as corruption target: not strict, and either an array or a
/// scalar whose constraint leaves some value of its type uncovered.
pub fn candidate_pool(message: &ResolvedMessage) -> Vec<usize> {
    message
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.strict && (f.is_array() || f.constraint.is_invalidatable(&f.primitive)))
        .map(|(i, _)| i)
        .collect()
}

/// Per-run generator. Owns the random source and the id counter, so separate
/// generators never share state.
pub struct Generator<'s> {
    schema: &'s ResolvedSchema,
    rng: StdRng,
    config: GeneratorConfig,
    next_id: usize,
}

impl<'s> Generator<'s> {
    pub fn new(schema: &'s ResolvedSchema, config: GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Generator { schema, rng, config, next_id: 0 }
    }

    pub fn schema(&self) -> &'s ResolvedSchema {
        self.schema
    }

    /// Id the next emitted instance will get.
    pub fn next_id(&self) -> usize {
        self.next_id
    }

    pub fn message(&self, name: &str) -> Result<&'s ResolvedMessage, GenerateError> {
        self.schema.get_message(name).ok_or_else(|| GenerateError::UnknownMessage(name.to_string()))
    }

    /// Uniformly random message type.
    pub fn pick_message(&mut self) -> Result<&'s ResolvedMessage, GenerateError> {
        let schema = self.schema;
        let messages = &schema.messages;
        if messages.is_empty() {
            return Err(GenerateError::NoMessageTypes);
        }
        Ok(&messages[self.rng.gen_range(0..messages.len())])
    }

    pub fn generate(&mut self, message_type: &str, conformance: Conformance) -> Result<MessageInstance, GenerateError> {
        let message = self.message(message_type)?;
        self.generate_for(message, conformance)
    }

    pub fn generate_valid(&mut self, message_type: &str) -> Result<MessageInstance, GenerateError> {
        self.generate(message_type, Conformance::Valid)
    }

    pub fn generate_invalid(&mut self, message_type: &str) -> Result<MessageInstance, GenerateError> {
        self.generate(message_type, Conformance::Invalid)
    }

    /// Generate, serialize and number one instance. The id is consumed only on success.
    pub fn generate_for(
        &mut self,
        message: &ResolvedMessage,
        conformance: Conformance,
    ) -> Result<MessageInstance, GenerateError> {
        let target = match conformance {
            Conformance::Valid => None,
            Conformance::Invalid => {
                let pool = candidate_pool(message);
                if pool.is_empty() {
                    return Err(GenerateError::EmptyCandidatePool { message: message.name.clone() });
                }
                let target = pool[self.rng.gen_range(0..pool.len())];
                tracing::debug!(message_type = %message.name, field = %message.fields[target].name, pool = pool.len(), "corruption target");
                Some(target)
            }
        };

        let (outcomes, corruption) = self.fill(message, target)?;
        let values: Vec<Value> = outcomes.iter().map(|o| o.value.clone()).collect();
        let bytes = codec::encode(message, &values)?;

        let id = self.next_id;
        self.next_id += 1;
        Ok(MessageInstance::new(id, message.name.clone(), outcomes, corruption, bytes))
    }

    fn fill(
        &mut self,
        message: &ResolvedMessage,
        target: Option<usize>,
    ) -> Result<(Vec<FieldOutcome>, Option<Corruption>), GenerateError> {
        let mut outcomes: Vec<FieldOutcome> = Vec::with_capacity(message.fields.len());
        // Values array lengths are read from. A corrupted dependee contributes the
        // conformant value it would have had, so only the target field is broken.
        let mut conformant: Vec<Value> = Vec::with_capacity(message.fields.len());
        let mut corruption = None;
        for (i, field) in message.fields.iter().enumerate() {
            if target == Some(i) {
                let (value, modifier) = self.corrupt(field, &conformant)?;
                corruption = Some(Corruption { field: field.name.clone(), modifier });
                let validity = match modifier {
                    Modifier::ValidValue => Validity::Valid,
                    m => Validity::Invalid(m),
                };
                let shadow = if field.dependee && !validity.is_valid() {
                    let shadow = self.conform(field, &conformant)?;
                    tracing::debug!(field = %field.name, corrupted = %value, lengths_from = %shadow, "dependents keep conformant length");
                    shadow
                } else {
                    value.clone()
                };
                conformant.push(shadow);
                outcomes.push(FieldOutcome { name: field.name.clone(), value, validity });
            } else {
                let value = self.conform(field, &conformant)?;
                conformant.push(value.clone());
                outcomes.push(FieldOutcome { name: field.name.clone(), value, validity: Validity::Valid });
            }
        }
        Ok((outcomes, corruption))
    }

    /// Length an array would have in a valid instance, read from earlier conformant values.
    fn declared_length(&self, field: &LeafField, earlier: &[Value]) -> u64 {
        match field.length {
            Some(ResolvedLength::Fixed(n)) => n,
            Some(ResolvedLength::Dependee(d)) => codec::dependee_length(&earlier[d]),
            None => 1,
        }
    }

    fn sample_array(&mut self, field: &LeafField, length: u64) -> Result<Value, GenerateError> {
        let limit = self.config.max_array_length;
        if length > limit {
            return Err(GenerateError::ArrayTooLong { field: field.name.clone(), length, limit });
        }
        Ok(Value::List(field.constraint.sample_elements(&field.primitive, length as usize, &mut self.rng)))
    }

    fn conform(&mut self, field: &LeafField, earlier: &[Value]) -> Result<Value, GenerateError> {
        if field.is_array() {
            let length = self.declared_length(field, earlier);
            self.sample_array(field, length)
        } else {
            Ok(field.constraint.sample(&field.primitive, &mut self.rng))
        }
    }

    fn corrupt(&mut self, field: &LeafField, earlier: &[Value]) -> Result<(Value, Modifier), GenerateError> {
        if field.is_array() {
            let base = self.declared_length(field, earlier);
            let max_delta = self.config.max_length_delta.max(1);
            let (length, modifier) = if base == 0 || self.rng.gen_bool(0.5) {
                (base.saturating_add(self.rng.gen_range(1..=max_delta)), Modifier::HighListLength)
            } else {
                (base - self.rng.gen_range(1..=max_delta.min(base)), Modifier::LowListLength)
            };
            tracing::debug!(field = %field.name, base, length, %modifier, "array length perturbed");
            return Ok((self.sample_array(field, length)?, modifier));
        }
        match field.constraint.violate(&field.primitive, &mut self.rng) {
            Ok((value, modifier)) => {
                tracing::debug!(field = %field.name, %value, %modifier, "scalar violated");
                Ok((value, modifier))
            }
            Err(NotInvalidatable) => {
                tracing::warn!(field = %field.name, constraint = %field.constraint, "no invalid value exists, keeping a valid one");
                Ok((field.constraint.sample(&field.primitive, &mut self.rng), Modifier::ValidValue))
            }
        }
    }
}
