//! Constraint tree for field values, and the sampling / violating operations the
//! generator uses to produce conformant and non-conformant values.
//!
//! Integer arithmetic is done in `i128` so that the full `U64` and `I64` domains
//! (and their complements) are representable without overflow.

use crate::ast::{NumericKind, PrimitiveType};
use crate::value::Value;
use rand::Rng;

/// Literal in a constraint expression. Integer literals on float fields are
/// widened when the constraint is checked against its field type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i128),
    Float(f64),
}

impl Scalar {
    fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(i) => *i as f64,
            Scalar::Float(f) => *f,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Any bit pattern of the field's width.
    None,
    Exact(Scalar),
    /// Inclusive bounds.
    Range { min: Scalar, max: Scalar },
    /// One of several alternatives: all scalar (`Exact`/`Range`), or all `List`.
    Choice(Vec<Constraint>),
    /// Per-position constraints for an array; positions past the end are unconstrained.
    List(Vec<Constraint>),
}

/// How a generated value was made to break its constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    GreaterThanBounds,
    LessThanBounds,
    HighListLength,
    LowListLength,
    InvalidValue,
    /// Corruption was attempted but no invalid value existed.
    ValidValue,
}

impl Modifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::GreaterThanBounds => "GREATER_THAN_BOUNDS",
            Modifier::LessThanBounds => "LESS_THAN_BOUNDS",
            Modifier::HighListLength => "HIGH_LIST_LENGTH",
            Modifier::LowListLength => "LOW_LIST_LENGTH",
            Modifier::InvalidValue => "INVALID_VALUE",
            Modifier::ValidValue => "VALID_VALUE",
        }
    }
}

impl std::fmt::Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "GREATER_THAN_BOUNDS" => Modifier::GreaterThanBounds,
            "LESS_THAN_BOUNDS" => Modifier::LessThanBounds,
            "HIGH_LIST_LENGTH" => Modifier::HighListLength,
            "LOW_LIST_LENGTH" => Modifier::LowListLength,
            "INVALID_VALUE" => Modifier::InvalidValue,
            "VALID_VALUE" => Modifier::ValidValue,
            other => return Err(format!("unknown modifier: {}", other)),
        })
    }
}

/// No value of the field's type breaks the constraint. A signal to pick another
/// field, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("constraint admits every value of its type")]
pub struct NotInvalidatable;

const FLOAT_ATTEMPTS: usize = 256;

impl Constraint {
    pub fn is_none(&self) -> bool {
        matches!(self, Constraint::None)
    }

    /// List constraints, or a choice between lists: only valid on array fields.
    pub fn is_list(&self) -> bool {
        match self {
            Constraint::List(_) => true,
            Constraint::Choice(alts) => alts.iter().any(Constraint::is_list),
            _ => false,
        }
    }

    /// Check literals against the field type and widen integer literals on float
    /// fields. Returns a description of the first problem found.
    pub fn check(&self, ty: &PrimitiveType) -> Result<Constraint, String> {
        Ok(match self {
            Constraint::None => Constraint::None,
            Constraint::Exact(s) => Constraint::Exact(check_scalar(*s, ty)?),
            Constraint::Range { min, max } => {
                let min = check_scalar(*min, ty)?;
                let max = check_scalar(*max, ty)?;
                if min.as_f64() > max.as_f64() {
                    return Err(format!("range lower bound {} is greater than upper bound {}", min, max));
                }
                Constraint::Range { min, max }
            }
            Constraint::Choice(alts) => {
                let lists = alts.iter().filter(|a| a.is_list()).count();
                if lists != 0 && lists != alts.len() {
                    return Err("choice cannot mix lists and scalar values".to_string());
                }
                Constraint::Choice(alts.iter().map(|a| a.check(ty)).collect::<Result<_, _>>()?)
            }
            Constraint::List(items) => {
                if items.iter().any(Constraint::is_list) {
                    return Err("lists cannot be nested".to_string());
                }
                Constraint::List(items.iter().map(|a| a.check(ty)).collect::<Result<_, _>>()?)
            }
        })
    }

    /// Allowed integer values as sorted, merged, inclusive intervals.
    /// `None` for unconstrained and list constraints.
    pub fn int_intervals(&self) -> Option<Vec<(i128, i128)>> {
        let mut raw = Vec::new();
        collect_int_intervals(self, &mut raw)?;
        Some(merge_intervals(raw))
    }

    fn float_intervals(&self) -> Option<Vec<(f64, f64)>> {
        let mut raw = Vec::new();
        collect_float_intervals(self, &mut raw)?;
        Some(raw)
    }

    /// Whether a scalar field with this constraint can be given a non-conformant value.
    pub fn is_invalidatable(&self, ty: &PrimitiveType) -> bool {
        if self.is_list() || self.is_none() {
            return false;
        }
        match ty.kind {
            NumericKind::Float => match self.float_intervals() {
                Some(iv) => !iv.iter().any(|&(lo, hi)| lo <= -(f32::MAX as f64) && hi >= f32::MAX as f64),
                None => false,
            },
            _ => match self.int_intervals() {
                Some(iv) => !complement(&iv, ty.int_bounds()).is_empty(),
                None => false,
            },
        }
    }

    /// Largest value an integer field can take while conforming.
    pub fn int_upper_bound(&self, ty: &PrimitiveType) -> i128 {
        let (_, tmax) = ty.int_bounds();
        self.int_intervals()
            .and_then(|iv| iv.last().map(|&(_, hi)| hi))
            .unwrap_or(tmax)
    }

    /// Draw a conformant scalar value.
    pub fn sample<R: Rng + ?Sized>(&self, ty: &PrimitiveType, rng: &mut R) -> Value {
        match self {
            Constraint::None | Constraint::List(_) => sample_domain(ty, rng),
            Constraint::Exact(s) => scalar_value(ty, *s),
            Constraint::Range { min, max } => match ty.kind {
                NumericKind::Float => Value::Float(uniform_f32(min.as_f64(), max.as_f64(), rng)),
                _ => Value::from_int(ty, rng.gen_range(as_int(*min)..=as_int(*max))),
            },
            Constraint::Choice(alts) => {
                // Integers: uniform over the union of alternatives, not per alternative.
                if ty.is_integer() {
                    if let Some(n) = self.int_intervals().and_then(|iv| sample_intervals(&iv, rng)) {
                        return Value::from_int(ty, n);
                    }
                }
                let alt = &alts[rng.gen_range(0..alts.len())];
                alt.sample(ty, rng)
            }
        }
    }

    /// Draw `len` conformant elements for an array field. List constraints apply per
    /// position; scalar constraints apply to every element.
    pub fn sample_elements<R: Rng + ?Sized>(&self, ty: &PrimitiveType, len: usize, rng: &mut R) -> Vec<Value> {
        match self {
            Constraint::List(items) => (0..len)
                .map(|i| match items.get(i) {
                    Some(c) => c.sample(ty, rng),
                    None => sample_domain(ty, rng),
                })
                .collect(),
            Constraint::Choice(alts) if self.is_list() => {
                let alt = &alts[rng.gen_range(0..alts.len())];
                alt.sample_elements(ty, len, rng)
            }
            other => (0..len).map(|_| other.sample(ty, rng)).collect(),
        }
    }

    /// Produce a scalar value that breaks the constraint, and the strategy used.
    pub fn violate<R: Rng + ?Sized>(&self, ty: &PrimitiveType, rng: &mut R) -> Result<(Value, Modifier), NotInvalidatable> {
        match self {
            Constraint::None | Constraint::List(_) => Err(NotInvalidatable),
            Constraint::Choice(_) if self.is_list() => Err(NotInvalidatable),
            Constraint::Range { min, max } => match ty.kind {
                NumericKind::Float => violate_float_range(min.as_f64(), max.as_f64(), rng),
                _ => violate_int_range(ty, as_int(*min), as_int(*max), rng),
            },
            Constraint::Exact(_) | Constraint::Choice(_) => match ty.kind {
                NumericKind::Float => {
                    let allowed = self.float_intervals().ok_or(NotInvalidatable)?;
                    sample_float_outside(&allowed, rng)
                        .map(|f| (Value::Float(f), Modifier::InvalidValue))
                        .ok_or(NotInvalidatable)
                }
                _ => {
                    let allowed = self.int_intervals().ok_or(NotInvalidatable)?;
                    let outside = complement(&allowed, ty.int_bounds());
                    let n = sample_intervals(&outside, rng).ok_or(NotInvalidatable)?;
                    Ok((Value::from_int(ty, n), Modifier::InvalidValue))
                }
            },
        }
    }

    /// Whether `value` conforms. Arrays are checked element-wise; length is not
    /// part of a constraint.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Constraint::None, _) => true,
            (Constraint::List(items), Value::List(values)) => {
                values.iter().zip(items.iter()).all(|(v, c)| c.accepts(v))
            }
            (Constraint::Choice(alts), _) => alts.iter().any(|a| a.accepts(value)),
            (_, Value::List(values)) => values.iter().all(|v| self.accepts(v)),
            (Constraint::Exact(s), v) => scalar_matches(v, *s, *s),
            (Constraint::Range { min, max }, v) => scalar_matches(v, *min, *max),
            (Constraint::List(_), _) => false,
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::None => write!(f, "*"),
            Constraint::Exact(s) => write!(f, "{}", s),
            Constraint::Range { min, max } => write!(f, "({},{})", min, max),
            Constraint::Choice(alts) => {
                for (i, a) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", a)?;
                }
                Ok(())
            }
            Constraint::List(items) => {
                write!(f, "[")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn check_scalar(s: Scalar, ty: &PrimitiveType) -> Result<Scalar, String> {
    match (ty.kind, s) {
        (NumericKind::Float, Scalar::Int(i)) => Ok(Scalar::Float(i as f64)),
        (NumericKind::Float, Scalar::Float(f)) => {
            if f.is_finite() && f.abs() <= f32::MAX as f64 {
                Ok(Scalar::Float(f))
            } else {
                Err(format!("value {} does not fit in {}", f, ty))
            }
        }
        (_, Scalar::Float(f)) => Err(format!("float value {} given for integer type {}", f, ty)),
        (_, Scalar::Int(i)) => {
            let (lo, hi) = ty.int_bounds();
            if i < lo || i > hi {
                Err(format!("value {} is out of bounds for {} ({}..={})", i, ty, lo, hi))
            } else {
                Ok(Scalar::Int(i))
            }
        }
    }
}

fn as_int(s: Scalar) -> i128 {
    match s {
        Scalar::Int(i) => i,
        Scalar::Float(f) => f as i128,
    }
}

fn scalar_value(ty: &PrimitiveType, s: Scalar) -> Value {
    match ty.kind {
        NumericKind::Float => Value::Float(s.as_f64() as f32),
        _ => Value::from_int(ty, as_int(s)),
    }
}

fn scalar_matches(v: &Value, min: Scalar, max: Scalar) -> bool {
    match v {
        Value::Float(f) => {
            let f = *f as f64;
            f >= (min.as_f64() as f32) as f64 && f <= (max.as_f64() as f32) as f64
        }
        other => match other.as_i128() {
            Some(n) => n >= as_int(min) && n <= as_int(max),
            None => false,
        },
    }
}

fn collect_int_intervals(c: &Constraint, out: &mut Vec<(i128, i128)>) -> Option<()> {
    match c {
        Constraint::Exact(s) => out.push((as_int(*s), as_int(*s))),
        Constraint::Range { min, max } => out.push((as_int(*min), as_int(*max))),
        Constraint::Choice(alts) => {
            for a in alts {
                collect_int_intervals(a, out)?;
            }
        }
        Constraint::None | Constraint::List(_) => return None,
    }
    Some(())
}

fn collect_float_intervals(c: &Constraint, out: &mut Vec<(f64, f64)>) -> Option<()> {
    match c {
        Constraint::Exact(s) => {
            let f = (s.as_f64() as f32) as f64;
            out.push((f, f));
        }
        Constraint::Range { min, max } => out.push(((min.as_f64() as f32) as f64, (max.as_f64() as f32) as f64)),
        Constraint::Choice(alts) => {
            for a in alts {
                collect_float_intervals(a, out)?;
            }
        }
        Constraint::None | Constraint::List(_) => return None,
    }
    Some(())
}

fn merge_intervals(mut raw: Vec<(i128, i128)>) -> Vec<(i128, i128)> {
    raw.sort_unstable();
    let mut out: Vec<(i128, i128)> = Vec::with_capacity(raw.len());
    for (lo, hi) in raw {
        match out.last_mut() {
            Some(last) if lo <= last.1 + 1 => last.1 = last.1.max(hi),
            _ => out.push((lo, hi)),
        }
    }
    out
}

/// Values of `[lo, hi]` not covered by the sorted, merged `allowed` intervals.
pub(crate) fn complement(allowed: &[(i128, i128)], (lo, hi): (i128, i128)) -> Vec<(i128, i128)> {
    let mut out = Vec::new();
    let mut next = lo;
    for &(a, b) in allowed {
        if a > next {
            out.push((next, (a - 1).min(hi)));
        }
        next = next.max(b + 1);
        if next > hi {
            return out;
        }
    }
    if next <= hi {
        out.push((next, hi));
    }
    out
}

/// Uniform over the union of disjoint inclusive intervals.
fn sample_intervals<R: Rng + ?Sized>(intervals: &[(i128, i128)], rng: &mut R) -> Option<i128> {
    let total: u128 = intervals.iter().map(|&(lo, hi)| (hi - lo) as u128 + 1).sum();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for &(lo, hi) in intervals {
        let size = (hi - lo) as u128 + 1;
        if pick < size {
            return Some(lo + pick as i128);
        }
        pick -= size;
    }
    None
}

fn sample_domain<R: Rng + ?Sized>(ty: &PrimitiveType, rng: &mut R) -> Value {
    match ty.kind {
        NumericKind::Float => Value::Float(random_finite_f32(rng)),
        _ => {
            let (lo, hi) = ty.int_bounds();
            Value::from_int(ty, rng.gen_range(lo..=hi))
        }
    }
}

fn violate_int_range<R: Rng + ?Sized>(
    ty: &PrimitiveType,
    min: i128,
    max: i128,
    rng: &mut R,
) -> Result<(Value, Modifier), NotInvalidatable> {
    let (tmin, tmax) = ty.int_bounds();
    let above = max < tmax;
    let below = min > tmin;
    let go_above = match (above, below) {
        (false, false) => return Err(NotInvalidatable),
        (true, false) => true,
        (false, true) => false,
        (true, true) => rng.gen_bool(0.5),
    };
    if go_above {
        Ok((Value::from_int(ty, rng.gen_range(max + 1..=tmax)), Modifier::GreaterThanBounds))
    } else {
        Ok((Value::from_int(ty, rng.gen_range(tmin..=min - 1)), Modifier::LessThanBounds))
    }
}

fn violate_float_range<R: Rng + ?Sized>(min: f64, max: f64, rng: &mut R) -> Result<(Value, Modifier), NotInvalidatable> {
    let (min, max) = (min as f32, max as f32);
    let above = max < f32::MAX;
    let below = min > -f32::MAX;
    let go_above = match (above, below) {
        (false, false) => return Err(NotInvalidatable),
        (true, false) => true,
        (false, true) => false,
        (true, true) => rng.gen_bool(0.5),
    };
    if go_above {
        let v = uniform_f32(max as f64, f32::MAX as f64, rng);
        let v = if v > max { v } else { next_up(max) };
        Ok((Value::Float(v), Modifier::GreaterThanBounds))
    } else {
        let v = uniform_f32(-(f32::MAX as f64), min as f64, rng);
        let v = if v < min { v } else { -next_up(-min) };
        Ok((Value::Float(v), Modifier::LessThanBounds))
    }
}

fn sample_float_outside<R: Rng + ?Sized>(allowed: &[(f64, f64)], rng: &mut R) -> Option<f32> {
    let outside = |f: f32| !allowed.iter().any(|&(lo, hi)| (f as f64) >= lo && (f as f64) <= hi);
    for _ in 0..FLOAT_ATTEMPTS {
        let f = random_finite_f32(rng);
        if outside(f) {
            return Some(f);
        }
    }
    [f32::MAX, -f32::MAX, 0.0].into_iter().find(|&f| outside(f))
}

/// Uniform in `[lo, hi]`, computed in `f64` so spans wider than `f32::MAX` do not overflow.
fn uniform_f32<R: Rng + ?Sized>(lo: f64, hi: f64, rng: &mut R) -> f32 {
    let t: f64 = rng.gen();
    let v = (lo + (hi - lo) * t) as f32;
    v.clamp(lo as f32, hi as f32)
}

/// Any finite `f32` bit pattern.
fn random_finite_f32<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    loop {
        let f = f32::from_bits(rng.gen::<u32>());
        if f.is_finite() {
            return f;
        }
    }
}

fn next_up(x: f32) -> f32 {
    if x.is_nan() || x == f32::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f32::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}
