//! Runtime values bound to fields during generation and encoding/decoding.

use crate::ast::{NumericKind, PrimitiveType};

/// A concrete value for one leaf field: a scalar, or the elements of an array field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    List(Vec<Value>),
}

impl Value {
    /// Build an integer value of the right signedness for `ty`. The caller guarantees
    /// `n` is inside the type's domain.
    pub fn from_int(ty: &PrimitiveType, n: i128) -> Value {
        match ty.kind {
            NumericKind::Signed => Value::Signed(n as i64),
            _ => Value::Unsigned(n as u64),
        }
    }

    /// Integer value as `u64`; `None` for negative, float, or list values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(x) => Some(*x),
            Value::Signed(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    /// Integer value as `i64`; `None` if it does not fit, or for float and list values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(x) => Some(*x),
            Value::Unsigned(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    /// Integer view wide enough for both signed and unsigned 64-bit values.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Unsigned(x) => Some(*x as i128),
            Value::Signed(x) => Some(*x as i128),
            _ => None,
        }
    }

    /// Float value; integers are not converted.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unsigned(x) => write!(f, "{}", x),
            Value::Signed(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
