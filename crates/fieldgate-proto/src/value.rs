// ── Typed node values ──
//
// Controllers declare a protocol type per data point; fieldgate keeps
// values typed internally and stringifies only at the wire boundary.
// Coercion turns loosely-typed JSON input from the write surface into a
// value of the node's declared type, or fails -- it never guesses.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared protocol type of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Boolean,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Text,
}

impl NodeType {
    /// Inclusive bounds for signed integer types.
    fn signed_bounds(self) -> Option<(i64, i64)> {
        match self {
            Self::Int16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::Int32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Inclusive upper bound for unsigned integer types.
    fn unsigned_max(self) -> Option<u64> {
        match self {
            Self::UInt16 => Some(u64::from(u16::MAX)),
            Self::UInt32 => Some(u64::from(u32::MAX)),
            Self::UInt64 => Some(u64::MAX),
            _ => None,
        }
    }
}

/// A typed runtime value, mirroring [`NodeType`].
///
/// Signed widths collapse to `Integer`, unsigned widths to `Unsigned`,
/// and both float widths to `Float` -- the declared [`NodeType`] on the
/// descriptor keeps the wire width for writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeValue {
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

/// Why a JSON input could not be coerced to a declared node type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("cannot represent {input} as {target:?}")]
    Incompatible { target: NodeType, input: String },

    #[error("value {input} is out of range for {target:?}")]
    OutOfRange { target: NodeType, input: String },
}

impl NodeValue {
    /// Coerce a JSON input value to `target`.
    ///
    /// Accepts the conversions the write surface has always allowed:
    /// numeric strings parse into numeric types, integral floats into
    /// integer types, and 0/1 or "true"/"false" into booleans. Anything
    /// lossy or ambiguous is an error.
    pub fn coerce(target: NodeType, raw: &serde_json::Value) -> Result<Self, CoerceError> {
        let incompatible = || CoerceError::Incompatible {
            target,
            input: raw.to_string(),
        };
        let out_of_range = || CoerceError::OutOfRange {
            target,
            input: raw.to_string(),
        };

        match target {
            NodeType::Boolean => coerce_bool(raw).map(Self::Boolean).ok_or_else(incompatible),

            NodeType::Int16 | NodeType::Int32 | NodeType::Int64 => {
                let v = coerce_signed(raw).ok_or_else(incompatible)?;
                let (min, max) = target.signed_bounds().unwrap_or((i64::MIN, i64::MAX));
                if v < min || v > max {
                    return Err(out_of_range());
                }
                Ok(Self::Integer(v))
            }

            NodeType::UInt16 | NodeType::UInt32 | NodeType::UInt64 => {
                let v = coerce_unsigned(raw).ok_or_else(incompatible)?;
                let max = target.unsigned_max().unwrap_or(u64::MAX);
                if v > max {
                    return Err(out_of_range());
                }
                Ok(Self::Unsigned(v))
            }

            NodeType::Float | NodeType::Double => {
                coerce_float(raw).map(Self::Float).ok_or_else(incompatible)
            }

            NodeType::Text => match raw {
                serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
                _ => Err(incompatible()),
            },
        }
    }
}

fn coerce_bool(raw: &serde_json::Value) -> Option<bool> {
    match raw {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_signed(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            // Integral floats like 42.0 are accepted; 42.5 is not.
            // `i64::MAX as f64` rounds up to 2^63, so it is an exclusive
            // bound: exactly 2^63 is rejected, not saturated.
            let f = n.as_f64()?;
            (f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f))
                .then_some(f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_unsigned(raw: &serde_json::Value) -> Option<u64> {
    match raw {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            // `u64::MAX as f64` rounds up to 2^64; exclusive bound as above.
            let f = n.as_f64()?;
            (f.fract() == 0.0 && (0.0..u64::MAX as f64).contains(&f)).then_some(f as u64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Unsigned(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
