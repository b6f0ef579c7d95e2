//! Decoded field values.

use core::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Seconds between the Unix epoch and the FIT epoch (1989-12-31T00:00:00Z).
pub const EPOCH_OFFSET: i64 = 631_065_600;

/// A single decoded value.
///
/// Values of integral base types widen to `Uint` or `Int`. Applying a scale
/// or offset, or converting semicircles, produces a `Float`. Arrays of the
/// `byte` base type stay together as one opaque `Bytes` value.
#[derive(Debug, Clone)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    /// An opaque run of bytes, kept whole to preserve bit-exact semantics.
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    /// An absolute instant, seconds past the FIT epoch.
    Time(DateTime<Utc>),
    /// A wall-clock instant with no recorded zone.
    LocalTime(NaiveDateTime),
    /// A profile-mapped name for an internal integer.
    Name(String),
}

impl Value {
    /// Interpret seconds past the FIT epoch as an absolute instant.
    pub fn from_timestamp(seconds: u32) -> Self {
        match DateTime::from_timestamp(EPOCH_OFFSET + seconds as i64, 0) {
            Some(instant) => Self::Time(instant),
            None => Self::Uint(seconds as u64),
        }
    }

    /// The value as a float, for numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Uint(x) => Some(*x as f64),
            Self::Int(x) => Some(*x as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Apply a scale divisor and offset, widening to a float.
    ///
    /// Non-numeric values pass through unchanged.
    pub fn scale_offset(self, scale: f64, offset: f64) -> Self {
        match self.as_f64() {
            Some(x) => Self::Float(x / scale - offset),
            None => self,
        }
    }

    /// Convert a position from semicircles to degrees.
    pub fn semicircles_to_degrees(self) -> Self {
        match self.as_f64() {
            Some(x) => Self::Float(x * 180.0 / (1u64 << 31) as f64),
            None => self,
        }
    }

    /// Add another value of the same kind, for running totals.
    ///
    /// Returns `None` when the kinds cannot be summed.
    pub(crate) fn add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Uint(a), Self::Uint(b)) => Some(Self::Uint(a.wrapping_add(*b))),
            (Self::Int(a), Self::Int(b)) => Some(Self::Int(a.wrapping_add(*b))),
            (a, b) => Some(Self::Float(a.as_f64()? + b.as_f64()?)),
        }
    }
}

impl PartialEq for Value {
    /// Compare values as a dynamic-field reference would: integers compare
    /// across signedness, names by their string.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Int(b)) | (Self::Int(b), Self::Uint(a)) => {
                u64::try_from(*b).is_ok_and(|b| *a == b)
            }
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::LocalTime(a), Self::LocalTime(b)) => a == b,
            (Self::Name(a), Self::Name(b)) => a == b,
            (Self::Name(a), Self::Text(b)) | (Self::Text(b), Self::Name(a)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(x) => write!(f, "{x}"),
            Self::Int(x) => write!(f, "{x}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bytes(x) => {
                for b in x {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Self::Text(x) => write!(f, "{x}"),
            Self::Bool(x) => write!(f, "{x}"),
            Self::Time(x) => write!(f, "{}", x.to_rfc3339()),
            Self::LocalTime(x) => write!(f, "{x}"),
            Self::Name(x) => write!(f, "{x}"),
        }
    }
}
