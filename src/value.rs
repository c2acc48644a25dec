// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed field values and their tagged text encoding.
//!
//! On the wire a value is a string with a one-letter type tag:
//!
//! | Value                 | Encoded        |
//! |-----------------------|----------------|
//! | `Null`                | `0:` (or empty)|
//! | `Text("Foo")`         | `S:Foo`        |
//! | `Number(Int(42))`     | `N:42`         |
//! | `Number(Float(0.5))`  | `N:0.5`        |
//!
//! Numbers decode to `Int` whenever the text is an exact `i64`, so integer
//! amounts round-trip exactly. Floats are printed with the shortest
//! representation that parses back to the same bits (fractional sort
//! orders keep full precision). A float with no fractional part comes back
//! as the equal `Int`.

use std::fmt;

use crate::codec::DecodeError;

/// A numeric field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
        }
    }
}

/// A single field's value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Number(Number),
}

impl Value {
    /// Tagged text form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Null => "0:".to_string(),
            Self::Text(s) => format!("S:{s}"),
            Self::Number(n) => format!("N:{n}"),
        }
    }

    /// Parse the tagged text form. An empty string is `Null`.
    pub fn decode(encoded: &str) -> Result<Self, DecodeError> {
        if encoded.is_empty() || encoded.starts_with("0:") {
            return Ok(Self::Null);
        }
        if let Some(text) = encoded.strip_prefix("S:") {
            return Ok(Self::Text(text.to_string()));
        }
        if let Some(number) = encoded.strip_prefix("N:") {
            if let Ok(n) = number.parse::<i64>() {
                return Ok(Self::Number(Number::Int(n)));
            }
            if let Ok(n) = number.parse::<f64>() {
                return Ok(Self::Number(Number::Float(n)));
            }
        }
        Err(DecodeError::InvalidValue(encoded.to_string()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(Number::Int(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(Number::Int(n)) => Some(*n as f64),
            Self::Number(Number::Float(n)) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(Number::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(Number::Int(i64::from(value)))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(Number::Float(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
