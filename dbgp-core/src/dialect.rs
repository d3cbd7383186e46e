//! Script language dialects
//!
//! The engine announces its language version in the `init` packet. Version 1
//! and version 2 scripts share most of the expression language but differ in
//! literal coercion, logical operator results and property write types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::expr::value::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    V1,
    V2,
}

impl Dialect {
    /// Pick the dialect from an engine `language_version` attribute such as
    /// `1.1.36.02` or `2.0.11`.
    pub fn from_language_version(version: &str) -> Self {
        let major = version
            .trim()
            .trim_start_matches(['v', 'V'])
            .split(['.', '-'])
            .next()
            .and_then(|major| major.parse::<u32>().ok());
        match major {
            Some(major) if major >= 2 => Dialect::V2,
            _ => Dialect::V1,
        }
    }

    /// DBGP `-t` type name used when writing `value` back to the engine.
    ///
    /// Returns `None` for values that cannot be written (objects).
    pub fn write_type(&self, value: &Value) -> Option<&'static str> {
        match value {
            Value::Undefined | Value::String(_) => Some("string"),
            Value::Number(Number::Integer(_)) => Some("integer"),
            // v1 has no float write type; the engine re-parses the string.
            Value::Number(Number::Float(_)) => match self {
                Dialect::V1 => Some("string"),
                Dialect::V2 => Some("float"),
            },
            Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::V1 => "v1",
            Dialect::V2 => "v2",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Ok(Dialect::V1),
            "2" | "v2" => Ok(Dialect::V2),
            other => Err(format!("unknown dialect '{}', expected v1 or v2", other)),
        }
    }
}
