//! Value types for expression evaluation
//!
//! Represents the result of evaluating an expression against the remote
//! process. Objects are handles to a fetched [`ObjectProperty`] and are never
//! copied on the remote side.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::dbgp::property::{ObjectProperty, Property, PropertyType};
use crate::dialect::Dialect;

/// Shared handle to a remote object.
pub type ObjectRef = Arc<ObjectProperty>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Integer(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    /// Integer value, truncating floats.
    pub fn as_i64(&self) -> i64 {
        match self {
            Number::Integer(i) => *i,
            Number::Float(f) => *f as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Integer(i) => *i == 0,
            Number::Float(f) => *f == 0.0,
        }
    }

    pub fn numeric_eq(&self, other: &Number) -> bool {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }

    pub fn numeric_cmp(&self, other: &Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }

    pub fn format(&self, dialect: Dialect) -> String {
        match self {
            Number::Integer(i) => i.to_string(),
            Number::Float(f) => format_float(*f, dialect),
        }
    }
}

/// v1 prints six decimals; v2 prints the shortest form, keeping `.0` on
/// integral values.
pub fn format_float(value: f64, dialect: Dialect) -> String {
    match dialect {
        Dialect::V1 => format!("{:.6}", value),
        Dialect::V2 => {
            let text = value.to_string();
            if text.contains(['.', 'e', 'E']) || !value.is_finite() {
                text
            } else {
                format!("{}.0", text)
            }
        }
    }
}

/// Parse a numeric string the way the script engine does: optional sign,
/// decimal or `0x` hex integer, or a decimal float with optional exponent.
/// Surrounding spaces and tabs are ignored.
pub fn parse_number(text: &str) -> Option<Number> {
    let s = text.trim_matches([' ', '\t']);
    let (negative, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let value = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Number::Integer(if negative {
            value.wrapping_neg()
        } else {
            value
        }));
    }

    if body.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = body.parse::<i64>() {
            return Some(Number::Integer(if negative { -value } else { value }));
        }
    }

    let plausible = body.bytes().any(|b| b.is_ascii_digit())
        && body
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !plausible {
        return None;
    }
    let value: f64 = body.parse().ok()?;
    Some(Number::Float(if negative { -value } else { value }))
}

/// Runtime value of the expression language
#[derive(Debug, Clone)]
pub enum Value {
    /// An unset variable or a missing member.
    Undefined,
    String(String),
    Number(Number),
    Object(ObjectRef),
}

impl Value {
    pub fn integer(i: i64) -> Self {
        Value::Number(Number::Integer(i))
    }

    pub fn float(f: f64) -> Self {
        Value::Number(Number::Float(f))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn empty() -> Self {
        Value::String(String::new())
    }

    pub fn bool(b: bool) -> Self {
        Value::integer(i64::from(b))
    }

    /// Convert a fetched property. Typed numeric properties become numbers.
    pub fn from_property(property: Property) -> Self {
        match property {
            Property::Object(object) => Value::Object(Arc::new(object)),
            Property::Primitive(p) => match p.kind {
                PropertyType::Undefined => Value::Undefined,
                PropertyType::Integer => p
                    .as_integer()
                    .map(Value::integer)
                    .unwrap_or(Value::String(p.value)),
                PropertyType::Float => p
                    .as_float()
                    .map(Value::float)
                    .unwrap_or(Value::String(p.value)),
                PropertyType::String | PropertyType::Object => Value::String(p.value),
            },
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Undefined => "Unset",
            Value::String(_) => "String",
            Value::Number(Number::Integer(_)) => "Integer",
            Value::Number(Number::Float(_)) => "Float",
            Value::Object(o) => &o.class_name,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Numeric view: numbers as-is, numeric strings parsed.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s),
            Value::Undefined | Value::Object(_) => None,
        }
    }

    /// Empty strings, zero and unset values are false; objects are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Number(n) => !n.is_zero(),
            Value::String(s) => match parse_number(s) {
                Some(n) => !n.is_zero(),
                None => !s.is_empty(),
            },
            Value::Object(_) => true,
        }
    }

    /// String form used by operators. Objects have none.
    pub fn to_text(&self, dialect: Dialect) -> String {
        match self {
            Value::Undefined | Value::Object(_) => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(n) => n.format(dialect),
        }
    }

    /// Human readable form; objects render as `ClassName {key: value, ...}`
    /// from their eager children.
    pub fn render(&self, dialect: Dialect) -> String {
        match self {
            Value::Object(o) => render_object(o, dialect),
            other => other.to_text(dialect),
        }
    }
}

fn render_object(object: &ObjectProperty, dialect: Dialect) -> String {
    let entries: Vec<String> = object
        .own_children()
        .map(|child| {
            let key = child
                .name()
                .strip_prefix('[')
                .and_then(|k| k.strip_suffix(']'))
                .map(|k| k.trim_matches('"'))
                .unwrap_or_else(|| child.name());
            let value = match child {
                Property::Object(o) => o.class_name.clone(),
                Property::Primitive(p) if p.kind == PropertyType::String => {
                    format!("\"{}\"", p.value)
                }
                Property::Primitive(p) => match p.kind {
                    PropertyType::Float => p
                        .as_float()
                        .map(|f| format_float(f, dialect))
                        .unwrap_or_else(|| p.value.clone()),
                    _ => p.value.clone(),
                },
            };
            format!("{}: {}", key, value)
        })
        .collect();

    if object.is_partial() {
        return format!("{} {{...}}", object.class_name);
    }
    format!("{} {{{}}}", object.class_name, entries.join(", "))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.same_object(b),
            _ => false,
        }
    }
}

/// Displays with v2 number formatting; use [`Value::to_text`] for a dialect.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(Dialect::V2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(Number::Integer(42)));
        assert_eq!(parse_number("  -7\t"), Some(Number::Integer(-7)));
        assert_eq!(parse_number("0x1F"), Some(Number::Integer(31)));
        assert_eq!(parse_number("1.5"), Some(Number::Float(1.5)));
        assert_eq!(parse_number("1e3"), Some(Number::Float(1000.0)));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("--1"), None);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(2.5, Dialect::V1), "2.500000");
        assert_eq!(format_float(2.5, Dialect::V2), "2.5");
        assert_eq!(format_float(3.0, Dialect::V2), "3.0");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::empty().is_truthy());
        assert!(!Value::string("0").is_truthy());
        assert!(!Value::string("0.0").is_truthy());
        assert!(Value::string("abc").is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert!(Value::integer(-1).is_truthy());
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(Number::Integer(2).numeric_eq(&Number::Float(2.0)));
        assert_eq!(
            Number::Integer(1).numeric_cmp(&Number::Float(1.5)),
            Some(Ordering::Less)
        );
    }
}
