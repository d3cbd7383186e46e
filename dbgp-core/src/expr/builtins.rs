//! Built-in functions callable from expressions
//!
//! Each dialect gets a case-insensitive table: the shared functions plus its
//! own extras. Builtins are pure; they never talk to the engine.

use std::sync::OnceLock;

use regex::Regex;

use super::ci_map::CiMap;
use super::error::EvalError;
use super::value::{parse_number, Number, Value};
use crate::dialect::Dialect;

pub type BuiltinFn = fn(&[Value], Dialect) -> Result<Value, EvalError>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    pub call: BuiltinFn,
}

impl Builtin {
    const fn new(name: &'static str, min_args: usize, max_args: usize, call: BuiltinFn) -> Self {
        Self {
            name,
            min_args,
            max_args: Some(max_args),
            call,
        }
    }

    const fn variadic(name: &'static str, min_args: usize, call: BuiltinFn) -> Self {
        Self {
            name,
            min_args,
            max_args: None,
            call,
        }
    }

    pub fn check_arity(&self, count: usize) -> Result<(), EvalError> {
        let too_many = self.max_args.map(|max| count > max).unwrap_or(false);
        if count < self.min_args || too_many {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => format!("{}", max),
                Some(max) => format!("{} to {}", self.min_args, max),
                None => format!("at least {}", self.min_args),
            };
            return Err(EvalError::builtin(
                self.name,
                format!("expected {} argument(s), got {}", expected, count),
            ));
        }
        Ok(())
    }

    pub fn invoke(&self, args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
        self.check_arity(args.len())?;
        (self.call)(args, dialect)
    }
}

const COMMON: &[Builtin] = &[
    Builtin::new("Abs", 1, 1, abs),
    Builtin::new("Ceil", 1, 1, ceil),
    Builtin::new("Floor", 1, 1, floor),
    Builtin::new("Round", 1, 2, round),
    Builtin::new("Mod", 2, 2, modulo),
    Builtin::new("Sqrt", 1, 1, sqrt),
    Builtin::new("Exp", 1, 1, exp),
    Builtin::new("Ln", 1, 1, ln),
    Builtin::new("Log", 1, 1, log10),
    Builtin::variadic("Min", 1, min),
    Builtin::variadic("Max", 1, max),
    Builtin::new("StrLen", 1, 1, str_len),
    Builtin::new("SubStr", 2, 3, sub_str),
    Builtin::new("InStr", 2, 4, in_str),
    Builtin::new("Trim", 1, 2, trim),
    Builtin::new("LTrim", 1, 2, ltrim),
    Builtin::new("RTrim", 1, 2, rtrim),
    Builtin::new("StrLower", 1, 1, str_lower),
    Builtin::new("StrUpper", 1, 1, str_upper),
    Builtin::new("Chr", 1, 1, chr),
    Builtin::new("Ord", 1, 1, ord),
    Builtin::new("IsObject", 1, 1, is_object),
    Builtin::new("RegExMatch", 2, 3, regex_match),
    Builtin::new("RegExReplace", 2, 3, regex_replace),
];

const V1_ONLY: &[Builtin] = &[
    Builtin::new("Asc", 1, 1, ord),
    Builtin::new("ObjHasKey", 2, 2, obj_has_key),
    Builtin::new("ObjCount", 1, 1, obj_count),
];

const V2_ONLY: &[Builtin] = &[
    Builtin::new("IsSet", 1, 1, is_set),
    Builtin::new("IsNumber", 1, 1, is_number),
    Builtin::new("IsInteger", 1, 1, is_integer),
    Builtin::new("IsFloat", 1, 1, is_float),
    Builtin::new("Type", 1, 1, type_of),
    Builtin::new("Integer", 1, 1, to_integer),
    Builtin::new("Float", 1, 1, to_float),
    Builtin::new("String", 1, 1, to_string),
    Builtin::new("Number", 1, 1, to_number),
    Builtin::new("HasProp", 2, 2, has_prop),
];

/// Builtin table of a dialect.
pub fn table(dialect: Dialect) -> &'static CiMap<Builtin> {
    static V1: OnceLock<CiMap<Builtin>> = OnceLock::new();
    static V2: OnceLock<CiMap<Builtin>> = OnceLock::new();

    let (cell, extras) = match dialect {
        Dialect::V1 => (&V1, V1_ONLY),
        Dialect::V2 => (&V2, V2_ONLY),
    };
    cell.get_or_init(|| {
        COMMON
            .iter()
            .chain(extras)
            .map(|builtin| (builtin.name, *builtin))
            .collect()
    })
}

pub fn lookup(dialect: Dialect, name: &str) -> Option<&'static Builtin> {
    table(dialect).get(name)
}

/// Compile a pattern with an optional `opts)` prefix, e.g. `i)^abc`.
pub fn compile_regex(pattern: &str) -> Result<Regex, EvalError> {
    let (options, body) = split_regex_options(pattern);
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'U'))
        .collect();
    let source = if flags.is_empty() {
        body.to_string()
    } else {
        format!("(?{}){}", flags, body)
    };
    Regex::new(&source).map_err(|e| EvalError::Regex(e.to_string()))
}

fn split_regex_options(pattern: &str) -> (&str, &str) {
    const OPTION_CHARS: &str = "imsxADJUXPSC`anr";
    match pattern.find(')') {
        Some(pos) if pos > 0 && pattern[..pos].chars().all(|c| OPTION_CHARS.contains(c)) => {
            (&pattern[..pos], &pattern[pos + 1..])
        }
        _ => ("", pattern),
    }
}

/// 1-based character position of the first match at or after `start`, or 0.
pub fn regex_position(haystack: &str, regex: &Regex, start: usize) -> i64 {
    let byte_start = char_to_byte(haystack, start.saturating_sub(1));
    match regex.find_at(haystack, byte_start) {
        Some(m) => haystack[..m.start()].chars().count() as i64 + 1,
        None => 0,
    }
}

fn char_to_byte(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

// Argument helpers

fn number(args: &[Value], index: usize) -> Option<Number> {
    args.get(index).and_then(Value::as_number)
}

fn text(args: &[Value], index: usize, dialect: Dialect) -> String {
    args.get(index)
        .map(|v| v.to_text(dialect))
        .unwrap_or_default()
}

fn integer_arg(args: &[Value], index: usize, default: i64) -> Option<i64> {
    match args.get(index) {
        None => Some(default),
        Some(v) => v.as_number().map(|n| n.as_i64()),
    }
}

fn float_result(value: f64) -> Value {
    if value.is_finite() {
        Value::float(value)
    } else {
        Value::empty()
    }
}

fn float_fn(args: &[Value], f: fn(f64) -> Option<f64>) -> Value {
    number(args, 0)
        .and_then(|n| f(n.as_f64()))
        .map(float_result)
        .unwrap_or_else(Value::empty)
}

// Math

fn abs(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(match number(args, 0) {
        Some(Number::Integer(i)) => Value::integer(i.wrapping_abs()),
        Some(Number::Float(f)) => Value::float(f.abs()),
        None => Value::empty(),
    })
}

fn ceil(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(number(args, 0)
        .map(|n| Value::integer(n.as_f64().ceil() as i64))
        .unwrap_or_else(Value::empty))
}

fn floor(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(number(args, 0)
        .map(|n| Value::integer(n.as_f64().floor() as i64))
        .unwrap_or_else(Value::empty))
}

fn round(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    let (Some(n), Some(places)) = (number(args, 0), integer_arg(args, 1, 0)) else {
        return Ok(Value::empty());
    };
    let value = n.as_f64();
    Ok(match places {
        0 => Value::integer(value.round() as i64),
        p if p > 0 => Value::string(format!("{:.*}", p.min(17) as usize, value)),
        p => {
            let scale = 10f64.powi(p.unsigned_abs().min(18) as i32);
            Value::integer(((value / scale).round() * scale) as i64)
        }
    })
}

fn modulo(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    let (Some(a), Some(b)) = (number(args, 0), number(args, 1)) else {
        return Ok(Value::empty());
    };
    if b.is_zero() {
        return Ok(Value::empty());
    }
    Ok(match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => Value::integer(a.wrapping_rem(b)),
        _ => float_result(a.as_f64() % b.as_f64()),
    })
}

fn sqrt(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(float_fn(args, |x| (x >= 0.0).then(|| x.sqrt())))
}

fn exp(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(float_fn(args, |x| Some(x.exp())))
}

fn ln(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(float_fn(args, |x| (x > 0.0).then(|| x.ln())))
}

fn log10(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(float_fn(args, |x| (x > 0.0).then(|| x.log10())))
}

fn extreme(args: &[Value], pick_greater: bool) -> Value {
    let mut best: Option<Number> = None;
    for arg in args {
        let Some(n) = arg.as_number() else {
            return Value::empty();
        };
        best = match best {
            Some(current) => {
                let greater = n.numeric_cmp(&current) == Some(std::cmp::Ordering::Greater);
                let less = n.numeric_cmp(&current) == Some(std::cmp::Ordering::Less);
                if (pick_greater && greater) || (!pick_greater && less) {
                    Some(n)
                } else {
                    Some(current)
                }
            }
            None => Some(n),
        };
    }
    best.map(Value::Number).unwrap_or_else(Value::empty)
}

fn min(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(extreme(args, false))
}

fn max(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(extreme(args, true))
}

// Strings

fn str_len(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::integer(text(args, 0, dialect).chars().count() as i64))
}

fn sub_str(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let chars: Vec<char> = text(args, 0, dialect).chars().collect();
    let len = chars.len() as i64;
    let Some(start) = integer_arg(args, 1, 1) else {
        return Ok(Value::empty());
    };

    let begin = match (start, dialect) {
        (s, _) if s >= 1 => s - 1,
        // v1 counts 0 as the last character, -1 as the one before it.
        (s, Dialect::V1) => (len - 1).saturating_add(s),
        (0, Dialect::V2) => {
            return Err(EvalError::builtin("SubStr", "starting position 0 is invalid"))
        }
        (s, Dialect::V2) => len.saturating_add(s),
    }
    .clamp(0, len);

    let end = match args.get(2) {
        None => len,
        Some(v) => match v.as_number().map(|n| n.as_i64()) {
            Some(count) if count >= 0 => begin.saturating_add(count).min(len),
            Some(count) => len.saturating_add(count).max(begin),
            None => return Ok(Value::empty()),
        },
    };
    Ok(Value::string(
        chars[begin as usize..end as usize].iter().collect::<String>(),
    ))
}

fn in_str(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let haystack: Vec<char> = text(args, 0, dialect).chars().collect();
    let needle: Vec<char> = text(args, 1, dialect).chars().collect();
    let case_sensitive = args.get(2).map(Value::is_truthy).unwrap_or(false);
    let Some(start) = integer_arg(args, 3, 1) else {
        return Ok(Value::empty());
    };
    if start == 0 && dialect == Dialect::V2 {
        return Err(EvalError::builtin("InStr", "starting position 0 is invalid"));
    }
    if needle.is_empty() || needle.len() > haystack.len() {
        return Ok(Value::integer(0));
    }

    let len = haystack.len() as i64;
    let last = len - needle.len() as i64;
    let matches_at = |i: i64| {
        haystack[i as usize..]
            .iter()
            .zip(&needle)
            .all(|(&h, &n)| chars_match(h, n, case_sensitive))
    };
    let found = if start >= 1 {
        (start - 1..=last).find(|&i| matches_at(i))
    } else {
        // Search right to left. v1 trims `-start` characters off the end;
        // v2 starts the match at the `-start`th character from the end.
        let from = match dialect {
            Dialect::V1 => len.saturating_add(start).saturating_sub(needle.len() as i64),
            Dialect::V2 => len.saturating_add(start),
        };
        (0..=from.min(last)).rev().find(|&i| matches_at(i))
    };
    Ok(Value::integer(found.map_or(0, |i| i + 1)))
}

/// Character comparison; case-insensitive matching folds each character on
/// its own so positions stay character positions.
fn chars_match(a: char, b: char, case_sensitive: bool) -> bool {
    a == b || (!case_sensitive && a.to_lowercase().eq(b.to_lowercase()))
}

fn omit_chars(args: &[Value], dialect: Dialect) -> Vec<char> {
    match args.get(1) {
        Some(v) => v.to_text(dialect).chars().collect(),
        None => vec![' ', '\t'],
    }
}

fn trim(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let omit = omit_chars(args, dialect);
    Ok(Value::string(text(args, 0, dialect).trim_matches(omit.as_slice())))
}

fn ltrim(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let omit = omit_chars(args, dialect);
    Ok(Value::string(
        text(args, 0, dialect).trim_start_matches(omit.as_slice()),
    ))
}

fn rtrim(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let omit = omit_chars(args, dialect);
    Ok(Value::string(
        text(args, 0, dialect).trim_end_matches(omit.as_slice()),
    ))
}

fn str_lower(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::string(text(args, 0, dialect).to_lowercase()))
}

fn str_upper(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::string(text(args, 0, dialect).to_uppercase()))
}

fn chr(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(number(args, 0)
        .and_then(|n| u32::try_from(n.as_i64()).ok())
        .and_then(char::from_u32)
        .map(|c| Value::string(c.to_string()))
        .unwrap_or_else(Value::empty))
}

fn ord(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::integer(
        text(args, 0, dialect)
            .chars()
            .next()
            .map(|c| c as i64)
            .unwrap_or(0),
    ))
}

fn is_object(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(args.iter().all(|v| v.as_object().is_some())))
}

fn regex_match(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let regex = compile_regex(&text(args, 1, dialect))?;
    let Some(start) = integer_arg(args, 2, 1) else {
        return Ok(Value::empty());
    };
    Ok(Value::integer(regex_position(
        &text(args, 0, dialect),
        &regex,
        start.max(1) as usize,
    )))
}

fn regex_replace(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    let regex = compile_regex(&text(args, 1, dialect))?;
    let replacement = text(args, 2, dialect);
    Ok(Value::string(
        regex
            .replace_all(&text(args, 0, dialect), replacement.as_str())
            .into_owned(),
    ))
}

// Objects

/// Eager own children of `object` whose key is `key`, in any spelling.
fn has_key(value: &Value, key: &str, inherited: bool) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let candidates = [
        key.to_string(),
        format!("[{}]", key),
        format!("[\"{}\"]", key),
    ];
    let mut current = Some(&**object);
    while let Some(o) = current {
        if candidates.iter().any(|c| o.child(c).is_some()) {
            return true;
        }
        current = if inherited { o.base() } else { None };
    }
    false
}

fn obj_has_key(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(has_key(&args[0], &text(args, 1, dialect), false)))
}

fn obj_count(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(match args[0].as_object() {
        Some(o) if o.is_partial() => Value::integer(o.num_children as i64),
        Some(o) => Value::integer(o.own_children().count() as i64),
        None => Value::empty(),
    })
}

fn has_prop(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(has_key(&args[0], &text(args, 1, dialect), true)))
}

// Types

fn is_set(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(!args[0].is_undefined()))
}

fn is_number(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(args[0].as_number().is_some()))
}

fn is_integer(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(matches!(
        args[0].as_number(),
        Some(Number::Integer(_))
    )))
}

fn is_float(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::bool(matches!(
        args[0].as_number(),
        Some(Number::Float(_))
    )))
}

fn type_of(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::string(args[0].type_name()))
}

fn require_number(function: &str, value: &Value) -> Result<Number, EvalError> {
    value
        .as_number()
        .ok_or_else(|| EvalError::builtin(function, format!("'{}' is not a number", value)))
}

fn to_integer(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::integer(require_number("Integer", &args[0])?.as_i64()))
}

fn to_float(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::float(require_number("Float", &args[0])?.as_f64()))
}

fn to_number(args: &[Value], _: Dialect) -> Result<Value, EvalError> {
    Ok(Value::Number(require_number("Number", &args[0])?))
}

fn to_string(args: &[Value], dialect: Dialect) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Object(o) => Err(EvalError::builtin(
            "String",
            format!("cannot convert {} to a string", o.class_name),
        )),
        other => Ok(Value::string(other.to_text(dialect))),
    }
}

/// Integer value of a numeric string, used for element keys.
pub fn integer_key(text: &str) -> Option<i64> {
    match parse_number(text)? {
        Number::Integer(i) if text.bytes().all(|b| b.is_ascii_digit() || b == b'-') => Some(i),
        _ => None,
    }
}
