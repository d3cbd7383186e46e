//! Hit conditions
//!
//! A hit condition compares a breakpoint's hit counter against a number:
//! `>= 3`, `= 2`, `% 5`. A bare number means `>=`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::BreakpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitOperator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    /// Every Nth hit.
    Mod,
}

impl HitOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitOperator::Eq => "=",
            HitOperator::Gt => ">",
            HitOperator::Ge => ">=",
            HitOperator::Lt => "<",
            HitOperator::Le => "<=",
            HitOperator::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCondition {
    pub op: HitOperator,
    pub value: u32,
}

impl HitCondition {
    pub fn matches(&self, hit_count: u32) -> bool {
        match self.op {
            HitOperator::Eq => hit_count == self.value,
            HitOperator::Gt => hit_count > self.value,
            HitOperator::Ge => hit_count >= self.value,
            HitOperator::Lt => hit_count < self.value,
            HitOperator::Le => hit_count <= self.value,
            HitOperator::Mod => hit_count % self.value == 0,
        }
    }
}

impl FromStr for HitCondition {
    type Err = BreakpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Longer operators first so `>=` is not read as `>`.
        const OPERATORS: &[(&str, HitOperator)] = &[
            ("==", HitOperator::Eq),
            (">=", HitOperator::Ge),
            ("<=", HitOperator::Le),
            ("=", HitOperator::Eq),
            (">", HitOperator::Gt),
            ("<", HitOperator::Lt),
            ("%", HitOperator::Mod),
        ];

        let invalid = || BreakpointError::InvalidHitCondition(s.to_string());
        let text = s.trim();
        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(token, op)| text.strip_prefix(token).map(|rest| (*op, rest)))
            .unwrap_or((HitOperator::Ge, text));

        let value: u32 = rest.trim().parse().map_err(|_| invalid())?;
        if op == HitOperator::Mod && value == 0 {
            return Err(invalid());
        }
        Ok(HitCondition { op, value })
    }
}

impl fmt::Display for HitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.value)
    }
}

/// Combine a condition result with a hit condition result: both present
/// means both must hold, a single one decides alone, none means break.
pub fn should_break(condition: Option<bool>, hit_condition: Option<bool>) -> bool {
    match (condition, hit_condition) {
        (Some(condition), Some(hit)) => condition && hit,
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> HitCondition {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_operators() {
        assert_eq!(parse(">= 3").op, HitOperator::Ge);
        assert_eq!(parse("==2").op, HitOperator::Eq);
        assert_eq!(parse("= 2").op, HitOperator::Eq);
        assert_eq!(parse("<5").op, HitOperator::Lt);
        assert_eq!(parse("% 4").op, HitOperator::Mod);
        let bare = parse(" 7 ");
        assert_eq!((bare.op, bare.value), (HitOperator::Ge, 7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<HitCondition>().is_err());
        assert!(">= x".parse::<HitCondition>().is_err());
        assert!("% 0".parse::<HitCondition>().is_err());
        assert!("=> 3".parse::<HitCondition>().is_err());
    }

    #[test]
    fn test_matches() {
        let ge3 = parse(">= 3");
        assert!(!ge3.matches(1));
        assert!(!ge3.matches(2));
        assert!(ge3.matches(3));
        assert!(ge3.matches(4));

        let every_other = parse("% 2");
        assert!(!every_other.matches(1));
        assert!(every_other.matches(2));
        assert!(!every_other.matches(3));
    }

    #[test]
    fn test_combination_rule() {
        assert!(should_break(None, None));
        assert!(should_break(Some(true), None));
        assert!(!should_break(None, Some(false)));
        assert!(!should_break(Some(true), Some(false)));
        assert!(should_break(Some(true), Some(true)));
    }
}
