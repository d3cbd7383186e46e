//! Expression error types

use thiserror::Error;

use crate::dbgp::DbgpError;

/// The grammar rejected the input. Recoverable: the caller may re-prompt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (at offset {offset})")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
    pub expected: Vec<String>,
    pub found: Option<String>,
}

impl ParseError {
    pub fn expected(offset: usize, expected: &[&str], found: Option<&str>) -> Self {
        let expected: Vec<String> = expected.iter().map(|e| e.to_string()).collect();
        let found_text = found.map_or_else(|| "end of expression".to_string(), |f| format!("'{}'", f));
        let message = match expected.as_slice() {
            [] => format!("Unexpected {}", found_text),
            [one] => format!("Expected {} but found {}", one, found_text),
            many => format!("Expected one of {} but found {}", many.join(", "), found_text),
        };
        Self {
            message,
            offset,
            expected,
            found: found.map(str::to_string),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EvalError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unsupported operator: '{operator}'")]
    UnsupportedOperator { operator: String },

    #[error("Unsupported expression: {kind}")]
    UnsupportedExpression { kind: String },

    #[error("Cannot write to '{name}': the engine rejected the value")]
    WriteRejected { name: String },

    #[error("Invalid assignment target: {0}")]
    InvalidTarget(String),

    #[error("No '{scope}' context at this stack level")]
    UnknownScope { scope: String },

    #[error("Unknown function: '{name}'")]
    UnknownFunction { name: String },

    #[error("{function}: {message}")]
    Builtin { function: String, message: String },

    #[error("Invalid regular expression: {0}")]
    Regex(String),

    #[error(transparent)]
    Dbgp(DbgpError),
}

impl From<DbgpError> for EvalError {
    fn from(err: DbgpError) -> Self {
        match err {
            DbgpError::WriteRejected { name } => EvalError::WriteRejected { name },
            other => EvalError::Dbgp(other),
        }
    }
}

impl EvalError {
    pub fn unsupported_operator(operator: impl Into<String>) -> Self {
        EvalError::UnsupportedOperator {
            operator: operator.into(),
        }
    }

    pub fn unsupported(kind: impl Into<String>) -> Self {
        EvalError::UnsupportedExpression { kind: kind.into() }
    }

    pub fn builtin(function: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Builtin {
            function: function.into(),
            message: message.into(),
        }
    }

    /// The connection is gone; the session cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Dbgp(err) if err.is_fatal())
    }
}
