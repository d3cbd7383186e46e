//! DBGP error types

use std::io;

use thiserror::Error;

pub type Result<T, E = DbgpError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone)]
pub enum DbgpError {
    /// The engine answered with an `<error code=N>` element.
    #[error("{command} failed with DBGP error {code}: {message}")]
    Protocol {
        command: String,
        code: u32,
        message: String,
    },

    /// Malformed length prefix or undecodable frame; fatal for the connection.
    #[error("DBGP framing error: {0}")]
    Framing(String),

    #[error("DBGP response to {command} is malformed: {reason}")]
    MalformedResponse { command: String, reason: String },

    /// `property_set` answered `success="0"`, typically a read-only target.
    #[error("engine rejected write to '{name}'")]
    WriteRejected { name: String },

    #[error("DBGP connection closed")]
    ConnectionClosed,

    #[error("timed out waiting for the engine")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for DbgpError {
    fn from(err: io::Error) -> Self {
        DbgpError::Io(err.to_string())
    }
}

impl DbgpError {
    pub fn protocol(command: impl Into<String>, code: u32, message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| error_code_message(code).map(str::to_string))
            .unwrap_or_else(|| format!("unknown error code {}", code));
        DbgpError::Protocol {
            command: command.into(),
            code,
            message,
        }
    }

    pub fn malformed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        DbgpError::MalformedResponse {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// The engine's error code, if this is a protocol error.
    pub fn code(&self) -> Option<u32> {
        match self {
            DbgpError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_property_not_found(&self) -> bool {
        self.code() == Some(codes::PROPERTY_NOT_FOUND)
    }

    /// Transport-level failures end the session; everything else is scoped to one command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DbgpError::ConnectionClosed | DbgpError::Framing(_) | DbgpError::Io(_)
        )
    }
}

pub mod codes {
    pub const PARSE_ERROR: u32 = 1;
    pub const DUPLICATE_ARGUMENTS: u32 = 2;
    pub const INVALID_OPTIONS: u32 = 3;
    pub const UNIMPLEMENTED_COMMAND: u32 = 4;
    pub const COMMAND_NOT_AVAILABLE: u32 = 5;
    pub const CANNOT_OPEN_FILE: u32 = 100;
    pub const STREAM_REDIRECT_FAILED: u32 = 101;
    pub const BREAKPOINT_NOT_SET: u32 = 200;
    pub const BREAKPOINT_TYPE_NOT_SUPPORTED: u32 = 201;
    pub const BREAKPOINT_INVALID_LINE: u32 = 202;
    pub const BREAKPOINT_NO_CODE: u32 = 203;
    pub const BREAKPOINT_INVALID_STATE: u32 = 204;
    pub const NO_SUCH_BREAKPOINT: u32 = 205;
    pub const EVALUATING_CODE: u32 = 206;
    pub const INVALID_EXPRESSION: u32 = 207;
    pub const PROPERTY_NOT_FOUND: u32 = 300;
    pub const STACK_DEPTH_INVALID: u32 = 301;
    pub const CONTEXT_INVALID: u32 = 302;
    pub const ENCODING_NOT_SUPPORTED: u32 = 900;
    pub const INTERNAL_EXCEPTION: u32 = 998;
    pub const UNKNOWN_ERROR: u32 = 999;
}

/// Human readable text for the engine error codes defined by DBGP.
pub fn error_code_message(code: u32) -> Option<&'static str> {
    let message = match code {
        codes::PARSE_ERROR => "parse error in command",
        codes::DUPLICATE_ARGUMENTS => "duplicate arguments in command",
        codes::INVALID_OPTIONS => "invalid or missing options",
        codes::UNIMPLEMENTED_COMMAND => "unimplemented command",
        codes::COMMAND_NOT_AVAILABLE => "command is not available",
        codes::CANNOT_OPEN_FILE => "can not open file",
        codes::STREAM_REDIRECT_FAILED => "stream redirect failed",
        codes::BREAKPOINT_NOT_SET => "breakpoint could not be set",
        codes::BREAKPOINT_TYPE_NOT_SUPPORTED => "breakpoint type not supported",
        codes::BREAKPOINT_INVALID_LINE => "invalid breakpoint line",
        codes::BREAKPOINT_NO_CODE => "no code on breakpoint line",
        codes::BREAKPOINT_INVALID_STATE => "invalid breakpoint state",
        codes::NO_SUCH_BREAKPOINT => "no such breakpoint",
        codes::EVALUATING_CODE => "error evaluating code",
        codes::INVALID_EXPRESSION => "invalid expression",
        codes::PROPERTY_NOT_FOUND => "property not found",
        codes::STACK_DEPTH_INVALID => "stack depth invalid",
        codes::CONTEXT_INVALID => "context invalid",
        codes::ENCODING_NOT_SUPPORTED => "encoding not supported",
        codes::INTERNAL_EXCEPTION => "an internal exception in the debugger occurred",
        codes::UNKNOWN_ERROR => "unknown error",
        _ => return None,
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code_message() {
        let err = DbgpError::protocol("breakpoint_set", 200, None);
        assert_eq!(
            err.to_string(),
            "breakpoint_set failed with DBGP error 200: breakpoint could not be set"
        );
    }

    #[test]
    fn test_unknown_code_surfaces_raw() {
        let err = DbgpError::protocol("property_get", 4242, None);
        assert_eq!(err.code(), Some(4242));
        assert!(err.to_string().contains("unknown error code 4242"));
    }

    #[test]
    fn test_engine_message_wins() {
        let err = DbgpError::protocol("property_get", 300, Some("no such var".to_string()));
        assert!(err.is_property_not_found());
        assert!(err.to_string().ends_with("no such var"));
    }
}
