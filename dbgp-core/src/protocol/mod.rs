//! JSON-RPC Protocol definitions
//!
//! Defines the line-oriented protocol between an IDE front end and
//! dbgp-server. Each line on stdin is one request; each line on stdout is a
//! response (with the request's `id`) or a notification (without one).

use serde::{Deserialize, Serialize};

use crate::breakpoint::{AdvancedData, Breakpoint, OutputEvent, StoppedEvent};
use crate::dbgp::StackFrame;

/// Request from the IDE to dbgp-server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Evaluate an expression in the frame at `level` (innermost by default)
    #[serde(rename = "eval")]
    Eval {
        expression: String,
        #[serde(default)]
        level: Option<u32>,
    },

    #[serde(rename = "continue")]
    Continue,

    #[serde(rename = "step_into")]
    StepInto,

    #[serde(rename = "step_over")]
    StepOver,

    #[serde(rename = "step_out")]
    StepOut,

    #[serde(rename = "pause")]
    Pause,

    #[serde(rename = "stop")]
    Stop,

    #[serde(rename = "set_breakpoint")]
    SetBreakpoint {
        file: String,
        line: u32,
        #[serde(flatten)]
        advanced: AdvancedData,
    },

    #[serde(rename = "remove_breakpoint")]
    RemoveBreakpoint { file: String, line: u32 },

    #[serde(rename = "stack_trace")]
    StackTrace,

    /// Variables of one stack level, optionally limited to one context
    #[serde(rename = "variables")]
    Variables {
        #[serde(default)]
        level: Option<u32>,
        #[serde(default)]
        context: Option<String>,
    },

    /// Detach from the engine and exit
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// A verified breakpoint as reported to the IDE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointView {
    pub id: u32,
    pub file: String,
    pub line: u32,
    pub requested_line: u32,
}

impl From<&Breakpoint> for BreakpointView {
    fn from(bp: &Breakpoint) -> Self {
        Self {
            id: bp.id,
            file: bp.file_uri.clone(),
            line: bp.line,
            requested_line: bp.requested_line,
        }
    }
}

/// One variable of a context listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    pub name: String,
    pub full_name: String,
    pub context: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: String,
    pub has_children: bool,
}

/// Response from dbgp-server to the IDE
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    EvalResult {
        value: String,
        #[serde(rename = "type")]
        value_type: String,
    },
    Stopped { stopped: StoppedEvent },
    Terminated { terminated: bool },
    Breakpoint { breakpoint: BreakpointView },
    StackTrace { frames: Vec<StackFrame> },
    Variables { variables: Vec<VariableView> },
    Removed { removed: bool },
    Success { ok: bool },
    Error { error: String },
}

impl Response {
    pub fn success() -> Self {
        Response::Success { ok: true }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { error: msg.into() }
    }

    pub fn eval_result(value: impl Into<String>, value_type: impl Into<String>) -> Self {
        Response::EvalResult {
            value: value.into(),
            value_type: value_type.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

/// Unsolicited messages from dbgp-server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    /// Log point output and condition failures
    #[serde(rename = "output")]
    Output(OutputEvent),

    /// Text the debuggee wrote to `stdout` or `stderr`
    #[serde(rename = "stream")]
    Stream { stream: String, text: String },

    /// The engine hung up; no further requests will succeed
    #[serde(rename = "terminated")]
    Terminated,
}

/// JSON-RPC message wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage<T> {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub content: T,
}

impl<T> RpcMessage<T> {
    pub fn new(id: u64, content: T) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            content,
        }
    }

    pub fn notification(content: T) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            content,
        }
    }
}
