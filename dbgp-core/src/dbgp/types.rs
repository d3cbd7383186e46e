//! Typed views of DBGP responses

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{DbgpError, Result};
use super::packet::ResponsePacket;
use super::xml::XmlElement;

/// Engine run state reported by `status` and every continuation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Starting,
    Stopping,
    Stopped,
    Running,
    Break,
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "starting" => Ok(RunStatus::Starting),
            "stopping" => Ok(RunStatus::Stopping),
            "stopped" => Ok(RunStatus::Stopped),
            "running" => Ok(RunStatus::Running),
            "break" => Ok(RunStatus::Break),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusReason {
    Ok,
    Error,
    Aborted,
    Exception,
}

impl FromStr for StatusReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ok" => Ok(StatusReason::Ok),
            "error" => Ok(StatusReason::Error),
            "aborted" => Ok(StatusReason::Aborted),
            "exception" => Ok(StatusReason::Exception),
            other => Err(format!("unknown status reason '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationResponse {
    pub status: RunStatus,
    pub reason: StatusReason,
}

impl ContinuationResponse {
    pub(crate) fn from_response(response: &ResponsePacket) -> Result<Self> {
        let status = response
            .attr("status")
            .ok_or_else(|| DbgpError::malformed(&response.command, "missing status"))?
            .parse()
            .map_err(|e: String| DbgpError::malformed(&response.command, e))?;
        // Engines omit the reason on some replies; treat that as ok.
        let reason = match response.attr("reason") {
            Some(reason) => reason
                .parse()
                .map_err(|e: String| DbgpError::malformed(&response.command, e))?,
            None => StatusReason::Ok,
        };
        Ok(Self { status, reason })
    }

    pub fn is_break(&self) -> bool {
        self.status == RunStatus::Break
    }

    /// The debuggee is gone or about to be.
    pub fn is_terminated(&self) -> bool {
        matches!(self.status, RunStatus::Stopping | RunStatus::Stopped)
    }
}

/// Continuation commands accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuation {
    Run,
    StepInto,
    StepOver,
    StepOut,
    Stop,
    Break,
    Detach,
}

impl Continuation {
    pub fn command(&self) -> &'static str {
        match self {
            Continuation::Run => "run",
            Continuation::StepInto => "step_into",
            Continuation::StepOver => "step_over",
            Continuation::StepOut => "step_out",
            Continuation::Stop => "stop",
            Continuation::Break => "break",
            Continuation::Detach => "detach",
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(
            self,
            Continuation::StepInto | Continuation::StepOver | Continuation::StepOut
        )
    }
}

/// One frame of `stack_get`. Level 0 is the innermost frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub level: u32,
    pub name: String,
    pub file_uri: String,
    pub line: u32,
}

impl StackFrame {
    pub(crate) fn from_xml(element: &XmlElement) -> Self {
        Self {
            level: element.attr_parsed("level").unwrap_or(0),
            name: element.attr("where").unwrap_or_default().to_string(),
            file_uri: element.attr("filename").unwrap_or_default().to_string(),
            line: element.attr_parsed("lineno").unwrap_or(0),
        }
    }

    /// Placeholder used when the engine reports no stack at all.
    pub fn top() -> Self {
        Self {
            level: 0,
            name: String::new(),
            file_uri: String::new(),
            line: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointState {
    Enabled,
    Disabled,
}

impl BreakpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointState::Enabled => "enabled",
            BreakpointState::Disabled => "disabled",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "disabled" {
            BreakpointState::Disabled
        } else {
            BreakpointState::Enabled
        }
    }
}

impl fmt::Display for BreakpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointSetResponse {
    pub id: u32,
    pub state: BreakpointState,
}

impl BreakpointSetResponse {
    pub(crate) fn from_response(response: &ResponsePacket) -> Result<Self> {
        let id = response
            .element
            .attr_parsed("id")
            .ok_or_else(|| DbgpError::malformed(&response.command, "missing breakpoint id"))?;
        let state = BreakpointState::parse(response.attr("state").unwrap_or("enabled"));
        Ok(Self { id, state })
    }
}

/// A breakpoint as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: BreakpointState,
    pub file_uri: String,
    pub line: u32,
    pub hit_count: u32,
}

impl BreakpointInfo {
    pub(crate) fn from_xml(command: &str, element: &XmlElement) -> Result<Self> {
        let id = element
            .attr_parsed("id")
            .ok_or_else(|| DbgpError::malformed(command, "breakpoint without id"))?;
        Ok(Self {
            id,
            kind: element.attr("type").unwrap_or("line").to_string(),
            state: BreakpointState::parse(element.attr("state").unwrap_or("enabled")),
            file_uri: element.attr("filename").unwrap_or_default().to_string(),
            line: element.attr_parsed("lineno").unwrap_or(0),
            hit_count: element.attr_parsed("hit_count").unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub name: String,
    pub supported: bool,
    pub value: String,
}

impl FeatureValue {
    pub(crate) fn from_response(name: &str, response: &ResponsePacket) -> Result<Self> {
        Ok(Self {
            name: response
                .attr("feature_name")
                .unwrap_or(name)
                .to_string(),
            supported: response.element.attr_flag("supported"),
            value: response.element.decoded_text()?.trim().to_string(),
        })
    }
}

/// Redirection mode for `stdout` / `stderr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Disable,
    #[default]
    Copy,
    Redirect,
}

impl OutputMode {
    pub fn code(&self) -> u8 {
        match self {
            OutputMode::Disable => 0,
            OutputMode::Copy => 1,
            OutputMode::Redirect => 2,
        }
    }
}
