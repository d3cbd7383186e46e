//! Line breakpoints with client-side conditions
//!
//! The engine only knows plain line breakpoints. Conditions, hit conditions
//! and log messages are checked here whenever the engine breaks: the manager
//! decides whether the break is reported to the IDE or silently continued.

pub mod condition;
pub mod log_message;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dbgp::error::codes;
use crate::dbgp::{BreakpointState, Continuation, DbgpError, Session, StackFrame};
use crate::expr::{CiMap, EvalError, Value};

pub use condition::{should_break, HitCondition, HitOperator};
pub use log_message::{LogAction, LogCategory, LogGroup, LogMessage};

#[derive(Error, Debug, Clone)]
pub enum BreakpointError {
    #[error("Invalid hit condition '{0}'")]
    InvalidHitCondition(String),

    #[error("Invalid log message: {0}")]
    InvalidLogMessage(String),

    #[error(transparent)]
    Dbgp(#[from] DbgpError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl BreakpointError {
    /// The connection is gone.
    pub fn is_fatal(&self) -> bool {
        match self {
            BreakpointError::Dbgp(err) => err.is_fatal(),
            BreakpointError::Eval(err) => err.is_fatal(),
            _ => false,
        }
    }
}

/// Client-side behavior requested for a breakpoint, as the IDE sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedData {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
    #[serde(default)]
    pub log_message: Option<String>,
}

impl AdvancedData {
    pub fn is_empty(&self) -> bool {
        self.condition.is_none() && self.hit_condition.is_none() && self.log_message.is_none()
    }
}

/// A verified line breakpoint.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: u32,
    pub file_uri: String,
    /// Line the engine placed the breakpoint on.
    pub line: u32,
    /// Line the IDE asked for.
    pub requested_line: u32,
    pub state: BreakpointState,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
    pub log_message: Option<LogMessage>,
    pub hit_count: u32,
}

impl Breakpoint {
    fn is_at(&self, file_uri: &str, line: u32) -> bool {
        self.file_uri.eq_ignore_ascii_case(file_uri) && self.line == line
    }

    fn was_requested_at(&self, file_uri: &str, line: u32) -> bool {
        self.file_uri.eq_ignore_ascii_case(file_uri)
            && (self.line == line || self.requested_line == line)
    }

    /// Log points that only log never pause.
    pub fn is_log_point(&self) -> bool {
        self.log_message.is_some()
    }

    fn apply(&mut self, advanced: ParsedAdvanced) {
        self.condition = advanced.condition;
        self.hit_condition = advanced.hit_condition;
        self.log_message = advanced.log_message;
    }
}

/// Advanced data after validation.
struct ParsedAdvanced {
    condition: Option<String>,
    hit_condition: Option<HitCondition>,
    log_message: Option<LogMessage>,
}

impl ParsedAdvanced {
    fn parse(data: &AdvancedData) -> Result<Self, BreakpointError> {
        let non_blank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            condition: non_blank(&data.condition),
            hit_condition: non_blank(&data.hit_condition)
                .map(|s| s.parse())
                .transpose()?,
            log_message: data
                .log_message
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(LogMessage::parse)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    pub reason: StopReason,
    pub breakpoint_id: Option<u32>,
    pub frame: Option<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub category: LogCategory,
    pub group: Option<LogGroup>,
    pub text: String,
    pub file_uri: String,
    pub line: u32,
}

/// Where a continuation ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum DebugEvent {
    Stopped(StoppedEvent),
    Terminated,
}

enum Verdict {
    Stop(Option<u32>),
    Continue,
}

pub struct BreakpointManager {
    session: Session,
    breakpoints: Vec<Breakpoint>,
    /// Check conditions, hit conditions and log messages on breaks.
    advanced: bool,
    output: broadcast::Sender<OutputEvent>,
}

impl BreakpointManager {
    pub fn new(session: Session, advanced: bool) -> Self {
        let (output, _) = broadcast::channel(256);
        Self {
            session,
            breakpoints: Vec::new(),
            advanced,
            output,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Log point output and condition failures.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.output.subscribe()
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Breakpoint the engine placed at `file_uri:line`.
    pub fn find(&self, file_uri: &str, line: u32) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.is_at(file_uri, line))
    }

    /// Set a breakpoint, or update the advanced data of an existing one.
    pub async fn register(
        &mut self,
        file_uri: &str,
        line: u32,
        advanced: &AdvancedData,
    ) -> Result<&Breakpoint, BreakpointError> {
        let parsed = ParsedAdvanced::parse(advanced)?;

        if let Some(index) = self
            .breakpoints
            .iter()
            .position(|bp| bp.was_requested_at(file_uri, line))
        {
            debug!(file_uri, line, "updating breakpoint");
            let breakpoint = &mut self.breakpoints[index];
            breakpoint.apply(parsed);
            return Ok(breakpoint);
        }

        let set = self.session.breakpoint_set_line(file_uri, line).await?;
        // The engine moves breakpoints to the next line with code.
        let verified = self.session.breakpoint_get(set.id).await?;
        info!(
            id = set.id,
            file_uri,
            requested = line,
            actual = verified.line,
            "breakpoint set"
        );

        let mut breakpoint = Breakpoint {
            id: set.id,
            file_uri: file_uri.to_string(),
            line: verified.line,
            requested_line: line,
            state: set.state,
            condition: None,
            hit_condition: None,
            log_message: None,
            hit_count: 0,
        };
        breakpoint.apply(parsed);
        self.breakpoints.push(breakpoint);
        Ok(&self.breakpoints[self.breakpoints.len() - 1])
    }

    /// Remove the breakpoint requested or placed at `file_uri:line`.
    pub async fn unregister(&mut self, file_uri: &str, line: u32) -> Result<bool, BreakpointError> {
        let Some(index) = self
            .breakpoints
            .iter()
            .position(|bp| bp.was_requested_at(file_uri, line))
        else {
            return Ok(false);
        };
        let breakpoint = self.breakpoints.remove(index);
        self.remove_remote(breakpoint.id).await?;
        Ok(true)
    }

    /// Remove every breakpoint in `file_uri`; returns how many were removed.
    pub async fn unregister_file(&mut self, file_uri: &str) -> Result<usize, BreakpointError> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.breakpoints)
            .into_iter()
            .partition(|bp| bp.file_uri.eq_ignore_ascii_case(file_uri));
        self.breakpoints = kept;
        for breakpoint in &removed {
            self.remove_remote(breakpoint.id).await?;
        }
        Ok(removed.len())
    }

    async fn remove_remote(&self, id: u32) -> Result<(), BreakpointError> {
        match self.session.breakpoint_remove(id).await {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some(codes::NO_SUCH_BREAKPOINT) => {
                debug!(id, "breakpoint already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Send `continuation` and keep running past breaks the breakpoint
    /// filters reject. Steps always stop.
    pub async fn continue_execution(
        &mut self,
        continuation: Continuation,
    ) -> Result<DebugEvent, BreakpointError> {
        match self.drive(continuation).await {
            Err(err) if err.is_fatal() => {
                info!("session closed during {}", continuation.command());
                Ok(DebugEvent::Terminated)
            }
            other => other,
        }
    }

    async fn drive(&mut self, continuation: Continuation) -> Result<DebugEvent, BreakpointError> {
        let mut next = continuation;
        loop {
            let started = Instant::now();
            let response = self.session.continuation(next).await?;
            if response.is_terminated() {
                return Ok(DebugEvent::Terminated);
            }

            let frame = self.session.stack_get(Some(0)).await?.into_iter().next();
            if !response.is_break() || !matches!(next, Continuation::Run) {
                let reason = if next.is_step() {
                    StopReason::Step
                } else {
                    StopReason::Pause
                };
                return Ok(stopped(reason, None, frame));
            }
            if !self.advanced {
                let id = frame
                    .as_ref()
                    .and_then(|f| self.find(&f.file_uri, f.line))
                    .map(|bp| bp.id);
                return Ok(stopped(StopReason::Breakpoint, id, frame));
            }
            let Some(frame) = frame else {
                return Ok(stopped(StopReason::Breakpoint, None, None));
            };

            match self.check(&frame, started.elapsed()).await? {
                Verdict::Stop(id) => return Ok(stopped(StopReason::Breakpoint, id, Some(frame))),
                Verdict::Continue => {
                    debug!(file_uri = %frame.file_uri, line = frame.line, "continuing past break");
                    next = Continuation::Run;
                }
            }
        }
    }

    /// Decide whether a break at `frame` is reported.
    async fn check(&mut self, frame: &StackFrame, elapsed: Duration) -> Result<Verdict, BreakpointError> {
        let Some(breakpoint) = self
            .breakpoints
            .iter_mut()
            .find(|bp| bp.is_at(&frame.file_uri, frame.line))
        else {
            // Not ours: a hard-coded break or a breakpoint set elsewhere.
            return Ok(Verdict::Stop(None));
        };
        breakpoint.hit_count += 1;
        let id = breakpoint.id;
        let hit_count = breakpoint.hit_count;
        let condition = breakpoint.condition.clone();
        let hit_condition = breakpoint.hit_condition;
        let log_message = breakpoint.log_message.clone();

        let meta = metadata(hit_count, elapsed);

        let condition_result = match &condition {
            Some(expression) => Some(self.eval_condition(expression, frame, &meta).await?),
            None => None,
        };
        let hit_result = hit_condition.map(|h| h.matches(hit_count));
        if !should_break(condition_result, hit_result) {
            debug!(id, hit_count, "breakpoint filtered out");
            return Ok(Verdict::Continue);
        }

        let Some(log_message) = log_message else {
            return Ok(Verdict::Stop(Some(id)));
        };
        let text = log_message.format(&self.session, frame, &meta).await?;
        self.emit(OutputEvent {
            category: log_message.category,
            group: log_message.group,
            text,
            file_uri: frame.file_uri.clone(),
            line: frame.line,
        });
        Ok(if log_message.breaks() {
            Verdict::Stop(Some(id))
        } else {
            Verdict::Continue
        })
    }

    /// Condition truthiness; a failing condition is reported and stops.
    async fn eval_condition(
        &self,
        expression: &str,
        frame: &StackFrame,
        meta: &CiMap<Value>,
    ) -> Result<bool, BreakpointError> {
        match self
            .session
            .eval_with_meta(expression, Some(frame), None, meta)
            .await
        {
            Ok(value) => Ok(value.is_truthy()),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                warn!(expression, "breakpoint condition failed: {}", err);
                self.emit(OutputEvent {
                    category: LogCategory::Error,
                    group: None,
                    text: format!("Breakpoint condition '{}' failed: {}", expression, err),
                    file_uri: frame.file_uri.clone(),
                    line: frame.line,
                });
                Ok(true)
            }
        }
    }

    fn emit(&self, event: OutputEvent) {
        // No subscribers is fine; output is then dropped.
        let _ = self.output.send(event);
    }
}

fn stopped(reason: StopReason, breakpoint_id: Option<u32>, frame: Option<StackFrame>) -> DebugEvent {
    DebugEvent::Stopped(StoppedEvent {
        reason,
        breakpoint_id,
        frame,
    })
}

/// Values visible to `GetMetaVar` while a breakpoint is checked.
fn metadata(hit_count: u32, elapsed: Duration) -> CiMap<Value> {
    let mut meta = CiMap::new();
    meta.insert("hitCount", Value::integer(i64::from(hit_count)));
    meta.insert(
        "elapsedTime_ns",
        Value::integer(i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)),
    );
    meta.insert("elapsedTime_ms", Value::float(elapsed.as_secs_f64() * 1000.0));
    meta.insert("elapsedTime_s", Value::float(elapsed.as_secs_f64()));
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbgp::mock::{MockEngine, MockHandle, MockValue};

    const FILE: &str = "file:///C:/test.ahk";

    async fn manager(engine: MockEngine) -> (BreakpointManager, MockHandle) {
        let (session, handle) = engine.connect().await.unwrap();
        (BreakpointManager::new(session, true), handle)
    }

    fn advanced(condition: Option<&str>, hit: Option<&str>, log: Option<&str>) -> AdvancedData {
        AdvancedData {
            condition: condition.map(str::to_string),
            hit_condition: hit.map(str::to_string),
            log_message: log.map(str::to_string),
        }
    }

    fn stop_id(event: &DebugEvent) -> Option<u32> {
        match event {
            DebugEvent::Stopped(stopped) => stopped.breakpoint_id,
            DebugEvent::Terminated => None,
        }
    }

    #[tokio::test]
    async fn test_register_verifies_line() {
        let (mut manager, engine) =
            manager(MockEngine::new("2.0.11").with_line_shift(4, 6)).await;

        let bp = manager.register(FILE, 4, &AdvancedData::default()).await.unwrap();
        assert_eq!((bp.requested_line, bp.line), (4, 6));
        assert!(manager.find(FILE, 6).is_some());
        assert!(manager.find(FILE, 4).is_none());

        // Registering again updates in place.
        manager
            .register(FILE, 4, &advanced(Some("x > 1"), None, None))
            .await
            .unwrap();
        assert_eq!(manager.breakpoints().len(), 1);
        assert_eq!(engine.count_commands("breakpoint_set").await, 1);

        assert!(manager.unregister(FILE, 4).await.unwrap());
        assert!(!manager.unregister(FILE, 4).await.unwrap());
        assert_eq!(engine.count_commands("breakpoint_remove").await, 1);
    }

    #[tokio::test]
    async fn test_invalid_advanced_data_is_rejected_before_setting() {
        let (mut manager, engine) = manager(MockEngine::new("2.0.11")).await;
        let result = manager
            .register(FILE, 3, &advanced(None, Some("often"), None))
            .await;
        assert!(matches!(result, Err(BreakpointError::InvalidHitCondition(_))));
        assert_eq!(engine.count_commands("breakpoint_set").await, 0);
    }

    #[tokio::test]
    async fn test_unregister_file() {
        let (mut manager, _engine) = manager(MockEngine::new("2.0.11")).await;
        manager.register(FILE, 1, &AdvancedData::default()).await.unwrap();
        manager.register(FILE, 2, &AdvancedData::default()).await.unwrap();
        manager
            .register("file:///C:/other.ahk", 1, &AdvancedData::default())
            .await
            .unwrap();

        assert_eq!(manager.unregister_file(FILE).await.unwrap(), 2);
        assert_eq!(manager.breakpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_hit_condition_stops_on_third_hit() {
        let (mut manager, engine) = manager(
            MockEngine::new("2.0.11")
                .with_stop(FILE, 10)
                .with_stop(FILE, 10)
                .with_stop(FILE, 10)
                .with_stop(FILE, 10),
        )
        .await;
        let id = manager
            .register(FILE, 10, &advanced(None, Some(">= 3"), None))
            .await
            .unwrap()
            .id;

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(stop_id(&event), Some(id));
        assert_eq!(engine.count_commands("run").await, 3);
        assert_eq!(manager.find(FILE, 10).unwrap().hit_count, 3);

        // Fourth hit also satisfies >= 3.
        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(stop_id(&event), Some(id));
    }

    #[tokio::test]
    async fn test_log_point_never_stops() {
        let (mut manager, _engine) = manager(
            MockEngine::new("2.0.11")
                .with_local("x", MockValue::Integer(5))
                .with_stop(FILE, 10)
                .with_stop(FILE, 10),
        )
        .await;
        manager
            .register(FILE, 10, &advanced(None, None, Some("x is {x}")))
            .await
            .unwrap();
        let mut output = manager.subscribe();

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(event, DebugEvent::Terminated);

        for _ in 0..2 {
            let line = output.try_recv().unwrap();
            assert_eq!(line.text, "x is 5");
            assert_eq!(line.category, LogCategory::Info);
            assert_eq!(line.line, 10);
        }
        assert!(output.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_break_directive_stops_after_logging() {
        let (mut manager, _engine) =
            manager(MockEngine::new("2.0.11").with_stop(FILE, 10)).await;
        manager
            .register(
                FILE,
                10,
                &advanced(None, None, Some("{:break:}hit {GetMetaVar(\"hitCount\")}")),
            )
            .await
            .unwrap();
        let mut output = manager.subscribe();

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert!(matches!(event, DebugEvent::Stopped(_)));
        assert_eq!(output.try_recv().unwrap().text, "hit 1");
    }

    #[tokio::test]
    async fn test_condition_filters_breaks() {
        let (mut manager, engine) = manager(
            MockEngine::new("2.0.11")
                .with_local("x", MockValue::Integer(5))
                .with_stop(FILE, 10)
                .with_stop(FILE, 20),
        )
        .await;
        manager
            .register(FILE, 10, &advanced(Some("x > 10"), None, None))
            .await
            .unwrap();
        let id = manager
            .register(FILE, 20, &advanced(Some("x > 3"), None, None))
            .await
            .unwrap()
            .id;

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(stop_id(&event), Some(id));
        assert_eq!(engine.count_commands("run").await, 2);
    }

    #[tokio::test]
    async fn test_condition_and_hit_condition_must_both_hold() {
        let (mut manager, _engine) = manager(
            MockEngine::new("2.0.11")
                .with_local("x", MockValue::Integer(5))
                .with_stop(FILE, 10)
                .with_stop(FILE, 10),
        )
        .await;
        let id = manager
            .register(FILE, 10, &advanced(Some("x = 5"), Some("= 2"), None))
            .await
            .unwrap()
            .id;

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(stop_id(&event), Some(id));
        assert_eq!(manager.find(FILE, 10).unwrap().hit_count, 2);
    }

    #[tokio::test]
    async fn test_failing_condition_reports_and_stops() {
        let (mut manager, _engine) =
            manager(MockEngine::new("2.0.11").with_stop(FILE, 10)).await;
        manager
            .register(FILE, 10, &advanced(Some("1 +"), None, None))
            .await
            .unwrap();
        let mut output = manager.subscribe();

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert!(matches!(event, DebugEvent::Stopped(_)));
        let line = output.try_recv().unwrap();
        assert_eq!(line.category, LogCategory::Error);
        assert!(line.text.contains("Parse error"));
    }

    #[tokio::test]
    async fn test_steps_always_stop() {
        let (mut manager, _engine) =
            manager(MockEngine::new("2.0.11").with_stop(FILE, 10)).await;
        manager
            .register(FILE, 10, &advanced(Some("0"), None, None))
            .await
            .unwrap();

        let event = manager
            .continue_execution(Continuation::StepOver)
            .await
            .unwrap();
        let DebugEvent::Stopped(stopped) = event else {
            panic!("Expected a stop");
        };
        assert_eq!(stopped.reason, StopReason::Step);
        assert_eq!(stopped.frame.map(|f| f.line), Some(10));
    }

    #[tokio::test]
    async fn test_plain_mode_reports_every_break() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_stop(FILE, 10)
            .connect()
            .await
            .unwrap();
        let mut manager = BreakpointManager::new(session, false);
        let id = manager
            .register(FILE, 10, &advanced(Some("0"), None, None))
            .await
            .unwrap()
            .id;

        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(stop_id(&event), Some(id));
    }

    #[tokio::test]
    async fn test_end_of_script_terminates() {
        let (mut manager, _engine) = manager(MockEngine::new("2.0.11")).await;
        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(event, DebugEvent::Terminated);
        // The engine hung up; later continuations report termination too.
        let event = manager.continue_execution(Continuation::Run).await.unwrap();
        assert_eq!(event, DebugEvent::Terminated);
    }
}
