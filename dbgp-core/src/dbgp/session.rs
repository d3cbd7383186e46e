//! Typed DBGP command layer
//!
//! [`Session`] wraps one [`Transport`] and offers one method per protocol
//! command. It is cheap to clone; clones share the connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::quote_arg;
use super::error::{DbgpError, Result};
use super::packet::{InitPacket, ResponsePacket};
use super::property::{Context, Property};
use super::transport::{SessionEvent, Transport, TransportConfig};
use super::types::{
    BreakpointInfo, BreakpointSetResponse, BreakpointState, Continuation, ContinuationResponse,
    FeatureValue, OutputMode, StackFrame,
};
use crate::dialect::Dialect;
use crate::expr::{CiMap, EvalError, Evaluator, Value};

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    /// Overrides the dialect derived from the engine's `language_version`.
    pub dialect: Option<Dialect>,
}

#[derive(Debug, Clone)]
pub struct Session {
    transport: Transport,
    init: Arc<InitPacket>,
    dialect: Dialect,
}

impl Session {
    /// Wrap a freshly accepted engine connection and wait for its `init` packet.
    pub async fn connect<S>(stream: S, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Transport::new(stream, config.transport);
        let init = match transport.init().await {
            Ok(init) => init,
            Err(err) => {
                transport.shutdown();
                return Err(err);
            }
        };
        let dialect = config
            .dialect
            .unwrap_or_else(|| Dialect::from_language_version(&init.language_version));
        info!(
            language = %init.language,
            version = %init.language_version,
            %dialect,
            file = %init.file_uri,
            "DBGP session started"
        );

        Ok(Self {
            transport,
            init: Arc::new(init),
            dialect,
        })
    }

    pub fn init(&self) -> &InitPacket {
        &self.init
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.transport.subscribe()
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.transport.shutdown_token()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn send(&self, name: &str, args: &str) -> Result<ResponsePacket> {
        self.transport.send_command(name, args, None).await
    }

    // Run state

    pub async fn status(&self) -> Result<ContinuationResponse> {
        let response = self.send("status", "").await?;
        ContinuationResponse::from_response(&response)
    }

    pub async fn continuation(&self, continuation: Continuation) -> Result<ContinuationResponse> {
        let response = self.send(continuation.command(), "").await?;
        ContinuationResponse::from_response(&response)
    }

    pub async fn run(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::Run).await
    }

    pub async fn step_into(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::StepInto).await
    }

    pub async fn step_over(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::StepOver).await
    }

    pub async fn step_out(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::StepOut).await
    }

    pub async fn stop(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::Stop).await
    }

    pub async fn break_execution(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::Break).await
    }

    pub async fn detach(&self) -> Result<ContinuationResponse> {
        self.continuation(Continuation::Detach).await
    }

    // Features

    pub async fn feature_get(&self, name: &str) -> Result<FeatureValue> {
        let response = self
            .send("feature_get", &format!("-n {}", quote_arg(name)))
            .await?;
        FeatureValue::from_response(name, &response)
    }

    pub async fn feature_set(&self, name: &str, value: &str) -> Result<()> {
        let response = self
            .send(
                "feature_set",
                &format!("-n {} -v {}", quote_arg(name), quote_arg(value)),
            )
            .await?;
        if !response.element.attr_flag("success") {
            return Err(DbgpError::malformed(
                "feature_set",
                format!("engine refused {} = {}", name, value),
            ));
        }
        Ok(())
    }

    // Breakpoints

    pub async fn breakpoint_set_line(&self, file_uri: &str, line: u32) -> Result<BreakpointSetResponse> {
        let response = self
            .send(
                "breakpoint_set",
                &format!("-t line -f {} -n {}", quote_arg(file_uri), line),
            )
            .await?;
        BreakpointSetResponse::from_response(&response)
    }

    pub async fn breakpoint_get(&self, id: u32) -> Result<BreakpointInfo> {
        let response = self.send("breakpoint_get", &format!("-d {}", id)).await?;
        let element = response
            .element
            .child("breakpoint")
            .ok_or_else(|| DbgpError::malformed("breakpoint_get", "no breakpoint element"))?;
        BreakpointInfo::from_xml("breakpoint_get", element)
    }

    pub async fn breakpoint_list(&self) -> Result<Vec<BreakpointInfo>> {
        let response = self.send("breakpoint_list", "").await?;
        response
            .element
            .children_named("breakpoint")
            .map(|element| BreakpointInfo::from_xml("breakpoint_list", element))
            .collect()
    }

    pub async fn breakpoint_update(
        &self,
        id: u32,
        state: Option<BreakpointState>,
        line: Option<u32>,
    ) -> Result<()> {
        let mut args = format!("-d {}", id);
        if let Some(state) = state {
            args.push_str(&format!(" -s {}", state));
        }
        if let Some(line) = line {
            args.push_str(&format!(" -n {}", line));
        }
        self.send("breakpoint_update", &args).await?;
        Ok(())
    }

    pub async fn breakpoint_remove(&self, id: u32) -> Result<()> {
        self.send("breakpoint_remove", &format!("-d {}", id)).await?;
        Ok(())
    }

    // Stack and contexts

    pub async fn stack_depth(&self) -> Result<usize> {
        let response = self.send("stack_depth", "").await?;
        response
            .element
            .attr_parsed("depth")
            .ok_or_else(|| DbgpError::malformed("stack_depth", "missing depth"))
    }

    /// All frames, or only the frame at `depth`.
    pub async fn stack_get(&self, depth: Option<u32>) -> Result<Vec<StackFrame>> {
        let args = depth.map(|d| format!("-d {}", d)).unwrap_or_default();
        let response = self.send("stack_get", &args).await?;
        Ok(response
            .element
            .children_named("stack")
            .map(StackFrame::from_xml)
            .collect())
    }

    /// Contexts of one frame, in the engine's order.
    pub async fn context_names(&self, frame: &StackFrame) -> Result<Vec<Arc<Context>>> {
        let response = self
            .send("context_names", &format!("-d {}", frame.level))
            .await?;
        Ok(response
            .element
            .children_named("context")
            .map(|element| Arc::new(Context::from_xml(element, frame)))
            .collect())
    }

    pub async fn context_get(&self, context: &Arc<Context>) -> Result<Vec<Property>> {
        let response = self
            .send(
                "context_get",
                &format!("-c {} -d {}", context.id, context.frame.level),
            )
            .await?;
        Ok(response
            .element
            .children_named("property")
            .map(|element| Property::from_xml(element, context))
            .collect())
    }

    // Properties

    fn property_args(context: &Context, name: &str) -> String {
        format!(
            "-n {} -c {} -d {}",
            quote_arg(name),
            context.id,
            context.frame.level
        )
    }

    pub async fn property_get(&self, context: &Arc<Context>, name: &str) -> Result<Property> {
        let response = self
            .send("property_get", &Self::property_args(context, name))
            .await?;
        let element = response
            .element
            .child("property")
            .ok_or_else(|| DbgpError::malformed("property_get", "no property element"))?;
        Ok(Property::from_xml(element, context))
    }

    pub async fn property_value(&self, context: &Arc<Context>, name: &str) -> Result<String> {
        let response = self
            .send("property_value", &Self::property_args(context, name))
            .await?;
        response.element.decoded_text()
    }

    /// Write `value` as `type_name`; a read-only target yields `WriteRejected`.
    pub async fn property_set(
        &self,
        context: &Arc<Context>,
        name: &str,
        value: &str,
        type_name: &str,
    ) -> Result<()> {
        let args = format!("{} -t {}", Self::property_args(context, name), type_name);
        let response = self
            .transport
            .send_command("property_set", &args, Some(value))
            .await?;
        if !response.element.attr_flag("success") {
            return Err(DbgpError::WriteRejected {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    // Output redirection

    pub async fn stdout(&self, mode: OutputMode) -> Result<()> {
        self.send("stdout", &format!("-c {}", mode.code())).await?;
        Ok(())
    }

    pub async fn stderr(&self, mode: OutputMode) -> Result<()> {
        self.send("stderr", &format!("-c {}", mode.code())).await?;
        Ok(())
    }

    // Expressions

    /// Evaluate an expression against `frame` (the innermost frame by default).
    pub async fn eval(
        &self,
        expression: &str,
        frame: Option<&StackFrame>,
        max_depth: Option<u32>,
    ) -> std::result::Result<Value, EvalError> {
        self.eval_with_meta(expression, frame, max_depth, &CiMap::new())
            .await
    }

    /// Same as [`Session::eval`], with a metadata map visible to `GetMetaVar`.
    pub async fn eval_with_meta(
        &self,
        expression: &str,
        frame: Option<&StackFrame>,
        max_depth: Option<u32>,
        meta: &CiMap<Value>,
    ) -> std::result::Result<Value, EvalError> {
        let previous = match max_depth {
            Some(depth) => {
                let previous = self.feature_get("max_depth").await?;
                self.feature_set("max_depth", &depth.to_string()).await?;
                Some(previous.value)
            }
            None => None,
        };

        debug!(expression, "evaluating");
        let result = Evaluator::new(self, frame.cloned(), meta)
            .eval(expression)
            .await;

        if let Some(previous) = previous {
            if let Err(err) = self.feature_set("max_depth", &previous).await {
                warn!("failed to restore max_depth: {}", err);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbgp::mock::{MockEngine, MockValue};
    use crate::dbgp::types::RunStatus;

    const FILE: &str = "file:///C:/test.ahk";

    #[tokio::test]
    async fn test_dialect_from_init() {
        let (session, _engine) = MockEngine::new("1.1.36.02").connect().await.unwrap();
        assert_eq!(session.dialect(), Dialect::V1);

        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        assert_eq!(session.dialect(), Dialect::V2);
        assert_eq!(session.init().file_uri, FILE);
    }

    #[tokio::test]
    async fn test_dialect_override() {
        let config = SessionConfig {
            dialect: Some(Dialect::V2),
            ..Default::default()
        };
        let (session, _engine) = MockEngine::new("1.1.36.02")
            .connect_with(config)
            .await
            .unwrap();
        assert_eq!(session.dialect(), Dialect::V2);
    }

    #[tokio::test]
    async fn test_breakpoint_commands() {
        let (session, engine) = MockEngine::new("2.0.11")
            .with_line_shift(4, 6)
            .connect()
            .await
            .unwrap();

        let set = session.breakpoint_set_line(FILE, 4).await.unwrap();
        assert_eq!(set.state, BreakpointState::Enabled);
        let info = session.breakpoint_get(set.id).await.unwrap();
        assert_eq!(info.line, 6);

        session
            .breakpoint_update(set.id, Some(BreakpointState::Disabled), None)
            .await
            .unwrap();
        let list = session.breakpoint_list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].state, BreakpointState::Disabled);

        session.breakpoint_remove(set.id).await.unwrap();
        assert!(session.breakpoint_list().await.unwrap().is_empty());

        let err = session.breakpoint_get(set.id).await.unwrap_err();
        assert_eq!(err.code(), Some(crate::dbgp::error::codes::NO_SUCH_BREAKPOINT));

        let commands = engine.commands().await;
        assert!(commands.contains(&format!("breakpoint_set -i 1 -t line -f {} -n 4", FILE)));
    }

    #[tokio::test]
    async fn test_run_and_stack() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_stop(FILE, 10)
            .connect()
            .await
            .unwrap();

        let status = session.run().await.unwrap();
        assert_eq!(status.status, RunStatus::Break);
        assert_eq!(session.stack_depth().await.unwrap(), 1);
        let frames = session.stack_get(None).await.unwrap();
        assert_eq!(frames[0].line, 10);
        assert_eq!(frames[0].file_uri, FILE);

        let status = session.run().await.unwrap();
        assert!(status.is_terminated());
    }

    #[tokio::test]
    async fn test_contexts_and_properties() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("count", MockValue::Integer(3))
            .with_global("title", MockValue::string("hello world"))
            .connect()
            .await
            .unwrap();

        let frame = session.stack_get(None).await.unwrap().remove(0);
        let contexts = session.context_names(&frame).await.unwrap();
        let names: Vec<_> = contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Local", "Global"]);

        let locals = session.context_get(&contexts[0]).await.unwrap();
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].name(), "count");

        let title = session.property_value(&contexts[1], "title").await.unwrap();
        assert_eq!(title, "hello world");

        let missing = session.property_get(&contexts[0], "title").await.unwrap();
        assert!(missing.is_undefined());
    }

    #[tokio::test]
    async fn test_property_set_and_rejection() {
        let (session, engine) = MockEngine::new("2.0.11")
            .with_local("n", MockValue::Integer(1))
            .with_local("ro", MockValue::Integer(1))
            .with_read_only("ro")
            .connect()
            .await
            .unwrap();
        let frame = StackFrame::top();
        let contexts = session.context_names(&frame).await.unwrap();

        session
            .property_set(&contexts[0], "n", "10", "integer")
            .await
            .unwrap();
        assert_eq!(
            engine.variable("Local", "n").await,
            Some(MockValue::Integer(10))
        );
        let commands = engine.commands().await;
        assert!(commands.contains(&"property_set -i 2 -n n -c 0 -d 0 -t integer -- MTA=".to_string()));

        let err = session
            .property_set(&contexts[0], "ro", "2", "integer")
            .await
            .unwrap_err();
        assert!(matches!(err, DbgpError::WriteRejected { ref name } if name == "ro"));
    }

    #[tokio::test]
    async fn test_eval_restores_max_depth() {
        let (session, engine) = MockEngine::new("2.0.11")
            .with_local("n", MockValue::Integer(41))
            .connect()
            .await
            .unwrap();

        let value = session.eval("n + 1", None, Some(3)).await.unwrap();
        assert_eq!(value.to_string(), "42");
        assert_eq!(session.feature_get("max_depth").await.unwrap().value, "1");

        let commands = engine.commands().await;
        assert!(commands.iter().any(|c| c.contains("feature_set") && c.ends_with("-v 3")));
    }

    #[tokio::test]
    async fn test_commands_after_stop_fail() {
        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        let mut events = session.subscribe();
        let status = session.stop().await.unwrap();
        assert_eq!(status.status, RunStatus::Stopped);

        assert_eq!(events.recv().await.unwrap(), SessionEvent::Closed);
        assert!(matches!(
            session.status().await,
            Err(DbgpError::ConnectionClosed)
        ));
    }
}
