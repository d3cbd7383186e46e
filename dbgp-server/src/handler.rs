//! Request handler for dbgp-server

use anyhow::{anyhow, Context, Result};
use dbgp_core::breakpoint::{AdvancedData, BreakpointManager, DebugEvent};
use dbgp_core::dbgp::{Continuation, Session, StackFrame};
use dbgp_core::protocol::{BreakpointView, VariableView};
use dbgp_core::{Request, Response, Value};
use tracing::{debug, info, warn};

pub struct Handler {
    manager: BreakpointManager,
    /// Object depth fetched for `eval` results.
    max_depth: u32,
}

impl Handler {
    pub fn new(manager: BreakpointManager, max_depth: u32) -> Self {
        Self { manager, max_depth }
    }

    fn session(&self) -> &Session {
        self.manager.session()
    }

    /// Handle one request; failures become `{"error": ...}` responses.
    pub async fn handle(&mut self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!("Request failed: {:#}", err);
                Response::error(format!("{:#}", err))
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Eval { expression, level } => self.handle_eval(&expression, level).await,
            Request::Continue => self.handle_continuation(Continuation::Run).await,
            Request::StepInto => self.handle_continuation(Continuation::StepInto).await,
            Request::StepOver => self.handle_continuation(Continuation::StepOver).await,
            Request::StepOut => self.handle_continuation(Continuation::StepOut).await,
            Request::Pause => Ok(Self::pause(self.session()).await),
            Request::Stop => self.handle_continuation(Continuation::Stop).await,
            Request::SetBreakpoint {
                file,
                line,
                advanced,
            } => self.handle_set_breakpoint(&file, line, &advanced).await,
            Request::RemoveBreakpoint { file, line } => {
                let removed = self
                    .manager
                    .unregister(&file, line)
                    .await
                    .with_context(|| format!("Failed to remove breakpoint at {}:{}", file, line))?;
                Ok(Response::Removed { removed })
            }
            Request::StackTrace => {
                let frames = self
                    .session()
                    .stack_get(None)
                    .await
                    .context("Failed to read the call stack")?;
                Ok(Response::StackTrace { frames })
            }
            Request::Variables { level, context } => {
                self.handle_variables(level, context.as_deref()).await
            }
            Request::Shutdown => {
                info!("Shutdown requested");
                if let Err(err) = self.session().detach().await {
                    warn!("Detach failed: {}", err);
                }
                self.session().shutdown();
                Ok(Response::success())
            }
        }
    }

    /// Ask a running engine to break. Safe to call while a continuation is
    /// in flight; the continuation then reports the stop.
    pub async fn pause(session: &Session) -> Response {
        match session.break_execution().await {
            Ok(_) => Response::success(),
            Err(err) => Response::error(err.to_string()),
        }
    }

    async fn handle_eval(&mut self, expression: &str, level: Option<u32>) -> Result<Response> {
        debug!("Eval request: {}", expression);
        let frame = self.frame(level).await?;
        let value = self
            .session()
            .eval(expression, frame.as_ref(), Some(self.max_depth))
            .await?;
        let dialect = self.session().dialect();
        Ok(Response::eval_result(
            value.render(dialect),
            value.type_name().to_string(),
        ))
    }

    async fn handle_continuation(&mut self, continuation: Continuation) -> Result<Response> {
        debug!("{} request", continuation.command());
        let event = self.manager.continue_execution(continuation).await?;
        Ok(match event {
            DebugEvent::Stopped(stopped) => Response::Stopped { stopped },
            DebugEvent::Terminated => Response::Terminated { terminated: true },
        })
    }

    async fn handle_set_breakpoint(
        &mut self,
        file: &str,
        line: u32,
        advanced: &AdvancedData,
    ) -> Result<Response> {
        let breakpoint = self
            .manager
            .register(file, line, advanced)
            .await
            .with_context(|| format!("Failed to set breakpoint at {}:{}", file, line))?;
        Ok(Response::Breakpoint {
            breakpoint: BreakpointView::from(breakpoint),
        })
    }

    async fn handle_variables(&mut self, level: Option<u32>, context: Option<&str>) -> Result<Response> {
        let frame = self
            .frame(level)
            .await?
            .ok_or_else(|| anyhow!("No stack frame at level {}", level.unwrap_or(0)))?;
        let dialect = self.session().dialect();

        let mut variables = Vec::new();
        for ctx in self.session().context_names(&frame).await? {
            if context.is_some_and(|wanted| !wanted.eq_ignore_ascii_case(&ctx.name)) {
                continue;
            }
            let properties = self
                .session()
                .context_get(&ctx)
                .await
                .with_context(|| format!("Failed to read the {} context", ctx.name))?;
            for property in properties {
                let name = property.name().to_string();
                let full_name = property.full_name().to_string();
                let has_children = property
                    .as_object()
                    .is_some_and(|object| object.num_children > 0);
                let value = Value::from_property(property);
                variables.push(VariableView {
                    name,
                    full_name,
                    context: ctx.name.clone(),
                    value_type: value.type_name().to_string(),
                    value: value.render(dialect),
                    has_children,
                });
            }
        }
        Ok(Response::Variables { variables })
    }

    async fn frame(&self, level: Option<u32>) -> Result<Option<StackFrame>> {
        let level = level.unwrap_or(0);
        let frames = self
            .session()
            .stack_get(Some(level))
            .await
            .with_context(|| format!("Failed to read stack level {}", level))?;
        Ok(frames.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_core::dbgp::mock::{MockEngine, MockHandle, MockValue};

    const FILE: &str = "file:///C:/test.ahk";

    async fn handler(engine: MockEngine) -> (Handler, MockHandle) {
        let (session, engine) = engine.connect().await.unwrap();
        (Handler::new(BreakpointManager::new(session, true), 2), engine)
    }

    #[tokio::test]
    async fn test_eval() {
        let (mut handler, _engine) =
            handler(MockEngine::new("2.0.11").with_local("count", MockValue::Integer(41))).await;

        let response = handler
            .handle(Request::Eval {
                expression: "count + 1".to_string(),
                level: None,
            })
            .await;
        match response {
            Response::EvalResult { value, value_type } => {
                assert_eq!(value, "42");
                assert_eq!(value_type, "Integer");
            }
            other => panic!("Expected eval result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eval_error_is_inline() {
        let (mut handler, _engine) = handler(MockEngine::new("2.0.11")).await;
        let response = handler
            .handle(Request::Eval {
                expression: "1 +".to_string(),
                level: None,
            })
            .await;
        let Response::Error { error } = response else {
            panic!("Expected an error response");
        };
        assert!(error.contains("Parse error"));
    }

    #[tokio::test]
    async fn test_breakpoint_round_trip() {
        let (mut handler, _engine) = handler(
            MockEngine::new("2.0.11")
                .with_line_shift(3, 5)
                .with_stop(FILE, 5),
        )
        .await;

        let response = handler
            .handle(Request::SetBreakpoint {
                file: FILE.to_string(),
                line: 3,
                advanced: AdvancedData::default(),
            })
            .await;
        let Response::Breakpoint { breakpoint } = response else {
            panic!("Expected a breakpoint");
        };
        assert_eq!((breakpoint.requested_line, breakpoint.line), (3, 5));

        let Response::Stopped { stopped } = handler.handle(Request::Continue).await else {
            panic!("Expected a stop");
        };
        assert_eq!(stopped.breakpoint_id, Some(breakpoint.id));

        let response = handler
            .handle(Request::RemoveBreakpoint {
                file: FILE.to_string(),
                line: 3,
            })
            .await;
        assert!(matches!(response, Response::Removed { removed: true }));

        let response = handler.handle(Request::Continue).await;
        assert!(matches!(response, Response::Terminated { terminated: true }));
    }

    #[tokio::test]
    async fn test_invalid_hit_condition_is_reported() {
        let (mut handler, _engine) = handler(MockEngine::new("2.0.11")).await;
        let response = handler
            .handle(Request::SetBreakpoint {
                file: FILE.to_string(),
                line: 3,
                advanced: AdvancedData {
                    hit_condition: Some("lots".to_string()),
                    ..AdvancedData::default()
                },
            })
            .await;
        let Response::Error { error } = response else {
            panic!("Expected an error response");
        };
        assert!(error.contains("Invalid hit condition 'lots'"));
    }

    #[tokio::test]
    async fn test_stack_trace_and_variables() {
        let (mut handler, _engine) = handler(
            MockEngine::new("2.0.11")
                .with_local("name", MockValue::string("abc"))
                .with_global(
                    "point",
                    MockValue::object("Point", 1, vec![("x", MockValue::Integer(1))]),
                )
                .with_stop(FILE, 7),
        )
        .await;
        handler.handle(Request::StepInto).await;

        let Response::StackTrace { frames } = handler.handle(Request::StackTrace).await else {
            panic!("Expected a stack trace");
        };
        assert_eq!(frames[0].line, 7);

        let response = handler
            .handle(Request::Variables {
                level: None,
                context: Some("global".to_string()),
            })
            .await;
        let Response::Variables { variables } = response else {
            panic!("Expected variables");
        };
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].name, "point");
        assert_eq!(variables[0].context, "Global");
        assert_eq!(variables[0].value_type, "Point");
        assert!(variables[0].has_children);
    }

    #[tokio::test]
    async fn test_shutdown_detaches() {
        let (mut handler, engine) = handler(MockEngine::new("2.0.11")).await;
        let response = handler.handle(Request::Shutdown).await;
        assert!(matches!(response, Response::Success { ok: true }));
        assert_eq!(engine.count_commands("detach").await, 1);
        assert!(handler.session().is_closed());
    }
}
