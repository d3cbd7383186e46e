//! Log point messages
//!
//! A message is text with `{expression}` interpolation. `\{` and `\}` produce
//! literal braces. A leading run of `{:name:}` directives sets the output
//! category (`info`, `notice`, `error`, `debug`), an output group (`start`,
//! `startCollapsed`, `end`) or the `break` action; directives are never
//! evaluated.

use serde::{Deserialize, Serialize};

use super::BreakpointError;
use crate::dbgp::{Session, StackFrame};
use crate::expr::{CiMap, EvalError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    #[default]
    Info,
    Notice,
    Error,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogGroup {
    Start,
    StartCollapsed,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    /// Stop after logging.
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub category: LogCategory,
    pub group: Option<LogGroup>,
    pub action: Option<LogAction>,
    segments: Vec<Segment>,
}

impl LogMessage {
    pub fn parse(source: &str) -> Result<Self, BreakpointError> {
        let mut message = LogMessage {
            category: LogCategory::default(),
            group: None,
            action: None,
            segments: Vec::new(),
        };

        let mut rest = source;
        while let Some(body) = rest.strip_prefix("{:") {
            let end = body
                .find(":}")
                .ok_or_else(|| invalid(format!("unclosed directive in '{}'", source)))?;
            message.apply_directive(&body[..end])?;
            rest = &body[end + 2..];
        }

        message.segments = parse_segments(rest)?;
        Ok(message)
    }

    fn apply_directive(&mut self, name: &str) -> Result<(), BreakpointError> {
        match name.to_ascii_lowercase().as_str() {
            "info" => self.category = LogCategory::Info,
            "notice" => self.category = LogCategory::Notice,
            "error" => self.category = LogCategory::Error,
            "debug" => self.category = LogCategory::Debug,
            "start" => self.group = Some(LogGroup::Start),
            "startcollapsed" => self.group = Some(LogGroup::StartCollapsed),
            "end" => self.group = Some(LogGroup::End),
            "break" => self.action = Some(LogAction::Break),
            _ => return Err(invalid(format!("unknown directive '{{:{}:}}'", name))),
        }
        Ok(())
    }

    pub fn breaks(&self) -> bool {
        self.action == Some(LogAction::Break)
    }

    /// Expressions embedded in the message, in order.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Expr(expr) => Some(expr.as_str()),
            Segment::Text(_) => None,
        })
    }

    /// Render the message, evaluating each `{expression}` against `frame`.
    ///
    /// Evaluation failures are written inline; only a lost connection is
    /// returned as an error.
    pub async fn format(
        &self,
        session: &Session,
        frame: &StackFrame,
        meta: &CiMap<Value>,
    ) -> Result<String, EvalError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => {
                    match session.eval_with_meta(expr, Some(frame), None, meta).await {
                        Ok(value) => out.push_str(&value.render(session.dialect())),
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            out.push('<');
                            out.push_str(&err.to_string());
                            out.push('>');
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn invalid(message: String) -> BreakpointError {
    BreakpointError::InvalidLogMessage(message)
}

fn parse_segments(source: &str) -> Result<Vec<Segment>, BreakpointError> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some((_, '{' | '}'))) => {
                if let Some((_, brace)) = chars.next() {
                    text.push(brace);
                }
            }
            '{' => {
                let end = closing_brace(source, offset + 1)
                    .ok_or_else(|| invalid(format!("unclosed '{{' at offset {}", offset)))?;
                let expr = source[offset + 1..end].trim();
                if expr.is_empty() {
                    return Err(invalid(format!("empty expression at offset {}", offset)));
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Expr(expr.to_string()));
                while chars.peek().map(|(i, _)| *i <= end).unwrap_or(false) {
                    chars.next();
                }
            }
            _ => text.push(c),
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing an expression that starts at `start`,
/// skipping braces inside string literals.
fn closing_brace(source: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in source[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '}') => return Some(start + i),
            (None, _) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbgp::mock::{MockEngine, MockValue};

    #[test]
    fn test_directives_are_consumed() {
        let message = LogMessage::parse("{:error:}{:startCollapsed:}{:break:}value: {x}").unwrap();
        assert_eq!(message.category, LogCategory::Error);
        assert_eq!(message.group, Some(LogGroup::StartCollapsed));
        assert!(message.breaks());
        assert_eq!(message.expressions().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_directives_only_lead() {
        // Past the leading run, `{...}` is an ordinary expression.
        let message = LogMessage::parse("a {:break:}").unwrap();
        assert!(!message.breaks());
        assert_eq!(message.expressions().collect::<Vec<_>>(), vec![":break:"]);

        let message = LogMessage::parse("plain").unwrap();
        assert!(!message.breaks());
        assert_eq!(message.category, LogCategory::Info);
    }

    #[test]
    fn test_escapes_and_strings() {
        let message = LogMessage::parse(r#"\{literal\} {"}" . a}"#).unwrap();
        assert_eq!(
            message.segments,
            vec![
                Segment::Text("{literal} ".to_string()),
                Segment::Expr(r#""}" . a"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_messages() {
        assert!(LogMessage::parse("x = {x").is_err());
        assert!(LogMessage::parse("{}").is_err());
        assert!(LogMessage::parse("{:nope:}text").is_err());
        assert!(LogMessage::parse("{:info").is_err());
    }

    #[tokio::test]
    async fn test_format_renders_values_and_errors() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("n", MockValue::Integer(3))
            .with_local(
                "point",
                MockValue::object(
                    "Point",
                    1,
                    vec![("x", MockValue::Integer(1)), ("label", MockValue::string("a"))],
                ),
            )
            .connect()
            .await
            .unwrap();
        let frame = StackFrame::top();
        let meta = CiMap::new();

        let message = LogMessage::parse("n={n}, p={point}, twice={n * 2}").unwrap();
        assert_eq!(
            message.format(&session, &frame, &meta).await.unwrap(),
            r#"n=3, p=Point {x: 1, label: "a"}, twice=6"#
        );

        let message = LogMessage::parse("bad={1 +}").unwrap();
        let text = message.format(&session, &frame, &meta).await.unwrap();
        assert!(text.starts_with("bad=<Parse error"));
    }
}
