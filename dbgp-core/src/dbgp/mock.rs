//! Scripted in-process DBGP engine for tests.
//!
//! The engine speaks real DBGP frames over [`tokio::io::duplex`]. It supports
//! the commands [`Session`] issues, keeps variables in two contexts (`Local`
//! and `Global`) and stops wherever the test script tells `run` to stop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tracing::debug;

use super::codec::encode_frame;
use super::error::{codes, error_code_message, Result};
use super::property::child_full_name;
use super::session::{Session, SessionConfig};
use super::xml::{decode_base64, encode_base64, escape};

const DEFAULT_FILE: &str = "file:///C:/test.ahk";

/// A variable value held by the mock engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    String(String),
    Integer(i64),
    Float(f64),
    Object {
        class_name: String,
        address: u64,
        children: Vec<(String, MockValue)>,
    },
}

impl MockValue {
    pub fn string(s: impl Into<String>) -> Self {
        MockValue::String(s.into())
    }

    pub fn object(class_name: &str, address: u64, children: Vec<(&str, MockValue)>) -> Self {
        MockValue::Object {
            class_name: class_name.to_string(),
            address,
            children: children
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Array-like object with `[1]..[n]` children.
    pub fn array(address: u64, items: Vec<MockValue>) -> Self {
        MockValue::Object {
            class_name: "Array".to_string(),
            address,
            children: items
                .into_iter()
                .enumerate()
                .map(|(i, value)| (format!("[{}]", i + 1), value))
                .collect(),
        }
    }

    /// Append a `<base>` child.
    pub fn with_base(mut self, base: MockValue) -> Self {
        if let MockValue::Object { children, .. } = &mut self {
            children.push(("<base>".to_string(), base));
        }
        self
    }
}

#[derive(Debug, Clone)]
struct MockBreakpoint {
    id: u32,
    file_uri: String,
    line: u32,
    enabled: bool,
    hit_count: u32,
}

#[derive(Debug)]
struct MockState {
    language_version: String,
    file_uri: String,
    contexts: Vec<(String, Vec<(String, MockValue)>)>,
    read_only: HashSet<String>,
    features: HashMap<String, String>,
    stops: VecDeque<(String, u32)>,
    line_shifts: HashMap<u32, u32>,
    breakpoints: Vec<MockBreakpoint>,
    next_breakpoint_id: u32,
    position: (String, u32),
    status: &'static str,
    commands: Vec<String>,
}

/// Builder for a mock engine; [`MockEngine::connect`] starts it.
pub struct MockEngine {
    state: MockState,
}

impl MockEngine {
    pub fn new(language_version: &str) -> Self {
        let mut features = HashMap::new();
        features.insert("max_depth".to_string(), "1".to_string());
        features.insert("max_children".to_string(), "1000".to_string());
        features.insert("max_data".to_string(), "1024".to_string());

        Self {
            state: MockState {
                language_version: language_version.to_string(),
                file_uri: DEFAULT_FILE.to_string(),
                contexts: vec![
                    ("Local".to_string(), Vec::new()),
                    ("Global".to_string(), Vec::new()),
                ],
                read_only: HashSet::new(),
                features,
                stops: VecDeque::new(),
                line_shifts: HashMap::new(),
                breakpoints: Vec::new(),
                next_breakpoint_id: 1,
                position: (DEFAULT_FILE.to_string(), 1),
                status: "starting",
                commands: Vec::new(),
            },
        }
    }

    pub fn with_local(mut self, name: &str, value: MockValue) -> Self {
        self.state.contexts[0].1.push((name.to_string(), value));
        self
    }

    pub fn with_global(mut self, name: &str, value: MockValue) -> Self {
        self.state.contexts[1].1.push((name.to_string(), value));
        self
    }

    pub fn with_read_only(mut self, full_name: &str) -> Self {
        self.state.read_only.insert(full_name.to_ascii_lowercase());
        self
    }

    /// Queue a position where the next `run` or step stops.
    pub fn with_stop(mut self, file_uri: &str, line: u32) -> Self {
        self.state.stops.push_back((file_uri.to_string(), line));
        self
    }

    /// Breakpoints requested on `requested` land on `actual`.
    pub fn with_line_shift(mut self, requested: u32, actual: u32) -> Self {
        self.state.line_shifts.insert(requested, actual);
        self
    }

    /// Start serving over an in-memory pipe and return the client end.
    pub fn start(self) -> (DuplexStream, MockHandle) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let state = Arc::new(Mutex::new(self.state));
        tokio::spawn(serve(server, state.clone()));
        (client, MockHandle { state })
    }

    pub async fn connect(self) -> Result<(Session, MockHandle)> {
        self.connect_with(SessionConfig::default()).await
    }

    pub async fn connect_with(self, config: SessionConfig) -> Result<(Session, MockHandle)> {
        let (client, handle) = self.start();
        let session = Session::connect(client, config).await?;
        Ok((session, handle))
    }
}

/// Inspection handle for a running mock engine.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every command line received so far, without the trailing NUL.
    pub async fn commands(&self) -> Vec<String> {
        self.state.lock().await.commands.clone()
    }

    pub async fn variable(&self, context: &str, full_name: &str) -> Option<MockValue> {
        let state = self.state.lock().await;
        let (_, vars) = state
            .contexts
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(context))?;
        find(vars, "", full_name, 0).cloned()
    }

    pub async fn push_stop(&self, file_uri: &str, line: u32) {
        self.state
            .lock()
            .await
            .stops
            .push_back((file_uri.to_string(), line));
    }

    pub async fn count_commands(&self, name: &str) -> usize {
        let prefix = format!("{} ", name);
        self.state
            .lock()
            .await
            .commands
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }
}

async fn serve(mut stream: DuplexStream, state: Arc<Mutex<MockState>>) {
    let init = {
        let state = state.lock().await;
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><init appid="AutoHotkey" idekey="" session="" thread="1" parent="" language="AutoHotkey" language_version="{}" protocol_version="1.0" fileuri="{}"/>"#,
            escape(&state.language_version),
            escape(&state.file_uri)
        )
    };
    if stream.write_all(&encode_frame(&init)).await.is_err() {
        return;
    }

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buffer.extend_from_slice(&chunk[..n]);

        while let Some(pos) = buffer.iter().position(|b| *b == 0) {
            let raw: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            let (reply, close) = state.lock().await.handle(&line);
            if stream.write_all(&encode_frame(&reply)).await.is_err() {
                return;
            }
            if close {
                let _ = stream.shutdown().await;
                return;
            }
        }
    }
}

struct Command {
    name: String,
    transaction_id: String,
    args: HashMap<String, String>,
    data: Option<String>,
}

impl Command {
    fn parse(line: &str) -> Self {
        let mut tokens = tokenize(line).into_iter();
        let name = tokens.next().unwrap_or_default();
        let mut args = HashMap::new();
        let mut data = None;
        while let Some(token) = tokens.next() {
            if token == "--" {
                data = tokens.next();
                break;
            }
            if token.starts_with('-') {
                let value = tokens.next().unwrap_or_default();
                args.insert(token, value);
            }
        }
        let transaction_id = args.remove("-i").unwrap_or_default();
        Self {
            name,
            transaction_id,
            args,
            data,
        }
    }

    fn arg(&self, flag: &str) -> &str {
        self.args.get(flag).map(String::as_str).unwrap_or_default()
    }

    fn arg_num(&self, flag: &str) -> u32 {
        self.arg(flag).parse().unwrap_or(0)
    }
}

/// Split on whitespace, honouring `"..."` with backslash escapes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => match chars.next() {
                        Some('0') => token.push('\0'),
                        Some(escaped) => token.push(escaped),
                        None => {}
                    },
                    _ => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

impl MockState {
    fn handle(&mut self, line: &str) -> (String, bool) {
        debug!(command = line, "mock engine received");
        self.commands.push(line.to_string());
        let cmd = Command::parse(line);

        let result = match cmd.name.as_str() {
            "status" => Ok(self.status_reply(&cmd, "ok")),
            "run" | "step_into" | "step_over" | "step_out" => {
                let reply = self.advance(&cmd);
                let close = self.status == "stopping";
                return (reply, close);
            }
            "break" => {
                self.status = "break";
                Ok(self.status_reply(&cmd, "ok"))
            }
            "stop" | "detach" => {
                self.status = if cmd.name == "stop" { "stopped" } else { "stopping" };
                return (self.status_reply(&cmd, "ok"), true);
            }
            "feature_get" => Ok(self.feature_get(&cmd)),
            "feature_set" => {
                self.features
                    .insert(cmd.arg("-n").to_string(), cmd.arg("-v").to_string());
                Ok(reply(&cmd, r#"success="1""#, ""))
            }
            "stdout" | "stderr" => Ok(reply(&cmd, r#"success="1""#, "")),
            "breakpoint_set" => Ok(self.breakpoint_set(&cmd)),
            "breakpoint_get" => self.breakpoint_get(&cmd),
            "breakpoint_list" => {
                let body: String = self.breakpoints.iter().map(render_breakpoint).collect();
                Ok(reply(&cmd, "", &body))
            }
            "breakpoint_update" => self.breakpoint_update(&cmd),
            "breakpoint_remove" => self.breakpoint_remove(&cmd),
            "stack_depth" => Ok(reply(&cmd, r#"depth="1""#, "")),
            "stack_get" => Ok(self.stack_get(&cmd)),
            "context_names" => {
                let body: String = self
                    .contexts
                    .iter()
                    .enumerate()
                    .map(|(id, (name, _))| format!(r#"<context name="{}" id="{}"/>"#, name, id))
                    .collect();
                Ok(reply(&cmd, "", &body))
            }
            "context_get" => self.context_get(&cmd),
            "property_get" => self.property_get(&cmd),
            "property_value" => self.property_value(&cmd),
            "property_set" => self.property_set(&cmd),
            _ => Err(codes::UNIMPLEMENTED_COMMAND),
        };

        match result {
            Ok(reply) => (reply, false),
            Err(code) => (error_reply(&cmd, code), false),
        }
    }

    fn status_reply(&self, cmd: &Command, reason: &str) -> String {
        reply(
            cmd,
            &format!(r#"status="{}" reason="{}""#, self.status, reason),
            "",
        )
    }

    fn advance(&mut self, cmd: &Command) -> String {
        match self.stops.pop_front() {
            Some((file_uri, line)) => {
                for bp in self
                    .breakpoints
                    .iter_mut()
                    .filter(|bp| bp.enabled && bp.line == line && bp.file_uri == file_uri)
                {
                    bp.hit_count += 1;
                }
                self.position = (file_uri, line);
                self.status = "break";
            }
            None => self.status = "stopping",
        }
        self.status_reply(cmd, "ok")
    }

    fn max_depth(&self) -> usize {
        self.features
            .get("max_depth")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    fn feature_get(&self, cmd: &Command) -> String {
        let name = cmd.arg("-n");
        match self.features.get(name) {
            Some(value) => reply(
                cmd,
                &format!(r#"feature_name="{}" supported="1""#, escape(name)),
                &escape(value),
            ),
            None => reply(
                cmd,
                &format!(r#"feature_name="{}" supported="0""#, escape(name)),
                "",
            ),
        }
    }

    fn breakpoint_set(&mut self, cmd: &Command) -> String {
        let requested = cmd.arg_num("-n");
        let line = self.line_shifts.get(&requested).copied().unwrap_or(requested);
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        self.breakpoints.push(MockBreakpoint {
            id,
            file_uri: cmd.arg("-f").to_string(),
            line,
            enabled: true,
            hit_count: 0,
        });
        reply(cmd, &format!(r#"state="enabled" id="{}""#, id), "")
    }

    fn breakpoint_index(&self, cmd: &Command) -> std::result::Result<usize, u32> {
        let id = cmd.arg_num("-d");
        self.breakpoints
            .iter()
            .position(|bp| bp.id == id)
            .ok_or(codes::NO_SUCH_BREAKPOINT)
    }

    fn breakpoint_get(&self, cmd: &Command) -> std::result::Result<String, u32> {
        let index = self.breakpoint_index(cmd)?;
        Ok(reply(cmd, "", &render_breakpoint(&self.breakpoints[index])))
    }

    fn breakpoint_update(&mut self, cmd: &Command) -> std::result::Result<String, u32> {
        let index = self.breakpoint_index(cmd)?;
        let bp = &mut self.breakpoints[index];
        match cmd.arg("-s") {
            "enabled" => bp.enabled = true,
            "disabled" => bp.enabled = false,
            _ => {}
        }
        if cmd.args.contains_key("-n") {
            bp.line = cmd.arg_num("-n");
        }
        Ok(reply(cmd, "", ""))
    }

    fn breakpoint_remove(&mut self, cmd: &Command) -> std::result::Result<String, u32> {
        let index = self.breakpoint_index(cmd)?;
        self.breakpoints.remove(index);
        Ok(reply(cmd, "", ""))
    }

    fn stack_get(&self, cmd: &Command) -> String {
        if cmd.args.contains_key("-d") && cmd.arg_num("-d") > 0 {
            return reply(cmd, "", "");
        }
        let (file_uri, line) = &self.position;
        let frame = format!(
            r#"<stack level="0" type="file" filename="{}" lineno="{}" where="Auto-execute thread"/>"#,
            escape(file_uri),
            line
        );
        reply(cmd, "", &frame)
    }

    fn context(&self, cmd: &Command) -> std::result::Result<&Vec<(String, MockValue)>, u32> {
        let id = cmd.arg_num("-c") as usize;
        self.contexts
            .get(id)
            .map(|(_, vars)| vars)
            .ok_or(codes::CONTEXT_INVALID)
    }

    fn context_get(&self, cmd: &Command) -> std::result::Result<String, u32> {
        let depth = self.max_depth();
        let body: String = self
            .context(cmd)?
            .iter()
            .map(|(name, value)| render_property(name, name, value, depth))
            .collect();
        Ok(reply(cmd, "", &body))
    }

    fn lookup(&self, cmd: &Command) -> std::result::Result<Option<&MockValue>, u32> {
        let full_name = cmd.arg("-n");
        let vars = self.context(cmd)?;
        match find(vars, "", full_name, 0) {
            Some(value) => Ok(Some(value)),
            // Unknown roots are undefined variables; unknown members do not exist.
            None if is_identifier(full_name) => Ok(None),
            None => Err(codes::PROPERTY_NOT_FOUND),
        }
    }

    fn property_get(&self, cmd: &Command) -> std::result::Result<String, u32> {
        let full_name = cmd.arg("-n");
        let name = leaf_name(full_name);
        let body = match self.lookup(cmd)? {
            Some(value) => render_property(&name, full_name, value, self.max_depth()),
            None => format!(
                r#"<property name="{}" fullname="{}" type="undefined" facet="" size="0" encoding="base64"></property>"#,
                escape(&name),
                escape(full_name)
            ),
        };
        Ok(reply(cmd, "", &body))
    }

    fn property_value(&self, cmd: &Command) -> std::result::Result<String, u32> {
        let text = match self.lookup(cmd)? {
            Some(MockValue::String(s)) => s.clone(),
            Some(MockValue::Integer(i)) => i.to_string(),
            Some(MockValue::Float(f)) => f.to_string(),
            Some(MockValue::Object { class_name, .. }) => class_name.clone(),
            None => String::new(),
        };
        Ok(reply(
            cmd,
            r#"encoding="base64""#,
            &encode_base64(&text),
        ))
    }

    fn property_set(&mut self, cmd: &Command) -> std::result::Result<String, u32> {
        let full_name = cmd.arg("-n").to_string();
        if self.read_only.contains(&full_name.to_ascii_lowercase()) {
            return Ok(reply(cmd, r#"success="0""#, ""));
        }
        let data = cmd
            .data
            .as_deref()
            .map(decode_base64)
            .transpose()
            .map_err(|_| codes::INVALID_OPTIONS)?
            .unwrap_or_default();
        let value = match cmd.arg("-t") {
            "integer" => data
                .trim()
                .parse()
                .map(MockValue::Integer)
                .unwrap_or(MockValue::String(data)),
            "float" => data
                .trim()
                .parse()
                .map(MockValue::Float)
                .unwrap_or(MockValue::String(data)),
            _ => MockValue::String(data),
        };

        let id = cmd.arg_num("-c") as usize;
        let (_, vars) = self.contexts.get_mut(id).ok_or(codes::CONTEXT_INVALID)?;
        match find_mut(vars, "", &full_name, 0) {
            Some(slot) => *slot = value,
            None if is_identifier(&full_name) => vars.push((full_name, value)),
            None => return Err(codes::PROPERTY_NOT_FOUND),
        }
        Ok(reply(cmd, r#"success="1""#, ""))
    }
}

fn reply(cmd: &Command, attrs: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><response xmlns="urn:debugger_protocol_v1" command="{}" transaction_id="{}" {}>{}</response>"#,
        cmd.name, cmd.transaction_id, attrs, body
    )
}

fn error_reply(cmd: &Command, code: u32) -> String {
    let message = error_code_message(code).unwrap_or("unknown error");
    reply(
        cmd,
        "",
        &format!(
            r#"<error code="{}"><message><![CDATA[{}]]></message></error>"#,
            code, message
        ),
    )
}

fn render_breakpoint(bp: &MockBreakpoint) -> String {
    format!(
        r#"<breakpoint id="{}" type="line" state="{}" filename="{}" lineno="{}" hit_count="{}"/>"#,
        bp.id,
        if bp.enabled { "enabled" } else { "disabled" },
        escape(&bp.file_uri),
        bp.line,
        bp.hit_count
    )
}

fn render_property(name: &str, full_name: &str, value: &MockValue, depth: usize) -> String {
    let (kind, text) = match value {
        MockValue::String(s) => ("string", s.clone()),
        MockValue::Integer(i) => ("integer", i.to_string()),
        MockValue::Float(f) => ("float", f.to_string()),
        MockValue::Object {
            class_name,
            address,
            children,
        } => {
            let nested: String = if depth > 0 {
                children
                    .iter()
                    .map(|(child, value)| {
                        render_property(child, &child_full_name(full_name, child), value, depth - 1)
                    })
                    .collect()
            } else {
                String::new()
            };
            return format!(
                r#"<property name="{}" fullname="{}" type="object" classname="{}" address="{}" facet="" size="0" children="{}" numchildren="{}" page="0" pagesize="1000">{}</property>"#,
                escape(name),
                escape(full_name),
                escape(class_name),
                address,
                u8::from(!children.is_empty()),
                children.len(),
                nested
            );
        }
    };
    format!(
        r#"<property name="{}" fullname="{}" type="{}" facet="" size="{}" encoding="base64">{}</property>"#,
        escape(name),
        escape(full_name),
        kind,
        text.len(),
        encode_base64(&text)
    )
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '['])
}

fn leaf_name(full_name: &str) -> String {
    if full_name.ends_with(']') {
        if let Some(pos) = full_name.rfind('[') {
            return full_name[pos..].to_string();
        }
    }
    full_name
        .rsplit('.')
        .next()
        .unwrap_or(full_name)
        .to_string()
}

/// `full` names a strict ancestor of `target`.
fn is_ancestor(full: &str, target: &str) -> bool {
    match target.get(..full.len()) {
        Some(head) if head.eq_ignore_ascii_case(full) => {
            matches!(target.as_bytes().get(full.len()), Some(b'.') | Some(b'['))
        }
        _ => false,
    }
}

fn find<'a>(
    entries: &'a [(String, MockValue)],
    prefix: &str,
    target: &str,
    depth: usize,
) -> Option<&'a MockValue> {
    if depth > 32 {
        return None;
    }
    for (name, value) in entries {
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            child_full_name(prefix, name)
        };
        if full.eq_ignore_ascii_case(target) {
            return Some(value);
        }
        if let MockValue::Object { children, .. } = value {
            if is_ancestor(&full, target) {
                if let Some(found) = find(children, &full, target, depth + 1) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_mut<'a>(
    entries: &'a mut [(String, MockValue)],
    prefix: &str,
    target: &str,
    depth: usize,
) -> Option<&'a mut MockValue> {
    if depth > 32 {
        return None;
    }
    for (name, value) in entries.iter_mut() {
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            child_full_name(prefix, name)
        };
        if full.eq_ignore_ascii_case(target) {
            return Some(value);
        }
        if let MockValue::Object { children, .. } = value {
            if is_ancestor(&full, target) {
                return find_mut(children, &full, target, depth + 1);
            }
        }
    }
    None
}
