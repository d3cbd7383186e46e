//! DBGP frame codec
//!
//! Engine to client: `<decimal length>\0<xml payload>\0`.
//! Client to engine: `<command> -i <transaction id> [args] [-- base64(data)]\0`.

use tracing::{debug, warn};

use super::error::{DbgpError, Result};
use super::xml::{encode_base64, XmlElement};

/// Incremental decoder for the engine's byte stream.
///
/// Feed it whatever the socket returns; it keeps partial frames buffered and
/// hands back every complete payload, in arrival order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Length announced by the most recent header, awaiting its payload.
    declared_len: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return all payloads completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == 0) {
            let segment = &self.buffer[consumed..consumed + offset];
            consumed += offset + 1;

            match self.declared_len.take() {
                None => {
                    let len = parse_length(segment)?;
                    self.declared_len = Some(len);
                }
                Some(len) => {
                    if segment.len() != len {
                        warn!(
                            declared = len,
                            actual = segment.len(),
                            "DBGP payload length does not match its header"
                        );
                    }
                    frames.push(String::from_utf8_lossy(segment).into_owned());
                }
            }
        }
        self.buffer.drain(..consumed);

        Ok(frames)
    }

    /// Same as [`FrameDecoder::push`] but parses each payload as XML.
    pub fn push_xml(&mut self, bytes: &[u8]) -> Result<Vec<XmlElement>> {
        self.push(bytes)?
            .iter()
            .map(|payload| XmlElement::parse(payload))
            .collect()
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_length(segment: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(segment)
        .map_err(|_| DbgpError::Framing("length prefix is not ASCII".to_string()))?;
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        let preview: String = text.chars().take(32).collect();
        return Err(DbgpError::Framing(format!(
            "expected a decimal length prefix, found {:?}",
            preview
        )));
    }
    text.parse()
        .map_err(|_| DbgpError::Framing(format!("length prefix {} out of range", text)))
}

/// Build the bytes for one command.
pub fn encode_command(name: &str, transaction_id: u32, args: &str, data: Option<&str>) -> Vec<u8> {
    let mut line = format!("{} -i {}", name, transaction_id);
    let args = args.trim();
    if !args.is_empty() {
        line.push(' ');
        line.push_str(args);
    }
    if let Some(data) = data {
        line.push_str(" -- ");
        line.push_str(&encode_base64(data));
    }
    debug!(command = %line, "encoded DBGP command");

    let mut bytes = line.into_bytes();
    bytes.push(0);
    bytes
}

/// Quote an argument value when the engine's tokenizer would split it.
pub fn quote_arg(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\0');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Frame an XML payload the way an engine does. Used by the mock engine and tests.
pub fn encode_frame(xml: &str) -> Vec<u8> {
    let mut bytes = xml.len().to_string().into_bytes();
    bytes.push(0);
    bytes.extend_from_slice(xml.as_bytes());
    bytes.push(0);
    bytes
}
