//! Engine to client packets

use serde::{Deserialize, Serialize};

use super::error::{DbgpError, Result};
use super::xml::XmlElement;

/// The one-shot packet an engine sends right after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPacket {
    pub app_id: String,
    pub ide_key: String,
    pub session: String,
    pub thread: String,
    pub parent: String,
    pub language: String,
    pub language_version: String,
    pub protocol_version: String,
    pub file_uri: String,
}

impl InitPacket {
    fn from_xml(element: &XmlElement) -> Self {
        let attr = |name: &str| element.attr(name).unwrap_or_default().to_string();
        Self {
            app_id: attr("appid"),
            ide_key: attr("idekey"),
            session: attr("session"),
            thread: attr("thread"),
            parent: attr("parent"),
            language: attr("language"),
            language_version: attr("language_version"),
            protocol_version: attr("protocol_version"),
            file_uri: attr("fileuri"),
        }
    }
}

/// A `<response>` packet, still in XML form.
///
/// Typed views are built by [`crate::dbgp::Session`]; the transport only needs
/// the command name, the transaction id and the error element.
#[derive(Debug, Clone)]
pub struct ResponsePacket {
    pub command: String,
    pub transaction_id: u32,
    pub element: XmlElement,
}

impl ResponsePacket {
    fn from_xml(element: XmlElement) -> Result<Self> {
        let command = element.attr("command").unwrap_or_default().to_string();
        let transaction_id = element
            .attr_parsed::<u32>("transaction_id")
            .ok_or_else(|| DbgpError::malformed(&command, "missing transaction_id"))?;
        Ok(Self {
            command,
            transaction_id,
            element,
        })
    }

    /// The `<error code=N>` child, converted to a protocol error.
    pub fn error(&self) -> Option<DbgpError> {
        let error = self.element.child("error")?;
        let code = error.attr_parsed::<u32>("code").unwrap_or(999);
        let message = error
            .child("message")
            .map(|m| m.decoded_text().unwrap_or_else(|_| m.text.clone()))
            .map(|m| m.trim().to_string());
        Some(DbgpError::protocol(&self.command, code, message))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.element.attr(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub enum Packet {
    Init(InitPacket),
    Response(ResponsePacket),
    Stream { kind: StreamKind, text: String },
    Notify { name: String, element: XmlElement },
    Unknown(XmlElement),
}

impl Packet {
    pub fn from_xml(element: XmlElement) -> Result<Self> {
        match element.name.as_str() {
            "init" => Ok(Packet::Init(InitPacket::from_xml(&element))),
            "response" => Ok(Packet::Response(ResponsePacket::from_xml(element)?)),
            "stream" => {
                let kind = match element.attr("type") {
                    Some("stderr") => StreamKind::Stderr,
                    _ => StreamKind::Stdout,
                };
                let text = element.decoded_text()?;
                Ok(Packet::Stream { kind, text })
            }
            "notify" => Ok(Packet::Notify {
                name: element.attr("name").unwrap_or_default().to_string(),
                element,
            }),
            _ => Ok(Packet::Unknown(element)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(xml: &str) -> Packet {
        Packet::from_xml(XmlElement::parse(xml).unwrap()).unwrap()
    }

    #[test]
    fn test_init_packet() {
        let p = packet(
            r#"<init appid="AutoHotkey" idekey="" session="" thread="7" parent="" language="AutoHotkey" language_version="1.1.36.02" protocol_version="1.0" fileuri="file:///C:/test.ahk"/>"#,
        );
        let Packet::Init(init) = p else {
            panic!("Expected init");
        };
        assert_eq!(init.language_version, "1.1.36.02");
        assert_eq!(init.file_uri, "file:///C:/test.ahk");
    }

    #[test]
    fn test_response_with_error() {
        let p = packet(
            r#"<response command="breakpoint_set" transaction_id="4"><error code="200"><message><![CDATA[nope]]></message></error></response>"#,
        );
        let Packet::Response(response) = p else {
            panic!("Expected response");
        };
        assert_eq!(response.transaction_id, 4);
        let err = response.error().unwrap();
        assert_eq!(err.code(), Some(200));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_response_without_transaction_id() {
        let element = XmlElement::parse(r#"<response command="run"/>"#).unwrap();
        assert!(Packet::from_xml(element).is_err());
    }

    #[test]
    fn test_stream_packet() {
        let p = packet(r#"<stream type="stderr" encoding="base64">b29wcw==</stream>"#);
        assert!(matches!(
            p,
            Packet::Stream { kind: StreamKind::Stderr, ref text } if text == "oops"
        ));
    }
}
