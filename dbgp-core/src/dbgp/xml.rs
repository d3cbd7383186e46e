//! Owned XML tree for decoded DBGP payloads
//!
//! `roxmltree` borrows from its input, so every payload is copied into an
//! [`XmlElement`] tree before it leaves the reader task. Entity references in
//! attribute values and text are resolved by the parser.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::error::{DbgpError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name, namespace prefix stripped.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated direct text and CDATA content.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn parse(payload: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(payload)
            .map_err(|e| DbgpError::Framing(format!("invalid XML payload: {}", e)))?;
        Ok(Self::from_node(doc.root_element()))
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let attributes = node
            .attributes()
            .map(|attr| (attr.name().to_string(), attr.value().to_string()))
            .collect();

        let mut text = String::new();
        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Self::from_node(child));
            } else if child.is_text() {
                if let Some(t) = child.text() {
                    text.push_str(t);
                }
            }
        }

        Self {
            name: node.tag_name().name().to_string(),
            attributes,
            text,
            children,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attr_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }

    /// `"1"` is true, anything else (or a missing attribute) is false.
    pub fn attr_flag(&self, name: &str) -> bool {
        self.attr(name).map(|v| v.trim() == "1").unwrap_or(false)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text content, decoded when the element carries `encoding="base64"`.
    pub fn decoded_text(&self) -> Result<String> {
        match self.attr("encoding") {
            Some("base64") => decode_base64(&self.text),
            _ => Ok(self.text.clone()),
        }
    }
}

pub fn encode_base64(data: &str) -> String {
    BASE64.encode(data.as_bytes())
}

pub fn decode_base64(data: &str) -> Result<String> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| DbgpError::Framing(format!("invalid base64 payload: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Escape a string for use in XML text or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_unescaped_in_attributes_and_text() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<response xmlns="urn:debugger_protocol_v1" command="property_get" transaction_id="3"><property name="a&amp;b" fullname="x[&quot;k&quot;]">&lt;tag&gt;</property></response>"#;
        let root = XmlElement::parse(xml).unwrap();
        assert_eq!(root.name, "response");
        let prop = root.child("property").unwrap();
        assert_eq!(prop.attr("name"), Some("a&b"));
        assert_eq!(prop.attr("fullname"), Some("x[\"k\"]"));
        assert_eq!(prop.text, "<tag>");
    }

    #[test]
    fn test_base64_text() {
        let xml = r#"<property encoding="base64"><![CDATA[aGVsbG8gd29ybGQ=]]></property>"#;
        let root = XmlElement::parse(xml).unwrap();
        assert_eq!(root.decoded_text().unwrap(), "hello world");
    }

    #[test]
    fn test_escape_round_trip() {
        let raw = r#"<a href="x">&'"#;
        let xml = format!("<v attr=\"{}\">{}</v>", escape(raw), escape(raw));
        let root = XmlElement::parse(&xml).unwrap();
        assert_eq!(root.attr("attr"), Some(raw));
        assert_eq!(root.text, raw);
    }

    #[test]
    fn test_invalid_xml_is_framing_error() {
        assert!(matches!(
            XmlElement::parse("<response"),
            Err(DbgpError::Framing(_))
        ));
    }
}
