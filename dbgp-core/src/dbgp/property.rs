//! Remote variable snapshots
//!
//! A [`Property`] is what `property_get` and `context_get` return. Objects carry
//! their children one level deep; deeper levels are fetched on demand through
//! the child's `full_name`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::StackFrame;
use super::xml::XmlElement;

/// Name of the synthetic child holding an object's base (prototype) object.
pub const BASE_CHILD: &str = "<base>";

/// A named variable scope at one stack level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: u32,
    pub name: String,
    pub frame: StackFrame,
}

impl Context {
    pub(crate) fn from_xml(element: &XmlElement, frame: &StackFrame) -> Self {
        Self {
            id: element.attr_parsed("id").unwrap_or(0),
            name: element.attr("name").unwrap_or_default().to_string(),
            frame: frame.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Undefined,
    String,
    Integer,
    Float,
    Object,
}

impl PropertyType {
    pub fn parse(s: &str) -> Self {
        match s {
            "string" => PropertyType::String,
            "integer" => PropertyType::Integer,
            "float" => PropertyType::Float,
            "object" => PropertyType::Object,
            _ => PropertyType::Undefined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Undefined => "undefined",
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Object => "object",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrimitiveProperty {
    pub name: String,
    pub full_name: String,
    pub kind: PropertyType,
    pub facet: String,
    pub size: usize,
    pub value: String,
    pub context: Arc<Context>,
}

impl PrimitiveProperty {
    pub fn as_integer(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }

    pub fn as_float(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectProperty {
    pub name: String,
    pub full_name: String,
    pub facet: String,
    pub size: usize,
    pub class_name: String,
    /// Remote identity; two handles with the same address are the same object.
    pub address: String,
    pub children: Vec<Property>,
    pub num_children: usize,
    /// Present only for array-like objects.
    pub max_index: Option<usize>,
    pub context: Arc<Context>,
}

impl ObjectProperty {
    /// Eager child by DBGP name, exact match first then case-insensitive.
    pub fn child(&self, name: &str) -> Option<&Property> {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .or_else(|| {
                self.children
                    .iter()
                    .find(|c| c.name().eq_ignore_ascii_case(name))
            })
    }

    pub fn base(&self) -> Option<&ObjectProperty> {
        self.child(BASE_CHILD).and_then(Property::as_object)
    }

    /// Children other than `<base>`.
    pub fn own_children(&self) -> impl Iterator<Item = &Property> {
        self.children.iter().filter(|c| c.name() != BASE_CHILD)
    }

    pub fn is_array(&self) -> bool {
        self.max_index.is_some()
    }

    /// The engine reported children it did not send.
    pub fn is_partial(&self) -> bool {
        self.num_children > 0 && self.children.is_empty()
    }

    pub fn same_object(&self, other: &ObjectProperty) -> bool {
        !self.address.is_empty() && self.address == other.address
    }
}

#[derive(Debug, Clone)]
pub enum Property {
    Primitive(PrimitiveProperty),
    Object(ObjectProperty),
}

impl Property {
    pub(crate) fn from_xml(element: &XmlElement, context: &Arc<Context>) -> Self {
        let name = element.attr("name").unwrap_or_default().to_string();
        let full_name = element
            .attr("fullname")
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());
        let facet = element.attr("facet").unwrap_or_default().to_string();
        let size = element.attr_parsed("size").unwrap_or(0);
        let kind = PropertyType::parse(element.attr("type").unwrap_or_default());

        if kind != PropertyType::Object {
            let value = element
                .decoded_text()
                .unwrap_or_else(|_| element.text.clone());
            return Property::Primitive(PrimitiveProperty {
                name,
                full_name,
                kind,
                facet,
                size,
                value,
                context: context.clone(),
            });
        }

        let children: Vec<Property> = element
            .children_named("property")
            .map(|child| Property::from_xml(child, context))
            .collect();
        let num_children = element
            .attr_parsed("numchildren")
            .unwrap_or(children.len());
        let max_index = element
            .attr_parsed("maxindex")
            .or_else(|| array_max_index(&children));

        Property::Object(ObjectProperty {
            name,
            full_name,
            facet,
            size,
            class_name: element.attr("classname").unwrap_or("Object").to_string(),
            address: element.attr("address").unwrap_or_default().to_string(),
            children,
            num_children,
            max_index,
            context: context.clone(),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Property::Primitive(p) => &p.name,
            Property::Object(o) => &o.name,
        }
    }

    pub fn full_name(&self) -> &str {
        match self {
            Property::Primitive(p) => &p.full_name,
            Property::Object(o) => &o.full_name,
        }
    }

    pub fn kind(&self) -> PropertyType {
        match self {
            Property::Primitive(p) => p.kind,
            Property::Object(_) => PropertyType::Object,
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        match self {
            Property::Primitive(p) => &p.context,
            Property::Object(o) => &o.context,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.kind() == PropertyType::Undefined
    }

    pub fn as_object(&self) -> Option<&ObjectProperty> {
        match self {
            Property::Object(o) => Some(o),
            Property::Primitive(_) => None,
        }
    }

    /// Text shown for the value; objects render as their class name.
    pub fn display_value(&self) -> String {
        match self {
            Property::Primitive(p) => p.value.clone(),
            Property::Object(o) => o.class_name.clone(),
        }
    }
}

/// `Some(max)` when every non-base child is an `[n]` integer index.
fn array_max_index(children: &[Property]) -> Option<usize> {
    let mut max = None;
    for child in children.iter().filter(|c| c.name() != BASE_CHILD) {
        let index = parse_index(child.name())?;
        max = Some(max.map_or(index, |m: usize| m.max(index)));
    }
    max
}

fn parse_index(name: &str) -> Option<usize> {
    let inner = name.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner.parse().ok()
}

/// Full name of `key` under `parent`, the way the engine spells it.
pub fn child_full_name(parent: &str, key: &str) -> String {
    if key.starts_with('[') {
        format!("{}{}", parent, key)
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Arc<Context> {
        Arc::new(Context {
            id: 0,
            name: "Local".to_string(),
            frame: StackFrame::top(),
        })
    }

    fn property(xml: &str) -> Property {
        Property::from_xml(&XmlElement::parse(xml).unwrap(), &context())
    }

    #[test]
    fn test_primitive() {
        let p = property(
            r#"<property name="n" fullname="n" type="integer" facet="" size="2" encoding="base64">NDI=</property>"#,
        );
        let Property::Primitive(p) = p else {
            panic!("Expected primitive");
        };
        assert_eq!(p.as_integer(), Some(42));
        assert_eq!(p.as_float(), Some(42.0));
    }

    #[test]
    fn test_undefined() {
        let p = property(r#"<property name="nope" fullname="nope" type="undefined"/>"#);
        assert!(p.is_undefined());
    }

    #[test]
    fn test_array_detection() {
        let p = property(
            r#"<property name="arr" fullname="arr" type="object" classname="Array" address="77" children="1" numchildren="3">
                <property name="[1]" fullname="arr[1]" type="string" encoding="base64">YQ==</property>
                <property name="[2]" fullname="arr[2]" type="string" encoding="base64">Yg==</property>
                <property name="&lt;base&gt;" fullname="arr.&lt;base&gt;" type="object" classname="Array.Prototype" address="5"/>
            </property>"#,
        );
        let o = p.as_object().unwrap();
        assert!(o.is_array());
        assert_eq!(o.max_index, Some(2));
        assert_eq!(o.own_children().count(), 2);
        assert_eq!(o.base().unwrap().class_name, "Array.Prototype");
        assert_eq!(o.num_children, 3);
    }

    #[test]
    fn test_object_with_named_keys_is_not_array() {
        let p = property(
            r#"<property name="o" fullname="o" type="object" classname="Object" address="9" numchildren="2">
                <property name="[1]" fullname="o[1]" type="integer" encoding="base64">MQ==</property>
                <property name="Name" fullname="o.Name" type="string" encoding="base64">eA==</property>
            </property>"#,
        );
        let o = p.as_object().unwrap();
        assert!(!o.is_array());
        assert_eq!(o.child("name").unwrap().full_name(), "o.Name");
    }

    #[test]
    fn test_child_full_name() {
        assert_eq!(child_full_name("a", "b"), "a.b");
        assert_eq!(child_full_name("a", "[1]"), "a[1]");
        assert_eq!(child_full_name("a", "<base>"), "a.<base>");
    }
}
