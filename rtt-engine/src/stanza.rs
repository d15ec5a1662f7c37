//! Abstract stanza tree.
//!
//! The engine never parses or serializes XML. Inbound stanzas arrive as an
//! already-parsed tree of named elements with attributes and text, and
//! outbound stanzas are produced in the same form for the transport to
//! serialize.
//!
//! ```text
//! <message to="juliet@capulet.lit" type="chat">
//!   <rtt xmlns="urn:xmpp:rtt:0" seq="843" event="new">
//!     <t>Hello</t> <w n="120"/> <e/> <t p="4">!</t>
//!   </rtt>
//! </message>
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Real-time text namespace.
pub const NS_RTT: &str = "urn:xmpp:rtt:0";

/// Service discovery info namespace.
pub const NS_DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

/// Strip the `/resource` part of a full address.
pub fn bare_address(address: &str) -> &str {
    match address.split_once('/') {
        Some((bare, _)) => bare,
        None => address,
    }
}

/// A child node: nested element or character data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One element with ordered attributes and children.
///
/// The namespace is carried as an ordinary `xmlns` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    pub fn push_child(&mut self, child: Element) -> &mut Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Append character data. Empty strings are not stored.
    pub fn push_text(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// True if the element has the given name and `xmlns`.
    pub fn is(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.attr("xmlns") == Some(namespace)
    }

    /// Concatenated direct character data.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }
}

fn escape(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '&' => f.write_str("&amp;")?,
            '<' => f.write_str("&lt;")?,
            '>' => f.write_str("&gt;")?,
            '"' => f.write_str("&quot;")?,
            '\'' => f.write_str("&apos;")?,
            _ => write!(f, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attributes {
            write!(f, " {key}=\"")?;
            escape(value, f)?;
            f.write_str("\"")?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for child in &self.children {
            match child {
                Node::Element(e) => write!(f, "{e}")?,
                Node::Text(t) => escape(t, f)?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address() {
        assert_eq!(bare_address("romeo@montague.lit/orchard"), "romeo@montague.lit");
        assert_eq!(bare_address("romeo@montague.lit"), "romeo@montague.lit");
        assert_eq!(bare_address("a@b/c/d"), "a@b");
    }

    #[test]
    fn test_builder_and_queries() {
        let msg = Element::new("message")
            .with_attr("to", "juliet@capulet.lit")
            .with_child(
                Element::new("rtt")
                    .with_attr("xmlns", NS_RTT)
                    .with_attr("seq", 5)
                    .with_child(Element::new("t").with_text("Hi")),
            )
            .with_child(Element::new("body").with_text("Hi"));

        assert_eq!(msg.attr("to"), Some("juliet@capulet.lit"));
        assert_eq!(msg.attr("from"), None);
        let rtt = msg.child("rtt").unwrap();
        assert!(rtt.is("rtt", NS_RTT));
        assert!(!rtt.is("rtt", NS_DISCO_INFO));
        assert_eq!(rtt.attr("seq"), Some("5"));
        assert_eq!(msg.child("body").unwrap().text(), "Hi");
        assert_eq!(msg.child_elements().count(), 2);
    }

    #[test]
    fn test_text_skips_nested_elements() {
        let mut e = Element::new("body");
        e.push_text("a").push_child(Element::new("x").with_text("ignored"));
        e.push_text("").push_text("b");
        assert_eq!(e.text(), "ab");
        assert_eq!(e.children.len(), 3);
    }

    #[test]
    fn test_display_escapes() {
        let e = Element::new("t")
            .with_attr("p", 3)
            .with_text("<a & \"b\">");
        assert_eq!(e.to_string(), "<t p=\"3\">&lt;a &amp; &quot;b&quot;&gt;</t>");
        assert_eq!(Element::new("e").to_string(), "<e/>");
    }

    #[test]
    fn test_serde_roundtrip() {
        let e = Element::new("w").with_attr("n", 120);
        let json = serde_json::to_string(&e).unwrap();
        let back: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
