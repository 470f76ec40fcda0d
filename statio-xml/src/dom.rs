//! Insertion-ordered DOM with case-insensitive `ns:name` lookups.

use std::fmt;

/// Replaces the five reserved symbols with their entities.
pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Replaces the five built-in entities with their symbols. `&amp;` is
/// resolved last so escaped ampersands cannot cascade into other entities.
pub fn unescape(value: &str) -> String {
    value
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The lookup key for attributes and child elements: lowercased `ns:name`.
fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}").to_lowercase()
}

/// A named attribute with an optional namespace prefix.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct XmlAttribute {
    namespace: String,
    name: String,
    /// The attribute value. Mutable in place for builder-style assembly.
    pub value: String,
}

impl XmlAttribute {
    /// Creates an attribute with an empty value.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            value: String::new(),
        }
    }

    /// The namespace prefix, possibly empty.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the value, chaining.
    pub fn set_value(&mut self, value: impl Into<String>) -> &mut Self {
        self.value = value.into();
        self
    }
}

/// An element: namespace-prefixed name, one text run, attributes and child
/// elements in insertion order.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct XmlElement {
    namespace: String,
    name: String,
    value: String,
    attributes: Vec<XmlAttribute>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// Creates an element without a namespace prefix.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_namespace("", name)
    }

    /// Creates an element with a namespace prefix.
    pub fn with_namespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            value: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The namespace prefix, possibly empty.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element's text run (unescaped).
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Sets the text run, chaining.
    pub fn set_value(&mut self, value: impl Into<String>) -> &mut Self {
        self.value = value.into();
        self
    }

    /// All child elements, in insertion order.
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// Appends a new child element and returns it, even when a sibling with
    /// the same name already exists.
    pub fn add(&mut self, name: impl Into<String>) -> &mut XmlElement {
        self.add_ns("", name)
    }

    /// Appends a new namespaced child element and returns it.
    pub fn add_ns(&mut self, namespace: impl Into<String>, name: impl Into<String>) -> &mut XmlElement {
        self.children.push(XmlElement::with_namespace(namespace, name));
        self.children.last_mut().expect("just pushed")
    }

    /// Appends an already-built child element.
    pub fn push(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    /// Finds the first child with the given name, case-insensitively.
    pub fn element(&self, name: &str) -> Option<&XmlElement> {
        self.element_ns("", name)
    }

    /// Finds the first child with the given namespace and name.
    pub fn element_ns(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        let wanted = key(namespace, name);
        self.children
            .iter()
            .find(|child| key(&child.namespace, &child.name) == wanted)
    }

    /// Finds the first child with the given name, inserting an empty one if
    /// absent.
    pub fn element_mut(&mut self, name: &str) -> &mut XmlElement {
        self.element_ns_mut("", name)
    }

    /// Finds the first child with the given namespace and name, inserting an
    /// empty one if absent.
    pub fn element_ns_mut(&mut self, namespace: &str, name: &str) -> &mut XmlElement {
        let wanted = key(namespace, name);
        let index = self
            .children
            .iter()
            .position(|child| key(&child.namespace, &child.name) == wanted);
        match index {
            Some(index) => &mut self.children[index],
            None => self.add_ns(namespace, name),
        }
    }

    /// All attributes, in insertion order.
    pub fn attributes(&self) -> &[XmlAttribute] {
        &self.attributes
    }

    /// Finds an attribute by name, case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&XmlAttribute> {
        self.attribute_ns("", name)
    }

    /// Finds an attribute by namespace and name.
    pub fn attribute_ns(&self, namespace: &str, name: &str) -> Option<&XmlAttribute> {
        let wanted = key(namespace, name);
        self.attributes
            .iter()
            .find(|attribute| key(&attribute.namespace, &attribute.name) == wanted)
    }

    /// Finds an attribute by name, inserting an empty one if absent.
    pub fn attribute_mut(&mut self, name: &str) -> &mut XmlAttribute {
        self.attribute_ns_mut("", name)
    }

    /// Finds an attribute by namespace and name, inserting an empty one if
    /// absent.
    pub fn attribute_ns_mut(&mut self, namespace: &str, name: &str) -> &mut XmlAttribute {
        let wanted = key(namespace, name);
        let index = self
            .attributes
            .iter()
            .position(|attribute| key(&attribute.namespace, &attribute.name) == wanted);
        match index {
            Some(index) => &mut self.attributes[index],
            None => {
                self.attributes.push(XmlAttribute::new(namespace, name));
                self.attributes.last_mut().expect("just pushed")
            }
        }
    }

    /// The serialized start tag, attributes included.
    pub fn start_tag_string(&self) -> String {
        let mut buffer = String::new();
        self.write_start_tag(&mut buffer);
        buffer
    }

    /// The serialized end tag.
    pub fn end_tag_string(&self) -> String {
        let mut buffer = String::new();
        self.write_end_tag(&mut buffer);
        buffer
    }

    fn write_start_tag(&self, buffer: &mut String) {
        buffer.push('<');
        if !self.namespace.is_empty() {
            buffer.push_str(&self.namespace);
            buffer.push(':');
        }
        buffer.push_str(&self.name);

        for attribute in &self.attributes {
            buffer.push(' ');
            if !attribute.namespace.is_empty() {
                buffer.push_str(&attribute.namespace);
                buffer.push(':');
            }
            buffer.push_str(&attribute.name);
            buffer.push_str("='");
            buffer.push_str(&attribute.value);
            buffer.push('\'');
        }
        buffer.push('>');
    }

    fn write_end_tag(&self, buffer: &mut String) {
        buffer.push_str("</");
        if !self.namespace.is_empty() {
            buffer.push_str(&self.namespace);
            buffer.push(':');
        }
        buffer.push_str(&self.name);
        buffer.push('>');
    }

    fn write(&self, buffer: &mut String) {
        self.write_start_tag(buffer);
        for child in &self.children {
            child.write(buffer);
        }
        buffer.push_str(&escape(&self.value));
        self.write_end_tag(buffer);
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = String::new();
        self.write(&mut buffer);
        f.write_str(&buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_documents_serialize_in_insertion_order() {
        let mut xml = XmlElement::new("root");
        xml.attribute_mut("attr1").set_value("12");
        xml.element_mut("test").set_value("abc");
        xml.element_mut("test").set_value("def");
        xml.add("test").set_value("ghi");

        assert_eq!(
            xml.to_string(),
            "<root attr1='12'><test>def</test><test>ghi</test></root>"
        );
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mut xml = XmlElement::new("iq");
        xml.add_ns("stream", "Features");
        xml.attribute_mut("Type").set_value("set");

        assert!(xml.element_ns("STREAM", "features").is_some());
        assert_eq!(xml.attribute("type").unwrap().value, "set");
        assert!(xml.element("missing").is_none());
    }

    #[test]
    fn namespaced_tags_serialize_with_prefixes() {
        let mut xml = XmlElement::with_namespace("stream", "stream");
        xml.attribute_mut("to").set_value("example.com");
        xml.attribute_ns_mut("xmlns", "stream")
            .set_value("http://etherx.jabber.org/streams");

        assert_eq!(
            xml.start_tag_string(),
            "<stream:stream to='example.com' xmlns:stream='http://etherx.jabber.org/streams'>"
        );
        assert_eq!(xml.end_tag_string(), "</stream:stream>");
    }

    #[test]
    fn text_runs_are_escaped_on_serialization() {
        let mut xml = XmlElement::new("body");
        xml.set_value("1 < 2 & 3 > 2");
        assert_eq!(xml.to_string(), "<body>1 &lt; 2 &amp; 3 &gt; 2</body>");
    }

    #[test]
    fn escape_and_unescape_invert_each_other() {
        let original = "a & b < c > d 'quoted' \"double\"";
        assert_eq!(unescape(&escape(original)), original);
        assert_eq!(escape("&"), "&amp;");
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }
}
