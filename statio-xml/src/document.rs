//! Token stream → rooted element trees.

use std::collections::VecDeque;

use crate::dom::XmlElement;
use crate::progressive::{ProgressiveParser, XmlToken};
use crate::XmlError;

/// Assembles [`ProgressiveParser`] tokens into whole documents.
///
/// Open elements live on a stack; when the last one closes, the finished tree
/// moves to a queue drained with [`poll_document`](DocumentParser::poll_document).
/// Feeding a stream of sibling documents (XMPP stanzas) therefore just works:
/// each completed stanza pops out while the next is already parsing.
pub struct DocumentParser {
    parser: ProgressiveParser,
    open: Vec<XmlElement>,
    attribute: (String, String),
    documents: VecDeque<XmlElement>,
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser {
    /// Creates a parser with no open elements.
    pub fn new() -> Self {
        Self {
            parser: ProgressiveParser::new(),
            open: Vec::new(),
            attribute: (String::new(), String::new()),
            documents: VecDeque::new(),
        }
    }

    /// Feeds more text, consuming every token it completes.
    ///
    /// # Errors
    ///
    /// [`XmlError::InvalidFormat`] when an end tag does not match the element
    /// it would close, or when structure appears outside any element.
    pub fn append(&mut self, text: &str) -> Result<(), XmlError> {
        self.parser.append(text)?;
        while let Some(token) = self.parser.poll_token() {
            self.apply(token)?;
        }
        Ok(())
    }

    /// Pops the next completed document, if any.
    pub fn poll_document(&mut self) -> Option<XmlElement> {
        self.documents.pop_front()
    }

    /// The text that has been fed but not yet tokenized.
    pub fn buffer(&self) -> &str {
        self.parser.buffer()
    }

    fn apply(&mut self, token: XmlToken) -> Result<(), XmlError> {
        match token {
            XmlToken::StartElement { namespace, name } => {
                self.open.push(XmlElement::with_namespace(namespace, name));
            }
            XmlToken::AttributeName { namespace, name } => {
                self.attribute = (namespace, name);
            }
            XmlToken::AttributeValue(value) => {
                let (namespace, name) = self.attribute.clone();
                let element = self.top_mut("attribute outside any element")?;
                element.attribute_ns_mut(&namespace, &name).set_value(value);
            }
            XmlToken::Data(data) => {
                // Text runs can arrive split across appends; accumulate.
                let element = self.top_mut("text outside any element")?;
                let mut value = element.value().to_string();
                value.push_str(&data);
                element.set_value(value);
            }
            XmlToken::EndElement { namespace, name } => {
                let element = self
                    .open
                    .pop()
                    .ok_or_else(|| XmlError::InvalidFormat("end tag without open element".into()))?;
                if element.namespace() != namespace || element.name() != name {
                    return Err(XmlError::InvalidFormat(format!(
                        "end tag {namespace}:{name} does not close {}:{}",
                        element.namespace(),
                        element.name(),
                    )));
                }
                match self.open.last_mut() {
                    Some(parent) => parent.push(element),
                    None => self.documents.push_back(element),
                }
            }
        }
        Ok(())
    }

    fn top_mut(&mut self, context: &str) -> Result<&mut XmlElement, XmlError> {
        self.open
            .last_mut()
            .ok_or_else(|| XmlError::InvalidFormat(context.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_documents_pop_out() {
        let mut parser = DocumentParser::new();
        parser
            .append("<iq type='result' id='1'><bind><jid>u@h/r</jid></bind></iq>")
            .unwrap();

        let document = parser.poll_document().unwrap();
        assert_eq!(document.name(), "iq");
        assert_eq!(document.attribute("type").unwrap().value, "result");
        assert_eq!(
            document.element("bind").unwrap().element("jid").unwrap().value(),
            "u@h/r"
        );
        assert!(parser.poll_document().is_none());
    }

    #[test]
    fn split_feeds_resume_where_they_stopped() {
        let mut parser = DocumentParser::new();
        parser.append("<message><bo").unwrap();
        assert!(parser.poll_document().is_none());
        parser.append("dy>hello</body></message>").unwrap();

        let document = parser.poll_document().unwrap();
        assert_eq!(document.element("body").unwrap().value(), "hello");
    }

    #[test]
    fn sibling_documents_stream_out_in_order() {
        let mut parser = DocumentParser::new();
        parser.append("<a/><b/><c/>").unwrap();

        let names: Vec<String> = std::iter::from_fn(|| parser.poll_document())
            .map(|doc| doc.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn mismatched_end_tags_are_invalid() {
        let mut parser = DocumentParser::new();
        let result = parser.append("<a><b></a></b>");
        assert!(matches!(result, Err(XmlError::InvalidFormat(_))));
    }

    #[test]
    fn self_closing_elements_nest() {
        let mut parser = DocumentParser::new();
        parser
            .append("<presence from='x@y' type='subscribe'><show/></presence>")
            .unwrap();

        let document = parser.poll_document().unwrap();
        assert_eq!(document.attribute("from").unwrap().value, "x@y");
        assert!(document.element("show").is_some());
    }
}
