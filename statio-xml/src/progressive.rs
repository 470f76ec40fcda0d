//! Forward-only tokenizer over a growing text buffer.
//!
//! Every state's entry action either consumes buffer and requests the next
//! trigger, or does nothing, leaving the machine parked in that state until
//! [`append`](ProgressiveParser::append) re-fires it with more text. That
//! suspension point is the whole trick: the parser never sees more than the
//! bytes it has, and never needs to.

use std::collections::VecDeque;

use statio::StateMachine;

use crate::XmlError;

/// A token produced by [`ProgressiveParser`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum XmlToken {
    /// `<ns:name` was recognized (attributes may follow).
    StartElement {
        /// Namespace prefix, possibly empty.
        namespace: String,
        /// Element name.
        name: String,
    },
    /// `</ns:name>` or the `/>` of a self-closing element.
    EndElement {
        /// Namespace prefix, possibly empty.
        namespace: String,
        /// Element name.
        name: String,
    },
    /// An attribute name, before its value.
    AttributeName {
        /// Namespace prefix, possibly empty.
        namespace: String,
        /// Attribute name.
        name: String,
    },
    /// The quoted value of the most recent attribute name.
    AttributeValue(String),
    /// Unescaped text between tags. Long runs may arrive in pieces.
    Data(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    OpenElement,
    IgnoreDeclaration,
    CloseElement,
    OptionalSlashOrQuestionAfterOpenElement,
    StartElement,
    EndElement,
    OptionalAttribute,
    AttributeName,
    OptionalSlashAfterAttributes,
    ImmediateEndElement,
    OptionalOpenElement,
    ElementData,
    AttributeAssignment,
    AttributeValueDetermineQuotes,
    StartAttributeValueSingleQuotes,
    StartAttributeValueDoubleQuotes,
    EndAttributeValueSingleQuotes,
    EndAttributeValueDoubleQuotes,
    OptionalWhitespaceBeforeAttribute,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Append,
    OpenElementReceived,
    DeclarationReceived,
    OptionalSlashPresent,
    OptionalQuestionPresent,
    OptionalSlashNotPresent,
    ElementNameReceived,
    OptionalAttributePresent,
    OptionalAttributeNotPresent,
    OptionalOpenElementPresent,
    OptionalOpenElementNotPresent,
    ElementDataReceived,
    CloseElementReceived,
    AttributeNameReceived,
    AttributeAssignmentReceived,
    SingleQuotesReceived,
    DoubleQuotesReceived,
    AttributeValueReceived,
    WhitespaceReceived,
    ImmediateEndElementReceived,
}

fn split_ns(text: &str) -> (String, String) {
    match text.split_once(':') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (String::new(), text.to_string()),
    }
}

struct ParserCtx {
    buffer: String,
    /// Namespace and name of the open start element, replayed by `/>`.
    element: (String, String),
    tokens: VecDeque<XmlToken>,
}

impl ParserCtx {
    fn first(&self) -> Option<char> {
        self.buffer.chars().next()
    }

    fn open_element(&mut self) -> Option<Trigger> {
        if self.first()? == '<' {
            self.buffer.drain(..1);
            return Some(Trigger::OpenElementReceived);
        }
        None
    }

    fn after_open_lookahead(&mut self) -> Option<Trigger> {
        match self.first()? {
            '/' => Some(Trigger::OptionalSlashPresent),
            '?' => Some(Trigger::OptionalQuestionPresent),
            _ => Some(Trigger::OptionalSlashNotPresent),
        }
    }

    fn ignore_declaration(&mut self) -> Option<Trigger> {
        let end = self.buffer.find("?>")?;
        self.buffer.drain(..end + 2);
        Some(Trigger::DeclarationReceived)
    }

    fn end_element(&mut self) -> Option<Trigger> {
        let end = self.buffer.find('>')?;
        // buffer still starts with the '/' of '</'
        let (namespace, name) = split_ns(&self.buffer[1..end]);
        self.buffer.drain(..end + 1);
        self.tokens.push_back(XmlToken::EndElement { namespace, name });
        Some(Trigger::ElementNameReceived)
    }

    fn start_element(&mut self) -> Option<Trigger> {
        let end = self
            .buffer
            .find(|c| matches!(c, '/' | '>' | ' ' | '\t' | '\r' | '\n'))?;
        let (namespace, name) = split_ns(&self.buffer[..end]);
        self.buffer.drain(..end);
        self.element = (namespace.clone(), name.clone());
        self.tokens
            .push_back(XmlToken::StartElement { namespace, name });
        Some(Trigger::ElementNameReceived)
    }

    /// Skips whitespace before an attribute. `?` is in the skip set so the
    /// declaration trailer routes through the same path; declaration handling
    /// depends on it.
    fn skip_whitespace(&mut self) -> Option<Trigger> {
        let end = self
            .buffer
            .find(|c| !matches!(c, '?' | ' ' | '\t' | '\r' | '\n'))?;
        self.buffer.drain(..end);
        Some(Trigger::WhitespaceReceived)
    }

    fn attribute_lookahead(&mut self) -> Option<Trigger> {
        match self.first()? {
            '/' | '>' => Some(Trigger::OptionalAttributeNotPresent),
            _ => Some(Trigger::OptionalAttributePresent),
        }
    }

    fn attribute_name(&mut self) -> Option<Trigger> {
        let end = self.buffer.find('=')?;
        let (namespace, name) = split_ns(&self.buffer[..end]);
        self.buffer.drain(..end);
        self.tokens
            .push_back(XmlToken::AttributeName { namespace, name });
        Some(Trigger::AttributeNameReceived)
    }

    fn attribute_assignment(&mut self) -> Option<Trigger> {
        if self.first()? == '=' {
            self.buffer.drain(..1);
            return Some(Trigger::AttributeAssignmentReceived);
        }
        None
    }

    fn determine_quotes(&mut self) -> Option<Trigger> {
        match self.first()? {
            '"' => {
                self.buffer.drain(..1);
                Some(Trigger::DoubleQuotesReceived)
            }
            '\'' => {
                self.buffer.drain(..1);
                Some(Trigger::SingleQuotesReceived)
            }
            _ => None,
        }
    }

    fn value_until(&mut self, quote: char) -> Option<Trigger> {
        let end = self.buffer.find(quote)?;
        let value = self.buffer[..end].to_string();
        self.buffer.drain(..end);
        self.tokens.push_back(XmlToken::AttributeValue(value));
        Some(Trigger::AttributeValueReceived)
    }

    fn close_quote(&mut self, quote: char, trigger: Trigger) -> Option<Trigger> {
        if self.first()? == quote {
            self.buffer.drain(..1);
            return Some(trigger);
        }
        None
    }

    fn slash_after_attributes(&mut self) -> Option<Trigger> {
        match self.first()? {
            '/' => Some(Trigger::OptionalSlashPresent),
            _ => Some(Trigger::OptionalSlashNotPresent),
        }
    }

    fn immediate_end(&mut self) -> Option<Trigger> {
        if self.buffer.len() < 2 {
            return None;
        }
        if self.buffer.starts_with("/>") {
            self.buffer.drain(..2);
            let (namespace, name) = self.element.clone();
            self.tokens.push_back(XmlToken::EndElement { namespace, name });
            return Some(Trigger::ImmediateEndElementReceived);
        }
        None
    }

    fn close_element(&mut self) -> Option<Trigger> {
        if self.first()? == '>' {
            self.buffer.drain(..1);
            return Some(Trigger::CloseElementReceived);
        }
        None
    }

    fn optional_open(&mut self) -> Option<Trigger> {
        match self.first()? {
            '<' => Some(Trigger::OptionalOpenElementPresent),
            _ => Some(Trigger::OptionalOpenElementNotPresent),
        }
    }

    fn element_data(&mut self) -> Option<Trigger> {
        let end = self.buffer.find('<');
        let taken = end.unwrap_or(self.buffer.len());
        let data = self.buffer[..taken].to_string();
        self.buffer.drain(..taken);
        self.tokens.push_back(XmlToken::Data(crate::unescape(&data)));
        end.map(|_| Trigger::ElementDataReceived)
    }
}

/// The streaming tokenizer.
pub struct ProgressiveParser {
    machine: StateMachine<State, Trigger, ParserCtx>,
    ctx: ParserCtx,
}

impl Default for ProgressiveParser {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! entry {
    ($method:ident) => {
        |ctx: &mut ParserCtx, fire| {
            if let Some(trigger) = ctx.$method() {
                fire.fire(trigger);
            }
        }
    };
}

fn build_machine() -> StateMachine<State, Trigger, ParserCtx> {
    let mut machine = StateMachine::new(State::OpenElement);

    machine
        .configure(State::OpenElement)
        .on_entry(entry!(open_element))
        .permit(Trigger::Append, State::OpenElement)
        .permit(
            Trigger::OpenElementReceived,
            State::OptionalSlashOrQuestionAfterOpenElement,
        );

    machine
        .configure(State::OptionalSlashOrQuestionAfterOpenElement)
        .on_entry(entry!(after_open_lookahead))
        .permit(Trigger::Append, State::OptionalSlashOrQuestionAfterOpenElement)
        .permit(Trigger::OptionalQuestionPresent, State::IgnoreDeclaration)
        .permit(Trigger::OptionalSlashPresent, State::EndElement)
        .permit(Trigger::OptionalSlashNotPresent, State::StartElement);

    machine
        .configure(State::IgnoreDeclaration)
        .on_entry(entry!(ignore_declaration))
        .permit(Trigger::Append, State::IgnoreDeclaration)
        .permit(Trigger::DeclarationReceived, State::OpenElement);

    machine
        .configure(State::EndElement)
        .on_entry(entry!(end_element))
        .permit(Trigger::Append, State::EndElement)
        .permit(Trigger::ElementNameReceived, State::OpenElement);

    machine
        .configure(State::StartElement)
        .on_entry(entry!(start_element))
        .permit(Trigger::Append, State::StartElement)
        .permit(
            Trigger::ElementNameReceived,
            State::OptionalWhitespaceBeforeAttribute,
        );

    machine
        .configure(State::OptionalWhitespaceBeforeAttribute)
        .on_entry(entry!(skip_whitespace))
        .permit(Trigger::Append, State::OptionalWhitespaceBeforeAttribute)
        .permit(Trigger::WhitespaceReceived, State::OptionalAttribute);

    machine
        .configure(State::OptionalAttribute)
        .on_entry(entry!(attribute_lookahead))
        .permit(Trigger::Append, State::OptionalAttribute)
        .permit(Trigger::OptionalAttributePresent, State::AttributeName)
        .permit(
            Trigger::OptionalAttributeNotPresent,
            State::OptionalSlashAfterAttributes,
        );

    machine
        .configure(State::AttributeName)
        .on_entry(entry!(attribute_name))
        .permit(Trigger::Append, State::AttributeName)
        .permit(Trigger::AttributeNameReceived, State::AttributeAssignment);

    machine
        .configure(State::AttributeAssignment)
        .on_entry(entry!(attribute_assignment))
        .permit(Trigger::Append, State::AttributeAssignment)
        .permit(
            Trigger::AttributeAssignmentReceived,
            State::AttributeValueDetermineQuotes,
        );

    machine
        .configure(State::AttributeValueDetermineQuotes)
        .on_entry(entry!(determine_quotes))
        .permit(Trigger::Append, State::AttributeValueDetermineQuotes)
        .permit(
            Trigger::SingleQuotesReceived,
            State::StartAttributeValueSingleQuotes,
        )
        .permit(
            Trigger::DoubleQuotesReceived,
            State::StartAttributeValueDoubleQuotes,
        );

    machine
        .configure(State::StartAttributeValueSingleQuotes)
        .on_entry(|ctx: &mut ParserCtx, fire| {
            if let Some(trigger) = ctx.value_until('\'') {
                fire.fire(trigger);
            }
        })
        .permit(Trigger::Append, State::StartAttributeValueSingleQuotes)
        .permit(
            Trigger::AttributeValueReceived,
            State::EndAttributeValueSingleQuotes,
        );

    machine
        .configure(State::StartAttributeValueDoubleQuotes)
        .on_entry(|ctx: &mut ParserCtx, fire| {
            if let Some(trigger) = ctx.value_until('"') {
                fire.fire(trigger);
            }
        })
        .permit(Trigger::Append, State::StartAttributeValueDoubleQuotes)
        .permit(
            Trigger::AttributeValueReceived,
            State::EndAttributeValueDoubleQuotes,
        );

    machine
        .configure(State::EndAttributeValueSingleQuotes)
        .on_entry(|ctx: &mut ParserCtx, fire| {
            if let Some(trigger) = ctx.close_quote('\'', Trigger::SingleQuotesReceived) {
                fire.fire(trigger);
            }
        })
        .permit(Trigger::Append, State::EndAttributeValueSingleQuotes)
        .permit(
            Trigger::SingleQuotesReceived,
            State::OptionalWhitespaceBeforeAttribute,
        );

    machine
        .configure(State::EndAttributeValueDoubleQuotes)
        .on_entry(|ctx: &mut ParserCtx, fire| {
            if let Some(trigger) = ctx.close_quote('"', Trigger::DoubleQuotesReceived) {
                fire.fire(trigger);
            }
        })
        .permit(Trigger::Append, State::EndAttributeValueDoubleQuotes)
        .permit(
            Trigger::DoubleQuotesReceived,
            State::OptionalWhitespaceBeforeAttribute,
        );

    machine
        .configure(State::OptionalSlashAfterAttributes)
        .on_entry(entry!(slash_after_attributes))
        .permit(Trigger::Append, State::OptionalSlashAfterAttributes)
        .permit(Trigger::OptionalSlashPresent, State::ImmediateEndElement)
        .permit(Trigger::OptionalSlashNotPresent, State::CloseElement);

    machine
        .configure(State::ImmediateEndElement)
        .on_entry(entry!(immediate_end))
        .permit(Trigger::Append, State::ImmediateEndElement)
        .permit(
            Trigger::ImmediateEndElementReceived,
            State::OptionalOpenElement,
        );

    machine
        .configure(State::CloseElement)
        .on_entry(entry!(close_element))
        .permit(Trigger::Append, State::CloseElement)
        .permit(Trigger::CloseElementReceived, State::OptionalOpenElement);

    machine
        .configure(State::OptionalOpenElement)
        .on_entry(entry!(optional_open))
        .permit(Trigger::Append, State::OptionalOpenElement)
        .permit(Trigger::OptionalOpenElementPresent, State::OpenElement)
        .permit(Trigger::OptionalOpenElementNotPresent, State::ElementData);

    machine
        .configure(State::ElementData)
        .on_entry(entry!(element_data))
        .permit(Trigger::Append, State::ElementData)
        .permit(Trigger::ElementDataReceived, State::OpenElement);

    machine
}

impl ProgressiveParser {
    /// Creates a parser positioned before the first element.
    pub fn new() -> Self {
        Self {
            machine: build_machine(),
            ctx: ParserCtx {
                buffer: String::new(),
                element: (String::new(), String::new()),
                tokens: VecDeque::new(),
            },
        }
    }

    /// Feeds more text and tokenizes as far as it allows.
    pub fn append(&mut self, text: &str) -> Result<(), XmlError> {
        self.ctx.buffer.push_str(text);
        self.machine.fire(Trigger::Append, &mut self.ctx)?;
        Ok(())
    }

    /// Pops the next pending token, if any.
    pub fn poll_token(&mut self) -> Option<XmlToken> {
        self.ctx.tokens.pop_front()
    }

    /// The text that has been fed but not yet tokenized.
    pub fn buffer(&self) -> &str {
        &self.ctx.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(namespace: &str, name: &str) -> XmlToken {
        XmlToken::StartElement {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn end(namespace: &str, name: &str) -> XmlToken {
        XmlToken::EndElement {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn attr(namespace: &str, name: &str) -> XmlToken {
        XmlToken::AttributeName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn drain(parser: &mut ProgressiveParser) -> Vec<XmlToken> {
        let mut tokens = Vec::new();
        while let Some(token) = parser.poll_token() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn whole_documents_tokenize_in_order() {
        let mut parser = ProgressiveParser::new();
        parser.append("<a:b x='1'><c/>text</a:b>").unwrap();

        assert_eq!(
            drain(&mut parser),
            vec![
                start("a", "b"),
                attr("", "x"),
                XmlToken::AttributeValue("1".into()),
                start("", "c"),
                end("", "c"),
                XmlToken::Data("text".into()),
                end("a", "b"),
            ]
        );
        assert!(parser.buffer().is_empty());
    }

    #[test]
    fn byte_at_a_time_produces_the_same_tokens() {
        let input = "<a:b x='1'><c/>text</a:b>";
        let mut parser = ProgressiveParser::new();
        let mut tokens = Vec::new();
        for c in input.chars() {
            parser.append(&c.to_string()).unwrap();
            tokens.extend(drain(&mut parser));
        }

        // Data may arrive split; merge adjacent runs before comparing.
        let mut merged: Vec<XmlToken> = Vec::new();
        for token in tokens {
            match (merged.last_mut(), token) {
                (Some(XmlToken::Data(acc)), XmlToken::Data(next)) => acc.push_str(&next),
                (_, token) => merged.push(token),
            }
        }

        assert_eq!(
            merged,
            vec![
                start("a", "b"),
                attr("", "x"),
                XmlToken::AttributeValue("1".into()),
                start("", "c"),
                end("", "c"),
                XmlToken::Data("text".into()),
                end("a", "b"),
            ]
        );
    }

    #[test]
    fn declarations_are_recognized_and_discarded() {
        let mut parser = ProgressiveParser::new();
        parser
            .append("<?xml version='1.0' encoding='UTF-8'?><root></root>")
            .unwrap();
        assert_eq!(drain(&mut parser), vec![start("", "root"), end("", "root")]);
    }

    #[test]
    fn double_quoted_attributes_parse_like_single_quoted() {
        let mut parser = ProgressiveParser::new();
        parser.append("<item id=\"42\" label='x'></item>").unwrap();
        assert_eq!(
            drain(&mut parser),
            vec![
                start("", "item"),
                attr("", "id"),
                XmlToken::AttributeValue("42".into()),
                attr("", "label"),
                XmlToken::AttributeValue("x".into()),
                end("", "item"),
            ]
        );
    }

    #[test]
    fn text_data_is_unescaped() {
        let mut parser = ProgressiveParser::new();
        parser.append("<m>a &amp; b &lt;ok&gt;</m>").unwrap();
        assert_eq!(
            drain(&mut parser),
            vec![
                start("", "m"),
                XmlToken::Data("a & b <ok>".into()),
                end("", "m"),
            ]
        );
    }

    #[test]
    fn an_unterminated_element_stays_buffered() {
        let mut parser = ProgressiveParser::new();
        parser.append("<incomplete attr='val").unwrap();
        assert_eq!(
            drain(&mut parser),
            vec![start("", "incomplete"), attr("", "attr")]
        );
        assert_eq!(parser.buffer(), "val");
    }
}
