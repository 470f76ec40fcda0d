//! Builders for the handful of stanzas the client sends.

use statio_xml::XmlElement;

use crate::sasl::plain_credentials;

pub(crate) const SASL_NS: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub(crate) const BIND_NS: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub(crate) const SESSION_NS: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub(crate) const REGISTER_NS: &str = "jabber:iq:register";
pub(crate) const ROSTER_NS: &str = "jabber:iq:roster";

/// The opening `<stream:stream>` tag; the stream stays open, so only the
/// start tag is sent.
pub(crate) fn stream_header(server: &str) -> String {
    let mut xml = XmlElement::with_namespace("stream", "stream");
    xml.attribute_mut("to").set_value(server);
    xml.attribute_mut("xmlns").set_value("jabber:client");
    xml.attribute_ns_mut("xmlns", "stream")
        .set_value("http://etherx.jabber.org/streams");
    xml.attribute_mut("version").set_value("1.0");
    xml.start_tag_string()
}

pub(crate) fn auth(username: &str, password: &str) -> String {
    let mut xml = XmlElement::new("auth");
    xml.attribute_mut("xmlns").set_value(SASL_NS);
    xml.attribute_mut("mechanism").set_value("PLAIN");
    xml.set_value(plain_credentials(username, password));
    xml.to_string()
}

pub(crate) fn register(id: &str, username: &str, password: &str) -> String {
    let mut xml = XmlElement::new("iq");
    xml.attribute_mut("type").set_value("set");
    xml.attribute_mut("id").set_value(id);
    let query = xml.element_mut("query");
    query.attribute_mut("xmlns").set_value(REGISTER_NS);
    query.element_mut("username").set_value(username);
    query.element_mut("password").set_value(password);
    xml.to_string()
}

pub(crate) fn bind_resource(id: &str, server: &str) -> String {
    let mut xml = XmlElement::new("iq");
    xml.attribute_mut("to").set_value(server);
    xml.attribute_mut("type").set_value("set");
    xml.attribute_mut("id").set_value(id);
    xml.element_mut("bind").attribute_mut("xmlns").set_value(BIND_NS);
    xml.to_string()
}

pub(crate) fn create_session(id: &str, server: &str) -> String {
    let mut xml = XmlElement::new("iq");
    xml.attribute_mut("to").set_value(server);
    xml.attribute_mut("type").set_value("set");
    xml.attribute_mut("id").set_value(id);
    xml.element_mut("session")
        .attribute_mut("xmlns")
        .set_value(SESSION_NS);
    xml.to_string()
}

pub(crate) fn initial_presence() -> String {
    XmlElement::new("presence").to_string()
}

pub(crate) fn presence(from: &str, to: &str, kind: &str) -> String {
    let mut xml = XmlElement::new("presence");
    xml.attribute_mut("from").set_value(from);
    xml.attribute_mut("to").set_value(to);
    xml.attribute_mut("type").set_value(kind);
    xml.to_string()
}

/// Accepts a roster subscription by answering with `subscription="to"`,
/// reusing the requesting stanza's id.
pub(crate) fn accept_subscription(id: &str, jid: &str) -> String {
    let mut xml = XmlElement::new("iq");
    xml.attribute_mut("type").set_value("set");
    xml.attribute_mut("id").set_value(id);
    let query = xml.element_mut("query");
    query.attribute_mut("xmlns").set_value(ROSTER_NS);
    let item = query.element_mut("item");
    item.attribute_mut("jid").set_value(jid);
    item.attribute_mut("subscription").set_value("to");
    xml.to_string()
}

pub(crate) fn message(from: &str, to: &str, body: &str) -> String {
    let mut xml = XmlElement::new("message");
    xml.attribute_mut("from").set_value(from);
    xml.attribute_mut("to").set_value(to);
    xml.element_mut("body").set_value(body);
    xml.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_headers_are_start_tags_only() {
        let header = stream_header("example.com");
        assert!(header.starts_with("<stream:stream to='example.com'"));
        assert!(header.ends_with("version='1.0'>"));
        assert!(!header.contains("</stream:stream>"));
    }

    #[test]
    fn auth_stanzas_carry_the_plain_mechanism() {
        let stanza = auth("alice", "secret");
        assert!(stanza.contains("mechanism='PLAIN'"));
        assert!(stanza.contains(SASL_NS));
        assert!(stanza.contains(&plain_credentials("alice", "secret")));
    }

    #[test]
    fn bind_and_session_requests_are_iq_sets() {
        let bind = bind_resource("1", "example.com");
        assert!(bind.contains("type='set'"));
        assert!(bind.contains(BIND_NS));

        let session = create_session("2", "example.com");
        assert!(session.contains("type='set'"));
        assert!(session.contains(SESSION_NS));
    }

    #[test]
    fn subscription_replies_echo_the_request_id() {
        let stanza = accept_subscription("42", "bob@example.com");
        assert!(stanza.contains("id='42'"));
        assert!(stanza.contains("subscription='to'"));
    }

    #[test]
    fn messages_wrap_the_body_text() {
        let stanza = message("a@h/r", "b@h", "hello");
        assert_eq!(
            stanza,
            "<message from='a@h/r' to='b@h'><body>hello</body></message>"
        );
    }
}
