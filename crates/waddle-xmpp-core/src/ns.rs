//! XML namespace URIs used by the protocol core.

/// The reserved `xml` prefix namespace
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
/// Reserved prefix bound to [`XML`]
pub const XML_PREFIX: &str = "xml";
/// XMPP client namespace
pub const JABBER_CLIENT: &str = "jabber:client";
/// XMPP server namespace
pub const JABBER_SERVER: &str = "jabber:server";
/// Server dialback namespace (XEP-0220)
pub const JABBER_SERVER_DIALBACK: &str = "jabber:server:dialback";
/// XMPP streams namespace
pub const STREAM: &str = "http://etherx.jabber.org/streams";
/// Stream error condition namespace
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
/// STARTTLS namespace
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
/// SASL namespace
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Resource binding namespace
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// Session namespace
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
/// Stanza error namespace
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
/// In-band registration (XEP-0077)
pub const JABBER_IQ_REGISTER: &str = "jabber:iq:register";
/// In-band registration stream feature
pub const FEATURE_IQ_REGISTER: &str = "http://jabber.org/features/iq-register";
/// Dialback stream feature
pub const FEATURE_DIALBACK: &str = "urn:xmpp:features:dialback";
/// Roster namespace
pub const JABBER_IQ_ROSTER: &str = "jabber:iq:roster";
