//! Stanzas: elements with typed XMPP accessors.
//!
//! A [`Stanza`] is an [`Element`] seen through the eyes of the protocol
//! layer. [`CoreStanza`] narrows it further to the three core kinds
//! (`iq`, `message`, `presence`) in the client or server namespace.

mod builder;
mod types;

use std::fmt;
use std::ops::Deref;

use crate::addressing::{Entity, EntityFormatError};
use crate::ns;
use crate::xml::Element;

pub use builder::StanzaBuilder;
pub use types::{IqType, MessageType, PresenceType};

/// A top-level protocol element.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    element: Element,
}

impl Stanza {
    pub fn new(element: Element) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    /// Parsed `from` attribute. `None` when absent, an error when present
    /// but malformed.
    pub fn from(&self) -> Result<Option<Entity>, EntityFormatError> {
        self.address("from")
    }

    /// Parsed `to` attribute. `None` when absent, an error when present
    /// but malformed.
    pub fn to(&self) -> Result<Option<Entity>, EntityFormatError> {
        self.address("to")
    }

    fn address(&self, name: &str) -> Result<Option<Entity>, EntityFormatError> {
        self.element.attribute(name).map(Entity::parse).transpose()
    }

    pub fn id(&self) -> Option<&str> {
        self.element.attribute("id")
    }

    /// Raw `type` attribute.
    pub fn stanza_type(&self) -> Option<&str> {
        self.element.attribute("type")
    }

    /// Whether the stanza carries `type="error"`.
    pub fn is_error(&self) -> bool {
        self.stanza_type() == Some("error")
    }

    /// `xml:lang` of the stanza, if set.
    pub fn xml_lang(&self) -> Option<&str> {
        self.element.attribute_ns(ns::XML, "lang")
    }

    /// Whether this is an `iq`, `message` or `presence` stanza.
    pub fn is_core(&self) -> bool {
        CoreStanza::wrap(self).is_some()
    }

    /// Whether the stanza lives in `jabber:client` or `jabber:server`.
    pub fn in_core_namespace(&self) -> bool {
        matches!(self.namespace_uri(), ns::JABBER_CLIENT | ns::JABBER_SERVER)
    }

    /// One-line rendering for log output.
    pub fn dense(&self) -> DenseStanza<'_> {
        DenseStanza(self)
    }
}

impl Deref for Stanza {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

/// Compact single-line form of a stanza for logs: name, namespace,
/// addressing attributes and the names of its children.
pub struct DenseStanza<'a>(&'a Stanza);

impl fmt::Display for DenseStanza<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stanza = self.0;
        write!(f, "<{}", stanza.name())?;
        if !stanza.namespace_uri().is_empty() {
            write!(f, " xmlns='{}'", stanza.namespace_uri())?;
        }
        for name in ["from", "to", "id", "type"] {
            if let Some(value) = stanza.attribute(name) {
                write!(f, " {name}='{value}'")?;
            }
        }
        let mut children = stanza.inner_elements().peekable();
        if children.peek().is_none() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for child in children {
            write!(f, "<{}", child.name())?;
            if child.namespace_uri() != stanza.namespace_uri() && !child.namespace_uri().is_empty() {
                write!(f, " xmlns='{}'", child.namespace_uri())?;
            }
            f.write_str("/>")?;
        }
        write!(f, "</{}>", stanza.name())
    }
}

/// The three core stanza kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreKind {
    Iq,
    Message,
    Presence,
}

impl CoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iq => "iq",
            Self::Message => "message",
            Self::Presence => "presence",
        }
    }
}

/// A stanza named `iq`, `message` or `presence`.
///
/// Coercion goes by element name only; the core handlers check the
/// namespace in their `verify`.
#[derive(Debug, Clone)]
pub enum CoreStanza {
    Iq(IqStanza),
    Message(MessageStanza),
    Presence(PresenceStanza),
}

impl CoreStanza {
    /// Coerce `stanza` into a core stanza, if it is one.
    pub fn wrap(stanza: &Stanza) -> Option<CoreStanza> {
        match stanza.name() {
            "iq" => Some(CoreStanza::Iq(IqStanza(stanza.clone()))),
            "message" => Some(CoreStanza::Message(MessageStanza(stanza.clone()))),
            "presence" => Some(CoreStanza::Presence(PresenceStanza(stanza.clone()))),
            _ => None,
        }
    }

    pub fn kind(&self) -> CoreKind {
        match self {
            Self::Iq(_) => CoreKind::Iq,
            Self::Message(_) => CoreKind::Message,
            Self::Presence(_) => CoreKind::Presence,
        }
    }

    pub fn stanza(&self) -> &Stanza {
        match self {
            Self::Iq(iq) => &iq.0,
            Self::Message(message) => &message.0,
            Self::Presence(presence) => &presence.0,
        }
    }
}

impl Deref for CoreStanza {
    type Target = Stanza;

    fn deref(&self) -> &Stanza {
        self.stanza()
    }
}

macro_rules! core_wrapper {
    ($(#[$meta:meta])* $wrapper:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $wrapper(Stanza);

        impl $wrapper {
            /// Wrap `stanza` if it has the right name.
            pub fn wrap(stanza: &Stanza) -> Option<Self> {
                (stanza.name() == $name).then(|| Self(stanza.clone()))
            }

            pub fn into_stanza(self) -> Stanza {
                self.0
            }
        }

        impl Deref for $wrapper {
            type Target = Stanza;

            fn deref(&self) -> &Stanza {
                &self.0
            }
        }
    };
}

core_wrapper!(
    /// An `iq` stanza.
    IqStanza,
    "iq"
);
core_wrapper!(
    /// A `message` stanza.
    MessageStanza,
    "message"
);
core_wrapper!(
    /// A `presence` stanza.
    PresenceStanza,
    "presence"
);

impl IqStanza {
    /// Parsed `type`; `None` when missing or not one of the four IQ types.
    pub fn iq_type(&self) -> Option<IqType> {
        self.stanza_type().and_then(|t| t.parse().ok())
    }
}

impl MessageStanza {
    /// Message type; a missing attribute means `normal`.
    pub fn message_type(&self) -> Option<MessageType> {
        match self.stanza_type() {
            None => Some(MessageType::Normal),
            Some(t) => t.parse().ok(),
        }
    }

    /// Text of the first `body` child.
    pub fn body(&self) -> Option<String> {
        self.first_inner_element("body").map(Element::text)
    }
}

impl PresenceStanza {
    /// Presence type; a missing attribute means available.
    pub fn presence_type(&self) -> Option<PresenceType> {
        match self.stanza_type() {
            None => Some(PresenceType::Available),
            Some(t) => t.parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Stanza {
        Stanza::new(Element::parse_str(xml).unwrap())
    }

    #[test]
    fn test_addressing_accessors() {
        let stanza = parse(
            r#"<message xmlns='jabber:client' from='romeo@montague.lit/orchard' to='juliet@capulet.lit' id='m1' type='chat'/>"#,
        );
        assert_eq!(
            stanza.from().unwrap().unwrap().resource(),
            Some("orchard")
        );
        assert_eq!(stanza.to().unwrap().unwrap().bare_name(), "juliet@capulet.lit");
        assert_eq!(stanza.id(), Some("m1"));
        assert_eq!(stanza.stanza_type(), Some("chat"));
        assert!(!stanza.is_error());
    }

    #[test]
    fn test_malformed_from() {
        let stanza = parse(r#"<message xmlns='jabber:client' from='a@b@c'/>"#);
        assert!(stanza.from().is_err());
        assert!(stanza.to().unwrap().is_none());
    }

    #[test]
    fn test_core_coercion() {
        assert!(parse(r#"<iq xmlns='jabber:client' type='get' id='1'/>"#).is_core());
        assert!(parse(r#"<presence xmlns='jabber:server'/>"#).is_core());
        let foreign = parse(r#"<iq xmlns='urn:other'/>"#);
        assert!(foreign.is_core());
        assert!(!foreign.in_core_namespace());
        let bare = StanzaBuilder::new("iq", "")
            .unwrap()
            .add_attribute("type", "get")
            .unwrap()
            .build()
            .unwrap();
        assert!(bare.is_core());
        assert!(!bare.in_core_namespace());
        assert!(!parse(r#"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"#).is_core());

        let core = CoreStanza::wrap(&parse(r#"<message xmlns='jabber:client'/>"#)).unwrap();
        assert_eq!(core.kind(), CoreKind::Message);
    }

    #[test]
    fn test_typed_wrappers() {
        let iq = IqStanza::wrap(&parse(r#"<iq xmlns='jabber:client' type='set' id='1'/>"#)).unwrap();
        assert_eq!(iq.iq_type(), Some(IqType::Set));

        let bogus = IqStanza::wrap(&parse(r#"<iq xmlns='jabber:client' type='poke'/>"#)).unwrap();
        assert_eq!(bogus.iq_type(), None);

        let msg = MessageStanza::wrap(&parse(
            r#"<message xmlns='jabber:client'><body>hello</body></message>"#,
        ))
        .unwrap();
        assert_eq!(msg.message_type(), Some(MessageType::Normal));
        assert_eq!(msg.body().as_deref(), Some("hello"));

        let presence =
            PresenceStanza::wrap(&parse(r#"<presence xmlns='jabber:client' type='unavailable'/>"#))
                .unwrap();
        assert_eq!(presence.presence_type(), Some(PresenceType::Unavailable));
    }

    #[test]
    fn test_dense_rendering() {
        let stanza = parse(
            r#"<iq xmlns='jabber:client' type='get' id='r1'><query xmlns='jabber:iq:roster'/></iq>"#,
        );
        assert_eq!(
            stanza.dense().to_string(),
            "<iq xmlns='jabber:client' id='r1' type='get'><query xmlns='jabber:iq:roster'/></iq>"
        );
    }
}
