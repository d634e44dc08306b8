//! Stanza construction on top of [`ElementBuilder`].
//!
//! Besides the plain builder API this carries the reply, forward and clone
//! helpers handlers use to derive new stanzas from inbound ones.

use crate::addressing::Entity;
use crate::error::XmlError;
use crate::ns;
use crate::xml::{Attribute, Element, ElementBuilder, Fragment};

use super::{IqType, MessageType, PresenceType, Stanza};

/// Single-shot builder producing a [`Stanza`].
#[derive(Debug)]
pub struct StanzaBuilder {
    inner: ElementBuilder,
}

impl StanzaBuilder {
    pub fn new(name: &str, namespace_uri: &str) -> Result<Self, XmlError> {
        Ok(Self {
            inner: ElementBuilder::new(name, namespace_uri)?,
        })
    }

    pub fn with_prefix(name: &str, namespace_uri: &str, prefix: &str) -> Result<Self, XmlError> {
        Ok(Self {
            inner: ElementBuilder::with_prefix(name, namespace_uri, prefix)?,
        })
    }

    pub fn add_attribute(&mut self, name: &str, value: &str) -> Result<&mut Self, XmlError> {
        self.inner.add_attribute(name, value)?;
        Ok(self)
    }

    pub fn add_namespaced_attribute(
        &mut self,
        namespace_uri: &str,
        name: &str,
        value: &str,
    ) -> Result<&mut Self, XmlError> {
        self.inner.add_namespaced_attribute(namespace_uri, name, value)?;
        Ok(self)
    }

    pub fn declare_namespace(&mut self, prefix: &str, namespace_uri: &str) -> Result<&mut Self, XmlError> {
        self.inner.declare_namespace(prefix, namespace_uri)?;
        Ok(self)
    }

    pub fn start_inner_element(&mut self, name: &str, namespace_uri: &str) -> Result<&mut Self, XmlError> {
        self.inner.start_inner_element(name, namespace_uri)?;
        Ok(self)
    }

    pub fn start_prefixed_inner_element(
        &mut self,
        name: &str,
        namespace_uri: &str,
        prefix: &str,
    ) -> Result<&mut Self, XmlError> {
        self.inner.start_prefixed_inner_element(name, namespace_uri, prefix)?;
        Ok(self)
    }

    pub fn end_inner_element(&mut self) -> Result<&mut Self, XmlError> {
        self.inner.end_inner_element()?;
        Ok(self)
    }

    pub fn add_text(&mut self, text: &str) -> Result<&mut Self, XmlError> {
        self.inner.add_text(text)?;
        Ok(self)
    }

    pub fn add_prepared_element(&mut self, element: Element) -> Result<&mut Self, XmlError> {
        self.inner.add_prepared_element(element)?;
        Ok(self)
    }

    /// Finish the stanza. Like the underlying builder this works once.
    pub fn build(&mut self) -> Result<Stanza, XmlError> {
        self.inner.build().map(Stanza::new)
    }

    /// Start a reply to `original`: same element name and namespace,
    /// `to` and `from` swapped, `id` kept and `type` set to `reply_type`.
    ///
    /// With `from_is_server_only` the reply comes from the domain of the
    /// original `to`, not from the full address. Inner elements are not
    /// copied.
    pub fn create_direct_reply(
        original: &Stanza,
        from_is_server_only: bool,
        reply_type: &str,
    ) -> Result<Self, XmlError> {
        let mut builder = Self::with_prefix(
            original.name(),
            original.namespace_uri(),
            original.namespace_prefix(),
        )?;
        if let Some(to) = original.attribute("from") {
            builder.add_attribute("to", to)?;
        }
        if let Some(from) = original.attribute("to") {
            let from = match (from_is_server_only, Entity::parse_lenient(from)) {
                (true, Ok(entity)) => entity.domain().to_string(),
                _ => from.to_string(),
            };
            builder.add_attribute("from", &from)?;
        }
        builder.add_attribute("type", reply_type)?;
        if let Some(id) = original.id() {
            builder.add_attribute("id", id)?;
        }
        Ok(builder)
    }

    /// Copy `original`. Attributes in `replacing` overwrite those with the
    /// same name or are appended; children are kept when `deep` is set.
    pub fn create_clone(original: &Element, deep: bool, replacing: &[Attribute]) -> Result<Self, XmlError> {
        Ok(Self {
            inner: ElementBuilder::from_element(original, deep, replacing)?,
        })
    }

    /// Deep copy of `original` readdressed with new `from` and/or `to`.
    pub fn create_forward(
        original: &Stanza,
        from: Option<&Entity>,
        to: Option<&Entity>,
    ) -> Result<Self, XmlError> {
        let mut replacing = Vec::with_capacity(2);
        if let Some(to) = to {
            replacing.push(Attribute::new("to", to.full_qualified_name()));
        }
        if let Some(from) = from {
            replacing.push(Attribute::new("from", from.full_qualified_name()));
        }
        Self::create_clone(original, true, &replacing)
    }

    /// Copy of `stanza` where every element in `from_ns`, at any depth, is
    /// moved to `to_ns`. Elements in other namespaces keep theirs.
    pub fn rewrite_namespace(stanza: &Stanza, from_ns: &str, to_ns: &str) -> Result<Stanza, XmlError> {
        rewrite_element(stanza.element(), from_ns, to_ns).map(Stanza::new)
    }

    /// An `iq` in `jabber:client`.
    pub fn iq(
        iq_type: IqType,
        id: &str,
        from: Option<&Entity>,
        to: Option<&Entity>,
    ) -> Result<Self, XmlError> {
        let mut builder = Self::addressed("iq", from, to)?;
        builder.add_attribute("type", iq_type.as_str())?.add_attribute("id", id)?;
        Ok(builder)
    }

    /// A `message` in `jabber:client`. Normal messages leave `type` out.
    pub fn message(
        message_type: MessageType,
        from: Option<&Entity>,
        to: Option<&Entity>,
        body: Option<&str>,
    ) -> Result<Self, XmlError> {
        let mut builder = Self::addressed("message", from, to)?;
        if message_type != MessageType::Normal {
            builder.add_attribute("type", message_type.as_str())?;
        }
        if let Some(body) = body {
            builder
                .start_inner_element("body", ns::JABBER_CLIENT)?
                .add_text(body)?
                .end_inner_element()?;
        }
        Ok(builder)
    }

    /// A `presence` in `jabber:client`.
    pub fn presence(
        presence_type: PresenceType,
        from: Option<&Entity>,
        to: Option<&Entity>,
    ) -> Result<Self, XmlError> {
        let mut builder = Self::addressed("presence", from, to)?;
        if let Some(value) = presence_type.attribute_value() {
            builder.add_attribute("type", value)?;
        }
        Ok(builder)
    }

    fn addressed(name: &str, from: Option<&Entity>, to: Option<&Entity>) -> Result<Self, XmlError> {
        let mut builder = Self::new(name, ns::JABBER_CLIENT)?;
        if let Some(from) = from {
            builder.add_attribute("from", &from.full_qualified_name())?;
        }
        if let Some(to) = to {
            builder.add_attribute("to", &to.full_qualified_name())?;
        }
        Ok(builder)
    }
}

fn rewrite_element(element: &Element, from_ns: &str, to_ns: &str) -> Result<Element, XmlError> {
    let namespace_uri = if element.namespace_uri() == from_ns {
        to_ns
    } else {
        element.namespace_uri()
    };
    let namespaces = element
        .declared_namespaces()
        .iter()
        .map(|(prefix, uri)| {
            let uri = if uri == from_ns { to_ns } else { uri.as_str() };
            (prefix.clone(), uri.to_string())
        })
        .collect();
    let children = element
        .children()
        .iter()
        .map(|child| match child {
            Fragment::Element(inner) => rewrite_element(inner, from_ns, to_ns).map(Fragment::Element),
            other => Ok(other.clone()),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Element::new(
        element.name(),
        namespace_uri,
        element.namespace_prefix(),
        element.attributes().to_vec(),
        namespaces,
        children,
    )
}
