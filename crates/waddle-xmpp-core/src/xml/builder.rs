//! Single-shot element builder.
//!
//! The builder keeps every open element as a frame on one growable stack.
//! Closing a frame finalizes it into an immutable [`Element`] and appends it
//! to its parent's children; [`ElementBuilder::build`] closes whatever is
//! still open and hands out the root exactly once.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = ElementBuilder::new("iq", ns::JABBER_CLIENT)?;
//! builder
//!     .add_attribute("type", "get")?
//!     .start_inner_element("query", "jabber:iq:roster")?
//!     .end_inner_element()?;
//! let iq = builder.build()?;
//! ```

use std::collections::BTreeMap;

use crate::error::XmlError;

use super::fragment::{validate_name, validate_prefix, Attribute, Element, Fragment, NO_NAMESPACE};

#[derive(Debug)]
struct Frame {
    name: String,
    namespace_uri: String,
    namespace_prefix: String,
    attributes: Vec<Attribute>,
    namespaces: BTreeMap<String, String>,
    children: Vec<Fragment>,
}

impl Frame {
    fn open(name: &str, namespace_uri: &str, prefix: &str) -> Result<Self, XmlError> {
        validate_name(name)?;
        validate_prefix(prefix)?;

        let mut namespaces = BTreeMap::new();
        if !prefix.is_empty() {
            namespaces.insert(prefix.to_string(), namespace_uri.to_string());
        }

        Ok(Self {
            name: name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            namespace_prefix: prefix.to_string(),
            attributes: Vec::new(),
            namespaces,
            children: Vec::new(),
        })
    }

    fn finish(self) -> Result<Element, XmlError> {
        Element::new(
            self.name,
            self.namespace_uri,
            self.namespace_prefix,
            self.attributes,
            self.namespaces,
            self.children,
        )
    }
}

/// Builds one [`Element`] through a stack of open frames.
#[derive(Debug)]
pub struct ElementBuilder {
    frames: Vec<Frame>,
    built: bool,
}

impl ElementBuilder {
    /// Start a builder for an element without a prefix.
    pub fn new(name: &str, namespace_uri: &str) -> Result<Self, XmlError> {
        Self::with_prefix(name, namespace_uri, "")
    }

    /// Start a builder for a prefixed element. A non-empty prefix is
    /// declared on the root.
    pub fn with_prefix(name: &str, namespace_uri: &str, prefix: &str) -> Result<Self, XmlError> {
        Ok(Self {
            frames: vec![Frame::open(name, namespace_uri, prefix)?],
            built: false,
        })
    }

    /// Seed a builder with a copy of `original`'s name, prefix and
    /// declarations. Attributes are copied unless replaced; children are
    /// copied when `deep` is set.
    pub fn from_element(
        original: &Element,
        deep: bool,
        replacing_attributes: &[Attribute],
    ) -> Result<Self, XmlError> {
        let mut builder = Self::with_prefix(
            original.name(),
            original.namespace_uri(),
            original.namespace_prefix(),
        )?;
        for (prefix, uri) in original.declared_namespaces() {
            builder.declare_namespace(prefix, uri)?;
        }
        for attr in original.attributes() {
            builder.push_attribute(attr.clone())?;
        }
        for attr in replacing_attributes {
            builder.push_attribute(attr.clone())?;
        }
        if deep {
            for child in original.children() {
                builder.current()?.children.push(child.clone());
            }
        }
        Ok(builder)
    }

    fn current(&mut self) -> Result<&mut Frame, XmlError> {
        if self.built {
            return Err(XmlError::AlreadyBuilt);
        }
        self.frames
            .last_mut()
            .ok_or_else(|| XmlError::unbalanced("no open element"))
    }

    /// Add an attribute in no namespace, replacing an existing one.
    pub fn add_attribute(&mut self, name: &str, value: &str) -> Result<&mut Self, XmlError> {
        self.push_attribute(Attribute::new(name, value))
    }

    /// Add a namespaced attribute, replacing one with the same name and URI.
    pub fn add_namespaced_attribute(
        &mut self,
        namespace_uri: &str,
        name: &str,
        value: &str,
    ) -> Result<&mut Self, XmlError> {
        self.push_attribute(Attribute::with_namespace(namespace_uri, name, value))
    }

    fn push_attribute(&mut self, attribute: Attribute) -> Result<&mut Self, XmlError> {
        validate_name(attribute.name())?;
        let frame = self.current()?;
        match frame
            .attributes
            .iter_mut()
            .find(|existing| existing.is(attribute.namespace_uri(), attribute.name()))
        {
            Some(existing) => *existing = attribute,
            None => frame.attributes.push(attribute),
        }
        Ok(self)
    }

    /// Declare `prefix` for `namespace_uri` on the current element. A prefix
    /// already bound to the same URI on this element is removed first.
    pub fn declare_namespace(
        &mut self,
        prefix: &str,
        namespace_uri: &str,
    ) -> Result<&mut Self, XmlError> {
        validate_prefix(prefix)?;
        let frame = self.current()?;
        frame.namespaces.retain(|_, uri| uri != namespace_uri);
        frame
            .namespaces
            .insert(prefix.to_string(), namespace_uri.to_string());
        Ok(self)
    }

    /// Open a child element in `namespace_uri` without a prefix.
    pub fn start_inner_element(
        &mut self,
        name: &str,
        namespace_uri: &str,
    ) -> Result<&mut Self, XmlError> {
        self.start_prefixed_inner_element(name, namespace_uri, "")
    }

    /// Open a child element in no namespace.
    pub fn start_plain_inner_element(&mut self, name: &str) -> Result<&mut Self, XmlError> {
        self.start_prefixed_inner_element(name, NO_NAMESPACE, "")
    }

    /// Open a prefixed child element.
    pub fn start_prefixed_inner_element(
        &mut self,
        name: &str,
        namespace_uri: &str,
        prefix: &str,
    ) -> Result<&mut Self, XmlError> {
        self.current()?;
        let frame = Frame::open(name, namespace_uri, prefix)?;
        self.frames.push(frame);
        Ok(self)
    }

    /// Close the innermost open child element.
    pub fn end_inner_element(&mut self) -> Result<&mut Self, XmlError> {
        self.current()?;
        if self.frames.len() < 2 {
            return Err(XmlError::unbalanced("no inner element to end"));
        }
        self.close_frame()?;
        Ok(self)
    }

    /// Append a text child to the current element.
    pub fn add_text(&mut self, text: &str) -> Result<&mut Self, XmlError> {
        self.current()?.children.push(Fragment::Text(text.to_string()));
        Ok(self)
    }

    /// Append an already built element as a child.
    pub fn add_prepared_element(&mut self, element: Element) -> Result<&mut Self, XmlError> {
        self.current()?.children.push(Fragment::Element(element));
        Ok(self)
    }

    fn close_frame(&mut self) -> Result<(), XmlError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| XmlError::unbalanced("no open element"))?;
        let element = frame.finish()?;
        let parent = self
            .frames
            .last_mut()
            .ok_or_else(|| XmlError::unbalanced("inner element without parent"))?;
        parent.children.push(Fragment::Element(element));
        Ok(())
    }

    /// Close any open child elements and return the root. Works once;
    /// every later call on this builder fails with [`XmlError::AlreadyBuilt`].
    pub fn build(&mut self) -> Result<Element, XmlError> {
        self.current()?;
        while self.frames.len() > 1 {
            self.close_frame()?;
        }
        self.built = true;
        let root = self
            .frames
            .pop()
            .ok_or_else(|| XmlError::unbalanced("no root element"))?;
        root.finish()
    }
}
