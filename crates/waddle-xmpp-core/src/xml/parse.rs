//! Conversion from `minidom` trees into the fragment model.
//!
//! Parsing is not done here; transports (and tests) hand over trees produced
//! by `minidom`. Converted elements carry their namespace URI with an empty
//! prefix and the renderer picks declarations again on output. Attribute
//! prefixes are resolved against the declarations in scope while converting.

use std::collections::BTreeMap;
use std::str::FromStr;

use minidom::Node;

use crate::error::XmlError;
use crate::ns;

use super::fragment::{Attribute, Element, Fragment};

/// Prefix declarations of one element; `None` is the default namespace.
type Declarations = BTreeMap<Option<String>, String>;

impl TryFrom<&minidom::Element> for Element {
    type Error = XmlError;

    fn try_from(source: &minidom::Element) -> Result<Self, Self::Error> {
        convert(source, &mut Vec::new())
    }
}

/// Convert `source` with the declarations of its ancestors in `scopes`.
fn convert<'a>(
    source: &'a minidom::Element,
    scopes: &mut Vec<&'a Declarations>,
) -> Result<Element, XmlError> {
    scopes.push(source.prefixes.declared_prefixes());
    let converted = convert_scoped(source, scopes);
    scopes.pop();
    converted
}

fn convert_scoped<'a>(
    source: &'a minidom::Element,
    scopes: &mut Vec<&'a Declarations>,
) -> Result<Element, XmlError> {
    let attributes = source
        .attrs()
        .map(|(name, value)| match name.split_once(':') {
            Some((ns::XML_PREFIX, local)) => Ok(Attribute::with_namespace(ns::XML, local, value)),
            Some((prefix, local)) => match lookup(scopes, prefix) {
                Some(uri) => Ok(Attribute::with_namespace(uri, local, value)),
                None => Err(XmlError::parse(format!(
                    "undeclared prefix {prefix} on attribute {name}"
                ))),
            },
            None => Ok(Attribute::new(name, value)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut children = Vec::new();
    for node in source.nodes() {
        match node {
            Node::Element(child) => children.push(Fragment::Element(convert(child, scopes)?)),
            Node::Text(text) => children.push(Fragment::Text(text.clone())),
        }
    }

    Element::new(
        source.name(),
        source.ns(),
        "",
        attributes,
        BTreeMap::new(),
        children,
    )
}

/// Innermost binding of `prefix`.
fn lookup<'a>(scopes: &[&'a Declarations], prefix: &str) -> Option<&'a str> {
    let key = Some(prefix.to_string());
    scopes
        .iter()
        .rev()
        .find_map(|declarations| declarations.get(&key))
        .map(String::as_str)
}

impl Element {
    /// Parse a complete element with minidom and convert it.
    pub fn parse_str(xml: &str) -> Result<Self, XmlError> {
        let parsed = minidom::Element::from_str(xml)
            .map_err(|e| XmlError::parse(format!("failed to parse element: {e}")))?;
        Element::try_from(&parsed)
    }
}
