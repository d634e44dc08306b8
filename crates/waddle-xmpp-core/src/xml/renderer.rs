//! Serializes fragment trees to wire-format XML.
//!
//! Namespace declarations are computed while walking the tree with a
//! [`NamespaceResolver`], so a URI already in scope from an ancestor is never
//! declared again and undeclared attribute namespaces get a generated prefix.
//! Empty elements are written with an explicit close tag.

use std::fmt::Write as _;

use crate::error::XmlError;

use super::fragment::{Element, Fragment};
use super::resolver::NamespaceResolver;

/// The three parts of a rendered element.
///
/// Stream headers are sent as `opening` + `content` only; the closing tag
/// follows when the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub opening: String,
    pub content: String,
    pub closing: String,
}

impl Rendered {
    /// Opening tag, content and closing tag.
    pub fn complete(&self) -> String {
        let mut out =
            String::with_capacity(self.opening.len() + self.content.len() + self.closing.len());
        out.push_str(&self.opening);
        out.push_str(&self.content);
        out.push_str(&self.closing);
        out
    }
}

/// Render `element` with a fresh namespace scope.
pub fn render(element: &Element) -> Result<Rendered, XmlError> {
    let mut resolver = NamespaceResolver::new();
    render_scoped(element, &mut resolver)
}

/// Render `element` completely to a string.
pub fn render_to_string(element: &Element) -> Result<String, XmlError> {
    render(element).map(|rendered| rendered.complete())
}

fn render_scoped(element: &Element, resolver: &mut NamespaceResolver) -> Result<Rendered, XmlError> {
    let declarations = resolver.push(element);
    let qualified = qualified_element_name(element, resolver);

    let mut opening = String::new();
    opening.push('<');
    opening.push_str(&qualified);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            let _ = write!(opening, " xmlns=\"{}\"", escape_attribute(uri));
        } else {
            let _ = write!(opening, " xmlns:{}=\"{}\"", prefix, escape_attribute(uri));
        }
    }
    for attr in element.attributes() {
        if attr.name().starts_with("xmlns") {
            continue;
        }
        let name = if attr.namespace_uri().is_empty() {
            attr.name().to_string()
        } else {
            match resolver.resolve_attribute_prefix(attr.namespace_uri()) {
                Some(prefix) => format!("{}:{}", prefix, attr.name()),
                None => attr.name().to_string(),
            }
        };
        let _ = write!(opening, " {}=\"{}\"", name, escape_attribute(attr.value()));
    }
    opening.push('>');

    let mut content = String::new();
    for child in element.children() {
        match child {
            Fragment::Element(inner) => {
                let rendered = render_scoped(inner, resolver)?;
                content.push_str(&rendered.opening);
                content.push_str(&rendered.content);
                content.push_str(&rendered.closing);
            }
            Fragment::Text(text) => content.push_str(&escape_text(text)),
            Fragment::Empty => {}
            Fragment::Comment(_) => {
                resolver.pop();
                return Err(XmlError::UnsupportedFragmentType("comment".to_string()));
            }
        }
    }

    let closing = format!("</{qualified}>");
    resolver.pop();

    Ok(Rendered {
        opening,
        content,
        closing,
    })
}

fn qualified_element_name(element: &Element, resolver: &NamespaceResolver) -> String {
    match resolver.element_prefix() {
        "" => element.name().to_string(),
        prefix => format!("{}:{}", prefix, element.name()),
    }
}

/// Escape character data: `&`, `<` and `>`.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value: `&`, `"`, `<` and `>`. Apostrophes are left
/// alone since values are always double quoted.
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
