//! Immutable XML fragment tree.
//!
//! Elements are reference counted: cloning an [`Element`] or a [`Fragment`]
//! shares the underlying node. Nothing in the tree can be changed after
//! construction; use [`ElementBuilder`](super::ElementBuilder) to derive a new
//! element instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::XmlError;

/// The "no namespace" sentinel.
pub const NO_NAMESPACE: &str = "";

/// A namespace qualified attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    namespace_uri: String,
    name: String,
    value: String,
}

impl Attribute {
    /// Create an attribute in no namespace.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_namespace(NO_NAMESPACE, name, value)
    }

    /// Create an attribute in the given namespace.
    pub fn with_namespace(
        namespace_uri: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this attribute has the given namespace and local name.
    pub fn is(&self, namespace_uri: &str, name: &str) -> bool {
        self.namespace_uri == namespace_uri && self.name == name
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// An element with its own subtree
    Element(Element),
    /// Character data, unescaped
    Text(String),
    /// A comment. Kept by the model, refused by the renderer since XMPP
    /// streams must not carry comments.
    Comment(String),
    /// Placeholder rendered as nothing
    Empty,
}

impl Fragment {
    /// Deep equality; element children are compared in order.
    pub fn deep_eq(&self, other: &Fragment) -> bool {
        match (self, other) {
            (Fragment::Element(a), Fragment::Element(b)) => a.deep_eq(b),
            (Fragment::Text(a), Fragment::Text(b)) => a == b,
            (Fragment::Comment(a), Fragment::Comment(b)) => a == b,
            (Fragment::Empty, Fragment::Empty) => true,
            _ => false,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Fragment::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Fragment::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl From<Element> for Fragment {
    fn from(element: Element) -> Self {
        Fragment::Element(element)
    }
}

#[derive(Debug)]
struct ElementNode {
    name: String,
    namespace_uri: String,
    namespace_prefix: String,
    attributes: Vec<Attribute>,
    namespaces: BTreeMap<String, String>,
    children: Vec<Fragment>,
}

/// An immutable, shareable XML element.
#[derive(Debug, Clone)]
pub struct Element {
    node: Arc<ElementNode>,
}

impl Element {
    /// Construct an element, validating name and prefix.
    ///
    /// `namespaces` maps declared prefixes (empty string for the default
    /// namespace) to namespace URIs.
    pub fn new(
        name: impl Into<String>,
        namespace_uri: impl Into<String>,
        namespace_prefix: impl Into<String>,
        attributes: Vec<Attribute>,
        namespaces: BTreeMap<String, String>,
        children: Vec<Fragment>,
    ) -> Result<Self, XmlError> {
        let name = name.into();
        let namespace_prefix = namespace_prefix.into();
        validate_name(&name)?;
        validate_prefix(&namespace_prefix)?;
        for prefix in namespaces.keys() {
            validate_prefix(prefix)?;
        }

        Ok(Self {
            node: Arc::new(ElementNode {
                name,
                namespace_uri: namespace_uri.into(),
                namespace_prefix,
                attributes,
                namespaces,
                children,
            }),
        })
    }

    /// Construct an empty element without attributes or children.
    pub fn empty(name: impl Into<String>, namespace_uri: impl Into<String>) -> Result<Self, XmlError> {
        Self::new(
            name,
            namespace_uri,
            "",
            Vec::new(),
            BTreeMap::new(),
            Vec::new(),
        )
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Namespace URI, empty when the element is in no namespace.
    pub fn namespace_uri(&self) -> &str {
        &self.node.namespace_uri
    }

    /// Namespace prefix, empty for the default namespace.
    pub fn namespace_prefix(&self) -> &str {
        &self.node.namespace_prefix
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.node.attributes
    }

    /// Namespace declarations made on this element, prefix to URI.
    pub fn declared_namespaces(&self) -> &BTreeMap<String, String> {
        &self.node.namespaces
    }

    pub fn children(&self) -> &[Fragment] {
        &self.node.children
    }

    /// Value of the attribute `name` in no namespace.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_ns(NO_NAMESPACE, name)
    }

    /// Value of the attribute `name` in `namespace_uri`.
    pub fn attribute_ns(&self, namespace_uri: &str, name: &str) -> Option<&str> {
        self.node
            .attributes
            .iter()
            .find(|attr| attr.is(namespace_uri, name))
            .map(Attribute::value)
    }

    /// Whether the element has the given local name and namespace.
    pub fn is(&self, name: &str, namespace_uri: &str) -> bool {
        self.node.name == name && self.node.namespace_uri == namespace_uri
    }

    /// Child elements, skipping text.
    pub fn inner_elements(&self) -> impl Iterator<Item = &Element> {
        self.node.children.iter().filter_map(Fragment::as_element)
    }

    /// First child element with the given name.
    pub fn first_inner_element(&self, name: &str) -> Option<&Element> {
        self.inner_elements().find(|child| child.name() == name)
    }

    /// The only child element, if there is exactly one.
    pub fn single_inner_element(&self) -> Option<&Element> {
        let mut elements = self.inner_elements();
        match (elements.next(), elements.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.node
            .children
            .iter()
            .filter_map(Fragment::as_text)
            .collect()
    }

    /// Equality on name, namespace URI and the attribute multiset.
    ///
    /// Attribute order is not significant, the namespace prefix is not
    /// compared and children are ignored.
    pub fn shallow_eq(&self, other: &Element) -> bool {
        if Arc::ptr_eq(&self.node, &other.node) {
            return true;
        }
        self.node.name == other.node.name
            && self.node.namespace_uri == other.node.namespace_uri
            && attribute_sets_equal(&self.node.attributes, &other.node.attributes)
    }

    /// Shallow equality plus pairwise deep equality of children in order.
    pub fn deep_eq(&self, other: &Element) -> bool {
        if !self.shallow_eq(other) {
            return false;
        }
        let (ours, theirs) = (&self.node.children, &other.node.children);
        ours.len() == theirs.len() && ours.iter().zip(theirs).all(|(a, b)| a.deep_eq(b))
    }

    /// Whether both handles point at the same node.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

/// Compare two attribute lists as unordered multisets.
pub fn attribute_sets_equal(a: &[Attribute], b: &[Attribute]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<&Attribute> = a.iter().collect();
    let mut right: Vec<&Attribute> = b.iter().collect();
    left.sort();
    right.sort();
    left == right
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-' || c == '.'
}

/// Check `name` against `[A-Za-z_:][A-Za-z_:\-.0-9]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start(first) => chars.all(is_name_char),
        _ => false,
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), XmlError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(XmlError::invalid_name(name))
    }
}

/// Prefixes follow the name grammar without colons; empty means default.
pub(crate) fn validate_prefix(prefix: &str) -> Result<(), XmlError> {
    if prefix.is_empty() || (is_valid_name(prefix) && !prefix.contains(':')) {
        Ok(())
    } else {
        Err(XmlError::invalid_name(prefix))
    }
}
