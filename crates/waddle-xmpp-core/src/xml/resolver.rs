//! Scoped namespace resolution for the renderer.
//!
//! Each open element contributes one [`Scope`]: its own declarations plus the
//! declarations the renderer had to synthesize for it. Lookups walk the
//! scopes from the innermost outwards, and a binding only counts if it is not
//! shadowed by a closer binding of the same prefix.

use crate::ns;

use super::fragment::Element;

/// Base for generated prefixes (`ns1`, `ns2`, ...).
const GENERATED_PREFIX: &str = "ns";

#[derive(Debug)]
struct Scope {
    element: Element,
    bindings: Vec<(String, String)>,
    prefix: String,
}

/// Stack of namespace scopes, one per open element.
#[derive(Debug, Default)]
pub struct NamespaceResolver {
    scopes: Vec<Scope>,
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope for `element` and compute the declarations its start
    /// tag must carry, in output order.
    pub fn push(&mut self, element: &Element) -> Vec<(String, String)> {
        let mut declarations: Vec<(String, String)> = element
            .declared_namespaces()
            .iter()
            .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
            .collect();

        self.scopes.push(Scope {
            element: element.clone(),
            bindings: declarations.clone(),
            prefix: String::new(),
        });

        // attributes in a namespace need a non-default prefix in scope
        for attr in element.attributes() {
            let uri = attr.namespace_uri();
            if uri.is_empty() || self.resolve_attribute_prefix(uri).is_some() {
                continue;
            }
            let prefix = self.generate_prefix();
            self.bind(&prefix, uri);
            declarations.push((prefix, uri.to_string()));
        }

        // the element's own namespace, unless it already resolves here
        let uri = element.namespace_uri();
        let wanted = element.namespace_prefix();
        let chosen = if uri.is_empty() {
            String::new()
        } else if wanted.is_empty() {
            match self.resolve_prefix(uri) {
                Some(prefix) => prefix,
                None => self.declare(element, "", uri, &mut declarations),
            }
        } else if self.resolve_uri(wanted).as_deref() == Some(uri) {
            wanted.to_string()
        } else {
            self.declare(element, wanted, uri, &mut declarations)
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.prefix = chosen;
        }

        // undeclare an inherited default namespace
        if uri.is_empty()
            && wanted.is_empty()
            && !element.declared_namespaces().contains_key("")
            && matches!(self.resolve_uri("").as_deref(), Some(default) if !default.is_empty())
        {
            self.bind("", "");
            declarations.push((String::new(), String::new()));
        }

        declarations
    }

    /// Close the innermost scope.
    pub fn pop(&mut self) -> Option<Element> {
        self.scopes.pop().map(|scope| scope.element)
    }

    /// Prefix the innermost element is written with; empty when unprefixed.
    pub fn element_prefix(&self) -> &str {
        self.scopes.last().map(|scope| scope.prefix.as_str()).unwrap_or("")
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Prefix bound to `uri` in the current scope; empty for the default
    /// namespace. `xml` always resolves.
    pub fn resolve_prefix(&self, uri: &str) -> Option<String> {
        self.resolve_prefix_where(uri, |_| true)
    }

    /// Like [`resolve_prefix`](Self::resolve_prefix) but never returns the
    /// default namespace, which does not apply to attributes.
    pub fn resolve_attribute_prefix(&self, uri: &str) -> Option<String> {
        self.resolve_prefix_where(uri, |prefix| !prefix.is_empty())
    }

    /// URI bound to `prefix` in the current scope.
    pub fn resolve_uri(&self, prefix: &str) -> Option<String> {
        if prefix == ns::XML_PREFIX {
            return Some(ns::XML.to_string());
        }
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .bindings
                .iter()
                .find(|(bound, _)| bound == prefix)
                .map(|(_, uri)| uri.clone())
        })
    }

    fn resolve_prefix_where(&self, uri: &str, accept: impl Fn(&str) -> bool) -> Option<String> {
        if uri == ns::XML {
            return Some(ns::XML_PREFIX.to_string());
        }
        for scope in self.scopes.iter().rev() {
            for (prefix, bound) in &scope.bindings {
                if bound == uri
                    && accept(prefix)
                    && self.resolve_uri(prefix).as_deref() == Some(uri)
                {
                    return Some(prefix.clone());
                }
            }
        }
        None
    }

    /// Bind `uri` for `element`, preferring `wanted` unless the element's
    /// own declarations already use that prefix for something else.
    fn declare(
        &mut self,
        element: &Element,
        wanted: &str,
        uri: &str,
        declarations: &mut Vec<(String, String)>,
    ) -> String {
        let prefix = if element.declared_namespaces().contains_key(wanted) {
            self.generate_prefix()
        } else {
            wanted.to_string()
        };
        self.bind(&prefix, uri);
        declarations.push((prefix.clone(), uri.to_string()));
        prefix
    }

    fn bind(&mut self, prefix: &str, uri: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.push((prefix.to_string(), uri.to_string()));
        }
    }

    fn generate_prefix(&self) -> String {
        (1..)
            .map(|n| format!("{GENERATED_PREFIX}{n}"))
            .find(|candidate| self.resolve_uri(candidate).is_none())
            .unwrap_or_else(|| GENERATED_PREFIX.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::ElementBuilder;

    fn build(builder: &mut ElementBuilder) -> Element {
        builder.build().unwrap()
    }

    #[test]
    fn test_xml_prefix_is_implicit() {
        let resolver = NamespaceResolver::new();
        assert_eq!(resolver.resolve_prefix(ns::XML).as_deref(), Some("xml"));
        assert_eq!(resolver.resolve_uri("xml").as_deref(), Some(ns::XML));
    }

    #[test]
    fn test_default_namespace_declared_once() {
        let outer = build(&mut ElementBuilder::new("foo", "http://example.com").unwrap());
        let inner = build(&mut ElementBuilder::new("bar", "http://example.com").unwrap());

        let mut resolver = NamespaceResolver::new();
        assert_eq!(
            resolver.push(&outer),
            vec![(String::new(), "http://example.com".to_string())]
        );
        assert!(resolver.push(&inner).is_empty());
        assert_eq!(resolver.resolve_prefix("http://example.com").as_deref(), Some(""));
    }

    #[test]
    fn test_shadowed_prefix_does_not_resolve() {
        let mut outer = ElementBuilder::new("a", "").unwrap();
        outer.declare_namespace("p", "urn:one").unwrap();
        let outer = build(&mut outer);
        let mut inner = ElementBuilder::new("b", "").unwrap();
        inner.declare_namespace("p", "urn:two").unwrap();
        let inner = build(&mut inner);

        let mut resolver = NamespaceResolver::new();
        resolver.push(&outer);
        resolver.push(&inner);
        assert_eq!(resolver.resolve_prefix("urn:one"), None);
        assert_eq!(resolver.resolve_prefix("urn:two").as_deref(), Some("p"));

        resolver.pop();
        assert_eq!(resolver.resolve_prefix("urn:one").as_deref(), Some("p"));
    }

    #[test]
    fn test_generated_prefixes_are_unique() {
        let mut builder = ElementBuilder::new("foo", "").unwrap();
        builder
            .add_namespaced_attribute("urn:one", "a", "1")
            .unwrap()
            .add_namespaced_attribute("urn:two", "b", "2")
            .unwrap();
        let foo = build(&mut builder);

        let mut resolver = NamespaceResolver::new();
        let declarations = resolver.push(&foo);
        assert_eq!(
            declarations,
            vec![
                ("ns1".to_string(), "urn:one".to_string()),
                ("ns2".to_string(), "urn:two".to_string()),
            ]
        );
    }

    #[test]
    fn test_shadowed_default_gets_generated_prefix() {
        let outer = build(&mut ElementBuilder::new("a", "urn:x").unwrap());
        let mut inner = ElementBuilder::new("b", "urn:x").unwrap();
        inner.declare_namespace("", "urn:y").unwrap();
        let inner = build(&mut inner);

        let mut resolver = NamespaceResolver::new();
        resolver.push(&outer);
        assert_eq!(resolver.element_prefix(), "");
        assert_eq!(
            resolver.push(&inner),
            vec![
                (String::new(), "urn:y".to_string()),
                ("ns1".to_string(), "urn:x".to_string()),
            ]
        );
        assert_eq!(resolver.element_prefix(), "ns1");
    }

    #[test]
    fn test_no_namespace_child_resets_default() {
        let outer = build(&mut ElementBuilder::new("foo", "http://example.com").unwrap());
        let inner = build(&mut ElementBuilder::new("bar", "").unwrap());

        let mut resolver = NamespaceResolver::new();
        resolver.push(&outer);
        assert_eq!(resolver.push(&inner), vec![(String::new(), String::new())]);
        assert_eq!(resolver.depth(), 2);
    }
}
