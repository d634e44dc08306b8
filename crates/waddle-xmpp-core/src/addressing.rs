//! XMPP addresses (`node@domain/resource`).
//!
//! [`Entity::parse`] goes through the `jid` crate, so addresses are validated
//! and normalised (nodeprep, nameprep, resourceprep) before they are compared.
//! [`Entity::parse_lenient`] only splits the parts and is meant for wire input
//! that has to be inspected even when it is malformed.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Errors raised when an address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityFormatError {
    /// The address has an empty domain part.
    #[error("missing domain in {0:?}")]
    MissingDomain(String),

    /// More than one `@` separator.
    #[error("too many '@' in {0:?}")]
    TooManySeparators(String),

    /// Rejected by strict JID validation.
    #[error("invalid JID {address:?}: {reason}")]
    Invalid {
        /// The offending address
        address: String,
        /// Why it was rejected
        reason: String,
    },
}

/// An XMPP entity address.
///
/// Domains compare case-insensitively; empty node or resource parts are
/// treated as absent.
#[derive(Debug, Clone)]
pub struct Entity {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

fn non_empty(part: Option<&str>) -> Option<String> {
    part.filter(|p| !p.is_empty()).map(str::to_string)
}

impl Entity {
    /// Create an entity from parts taken as given. Use [`Entity::validate`]
    /// when they come from outside.
    pub fn new(node: Option<&str>, domain: &str, resource: Option<&str>) -> Self {
        Self {
            node: non_empty(node),
            domain: domain.to_string(),
            resource: non_empty(resource),
        }
    }

    /// An address consisting of a domain only, such as a server.
    pub fn domain_only(domain: &str) -> Self {
        Self::new(None, domain, None)
    }

    /// Parse and normalise `address` with the RFC 7622 rules.
    pub fn parse(address: &str) -> Result<Self, EntityFormatError> {
        Self::parse_lenient(address)?;
        let jid = jid::Jid::new(address).map_err(|e| EntityFormatError::Invalid {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from(&jid))
    }

    /// Split `address` into node, domain and resource without validating
    /// or normalising them. The resource is everything after the first `/`
    /// and may itself contain `@`; empty node or resource parts are absent.
    pub fn parse_lenient(address: &str) -> Result<Self, EntityFormatError> {
        let (head, resource) = match address.split_once('/') {
            Some((head, resource)) => (head, Some(resource)),
            None => (address, None),
        };
        let (node, domain) = match head.split_once('@') {
            Some((_, domain)) if domain.contains('@') => {
                return Err(EntityFormatError::TooManySeparators(address.to_string()));
            }
            Some((node, domain)) => (Some(node), domain),
            None => (None, head),
        };
        if domain.is_empty() {
            return Err(EntityFormatError::MissingDomain(address.to_string()));
        }
        Ok(Self::new(node, domain, resource))
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// The address without its resource.
    pub fn bare(&self) -> Entity {
        Entity {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// The same bare address bound to `resource`.
    pub fn with_resource(&self, resource: &str) -> Entity {
        Entity {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: non_empty(Some(resource)),
        }
    }

    /// `node@domain`, or just the domain.
    pub fn bare_name(&self) -> String {
        match &self.node {
            Some(node) => format!("{}@{}", node, self.domain),
            None => self.domain.clone(),
        }
    }

    /// `node@domain/resource` with absent parts left out.
    pub fn full_qualified_name(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}/{}", self.bare_name(), resource),
            None => self.bare_name(),
        }
    }

    /// Whether the domains match, ignoring case.
    pub fn same_domain(&self, other: &Entity) -> bool {
        self.domain.eq_ignore_ascii_case(&other.domain)
    }

    /// Whether `self` addresses `server` itself or one of its subdomains
    /// (a hosted component). Node and resource parts are ignored.
    pub fn is_addressing_server(&self, server: &Entity) -> bool {
        if self.same_domain(server) {
            return true;
        }
        let domain = self.domain.to_ascii_lowercase();
        let suffix = format!(".{}", server.domain.to_ascii_lowercase());
        domain.ends_with(&suffix)
    }

    /// Whether `self` is exactly the server address (domain only).
    pub fn is_server(&self, server: &Entity) -> bool {
        self.node.is_none() && self.resource.is_none() && self.same_domain(server)
    }

    /// Validate with the full JID rules (stringprep, part lengths).
    pub fn validate(&self) -> Result<jid::Jid, EntityFormatError> {
        let address = self.full_qualified_name();
        jid::Jid::new(&address).map_err(|e| EntityFormatError::Invalid {
            address,
            reason: e.to_string(),
        })
    }
}

impl From<&jid::Jid> for Entity {
    fn from(jid: &jid::Jid) -> Self {
        Self {
            node: jid.node().map(|node| node.to_string()),
            domain: jid.domain().to_string(),
            resource: jid.resource().map(|resource| resource.to_string()),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.same_domain(other) && self.resource == other.resource
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.domain.to_ascii_lowercase().hash(state);
        self.resource.hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_qualified_name())
    }
}

impl FromStr for Entity {
    type Err = EntityFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
