//! Resolution of the one handler responsible for a stanza.
//!
//! Resolution order:
//!
//! 0. Core stanzas addressed to a component subdomain go to that
//!    component's dictionary, or get `service-unavailable` when it has no
//!    matching handler. Nothing else sees them.
//! 1. Module dictionaries, in registration order. An IQ with exactly one
//!    child is keyed by the child's namespace, anything else by its own.
//! 2. Stream-level elements: the XML prolog, any `stream` element (the
//!    stream-start handler rejects a wrong namespace) and the dialback
//!    `result` / `verify` elements.
//! 3. Core stanzas. An IQ with one child that no dictionary claimed gets
//!    `service-unavailable` when it addresses the server and is relayed
//!    otherwise; an IQ with any other child count gets the validating IQ
//!    handler. Messages and presences get their core handlers.
//!
//! Non-core stanzas nobody claimed have no handler.

use crate::addressing::Entity;
use crate::handlers::{
    DialbackResultHandler, DialbackVerifyHandler, IqHandler, MessageHandler, PresenceHandler,
    RelayingIqHandler, ServiceUnavailableHandler, StreamStartHandler, XmlPrologHandler,
};
use crate::ns;
use crate::protocol::dictionary::HandlerDictionary;
use crate::protocol::handler::Handler;
use crate::stanza::{CoreStanza, Stanza};

/// Sealed dictionaries plus the built-in handlers.
#[derive(Debug)]
pub struct StanzaHandlerLookup {
    dictionaries: Vec<HandlerDictionary>,
    components: Vec<(String, HandlerDictionary)>,
    prolog: Handler,
    stream_start: Handler,
    dialback_result: Handler,
    dialback_verify: Handler,
    iq: Handler,
    relaying_iq: Handler,
    message: Handler,
    presence: Handler,
    service_unavailable: Handler,
}

impl StanzaHandlerLookup {
    /// Seal `dictionaries` and take ownership of them.
    pub fn new(mut dictionaries: Vec<HandlerDictionary>) -> Self {
        for dictionary in &mut dictionaries {
            dictionary.seal();
        }
        Self {
            dictionaries,
            components: Vec::new(),
            prolog: Handler::direct(XmlPrologHandler),
            stream_start: Handler::direct(StreamStartHandler),
            dialback_result: Handler::direct(DialbackResultHandler),
            dialback_verify: Handler::direct(DialbackVerifyHandler),
            iq: Handler::direct(IqHandler),
            relaying_iq: Handler::direct(RelayingIqHandler),
            message: Handler::direct(MessageHandler),
            presence: Handler::direct(PresenceHandler),
            service_unavailable: Handler::direct(ServiceUnavailableHandler),
        }
    }

    /// Seal and add dictionaries serving component subdomains, keyed by
    /// domain.
    pub fn with_components(mut self, components: Vec<(String, HandlerDictionary)>) -> Self {
        for (domain, mut dictionary) in components {
            dictionary.seal();
            self.components.push((domain.to_ascii_lowercase(), dictionary));
        }
        self
    }

    pub fn dictionaries(&self) -> &[HandlerDictionary] {
        &self.dictionaries
    }

    /// Component domains in registration order.
    pub fn component_domains(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|(domain, _)| domain.as_str())
    }

    /// The handler for `stanza` received by `server`.
    pub fn handler_for(&self, stanza: &Stanza, server: &Entity) -> Option<&Handler> {
        let core = CoreStanza::wrap(stanza);
        let single_iq_child = match core {
            Some(CoreStanza::Iq(_)) => stanza.single_inner_element(),
            _ => None,
        };

        let key = single_iq_child.map_or(stanza.namespace_uri(), |child| child.namespace_uri());
        if core.is_some() {
            if let Some(component) = self.component_for(stanza) {
                let handler = component
                    .get(stanza)
                    .filter(|_| component.covers(key))
                    .unwrap_or(&self.service_unavailable);
                return Some(handler);
            }
        }
        if let Some(handler) = self.from_dictionaries(stanza, key) {
            return Some(handler);
        }

        match (stanza.name(), stanza.namespace_uri()) {
            ("xml", _) => return Some(&self.prolog),
            ("stream", _) => return Some(&self.stream_start),
            ("result", ns::JABBER_SERVER_DIALBACK) => return Some(&self.dialback_result),
            ("verify", ns::JABBER_SERVER_DIALBACK) => return Some(&self.dialback_verify),
            _ => {}
        }

        match core? {
            CoreStanza::Iq(_) if single_iq_child.is_some() => {
                if addresses_server(stanza, server) {
                    Some(&self.service_unavailable)
                } else {
                    Some(&self.relaying_iq)
                }
            }
            CoreStanza::Iq(_) => Some(&self.iq),
            CoreStanza::Message(_) => Some(&self.message),
            CoreStanza::Presence(_) => Some(&self.presence),
        }
    }

    fn component_for(&self, stanza: &Stanza) -> Option<&HandlerDictionary> {
        let Ok(Some(to)) = stanza.to() else {
            return None;
        };
        self.components
            .iter()
            .find(|(domain, _)| to.domain().eq_ignore_ascii_case(domain))
            .map(|(_, dictionary)| dictionary)
    }

    fn from_dictionaries(&self, stanza: &Stanza, key: &str) -> Option<&Handler> {
        self.dictionaries
            .iter()
            .filter(|dictionary| dictionary.covers(key))
            .find_map(|dictionary| dictionary.get(stanza))
    }
}

/// `to` is missing, unparsable or the bare server domain.
fn addresses_server(stanza: &Stanza, server: &Entity) -> bool {
    match stanza.to() {
        Ok(Some(to)) => to.is_server(server),
        _ => true,
    }
}
