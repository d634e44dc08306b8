//! The server runtime shared by every session.
//!
//! A [`ServerRuntimeContext`] is assembled once at bootstrap through
//! [`ServerRuntimeBuilder`]. Modules contribute handler dictionaries and
//! interceptors to the builder; once built, the dictionaries are sealed and
//! nothing about dispatch changes for the lifetime of the process.
//!
//! # Example
//!
//! ```ignore
//! let runtime = ServerRuntimeContext::builder(CoreConfig::default().with_domain("waddle.social"))
//!     .add_dictionary(disco_dictionary())
//!     .add_interceptor(Arc::new(AuditInterceptor::default()))
//!     .relay(Arc::new(ReceiverStanzaRelay::new()))
//!     .build()?;
//! let session = runtime.new_session(SessionRole::ClientToServer, writer);
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::addressing::Entity;
use crate::config::{ConfigError, CoreConfig};
use crate::delivery::{OfflineStanzaReceiver, ReceiverStanzaRelay, StanzaRelay};
use crate::handlers::StartTlsHandler;
use crate::ns;
use crate::protocol::broker::DefaultStanzaBroker;
use crate::protocol::dictionary::HandlerDictionary;
use crate::protocol::handler::Handler;
use crate::protocol::interceptor::StanzaHandlerInterceptor;
use crate::protocol::lookup::StanzaHandlerLookup;
use crate::resources::ResourceRegistry;
use crate::s2s::{DialbackKey, FederatingStanzaRelay, S2sConnectorRegistry};
use crate::session::{SessionContext, SessionRole, StanzaWriter};
use crate::stanza::Stanza;

/// Answers whether one entity may exchange IQs with another.
///
/// Backed by roster storage in a full server. Without one every exchange is
/// allowed.
pub trait SubscriptionLookup: Send + Sync {
    /// Whether `contact` is in `user`'s roster with a subscription in
    /// either direction.
    fn is_subscribed(&self, user: &Entity, contact: &Entity) -> bool;
}

/// Everything a session needs from the server it belongs to.
pub struct ServerRuntimeContext {
    server: Entity,
    config: CoreConfig,
    lookup: StanzaHandlerLookup,
    interceptors: Vec<Arc<dyn StanzaHandlerInterceptor>>,
    relay: Arc<dyn StanzaRelay>,
    offline: Option<Arc<dyn OfflineStanzaReceiver>>,
    resources: Arc<ResourceRegistry>,
    connectors: Option<Arc<S2sConnectorRegistry>>,
    dialback_key: DialbackKey,
    subscriptions: Option<Arc<dyn SubscriptionLookup>>,
}

impl fmt::Debug for ServerRuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRuntimeContext")
            .field("server", &self.server)
            .field("dictionaries", &self.lookup.dictionaries().len())
            .field("interceptors", &self.interceptors.len())
            .field("federation", &self.connectors.is_some())
            .finish()
    }
}

impl ServerRuntimeContext {
    pub fn builder(config: CoreConfig) -> ServerRuntimeBuilder {
        ServerRuntimeBuilder::new(config)
    }

    /// The served domain.
    pub fn server_entity(&self) -> &Entity {
        &self.server
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The handler responsible for `stanza`, if any.
    pub fn handler_for(&self, stanza: &Stanza) -> Option<&Handler> {
        self.lookup.handler_for(stanza, &self.server)
    }

    pub fn lookup(&self) -> &StanzaHandlerLookup {
        &self.lookup
    }

    /// Interceptors in registration order.
    pub fn interceptors(&self) -> &[Arc<dyn StanzaHandlerInterceptor>] {
        &self.interceptors
    }

    pub fn relay(&self) -> &Arc<dyn StanzaRelay> {
        &self.relay
    }

    pub fn offline_receiver(&self) -> Option<&Arc<dyn OfflineStanzaReceiver>> {
        self.offline.as_ref()
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Outbound federation, when enabled.
    pub fn connectors(&self) -> Option<&Arc<S2sConnectorRegistry>> {
        self.connectors.as_ref()
    }

    pub fn dialback_key(&self) -> &DialbackKey {
        &self.dialback_key
    }

    pub fn subscriptions(&self) -> Option<&Arc<dyn SubscriptionLookup>> {
        self.subscriptions.as_ref()
    }

    /// Whether `user` may exchange IQs with `contact`.
    pub fn is_subscribed(&self, user: &Entity, contact: &Entity) -> bool {
        self.subscriptions
            .as_ref()
            .map_or(true, |lookup| lookup.is_subscribed(user, contact))
    }

    /// A session of `role` writing to `writer`, sharing this server's
    /// resource registry.
    pub fn new_session(&self, role: SessionRole, writer: Arc<dyn StanzaWriter>) -> Arc<SessionContext> {
        Arc::new(SessionContext::new(
            self.server.clone(),
            role,
            writer,
            Arc::clone(&self.resources),
        ))
    }

    /// The broker handed to the interceptor chain for a stanza received on
    /// `session`.
    pub fn broker_for<'a>(&'a self, session: Option<&'a SessionContext>) -> DefaultStanzaBroker<'a> {
        DefaultStanzaBroker::new(&self.relay, session, self.offline.as_ref())
    }
}

/// Collects module contributions before the runtime is frozen.
pub struct ServerRuntimeBuilder {
    config: CoreConfig,
    dictionaries: Vec<HandlerDictionary>,
    components: Vec<(String, HandlerDictionary)>,
    interceptors: Vec<Arc<dyn StanzaHandlerInterceptor>>,
    relay: Option<Arc<dyn StanzaRelay>>,
    offline: Option<Arc<dyn OfflineStanzaReceiver>>,
    resources: Option<Arc<ResourceRegistry>>,
    connectors: Option<Arc<S2sConnectorRegistry>>,
    subscriptions: Option<Arc<dyn SubscriptionLookup>>,
}

impl ServerRuntimeBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            dictionaries: Vec::new(),
            components: Vec::new(),
            interceptors: Vec::new(),
            relay: None,
            offline: None,
            resources: None,
            connectors: None,
            subscriptions: None,
        }
    }

    /// Register a module dictionary. Dictionaries are consulted in the
    /// order they were added; several may cover the same namespace.
    pub fn add_dictionary(mut self, dictionary: HandlerDictionary) -> Self {
        self.dictionaries.push(dictionary);
        self
    }

    /// Serve the `subdomain` component with its own dictionary. Core
    /// stanzas addressed there never reach the server-wide dictionaries.
    pub fn add_component(mut self, subdomain: impl Into<String>, dictionary: HandlerDictionary) -> Self {
        self.components.push((subdomain.into(), dictionary));
        self
    }

    /// Append an interceptor to the chain run before every handler.
    pub fn add_interceptor(mut self, interceptor: Arc<dyn StanzaHandlerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Relay for locally addressed stanzas. Defaults to an empty
    /// [`ReceiverStanzaRelay`].
    pub fn relay(mut self, relay: Arc<dyn StanzaRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn offline_receiver(mut self, offline: Arc<dyn OfflineStanzaReceiver>) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Outbound connectors. Only used when `s2s.enabled` is set.
    pub fn connectors(mut self, connectors: Arc<S2sConnectorRegistry>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    pub fn subscriptions(mut self, subscriptions: Arc<dyn SubscriptionLookup>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Validate the configuration, seal every dictionary and freeze the
    /// runtime.
    pub fn build(self) -> Result<ServerRuntimeContext, ConfigError> {
        self.config.validate()?;
        let server = Entity::parse(self.config.domain.trim())
            .map_err(|e| ConfigError::invalid("domain", e.to_string()))?;
        if !server.is_bare() || server.node().is_some() {
            return Err(ConfigError::invalid("domain", "must be a bare domain"));
        }
        info!(domain = %server, "Creating server runtime");

        let mut dictionaries = self.dictionaries;
        let mut tls = HandlerDictionary::for_namespace("starttls", ns::TLS);
        tls.register(Handler::direct(StartTlsHandler))
            .map_err(|e| ConfigError::invalid("dictionaries", e.to_string()))?;
        dictionaries.push(tls);
        for dictionary in &dictionaries {
            debug!(
                dictionary = dictionary.name(),
                namespace = ?dictionary.namespace(),
                handlers = dictionary.len(),
                "Registered handler dictionary"
            );
        }

        let mut components: Vec<(String, HandlerDictionary)> = Vec::with_capacity(self.components.len());
        for (subdomain, dictionary) in self.components {
            let component = Entity::parse(subdomain.trim())
                .map_err(|e| ConfigError::invalid("components", e.to_string()))?;
            if !component.is_bare() || component.node().is_some() {
                return Err(ConfigError::invalid(
                    "components",
                    format!("{subdomain} must be a bare domain"),
                ));
            }
            if component.is_server(&server) {
                return Err(ConfigError::invalid(
                    "components",
                    format!("{subdomain} is the server domain"),
                ));
            }
            if components.iter().any(|(domain, _)| domain == component.domain()) {
                return Err(ConfigError::invalid(
                    "components",
                    format!("{subdomain} registered twice"),
                ));
            }
            debug!(
                component = %component,
                dictionary = dictionary.name(),
                handlers = dictionary.len(),
                "Registered component dictionary"
            );
            components.push((component.domain().to_string(), dictionary));
        }

        let local: Arc<dyn StanzaRelay> = match self.relay {
            Some(relay) => relay,
            None => Arc::new(ReceiverStanzaRelay::new()),
        };
        let connectors = self.connectors.filter(|_| self.config.s2s.enabled);
        let relay: Arc<dyn StanzaRelay> = match &connectors {
            Some(connectors) => Arc::new(FederatingStanzaRelay::new(
                server.clone(),
                local,
                Arc::clone(connectors),
            )),
            None => local,
        };

        let dialback_key = match &self.config.s2s.dialback_secret {
            Some(secret) => DialbackKey::new(secret),
            None => DialbackKey::random(),
        };

        Ok(ServerRuntimeContext {
            server,
            lookup: StanzaHandlerLookup::new(dictionaries).with_components(components),
            interceptors: self.interceptors,
            relay,
            offline: self.offline,
            resources: self
                .resources
                .unwrap_or_else(|| Arc::new(ResourceRegistry::new())),
            connectors,
            dialback_key,
            subscriptions: self.subscriptions,
            config: self.config,
        })
    }
}
