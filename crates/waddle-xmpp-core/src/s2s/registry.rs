//! Outbound server-to-server connectors.
//!
//! The registry keeps at most one live connector per remote domain. The
//! first caller for a domain establishes the connection while later callers
//! for the same domain wait on the same slot, so concurrent relays never
//! open duplicate connections. A connector found closed is replaced.
//!
//! # Example
//!
//! ```ignore
//! let registry = S2sConnectorRegistry::new(
//!     Entity::domain_only("waddle.social"),
//!     &config.s2s,
//!     Arc::new(SrvResolver::new()),
//!     Arc::new(TcpConnectorFactory::new(tls)),
//! );
//! let connector = registry.connect(&Entity::domain_only("jabber.org")).await?;
//! connector.write(&stanza)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::addressing::Entity;
use crate::config::S2sConfig;
use crate::s2s::dns::{DnsError, ResolvedTarget, TargetResolver};
use crate::session::SessionContext;
use crate::stanza::Stanza;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Resolution(#[from] DnsError),

    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("stream handshake with {target} failed: {message}")]
    Handshake { target: String, message: String },

    #[error("{phase} with {target} timed out after {elapsed:?}")]
    Timeout {
        target: String,
        phase: &'static str,
        elapsed: Duration,
    },

    #[error("no reachable server for {0}")]
    Unreachable(String),

    #[error("connector to {0} is closed")]
    Closed(String),
}

impl ConnectorError {
    pub fn connect(target: &ResolvedTarget, message: impl Into<String>) -> Self {
        Self::Connect {
            target: target.to_string(),
            message: message.into(),
        }
    }

    pub fn handshake(target: &ResolvedTarget, message: impl Into<String>) -> Self {
        Self::Handshake {
            target: target.to_string(),
            message: message.into(),
        }
    }
}

/// Why a connection is opened.
#[derive(Debug, Clone)]
pub enum ConnectPurpose {
    /// Carry stanzas to the remote domain; authenticates with dialback.
    Relay,
    /// Ask the remote authoritative server to verify a dialback key
    /// presented on `origin`. The transport links the session it creates
    /// for this stream to `origin` with
    /// [`SessionContext::set_dialback_origin`].
    DialbackVerify { origin: Arc<SessionContext> },
}

impl ConnectPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::DialbackVerify { .. } => "dialback_verify",
        }
    }
}

/// An established outbound stream.
pub trait S2sConnector: Send + Sync {
    /// The remote domain.
    fn remote(&self) -> &Entity;

    fn is_closed(&self) -> bool;

    /// Queue a stanza on the stream.
    fn write(&self, stanza: &Stanza) -> Result<(), ConnectorError>;

    /// Close the stream.
    fn close(&self);
}

/// A transport connection whose XMPP stream is not negotiated yet.
#[async_trait]
pub trait PendingConnection: Send {
    async fn handshake(
        self: Box<Self>,
        local: &Entity,
        remote: &Entity,
        purpose: ConnectPurpose,
    ) -> Result<Arc<dyn S2sConnector>, ConnectorError>;
}

/// Opens transport connections to candidates.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn open(
        &self,
        target: &ResolvedTarget,
        remote: &Entity,
    ) -> Result<Box<dyn PendingConnection>, ConnectorError>;
}

type Slot = Arc<Mutex<Option<Arc<dyn S2sConnector>>>>;

/// Live outbound connectors keyed by remote domain.
pub struct S2sConnectorRegistry {
    local: Entity,
    resolver: Arc<dyn TargetResolver>,
    factory: Arc<dyn ConnectorFactory>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    connectors: DashMap<String, Slot>,
}

impl S2sConnectorRegistry {
    pub fn new(
        local: Entity,
        config: &S2sConfig,
        resolver: Arc<dyn TargetResolver>,
        factory: Arc<dyn ConnectorFactory>,
    ) -> Self {
        info!(local = %local, "Creating s2s connector registry");
        Self {
            local,
            resolver,
            factory,
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
            connectors: DashMap::new(),
        }
    }

    pub fn local(&self) -> &Entity {
        &self.local
    }

    /// The connector for `remote`'s domain, established if needed.
    #[instrument(skip(self), fields(remote = %remote.domain()), name = "xmpp.s2s.connect")]
    pub async fn connect(&self, remote: &Entity) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
        let key = remote.domain().to_lowercase();
        let slot = Arc::clone(self.connectors.entry(key).or_default().value());

        let mut current = slot.lock().await;
        if let Some(connector) = current.as_ref() {
            if !connector.is_closed() {
                return Ok(Arc::clone(connector));
            }
            debug!("Replacing closed connector");
        }

        let connector = self
            .establish(&Entity::domain_only(remote.domain()), ConnectPurpose::Relay)
            .await?;
        *current = Some(Arc::clone(&connector));
        Ok(connector)
    }

    /// A new connector used only to verify a dialback key presented on
    /// `origin`. It is not registered and is closed once the answer
    /// arrived.
    #[instrument(
        skip(self, origin),
        fields(remote = %remote.domain(), origin = %origin.id()),
        name = "xmpp.s2s.connect_for_dialback"
    )]
    pub async fn connect_for_dialback(
        &self,
        remote: &Entity,
        origin: Arc<SessionContext>,
    ) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
        self.establish(
            &Entity::domain_only(remote.domain()),
            ConnectPurpose::DialbackVerify { origin },
        )
        .await
    }

    /// The live connector for `remote`, if one exists and is not busy
    /// being established.
    pub fn get(&self, remote: &Entity) -> Option<Arc<dyn S2sConnector>> {
        let slot = Arc::clone(self.connectors.get(&remote.domain().to_lowercase())?.value());
        let current = slot.try_lock().ok()?;
        let live = current.as_ref().filter(|c| !c.is_closed()).cloned();
        live
    }

    /// Close and forget every connector.
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self
            .connectors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.connectors.clear();
        for slot in slots {
            if let Some(connector) = slot.lock().await.take() {
                connector.close();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    async fn establish(
        &self,
        remote: &Entity,
        purpose: ConnectPurpose,
    ) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
        let targets = self.resolver.resolve(remote.domain()).await?;

        for target in &targets {
            match self.try_target(target, remote, purpose.clone()).await {
                Ok(connector) => {
                    info!(target = %target, purpose = purpose.as_str(), "Connected to remote server");
                    return Ok(connector);
                }
                Err(e) => warn!(target = %target, error = %e, "Candidate failed, trying next"),
            }
        }
        Err(ConnectorError::Unreachable(remote.domain().to_string()))
    }

    async fn try_target(
        &self,
        target: &ResolvedTarget,
        remote: &Entity,
        purpose: ConnectPurpose,
    ) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
        let pending = timeout(self.connect_timeout, self.factory.open(target, remote))
            .await
            .map_err(|_| ConnectorError::Timeout {
                target: target.to_string(),
                phase: "connect",
                elapsed: self.connect_timeout,
            })??;

        timeout(
            self.handshake_timeout,
            pending.handshake(&self.local, remote, purpose),
        )
        .await
        .map_err(|_| ConnectorError::Timeout {
            target: target.to_string(),
            phase: "handshake",
            elapsed: self.handshake_timeout,
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s2s::dns::StaticTargetResolver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeConnector {
        remote: Entity,
        closed: AtomicBool,
    }

    impl S2sConnector for FakeConnector {
        fn remote(&self) -> &Entity {
            &self.remote
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn write(&self, _stanza: &Stanza) -> Result<(), ConnectorError> {
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakePending;

    #[async_trait]
    impl PendingConnection for FakePending {
        async fn handshake(
            self: Box<Self>,
            _local: &Entity,
            remote: &Entity,
            _purpose: ConnectPurpose,
        ) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
            Ok(Arc::new(FakeConnector {
                remote: remote.clone(),
                closed: AtomicBool::new(false),
            }))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ConnectorFactory for CountingFactory {
        async fn open(
            &self,
            _target: &ResolvedTarget,
            _remote: &Entity,
        ) -> Result<Box<dyn PendingConnection>, ConnectorError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePending))
        }
    }

    fn registry(factory: Arc<CountingFactory>) -> S2sConnectorRegistry {
        let resolver = StaticTargetResolver::new().with_targets(
            "remote.example",
            vec![ResolvedTarget::fallback("remote.example")],
        );
        S2sConnectorRegistry::new(
            Entity::domain_only("local.example"),
            &S2sConfig::default(),
            Arc::new(resolver),
            factory,
        )
    }

    #[tokio::test]
    async fn test_connect_reuses_live_connector() {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(factory.clone());
        let remote = Entity::parse("user@remote.example").unwrap();

        let first = registry.connect(&remote).await.unwrap();
        let second = registry.connect(&remote).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&remote).is_some());
    }

    #[tokio::test]
    async fn test_closed_connector_is_replaced() {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(factory.clone());
        let remote = Entity::domain_only("remote.example");

        let first = registry.connect(&remote).await.unwrap();
        first.close();
        assert!(registry.get(&remote).is_none());

        let second = registry.connect(&remote).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dialback_connector_is_not_registered() {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(factory.clone());
        let remote = Entity::domain_only("remote.example");

        let origin = Arc::new(SessionContext::new(
            Entity::domain_only("local.example"),
            crate::session::SessionRole::ServerToServer,
            Arc::new(crate::session::RecordingStanzaWriter::new()),
            Arc::new(crate::resources::ResourceRegistry::new()),
        ));
        registry.connect_for_dialback(&remote, Arc::clone(&origin)).await.unwrap();
        registry.connect_for_dialback(&remote, origin).await.unwrap();
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_domain_fails_resolution() {
        let registry = registry(Arc::new(CountingFactory::default()));
        let result = registry
            .connect(&Entity::domain_only("nowhere.example"))
            .await;
        assert!(matches!(result, Err(ConnectorError::Resolution(_))));
    }
}
