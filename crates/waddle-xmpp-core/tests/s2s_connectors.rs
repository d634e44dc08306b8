//! Outbound federation: candidate failover, timeouts and relaying.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{entity, parse, stanza_error_condition, TestSession};
use tokio_test::{assert_err, assert_ok};
use waddle_xmpp_core::config::S2sConfig;
use waddle_xmpp_core::delivery::{ReceiverStanzaRelay, StanzaReceiverQueue};
use waddle_xmpp_core::ns;
use waddle_xmpp_core::protocol::StanzaProcessor;
use waddle_xmpp_core::s2s::{
    ConnectPurpose, ConnectorError, ConnectorFactory, PendingConnection, ResolvedTarget, S2sConnector,
    S2sConnectorRegistry, StaticTargetResolver,
};
use waddle_xmpp_core::stanza::Stanza;
use waddle_xmpp_core::{Entity, ServerRuntimeContext};

/// Everything the fake network saw.
#[derive(Default)]
struct Wire {
    attempts: Mutex<Vec<String>>,
    written: Mutex<Vec<Stanza>>,
}

struct WireConnector {
    remote: Entity,
    wire: Arc<Wire>,
}

impl S2sConnector for WireConnector {
    fn remote(&self) -> &Entity {
        &self.remote
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn write(&self, stanza: &Stanza) -> Result<(), ConnectorError> {
        self.wire.written.lock().unwrap().push(stanza.clone());
        Ok(())
    }

    fn close(&self) {}
}

struct WirePending {
    host: String,
    wire: Arc<Wire>,
}

#[async_trait]
impl PendingConnection for WirePending {
    async fn handshake(
        self: Box<Self>,
        _local: &Entity,
        remote: &Entity,
        _purpose: ConnectPurpose,
    ) -> Result<Arc<dyn S2sConnector>, ConnectorError> {
        if self.host.starts_with("stall") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Arc::new(WireConnector {
            remote: remote.clone(),
            wire: self.wire,
        }))
    }
}

/// Hosts starting with `dead` refuse connections, `slow` never answer the
/// connect and `stall` never finish the handshake.
struct WireFactory(Arc<Wire>);

#[async_trait]
impl ConnectorFactory for WireFactory {
    async fn open(
        &self,
        target: &ResolvedTarget,
        _remote: &Entity,
    ) -> Result<Box<dyn PendingConnection>, ConnectorError> {
        self.0.attempts.lock().unwrap().push(target.host.clone());
        if target.host.starts_with("dead") {
            return Err(ConnectorError::connect(target, "connection refused"));
        }
        if target.host.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Box::new(WirePending {
            host: target.host.clone(),
            wire: Arc::clone(&self.0),
        }))
    }
}

fn s2s_config() -> S2sConfig {
    S2sConfig {
        enabled: true,
        connect_timeout_ms: 200,
        handshake_timeout_ms: 500,
        dialback_secret: Some("s3cr3t".to_string()),
    }
}

fn registry(hosts: &[&str]) -> (S2sConnectorRegistry, Arc<Wire>) {
    let targets = hosts
        .iter()
        .enumerate()
        .map(|(i, host)| ResolvedTarget::new(*host, 5269, i as u16 * 10, 0))
        .collect();
    let resolver = StaticTargetResolver::new().with_targets("remote.example", targets);
    let wire = Arc::new(Wire::default());
    let registry = S2sConnectorRegistry::new(
        Entity::domain_only(common::DOMAIN),
        &s2s_config(),
        Arc::new(resolver),
        Arc::new(WireFactory(Arc::clone(&wire))),
    );
    (registry, wire)
}

#[tokio::test]
async fn test_fails_over_to_next_candidate() {
    let (registry, wire) = registry(&["dead.remote.example", "xmpp.remote.example"]);

    let connector = assert_ok!(registry.connect(&entity("remote.example")).await);
    assert_eq!(connector.remote(), &entity("remote.example"));
    assert_eq!(
        *wire.attempts.lock().unwrap(),
        ["dead.remote.example", "xmpp.remote.example"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_moves_on() {
    let (registry, wire) = registry(&["slow.remote.example", "xmpp.remote.example"]);

    assert_ok!(registry.connect(&entity("remote.example")).await);
    assert_eq!(wire.attempts.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_when_every_candidate_fails() {
    let (registry, wire) = registry(&["dead.remote.example", "stall.remote.example"]);

    let error = assert_err!(registry.connect(&entity("remote.example")).await.map(|_| ()));
    assert!(matches!(error, ConnectorError::Unreachable(domain) if domain == "remote.example"));
    assert_eq!(wire.attempts.lock().unwrap().len(), 2);
    assert!(registry.get(&entity("remote.example")).is_none());
}

#[tokio::test]
async fn test_foreign_stanzas_leave_through_connector() {
    let (registry, wire) = registry(&["xmpp.remote.example"]);
    let mut config = common::config();
    config.s2s = s2s_config();
    let runtime = common::build(ServerRuntimeContext::builder(config).connectors(Arc::new(registry)));
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();

    worker.process_stanza(
        &client.session,
        parse(r#"<message xmlns="jabber:client" to="alice@remote.example"><body>hello</body></message>"#),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while wire.written.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stanza reached the connector");

    let written = wire.written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].namespace_uri(), ns::JABBER_SERVER);
    let expected_from = format!("user@example.com/{resource}");
    assert_eq!(written[0].attribute("from"), Some(expected_from.as_str()));
    assert_eq!(written[0].attribute("to"), Some("alice@remote.example"));
}

fn federating_runtime(
    hosts: &[&str],
) -> (Arc<ServerRuntimeContext>, Arc<ReceiverStanzaRelay>) {
    let (registry, _wire) = registry(hosts);
    let local = Arc::new(ReceiverStanzaRelay::new());
    let mut config = common::config();
    config.s2s = s2s_config();
    let runtime = common::build(
        ServerRuntimeContext::builder(config)
            .relay(local.clone())
            .connectors(Arc::new(registry)),
    );
    (runtime, local)
}

const TO_REMOTE: &str =
    r#"<message xmlns="jabber:client" to="alice@remote.example"><body>hello</body></message>"#;

#[test]
fn test_bounce_without_async_runtime() {
    let (runtime, local) = federating_runtime(&["xmpp.remote.example"]);
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();
    let inbox = Arc::new(StanzaReceiverQueue::new());
    local.add(entity(&format!("user@example.com/{resource}")), inbox.clone());

    worker.process_stanza(&client.session, parse(TO_REMOTE));

    let bounce = inbox.next().expect("bounce delivered to sender");
    assert_eq!(stanza_error_condition(&bounce).as_deref(), Some("service-unavailable"));
    assert_eq!(bounce.attribute("from"), Some("remote.example"));
}

#[tokio::test(start_paused = true)]
async fn test_bounce_when_remote_unreachable() {
    let (runtime, local) = federating_runtime(&["dead.remote.example"]);
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();
    let inbox = Arc::new(StanzaReceiverQueue::new());
    local.add(entity(&format!("user@example.com/{resource}")), inbox.clone());

    worker.process_stanza(&client.session, parse(TO_REMOTE));
    assert!(inbox.is_empty());

    tokio::time::timeout(Duration::from_secs(5), async {
        while inbox.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bounce delivered to sender");

    let bounce = inbox.next().expect("bounce");
    assert_eq!(stanza_error_condition(&bounce).as_deref(), Some("service-unavailable"));
}
