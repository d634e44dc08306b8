//! Shared fixtures for the protocol core integration tests.
//!
//! Provides a runtime for `example.com`, sessions backed by a recording
//! writer and helpers to inspect the errors a session was sent.

#![allow(dead_code)]

use std::sync::Arc;

use waddle_xmpp_core::config::CoreConfig;
use waddle_xmpp_core::ns;
use waddle_xmpp_core::protocol::{ProtocolWorker, SessionState};
use waddle_xmpp_core::runtime::{ServerRuntimeBuilder, ServerRuntimeContext};
use waddle_xmpp_core::session::{RecordingStanzaWriter, SessionContext, SessionRole};
use waddle_xmpp_core::stanza::{Stanza, StanzaBuilder};
use waddle_xmpp_core::xml::Element;
use waddle_xmpp_core::Entity;

/// Domain served by the test runtime.
pub const DOMAIN: &str = "example.com";

/// Install a test-friendly subscriber once. Respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> CoreConfig {
    CoreConfig::default().with_domain(DOMAIN)
}

pub fn builder() -> ServerRuntimeBuilder {
    ServerRuntimeContext::builder(config())
}

pub fn runtime() -> Arc<ServerRuntimeContext> {
    build(builder())
}

pub fn build(builder: ServerRuntimeBuilder) -> Arc<ServerRuntimeContext> {
    init_tracing();
    Arc::new(builder.build().expect("runtime should build"))
}

pub fn worker(runtime: &Arc<ServerRuntimeContext>) -> ProtocolWorker {
    ProtocolWorker::new(Arc::clone(runtime))
}

/// A session together with the writer it records to.
pub struct TestSession {
    pub session: Arc<SessionContext>,
    pub writer: Arc<RecordingStanzaWriter>,
}

impl TestSession {
    pub fn new(runtime: &ServerRuntimeContext, role: SessionRole) -> Self {
        let writer = Arc::new(RecordingStanzaWriter::new());
        let session = runtime.new_session(role, writer.clone());
        Self { session, writer }
    }

    pub fn client(runtime: &ServerRuntimeContext) -> Self {
        Self::new(runtime, SessionRole::ClientToServer)
    }

    pub fn server(runtime: &ServerRuntimeContext) -> Self {
        Self::new(runtime, SessionRole::ServerToServer)
    }

    /// Move the session forward to `state`.
    pub fn at(self, state: SessionState) -> Self {
        self.session
            .state_holder()
            .transition(state)
            .expect("forward transition");
        self
    }

    /// Authenticate as `jid` without binding a resource.
    pub fn authenticated_as(self, jid: &str) -> Self {
        self.session.set_initiating_entity(entity(jid));
        self.at(SessionState::Authenticated)
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn last(&self) -> Stanza {
        self.writer.last().expect("a stanza was written")
    }
}

pub fn entity(jid: &str) -> Entity {
    Entity::parse(jid).expect("valid jid")
}

pub fn parse(xml: &str) -> Stanza {
    Stanza::new(Element::parse_str(xml).expect("well-formed xml"))
}

/// A peer's `<stream:stream>` header declaring the content namespace of
/// `role`.
pub fn stream_header(role: SessionRole, from: Option<&str>, to: Option<&str>, version: Option<&str>) -> Stanza {
    let mut builder = StanzaBuilder::with_prefix("stream", ns::STREAM, "stream").unwrap();
    builder.declare_namespace("", role.namespace()).unwrap();
    if let Some(from) = from {
        builder.add_attribute("from", from).unwrap();
    }
    if let Some(to) = to {
        builder.add_attribute("to", to).unwrap();
    }
    if let Some(version) = version {
        builder.add_attribute("version", version).unwrap();
    }
    builder.build().unwrap()
}

/// Condition of a stream error, also when it is wrapped in a stream
/// header.
pub fn stream_error_condition(stanza: &Stanza) -> Option<String> {
    let error = if stanza.is("error", ns::STREAM) {
        Some(stanza.element())
    } else if stanza.is("stream", ns::STREAM) {
        stanza.inner_elements().find(|e| e.is("error", ns::STREAM))
    } else {
        None
    }?;
    error
        .inner_elements()
        .find(|e| e.namespace_uri() == ns::STREAMS && e.name() != "text")
        .map(|e| e.name().to_string())
}

/// Condition of a stanza error reply.
pub fn stanza_error_condition(stanza: &Stanza) -> Option<String> {
    if stanza.stanza_type() != Some("error") {
        return None;
    }
    stanza
        .inner_elements()
        .find(|e| e.name() == "error")?
        .inner_elements()
        .find(|e| e.namespace_uri() == ns::STANZAS && e.name() != "text")
        .map(|e| e.name().to_string())
}

/// Text of a stanza error reply.
pub fn stanza_error_text(stanza: &Stanza) -> Option<String> {
    stanza
        .inner_elements()
        .find(|e| e.name() == "error")?
        .inner_elements()
        .find(|e| e.is("text", ns::STANZAS))
        .map(Element::text)
}
