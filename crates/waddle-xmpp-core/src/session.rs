//! Per-connection session context and output sinks.
//!
//! A [`SessionContext`] is created by the transport for every accepted (or
//! initiated) connection. It owns the session's state holder and the
//! [`StanzaWriter`] used to send data back over the wire.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::addressing::Entity;
use crate::ns;
use crate::protocol::{SessionState, SessionStateHolder};
use crate::resources::ResourceRegistry;
use crate::stanza::Stanza;
use crate::xml::render;

/// Which kind of peer is on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// A client connection (`jabber:client`)
    ClientToServer,
    /// A federated server connection (`jabber:server`)
    ServerToServer,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToServer => "c2s",
            Self::ServerToServer => "s2s",
        }
    }

    /// Default stream namespace for this role.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::ClientToServer => ns::JABBER_CLIENT,
            Self::ServerToServer => ns::JABBER_SERVER,
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTerminationCause {
    /// The peer closed its stream
    ClientBye,
    /// The server is shutting down
    ServerShutdown,
    /// A stream error was sent
    StreamError,
    /// The transport went away
    ConnectionAbort,
}

impl fmt::Display for SessionTerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientBye => write!(f, "client_bye"),
            Self::ServerShutdown => write!(f, "server_shutdown"),
            Self::StreamError => write!(f, "stream_error"),
            Self::ConnectionAbort => write!(f, "connection_abort"),
        }
    }
}

/// Output side of a session.
pub trait StanzaWriter: Send + Sync {
    /// Send one stanza. Stream openers are sent without their closing tag.
    fn write(&self, stanza: &Stanza);

    /// Close the stream and the underlying transport.
    fn close(&self);

    /// Called after `<proceed/>` was written; the transport starts the TLS
    /// handshake and reports back through the protocol worker.
    fn start_tls(&self) {}
}

fn is_stream_opener(stanza: &Stanza) -> bool {
    stanza.is("stream", ns::STREAM)
}

/// Writer that keeps everything in memory. Used by tests and by tooling
/// that inspects responses.
#[derive(Debug, Default)]
pub struct RecordingStanzaWriter {
    written: Mutex<Vec<Stanza>>,
    closed: AtomicBool,
    tls_started: AtomicBool,
}

impl RecordingStanzaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn stanzas(&self) -> Vec<Stanza> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain everything written so far.
    pub fn take(&self) -> Vec<Stanza> {
        std::mem::take(&mut *self.written.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Most recently written stanza.
    pub fn last(&self) -> Option<Stanza> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_tls_started(&self) -> bool {
        self.tls_started.load(Ordering::SeqCst)
    }
}

impl StanzaWriter for RecordingStanzaWriter {
    fn write(&self, stanza: &Stanza) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stanza.clone());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn start_tls(&self) {
        self.tls_started.store(true, Ordering::SeqCst);
    }
}

/// Writer rendering stanzas to XML text and queueing them on a tokio
/// channel drained by the transport task.
#[derive(Debug)]
pub struct ChannelStanzaWriter {
    sender: mpsc::Sender<String>,
    closed: AtomicBool,
}

impl ChannelStanzaWriter {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    fn send(&self, xml: String) {
        match self.sender.try_send(xml) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound channel full, dropping output");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound channel closed, connection may have dropped");
            }
        }
    }
}

impl StanzaWriter for ChannelStanzaWriter {
    fn write(&self, stanza: &Stanza) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(stanza = %stanza.dense(), "Writer closed, dropping stanza");
            return;
        }
        match render(stanza.element()) {
            Ok(rendered) if is_stream_opener(stanza) => {
                self.send(format!("{}{}", rendered.opening, rendered.content));
            }
            Ok(rendered) => self.send(rendered.complete()),
            Err(e) => error!(error = %e, stanza = %stanza.dense(), "Failed to render stanza"),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.send("</stream:stream>".to_string());
        }
    }
}

/// State shared by everything acting on behalf of one connection.
pub struct SessionContext {
    id: Uuid,
    server_entity: Entity,
    role: RwLock<SessionRole>,
    initiating_entity: RwLock<Option<Entity>>,
    xml_lang: RwLock<Option<String>>,
    reopening: AtomicBool,
    state: Arc<SessionStateHolder>,
    writer: Arc<dyn StanzaWriter>,
    resources: Arc<ResourceRegistry>,
    dialback_origin: Mutex<Option<Weak<SessionContext>>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("role", &self.role())
            .field("state", &self.state())
            .field("initiating_entity", &self.initiating_entity())
            .finish()
    }
}

impl SessionContext {
    /// Create a session in [`SessionState::Initiated`].
    pub fn new(
        server_entity: Entity,
        role: SessionRole,
        writer: Arc<dyn StanzaWriter>,
        resources: Arc<ResourceRegistry>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, role = %role, "Created session");
        Self {
            id,
            server_entity,
            role: RwLock::new(role),
            initiating_entity: RwLock::new(None),
            xml_lang: RwLock::new(None),
            reopening: AtomicBool::new(false),
            state: Arc::new(SessionStateHolder::default()),
            writer,
            resources,
            dialback_origin: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Session id as sent in the stream header.
    pub fn session_id(&self) -> String {
        self.id.simple().to_string()
    }

    /// The local server's address.
    pub fn server_entity(&self) -> &Entity {
        &self.server_entity
    }

    pub fn role(&self) -> SessionRole {
        *self.role.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_role(&self, role: SessionRole) {
        *self.role.write().unwrap_or_else(|e| e.into_inner()) = role;
    }

    pub fn is_server_to_server(&self) -> bool {
        self.role() == SessionRole::ServerToServer
    }

    /// The authenticated peer: a bare client address or a remote domain.
    pub fn initiating_entity(&self) -> Option<Entity> {
        self.initiating_entity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_initiating_entity(&self, entity: Entity) {
        *self
            .initiating_entity
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(entity);
    }

    pub fn xml_lang(&self) -> Option<String> {
        self.xml_lang.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_xml_lang(&self, lang: Option<String>) {
        *self.xml_lang.write().unwrap_or_else(|e| e.into_inner()) = lang;
    }

    /// Whether the peer is expected to send a fresh stream header.
    pub fn is_reopening_stream(&self) -> bool {
        self.reopening.load(Ordering::SeqCst)
    }

    pub fn set_reopening_stream(&self, reopening: bool) {
        self.reopening.store(reopening, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn state_holder(&self) -> &Arc<SessionStateHolder> {
        &self.state
    }

    pub fn writer(&self) -> &Arc<dyn StanzaWriter> {
        &self.writer
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Bind a new resource for the initiating entity.
    pub fn bind_resource(&self) -> Option<String> {
        let entity = self.initiating_entity()?;
        Some(self.resources.bind_session(self.id, &entity))
    }

    /// The resource to use for a stanza without one, if unambiguous.
    pub fn unique_resource(&self) -> Option<String> {
        self.resources.unique_resource_for_session(self.id)
    }

    /// Write straight to this session's output.
    pub fn write(&self, stanza: &Stanza) {
        self.writer.write(stanza);
    }

    /// Remember the session waiting for a dialback verification answered
    /// through this one.
    pub fn set_dialback_origin(&self, origin: &Arc<SessionContext>) {
        *self
            .dialback_origin
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(origin));
    }

    pub fn dialback_origin(&self) -> Option<Arc<SessionContext>> {
        self.dialback_origin
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Tear the session down: move to `Ended`, release bound resources,
    /// close the writer and finish in `Closed`. Calling it again is a no-op.
    pub fn end_session(&self, cause: SessionTerminationCause) {
        if !self.state().is_open() {
            return;
        }
        info!(session_id = %self.id, cause = %cause, "Ending session");

        if let Err(e) = self.state.transition(SessionState::Ended) {
            warn!(session_id = %self.id, error = %e, "Could not mark session ended");
        }
        self.resources.unbind_session(self.id);
        self.writer.close();
        if let Err(e) = self.state.transition(SessionState::Closed) {
            warn!(session_id = %self.id, error = %e, "Could not mark session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::StanzaBuilder;

    fn session(writer: Arc<dyn StanzaWriter>) -> SessionContext {
        SessionContext::new(
            Entity::domain_only("example.com"),
            SessionRole::ClientToServer,
            writer,
            Arc::new(ResourceRegistry::new()),
        )
    }

    #[test]
    fn test_new_session_is_initiated() {
        let session = session(Arc::new(RecordingStanzaWriter::new()));
        assert_eq!(session.state(), SessionState::Initiated);
        assert!(!session.is_server_to_server());
        assert!(session.initiating_entity().is_none());
        assert_eq!(session.session_id().len(), 32);
    }

    #[test]
    fn test_end_session_closes_and_unbinds() {
        let writer = Arc::new(RecordingStanzaWriter::new());
        let session = session(writer.clone());
        session.set_initiating_entity(Entity::parse("romeo@example.com").unwrap());
        let resource = session.bind_resource().unwrap();
        assert_eq!(session.unique_resource(), Some(resource));

        session.end_session(SessionTerminationCause::ClientBye);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(writer.is_closed());
        assert_eq!(session.unique_resource(), None);

        session.end_session(SessionTerminationCause::ClientBye);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_dialback_origin_is_weak() {
        let origin = Arc::new(session(Arc::new(RecordingStanzaWriter::new())));
        let verifier = session(Arc::new(RecordingStanzaWriter::new()));
        verifier.set_dialback_origin(&origin);
        assert_eq!(verifier.dialback_origin().unwrap().id(), origin.id());

        drop(origin);
        assert!(verifier.dialback_origin().is_none());
    }

    #[tokio::test]
    async fn test_channel_writer_renders() {
        let (tx, mut rx) = mpsc::channel(8);
        let writer = ChannelStanzaWriter::new(tx);

        let mut opener = StanzaBuilder::with_prefix("stream", ns::STREAM, "stream").unwrap();
        opener.declare_namespace("", ns::JABBER_CLIENT).unwrap();
        writer.write(&opener.build().unwrap());
        writer.write(
            &StanzaBuilder::new("proceed", ns::TLS)
                .unwrap()
                .build()
                .unwrap(),
        );
        writer.close();
        writer.close();

        assert_eq!(
            rx.recv().await.unwrap(),
            r#"<stream:stream xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams">"#
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            r#"<proceed xmlns="urn:ietf:params:xml:ns:xmpp-tls"></proceed>"#
        );
        assert_eq!(rx.recv().await.unwrap(), "</stream:stream>");
        assert!(rx.try_recv().is_err());
    }
}
