//! Where handler output goes.
//!
//! Handlers never write to sockets or routers directly. They get a
//! [`StanzaBroker`] for the stanza being processed, which interceptors may
//! wrap or replace before the handler runs.

use std::sync::Arc;

use tracing::debug;

use crate::addressing::Entity;
use crate::delivery::{DeliveryFailureStrategy, OfflineStanzaReceiver, StanzaRelay};
use crate::error::DeliveryError;
use crate::session::SessionContext;
use crate::stanza::Stanza;

/// Delivery capability handed to a handler.
pub trait StanzaBroker: Send + Sync {
    /// Relay `stanza` to `receiver`.
    fn write(
        &self,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError>;

    /// Answer on the session the stanza came from.
    fn write_to_session(&self, stanza: Stanza);
}

/// Broker bound to one session, the server relay and an optional offline
/// receiver.
pub struct DefaultStanzaBroker<'a> {
    relay: &'a Arc<dyn StanzaRelay>,
    session: Option<&'a SessionContext>,
    offline: Option<&'a Arc<dyn OfflineStanzaReceiver>>,
}

impl<'a> DefaultStanzaBroker<'a> {
    pub fn new(
        relay: &'a Arc<dyn StanzaRelay>,
        session: Option<&'a SessionContext>,
        offline: Option<&'a Arc<dyn OfflineStanzaReceiver>>,
    ) -> Self {
        Self {
            relay,
            session,
            offline,
        }
    }
}

impl StanzaBroker for DefaultStanzaBroker<'_> {
    fn write(
        &self,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError> {
        self.relay.relay(self.session, receiver, stanza, strategy)
    }

    fn write_to_session(&self, stanza: Stanza) {
        if let Some(session) = self.session {
            session.write(&stanza);
        } else if let Some(offline) = self.offline {
            offline.receive(stanza);
        } else {
            debug!(stanza = %stanza.dense(), "No session to write to, dropping stanza");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{IgnoreFailureStrategy, RecordingStanzaRelay, StanzaReceiverQueue};
    use crate::resources::ResourceRegistry;
    use crate::session::{RecordingStanzaWriter, SessionRole};
    use crate::stanza::{MessageType, StanzaBuilder};

    fn message() -> Stanza {
        StanzaBuilder::message(MessageType::Chat, None, None, Some("hi"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_goes_to_relay() {
        let recording = Arc::new(RecordingStanzaRelay::new());
        let relay: Arc<dyn StanzaRelay> = recording.clone();
        let broker = DefaultStanzaBroker::new(&relay, None, None);

        let to = Entity::parse("bob@example.com").unwrap();
        broker
            .write(&to, message(), IgnoreFailureStrategy::shared())
            .unwrap();
        assert_eq!(recording.relayed().len(), 1);
        assert_eq!(recording.relayed()[0].receiver, to);
    }

    #[test]
    fn test_write_to_session_prefers_session() {
        let relay: Arc<dyn StanzaRelay> = Arc::new(RecordingStanzaRelay::new());
        let writer = Arc::new(RecordingStanzaWriter::new());
        let session = SessionContext::new(
            Entity::domain_only("example.com"),
            SessionRole::ClientToServer,
            writer.clone(),
            Arc::new(ResourceRegistry::new()),
        );
        let queue = Arc::new(StanzaReceiverQueue::new());
        let offline: Arc<dyn OfflineStanzaReceiver> = queue.clone();

        DefaultStanzaBroker::new(&relay, Some(&session), Some(&offline)).write_to_session(message());
        assert_eq!(writer.stanzas().len(), 1);
        assert!(queue.is_empty());

        DefaultStanzaBroker::new(&relay, None, Some(&offline)).write_to_session(message());
        assert_eq!(queue.len(), 1);

        DefaultStanzaBroker::new(&relay, None, None).write_to_session(message());
        assert_eq!(queue.len(), 1);
    }
}
