//! Stanza delivery collaborators.
//!
//! The protocol core never routes stanzas itself. Handlers hand them to a
//! [`StanzaRelay`] together with a [`DeliveryFailureStrategy`] that decides
//! what happens when the receiver cannot be reached.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::addressing::Entity;
use crate::error::{DeliveryError, StanzaErrorCondition, StanzaErrorType};
use crate::response;
use crate::session::SessionContext;
use crate::stanza::{CoreStanza, PresenceType, Stanza, StanzaBuilder};

/// Routes a stanza towards its receiver, locally or to a remote server.
pub trait StanzaRelay: Send + Sync {
    /// Deliver `stanza` to `receiver`. `session` is the session the stanza
    /// originated from, if any.
    fn relay(
        &self,
        session: Option<&SessionContext>,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError>;
}

/// Reaction to a stanza that could not be delivered.
pub trait DeliveryFailureStrategy: Send + Sync + fmt::Debug {
    fn process(&self, failed: &Stanza, error: Option<&DeliveryError>) -> Result<(), DeliveryError>;
}

/// Drops undeliverable stanzas.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreFailureStrategy;

impl IgnoreFailureStrategy {
    pub fn shared() -> Arc<dyn DeliveryFailureStrategy> {
        Arc::new(Self)
    }
}

impl DeliveryFailureStrategy for IgnoreFailureStrategy {
    fn process(&self, failed: &Stanza, error: Option<&DeliveryError>) -> Result<(), DeliveryError> {
        debug!(
            stanza = %failed.dense(),
            error = ?error,
            "Ignoring undeliverable stanza"
        );
        Ok(())
    }
}

/// Bounces undeliverable stanzas to their sender (RFC 3921bis 8.1).
///
/// Messages and IQs to an offline or unknown user get
/// `service-unavailable`. Presence to an unknown user is mostly dropped,
/// except `subscribe`, which is answered with `unsubscribed`.
pub struct ReturnErrorToSenderFailureStrategy {
    relay: Arc<dyn StanzaRelay>,
}

impl fmt::Debug for ReturnErrorToSenderFailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnErrorToSenderFailureStrategy").finish()
    }
}

impl ReturnErrorToSenderFailureStrategy {
    pub fn new(relay: Arc<dyn StanzaRelay>) -> Self {
        Self { relay }
    }
}

impl DeliveryFailureStrategy for ReturnErrorToSenderFailureStrategy {
    fn process(&self, failed: &Stanza, error: Option<&DeliveryError>) -> Result<(), DeliveryError> {
        let Some(core) = CoreStanza::wrap(failed) else {
            return Err(DeliveryError::failed("could not return to sender"));
        };
        if core.is_error() {
            return Ok(());
        }

        let mut condition = StanzaErrorCondition::ServiceUnavailable;
        match (error, &core) {
            (Some(DeliveryError::LocalRecipientOffline(_)), CoreStanza::Presence(_)) => {
                condition = StanzaErrorCondition::RecipientUnavailable;
            }
            (Some(DeliveryError::NoSuchLocalUser(_)), CoreStanza::Presence(presence)) => {
                match presence.presence_type() {
                    Some(PresenceType::Subscribe) => return self.refuse_subscription(failed),
                    Some(PresenceType::Probe) => {}
                    _ => return Ok(()),
                }
            }
            _ => {}
        }

        let bounce = response::stanza_error(
            condition,
            failed,
            StanzaErrorType::Cancel,
            Some("stanza could not be delivered"),
            Some("en"),
            None,
        )
        .map_err(|e| DeliveryError::failed(e.to_string()))?;

        let receiver = bounce
            .to()
            .ok()
            .flatten()
            .ok_or_else(|| DeliveryError::failed("undeliverable stanza has no sender"))?;
        self.relay
            .relay(None, &receiver, bounce, IgnoreFailureStrategy::shared())
    }
}

impl ReturnErrorToSenderFailureStrategy {
    fn refuse_subscription(&self, failed: &Stanza) -> Result<(), DeliveryError> {
        let from = failed.to().ok().flatten();
        let Some(to) = failed.from().ok().flatten() else {
            return Err(DeliveryError::failed("subscription request has no sender"));
        };
        let refusal = StanzaBuilder::presence(PresenceType::Unsubscribed, from.as_ref(), Some(&to))
            .and_then(|mut builder| builder.build())
            .map_err(|e| DeliveryError::failed(e.to_string()))?;
        self.relay
            .relay(None, &to, refusal, IgnoreFailureStrategy::shared())
    }
}

/// Takes stanzas for receivers without a live session.
pub trait OfflineStanzaReceiver: Send + Sync {
    fn receive(&self, stanza: Stanza);
}

/// Accepts delivered stanzas for one receiver.
pub trait StanzaReceiver: Send + Sync {
    fn deliver(&self, stanza: Stanza);
}

/// In-memory FIFO usable as a receiver or offline store.
#[derive(Debug, Default)]
pub struct StanzaReceiverQueue {
    queue: Mutex<VecDeque<Stanza>>,
}

impl StanzaReceiverQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest queued stanza.
    pub fn next(&self) -> Option<Stanza> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, stanza: Stanza) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(stanza);
    }
}

impl StanzaReceiver for StanzaReceiverQueue {
    fn deliver(&self, stanza: Stanza) {
        self.push(stanza);
    }
}

impl OfflineStanzaReceiver for StanzaReceiverQueue {
    fn receive(&self, stanza: Stanza) {
        self.push(stanza);
    }
}

/// Relay delivering to receivers registered per address.
///
/// A full address matches exactly. A bare address matches its own entry,
/// or else every registered resource of that bare address.
pub struct ReceiverStanzaRelay {
    receivers: DashMap<Entity, Arc<dyn StanzaReceiver>>,
}

impl ReceiverStanzaRelay {
    pub fn new() -> Self {
        info!("Creating receiver stanza relay");
        Self {
            receivers: DashMap::new(),
        }
    }

    pub fn add(&self, entity: Entity, receiver: Arc<dyn StanzaReceiver>) {
        debug!(entity = %entity, "Registered stanza receiver");
        self.receivers.insert(entity, receiver);
    }

    pub fn remove(&self, entity: &Entity) -> bool {
        self.receivers.remove(entity).is_some()
    }

    fn receivers_for(&self, receiver: &Entity) -> Vec<Arc<dyn StanzaReceiver>> {
        if let Some(exact) = self.receivers.get(receiver) {
            return vec![Arc::clone(exact.value())];
        }
        if !receiver.is_bare() {
            return Vec::new();
        }
        self.receivers
            .iter()
            .filter(|entry| entry.key().bare() == *receiver)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl Default for ReceiverStanzaRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StanzaRelay for ReceiverStanzaRelay {
    fn relay(
        &self,
        _session: Option<&SessionContext>,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError> {
        let targets = self.receivers_for(receiver);
        if targets.is_empty() {
            let error = DeliveryError::LocalRecipientOffline(receiver.full_qualified_name());
            if let Err(e) = strategy.process(&stanza, Some(&error)) {
                warn!(error = %e, "Delivery failure strategy failed");
            }
            return Err(error);
        }
        for target in targets {
            target.deliver(stanza.clone());
        }
        Ok(())
    }
}

/// A stanza captured by [`RecordingStanzaRelay`].
#[derive(Debug, Clone)]
pub struct RelayedStanza {
    pub receiver: Entity,
    pub stanza: Stanza,
    pub strategy: Arc<dyn DeliveryFailureStrategy>,
}

/// Relay that only records what it was asked to deliver.
#[derive(Debug)]
pub struct RecordingStanzaRelay {
    relayed: Mutex<Vec<RelayedStanza>>,
    relaying: AtomicBool,
}

impl RecordingStanzaRelay {
    pub fn new() -> Self {
        Self {
            relayed: Mutex::new(Vec::new()),
            relaying: AtomicBool::new(true),
        }
    }

    pub fn relayed(&self) -> Vec<RelayedStanza> {
        self.relayed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reset(&self) {
        self.relayed.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Stop accepting stanzas; further relays fail.
    pub fn set_relaying(&self, relaying: bool) {
        self.relaying.store(relaying, Ordering::SeqCst);
    }
}

impl Default for RecordingStanzaRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StanzaRelay for RecordingStanzaRelay {
    fn relay(
        &self,
        _session: Option<&SessionContext>,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError> {
        if !self.relaying.load(Ordering::SeqCst) {
            return Err(DeliveryError::failed("recording stanza relay is not relaying"));
        }
        self.relayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RelayedStanza {
                receiver: receiver.clone(),
                stanza,
                strategy,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns;
    use crate::xml::Element;

    fn parse(xml: &str) -> Stanza {
        Stanza::new(Element::parse_str(xml).unwrap())
    }

    fn bounce(stanza: &Stanza, error: DeliveryError) -> Vec<RelayedStanza> {
        let relay = Arc::new(RecordingStanzaRelay::new());
        let strategy = ReturnErrorToSenderFailureStrategy::new(relay.clone());
        let _ = strategy.process(stanza, Some(&error));
        relay.relayed()
    }

    #[test]
    fn test_message_to_offline_user_bounces_service_unavailable() {
        let message = parse(
            r#"<message xmlns='jabber:client' from='romeo@montague.lit/orchard' to='juliet@capulet.lit' id='m1'><body>hi</body></message>"#,
        );
        let relayed = bounce(&message, DeliveryError::LocalRecipientOffline("juliet".into()));
        assert_eq!(relayed.len(), 1);

        let error = &relayed[0].stanza;
        assert_eq!(relayed[0].receiver.full_qualified_name(), "romeo@montague.lit/orchard");
        assert_eq!(error.stanza_type(), Some("error"));
        assert_eq!(error.attribute("from"), Some("capulet.lit"));
        let condition = error.first_inner_element("error").unwrap();
        assert_eq!(condition.attribute("type"), Some("cancel"));
        assert!(condition.first_inner_element("service-unavailable").is_some());
        assert_eq!(
            condition.first_inner_element("text").unwrap().text(),
            "stanza could not be delivered"
        );
        assert!(error.first_inner_element("body").is_some());
    }

    #[test]
    fn test_presence_to_offline_user_bounces_recipient_unavailable() {
        let presence = parse(
            r#"<presence xmlns='jabber:client' from='romeo@montague.lit/orchard' to='juliet@capulet.lit' type='probe'/>"#,
        );
        let relayed = bounce(&presence, DeliveryError::LocalRecipientOffline("juliet".into()));
        let error = relayed[0].stanza.first_inner_element("error").unwrap();
        assert!(error.first_inner_element("recipient-unavailable").is_some());
    }

    #[test]
    fn test_presence_to_unknown_user_mostly_ignored() {
        for kind in ["unavailable", "subscribed", "unsubscribe", "unsubscribed", "error"] {
            let presence = parse(&format!(
                "<presence xmlns='jabber:client' from='a@b/c' to='x@y' type='{kind}'/>"
            ));
            assert!(bounce(&presence, DeliveryError::NoSuchLocalUser("x@y".into())).is_empty());
        }
        let available = parse("<presence xmlns='jabber:client' from='a@b/c' to='x@y'/>");
        assert!(bounce(&available, DeliveryError::NoSuchLocalUser("x@y".into())).is_empty());
    }

    #[test]
    fn test_subscribe_to_unknown_user_is_refused() {
        let subscribe = parse(
            "<presence xmlns='jabber:client' from='romeo@montague.lit' to='nobody@capulet.lit' type='subscribe'/>",
        );
        let relayed = bounce(&subscribe, DeliveryError::NoSuchLocalUser("nobody".into()));
        assert_eq!(relayed.len(), 1);
        let refusal = &relayed[0].stanza;
        assert_eq!(refusal.stanza_type(), Some("unsubscribed"));
        assert_eq!(refusal.attribute("from"), Some("nobody@capulet.lit"));
        assert_eq!(refusal.attribute("to"), Some("romeo@montague.lit"));
    }

    #[test]
    fn test_error_stanzas_never_bounce() {
        let error = parse("<message xmlns='jabber:client' from='a@b' to='c@d' type='error'/>");
        assert!(bounce(&error, DeliveryError::LocalRecipientOffline("c@d".into())).is_empty());
    }

    #[test]
    fn test_non_core_stanza_cannot_bounce() {
        let relay = Arc::new(RecordingStanzaRelay::new());
        let strategy = ReturnErrorToSenderFailureStrategy::new(relay);
        let stanza = Stanza::new(Element::empty("starttls", ns::TLS).unwrap());
        assert!(strategy.process(&stanza, None).is_err());
    }

    #[test]
    fn test_receiver_relay_delivers_to_bare_and_full() {
        let relay = ReceiverStanzaRelay::new();
        let desktop = Arc::new(StanzaReceiverQueue::new());
        let phone = Arc::new(StanzaReceiverQueue::new());
        relay.add(Entity::parse("juliet@capulet.lit/desktop").unwrap(), desktop.clone());
        relay.add(Entity::parse("juliet@capulet.lit/phone").unwrap(), phone.clone());

        let message = parse("<message xmlns='jabber:client' to='juliet@capulet.lit'/>");
        relay
            .relay(
                None,
                &Entity::parse("juliet@capulet.lit").unwrap(),
                message.clone(),
                IgnoreFailureStrategy::shared(),
            )
            .unwrap();
        assert_eq!(desktop.len(), 1);
        assert_eq!(phone.len(), 1);

        relay
            .relay(
                None,
                &Entity::parse("juliet@capulet.lit/phone").unwrap(),
                message,
                IgnoreFailureStrategy::shared(),
            )
            .unwrap();
        assert_eq!(desktop.len(), 1);
        assert_eq!(phone.len(), 2);
    }

    #[test]
    fn test_receiver_relay_offline_runs_strategy() {
        let relay = ReceiverStanzaRelay::new();
        let bounces = Arc::new(RecordingStanzaRelay::new());
        let strategy: Arc<dyn DeliveryFailureStrategy> =
            Arc::new(ReturnErrorToSenderFailureStrategy::new(bounces.clone()));

        let message = parse(
            "<message xmlns='jabber:client' from='romeo@montague.lit/orchard' to='juliet@capulet.lit'/>",
        );
        let result = relay.relay(
            None,
            &Entity::parse("juliet@capulet.lit").unwrap(),
            message,
            strategy,
        );
        assert!(matches!(result, Err(DeliveryError::LocalRecipientOffline(_))));
        assert_eq!(bounces.relayed().len(), 1);
    }

    #[test]
    fn test_recording_relay_stops() {
        let relay = RecordingStanzaRelay::new();
        relay.set_relaying(false);
        let result = relay.relay(
            None,
            &Entity::domain_only("x"),
            parse("<message xmlns='jabber:client'/>"),
            IgnoreFailureStrategy::shared(),
        );
        assert!(result.is_err());
        assert!(relay.relayed().is_empty());
    }
}
