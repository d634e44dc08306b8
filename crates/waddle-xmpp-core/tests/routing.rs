//! IQ validation and relaying of messages, presence and IQs.

mod common;

use std::sync::{Arc, Mutex};

use common::{entity, parse, stanza_error_condition, stanza_error_text, TestSession, DOMAIN};
use waddle_xmpp_core::delivery::{RecordingStanzaRelay, ReceiverStanzaRelay, StanzaReceiverQueue};
use waddle_xmpp_core::error::HandlerError;
use waddle_xmpp_core::protocol::{
    Handler, HandlerContext, HandlerDictionary, StanzaBroker, StanzaHandler, StanzaProcessor,
};
use waddle_xmpp_core::runtime::SubscriptionLookup;
use waddle_xmpp_core::stanza::Stanza;
use waddle_xmpp_core::Entity;

/// Subscriptions are only held by `friend@example.com`.
struct OnlyFriend;

impl SubscriptionLookup for OnlyFriend {
    fn is_subscribed(&self, _user: &Entity, contact: &Entity) -> bool {
        contact.bare() == entity("friend@example.com")
    }
}

#[test]
fn test_iq_without_id() {
    let runtime = common::runtime();
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");

    worker.process_stanza(
        &client.session,
        parse(r#"<iq xmlns="jabber:client" type="get" to="friend@example.com"><query xmlns="jabber:iq:version"/></iq>"#),
    );

    let reply = client.last();
    assert_eq!(stanza_error_condition(&reply).as_deref(), Some("bad-request"));
    assert_eq!(
        stanza_error_text(&reply).as_deref(),
        Some("iq-stanza requires 'id' attribute to be present")
    );
}

#[test]
fn test_iq_child_count() {
    let runtime = common::runtime();
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");

    worker.process_stanza(
        &client.session,
        parse(&format!(
            r#"<iq xmlns="jabber:client" type="set" id="i1" to="{DOMAIN}"><a xmlns="urn:example"/><b xmlns="urn:example"/></iq>"#
        )),
    );
    assert_eq!(
        stanza_error_text(&client.last()).as_deref(),
        Some("iq stanza of type get or set require exactly one child")
    );

    worker.process_stanza(
        &client.session,
        parse(&format!(r#"<iq xmlns="jabber:client" type="bogus" id="i2" to="{DOMAIN}"/>"#)),
    );
    assert_eq!(
        stanza_error_text(&client.last()).as_deref(),
        Some("iq-stanza requires a valid 'type' attribute to be present")
    );

    worker.process_stanza(
        &client.session,
        parse(&format!(r#"<iq xmlns="jabber:client" type="result" id="i3" to="{DOMAIN}"/>"#)),
    );
    assert_eq!(
        stanza_error_condition(&client.last()).as_deref(),
        Some("feature-not-implemented")
    );
}

#[test]
fn test_iq_relayed_between_contacts() {
    let relay = Arc::new(RecordingStanzaRelay::new());
    let runtime = common::build(
        common::builder()
            .relay(relay.clone())
            .subscriptions(Arc::new(OnlyFriend)),
    );
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();

    worker.process_stanza(
        &client.session,
        parse(r#"<iq xmlns="jabber:client" type="get" id="v1" to="friend@example.com/phone"><query xmlns="jabber:iq:version"/></iq>"#),
    );
    let relayed = relay.relayed();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].receiver, entity("friend@example.com/phone"));
    let expected_from = format!("user@example.com/{resource}");
    assert_eq!(relayed[0].stanza.attribute("from"), Some(expected_from.as_str()));

    worker.process_stanza(
        &client.session,
        parse(r#"<iq xmlns="jabber:client" type="get" id="v2" to="stranger@example.com/pc"><query xmlns="jabber:iq:version"/></iq>"#),
    );
    assert_eq!(
        stanza_error_condition(&client.last()).as_deref(),
        Some("service-unavailable")
    );
    assert_eq!(relay.relayed().len(), 1);
}

#[test]
fn test_message_gets_full_sender() {
    let relay = Arc::new(RecordingStanzaRelay::new());
    let runtime = common::build(common::builder().relay(relay.clone()));
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();

    worker.process_stanza(
        &client.session,
        parse(r#"<message xmlns="jabber:client" type="chat" to="friend@example.com"><body>hi</body></message>"#),
    );
    worker.process_stanza(
        &client.session,
        parse(r#"<message xmlns="jabber:client"><body>note to self</body></message>"#),
    );

    let relayed = relay.relayed();
    assert_eq!(relayed.len(), 2);
    let expected_from = format!("user@example.com/{resource}");
    assert_eq!(relayed[0].stanza.attribute("from"), Some(expected_from.as_str()));
    assert_eq!(relayed[0].stanza.attribute("type"), Some("chat"));
    assert_eq!(relayed[1].receiver, entity("user@example.com"));
}

#[test]
fn test_presence_broadcast_goes_to_own_bare_address() {
    let relay = Arc::new(RecordingStanzaRelay::new());
    let runtime = common::build(common::builder().relay(relay.clone()));
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    client.session.bind_resource().unwrap();

    worker.process_stanza(&client.session, parse(r#"<presence xmlns="jabber:client"/>"#));
    worker.process_stanza(
        &client.session,
        parse(r#"<presence xmlns="jabber:client" type="subscribe" to="friend@example.com"/>"#),
    );

    let relayed = relay.relayed();
    assert_eq!(relayed.len(), 2);
    assert_eq!(relayed[0].receiver, entity("user@example.com"));
    assert_eq!(relayed[1].receiver, entity("friend@example.com"));
}

#[test]
fn test_undeliverable_message_bounces_to_sender() {
    let relay = Arc::new(ReceiverStanzaRelay::new());
    let runtime = common::build(common::builder().relay(relay.clone()));
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    let resource = client.session.bind_resource().unwrap();

    let inbox = Arc::new(StanzaReceiverQueue::new());
    relay.add(entity(&format!("user@example.com/{resource}")), inbox.clone());

    worker.process_stanza(
        &client.session,
        parse(r#"<message xmlns="jabber:client" to="nobody@example.com"><body>anyone?</body></message>"#),
    );

    let bounce = inbox.next().expect("bounce delivered to sender");
    assert_eq!(stanza_error_condition(&bounce).as_deref(), Some("service-unavailable"));
    assert_eq!(bounce.attribute("from"), Some(DOMAIN));
    assert!(inbox.is_empty());
    assert!(client.writer.stanzas().is_empty());
}

/// Component handler that keeps every message it is given.
#[derive(Clone, Default)]
struct RoomMessages(Arc<Mutex<Vec<Stanza>>>);

impl StanzaHandler for RoomMessages {
    fn name(&self) -> &str {
        "room-messages"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.name() == "message"
    }

    fn execute(
        &self,
        stanza: Stanza,
        _ctx: &HandlerContext<'_>,
        _broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push(stanza);
        Ok(())
    }
}

#[test]
fn test_component_subdomain_gets_its_stanzas() {
    let rooms = RoomMessages::default();
    let relay = Arc::new(RecordingStanzaRelay::new());
    let mut chat = HandlerDictionary::new("chat");
    chat.register(Handler::direct(rooms.clone())).unwrap();
    let runtime = common::build(
        common::builder()
            .relay(relay.clone())
            .add_component("chat.example.com", chat),
    );
    let worker = common::worker(&runtime);
    let client = TestSession::client(&runtime).authenticated_as("user@example.com");
    client.session.bind_resource().unwrap();

    worker.process_stanza(
        &client.session,
        parse(r#"<message xmlns="jabber:client" to="lobby@chat.example.com"><body>hi all</body></message>"#),
    );
    assert_eq!(rooms.0.lock().unwrap().len(), 1);
    assert!(relay.relayed().is_empty());

    worker.process_stanza(
        &client.session,
        parse(r#"<iq xmlns="jabber:client" type="get" id="v1" to="chat.example.com"><query xmlns="jabber:iq:version"/></iq>"#),
    );
    let reply = client.last();
    assert_eq!(stanza_error_condition(&reply).as_deref(), Some("service-unavailable"));
    assert_eq!(reply.attribute("from"), Some("chat.example.com"));
    assert!(relay.relayed().is_empty());
}
