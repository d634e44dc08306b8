//! Server-generated stanzas: stream headers, features and errors.
//!
//! Stream errors are `<stream:error>` elements carrying one condition in
//! `urn:ietf:params:xml:ns:xmpp-streams`. Stanza errors are replies of
//! `type="error"` that echo the offending stanza's children and append an
//! `<error/>` element (RFC 3920 9.3).

use crate::addressing::Entity;
use crate::config::CoreConfig;
use crate::error::{StanzaErrorCondition, StanzaErrorType, StreamErrorCondition, XmlError};
use crate::ns;
use crate::protocol::SessionState;
use crate::session::{SessionContext, SessionRole};
use crate::stanza::{Stanza, StanzaBuilder};
use crate::xml::{Element, ElementBuilder};

/// Language used for stream error texts when none is given.
pub const DEFAULT_ERROR_LANGUAGE: &str = "en_US";

/// Open a stream towards a peer.
///
/// Server streams also declare the dialback namespace under `db`.
pub fn stream_opener(
    role: SessionRole,
    from: &Entity,
    xml_lang: Option<&str>,
    version: Option<&str>,
    session_id: Option<&str>,
    inner: Option<Element>,
) -> Result<Stanza, XmlError> {
    let mut builder = StanzaBuilder::with_prefix("stream", ns::STREAM, "stream")?;
    builder
        .declare_namespace("", role.namespace())?
        .add_attribute("from", &from.full_qualified_name())?;
    if role == SessionRole::ServerToServer {
        builder.declare_namespace("db", ns::JABBER_SERVER_DIALBACK)?;
    }
    if let Some(lang) = xml_lang {
        builder.add_namespaced_attribute(ns::XML, "lang", lang)?;
    }
    if let Some(version) = version {
        builder.add_attribute("version", version)?;
    }
    if let Some(id) = session_id {
        builder.add_attribute("id", id)?;
    }
    if let Some(inner) = inner {
        builder.add_prepared_element(inner)?;
    }
    builder.build()
}

/// Stream header for an outbound server connection.
pub fn stream_opener_for_connector(
    from: &Entity,
    to: &Entity,
    version: Option<&str>,
) -> Result<Stanza, XmlError> {
    let opener = stream_opener(SessionRole::ServerToServer, from, None, version, None, None)?;
    let mut builder = StanzaBuilder::create_clone(opener.element(), true, &[])?;
    builder.add_attribute("to", to.domain())?;
    builder.build()
}

/// Stream header wrapping a stream error, for failures before the
/// peer's stream was answered.
pub fn stream_opener_for_error(
    role: SessionRole,
    from: &Entity,
    version: Option<&str>,
    error: Stanza,
) -> Result<Stanza, XmlError> {
    stream_opener(role, from, None, version, None, Some(error.into_element()))
}

/// Features to advertise in the session's current state, or `None` when
/// the state has nothing to offer.
pub fn stream_features(session: &SessionContext, config: &CoreConfig) -> Result<Option<Element>, XmlError> {
    let mut builder = ElementBuilder::new("features", ns::STREAM)?;
    match (session.role(), session.state()) {
        (SessionRole::ClientToServer, SessionState::Initiated) => {
            if config.tls_enabled {
                starttls_feature(&mut builder, config.tls_required)?;
            }
            if !config.tls_required {
                mechanisms_feature(&mut builder, &config.sasl_mechanisms)?;
            }
        }
        (SessionRole::ClientToServer, SessionState::Encrypted) => {
            mechanisms_feature(&mut builder, &config.sasl_mechanisms)?;
            if config.in_band_registration {
                builder
                    .start_inner_element("register", ns::FEATURE_IQ_REGISTER)?
                    .end_inner_element()?;
            }
        }
        (SessionRole::ClientToServer, SessionState::Authenticated) => {
            builder
                .start_inner_element("bind", ns::BIND)?
                .start_inner_element("required", ns::BIND)?
                .end_inner_element()?
                .end_inner_element()?
                .start_inner_element("session", ns::SESSION)?
                .start_inner_element("required", ns::SESSION)?
                .end_inner_element()?
                .end_inner_element()?;
        }
        (SessionRole::ServerToServer, SessionState::Initiated) => {
            if config.tls_enabled {
                starttls_feature(&mut builder, false)?;
            }
            dialback_feature(&mut builder)?;
        }
        (SessionRole::ServerToServer, SessionState::Encrypted) => {
            dialback_feature(&mut builder)?;
        }
        (SessionRole::ServerToServer, SessionState::Authenticated) => {}
        _ => return Ok(None),
    }
    builder.build().map(Some)
}

fn starttls_feature(builder: &mut ElementBuilder, required: bool) -> Result<(), XmlError> {
    builder.start_inner_element("starttls", ns::TLS)?;
    if required {
        builder.start_inner_element("required", ns::TLS)?.end_inner_element()?;
    }
    builder.end_inner_element()?;
    Ok(())
}

fn mechanisms_feature(builder: &mut ElementBuilder, mechanisms: &[String]) -> Result<(), XmlError> {
    builder.start_inner_element("mechanisms", ns::SASL)?;
    for mechanism in mechanisms {
        builder
            .start_inner_element("mechanism", ns::SASL)?
            .add_text(mechanism)?
            .end_inner_element()?;
    }
    builder.end_inner_element()?;
    Ok(())
}

fn dialback_feature(builder: &mut ElementBuilder) -> Result<(), XmlError> {
    builder
        .start_inner_element("dialback", ns::FEATURE_DIALBACK)?
        .end_inner_element()?;
    Ok(())
}

/// A `<stream:error>` with the given condition, optional descriptive text
/// and optional application-specific condition element.
pub fn stream_error(
    condition: StreamErrorCondition,
    lang: Option<&str>,
    text: Option<&str>,
    application: Option<Element>,
) -> Result<Stanza, XmlError> {
    let mut builder = StanzaBuilder::with_prefix("error", ns::STREAM, "stream")?;
    builder
        .start_inner_element(condition.as_str(), ns::STREAMS)?
        .end_inner_element()?;
    if let Some(text) = text {
        builder
            .start_inner_element("text", ns::STREAMS)?
            .add_namespaced_attribute(ns::XML, "lang", lang.unwrap_or(DEFAULT_ERROR_LANGUAGE))?
            .add_text(text)?
            .end_inner_element()?;
    }
    if let Some(application) = application {
        builder.add_prepared_element(application)?;
    }
    builder.build()
}

/// Error reply to `original`.
///
/// The reply comes from the server domain, echoes the original children and
/// carries the condition in `urn:ietf:params:xml:ns:xmpp-stanzas`. Text is
/// only added when both `text` and `lang` are given. An original of
/// `type="error"` must never be answered with another error, so that case
/// yields an `unsupported-stanza-type` stream error instead.
pub fn stanza_error(
    condition: StanzaErrorCondition,
    original: &Stanza,
    error_type: StanzaErrorType,
    text: Option<&str>,
    lang: Option<&str>,
    application: Option<Element>,
) -> Result<Stanza, XmlError> {
    if original.is_error() {
        return stream_error(
            StreamErrorCondition::UnsupportedStanzaType,
            lang,
            Some("cannot respond to IQ stanza of type error with the same"),
            None,
        );
    }

    let mut builder = StanzaBuilder::create_direct_reply(original, true, "error")?;
    for inner in original.inner_elements() {
        builder.add_prepared_element(inner.clone())?;
    }
    builder
        .start_inner_element("error", ns::JABBER_CLIENT)?
        .add_attribute("type", error_type.as_str())?
        .start_inner_element(condition.as_str(), ns::STANZAS)?
        .end_inner_element()?;
    if let (Some(text), Some(lang)) = (text, lang) {
        builder
            .start_inner_element("text", ns::STANZAS)?
            .add_namespaced_attribute(ns::XML, "lang", lang)?
            .add_text(text)?
            .end_inner_element()?;
    }
    if let Some(application) = application {
        builder.add_prepared_element(application)?;
    }
    builder.end_inner_element()?;
    builder.build()
}

/// `<proceed/>` answering a STARTTLS request.
pub fn tls_proceed() -> Result<Stanza, XmlError> {
    StanzaBuilder::new("proceed", ns::TLS)?.build()
}

/// `<failure/>` answering a STARTTLS request that cannot be honored.
pub fn tls_failure() -> Result<Stanza, XmlError> {
    StanzaBuilder::new("failure", ns::TLS)?.build()
}

/// `<db:result/>`, either carrying a key or reporting `type`.
pub fn dialback_result(
    from: &Entity,
    to: &Entity,
    result_type: Option<&str>,
    key: Option<&str>,
) -> Result<Stanza, XmlError> {
    dialback_element("result", from, to, None, result_type, key)
}

/// `<db:verify/>`, either asking to verify a key or answering with `type`.
pub fn dialback_verify(
    from: &Entity,
    to: &Entity,
    id: &str,
    verify_type: Option<&str>,
    key: Option<&str>,
) -> Result<Stanza, XmlError> {
    dialback_element("verify", from, to, Some(id), verify_type, key)
}

fn dialback_element(
    name: &str,
    from: &Entity,
    to: &Entity,
    id: Option<&str>,
    element_type: Option<&str>,
    key: Option<&str>,
) -> Result<Stanza, XmlError> {
    let mut builder = StanzaBuilder::with_prefix(name, ns::JABBER_SERVER_DIALBACK, "db")?;
    builder
        .add_attribute("from", from.domain())?
        .add_attribute("to", to.domain())?;
    if let Some(id) = id {
        builder.add_attribute("id", id)?;
    }
    if let Some(element_type) = element_type {
        builder.add_attribute("type", element_type)?;
    }
    if let Some(key) = key {
        builder.add_text(key)?;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceRegistry;
    use crate::session::RecordingStanzaWriter;
    use crate::xml::{render, render_to_string};
    use std::sync::Arc;

    fn server() -> Entity {
        Entity::domain_only("example.com")
    }

    fn session(role: SessionRole) -> SessionContext {
        SessionContext::new(
            server(),
            role,
            Arc::new(RecordingStanzaWriter::new()),
            Arc::new(ResourceRegistry::new()),
        )
    }

    fn child_names(element: &Element) -> Vec<String> {
        element.inner_elements().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn test_stream_error_rendering() {
        let error = stream_error(
            StreamErrorCondition::NotAuthorized,
            None,
            Some("could not process incoming stanza"),
            None,
        )
        .unwrap();
        assert_eq!(
            render_to_string(error.element()).unwrap(),
            concat!(
                r#"<stream:error xmlns:stream="http://etherx.jabber.org/streams">"#,
                r#"<not-authorized xmlns="urn:ietf:params:xml:ns:xmpp-streams"></not-authorized>"#,
                r#"<text xmlns="urn:ietf:params:xml:ns:xmpp-streams" xml:lang="en_US">could not process incoming stanza</text>"#,
                r#"</stream:error>"#
            )
        );
    }

    #[test]
    fn test_stanza_error_structure() {
        let original = Stanza::new(
            Element::parse_str(
                r#"<iq xmlns='jabber:client' from='romeo@example.com/orchard' to='example.com' type='get' id='q1'><query xmlns='urn:x:unknown'/></iq>"#,
            )
            .unwrap(),
        );
        let error = stanza_error(
            StanzaErrorCondition::ServiceUnavailable,
            &original,
            StanzaErrorType::Cancel,
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(error.name(), "iq");
        assert_eq!(error.stanza_type(), Some("error"));
        assert_eq!(error.id(), Some("q1"));
        assert_eq!(error.attribute("to"), Some("romeo@example.com/orchard"));
        assert_eq!(error.attribute("from"), Some("example.com"));
        assert_eq!(child_names(error.element()), vec!["query", "error"]);

        let error_element = error.first_inner_element("error").unwrap();
        assert_eq!(error_element.attribute("type"), Some("cancel"));
        assert!(error_element.is("error", ns::JABBER_CLIENT));
        assert!(error_element
            .single_inner_element()
            .unwrap()
            .is("service-unavailable", ns::STANZAS));
    }

    #[test]
    fn test_stanza_error_text_needs_language() {
        let original = Stanza::new(
            Element::parse_str("<message xmlns='jabber:client' from='a@b/c' to='d@e'/>").unwrap(),
        );
        let without_lang = stanza_error(
            StanzaErrorCondition::BadRequest,
            &original,
            StanzaErrorType::Modify,
            Some("text"),
            None,
            None,
        )
        .unwrap();
        let error = without_lang.first_inner_element("error").unwrap();
        assert!(error.first_inner_element("text").is_none());
    }

    #[test]
    fn test_no_error_reply_to_error() {
        let original = Stanza::new(
            Element::parse_str("<iq xmlns='jabber:client' type='error' id='1'/>").unwrap(),
        );
        let reply = stanza_error(
            StanzaErrorCondition::BadRequest,
            &original,
            StanzaErrorType::Modify,
            None,
            None,
            None,
        )
        .unwrap();
        assert!(reply.is("error", ns::STREAM));
        assert!(reply.first_inner_element("unsupported-stanza-type").is_some());
    }

    #[test]
    fn test_client_opener_with_features() {
        let session = session(SessionRole::ClientToServer);
        let config = CoreConfig::default();
        let features = stream_features(&session, &config).unwrap().unwrap();
        assert_eq!(child_names(&features), vec!["starttls"]);

        let opener = stream_opener(
            SessionRole::ClientToServer,
            &server(),
            Some("en"),
            Some("1.0"),
            Some("abc"),
            Some(features),
        )
        .unwrap();
        let rendered = render(opener.element()).unwrap();
        assert_eq!(
            rendered.opening,
            r#"<stream:stream xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams" from="example.com" xml:lang="en" version="1.0" id="abc">"#
        );
        assert_eq!(
            rendered.content,
            concat!(
                r#"<stream:features><starttls xmlns="urn:ietf:params:xml:ns:xmpp-tls">"#,
                r#"<required></required></starttls></stream:features>"#
            )
        );
    }

    #[test]
    fn test_features_per_state() {
        let config = CoreConfig::default()
            .with_tls_required(false)
            .with_in_band_registration(true);
        let session = session(SessionRole::ClientToServer);
        let initiated = stream_features(&session, &config).unwrap().unwrap();
        assert_eq!(child_names(&initiated), vec!["starttls", "mechanisms"]);

        session.state_holder().transition(SessionState::Encrypted).unwrap();
        let encrypted = stream_features(&session, &config).unwrap().unwrap();
        assert_eq!(child_names(&encrypted), vec!["mechanisms", "register"]);

        session.state_holder().transition(SessionState::Authenticated).unwrap();
        let authenticated = stream_features(&session, &config).unwrap().unwrap();
        assert_eq!(child_names(&authenticated), vec!["bind", "session"]);

        session.state_holder().transition(SessionState::Closed).unwrap();
        assert!(stream_features(&session, &config).unwrap().is_none());
    }

    #[test]
    fn test_server_features_offer_dialback() {
        let session = session(SessionRole::ServerToServer);
        let features = stream_features(&session, &CoreConfig::default()).unwrap().unwrap();
        assert_eq!(child_names(&features), vec!["starttls", "dialback"]);

        let opener = stream_opener(
            SessionRole::ServerToServer,
            &server(),
            None,
            Some("1.0"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            opener.declared_namespaces().get("db").map(String::as_str),
            Some(ns::JABBER_SERVER_DIALBACK)
        );
    }

    #[test]
    fn test_dialback_elements() {
        let verify = dialback_verify(
            &server(),
            &Entity::domain_only("remote.example"),
            "s1",
            None,
            Some("deadbeef"),
        )
        .unwrap();
        assert_eq!(
            render_to_string(verify.element()).unwrap(),
            r#"<db:verify xmlns:db="jabber:server:dialback" from="example.com" to="remote.example" id="s1">deadbeef</db:verify>"#
        );
    }
}
