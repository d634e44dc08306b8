//! `<stream:stream>` header negotiation (RFC 3920 4.4).

use tracing::debug;

use crate::addressing::Entity;
use crate::error::{HandlerError, ProtocolError, StreamErrorCondition, XmlError};
use crate::ns;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, HandlerRole, StanzaHandler};
use crate::protocol::SessionState;
use crate::response::{self, DEFAULT_ERROR_LANGUAGE};
use crate::session::SessionRole;
use crate::stanza::Stanza;

const SUPPORTED_MAJOR_VERSION: u32 = 1;
const RESPONSE_VERSION: &str = "1.0";

/// Answers a peer's stream header with our own and the features of the
/// session's current state.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamStartHandler;

impl StanzaHandler for StreamStartHandler {
    fn name(&self) -> &str {
        "stream-start"
    }

    /// Any `stream` element; a wrong namespace is answered in `execute`.
    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.name() == "stream"
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::StreamStart
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let session = ctx.session;

        if stanza.namespace_uri() != ns::STREAM {
            return Err(reject(
                ctx,
                StreamErrorCondition::InvalidNamespace,
                &format!("stream namespace must be {}", ns::STREAM),
            )?);
        }

        let role = match stream_role(&stanza, session.role()) {
            Some(role) => role,
            None => {
                return Err(reject(
                    ctx,
                    StreamErrorCondition::InvalidNamespace,
                    "one of the two namespaces must be present: jabber:client or jabber:server",
                )?)
            }
        };
        session.set_role(role);

        let state = session.state();
        if !matches!(
            state,
            SessionState::Initiated | SessionState::Encrypted | SessionState::Authenticated
        ) {
            return Err(reject(
                ctx,
                StreamErrorCondition::UnsupportedStanzaType,
                "unexpected stream start",
            )?);
        }

        session.set_xml_lang(stanza.xml_lang().map(str::to_string));

        let version = match stanza.attribute("version") {
            None => None,
            Some(raw) => match parse_version(raw) {
                Some((SUPPORTED_MAJOR_VERSION, _)) => Some(RESPONSE_VERSION),
                Some(_) => {
                    return Err(reject(
                        ctx,
                        StreamErrorCondition::UnsupportedVersion,
                        &format!("major version change not supported: {raw}"),
                    )?)
                }
                None => {
                    return Err(reject(
                        ctx,
                        StreamErrorCondition::UnsupportedVersion,
                        &format!("illegal version value: {raw}"),
                    )?)
                }
            },
        };

        match role {
            SessionRole::ClientToServer => {
                if let Some(to) = stanza.attribute("to") {
                    let Ok(to) = Entity::parse(to) else {
                        return Err(reject(
                            ctx,
                            StreamErrorCondition::ImproperAddressing,
                            "could not parse incoming stanza's TO attribute",
                        )?);
                    };
                    if !to.is_server(session.server_entity()) {
                        return Err(reject(
                            ctx,
                            StreamErrorCondition::HostUnknown,
                            &format!("{} is not served here", to.domain()),
                        )?);
                    }
                }
            }
            SessionRole::ServerToServer => {
                if let Some(from) = stanza.attribute("from") {
                    let Ok(peer) = Entity::parse(from) else {
                        return Err(reject(
                            ctx,
                            StreamErrorCondition::InvalidFrom,
                            "could not parse incoming stanza's FROM attribute",
                        )?);
                    };
                    session.set_initiating_entity(Entity::domain_only(peer.domain()));
                }
            }
        }

        let features = match version {
            Some(_) => response::stream_features(session, ctx.runtime.config())?,
            None => None,
        };
        let session_id = session.session_id();
        let opener = response::stream_opener(
            role,
            session.server_entity(),
            stanza.xml_lang(),
            version,
            Some(&session_id),
            features,
        )?;

        if !matches!(state, SessionState::Authenticated | SessionState::Encrypted) {
            session
                .state_holder()
                .transition(SessionState::Started)
                .map_err(|e| ProtocolError::stream_start(e.to_string()))?;
        }
        session.set_reopening_stream(false);

        debug!(
            session_id = %session.id(),
            role = %role,
            version = ?version,
            "Stream started"
        );
        broker.write_to_session(opener);
        Ok(())
    }
}

/// The role a stream header asks for: the content namespace it declares,
/// or the role the transport assigned when it declares none. A foreign
/// default namespace yields `None`.
fn stream_role(stanza: &Stanza, assigned: SessionRole) -> Option<SessionRole> {
    let declared = stanza.declared_namespaces();
    let client = declared.values().any(|uri| uri == ns::JABBER_CLIENT);
    let server = declared.values().any(|uri| uri == ns::JABBER_SERVER);
    match (client, server) {
        (true, _) => Some(SessionRole::ClientToServer),
        (false, true) => Some(SessionRole::ServerToServer),
        (false, false) if declared.contains_key("") => None,
        (false, false) => Some(assigned),
    }
}

/// `major.minor` with both parts numeric.
fn parse_version(raw: &str) -> Option<(u32, u32)> {
    let (major, minor) = raw.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Stream error for a rejected header. Before our own header went out the
/// error travels inside one.
fn reject(
    ctx: &HandlerContext<'_>,
    condition: StreamErrorCondition,
    text: &str,
) -> Result<HandlerError, XmlError> {
    let session = ctx.session;
    let lang = session.xml_lang();
    let error = response::stream_error(
        condition,
        Some(lang.as_deref().unwrap_or(DEFAULT_ERROR_LANGUAGE)),
        Some(text),
        None,
    )?;
    let error = if session.state() <= SessionState::Initiated {
        response::stream_opener_for_error(
            session.role(),
            session.server_entity(),
            Some(RESPONSE_VERSION),
            error,
        )?
    } else {
        error
    };
    Ok(ProtocolError::stream_start(text).with_stanza(error).into())
}
