//! Server dialback (XEP-0220).
//!
//! As receiving server we take `<db:result/>` keys from an originating
//! server and ask its authoritative server to verify them over a separate
//! connection. As authoritative server we answer `<db:verify/>` requests by
//! recomputing the key.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::addressing::Entity;
use crate::error::{HandlerError, ProtocolError, StreamErrorCondition};
use crate::ns;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, HandlerRole, StanzaHandler};
use crate::protocol::SessionState;
use crate::response;
use crate::s2s::{DialbackOutcome, S2sConnectorRegistry};
use crate::session::{SessionContext, SessionTerminationCause};
use crate::stanza::Stanza;

/// `from` and `to` of a dialback element as domains.
fn addressing(stanza: &Stanza, ctx: &HandlerContext<'_>) -> Result<(Entity, Entity), HandlerError> {
    match (stanza.from(), stanza.to()) {
        (Ok(Some(from)), Ok(Some(to))) => Ok((
            Entity::domain_only(from.domain()),
            Entity::domain_only(to.domain()),
        )),
        _ => {
            let lang = ctx.session.xml_lang();
            let error = response::stream_error(
                StreamErrorCondition::ImproperAddressing,
                lang.as_deref(),
                Some("dialback requires 'from' and 'to'"),
                None,
            )?;
            Err(ProtocolError::bad_request("dialback element without addressing")
                .with_stanza(error)
                .into())
        }
    }
}

fn outcome(stanza: &Stanza) -> Option<DialbackOutcome> {
    stanza.stanza_type().and_then(|t| t.parse().ok())
}

/// Mark `session` as authenticated for `peer`.
fn authenticate(session: &SessionContext, peer: &Entity) -> Result<(), HandlerError> {
    session
        .state_holder()
        .transition(SessionState::Authenticated)
        .map_err(|e| HandlerError::internal(e.to_string()))?;
    session.set_initiating_entity(peer.clone());
    info!(session_id = %session.id(), peer = %peer, "Server authenticated via dialback");
    Ok(())
}

/// `<db:result/>` in either direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialbackResultHandler;

impl StanzaHandler for DialbackResultHandler {
    fn name(&self) -> &str {
        "dialback-result"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.is("result", ns::JABBER_SERVER_DIALBACK)
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::Dialback
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let (from, to) = addressing(&stanza, ctx)?;
        let session = ctx.session;

        if stanza.attribute("type").is_some() {
            // Answer to a key we sent on an outbound stream.
            return match outcome(&stanza) {
                Some(DialbackOutcome::Valid) => authenticate(session, &from),
                _ => {
                    warn!(
                        session_id = %session.id(),
                        remote = %from,
                        "Remote server refused our dialback key"
                    );
                    session.end_session(SessionTerminationCause::StreamError);
                    Ok(())
                }
            };
        }

        // The peer is the originating server, we are receiving.
        let (originating, receiving) = (from, to);
        let key = stanza.text();
        let stream_id = session.session_id();
        let refusal = response::dialback_result(
            &receiving,
            &originating,
            Some(DialbackOutcome::Invalid.as_str()),
            None,
        )?;

        let (Some(connectors), Ok(handle)) = (ctx.runtime.connectors(), Handle::try_current()) else {
            debug!(remote = %originating, "No outbound federation, refusing dialback key");
            broker.write_to_session(refusal);
            return Ok(());
        };

        let verify = response::dialback_verify(&receiving, &originating, &stream_id, None, Some(&key))?;
        let connectors: Arc<S2sConnectorRegistry> = Arc::clone(connectors);
        let origin = Arc::clone(session);
        handle.spawn(async move {
            let written = match connectors
                .connect_for_dialback(&originating, Arc::clone(&origin))
                .await
            {
                Ok(connector) => connector.write(&verify),
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(remote = %originating, error = %e, "Dialback verification failed");
                origin.write(&refusal);
            }
        });
        Ok(())
    }
}

/// `<db:verify/>`: a verification request when untyped, the authoritative
/// server's answer otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialbackVerifyHandler;

impl StanzaHandler for DialbackVerifyHandler {
    fn name(&self) -> &str {
        "dialback-verify"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.is("verify", ns::JABBER_SERVER_DIALBACK)
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::Dialback
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let (from, to) = addressing(&stanza, ctx)?;
        let session = ctx.session;

        if stanza.attribute("type").is_none() {
            let Some(id) = stanza.id() else {
                return Err(ProtocolError::bad_request("db:verify without id").into());
            };
            let valid = ctx
                .runtime
                .dialback_key()
                .verify(&stanza.text(), from.domain(), to.domain(), id);
            let answer = DialbackOutcome::from(valid);
            debug!(receiving = %from, outcome = %answer, "Answered dialback verification");
            broker.write_to_session(response::dialback_verify(
                &to,
                &from,
                id,
                Some(answer.as_str()),
                None,
            )?);
            return Ok(());
        }

        let answer = outcome(&stanza).unwrap_or(DialbackOutcome::Invalid);
        match session.dialback_origin() {
            Some(origin) => {
                origin.write(&response::dialback_result(&to, &from, Some(answer.as_str()), None)?);
                if answer == DialbackOutcome::Valid {
                    authenticate(&origin, &from)?;
                } else {
                    origin.end_session(SessionTerminationCause::StreamError);
                }
            }
            None => warn!(
                session_id = %session.id(),
                remote = %from,
                "Dialback answer without a waiting session"
            ),
        }
        session.end_session(SessionTerminationCause::ClientBye);
        Ok(())
    }
}
