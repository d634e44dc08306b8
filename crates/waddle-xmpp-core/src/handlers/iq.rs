//! IQ handling (RFC 3920 9.2.3).
//!
//! [`IqHandler`] validates structure and, having no logic of its own,
//! answers `feature-not-implemented`. [`RelayingIqHandler`] adds routing of
//! IQs addressed to other entities.

use std::sync::Arc;

use tracing::debug;

use super::{error_language, outbound_sender, relay};
use crate::delivery::ReturnErrorToSenderFailureStrategy;
use crate::error::{HandlerError, StanzaErrorCondition, StanzaErrorType, XmlError};
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, StanzaHandler};
use crate::response;
use crate::stanza::{IqStanza, IqType, Stanza, StanzaBuilder};

/// Structural IQ checks. `Some` is the error reply for a malformed IQ.
fn validate(iq: &IqStanza, ctx: &HandlerContext<'_>) -> Result<Option<Stanza>, XmlError> {
    let text = if iq.id().is_none() {
        "iq-stanza requires 'id' attribute to be present"
    } else {
        match iq.iq_type() {
            None => "iq-stanza requires a valid 'type' attribute to be present",
            Some(t) if t.is_request() && iq.inner_elements().count() != 1 => {
                "iq stanza of type get or set require exactly one child"
            }
            Some(IqType::Result) if iq.inner_elements().count() > 1 => {
                "iq stanza of type result may not have more than one child"
            }
            Some(_) => return Ok(None),
        }
    };
    let lang = error_language(ctx);
    response::stanza_error(
        StanzaErrorCondition::BadRequest,
        iq,
        StanzaErrorType::Modify,
        Some(text),
        Some(&lang),
        None,
    )
    .map(Some)
}

fn not_implemented(stanza: &Stanza) -> Result<Stanza, XmlError> {
    response::stanza_error(
        StanzaErrorCondition::FeatureNotImplemented,
        stanza,
        StanzaErrorType::Cancel,
        None,
        None,
        None,
    )
}

fn service_unavailable(stanza: &Stanza) -> Result<Stanza, XmlError> {
    response::stanza_error(
        StanzaErrorCondition::ServiceUnavailable,
        stanza,
        StanzaErrorType::Cancel,
        None,
        None,
        None,
    )
}

/// Validates IQs nobody else claimed.
#[derive(Debug, Default, Clone, Copy)]
pub struct IqHandler;

impl StanzaHandler for IqHandler {
    fn name(&self) -> &str {
        "iq"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        IqStanza::wrap(stanza).is_some() && stanza.in_core_namespace()
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let Some(iq) = IqStanza::wrap(&stanza) else {
            return Err(HandlerError::internal("iq handler invoked for a non-iq stanza"));
        };
        let reply = match validate(&iq, ctx)? {
            Some(error) => error,
            None => not_implemented(&stanza)?,
        };
        broker.write_to_session(reply);
        Ok(())
    }
}

/// Routes IQs between entities that share a subscription.
///
/// Outbound IQs get a full `from` and are relayed with errors returned to
/// the sender. IQs arriving from a federated server are relayed to their
/// local receiver. Components of this server bypass the subscription check.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayingIqHandler;

impl StanzaHandler for RelayingIqHandler {
    fn name(&self) -> &str {
        "relaying-iq"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        IqStanza::wrap(stanza).is_some() && stanza.in_core_namespace()
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let Some(iq) = IqStanza::wrap(&stanza) else {
            return Err(HandlerError::internal("iq handler invoked for a non-iq stanza"));
        };
        if let Some(error) = validate(&iq, ctx)? {
            broker.write_to_session(error);
            return Ok(());
        }

        let server = ctx.runtime.server_entity();
        let to = match stanza.to() {
            Ok(Some(to)) if !to.is_server(server) => to,
            _ => {
                broker.write_to_session(not_implemented(&stanza)?);
                return Ok(());
            }
        };

        if ctx.is_outbound {
            let from = outbound_sender(&stanza, ctx)?;
            let to_component = to.node().is_none() && to.is_addressing_server(server);
            if !to_component && !ctx.runtime.is_subscribed(&from.bare(), &to.bare()) {
                debug!(from = %from, to = %to, "IQ to non-contact refused");
                broker.write_to_session(service_unavailable(&stanza)?);
                return Ok(());
            }
            let forward = StanzaBuilder::create_forward(&stanza, Some(&from), None)?.build()?;
            let strategy = Arc::new(ReturnErrorToSenderFailureStrategy::new(Arc::clone(
                ctx.runtime.relay(),
            )));
            relay(broker, &to, forward, strategy);
        } else {
            let from = stanza.from().ok().flatten();
            let from_component = from
                .as_ref()
                .is_some_and(|from| from.node().is_none() && from.is_addressing_server(server));
            let subscribed = from
                .as_ref()
                .is_some_and(|from| ctx.runtime.is_subscribed(&to.bare(), &from.bare()));
            if !from_component && !subscribed {
                debug!(from = ?from, to = %to, "IQ from non-contact refused");
                broker.write_to_session(service_unavailable(&stanza)?);
                return Ok(());
            }
            relay(
                broker,
                &to,
                stanza,
                Arc::new(ReturnErrorToSenderFailureStrategy::new(Arc::clone(
                    ctx.runtime.relay(),
                ))),
            );
        }
        Ok(())
    }
}
