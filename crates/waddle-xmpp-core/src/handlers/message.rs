//! Message routing (RFC 3921 2.1).

use std::sync::Arc;

use tracing::debug;

use super::{outbound_sender, relay};
use crate::delivery::ReturnErrorToSenderFailureStrategy;
use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, StanzaHandler};
use crate::stanza::{MessageStanza, Stanza, StanzaBuilder};

/// Relays messages. A message without `to` goes to the sender's own bare
/// address.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageHandler;

impl StanzaHandler for MessageHandler {
    fn name(&self) -> &str {
        "message"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        MessageStanza::wrap(stanza).is_some() && stanza.in_core_namespace()
    }

    fn is_session_required(&self) -> bool {
        false
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let strategy = Arc::new(ReturnErrorToSenderFailureStrategy::new(Arc::clone(
            ctx.runtime.relay(),
        )));

        if !ctx.is_outbound {
            let Ok(Some(to)) = stanza.to() else {
                debug!(stanza = %stanza.dense(), "Dropping inbound message without receiver");
                return Ok(());
            };
            relay(broker, &to, stanza, strategy);
            return Ok(());
        }

        let from = outbound_sender(&stanza, ctx)?;
        let to = match stanza.to() {
            Ok(Some(to)) => to,
            _ => from.bare(),
        };
        let message = if stanza.attribute("from") == Some(from.full_qualified_name().as_str()) {
            stanza
        } else {
            StanzaBuilder::create_forward(&stanza, Some(&from), None)?.build()?
        };
        relay(broker, &to, message, strategy);
        Ok(())
    }
}
