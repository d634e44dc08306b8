//! Presence routing.
//!
//! Roster bookkeeping and presence broadcast belong to the presence module;
//! the core only routes.

use std::sync::Arc;

use tracing::debug;

use super::{outbound_sender, relay};
use crate::delivery::{DeliveryFailureStrategy, IgnoreFailureStrategy, ReturnErrorToSenderFailureStrategy};
use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, StanzaHandler};
use crate::stanza::{PresenceStanza, Stanza, StanzaBuilder};

/// Relays directed presence. Broadcast presence (no `to`) goes to the
/// sender's bare address and failures are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceHandler;

impl StanzaHandler for PresenceHandler {
    fn name(&self) -> &str {
        "presence"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        PresenceStanza::wrap(stanza).is_some() && stanza.in_core_namespace()
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let bounce = || -> Arc<dyn DeliveryFailureStrategy> {
            Arc::new(ReturnErrorToSenderFailureStrategy::new(Arc::clone(
                ctx.runtime.relay(),
            )))
        };

        if !ctx.is_outbound {
            let Ok(Some(to)) = stanza.to() else {
                debug!(stanza = %stanza.dense(), "Dropping inbound presence without receiver");
                return Ok(());
            };
            relay(broker, &to, stanza, bounce());
            return Ok(());
        }

        let from = outbound_sender(&stanza, ctx)?;
        let (to, strategy) = match stanza.to() {
            Ok(Some(to)) => (to, bounce()),
            _ => (from.bare(), IgnoreFailureStrategy::shared()),
        };
        let presence = StanzaBuilder::create_forward(&stanza, Some(&from), None)?.build()?;
        relay(broker, &to, presence, strategy);
        Ok(())
    }
}
