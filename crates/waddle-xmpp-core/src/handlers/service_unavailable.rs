//! Answer for core stanzas nobody else handles.

use tracing::debug;

use crate::error::{HandlerError, StanzaErrorCondition, StanzaErrorType};
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, StanzaHandler};
use crate::response;
use crate::stanza::Stanza;

/// Replies `service-unavailable` (type `cancel`) to anything it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceUnavailableHandler;

impl StanzaHandler for ServiceUnavailableHandler {
    fn name(&self) -> &str {
        "service-unavailable"
    }

    fn verify(&self, _stanza: &Stanza) -> bool {
        true
    }

    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        debug!(
            session_id = %ctx.session.id(),
            stanza = %stanza.dense(),
            "No service for stanza"
        );
        let lang = ctx.session.xml_lang();
        let error = response::stanza_error(
            StanzaErrorCondition::ServiceUnavailable,
            &stanza,
            StanzaErrorType::Cancel,
            None,
            lang.as_deref(),
            None,
        )?;
        broker.write_to_session(error);
        Ok(())
    }
}
