//! `<?xml ...?>` prolog.

use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, HandlerRole, StanzaHandler};
use crate::stanza::Stanza;

/// Accepts the XML declaration a peer may send before its stream header.
/// Nothing is answered.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlPrologHandler;

impl StanzaHandler for XmlPrologHandler {
    fn name(&self) -> &str {
        "xml-prolog"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.name() == "xml"
    }

    fn is_session_required(&self) -> bool {
        false
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::XmlProlog
    }

    fn execute(
        &self,
        _stanza: Stanza,
        _ctx: &HandlerContext<'_>,
        _broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}
