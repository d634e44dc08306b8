//! Built-in stanza handlers.
//!
//! These cover the stream handshake and the three core stanza kinds. Feature
//! modules register their own handlers through dictionaries, which take
//! precedence over everything here.

mod dialback;
mod iq;
mod message;
mod presence;
mod prolog;
mod service_unavailable;
mod starttls;
mod stream_start;

pub use dialback::{DialbackResultHandler, DialbackVerifyHandler};
pub use iq::{IqHandler, RelayingIqHandler};
pub use message::MessageHandler;
pub use presence::PresenceHandler;
pub use prolog::XmlPrologHandler;
pub use service_unavailable::ServiceUnavailableHandler;
pub use starttls::StartTlsHandler;
pub use stream_start::StreamStartHandler;

use std::sync::Arc;

use tracing::debug;

use crate::addressing::Entity;
use crate::delivery::DeliveryFailureStrategy;
use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::HandlerContext;
use crate::stanza::Stanza;

/// Language of stanza error texts for the session in `ctx`.
fn error_language(ctx: &HandlerContext<'_>) -> String {
    ctx.session
        .xml_lang()
        .unwrap_or_else(|| ctx.runtime.config().default_language.clone())
}

/// Sender of a stanza a local client sent: its `from` when that is a full
/// address, else the session's address with its only bound resource, or
/// the bare address when no resource is bound.
fn outbound_sender(stanza: &Stanza, ctx: &HandlerContext<'_>) -> Result<Entity, HandlerError> {
    if let Ok(Some(from)) = stanza.from() {
        if !from.is_bare() {
            return Ok(from);
        }
    }
    let entity = ctx
        .session
        .initiating_entity()
        .ok_or_else(|| HandlerError::internal("no initiating entity for outbound stanza"))?;
    Ok(match ctx.session.unique_resource() {
        Some(resource) => entity.bare().with_resource(&resource),
        None => entity.bare(),
    })
}

/// Hand `stanza` to the broker. A failed delivery was already passed to
/// `strategy`, so it is only logged.
fn relay(broker: &dyn StanzaBroker, to: &Entity, stanza: Stanza, strategy: Arc<dyn DeliveryFailureStrategy>) {
    if let Err(e) = broker.write(to, stanza, strategy) {
        debug!(receiver = %to, error = %e, "Delivery failed");
    }
}
