//! STARTTLS negotiation (RFC 3920 5).

use tracing::{debug, warn};

use crate::error::{HandlerError, ProtocolError, ProtocolErrorKind, StreamErrorCondition};
use crate::ns;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{HandlerContext, HandlerRole, StanzaHandler};
use crate::protocol::SessionState;
use crate::response;
use crate::session::SessionTerminationCause;
use crate::stanza::Stanza;

/// Accepts `<starttls/>` right after the stream was started and hands the
/// handshake to the transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct StartTlsHandler;

impl StanzaHandler for StartTlsHandler {
    fn name(&self) -> &str {
        "starttls"
    }

    fn verify(&self, stanza: &Stanza) -> bool {
        stanza.is("starttls", ns::TLS)
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::StartTls
    }

    fn execute(
        &self,
        _stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        let session = ctx.session;
        let state = session.state();
        if state != SessionState::Started {
            let lang = session.xml_lang();
            let error = response::stream_error(
                StreamErrorCondition::UnsupportedStanzaType,
                lang.as_deref(),
                Some("starttls is only accepted right after the stream was started"),
                None,
            )?;
            return Err(ProtocolError::new(
                ProtocolErrorKind::IllegalState,
                format!("starttls in state {state}"),
            )
            .with_stanza(error)
            .into());
        }

        if !ctx.runtime.config().tls_enabled {
            warn!(session_id = %session.id(), "STARTTLS requested but no TLS context available");
            broker.write_to_session(response::tls_failure()?);
            session.end_session(SessionTerminationCause::StreamError);
            return Ok(());
        }

        session
            .state_holder()
            .transition(SessionState::EncryptionStarted)
            .map_err(|e| ProtocolError::tls(e.to_string()))?;
        broker.write_to_session(response::tls_proceed()?);
        debug!(session_id = %session.id(), "Starting TLS handshake");
        session.writer().start_tls();
        Ok(())
    }
}
