//! The protocol worker: entry point for every stanza a transport parsed.
//!
//! Processing order for one stanza:
//!
//! 1. resolve the handler (none: `unsupported-stanza-type`)
//! 2. drop it when the handler needs a live session and there is none
//! 3. reject core stanzas before authentication, in-band registration
//!    excepted, and core stanzas their handler does not verify (wrong
//!    namespace)
//! 4. check addressing and, on server-to-server streams, move the stanza
//!    into `jabber:client`
//! 5. hand it to the worker of the session's current state; handler errors
//!    and panics are contained and logged

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::error::{HandlerError, ProtocolError, StanzaErrorCondition, StanzaErrorType, StreamErrorCondition};
use crate::ns;
use crate::protocol::handler::{HandlerContext, HandlerRole};
use crate::protocol::response_writer;
use crate::protocol::state_worker::worker_for;
use crate::protocol::SessionState;
use crate::response;
use crate::runtime::ServerRuntimeContext;
use crate::session::SessionContext;
use crate::stanza::{Stanza, StanzaBuilder};

/// Something stanzas of a session can be fed to.
pub trait StanzaProcessor: Send + Sync {
    /// Process one stanza received on `session`.
    fn process_stanza(&self, session: &Arc<SessionContext>, stanza: Stanza);

    /// The transport finished the TLS handshake for `session`.
    fn process_tls_established(&self, session: &Arc<SessionContext>) -> Result<(), ProtocolError>;
}

/// Synchronous stanza processing against a shared runtime.
#[derive(Debug, Clone)]
pub struct ProtocolWorker {
    runtime: Arc<ServerRuntimeContext>,
}

impl ProtocolWorker {
    pub fn new(runtime: Arc<ServerRuntimeContext>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<ServerRuntimeContext> {
        &self.runtime
    }

    /// Check `from` and `to` of a core stanza and bring it into the client
    /// namespace. `None` means the stanza was answered and must not be
    /// processed further.
    fn check_addressing(&self, session: &SessionContext, stanza: Stanza) -> Option<Stanza> {
        if session.is_server_to_server() {
            self.check_server_addressing(session, stanza)
        } else {
            self.check_client_addressing(session, &stanza).then_some(stanza)
        }
    }

    fn check_server_addressing(&self, session: &SessionContext, stanza: Stanza) -> Option<Stanza> {
        let reject = |condition, text: &str| {
            response_writer::write_stanza_error(session, &stanza, condition, StanzaErrorType::Modify, text);
            None
        };

        match stanza.from() {
            Ok(Some(from)) => {
                let from_peer = session
                    .initiating_entity()
                    .is_some_and(|peer| from.is_addressing_server(&peer));
                if !from_peer {
                    return reject(StanzaErrorCondition::UnknownSender, "Incorrect from attribute");
                }
            }
            Ok(None) => return reject(StanzaErrorCondition::UnknownSender, "Missing from attribute"),
            Err(_) => return reject(StanzaErrorCondition::UnknownSender, "Incorrect from attribute"),
        }
        match stanza.to() {
            Ok(Some(to)) if to.is_addressing_server(self.runtime.server_entity()) => {}
            Ok(None) => return reject(StanzaErrorCondition::BadRequest, "Missing to attribute"),
            _ => return reject(StanzaErrorCondition::BadRequest, "Invalid to attribute"),
        }

        match StanzaBuilder::rewrite_namespace(&stanza, ns::JABBER_SERVER, ns::JABBER_CLIENT) {
            Ok(rewritten) => Some(rewritten),
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Could not rewrite server stanza");
                None
            }
        }
    }

    /// A `from` on a client stream must name the authenticated user and
    /// one of the session's own resources.
    fn check_client_addressing(&self, session: &SessionContext, stanza: &Stanza) -> bool {
        let from = match stanza.from() {
            Ok(Some(from)) => from,
            Ok(None) => return true,
            Err(e) => {
                response_writer::handle_wrong_from(session, stanza, &format!("invalid from attribute: {e}"));
                return false;
            }
        };
        let Some(initiating) = session.initiating_entity() else {
            return true;
        };

        if from.bare() != initiating.bare() {
            response_writer::handle_wrong_from(
                session,
                stanza,
                &format!("from {} does not match the authenticated entity", from.bare()),
            );
            return false;
        }

        let known_resource = match from.resource() {
            Some(resource) => session
                .resources()
                .resources_for_session(session.id())
                .iter()
                .any(|bound| bound == resource),
            None => session.resources().resources_for_session(session.id()).len() <= 1,
        };
        if !known_resource {
            let text = match from.resource() {
                Some(resource) => format!("resource {resource} is not bound to this session"),
                None => "a bare from is ambiguous with several bound resources".to_string(),
            };
            response_writer::handle_wrong_from(session, stanza, &text);
            return false;
        }
        true
    }

    fn report_failure(&self, session: &SessionContext, stanza: &Stanza, failure: &HandlerError) {
        error!(
            session_id = %session.id(),
            stanza = %stanza.dense(),
            error = %failure,
            "Stanza handler failed"
        );
        if !self.runtime.config().respond_on_handler_failure || !stanza.is_core() {
            return;
        }
        let lang = session.xml_lang();
        match response::stanza_error(
            StanzaErrorCondition::InternalServerError,
            stanza,
            StanzaErrorType::Wait,
            Some("internal error while processing the stanza"),
            Some(lang.as_deref().unwrap_or(&self.runtime.config().default_language)),
            None,
        ) {
            Ok(reply) => session.write(&reply),
            Err(e) => warn!(session_id = %session.id(), error = %e, "Could not build failure response"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl StanzaProcessor for ProtocolWorker {
    #[instrument(
        skip(self, session, stanza),
        fields(session_id = %session.id(), stanza = %stanza.name()),
        name = "xmpp.process_stanza"
    )]
    fn process_stanza(&self, session: &Arc<SessionContext>, stanza: Stanza) {
        let Some(handler) = self.runtime.handler_for(&stanza) else {
            response_writer::handle_unsupported_stanza_type(session, &stanza);
            return;
        };

        let state = session.state();
        if handler.is_session_required() && !state.is_open() {
            debug!(state = %state, handler = handler.name(), "Dropping stanza for closed session");
            return;
        }

        if state != SessionState::Authenticated
            && stanza.is_core()
            && handler.unwrapped_role() != HandlerRole::InBandRegistration
        {
            response_writer::handle_not_authorized(session, &stanza);
            return;
        }

        if stanza.is_core() && !handler.verify(&stanza) {
            debug!(handler = handler.name(), "Core stanza refused by its handler");
            response_writer::handle_unsupported_stanza_type(session, &stanza);
            return;
        }

        let stanza = if stanza.is_core() {
            match self.check_addressing(session, stanza) {
                Some(stanza) => stanza,
                None => return,
            }
        } else {
            stanza
        };

        let ctx = HandlerContext::new(&self.runtime, session);
        let original = stanza.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            worker_for(session.state()).process_stanza(stanza, handler, &ctx)
        }));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(failure)) => failure,
            Err(payload) => HandlerError::internal(format!(
                "handler {} panicked: {}",
                handler.name(),
                panic_message(payload.as_ref())
            )),
        };
        self.report_failure(session, &original, &failure);
    }

    #[instrument(skip(self, session), fields(session_id = %session.id()), name = "xmpp.tls_established")]
    fn process_tls_established(&self, session: &Arc<SessionContext>) -> Result<(), ProtocolError> {
        let state = session.state();
        if state != SessionState::EncryptionStarted {
            warn!(state = %state, "TLS established outside of STARTTLS negotiation");
            let lang = session.xml_lang();
            let error = response::stream_error(
                StreamErrorCondition::BadFormat,
                lang.as_deref(),
                Some("TLS established in an unexpected state"),
                None,
            )
            .ok();
            let tls = ProtocolError::tls(format!("TLS established in state {state}"));
            return Err(match error {
                Some(error) => tls.with_stanza(error),
                None => tls,
            });
        }

        session
            .state_holder()
            .transition(SessionState::Encrypted)
            .map_err(|e| ProtocolError::tls(e.to_string()))?;
        session.set_reopening_stream(true);
        debug!("TLS established, expecting a new stream header");
        Ok(())
    }
}
