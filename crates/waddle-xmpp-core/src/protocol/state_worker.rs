//! Per-state execution policy.
//!
//! Every [`SessionState`] has a worker deciding which handler roles may run
//! while the session is in that state. [`worker_for`] is the lookup table.

use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::protocol::handler::{Handler, HandlerContext, HandlerRole};
use crate::protocol::interceptor::InterceptorChain;
use crate::protocol::response_writer;
use crate::protocol::SessionState;
use crate::stanza::Stanza;

/// What a state worker does with a handler of a given role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Run the interceptor chain and the handler.
    Execute,
    /// Answer with an `unsupported-stanza-type` stream error.
    Unsupported,
    /// Drop the stanza silently.
    Discard,
}

/// Execution policy of one session state.
pub trait StateAwareProtocolWorker: Send + Sync {
    fn state(&self) -> SessionState;

    fn disposition(&self, role: HandlerRole) -> Disposition;

    /// Apply the policy to `stanza` and, when allowed, run `handler`
    /// behind the runtime's interceptors.
    ///
    /// Protocol errors are answered on the session here; every other
    /// handler error is returned to the caller.
    fn process_stanza(
        &self,
        stanza: Stanza,
        handler: &Handler,
        ctx: &HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let session = ctx.session;
        match self.disposition(handler.unwrapped_role()) {
            Disposition::Execute => {}
            Disposition::Unsupported => {
                response_writer::handle_unsupported_stanza_type(session, &stanza);
                return Ok(());
            }
            Disposition::Discard => {
                if self.state().is_open() {
                    warn!(
                        session_id = %session.id(),
                        state = %self.state(),
                        handler = handler.name(),
                        "Discarding stanza"
                    );
                } else {
                    debug!(
                        session_id = %session.id(),
                        state = %self.state(),
                        "Ignoring stanza on closed session"
                    );
                }
                return Ok(());
            }
        }

        let broker = ctx.runtime.broker_for(Some(session.as_ref()));
        let chain = InterceptorChain::new(ctx.runtime.interceptors(), handler);
        match chain.proceed(stanza.clone(), ctx, &broker) {
            Err(HandlerError::Protocol(error)) => {
                response_writer::handle_protocol_error(session, &error, &stanza);
                Ok(())
            }
            other => other,
        }
    }
}

/// Before anything was received: only the prolog and a stream header.
#[derive(Debug)]
pub struct InitiatedWorker {
    state: SessionState,
}

impl StateAwareProtocolWorker for InitiatedWorker {
    fn state(&self) -> SessionState {
        self.state
    }

    fn disposition(&self, role: HandlerRole) -> Disposition {
        match role {
            HandlerRole::XmlProlog | HandlerRole::StreamStart => Disposition::Execute,
            _ => Disposition::Unsupported,
        }
    }
}

/// Stream started: negotiation only.
#[derive(Debug)]
pub struct StartedWorker;

impl StateAwareProtocolWorker for StartedWorker {
    fn state(&self) -> SessionState {
        SessionState::Started
    }

    fn disposition(&self, role: HandlerRole) -> Disposition {
        match role {
            HandlerRole::StartTls
            | HandlerRole::Sasl
            | HandlerRole::InBandRegistration
            | HandlerRole::Dialback
            | HandlerRole::StreamStart
            | HandlerRole::XmlProlog => Disposition::Execute,
            HandlerRole::Generic => Disposition::Unsupported,
        }
    }
}

/// TLS handshake in progress; the transport owns the bytes.
#[derive(Debug)]
pub struct EncryptionStartedWorker;

impl StateAwareProtocolWorker for EncryptionStartedWorker {
    fn state(&self) -> SessionState {
        SessionState::EncryptionStarted
    }

    fn disposition(&self, _role: HandlerRole) -> Disposition {
        Disposition::Discard
    }
}

/// TLS up, waiting for the restarted stream and authentication.
#[derive(Debug)]
pub struct EncryptedWorker;

impl StateAwareProtocolWorker for EncryptedWorker {
    fn state(&self) -> SessionState {
        SessionState::Encrypted
    }

    fn disposition(&self, role: HandlerRole) -> Disposition {
        match role {
            HandlerRole::StreamStart
            | HandlerRole::XmlProlog
            | HandlerRole::Sasl
            | HandlerRole::InBandRegistration
            | HandlerRole::Dialback => Disposition::Execute,
            HandlerRole::StartTls | HandlerRole::Generic => Disposition::Unsupported,
        }
    }
}

/// Authenticated: everything but renegotiation.
#[derive(Debug)]
pub struct AuthenticatedWorker;

impl StateAwareProtocolWorker for AuthenticatedWorker {
    fn state(&self) -> SessionState {
        SessionState::Authenticated
    }

    fn disposition(&self, role: HandlerRole) -> Disposition {
        match role {
            HandlerRole::StartTls | HandlerRole::Sasl => Disposition::Unsupported,
            _ => Disposition::Execute,
        }
    }
}

/// Ended or closed: nothing runs anymore.
#[derive(Debug)]
pub struct EndedWorker {
    state: SessionState,
}

impl StateAwareProtocolWorker for EndedWorker {
    fn state(&self) -> SessionState {
        self.state
    }

    fn disposition(&self, _role: HandlerRole) -> Disposition {
        Disposition::Discard
    }
}

static UNCONNECTED: InitiatedWorker = InitiatedWorker {
    state: SessionState::Unconnected,
};
static INITIATED: InitiatedWorker = InitiatedWorker {
    state: SessionState::Initiated,
};
static STARTED: StartedWorker = StartedWorker;
static ENCRYPTION_STARTED: EncryptionStartedWorker = EncryptionStartedWorker;
static ENCRYPTED: EncryptedWorker = EncryptedWorker;
static AUTHENTICATED: AuthenticatedWorker = AuthenticatedWorker;
static ENDED: EndedWorker = EndedWorker {
    state: SessionState::Ended,
};
static CLOSED: EndedWorker = EndedWorker {
    state: SessionState::Closed,
};

/// The worker responsible for `state`.
pub fn worker_for(state: SessionState) -> &'static dyn StateAwareProtocolWorker {
    match state {
        SessionState::Unconnected => &UNCONNECTED,
        SessionState::Initiated => &INITIATED,
        SessionState::Started => &STARTED,
        SessionState::EncryptionStarted => &ENCRYPTION_STARTED,
        SessionState::Encrypted => &ENCRYPTED,
        SessionState::Authenticated => &AUTHENTICATED,
        SessionState::Ended => &ENDED,
        SessionState::Closed => &CLOSED,
    }
}
