//! Stanza handler capability set.
//!
//! A handler answers two questions: does it accept a stanza
//! ([`StanzaHandler::verify`]) and what to do with it
//! ([`StanzaHandler::execute`]). Handlers are registered once at bootstrap
//! and shared by every session, so they carry no per-session state.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::runtime::ServerRuntimeContext;
use crate::session::SessionContext;
use crate::stanza::Stanza;

/// What a handler does as far as the per-state workers are concerned.
///
/// Workers only let a handler run when its role is legal in the current
/// session state; everything that is neither handshake nor registration is
/// [`HandlerRole::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerRole {
    /// `<?xml ...?>` prolog
    XmlProlog,
    /// `<stream:stream>` header
    StreamStart,
    /// STARTTLS negotiation
    StartTls,
    /// SASL negotiation
    Sasl,
    /// XEP-0077 in-band registration, the only core stanza allowed before
    /// authentication
    InBandRegistration,
    /// XEP-0220 server dialback
    Dialback,
    /// Anything else
    Generic,
}

impl HandlerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XmlProlog => "xml_prolog",
            Self::StreamStart => "stream_start",
            Self::StartTls => "starttls",
            Self::Sasl => "sasl",
            Self::InBandRegistration => "in_band_registration",
            Self::Dialback => "dialback",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for HandlerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a handler may touch while executing.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub runtime: &'a ServerRuntimeContext,
    pub session: &'a Arc<SessionContext>,
    /// `true` when the stanza was sent by a local client and travels away
    /// from it; `false` for stanzas received from a federated server.
    pub is_outbound: bool,
}

impl<'a> HandlerContext<'a> {
    pub fn new(runtime: &'a ServerRuntimeContext, session: &'a Arc<SessionContext>) -> Self {
        Self {
            runtime,
            session,
            is_outbound: !session.is_server_to_server(),
        }
    }
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session", &self.session.id())
            .field("is_outbound", &self.is_outbound)
            .finish()
    }
}

/// A stanza handler.
pub trait StanzaHandler: Send + Sync {
    /// Stable name, used for duplicate detection and logging.
    fn name(&self) -> &str;

    /// Whether this handler accepts `stanza`.
    fn verify(&self, stanza: &Stanza) -> bool;

    /// Whether the handler needs a live session to run.
    fn is_session_required(&self) -> bool {
        true
    }

    fn role(&self) -> HandlerRole {
        HandlerRole::Generic
    }

    /// Process `stanza`. Responses and relayed stanzas go through `broker`.
    fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError>;
}

/// A resolved handler.
///
/// `Delegating` wraps another handler transparently: it answers to its own
/// name but verifies and executes through `inner`, and its role is the
/// role of whatever it finally wraps.
#[derive(Clone)]
pub enum Handler {
    Direct(Arc<dyn StanzaHandler>),
    Delegating { name: String, inner: Box<Handler> },
}

impl Handler {
    pub fn direct(handler: impl StanzaHandler + 'static) -> Self {
        Self::Direct(Arc::new(handler))
    }

    pub fn delegating(name: impl Into<String>, inner: Handler) -> Self {
        Self::Delegating {
            name: name.into(),
            inner: Box::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Direct(handler) => handler.name(),
            Self::Delegating { name, .. } => name,
        }
    }

    pub fn verify(&self, stanza: &Stanza) -> bool {
        match self {
            Self::Direct(handler) => handler.verify(stanza),
            Self::Delegating { inner, .. } => inner.verify(stanza),
        }
    }

    pub fn is_session_required(&self) -> bool {
        match self {
            Self::Direct(handler) => handler.is_session_required(),
            Self::Delegating { inner, .. } => inner.is_session_required(),
        }
    }

    /// The handler at the bottom of any delegation.
    pub fn innermost(&self) -> &Arc<dyn StanzaHandler> {
        match self {
            Self::Direct(handler) => handler,
            Self::Delegating { inner, .. } => inner.innermost(),
        }
    }

    /// Role of the innermost handler.
    pub fn unwrapped_role(&self) -> HandlerRole {
        self.innermost().role()
    }

    pub fn execute(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        self.innermost().execute(stanza, ctx, broker)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(handler) => f.debug_tuple("Direct").field(&handler.name()).finish(),
            Self::Delegating { name, inner } => f
                .debug_struct("Delegating")
                .field("name", name)
                .field("inner", inner)
                .finish(),
        }
    }
}
