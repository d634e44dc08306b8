//! Stanza dispatch and the session state machine.
//!
//! A transport feeds parsed stanzas to a [`StanzaProcessor`]. The
//! [`ProtocolWorker`] resolves a handler through the [`StanzaHandlerLookup`],
//! enforces the session's state and addressing rules and runs the handler
//! behind the registered interceptors. [`QueuedStanzaProcessor`] puts a
//! per-session ordered queue in front of it.

pub mod broker;
pub mod dictionary;
pub mod handler;
pub mod interceptor;
pub mod lookup;
pub mod queued;
pub mod response_writer;
pub mod state;
pub mod state_worker;
pub mod worker;

pub use broker::{DefaultStanzaBroker, StanzaBroker};
pub use dictionary::HandlerDictionary;
pub use handler::{Handler, HandlerContext, HandlerRole, StanzaHandler};
pub use interceptor::{InterceptorChain, StanzaHandlerInterceptor};
pub use lookup::StanzaHandlerLookup;
pub use queued::QueuedStanzaProcessor;
pub use state::{SessionState, SessionStateHolder, StateTransitionError};
pub use state_worker::{worker_for, Disposition, StateAwareProtocolWorker};
pub use worker::{ProtocolWorker, StanzaProcessor};
