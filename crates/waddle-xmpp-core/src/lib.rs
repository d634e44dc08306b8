//! # waddle-xmpp-core
//!
//! Transport-independent XMPP server core for Waddle Social.
//!
//! The crate models XML stanzas, renders them, and runs the per-session
//! protocol state machine that decides which handler processes a stanza.
//! Sockets, TLS and SASL mechanisms live in the embedding server; it feeds
//! parsed stanzas in and receives rendered ones through a
//! [`session::StanzaWriter`].
//!
//! ## Architecture
//!
//! - **xml / stanza**: immutable fragment model, builders and renderer
//! - **protocol**: handler dictionaries, lookup, interceptors, state workers
//!   and the [`ProtocolWorker`]
//! - **handlers**: stream negotiation, STARTTLS, dialback, IQ, message and
//!   presence handling
//! - **delivery / s2s**: relays, failure strategies and outbound federation
//!
//! ## Example
//!
//! ```ignore
//! let runtime = Arc::new(
//!     ServerRuntimeContext::builder(CoreConfig::load("xmpp.toml")?)
//!         .add_dictionary(core_dictionary())
//!         .build()?,
//! );
//! let processor = QueuedStanzaProcessor::new(
//!     Arc::new(ProtocolWorker::new(Arc::clone(&runtime))),
//!     &runtime.config().queue,
//! );
//! let session = runtime.new_session(SessionRole::ClientToServer, writer);
//! processor.process_stanza(&session, stanza);
//! ```

pub mod addressing;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod ns;
pub mod protocol;
pub mod resources;
pub mod response;
pub mod runtime;
pub mod s2s;
pub mod session;
pub mod stanza;
pub mod xml;

pub use addressing::{Entity, EntityFormatError};
pub use config::{ConfigError, CoreConfig};
pub use error::{
    HandlerError, ProtocolError, ProtocolErrorKind, StanzaErrorCondition, StanzaErrorType, StreamErrorCondition,
    XmlError,
};
pub use protocol::{
    Handler, HandlerDictionary, ProtocolWorker, QueuedStanzaProcessor, SessionState, StanzaHandler,
    StanzaProcessor,
};
pub use runtime::{ServerRuntimeBuilder, ServerRuntimeContext, SubscriptionLookup};
pub use session::{SessionContext, SessionRole, StanzaWriter};
pub use stanza::{Stanza, StanzaBuilder};
pub use xml::Element;
