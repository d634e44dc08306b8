//! Error types for the XMPP protocol core.
//!
//! Structural problems (invalid names, unbalanced builders) are programmer or
//! input errors and surface as [`XmlError`]. Protocol violations travel as
//! [`ProtocolError`], which may carry a pre-built error stanza that the
//! response writer sends before closing the stream.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::stanza::Stanza;

/// Structural errors raised while building or rendering XML fragments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    /// Element name or namespace prefix violates the XML Name grammar.
    #[error("invalid XML name: {0:?}")]
    InvalidName(String),

    /// The builder has already produced its element.
    #[error("element has already been built")]
    AlreadyBuilt,

    /// `end_inner_element` was called without a matching start.
    #[error("unbalanced element structure: {0}")]
    UnbalancedStructure(String),

    /// The renderer met a fragment it cannot serialize.
    #[error("unsupported fragment type: {0}")]
    UnsupportedFragmentType(String),

    /// Text could not be parsed into a fragment tree.
    #[error("XML parse error: {0}")]
    Parse(String),
}

impl XmlError {
    /// Create a new invalid-name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Create a new unbalanced-structure error.
    pub fn unbalanced(msg: impl Into<String>) -> Self {
        Self::UnbalancedStructure(msg.into())
    }

    /// Create a new parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// TLS negotiation was signalled in the wrong session state.
    Tls,
    /// The stream header was rejected.
    StreamStart,
    /// The stanza is not legal in the current session state.
    IllegalState,
    /// The stanza is malformed.
    BadRequest,
    /// Any other protocol violation.
    Other,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tls => "tls",
            Self::StreamStart => "stream-start",
            Self::IllegalState => "illegal-state",
            Self::BadRequest => "bad-request",
            Self::Other => "protocol",
        };
        f.write_str(name)
    }
}

/// A protocol violation, optionally carrying the error stanza to send back.
///
/// When `error_stanza` is `None` the response writer falls back to a
/// `bad-format` stream error.
#[derive(Debug, Clone, Error)]
#[error("{kind} protocol error: {message}")]
pub struct ProtocolError {
    /// What went wrong.
    pub kind: ProtocolErrorKind,
    /// Human readable detail for logs.
    pub message: String,
    /// Pre-built response, written verbatim before the stream is closed.
    pub error_stanza: Option<Stanza>,
}

impl ProtocolError {
    /// Create a protocol error without a response payload.
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_stanza: None,
        }
    }

    /// Attach the error stanza written back to the peer.
    pub fn with_stanza(mut self, stanza: Stanza) -> Self {
        self.error_stanza = Some(stanza);
        self
    }

    /// TLS was reported established outside of `EncryptionStarted`.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Tls, message)
    }

    /// The stream header was rejected.
    pub fn stream_start(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::StreamStart, message)
    }

    /// The stanza is malformed.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::BadRequest, message)
    }
}

/// Errors raised while registering handlers at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictionaryError {
    /// The dictionary was sealed and no longer accepts handlers.
    #[error("dictionary {0:?} is sealed")]
    Sealed(String),

    /// A handler with the same name is already registered.
    #[error("handler {handler:?} already registered in dictionary {dictionary:?}")]
    DuplicateHandler {
        /// Dictionary name
        dictionary: String,
        /// Handler name
        handler: String,
    },
}

/// Errors returned by a stanza handler.
///
/// Protocol errors are answered by the state-aware worker; internal errors
/// are contained and logged by the protocol worker.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The peer violated the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A response could not be built.
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// The relay refused the stanza.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// A collaborator (storage, relay, connector) failed.
    #[error("handler failure: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Create an internal handler error from a message.
    pub fn internal(msg: impl fmt::Display) -> Self {
        Self::Internal(anyhow::anyhow!("{msg}"))
    }
}

/// Errors raised while delivering a stanza.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The receiver has no account on this server.
    #[error("no such local user: {0}")]
    NoSuchLocalUser(String),

    /// The receiver exists but has no available session.
    #[error("local recipient offline: {0}")]
    LocalRecipientOffline(String),

    /// The receiver's server could not be reached.
    #[error("remote server unreachable: {0}")]
    RemoteUnreachable(String),

    /// Delivery failed for another reason.
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl DeliveryError {
    /// Create a generic delivery failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// XMPP stream error conditions (RFC 3920 Section 4.7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorCondition {
    BadFormat,
    BadNamespacePrefix,
    Conflict,
    ConnectionTimeout,
    HostGone,
    HostUnknown,
    ImproperAddressing,
    InternalServerError,
    InvalidFrom,
    InvalidId,
    InvalidNamespace,
    InvalidXml,
    NotAuthorized,
    PolicyViolation,
    RemoteConnectionFailed,
    ResourceConstraint,
    RestrictedXml,
    SeeOtherHost,
    SystemShutdown,
    UndefinedCondition,
    UnsupportedEncoding,
    UnsupportedStanzaType,
    UnsupportedVersion,
    XmlNotWellFormed,
}

impl StreamErrorCondition {
    /// Every defined condition, in RFC order.
    pub const ALL: [StreamErrorCondition; 24] = [
        Self::BadFormat,
        Self::BadNamespacePrefix,
        Self::Conflict,
        Self::ConnectionTimeout,
        Self::HostGone,
        Self::HostUnknown,
        Self::ImproperAddressing,
        Self::InternalServerError,
        Self::InvalidFrom,
        Self::InvalidId,
        Self::InvalidNamespace,
        Self::InvalidXml,
        Self::NotAuthorized,
        Self::PolicyViolation,
        Self::RemoteConnectionFailed,
        Self::ResourceConstraint,
        Self::RestrictedXml,
        Self::SeeOtherHost,
        Self::SystemShutdown,
        Self::UndefinedCondition,
        Self::UnsupportedEncoding,
        Self::UnsupportedStanzaType,
        Self::UnsupportedVersion,
        Self::XmlNotWellFormed,
    ];

    /// Get the element name of the condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadFormat => "bad-format",
            Self::BadNamespacePrefix => "bad-namespace-prefix",
            Self::Conflict => "conflict",
            Self::ConnectionTimeout => "connection-timeout",
            Self::HostGone => "host-gone",
            Self::HostUnknown => "host-unknown",
            Self::ImproperAddressing => "improper-addressing",
            Self::InternalServerError => "internal-server-error",
            Self::InvalidFrom => "invalid-from",
            Self::InvalidId => "invalid-id",
            Self::InvalidNamespace => "invalid-namespace",
            Self::InvalidXml => "invalid-xml",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::ResourceConstraint => "resource-constraint",
            Self::RestrictedXml => "restricted-xml",
            Self::SeeOtherHost => "see-other-host",
            Self::SystemShutdown => "system-shutdown",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnsupportedEncoding => "unsupported-encoding",
            Self::UnsupportedStanzaType => "unsupported-stanza-type",
            Self::UnsupportedVersion => "unsupported-version",
            Self::XmlNotWellFormed => "xml-not-well-formed",
        }
    }
}

impl fmt::Display for StreamErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamErrorCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|condition| condition.as_str() == s)
            .ok_or_else(|| format!("unknown stream error condition: {s}"))
    }
}

/// XMPP stanza error conditions (RFC 3920 Section 9.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaErrorCondition {
    /// Bad request
    BadRequest,
    /// Conflict
    Conflict,
    /// Feature not implemented
    FeatureNotImplemented,
    /// Forbidden
    Forbidden,
    /// Gone
    Gone,
    /// Internal server error
    InternalServerError,
    /// Item not found
    ItemNotFound,
    /// JID malformed
    JidMalformed,
    /// Not acceptable
    NotAcceptable,
    /// Not allowed
    NotAllowed,
    /// Not authorized
    NotAuthorized,
    /// Payment required
    PaymentRequired,
    /// Recipient unavailable
    RecipientUnavailable,
    /// Redirect
    Redirect,
    /// Registration required
    RegistrationRequired,
    /// Remote server not found
    RemoteServerNotFound,
    /// Remote server timeout
    RemoteServerTimeout,
    /// Resource constraint
    ResourceConstraint,
    /// Service unavailable
    ServiceUnavailable,
    /// Subscription required
    SubscriptionRequired,
    /// Undefined condition
    UndefinedCondition,
    /// Unexpected request
    UnexpectedRequest,
    /// Sender address does not belong to the stream
    UnknownSender,
}

impl StanzaErrorCondition {
    pub const ALL: [StanzaErrorCondition; 23] = [
        Self::BadRequest,
        Self::Conflict,
        Self::FeatureNotImplemented,
        Self::Forbidden,
        Self::Gone,
        Self::InternalServerError,
        Self::ItemNotFound,
        Self::JidMalformed,
        Self::NotAcceptable,
        Self::NotAllowed,
        Self::NotAuthorized,
        Self::PaymentRequired,
        Self::RecipientUnavailable,
        Self::Redirect,
        Self::RegistrationRequired,
        Self::RemoteServerNotFound,
        Self::RemoteServerTimeout,
        Self::ResourceConstraint,
        Self::ServiceUnavailable,
        Self::SubscriptionRequired,
        Self::UndefinedCondition,
        Self::UnexpectedRequest,
        Self::UnknownSender,
    ];

    /// Get the XML element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PaymentRequired => "payment-required",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::Redirect => "redirect",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
            Self::UnknownSender => "unknown-sender",
        }
    }
}

impl fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StanzaErrorCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|condition| condition.as_str() == s)
            .ok_or_else(|| format!("unknown stanza error condition: {s}"))
    }
}

/// XMPP stanza error types (RFC 3920 Section 9.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Proceed (the condition was only a warning)
    Continue,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Continue => "continue",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StanzaErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(Self::Auth),
            "cancel" => Ok(Self::Cancel),
            "continue" => Ok(Self::Continue),
            "modify" => Ok(Self::Modify),
            "wait" => Ok(Self::Wait),
            other => Err(format!("unknown stanza error type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_condition_names() {
        assert_eq!(StreamErrorCondition::BadFormat.as_str(), "bad-format");
        assert_eq!(
            StreamErrorCondition::UnsupportedStanzaType.to_string(),
            "unsupported-stanza-type"
        );
        assert_eq!(
            StreamErrorCondition::XmlNotWellFormed.as_str(),
            "xml-not-well-formed"
        );
    }

    #[test]
    fn test_stream_condition_parse() {
        for condition in StreamErrorCondition::ALL {
            let parsed: StreamErrorCondition = condition.as_str().parse().unwrap();
            assert_eq!(parsed, condition);
        }
        assert!("no-such-condition".parse::<StreamErrorCondition>().is_err());
    }

    #[test]
    fn test_stanza_condition_parse() {
        assert_eq!(
            "unknown-sender".parse::<StanzaErrorCondition>(),
            Ok(StanzaErrorCondition::UnknownSender)
        );
        assert_eq!(
            StanzaErrorCondition::ServiceUnavailable.to_string(),
            "service-unavailable"
        );
        assert!("no-such-condition".parse::<StanzaErrorCondition>().is_err());
    }

    #[test]
    fn test_stanza_error_type_parse() {
        assert_eq!("modify".parse::<StanzaErrorType>(), Ok(StanzaErrorType::Modify));
        assert_eq!(StanzaErrorType::Continue.as_str(), "continue");
        assert!("retry".parse::<StanzaErrorType>().is_err());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::tls("not in encryption-started state");
        assert_eq!(err.kind, ProtocolErrorKind::Tls);
        assert!(err.error_stanza.is_none());
        assert_eq!(
            err.to_string(),
            "tls protocol error: not in encryption-started state"
        );
    }

    #[test]
    fn test_handler_error_conversion() {
        let err: HandlerError = ProtocolError::bad_request("missing id").into();
        assert!(matches!(err, HandlerError::Protocol(_)));

        let err: HandlerError = anyhow::anyhow!("storage down").into();
        assert!(err.to_string().contains("storage down"));
    }
}
