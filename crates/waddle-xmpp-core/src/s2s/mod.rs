//! Server-to-server federation plumbing.
//!
//! - [`dns`]: candidate discovery through SRV records
//! - [`registry`]: one outbound connector per remote domain
//! - [`relay`]: routing of stanzas for foreign domains
//! - [`dialback`]: XEP-0220 keys
//!
//! The wire side of a connector (TCP, TLS, stream negotiation) is supplied
//! by the transport through [`ConnectorFactory`].

pub mod dialback;
pub mod dns;
pub mod registry;
pub mod relay;

pub use dialback::{DialbackKey, DialbackOutcome};
pub use dns::{sort_targets, DnsError, ResolvedTarget, SrvResolver, StaticTargetResolver, TargetResolver};
pub use registry::{
    ConnectPurpose, ConnectorError, ConnectorFactory, PendingConnection, S2sConnector, S2sConnectorRegistry,
};
pub use relay::FederatingStanzaRelay;
