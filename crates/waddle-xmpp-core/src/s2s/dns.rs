//! Candidate discovery for outbound server connections (RFC 6120 3.2).
//!
//! `_xmpp-server._tcp.{domain}` SRV records are tried first; without
//! usable records the domain itself is the only candidate on port 5269.
//! Candidates are ordered by priority (ascending), then weight
//! (descending).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, ResolveErrorKind, Resolver};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default server-to-server port.
pub const DEFAULT_S2S_PORT: u16 = 5269;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("no DNS records found for domain: {0}")]
    NoRecords(String),

    #[error("DNS resolution failed for {domain}: {message}")]
    ResolutionFailed { domain: String, message: String },
}

/// One address to try for a remote domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedTarget {
    pub host: String,
    pub port: u16,
    /// Lower is tried first
    pub priority: u16,
    /// Higher is tried first within one priority
    pub weight: u16,
}

impl ResolvedTarget {
    pub fn new(host: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            host: host.into(),
            port,
            priority,
            weight,
        }
    }

    /// The domain itself on the default port.
    pub fn fallback(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_S2S_PORT, 0, 0)
    }
}

impl std::fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Order candidates: priority ascending, weight descending.
pub fn sort_targets(targets: &mut [ResolvedTarget]) {
    targets.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
}

/// Source of connection candidates for a remote domain.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Candidates in the order they should be tried.
    async fn resolve(&self, domain: &str) -> Result<Vec<ResolvedTarget>, DnsError>;
}

type TokioResolver = Resolver<TokioConnectionProvider>;

/// Resolver backed by the system DNS configuration.
#[derive(Clone)]
pub struct SrvResolver {
    resolver: Arc<TokioResolver>,
}

impl SrvResolver {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default(), ResolverOpts::default())
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self {
            resolver: Arc::new(resolver),
        }
    }

    async fn resolve_fallback(&self, domain: &str) -> Result<Vec<ResolvedTarget>, DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(response) if response.iter().next().is_some() => {
                Ok(vec![ResolvedTarget::fallback(domain)])
            }
            Ok(_) => Err(DnsError::NoRecords(domain.to_string())),
            Err(e) => {
                warn!(error = %e, domain = %domain, "A/AAAA fallback lookup failed");
                Err(DnsError::ResolutionFailed {
                    domain: domain.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl Default for SrvResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn srv_targets(records: &[SRV]) -> Vec<ResolvedTarget> {
    records
        .iter()
        .filter_map(|srv| {
            let target = srv.target().to_utf8();
            // "." means the service is decidedly not available
            let host = target.trim_end_matches('.');
            if host.is_empty() {
                return None;
            }
            Some(ResolvedTarget::new(
                host,
                srv.port(),
                srv.priority(),
                srv.weight(),
            ))
        })
        .collect()
}

// hickory 0.25 reports a missing record set as a proto error.
fn is_no_records_error(error: &ResolveError) -> bool {
    match error.kind() {
        ResolveErrorKind::Proto(proto) => {
            matches!(proto.kind(), ProtoErrorKind::NoRecordsFound { .. })
        }
        _ => false,
    }
}

#[async_trait]
impl TargetResolver for SrvResolver {
    #[instrument(skip(self), name = "xmpp.s2s.resolve")]
    async fn resolve(&self, domain: &str) -> Result<Vec<ResolvedTarget>, DnsError> {
        let srv_name = format!("_xmpp-server._tcp.{domain}");
        let records = match self.resolver.srv_lookup(&srv_name).await {
            Ok(response) => response.iter().cloned().collect::<Vec<SRV>>(),
            Err(e) if is_no_records_error(&e) => Vec::new(),
            Err(e) => {
                warn!(error = %e, srv_name = %srv_name, "SRV lookup failed");
                Vec::new()
            }
        };

        let mut targets = srv_targets(&records);
        if targets.is_empty() {
            debug!(domain = %domain, "No usable SRV records, trying the domain itself");
            return self.resolve_fallback(domain).await;
        }
        sort_targets(&mut targets);
        debug!(domain = %domain, count = targets.len(), "Resolved server candidates");
        Ok(targets)
    }
}

/// Fixed candidates per domain, for tests and statically configured peers.
#[derive(Debug, Default, Clone)]
pub struct StaticTargetResolver {
    targets: HashMap<String, Vec<ResolvedTarget>>,
}

impl StaticTargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(mut self, domain: &str, targets: Vec<ResolvedTarget>) -> Self {
        self.targets.insert(domain.to_lowercase(), targets);
        self
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<ResolvedTarget>, DnsError> {
        let mut targets = self
            .targets
            .get(&domain.to_lowercase())
            .cloned()
            .ok_or_else(|| DnsError::NoRecords(domain.to_string()))?;
        sort_targets(&mut targets);
        Ok(targets)
    }
}
