//! Relay that hands stanzas for foreign domains to the connector registry.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::addressing::Entity;
use crate::delivery::{DeliveryFailureStrategy, StanzaRelay};
use crate::error::DeliveryError;
use crate::ns;
use crate::s2s::registry::S2sConnectorRegistry;
use crate::session::SessionContext;
use crate::stanza::{Stanza, StanzaBuilder};

/// Local receivers go to the wrapped relay; everything else is written to
/// the remote domain's connector in the server namespace.
///
/// Remote delivery is asynchronous: `relay` returns once the stanza is
/// queued and reports later failures through the failure strategy as
/// [`DeliveryError::RemoteUnreachable`]. Failures detected before queueing
/// go to the strategy as well and are also returned.
pub struct FederatingStanzaRelay {
    server: Entity,
    local: Arc<dyn StanzaRelay>,
    connectors: Arc<S2sConnectorRegistry>,
}

impl FederatingStanzaRelay {
    pub fn new(
        server: Entity,
        local: Arc<dyn StanzaRelay>,
        connectors: Arc<S2sConnectorRegistry>,
    ) -> Self {
        Self {
            server,
            local,
            connectors,
        }
    }
}

impl StanzaRelay for FederatingStanzaRelay {
    fn relay(
        &self,
        session: Option<&SessionContext>,
        receiver: &Entity,
        stanza: Stanza,
        strategy: Arc<dyn DeliveryFailureStrategy>,
    ) -> Result<(), DeliveryError> {
        if receiver.is_addressing_server(&self.server) {
            return self.local.relay(session, receiver, stanza, strategy);
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(receiver = %receiver, "No async runtime for outbound federation");
            let error = DeliveryError::RemoteUnreachable(receiver.domain().to_string());
            return Err(report(&stanza, error, strategy.as_ref()));
        };
        let outbound = match StanzaBuilder::rewrite_namespace(&stanza, ns::JABBER_CLIENT, ns::JABBER_SERVER) {
            Ok(outbound) => outbound,
            Err(e) => return Err(report(&stanza, DeliveryError::failed(e.to_string()), strategy.as_ref())),
        };

        let connectors = Arc::clone(&self.connectors);
        let receiver = receiver.clone();
        handle.spawn(async move {
            let written = match connectors.connect(&receiver).await {
                Ok(connector) => connector.write(&outbound),
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => debug!(receiver = %receiver, "Stanza handed to s2s connector"),
                Err(e) => {
                    warn!(receiver = %receiver, error = %e, "Outbound federation failed");
                    let error = DeliveryError::RemoteUnreachable(receiver.domain().to_string());
                    report(&stanza, error, strategy.as_ref());
                }
            }
        });
        Ok(())
    }
}

/// Pass a failed delivery to `strategy` and hand the error back.
fn report(stanza: &Stanza, error: DeliveryError, strategy: &dyn DeliveryFailureStrategy) -> DeliveryError {
    if let Err(e) = strategy.process(stanza, Some(&error)) {
        warn!(error = %e, "Delivery failure strategy failed");
    }
    error
}
