//! Interceptors wrapped around handler execution.
//!
//! The chain is built fresh for every stanza. Each interceptor receives the
//! remaining chain by value and must call [`InterceptorChain::proceed`] to
//! let processing continue, optionally with a different stanza or broker.

use std::sync::Arc;

use crate::error::HandlerError;
use crate::protocol::broker::StanzaBroker;
use crate::protocol::handler::{Handler, HandlerContext};
use crate::stanza::Stanza;

/// Hook run before a handler.
pub trait StanzaHandlerInterceptor: Send + Sync {
    fn intercept(
        &self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
        chain: InterceptorChain<'_>,
    ) -> Result<(), HandlerError>;
}

/// The interceptors still to run, followed by the handler.
pub struct InterceptorChain<'a> {
    interceptors: &'a [Arc<dyn StanzaHandlerInterceptor>],
    handler: &'a Handler,
}

impl<'a> InterceptorChain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn StanzaHandlerInterceptor>], handler: &'a Handler) -> Self {
        Self {
            interceptors,
            handler,
        }
    }

    /// Run the next interceptor, or the handler once none are left.
    pub fn proceed(
        self,
        stanza: Stanza,
        ctx: &HandlerContext<'_>,
        broker: &dyn StanzaBroker,
    ) -> Result<(), HandlerError> {
        match self.interceptors.split_first() {
            Some((next, rest)) => next.intercept(
                stanza,
                ctx,
                broker,
                InterceptorChain {
                    interceptors: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.execute(stanza, ctx, broker),
        }
    }

    /// Interceptors not yet run.
    pub fn remaining(&self) -> usize {
        self.interceptors.len()
    }
}
