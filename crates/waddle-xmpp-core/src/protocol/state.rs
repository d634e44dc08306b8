//! Session lifecycle states.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

/// Where a session is in its lifecycle.
///
/// States only move forward; the ordering of the variants is the ordering
/// of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Transport is up, nothing received yet
    Unconnected,
    /// Waiting for the first stream header
    Initiated,
    /// Stream header received and answered
    Started,
    /// STARTTLS accepted, handshake running in the transport
    EncryptionStarted,
    /// TLS is up, a fresh stream header is expected
    Encrypted,
    /// SASL (or dialback) succeeded
    Authenticated,
    /// Closing, no more stanzas are processed
    Ended,
    /// Transport closed
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Initiated => "initiated",
            Self::Started => "started",
            Self::EncryptionStarted => "encryption_started",
            Self::Encrypted => "encrypted",
            Self::Authenticated => "authenticated",
            Self::Ended => "ended",
            Self::Closed => "closed",
        }
    }

    /// Whether stanzas may still be processed in this state.
    pub fn is_open(&self) -> bool {
        *self < Self::Ended
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition would move the session backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session state transition from {from} to {to}")]
pub struct StateTransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Owns one session's state behind a lock.
///
/// Only the protocol worker and the handshake handlers acting for the
/// session call [`SessionStateHolder::transition`]; everyone else reads.
#[derive(Debug)]
pub struct SessionStateHolder {
    state: Mutex<SessionState>,
}

impl SessionStateHolder {
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next`. Staying in the current state is a no-op; moving
    /// backwards fails and leaves the state untouched.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, StateTransitionError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = *state;
        if next < current {
            return Err(StateTransitionError {
                from: current,
                to: next,
            });
        }
        if next != current {
            debug!(from = %current, to = %next, "Session state transition");
            *state = next;
        }
        Ok(current)
    }
}

impl Default for SessionStateHolder {
    fn default() -> Self {
        Self::new(SessionState::Initiated)
    }
}
