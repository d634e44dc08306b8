//! Handler dictionaries.
//!
//! Modules contribute their handlers in dictionaries. A dictionary is
//! optionally scoped to one namespace and is sealed when the runtime is
//! built; from then on its handler set never changes.

use std::fmt;

use tracing::debug;

use crate::error::DictionaryError;
use crate::protocol::handler::Handler;
use crate::stanza::Stanza;

/// Ordered, sealable collection of handlers.
pub struct HandlerDictionary {
    name: String,
    namespace: Option<String>,
    handlers: Vec<Handler>,
    sealed: bool,
}

impl HandlerDictionary {
    /// A dictionary consulted for every stanza.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            handlers: Vec::new(),
            sealed: false,
        }
    }

    /// A dictionary consulted only for stanzas in `namespace`.
    pub fn for_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether the dictionary is consulted for stanzas keyed by `namespace`.
    pub fn covers(&self, namespace: &str) -> bool {
        self.namespace.as_deref().map_or(true, |ns| ns == namespace)
    }

    /// Append a handler. Fails once sealed, or when a handler of the same
    /// name is already registered.
    pub fn register(&mut self, handler: Handler) -> Result<(), DictionaryError> {
        if self.sealed {
            return Err(DictionaryError::Sealed(self.name.clone()));
        }
        if self.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(DictionaryError::DuplicateHandler {
                dictionary: self.name.clone(),
                handler: handler.name().to_string(),
            });
        }
        debug!(dictionary = %self.name, handler = %handler.name(), "Registered handler");
        self.handlers.push(handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_handler(mut self, handler: Handler) -> Result<Self, DictionaryError> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// First registered handler verifying `stanza`.
    pub fn get(&self, stanza: &Stanza) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.verify(stanza))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDictionary")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("handlers", &self.handlers)
            .field("sealed", &self.sealed)
            .finish()
    }
}
