//! Inbound envelope router. One handler per kind; unknown kinds and
//! malformed frames go to the error path instead of panicking.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::envelope::Envelope;
use crate::error::ClientError;

/// Handles the payload of one envelope kind. Returns a protocol error when
/// the payload does not have the expected shape.
pub type Handler = Box<dyn FnMut(Value) -> Result<(), ClientError> + Send>;
type ErrorHandler = Box<dyn FnMut(ClientError) + Send>;

pub struct MessageRouter {
    handlers: HashMap<String, Handler>,
    on_error: ErrorHandler,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    /// Router whose error path only logs.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            on_error: Box::new(|e| warn!(error = %e, "dropping inbound message")),
        }
    }

    /// Replace the error path (unknown kinds, malformed frames, handler failures).
    pub fn on_error(&mut self, handler: impl FnMut(ClientError) + Send + 'static) {
        self.on_error = Box::new(handler);
    }

    /// Bind `handler` to `kind`. Re-registering a kind replaces the old handler.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: impl FnMut(Value) -> Result<(), ClientError> + Send + 'static,
    ) {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Hand the payload to the handler for its kind.
    pub fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { kind, payload } = envelope;
        let result = match self.handlers.get_mut(&kind) {
            Some(handler) => handler(payload),
            None => Err(ClientError::Protocol(format!("unknown message kind: {}", kind))),
        };
        if let Err(e) = result {
            (self.on_error)(e);
        }
    }

    /// Parse one raw frame and dispatch it. Parse failures never reach handlers.
    pub fn route_frame(&mut self, frame: &str) {
        match Envelope::from_text(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => (self.on_error)(e),
        }
    }
}
