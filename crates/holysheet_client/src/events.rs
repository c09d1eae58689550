//! Events the client surfaces to its UI.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::ConnectionStatus;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Status(ConnectionStatus),
    /// A chat message left for the server.
    ChatSent(String),
    ChatResponse(String),
    DatasetReady(Arc<Value>),
    /// `error` envelope from the server, as sent.
    RemoteError(String),
    /// Locally detected problem: rejected input, bad frame, failed load.
    Error(ClientError),
}

/// Sending half of the event stream. Emitting after the receiver is gone is a no-op.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ClientEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
