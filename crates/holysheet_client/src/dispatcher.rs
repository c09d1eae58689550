//! Command dispatcher: turns user actions into outbound envelopes.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::dataset::DatasetLoader;
use crate::envelope::{kind, ChatRequest, Envelope};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventSink};
use crate::session::SharedSession;

/// Where outbound envelopes go. Returns false when the envelope was dropped.
pub trait Outbound: Send + Sync {
    fn send(&self, envelope: &Envelope) -> bool;
}

impl Outbound for ConnectionManager {
    fn send(&self, envelope: &Envelope) -> bool {
        ConnectionManager::send(self, envelope)
    }
}

/// Canned prompts behind the quick-action buttons.
pub const QUICK_ACTIONS: [(&str, &str); 4] = [
    (
        "analyze",
        "Analyze this financial data. What patterns, trends, or insights do you see?",
    ),
    (
        "clean",
        "Help me clean up this data. Identify duplicates, formatting issues, missing values, or inconsistencies.",
    ),
    (
        "trends",
        "What financial trends can you identify in this data over time? Any concerning patterns or opportunities?",
    ),
    (
        "formulas",
        "Suggest useful Excel/Google Sheets formulas for this financial data. Include specific cell references.",
    ),
];

pub fn quick_action_prompt(key: &str) -> Option<&'static str> {
    QUICK_ACTIONS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, prompt)| *prompt)
}

pub struct CommandDispatcher {
    session: SharedSession,
    outbound: Arc<dyn Outbound>,
    loader: Arc<dyn DatasetLoader>,
    events: EventSink,
}

impl CommandDispatcher {
    pub fn new(
        session: SharedSession,
        outbound: Arc<dyn Outbound>,
        loader: Arc<dyn DatasetLoader>,
        events: EventSink,
    ) -> Self {
        Self {
            session,
            outbound,
            loader,
            events,
        }
    }

    /// Send a chat message with the current dataset attached.
    /// Rejected locally when blank or when the session is not connected.
    pub fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        let message = text.trim();
        if message.is_empty() {
            return self.reject(ClientError::Validation("message is empty".into()));
        }
        let context = {
            let session = self.session.lock();
            if !session.is_connected() {
                None
            } else {
                Some(session.dataset())
            }
        };
        let Some(context) = context else {
            return self.reject(ClientError::Validation("not connected to server".into()));
        };

        let request = ChatRequest {
            message,
            context: context.as_deref(),
        };
        let envelope = Envelope::from_payload(kind::CHAT, &request)?;
        if !self.outbound.send(&envelope) {
            return self.reject(ClientError::Validation("not connected to server".into()));
        }
        debug!(chars = message.len(), with_dataset = context.is_some(), "chat sent");
        self.events.emit(ClientEvent::ChatSent(message.to_string()));
        Ok(())
    }

    /// Load a dataset and make it the session's current one. A failed load
    /// leaves the session untouched.
    pub async fn load_dataset(&self, source_ref: &str) -> Result<Arc<Value>, ClientError> {
        let reference = source_ref.trim();
        if reference.is_empty() {
            return self.reject(ClientError::Validation(
                "dataset reference is empty".into(),
            ));
        }
        match self.loader.load(reference).await {
            Ok(data) => {
                let snapshot = self.session.lock().set_dataset(data);
                info!(source = %reference, "dataset loaded");
                self.events.emit(ClientEvent::DatasetReady(Arc::clone(&snapshot)));
                Ok(snapshot)
            }
            Err(e) => self.reject(e),
        }
    }

    /// Send the canned prompt for `key`.
    pub fn run_quick_action(&self, key: &str) -> Result<(), ClientError> {
        match quick_action_prompt(key) {
            Some(prompt) => self.send_chat(prompt),
            None => self.reject(ClientError::Validation(format!(
                "unknown quick action: {}",
                key
            ))),
        }
    }

    fn reject<T>(&self, error: ClientError) -> Result<T, ClientError> {
        debug!(error = %error, "command rejected");
        self.events.emit(ClientEvent::Error(error.clone()));
        Err(error)
    }
}
