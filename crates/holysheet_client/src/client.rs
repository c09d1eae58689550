//! Client facade: wires the connection manager, router, session and
//! dispatcher together and exposes a single event stream to the UI.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{Config, ConfigError, DEFAULT_RANGE};
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::dataset::{DatasetLoader, PendingLoad, RemoteSheetLoader};
use crate::dispatcher::{CommandDispatcher, Outbound};
use crate::envelope::{decode_payload, kind, ChatResponse, ErrorMessage, SheetLoaded};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventSink};
use crate::router::MessageRouter;
use crate::session::{update_status, Session, SharedSession};

pub struct ClientBuilder {
    connection: ConnectionManager,
    loader: Option<Arc<dyn DatasetLoader>>,
    range: String,
    load_timeout: Duration,
}

impl ClientBuilder {
    /// Load datasets with `loader` instead of asking the server.
    pub fn loader(mut self, loader: impl DatasetLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn build(self) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = EventSink::channel();
        let connection = self.connection;
        let session = Session::shared();
        let pending = PendingLoad::default();
        let outbound: Arc<dyn Outbound> = Arc::new(connection.clone());

        let loader = match self.loader {
            Some(loader) => loader,
            None => Arc::new(
                RemoteSheetLoader::new(Arc::clone(&outbound), pending.clone(), self.load_timeout)
                    .with_range(self.range),
            ),
        };

        let router = Arc::new(Mutex::new(standard_router(
            session.clone(),
            pending,
            events.clone(),
        )));

        {
            let session = session.clone();
            let events = events.clone();
            connection.on_status_change(move |status| {
                update_status(&session, status);
                events.emit(ClientEvent::Status(status));
            });
        }
        {
            let router = Arc::clone(&router);
            connection.on_message(move |frame| router.lock().route_frame(frame));
        }

        let dispatcher = CommandDispatcher::new(session.clone(), outbound, loader, events);
        let client = Client {
            connection,
            session,
            router,
            dispatcher,
        };
        (client, rx)
    }
}

/// Router with handlers for `chat_response`, `sheet_loaded` and `error`.
fn standard_router(session: SharedSession, pending: PendingLoad, events: EventSink) -> MessageRouter {
    let mut router = MessageRouter::new();
    {
        let events = events.clone();
        router.register(kind::CHAT_RESPONSE, move |payload| {
            let response: ChatResponse = decode_payload(kind::CHAT_RESPONSE, payload)?;
            events.emit(ClientEvent::ChatResponse(response.message));
            Ok(())
        });
    }
    {
        let events = events.clone();
        let pending = pending.clone();
        router.register(kind::SHEET_LOADED, move |payload| {
            let loaded: SheetLoaded = decode_payload(kind::SHEET_LOADED, payload)?;
            // Unsolicited loads update the session directly.
            if let Err(data) = pending.complete(loaded.data) {
                let snapshot = session.lock().set_dataset(data);
                events.emit(ClientEvent::DatasetReady(snapshot));
            }
            Ok(())
        });
    }
    {
        let events = events.clone();
        router.register(kind::ERROR, move |payload| {
            let error: ErrorMessage = decode_payload(kind::ERROR, payload)?;
            pending.fail(ClientError::Dataset(error.message.clone()));
            events.emit(ClientEvent::RemoteError(error.message));
            Ok(())
        });
    }
    router.on_error(move |e| {
        warn!(error = %e, "inbound message skipped");
        events.emit(ClientEvent::Error(e));
    });
    router
}

/// Real-time client. Create with [`Client::builder`] or [`Client::from_config`].
pub struct Client {
    connection: ConnectionManager,
    session: SharedSession,
    router: Arc<Mutex<MessageRouter>>,
    dispatcher: CommandDispatcher,
}

impl Client {
    pub fn builder(connection: ConnectionManager) -> ClientBuilder {
        ClientBuilder {
            connection,
            loader: None,
            range: DEFAULT_RANGE.into(),
            load_timeout: Duration::from_secs(15),
        }
    }

    /// WebSocket client for the configured origin and retry policy.
    pub fn from_config(
        config: &Config,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConfigError> {
        let connection = ConnectionManager::new(config.endpoint()?, config.reconnect.retry_policy());
        Ok(Self::builder(connection)
            .range(config.dataset.range.clone())
            .load_timeout(config.dataset.load_timeout())
            .build())
    }

    /// Open the connection. Must be called inside a tokio runtime.
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Tear down: close the link, cancel pending reconnects.
    pub fn stop(&self) {
        self.connection.stop();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.lock().status()
    }

    pub fn dataset(&self) -> Option<Arc<Value>> {
        self.session.lock().dataset()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Add or replace the handler for an inbound kind.
    pub fn register_handler(
        &self,
        kind: impl Into<String>,
        handler: impl FnMut(Value) -> Result<(), ClientError> + Send + 'static,
    ) {
        self.router.lock().register(kind, handler);
    }

    pub fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        self.dispatcher.send_chat(text)
    }

    pub async fn load_dataset(&self, source_ref: &str) -> Result<Arc<Value>, ClientError> {
        self.dispatcher.load_dataset(source_ref).await
    }

    pub fn run_quick_action(&self, key: &str) -> Result<(), ClientError> {
        self.dispatcher.run_quick_action(key)
    }
}
