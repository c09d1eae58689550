//! HolySheet real-time client: a reconnecting WebSocket connection carrying
//! chat, sheet-load and error envelopes, plus the session state and command
//! dispatch that sit on top of it. Used by the `holysheet` binary.

pub mod client;
pub mod config;
pub mod connection;
pub mod dataset;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod events;
pub mod router;
pub mod session;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{default_config_path, Config, ConfigError};
pub use connection::{ConnectionManager, ConnectionStatus, RetryPolicy};
pub use dataset::{extract_sheet_id, DatasetLoader, JsonFileLoader, RemoteSheetLoader};
pub use dispatcher::{quick_action_prompt, CommandDispatcher, Outbound, QUICK_ACTIONS};
pub use envelope::Envelope;
pub use error::{ClientError, TransportError};
pub use events::{ClientEvent, EventSink};
pub use router::MessageRouter;
pub use session::{update_status, Session, SharedSession, StatusChange};
pub use transport::{Connector, Link, WebSocketConnector};
