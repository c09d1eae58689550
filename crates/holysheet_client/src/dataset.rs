//! Dataset loaders. A loader turns a user-supplied reference (sheet URL,
//! sheet id, file path) into the structured value attached to chats.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::DEFAULT_RANGE;
use crate::dispatcher::Outbound;
use crate::envelope::{kind, Envelope, LoadSheetRequest};
use crate::error::ClientError;

#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self, source_ref: &str) -> Result<Value, ClientError>;
}

fn sheet_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("sheet URL pattern is valid")
    })
}

/// Sheet id from a Google Sheets URL; anything else is taken as an id.
pub fn extract_sheet_id(url_or_id: &str) -> Result<String, ClientError> {
    let input = url_or_id.trim();
    if input.is_empty() {
        return Err(ClientError::Validation(
            "Please enter a Google Sheets URL".into(),
        ));
    }
    if !input.contains("docs.google.com/spreadsheets") {
        return Ok(input.to_string());
    }
    sheet_url_pattern()
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ClientError::Validation(format!("no sheet id in URL: {}", input)))
}

type Waiter = oneshot::Sender<Result<Value, ClientError>>;

/// Slot for the one in-flight remote load. The `sheet_loaded` and `error`
/// handlers resolve it; a new load replaces an older one.
#[derive(Clone, Default)]
pub struct PendingLoad {
    slot: Arc<Mutex<Option<Waiter>>>,
}

impl PendingLoad {
    fn begin(&self) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        if self.slot.lock().replace(tx).is_some() {
            debug!("previous dataset load superseded");
        }
        rx
    }

    fn cancel(&self) {
        self.slot.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hand `data` to the waiting load. Gives the data back when nobody waits.
    pub fn complete(&self, data: Value) -> Result<(), Value> {
        match self.slot.lock().take() {
            Some(tx) => tx.send(Ok(data)).map_err(|result| result.unwrap_or(Value::Null)),
            None => Err(data),
        }
    }

    /// Fail the waiting load. Returns false when nobody waits.
    pub fn fail(&self, error: ClientError) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }
}

/// Asks the server to load a sheet (`load_sheet`) and waits for its
/// `sheet_loaded` answer on the same connection.
pub struct RemoteSheetLoader {
    outbound: Arc<dyn Outbound>,
    pending: PendingLoad,
    range: String,
    timeout: Duration,
}

impl RemoteSheetLoader {
    pub fn new(outbound: Arc<dyn Outbound>, pending: PendingLoad, timeout: Duration) -> Self {
        Self {
            outbound,
            pending,
            range: DEFAULT_RANGE.into(),
            timeout,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }
}

#[async_trait]
impl DatasetLoader for RemoteSheetLoader {
    async fn load(&self, source_ref: &str) -> Result<Value, ClientError> {
        let sheet_id = extract_sheet_id(source_ref)?;
        let request = LoadSheetRequest {
            sheet_id: &sheet_id,
            range: &self.range,
        };
        let envelope = Envelope::from_payload(kind::LOAD_SHEET, &request)?;

        let reply = self.pending.begin();
        if !self.outbound.send(&envelope) {
            self.pending.cancel();
            return Err(ClientError::Dataset("not connected to server".into()));
        }
        info!(sheet_id = %sheet_id, range = %self.range, "requested sheet");

        match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Dataset("load superseded".into())),
            Err(_) => {
                self.pending.cancel();
                Err(ClientError::Dataset(format!(
                    "no answer for sheet {} within {}ms",
                    sheet_id,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Loads a dataset from a local JSON file; the reference is a path.
#[derive(Debug, Clone, Default)]
pub struct JsonFileLoader {
    base_dir: Option<PathBuf>,
}

impl JsonFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative references against `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl DatasetLoader for JsonFileLoader {
    async fn load(&self, source_ref: &str) -> Result<Value, ClientError> {
        let reference = source_ref.trim();
        if reference.is_empty() {
            return Err(ClientError::Validation("dataset path is empty".into()));
        }
        let path = match &self.base_dir {
            Some(dir) => dir.join(reference),
            None => PathBuf::from(reference),
        };
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ClientError::Dataset(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ClientError::Dataset(format!("{}: {}", path.display(), e)))
    }
}
