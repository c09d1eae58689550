//! Session state: connection status and the last loaded dataset.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::ConnectionStatus;

type StatusObserver = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Per-client session. Created at client start, never persisted.
pub struct Session {
    status: ConnectionStatus,
    last_dataset: Option<Arc<Value>>,
    observers: Vec<StatusObserver>,
}

/// Session shared between the router handlers and the command dispatcher.
pub type SharedSession = Arc<Mutex<Session>>;

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_dataset: None,
            observers: Vec::new(),
        }
    }

    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn on_status_change(&mut self, observer: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        self.observers.push(Arc::new(observer));
    }

    /// Record a status transition. Returns the pending notification, or
    /// `None` when the status did not change. Call [`StatusChange::notify`]
    /// after releasing the session lock; [`update_status`] does both.
    pub fn set_status(&mut self, status: ConnectionStatus) -> Option<StatusChange> {
        if self.status == status {
            return None;
        }
        self.status = status;
        Some(StatusChange {
            status,
            observers: self.observers.clone(),
        })
    }

    /// Replace the dataset and return the stored snapshot. The session owns
    /// its copy; later changes to the caller's value are not seen here.
    pub fn set_dataset(&mut self, data: Value) -> Arc<Value> {
        if let Some(current) = &self.last_dataset {
            if **current == data {
                return Arc::clone(current);
            }
        }
        let snapshot = Arc::new(data);
        self.last_dataset = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Read-only snapshot of the current dataset.
    pub fn dataset(&self) -> Option<Arc<Value>> {
        self.last_dataset.clone()
    }
}

/// A recorded status transition whose observers have not run yet.
#[must_use = "observers only run on notify()"]
pub struct StatusChange {
    status: ConnectionStatus,
    observers: Vec<StatusObserver>,
}

impl StatusChange {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn notify(self) {
        for observer in &self.observers {
            observer(self.status);
        }
    }
}

/// Set the status on a shared session and notify its observers with the
/// lock released, so observers may read the session. Returns whether the
/// status changed.
pub fn update_status(session: &SharedSession, status: ConnectionStatus) -> bool {
    let change = session.lock().set_status(status);
    match change {
        Some(change) => {
            change.notify();
            true
        }
        None => false,
    }
}
