//! Connection manager: owns the transport, reconnects with backoff, fans
//! status changes and inbound frames out to registered observers.
//!
//! A single driver task per manager owns the open link and the reconnect
//! timer. Observers run on that task, in registration order, and inbound
//! frames reach them in the order the transport delivered them.
//!
//! State machine:
//!
//! ```text
//! Connecting -> Connected -> Disconnected | Failed -> (delay) -> Connecting -> ...
//! Connecting -> Failed (open error)
//! ```
//!
//! `stop()` is the only terminal transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::transport::{Connector, Link, WebSocketConnector};

/// Connection status shown to the user. Exactly one is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    /// Short label for a status indicator.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Failed => "Error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reconnect schedule.
///
/// The n-th consecutive retry (0-based) waits
/// `initial_delay * backoff_factor^n`, capped at `max_delay`. The counter
/// resets once a connection opens. `max_attempts: None` retries forever.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Same delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            backoff_factor: 1.0,
            max_delay: delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before retry number `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let cap = self.max_delay.max(self.initial_delay);
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(32) as i32);
        let delay = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(cap);
        Some(delay.min(cap))
    }
}

type StatusObserver = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
type MessageObserver = Arc<dyn Fn(&str) + Send + Sync>;

enum Command {
    Send(String),
    Stop,
}

struct Shared {
    status: Mutex<ConnectionStatus>,
    status_observers: Mutex<Vec<StatusObserver>>,
    message_observers: Mutex<Vec<MessageObserver>>,
    stopped: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        if *self.status.lock() == status {
            return;
        }
        self.announce(status);
    }

    /// Store and notify even when unchanged (first attempt from the initial `Connecting`).
    fn announce(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
        debug!(%status, "connection status changed");
        let observers = self.status_observers.lock().clone();
        for observer in &observers {
            observer(status);
        }
    }

    fn deliver(&self, frame: &str) {
        let observers = self.message_observers.lock().clone();
        for observer in &observers {
            observer(frame);
        }
    }
}

/// Handle to a reconnecting connection. Cheap to clone; clones share state.
///
/// Dropping the last handle tears the driver down like `stop()`.
#[derive(Clone)]
pub struct ConnectionManager {
    endpoint: Url,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    // Held only by handles, never by the driver.
    driver: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
}

impl ConnectionManager {
    /// WebSocket manager for `endpoint`.
    pub fn new(endpoint: Url, policy: RetryPolicy) -> Self {
        Self::with_connector(endpoint, policy, WebSocketConnector)
    }

    pub fn with_connector(endpoint: Url, policy: RetryPolicy, connector: impl Connector) -> Self {
        Self {
            endpoint,
            policy,
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                status: Mutex::new(ConnectionStatus::Connecting),
                status_observers: Mutex::new(Vec::new()),
                message_observers: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Register a status observer. Observers run in registration order.
    pub fn on_status_change(&self, observer: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        self.shared.status_observers.lock().push(Arc::new(observer));
    }

    /// Register an observer for raw inbound text frames.
    pub fn on_message(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.message_observers.lock().push(Arc::new(observer));
    }

    /// Start the connection driver. No-op while a driver is already
    /// connecting or connected, and after `stop()`.
    pub fn connect(&self) {
        if self.is_stopped() {
            warn!(endpoint = %self.endpoint, "connect() after stop() ignored");
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "connect() called outside a tokio runtime");
                return;
            }
        };

        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(|tx| !tx.is_closed()) {
            debug!("connect() while already running; ignored");
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *driver = Some(tx);
        drop(driver);

        let task = Driver {
            endpoint: self.endpoint.clone(),
            policy: self.policy.clone(),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            commands: rx,
        };
        runtime.spawn(task.run());
    }

    /// Queue an envelope on the open link. Returns `false` (and drops the
    /// envelope) when not connected.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if self.status() != ConnectionStatus::Connected {
            debug!(kind = %envelope.kind, "not connected; dropping envelope");
            return false;
        }
        let driver = self.driver.lock();
        match driver.as_ref() {
            Some(tx) => tx.send(Command::Send(envelope.to_text())).is_ok(),
            None => false,
        }
    }

    /// Close the link and cancel any pending reconnect. Terminal.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(endpoint = %self.endpoint, "stopping connection");
        let driver = self.driver.lock().take();
        let delivered = driver.is_some_and(|tx| tx.send(Command::Stop).is_ok());
        if !delivered && self.status() == ConnectionStatus::Connecting {
            self.shared.set_status(ConnectionStatus::Disconnected);
        }
    }
}

enum LinkEnd {
    Closed,
    Failed(TransportError),
    Stopped,
}

struct Driver {
    endpoint: Url,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.shared.announce(ConnectionStatus::Connecting);
            info!(endpoint = %self.endpoint, attempt, "connecting");

            let opened = tokio::select! {
                result = self.connector.open(&self.endpoint) => Some(result),
                _ = wait_for_stop(&mut self.commands) => None,
            };

            let end = match opened {
                None => LinkEnd::Stopped,
                Some(Ok(link)) => {
                    attempt = 0;
                    self.shared.set_status(ConnectionStatus::Connected);
                    info!(endpoint = %self.endpoint, "connected");
                    self.run_link(link).await
                }
                Some(Err(e)) => LinkEnd::Failed(e),
            };

            match end {
                LinkEnd::Stopped => {
                    self.shared.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                LinkEnd::Closed => {
                    info!(endpoint = %self.endpoint, "connection closed");
                    self.shared.set_status(ConnectionStatus::Disconnected);
                }
                LinkEnd::Failed(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "connection failed");
                    self.shared.set_status(ConnectionStatus::Failed);
                }
            }

            if self.drain_pending() {
                return;
            }

            let Some(delay) = self.policy.delay_for(attempt) else {
                error!(attempts = attempt, "reconnect attempts exhausted; giving up");
                return;
            };
            attempt += 1;
            info!(delay_ms = delay.as_millis() as u64, attempt, "reconnect scheduled");

            let stopped = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = wait_for_stop(&mut self.commands) => true,
            };
            if stopped {
                debug!("reconnect cancelled");
                return;
            }
        }
    }

    async fn run_link(&mut self, link: Link) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(text).await {
                            return LinkEnd::Failed(e);
                        }
                    }
                    Some(Command::Stop) | None => {
                        if let Err(e) = sink.close().await {
                            debug!(error = %e, "error closing link");
                        }
                        return LinkEnd::Stopped;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.shared.deliver(&text),
                    Some(Err(e)) => return LinkEnd::Failed(e),
                    None => return LinkEnd::Closed,
                },
            }
        }
    }

    /// Drop sends queued for the link that just ended. Returns true if a stop
    /// was queued among them.
    fn drain_pending(&mut self) -> bool {
        let mut dropped = 0usize;
        let mut stop = false;
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(_) => dropped += 1,
                Command::Stop => stop = true,
            }
        }
        if dropped > 0 {
            debug!(dropped, "dropped envelopes queued for a closed link");
        }
        stop
    }
}

/// Resolves on `Stop` or once every `ConnectionManager` handle is dropped.
/// Sends arriving while no link is open are dropped.
async fn wait_for_stop(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Send(_) => debug!("no open link; dropping envelope"),
            Command::Stop => return,
        }
    }
}
