//! Scripted in-memory transport for driving the connection manager without
//! sockets. Each `open` is reported on a channel together with the server
//! side of the link it produced.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use holysheet_client::{Connector, Link, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Outcome of one `open` call. An empty script accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    Refuse,
}

/// Server end of a fake link.
pub struct ServerSide {
    /// Frames to the client. Send `Err` to fail the link, drop to close it.
    pub frames: mpsc::UnboundedSender<Result<String, TransportError>>,
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<String>,
}

impl ServerSide {
    pub fn push(&self, frame: &str) {
        self.frames.send(Ok(frame.to_string())).unwrap();
    }

    pub fn fail(&self, reason: &str) {
        self.frames
            .send(Err(TransportError::Io(reason.to_string())))
            .unwrap();
    }

    pub async fn next_sent(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(60), self.sent.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client link closed")
    }
}

pub struct Opened {
    pub at: Instant,
    pub server: Option<ServerSide>,
}

#[derive(Clone)]
pub struct FakeConnector {
    script: Arc<Mutex<VecDeque<Script>>>,
    attempts: Arc<AtomicUsize>,
    opened: mpsc::UnboundedSender<Opened>,
}

impl FakeConnector {
    pub fn new(script: Vec<Script>) -> (Self, mpsc::UnboundedReceiver<Opened>) {
        let (opened, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(script.into())),
            attempts: Arc::new(AtomicUsize::new(0)),
            opened,
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, endpoint: &Url) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let at = Instant::now();
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Accept);
        if step == Script::Refuse {
            let _ = self.opened.send(Opened { at, server: None });
            return Err(TransportError::Open {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Result<String, TransportError>>();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
        let stream = futures_util::stream::unfold(frames_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let sink = futures_util::sink::unfold(sent_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|e| TransportError::Send(e.to_string()))?;
            Ok::<_, TransportError>(tx)
        });
        let _ = self.opened.send(Opened {
            at,
            server: Some(ServerSide {
                frames: frames_tx,
                sent: sent_rx,
            }),
        });
        Ok(Link::new(sink, stream))
    }
}

pub fn endpoint() -> Url {
    Url::parse("ws://127.0.0.1:8000/ws").unwrap()
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("timed out waiting on channel")
        .expect("channel closed")
}
