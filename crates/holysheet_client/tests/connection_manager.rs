//! Connection manager state machine, reconnect timing and teardown, driven
//! through a scripted in-memory transport on tokio's paused clock.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use holysheet_client::envelope::kind;
use holysheet_client::{ConnectionManager, ConnectionStatus, Envelope, RetryPolicy};
use serde_json::json;
use support::{endpoint, next, FakeConnector, Script};
use tokio::sync::mpsc;
use tokio::time::Instant;

use ConnectionStatus::*;

fn status_channel(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<ConnectionStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_status_change(move |status| {
        let _ = tx.send(status);
    });
    rx
}

fn allowed(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    matches!(
        (from, to),
        (Connecting, Connected)
            | (Connecting, Failed)
            | (Connecting, Disconnected)
            | (Connected, Disconnected)
            | (Connected, Failed)
            | (Disconnected, Connecting)
            | (Failed, Connecting)
    )
}

#[tokio::test(start_paused = true)]
async fn status_sequence_follows_state_machine() {
    let (connector, mut opens) = FakeConnector::new(vec![
        Script::Accept,
        Script::Refuse,
        Script::Accept,
        Script::Accept,
    ]);
    let manager =
        ConnectionManager::with_connector(endpoint(), RetryPolicy::fixed(Duration::from_secs(3)), connector);
    let mut statuses = status_channel(&manager);
    manager.connect();

    // Remote close.
    let first = next(&mut opens).await.server.expect("first open accepted");
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);
    drop(first);
    assert_eq!(next(&mut statuses).await, Disconnected);

    // Refused open.
    assert!(next(&mut opens).await.server.is_none());
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Failed);

    // Transport error on a live link.
    let third = next(&mut opens).await.server.expect("third open accepted");
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);
    third.fail("reset by peer");
    assert_eq!(next(&mut statuses).await, Failed);

    let _fourth = next(&mut opens).await.server.expect("fourth open accepted");
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    manager.stop();
    assert_eq!(next(&mut statuses).await, Disconnected);
}

#[tokio::test(start_paused = true)]
async fn every_observed_transition_is_allowed() {
    let script = vec![
        Script::Refuse,
        Script::Accept,
        Script::Refuse,
        Script::Refuse,
        Script::Accept,
        Script::Accept,
    ];
    let (connector, mut opens) = FakeConnector::new(script);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_millis(500)),
        connector,
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        manager.on_status_change(move |s| seen.lock().unwrap().push(s));
    }
    manager.connect();

    let mut close_next = true;
    for _ in 0..6 {
        let opened = next(&mut opens).await;
        if let Some(server) = opened.server {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if close_next {
                drop(server);
            } else {
                server.fail("boom");
            }
            close_next = !close_next;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&Connecting));
    for pair in seen.windows(2) {
        assert!(allowed(pair[0], pair[1]), "illegal transition {:?} -> {:?}", pair[0], pair[1]);
    }
}

#[tokio::test(start_paused = true)]
async fn close_triggers_exactly_one_reconnect_after_delay() {
    let delay = Duration::from_secs(3);
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(endpoint(), RetryPolicy::fixed(delay), connector.clone());
    let mut statuses = status_channel(&manager);
    manager.connect();

    let first = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    let closed_at = Instant::now();
    drop(first);
    let second = next(&mut opens).await;
    assert_eq!(second.at.duration_since(closed_at), delay);
    let _second_link = second.server.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(opens.try_recv().is_err());
    assert_eq!(manager.status(), Connected);
}

#[tokio::test(start_paused = true)]
async fn stop_during_reconnect_delay_cancels_attempt() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector.clone(),
    );
    let mut statuses = status_channel(&manager);
    manager.connect();

    let first = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);
    drop(first);
    assert_eq!(next(&mut statuses).await, Disconnected);

    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.stop();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts(), 1);
    assert!(statuses.try_recv().is_err());
    assert_eq!(manager.status(), Disconnected);

    // Stopped is terminal.
    manager.connect();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_while_connected_closes_link_without_reconnect() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector.clone(),
    );
    let mut statuses = status_channel(&manager);
    manager.connect();
    let mut server = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    manager.stop();
    assert_eq!(next(&mut statuses).await, Disconnected);
    assert!(server.sent.recv().await.is_none(), "link should be closed");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(manager.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_tears_the_driver_down() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector.clone(),
    );
    let clone = manager.clone();
    let mut statuses = status_channel(&manager);
    manager.connect();
    let mut server = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    drop(manager);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(statuses.try_recv().is_err(), "a live clone keeps the link up");

    drop(clone);
    assert_eq!(next(&mut statuses).await, Disconnected);
    assert!(server.sent.recv().await.is_none(), "link should be closed");

    // The driver is gone: its observers are dropped and nothing reconnects.
    let ended = tokio::time::timeout(Duration::from_secs(60), statuses.recv()).await;
    assert_eq!(ended, Ok(None));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn handles_dropped_during_reconnect_delay_cancel_the_retry() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector.clone(),
    );
    let mut statuses = status_channel(&manager);
    manager.connect();
    let first = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);
    drop(first);
    assert_eq!(next(&mut statuses).await, Disconnected);

    drop(manager);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(statuses.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent_while_running() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector.clone(),
    );
    let mut statuses = status_channel(&manager);
    manager.connect();
    manager.connect();
    let _server = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    manager.connect();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(statuses.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn send_is_dropped_unless_connected() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector,
    );
    let mut statuses = status_channel(&manager);
    let envelope = Envelope::new(kind::CHAT, json!({"message": "hi", "sheet_data": null}));

    assert!(!manager.send(&envelope), "not connected yet");

    manager.connect();
    let mut server = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);

    assert!(manager.send(&envelope));
    let wire = server.next_sent().await;
    assert_eq!(Envelope::from_text(&wire).unwrap(), envelope);

    server.frames.send(Ok("{\"type\":\"chat_response\",\"message\":\"x\"}".into())).unwrap();
    drop(server);
    assert_eq!(next(&mut statuses).await, Disconnected);
    assert!(!manager.send(&envelope), "dropped while disconnected");

    // The dropped envelope is not replayed on the next link.
    let mut second = next(&mut opens).await.server.unwrap();
    assert_eq!(next(&mut statuses).await, Connecting);
    assert_eq!(next(&mut statuses).await, Connected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(second.sent.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn frames_reach_observers_in_order_and_registration_order() {
    let (connector, mut opens) = FakeConnector::new(vec![]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(3)),
        connector,
    );
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    for tag in ["a", "b"] {
        let log = Arc::clone(&log);
        manager.on_message(move |frame| log.lock().unwrap().push(format!("{}:{}", tag, frame)));
    }
    manager.connect();
    let server = next(&mut opens).await.server.unwrap();
    for frame in ["1", "2", "3"] {
        server.push(frame);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["a:1", "b:1", "a:2", "b:2", "a:3", "b:3"]
    );
    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up_after_max_attempts() {
    let (connector, _opens) = FakeConnector::new(vec![Script::Refuse; 10]);
    let manager = ConnectionManager::with_connector(
        endpoint(),
        RetryPolicy::fixed(Duration::from_secs(1)).with_max_attempts(2),
        connector.clone(),
    );
    manager.connect();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 3);
    assert_eq!(manager.status(), Failed);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_between_failed_attempts() {
    let (connector, mut opens) = FakeConnector::new(vec![Script::Refuse; 4]);
    let policy = RetryPolicy {
        initial_delay: Duration::from_secs(1),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(3),
        max_attempts: None,
    };
    let manager = ConnectionManager::with_connector(endpoint(), policy, connector);
    manager.connect();

    let mut times = Vec::new();
    for _ in 0..5 {
        times.push(next(&mut opens).await.at);
    }
    let gaps: Vec<u64> = times
        .windows(2)
        .map(|w| w[1].duration_since(w[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 3, 3]);
    manager.stop();
}

#[test]
fn retry_policy_delays() {
    let policy = RetryPolicy::default();
    let secs: Vec<u64> = (0..6)
        .map(|n| policy.delay_for(n).unwrap().as_secs())
        .collect();
    assert_eq!(secs, vec![3, 6, 12, 24, 30, 30]);
    assert_eq!(policy.delay_for(10_000), Some(Duration::from_secs(30)));

    let fixed = RetryPolicy::fixed(Duration::from_secs(3)).with_max_attempts(2);
    assert_eq!(fixed.delay_for(0), Some(Duration::from_secs(3)));
    assert_eq!(fixed.delay_for(1), Some(Duration::from_secs(3)));
    assert_eq!(fixed.delay_for(2), None);
}

#[test]
fn status_labels() {
    assert_eq!(Connecting.to_string(), "Connecting...");
    assert_eq!(Connected.to_string(), "Connected");
    assert_eq!(Disconnected.to_string(), "Disconnected");
    assert_eq!(Failed.to_string(), "Error");
}
