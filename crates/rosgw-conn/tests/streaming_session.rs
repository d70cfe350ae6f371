//! Streaming session scenarios with in-memory client channels

mod common;

use std::time::Duration;

use rosgw_conn::{
    ClientMessage, MonitorEvent, StreamingRequest, StreamingSession, StreamingSummary,
};
use rosgw_core::DeviceId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use common::{wait_until, Harness};

/// One simulated streaming client
struct Client {
    events: mpsc::Receiver<MonitorEvent>,
    control: mpsc::Sender<ClientMessage>,
    task: JoinHandle<StreamingSummary>,
}

impl Client {
    fn start(harness: &Harness, device_id: DeviceId, streams: &[&str]) -> Self {
        let request =
            StreamingRequest::new(device_id, streams.iter().map(|s| s.to_string()).collect())
                .unwrap();
        let (event_tx, events) = mpsc::channel(64);
        let (control, control_rx) = mpsc::channel(8);
        let task = tokio::spawn(StreamingSession::new(request).run(
            harness.multiplexer.clone(),
            event_tx,
            ReceiverStream::new(control_rx),
        ));
        Self {
            events,
            control,
            task,
        }
    }

    async fn next_event(&mut self) -> MonitorEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("event in time")
            .expect("event channel open")
    }

    async fn next_update(&mut self) -> (String, u64) {
        loop {
            if let MonitorEvent::TrafficUpdate { interface, data, .. } = self.next_event().await {
                return (interface, data.rx_bytes.parse().unwrap());
            }
        }
    }

    /// Close the client side and wait for the session to finish
    async fn disconnect(self) -> StreamingSummary {
        drop(self.control);
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("session ends")
            .unwrap()
    }
}

#[tokio::test]
async fn test_partial_start_failure_keeps_streaming() {
    let harness = Harness::new();
    let (id, _device) = harness.add_device("core-1", &["ether1"]);
    let mut client = Client::start(&harness, id, &["ether1", "doesnotexist"]);

    match client.next_event().await {
        MonitorEvent::Error { error, .. } => {
            assert!(error.contains("doesnotexist: no such item"), "{error}");
            assert!(error.contains("1 of 2"), "{error}");
        }
        other => panic!("expected error event, got {other:?}"),
    }
    match client.next_event().await {
        MonitorEvent::Connected { message, .. } => {
            assert_eq!(
                message,
                format!("Monitoring started for router {}: ether1 (1 interface(s))", id)
            );
        }
        other => panic!("expected connected event, got {other:?}"),
    }
    let (interface, _) = client.next_update().await;
    assert_eq!(interface, "ether1");
    client.next_update().await;

    let summary = client.disconnect().await;
    assert_eq!(summary.started, ["ether1"]);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.updates_sent["ether1"] >= 2);
    assert_eq!(harness.multiplexer.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_all_streams_failing_ends_session() {
    let harness = Harness::new();
    let (id, device) = harness.add_device("core-1", &["ether1"]);
    let mut client = Client::start(&harness, id, &["ether8", "ether9"]);

    assert!(matches!(
        client.next_event().await,
        MonitorEvent::Error { .. }
    ));

    let summary = tokio::time::timeout(Duration::from_secs(2), &mut client.task)
        .await
        .expect("session ends without client disconnect")
        .unwrap();
    assert!(summary.started.is_empty());
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(device.open_listeners(), 0);
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let harness = Harness::new();
    let (id, _device) = harness.add_device("core-1", &["ether1"]);
    let mut client = Client::start(&harness, id, &["ether1"]);

    assert!(matches!(
        client.next_event().await,
        MonitorEvent::Connected { .. }
    ));
    client.control.send(ClientMessage::Ping).await.unwrap();

    let mut saw_pong = false;
    for _ in 0..20 {
        if let MonitorEvent::Pong { .. } = client.next_event().await {
            saw_pong = true;
            break;
        }
    }
    assert!(saw_pong);
    client.disconnect().await;
}

#[tokio::test]
async fn test_one_client_leaving_does_not_stop_another() {
    let harness = Harness::new();
    let (id, device) = harness.add_device("core-1", &["ether1"]);
    let mut a = Client::start(&harness, id, &["ether1"]);
    let mut b = Client::start(&harness, id, &["ether1"]);

    a.next_update().await;
    b.next_update().await;
    assert_eq!(device.open_listeners(), 1);
    assert_eq!(harness.multiplexer.consumer_count(id, "ether1"), 2);

    a.disconnect().await;
    assert_eq!(harness.multiplexer.consumer_count(id, "ether1"), 1);

    let (_, first) = b.next_update().await;
    let (_, second) = b.next_update().await;
    assert!(second > first);
    assert_eq!(device.open_listeners(), 1);

    b.disconnect().await;
    assert_eq!(harness.multiplexer.active_subscriptions(), 0);
    assert!(wait_until(|| device.open_listeners() == 0).await);
}

#[tokio::test]
async fn test_multiple_streams_in_one_session() {
    let harness = Harness::new();
    let (id, device) = harness.add_device("core-1", &["ether1", "ether2"]);
    let mut client = Client::start(&harness, id, &["ether1", "ether2"]);

    match client.next_event().await {
        MonitorEvent::Connected { message, .. } => assert!(message.ends_with("(2 interface(s))")),
        other => panic!("expected connected event, got {other:?}"),
    }

    let mut seen = std::collections::HashSet::new();
    while seen.len() < 2 {
        let (interface, _) = client.next_update().await;
        seen.insert(interface);
    }
    assert_eq!(device.open_listeners(), 2);

    let summary = client.disconnect().await;
    assert_eq!(summary.updates_sent.len(), 2);
    assert_eq!(harness.multiplexer.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_write_failure_ends_session() {
    let harness = Harness::new();
    let (id, _device) = harness.add_device("core-1", &["ether1"]);
    let mut client = Client::start(&harness, id, &["ether1"]);
    client.next_update().await;

    drop(client.events);
    let summary = tokio::time::timeout(Duration::from_secs(2), client.task)
        .await
        .expect("session ends after write failure")
        .unwrap();

    assert_eq!(summary.started, ["ether1"]);
    assert_eq!(harness.multiplexer.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_device_disconnect_reports_and_ends_session() {
    let harness = Harness::new();
    let (id, _device) = harness.add_device("core-1", &["ether1"]);
    let mut client = Client::start(&harness, id, &["ether1"]);
    client.next_update().await;

    harness.manager.disconnect(id).await.unwrap();

    let mut ended = false;
    for _ in 0..20 {
        if let MonitorEvent::Error { error, .. } = client.next_event().await {
            assert_eq!(error, "monitoring of ether1 ended");
            ended = true;
            break;
        }
    }
    assert!(ended);

    tokio::time::timeout(Duration::from_secs(2), client.task)
        .await
        .expect("session ends when its only stream ends")
        .unwrap();
}
