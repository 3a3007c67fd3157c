use netspeed::{Client, Config, ProgressCallback, ProgressEvent, Protocol, Server};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Custom callback implementation using a struct
struct TestCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestCallback {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgressCallback for TestCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

async fn start_server() -> (u16, u16) {
    let server = Server::bind(Config::server(0, 0)).await.unwrap();
    let ports = (
        server.tcp_local_addr().unwrap().port(),
        server.udp_local_addr().unwrap().port(),
    );
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    ports
}

fn client_config(tcp_port: u16, udp_port: u16) -> Config {
    Config::client("127.0.0.1".to_string(), tcp_port, udp_port)
        .with_requested_size(8192)
        .with_idle_timeout(Duration::from_millis(300))
}

#[tokio::test]
async fn test_custom_callback_struct() {
    let (tcp_port, udp_port) = start_server().await;

    let callback = TestCallback::new();
    let events_ref = callback.events.clone();

    let config = client_config(tcp_port, udp_port)
        .with_tcp_connections(2)
        .with_udp_connections(1);
    let client = Client::new(config).unwrap().with_callback(callback);
    client.run().await.unwrap();

    let events = events_ref.lock().unwrap();

    let started = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::TransferStarted { .. }))
        .count();
    let completed = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::TransferCompleted(_)))
        .count();
    assert_eq!(started, 3);
    assert_eq!(completed, 3);

    // The round summary is always the last event.
    match events.last() {
        Some(ProgressEvent::RoundCompleted(summary)) => {
            assert_eq!(summary.transfers, 3);
            assert_eq!(summary.failed, 0);
        }
        other => panic!("Expected RoundCompleted last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_closure_callback() {
    let (tcp_port, udp_port) = start_server().await;

    let started = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(Mutex::new(Vec::new()));
    let started_sink = started.clone();
    let completed_sink = completed.clone();

    let client = Client::new(client_config(tcp_port, udp_port))
        .unwrap()
        .with_callback(move |event: ProgressEvent| match event {
            ProgressEvent::TransferStarted {
                transfer_id,
                protocol,
            } => started_sink.lock().unwrap().push((transfer_id, protocol)),
            ProgressEvent::TransferCompleted(result) => completed_sink.lock().unwrap().push(result),
            ProgressEvent::RoundCompleted(_) => {}
        });

    client.run().await.unwrap();

    let mut started = started.lock().unwrap().clone();
    started.sort_by_key(|(id, _)| *id);
    assert_eq!(started, vec![(1, Protocol::Tcp), (2, Protocol::Udp)]);

    let completed = completed.lock().unwrap();
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn test_failures_are_reported_through_callback() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);
    let (_, udp_port) = start_server().await;

    let callback = TestCallback::new();
    let events_ref = callback.events.clone();

    let client = Client::new(client_config(dead_port, udp_port))
        .unwrap()
        .with_callback(callback);
    let results = client.run().await.unwrap();
    assert_eq!(results.len(), 2);

    let events = events_ref.lock().unwrap();
    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::TransferCompleted(result) if !result.is_success() => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].protocol, Protocol::Tcp);

    match events.last() {
        Some(ProgressEvent::RoundCompleted(summary)) => assert_eq!(summary.failed, 1),
        other => panic!("Expected RoundCompleted last, got {:?}", other),
    }
}
