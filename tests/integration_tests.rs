use netspeed::measurements::Direction;
use netspeed::{Client, Config, Protocol, Server, TransferResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Starts a server on ephemeral ports and returns its (tcp, udp) ports.
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
        .with_idle_timeout(Duration::from_millis(300))
        .with_io_timeout(Duration::from_secs(5))
}

#[test]
fn test_config_builder() {
    let config = Config::client("192.168.1.100".to_string(), 57725, 61672)
        .with_requested_size(1_000_000)
        .with_tcp_connections(4)
        .with_udp_connections(3)
        .with_idle_timeout(Duration::from_millis(500))
        .with_json(true);

    assert_eq!(config.tcp_port, 57725);
    assert_eq!(config.udp_port, 61672);
    assert_eq!(config.requested_size, 1_000_000);
    assert_eq!(config.tcp_connections, 4);
    assert_eq!(config.udp_connections, 3);
    assert_eq!(config.idle_timeout, Duration::from_millis(500));
    assert!(config.json);
}

#[test]
fn test_client_rejects_invalid_config() {
    let config = Config::client("127.0.0.1".to_string(), 3333, 4444).with_tcp_connections(0);
    assert!(matches!(
        Client::new(config),
        Err(netspeed::Error::Config(_))
    ));
}

#[tokio::test]
async fn test_round_produces_one_result_per_transfer() {
    let (tcp_port, udp_port) = start_server().await;
    let size = 64 * 1024;

    let config = client_config(tcp_port, udp_port)
        .with_requested_size(size)
        .with_tcp_connections(3)
        .with_udp_connections(2);
    let client = Client::new(config).unwrap();

    let results = timeout(Duration::from_secs(10), client.run())
        .await
        .expect("round did not finish")
        .unwrap();

    assert_eq!(results.len(), 5);
    let ids: HashSet<u64> = results.iter().map(|r| r.transfer_id).collect();
    assert_eq!(ids, (1..=5).collect());

    for result in &results {
        assert!(result.is_success(), "{}", result);
        assert_eq!(result.direction, Direction::Received);
        match result.protocol {
            Protocol::Tcp => {
                assert!(result.transfer_id <= 3);
                assert_eq!(result.bytes, size);
                assert!(result.bits_per_second > 0.0);
                assert_eq!(result.loss_percent, None);
            }
            Protocol::Udp => {
                assert!(result.transfer_id > 3);
                assert_eq!(result.segments_expected, Some(64));
                assert!(result.segments_received.unwrap() <= 64);
                let loss = result.loss_percent.unwrap();
                assert!((0.0..=100.0).contains(&loss));
            }
        }
    }
}

#[tokio::test]
async fn test_rounds_can_repeat() {
    let (tcp_port, udp_port) = start_server().await;

    let client = Client::new(client_config(tcp_port, udp_port).with_requested_size(4096)).unwrap();

    for _ in 0..2 {
        let results = client.run().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(TransferResult::is_success));
    }
}

#[tokio::test]
async fn test_zero_size_round() {
    let (tcp_port, udp_port) = start_server().await;

    let client = Client::new(client_config(tcp_port, udp_port).with_requested_size(0)).unwrap();
    let results = client.run().await.unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.is_success(), "{}", result);
        assert_eq!(result.bytes, 0);
    }
    let udp = results
        .iter()
        .find(|r| r.protocol == Protocol::Udp)
        .unwrap();
    assert_eq!(udp.segments_received, Some(0));
    assert_eq!(udp.loss_percent, Some(0.0));
}

#[tokio::test]
async fn test_server_reports_its_own_measurements() {
    let server_results = Arc::new(Mutex::new(Vec::new()));
    let sink = server_results.clone();

    let server = Server::bind(Config::server(0, 0))
        .await
        .unwrap()
        .with_callback(move |event: netspeed::ProgressEvent| {
            if let netspeed::ProgressEvent::TransferCompleted(result) = event {
                sink.lock().unwrap().push(result);
            }
        });
    let tcp_port = server.tcp_local_addr().unwrap().port();
    let udp_port = server.udp_local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let config = client_config(tcp_port, udp_port)
        .with_requested_size(2048)
        .with_tcp_connections(2)
        .with_udp_connections(1);
    Client::new(config).unwrap().run().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let results = server_results.lock().unwrap().clone();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.direction == Direction::Sent));
    assert!(results.iter().all(TransferResult::is_success));

    let tcp: Vec<_> = results.iter().filter(|r| r.protocol == Protocol::Tcp).collect();
    assert_eq!(tcp.len(), 2);
    assert!(tcp.iter().all(|r| r.bytes == 2048));

    let udp: Vec<_> = results.iter().filter(|r| r.protocol == Protocol::Udp).collect();
    assert_eq!(udp.len(), 1);
    assert_eq!(udp[0].segments_expected, Some(2));
    assert_eq!(udp[0].bytes, 2048);
}

#[tokio::test]
async fn test_server_stops_on_cancel() {
    let server = Server::bind(Config::server(0, 0)).await.unwrap();
    let token = server.cancellation_token().clone();
    let handle = tokio::spawn(server.run());

    token.cancel();

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
