use netspeed::measurements::TransferResult;
use netspeed::protocol::{create_payload_packet, PayloadHeader, RequestPacket, SEGMENT_SIZE};
use netspeed::udp::{request_transfer, send_segments, RECV_BUFFER_SIZE};
use netspeed::TransferRequest;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const IDLE: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_responder_sends_numbered_segments_in_order() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let counters = send_segments(&server, client.local_addr().unwrap(), 2048)
        .await
        .unwrap();
    assert_eq!(counters.segments_sent, 2);

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    for expected in 1..=2u64 {
        let (n, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("segment did not arrive")
            .unwrap();
        assert_eq!(n, PayloadHeader::SIZE + SEGMENT_SIZE);

        let header = PayloadHeader::from_bytes(&buf[..n]).unwrap();
        assert_eq!(header.total_segments, 2);
        assert_eq!(header.segment_number, expected);
    }

    // Nothing beyond the two segments.
    assert!(timeout(Duration::from_millis(200), client.recv_from(&mut buf))
        .await
        .is_err());
}

#[tokio::test]
async fn test_responder_zero_size_sends_nothing() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let counters = send_segments(&server, client.local_addr().unwrap(), 0)
        .await
        .unwrap();
    assert_eq!(counters.segments_sent, 0);

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    assert!(timeout(Duration::from_millis(200), client.recv_from(&mut buf))
        .await
        .is_err());
}

#[tokio::test]
async fn test_requester_deduplicates_out_of_order_segments() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let fake_server = tokio::spawn(async move {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        let request = RequestPacket::from_bytes(&buf[..n]).unwrap();
        assert_eq!(request.requested_size, 3 * 1024);

        for segment in [2u64, 1, 2] {
            server
                .send_to(&create_payload_packet(3, segment), peer)
                .await
                .unwrap();
        }
    });

    let request = TransferRequest::new("127.0.0.1".to_string(), port, 3 * 1024, 9);
    let counters = request_transfer(&request, IDLE).await.unwrap();
    fake_server.await.unwrap();

    assert_eq!(counters.segments_received, 2);
    assert!(counters.elapsed >= IDLE);

    let result = TransferResult::udp_received(request.transfer_id, &counters);
    assert_eq!(result.transfer_id, 9);
    assert_eq!(result.segments_expected, Some(3));
    assert_eq!(result.segments_received, Some(2));
    assert_eq!(result.bytes, 2 * 1024);
    let loss = result.loss_percent.unwrap();
    assert!((loss - 100.0 / 3.0).abs() < 1e-9, "loss was {}", loss);
}

#[tokio::test]
async fn test_requester_ignores_foreign_datagrams() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let fake_server = tokio::spawn(async move {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (_, peer) = server.recv_from(&mut buf).await.unwrap();

        let mut wrong_magic = create_payload_packet(1, 1);
        wrong_magic[0] = 0;
        server.send_to(&wrong_magic, peer).await.unwrap();
        server.send_to(&[0x04; 10], peer).await.unwrap();
        server
            .send_to(&RequestPacket::new(1).to_bytes(), peer)
            .await
            .unwrap();
    });

    let request = TransferRequest::new("127.0.0.1".to_string(), port, 1024, 1);
    let counters = request_transfer(&request, IDLE).await.unwrap();
    fake_server.await.unwrap();

    assert_eq!(counters.segments_received, 0);
    assert_eq!(counters.discarded, 3);

    let result = TransferResult::udp_received(1, &counters);
    assert_eq!(result.loss_percent, Some(100.0));
}

#[tokio::test]
async fn test_requester_silent_server_completes_on_idle() {
    // Bound but never answers.
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let request = TransferRequest::new("127.0.0.1".to_string(), port, 0, 1);
    let counters = timeout(Duration::from_secs(5), request_transfer(&request, IDLE))
        .await
        .expect("idle window did not end the transfer")
        .unwrap();

    assert_eq!(counters.segments_received, 0);

    let result = TransferResult::udp_received(1, &counters);
    assert!(result.is_success());
    assert_eq!(result.loss_percent, Some(0.0));
    assert_eq!(result.bits_per_second, 0.0);
}

#[tokio::test]
async fn test_requester_resolves_host_name() {
    // Only reachable over IPv4 loopback, whatever order localhost resolves in.
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let fake_server = tokio::spawn(async move {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        let request = RequestPacket::from_bytes(&buf[..n]).unwrap();
        send_segments(&server, peer, request.requested_size)
            .await
            .unwrap()
    });

    let request = TransferRequest::new("localhost".to_string(), port, 2048, 1);
    let counters = request_transfer(&request, IDLE).await.unwrap();

    assert_eq!(fake_server.await.unwrap().segments_sent, 2);
    assert_eq!(counters.segments_received, 2);
}
