//! Mesh Integration Tests
//!
//! Runs several transports over in-memory links:
//! - Flooding reaches every node exactly once (full mesh and line)
//! - Personal messages stop at the first hop
//! - Handshake and protocol violations close the connection
//! - Rate limiting drops frames but keeps the session
//! - Peer list dialing is paced and filtered

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::{
    channel::{memory_link, PeerChannel},
    discovery::PeerDiscovery,
    handshake::Role,
    message::{Heartbeat, Hello, Message, PeerList},
    probe::FixedProbe,
    transport::{GossipConfig, GossipTransport, InboundMessage},
    WireCodec,
};

fn node() -> Arc<GossipTransport> {
    GossipTransport::new(GossipConfig::default(), Arc::new(FixedProbe(false)))
}

fn link(dialer: &Arc<GossipTransport>, listener: &Arc<GossipTransport>, address: &str) {
    let ((a_ch, a_rx), (b_ch, b_rx)) = memory_link();
    dialer.spawn_session(
        a_ch,
        a_rx,
        Role::Outbound {
            address: address.to_string(),
        },
    );
    listener.spawn_session(b_ch, b_rx, Role::Inbound);
}

async fn wait_for_peers(node: &Arc<GossipTransport>, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while node.directory().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers did not connect in time");
}

fn drain(rx: &mut broadcast::Receiver<InboundMessage>) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn heartbeat(operator: &str) -> Message {
    Message::Heartbeat(Heartbeat {
        operator: operator.to_string(),
        peer_id: "irrelevant".to_string(),
        timestamp: 0,
        signature: "00".to_string(),
    })
}

#[tokio::test]
async fn test_flood_full_mesh_delivers_once() {
    let nodes: Vec<_> = (0..4).map(|_| node()).collect();
    for i in 0..nodes.len() {
        for j in (i + 1)..nodes.len() {
            link(&nodes[i], &nodes[j], &format!("node-{}", j));
        }
    }
    for n in &nodes {
        wait_for_peers(n, 3).await;
    }

    let mut receivers: Vec<_> = nodes.iter().map(|n| n.subscribe()).collect();
    assert_eq!(nodes[0].broadcast(heartbeat("alice")), 3);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(drain(&mut receivers[0]).is_empty());
    for rx in receivers.iter_mut().skip(1) {
        let got = drain(rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, heartbeat("alice"));
    }
}

#[tokio::test]
async fn test_flood_line_relays_through_every_hop() {
    let nodes: Vec<_> = (0..5).map(|_| node()).collect();
    for i in 0..nodes.len() - 1 {
        link(&nodes[i], &nodes[i + 1], &format!("node-{}", i + 1));
    }
    wait_for_peers(&nodes[0], 1).await;
    for n in &nodes[1..4] {
        wait_for_peers(n, 2).await;
    }
    wait_for_peers(&nodes[4], 1).await;

    let mut receivers: Vec<_> = nodes.iter().map(|n| n.subscribe()).collect();
    nodes[2].broadcast(heartbeat("bob"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    for (i, rx) in receivers.iter_mut().enumerate() {
        let expected = if i == 2 { 0 } else { 1 };
        assert_eq!(drain(rx).len(), expected, "node {}", i);
    }
}

#[tokio::test]
async fn test_personal_message_not_relayed() {
    let nodes: Vec<_> = (0..3).map(|_| node()).collect();
    link(&nodes[0], &nodes[1], "node-1");
    link(&nodes[1], &nodes[2], "node-2");
    wait_for_peers(&nodes[1], 2).await;
    wait_for_peers(&nodes[2], 1).await;

    let mut middle = nodes[1].subscribe();
    let mut far = nodes[2].subscribe();
    nodes[0].broadcast(Message::RequestPeers);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(drain(&mut middle).len(), 1);
    assert!(drain(&mut far).is_empty());
}

/// Raw side of a link, speaking the protocol by hand
fn raw_inbound(listener: &Arc<GossipTransport>) -> (PeerChannel, mpsc::Receiver<String>) {
    let ((raw_ch, raw_rx), (node_ch, node_rx)) = memory_link();
    listener.spawn_session(node_ch, node_rx, Role::Inbound);
    (raw_ch, raw_rx)
}

async fn expect_closed(rx: &mut mpsc::Receiver<String>) {
    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed");
}

#[tokio::test]
async fn test_first_message_must_be_hello() {
    let listener = node();
    let codec = WireCodec::default();
    let (raw, mut rx) = raw_inbound(&listener);

    let (_, text) = codec.encode(heartbeat("mallory")).unwrap();
    raw.send_text(text);

    expect_closed(&mut rx).await;
    assert!(listener.directory().is_empty());
}

#[tokio::test]
async fn test_stale_message_after_handshake_closes() {
    let listener = node();
    let codec = WireCodec::default();
    let (raw, mut rx) = raw_inbound(&listener);
    handshake(&raw, &mut rx, &codec).await;
    wait_for_peers(&listener, 1).await;

    let stale = codec
        .frame_at(heartbeat("mallory"), crate::codec::now_ms() - 60_000)
        .unwrap();
    raw.send_text(stale.to_json().unwrap());

    expect_closed(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(listener.directory().is_empty());
}

#[tokio::test]
async fn test_inbound_refused_at_capacity() {
    let listener = GossipTransport::new(
        GossipConfig {
            max_connections: 0,
            ..Default::default()
        },
        Arc::new(FixedProbe(false)),
    );
    let codec = WireCodec::default();
    let (raw, mut rx) = raw_inbound(&listener);

    let hello = Message::Hello(Hello {
        peer_id: uuid::Uuid::new_v4().to_string(),
        address: None,
    });
    raw.send_text(codec.encode(hello).unwrap().1);

    expect_closed(&mut rx).await;
    assert!(listener.directory().is_empty());
}

#[tokio::test]
async fn test_non_v4_peer_id_refused() {
    let listener = node();
    let codec = WireCodec::default();
    let (raw, mut rx) = raw_inbound(&listener);

    let hello = Message::Hello(Hello {
        peer_id: "node-7".to_string(),
        address: None,
    });
    raw.send_text(codec.encode(hello).unwrap().1);

    expect_closed(&mut rx).await;
}

/// Complete the inbound handshake by hand
async fn handshake(raw: &PeerChannel, rx: &mut mpsc::Receiver<String>, codec: &WireCodec) {
    let hello = Message::Hello(Hello {
        peer_id: uuid::Uuid::new_v4().to_string(),
        address: None,
    });
    raw.send_text(codec.encode(hello).unwrap().1);
    let ack = rx.recv().await.expect("handshake ack");
    assert_eq!(codec.parse(&ack).unwrap().message.kind(), "HELLO_ACK");
}

#[tokio::test]
async fn test_rate_limited_frames_dropped_session_kept() {
    let listener = GossipTransport::new(
        GossipConfig {
            rate_limit: 5,
            ..Default::default()
        },
        Arc::new(FixedProbe(false)),
    );
    let codec = WireCodec::default();
    let (raw, mut rx) = raw_inbound(&listener);
    handshake(&raw, &mut rx, &codec).await;
    wait_for_peers(&listener, 1).await;

    let mut inbound = listener.subscribe();
    for i in 0..30 {
        raw.send_text(codec.encode(heartbeat(&format!("op{}", i))).unwrap().1);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(drain(&mut inbound).len(), 5);
    assert_eq!(listener.directory().len(), 1);
    assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));

    // Window slides: the same session is heard again
    tokio::time::sleep(Duration::from_millis(1100)).await;
    raw.send_text(codec.encode(heartbeat("late")).unwrap().1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let got = drain(&mut inbound);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message, heartbeat("late"));
}

fn dialer(target: usize, pacing: Duration) -> Arc<GossipTransport> {
    GossipTransport::new(
        GossipConfig {
            public_address: Some("127.0.0.1:9".to_string()),
            target_peers: target,
            connect_pacing: pacing,
            handshake_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        Arc::new(FixedProbe(true)),
    )
}

#[tokio::test]
async fn test_peer_list_dials_unseen_addresses_with_pacing() {
    let pacing = Duration::from_millis(100);
    let discovery = PeerDiscovery::new(dialer(5, pacing));

    // Nothing listens on these ports, so every dial fails fast
    let list = PeerList {
        peers: vec![
            "127.0.0.1:9".to_string(),
            "127.0.0.1:1".to_string(),
            "127.0.0.1:1".to_string(),
            "127.0.0.1:2".to_string(),
        ],
    };
    let started = std::time::Instant::now();
    let attempts = discovery.handle_peer_list(list).await.unwrap();

    assert_eq!(attempts, 2);
    assert!(started.elapsed() >= pacing * 2);
}

#[tokio::test]
async fn test_peer_list_ignored_at_public_target() {
    let transport = dialer(1, Duration::from_millis(100));
    let (tx, _rx) = mpsc::channel(8);
    transport
        .directory()
        .add_peer("p", PeerChannel::new(tx), Some("10.0.0.1:3018".to_string()), true, 1)
        .await
        .unwrap();

    let discovery = PeerDiscovery::new(transport);
    let list = PeerList {
        peers: vec!["127.0.0.1:1".to_string(), "10.0.0.1:3018".to_string()],
    };
    assert_eq!(discovery.handle_peer_list(list).await.unwrap(), 0);
}
