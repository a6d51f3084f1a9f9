//! End-to-end discovery exchange between two live transports

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use stella_protocol::Identity;
use stella_transport::{
    is_discovery_message, DatagramSender, DiscoveryConfig, DiscoveryManager, RecvHandler,
    ReliableUdpTransport, TransportConfig,
};

/// Build a transport + discovery pair whose receive handler routes
/// discovery payloads into the manager.
async fn discovery_node() -> (Arc<ReliableUdpTransport>, Arc<DiscoveryManager>) {
    let identity = Identity::generate();
    let transport = Arc::new(ReliableUdpTransport::new(
        TransportConfig {
            port: 0,
            encryption_enabled: false,
            ..Default::default()
        },
        identity.clone(),
    ));

    let discovery = Arc::new(DiscoveryManager::with_config(
        identity,
        Arc::clone(&transport) as Arc<dyn DatagramSender>,
        DiscoveryConfig {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    ));

    let routed = Arc::clone(&discovery);
    let handler: RecvHandler = Arc::new(move |addr, payload| {
        if is_discovery_message(&payload) {
            let dm = Arc::clone(&routed);
            tokio::spawn(async move { dm.handle_message(addr, &payload).await });
        }
    });
    transport.start(handler).await.unwrap();

    (transport, discovery)
}

#[tokio::test]
async fn test_hello_response_builds_mutual_peer_table() {
    let (transport_a, discovery_a) = discovery_node().await;
    let (transport_b, discovery_b) = discovery_node().await;

    let addr_a = transport_a.local_addr().unwrap();
    let addr_b = transport_b.local_addr().unwrap();

    let peer = discovery_a.discover(addr_b).await.unwrap();
    assert_eq!(
        peer.identity.address(),
        transport_b.identity().address(),
        "peer identity derived from the announced key"
    );
    assert!(peer.connected, "response marks the peer connected");

    // B learned about A from the hello
    let peer_at_b = discovery_b.peer_by_addr(addr_a).expect("A known to B");
    assert_eq!(peer_at_b.identity.address(), transport_a.identity().address());

    discovery_a.stop().await;
    discovery_b.stop().await;
    transport_a.stop().await;
    transport_b.stop().await;
}

#[tokio::test]
async fn test_ping_pong_measures_latency() {
    let (transport_a, discovery_a) = discovery_node().await;
    let (transport_b, discovery_b) = discovery_node().await;

    let addr_b = transport_b.local_addr().unwrap();
    discovery_a.discover(addr_b).await.unwrap();

    discovery_a.send_ping(addr_b).await.unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if discovery_a
                .peer_by_addr(addr_b)
                .is_some_and(|p| p.latency_ms.is_some())
            {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pong never measured");

    discovery_a.stop().await;
    discovery_b.stop().await;
    transport_a.stop().await;
    transport_b.stop().await;
}
