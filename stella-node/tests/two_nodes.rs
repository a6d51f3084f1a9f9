//! Two-node end-to-end test: frames injected on one node's local port
//! cross the encrypted tunnel and come out of the other node's local
//! port.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, timeout};

use stella_node::{Node, NodeConfig};
use stella_switch::{Port, PortState};

type FrameLog = Arc<Mutex<Vec<Vec<u8>>>>;

fn node_config(dir: &Path) -> NodeConfig {
    NodeConfig {
        data_dir: dir.to_path_buf(),
        config_file: dir.join("config.json"),
        identity_file: dir.join("identity"),
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

/// A local access port on VLAN 1 whose sink records delivered frames
fn lan_port(id: &str) -> (Port, FrameLog) {
    let log: FrameLog = Arc::new(Mutex::new(Vec::new()));
    let sink_log = Arc::clone(&log);

    let mut port = Port::new(id, id);
    port.state = PortState::Up;
    port.set_sink(Box::new(move |egress| {
        sink_log.lock().unwrap().push(egress.frame.to_vec());
        Ok(())
    }));
    (port, log)
}

fn eth_frame(dst: [u8; 6], src: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn wait_for_frames(log: &FrameLog, count: usize, what: &str) {
    timeout(Duration::from_secs(3), async {
        while log.lock().unwrap().len() < count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn test_frames_cross_the_tunnel() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let node_a = Node::new(node_config(dir_a.path())).unwrap();
    let node_b = Node::new(node_config(dir_b.path())).unwrap();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let addr_a: SocketAddr = node_a.transport().await.unwrap().local_addr().unwrap();
    let addr_b: SocketAddr = node_b.transport().await.unwrap().local_addr().unwrap();

    // Mutual peering
    node_a
        .connect_peer(addr_b, node_b.identity().clone())
        .await
        .unwrap();
    node_b
        .connect_peer(addr_a, node_a.identity().clone())
        .await
        .unwrap();

    // A LAN attachment on each node
    let (port_a, log_a) = lan_port("lan");
    node_a.add_local_port(port_a).await.unwrap();
    let (port_b, log_b) = lan_port("lan");
    node_b.add_local_port(port_b).await.unwrap();

    let mac_a = [0x02, 0xaa, 0, 0, 0, 0x01];
    let mac_b = [0x02, 0xbb, 0, 0, 0, 0x02];

    // Broadcast from A's LAN floods across the tunnel into B's LAN
    let discovery_frame = eth_frame([0xff; 6], mac_a, b"who is out there");
    node_a
        .handle_local_frame("lan", &discovery_frame)
        .await
        .unwrap();

    wait_for_frames(&log_b, 1, "broadcast across the tunnel").await;
    assert_eq!(log_b.lock().unwrap()[0], discovery_frame);

    // B answers with unicast; both switches have now learned mac_a
    let reply_frame = eth_frame(mac_a, mac_b, b"i am");
    node_b.handle_local_frame("lan", &reply_frame).await.unwrap();

    wait_for_frames(&log_a, 1, "unicast reply").await;
    assert_eq!(log_a.lock().unwrap()[0], reply_frame);

    // B's switch learned mac_a behind its tunnel port
    let switch_b = node_b.switch().await.unwrap();
    let learned = switch_b
        .mac_table()
        .lookup(1, stella_protocol::Mac::from_bytes(&mac_a).unwrap())
        .expect("mac_a learned at B");
    assert!(learned.starts_with("peer-"));

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();
}

#[tokio::test]
async fn test_whois_learns_third_party_identity() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let node_a = Node::new(node_config(dir_a.path())).unwrap();
    let node_b = Node::new(node_config(dir_b.path())).unwrap();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let addr_a: SocketAddr = node_a.transport().await.unwrap().local_addr().unwrap();
    let addr_b: SocketAddr = node_b.transport().await.unwrap().local_addr().unwrap();
    node_a
        .connect_peer(addr_b, node_b.identity().clone())
        .await
        .unwrap();
    node_b
        .connect_peer(addr_a, node_a.identity().clone())
        .await
        .unwrap();

    // B knows a third node; A asks B who it is
    let third = stella_protocol::Identity::generate();
    node_b
        .connect_peer("127.0.0.1:1".parse().unwrap(), third.clone())
        .await
        .unwrap();

    assert!(node_a.lookup_identity(third.address()).await.is_none());
    node_a
        .request_identity(addr_b, third.address())
        .await
        .unwrap();

    timeout(Duration::from_secs(3), async {
        while node_a.lookup_identity(third.address()).await.is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("whois answer never arrived");

    let learned = node_a.lookup_identity(third.address()).await.unwrap();
    assert_eq!(learned.address(), third.address());
    assert_eq!(learned.public_key(), third.public_key());
    assert!(
        !learned.has_private_key(),
        "identities never travel with private keys"
    );

    // Asking B about a node nobody knows yields no cache entry
    let stranger = stella_protocol::Identity::generate();
    node_a
        .request_identity(addr_b, stranger.address())
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(node_a.lookup_identity(stranger.address()).await.is_none());

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();
}

#[tokio::test]
async fn test_large_frames_fragment_and_reassemble() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let node_a = Node::new(node_config(dir_a.path())).unwrap();
    let node_b = Node::new(node_config(dir_b.path())).unwrap();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let addr_a: SocketAddr = node_a.transport().await.unwrap().local_addr().unwrap();
    let addr_b: SocketAddr = node_b.transport().await.unwrap().local_addr().unwrap();
    node_a
        .connect_peer(addr_b, node_b.identity().clone())
        .await
        .unwrap();
    node_b
        .connect_peer(addr_a, node_a.identity().clone())
        .await
        .unwrap();

    let (port_a, _log_a) = lan_port("lan");
    node_a.add_local_port(port_a).await.unwrap();
    let (port_b, log_b) = lan_port("lan");
    node_b.add_local_port(port_b).await.unwrap();

    // Larger than the tunnel MTU, so the packet travels as fragments
    let payload: Vec<u8> = (0..2000u16).map(|i| i as u8).collect();
    let big_frame = eth_frame([0xff; 6], [0x02, 0xaa, 0, 0, 0, 0x01], &payload);
    node_a.handle_local_frame("lan", &big_frame).await.unwrap();

    wait_for_frames(&log_b, 1, "reassembled jumbo frame").await;
    assert_eq!(log_b.lock().unwrap()[0], big_frame);

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();
}
