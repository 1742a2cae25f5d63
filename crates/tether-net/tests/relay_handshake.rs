//! End-to-end: a mobile client reaches a node runner through a relay on
//! loopback and completes the handshake over the relayed stream.

use std::time::Duration;

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use tokio_util::sync::CancellationToken;

use tether_net::circuit::circuit_destination;
use tether_net::{
    assemble, bring_up, connect_all, request, serve, BringUpOptions, ConnectError, ConnectPolicy,
    HandshakeConfig, PeerHandle,
};
use tether_shared::{Keyring, ListenScope, Role};

fn loopback() -> BringUpOptions {
    BringUpOptions {
        listen_port: Some(0),
        scope: ListenScope::Loopback,
    }
}

fn is_ipv4(addr: &Multiaddr) -> bool {
    matches!(addr.iter().next(), Some(Protocol::Ip4(_)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relayed_handshake() {
    tokio::time::timeout(Duration::from_secs(60), relayed_handshake())
        .await
        .expect("relay scenario timed out");
}

async fn relayed_handshake() {
    let keyring = Keyring::embedded();

    let relay = bring_up(Role::Relay, &keyring.identity(3).unwrap(), loopback())
        .await
        .unwrap();
    let relay_addrs: Vec<Multiaddr> = relay
        .listen_addrs()
        .await
        .into_iter()
        .filter(is_ipv4)
        .collect();
    assert!(!relay_addrs.is_empty());
    let relay_handle = PeerHandle::new(relay.peer_id(), relay_addrs);

    // Node runner: connect, reserve, answer handshakes.
    let runner = bring_up(Role::NodeRunner, &keyring.identity(6).unwrap(), loopback())
        .await
        .unwrap();
    runner.connect(&relay_handle).await.unwrap();
    let reserved = runner.reserve(&relay_handle).await.unwrap();
    assert_eq!(circuit_destination(&reserved), Some(runner.peer_id()));

    let responder_cancel = CancellationToken::new();
    let incoming = runner.accept().unwrap();
    tokio::spawn(serve(
        incoming,
        HandshakeConfig::default(),
        responder_cancel.clone(),
    ));

    // Mobile client: relay first, then the target through the circuit.
    let mobile = bring_up(
        Role::MobileClient,
        &keyring.identity(8).unwrap(),
        BringUpOptions::default(),
    )
    .await
    .unwrap();

    let outcome = connect_all(&mobile, &[relay_handle.clone()], &ConnectPolicy::default()).await;
    assert_eq!(outcome.succeeded, vec![relay.peer_id()]);

    let routed = assemble(&relay_handle, &PeerHandle::bare(runner.peer_id())).unwrap();
    assert_eq!(routed.id(), runner.peer_id());
    mobile.connect(&routed).await.unwrap();

    let stream = mobile.open_stream(runner.peer_id()).await.unwrap();
    request(stream, &CancellationToken::new()).await.unwrap();

    responder_cancel.cancel();
    mobile.shutdown().await;
    runner.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_circuit_through_unknown_relay_has_no_addresses() {
    let keyring = Keyring::embedded();
    let mobile = bring_up(
        Role::MobileClient,
        &keyring.identity(8).unwrap(),
        BringUpOptions::default(),
    )
    .await
    .unwrap();

    let relay = PeerHandle::new(
        keyring.identity(4).unwrap().peer_id(),
        vec!["/ip4/127.0.0.1/tcp/9".parse().unwrap()],
    );
    let target = PeerHandle::bare(keyring.identity(7).unwrap().peer_id());
    let routed = assemble(&relay, &target).unwrap();

    // The canonical circuit carries no relay transport and this host has
    // never learned one.
    assert_eq!(mobile.connect(&routed).await, Err(ConnectError::NoAddresses));
    mobile.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_bootstrap_peers_are_collected() {
    let keyring = Keyring::embedded();
    let runner = bring_up(Role::NodeRunner, &keyring.identity(7).unwrap(), loopback())
        .await
        .unwrap();

    // Nothing listens on these ports.
    let peers = vec![
        PeerHandle::new(
            keyring.identity(0).unwrap().peer_id(),
            vec!["/ip4/127.0.0.1/tcp/1".parse().unwrap()],
        ),
        PeerHandle::bare(keyring.identity(1).unwrap().peer_id()),
    ];
    let outcome = connect_all(&runner, &peers, &ConnectPolicy::default()).await;
    assert!(!outcome.succeeded_any());
    assert!(matches!(
        outcome.per_peer_errors.get(&peers[0].id()),
        Some(ConnectError::Unreachable(_))
    ));
    assert_eq!(
        outcome.per_peer_errors.get(&peers[1].id()),
        Some(&ConnectError::NoAddresses)
    );
    runner.shutdown().await;
}
