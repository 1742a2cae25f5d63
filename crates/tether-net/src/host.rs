//! Role-aware bring-up and the `Host` handle.
//!
//! [`bring_up`] builds the swarm for a role, opens the role's listeners,
//! waits for them to report addresses and then hands the swarm to the driver
//! task. Everything after that goes through [`Host`].

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId, Stream};
use libp2p_stream::{IncomingStreams, OpenStreamError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use tether_shared::constants::{DEFAULT_LISTEN_PORT, LISTEN_READY_TIMEOUT};
use tether_shared::{Identity, ListenScope, Reachability, Role};

use crate::address::PeerHandle;
use crate::bootstrap::Dialer;
use crate::error::{BringUpError, ConnectError, ReserveError, RoutingError, StreamError};
use crate::swarm::{Driver, SwarmCommand};
use crate::transport::build_swarm;
use crate::HANDSHAKE_PROTOCOL;

const COMMAND_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct BringUpOptions {
    /// Port for fixed-port listeners. `None` means [`DEFAULT_LISTEN_PORT`].
    pub listen_port: Option<u16>,
    pub scope: ListenScope,
}

/// Build a running host for `role` with `identity`.
///
/// Never connects to any peer.
pub async fn bring_up(
    role: Role,
    identity: &Identity,
    options: BringUpOptions,
) -> Result<Host, BringUpError> {
    let policy = role.policy();
    let port = options.listen_port.unwrap_or(DEFAULT_LISTEN_PORT);

    let swarm = build_swarm(identity.keypair(), &policy)?;
    let peer_id = *swarm.local_peer_id();
    let control = swarm.behaviour().stream.new_control();

    let mut driver = Driver::new(swarm, policy.reachability == Reachability::Public);

    for template in policy.listen {
        let text = template.render(port, options.scope);
        let addr: Multiaddr = text.parse().map_err(|e| {
            BringUpError::Configuration(format!("invalid listen address '{text}': {e}"))
        })?;
        driver.listen(addr, template.primary)?;
    }

    if policy.listens() {
        if driver.listener_count() == 0 {
            return Err(BringUpError::TransportBind {
                addr: "*".to_string(),
                reason: "no listener could be opened".to_string(),
            });
        }
        driver.await_listeners(LISTEN_READY_TIMEOUT).await?;
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    tokio::spawn(driver.run(cmd_rx));

    let host = Host {
        peer_id,
        role,
        cmd_tx,
        control,
    };

    info!(
        peer_id = %peer_id,
        role = %role,
        key_index = identity.index(),
        "Host is up"
    );
    Ok(host)
}

/// Cheap, clonable handle to a running swarm.
#[derive(Clone)]
pub struct Host {
    peer_id: PeerId,
    role: Role,
    cmd_tx: mpsc::Sender<SwarmCommand>,
    control: libp2p_stream::Control,
}

impl Host {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Addresses the host listens on, in listener order.
    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.query(SwarmCommand::ListenAddrs).await.unwrap_or_default()
    }

    pub async fn external_addrs(&self) -> Vec<Multiaddr> {
        self.query(SwarmCommand::ExternalAddrs).await.unwrap_or_default()
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.query(SwarmCommand::ConnectedPeers).await.unwrap_or_default()
    }

    /// Connect to `peer`. Resolves once a connection exists.
    pub async fn connect(&self, peer: &PeerHandle) -> Result<(), ConnectError> {
        let handle = peer.clone();
        self.query(|reply| SwarmCommand::Connect { handle, reply })
            .await
            .ok_or(ConnectError::HostClosed)?
    }

    /// Obtain a reservation on `relay`; returns the circuit address other
    /// peers can dial to reach this host.
    pub async fn reserve(&self, relay: &PeerHandle) -> Result<Multiaddr, ReserveError> {
        let relay = relay.clone();
        self.query(|reply| SwarmCommand::Reserve { relay, reply })
            .await
            .ok_or(ReserveError::HostClosed)?
    }

    pub async fn bootstrap_routing(&self) -> Result<(), RoutingError> {
        self.query(|reply| SwarmCommand::BootstrapRouting { reply })
            .await
            .ok_or(RoutingError::HostClosed)?
    }

    pub async fn routing_peers(&self) -> Result<usize, RoutingError> {
        self.query(|reply| SwarmCommand::RoutingPeers { reply })
            .await
            .ok_or(RoutingError::HostClosed)?
    }

    /// Open a handshake stream to a connected peer.
    pub async fn open_stream(&self, peer: PeerId) -> Result<Stream, StreamError> {
        let mut control = self.control.clone();
        control
            .open_stream(peer, HANDSHAKE_PROTOCOL)
            .await
            .map_err(|e| match e {
                OpenStreamError::UnsupportedProtocol(p) => {
                    StreamError::UnsupportedProtocol(p.to_string())
                }
                OpenStreamError::Io(e) => StreamError::Io(e),
                other => StreamError::Io(std::io::Error::other(other.to_string())),
            })
    }

    /// Register as the handler for inbound handshake streams.
    pub fn accept(&self) -> Result<IncomingStreams, StreamError> {
        let mut control = self.control.clone();
        control
            .accept(HANDSHAKE_PROTOCOL)
            .map_err(|_| StreamError::AlreadyRegistered(HANDSHAKE_PROTOCOL.to_string()))
    }

    /// Stop the driver task. Outstanding requests resolve as closed.
    pub async fn shutdown(&self) {
        if self.cmd_tx.send(SwarmCommand::Shutdown).await.is_err() {
            debug!("Host already shut down");
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SwarmCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.ok()?;
        rx.await.ok()
    }
}

#[async_trait]
impl Dialer for Host {
    async fn connect(&self, peer: &PeerHandle) -> Result<(), ConnectError> {
        Host::connect(self, peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_shared::Keyring;

    fn loopback(port: u16) -> BringUpOptions {
        BringUpOptions {
            listen_port: Some(port),
            scope: ListenScope::Loopback,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_listens_on_ipv4_first() {
        let identity = Keyring::embedded().identity(0).unwrap();
        let host = bring_up(Role::Bootstrap, &identity, loopback(0)).await.unwrap();

        assert_eq!(host.peer_id(), identity.peer_id());
        let addrs = host.listen_addrs().await;
        assert!(!addrs.is_empty());
        assert!(addrs[0].to_string().starts_with("/ip4/127.0.0.1/tcp/"));

        // Public roles confirm their listen addresses.
        let external = host.external_addrs().await;
        assert!(external.contains(&addrs[0]));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_mobile_client_does_not_listen() {
        let identity = Keyring::embedded().identity(8).unwrap();
        let host = bring_up(Role::MobileClient, &identity, BringUpOptions::default())
            .await
            .unwrap();
        assert!(host.listen_addrs().await.is_empty());
        assert!(host.external_addrs().await.is_empty());
        assert_eq!(host.bootstrap_routing().await, Err(RoutingError::Disabled));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_node_runner_is_private() {
        let identity = Keyring::embedded().identity(6).unwrap();
        let host = bring_up(Role::NodeRunner, &identity, loopback(0)).await.unwrap();
        assert!(!host.listen_addrs().await.is_empty());
        assert!(host.external_addrs().await.is_empty());
        assert_eq!(host.routing_peers().await, Ok(0));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_primary_bind_failure_is_fatal() {
        let keyring = Keyring::embedded();
        let first = bring_up(Role::Bootstrap, &keyring.identity(0).unwrap(), loopback(0))
            .await
            .unwrap();
        let port = first.listen_addrs().await[0]
            .iter()
            .find_map(|p| match p {
                libp2p::multiaddr::Protocol::Tcp(port) => Some(port),
                _ => None,
            })
            .unwrap();

        let second = bring_up(Role::Bootstrap, &keyring.identity(1).unwrap(), loopback(port)).await;
        match second {
            Err(BringUpError::TransportBind { addr, reason }) => {
                assert_eq!(addr, format!("/ip4/127.0.0.1/tcp/{port}"));
                assert!(!reason.is_empty());
            }
            other => panic!("expected a bind failure, got {:?}", other.map(|h| h.peer_id())),
        }
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_held_by_plain_socket_is_fatal() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let identity = Keyring::embedded().identity(3).unwrap();
        let result = bring_up(Role::Relay, &identity, loopback(port)).await;
        assert!(matches!(result, Err(BringUpError::TransportBind { .. })));
        drop(held);
    }

    #[tokio::test]
    async fn test_routing_bootstrap_without_peers() {
        let identity = Keyring::embedded().identity(0).unwrap();
        let host = bring_up(Role::Bootstrap, &identity, loopback(0)).await.unwrap();
        assert_eq!(host.bootstrap_routing().await, Err(RoutingError::NoKnownPeers));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_without_addresses() {
        let identity = Keyring::embedded().identity(8).unwrap();
        let host = bring_up(Role::MobileClient, &identity, BringUpOptions::default())
            .await
            .unwrap();
        let stranger = PeerHandle::bare(PeerId::random());
        assert_eq!(host.connect(&stranger).await, Err(ConnectError::NoAddresses));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_host_reports_closed() {
        let identity = Keyring::embedded().identity(8).unwrap();
        let host = bring_up(Role::MobileClient, &identity, BringUpOptions::default())
            .await
            .unwrap();
        host.shutdown().await;

        let peer = PeerHandle::bare(PeerId::random());
        assert_eq!(host.connect(&peer).await, Err(ConnectError::HostClosed));
        assert!(host.listen_addrs().await.is_empty());
    }
}
