//! Swarm event loop with tokio mpsc command / oneshot reply pattern.
//!
//! The swarm is owned by a single [`Driver`] running in a dedicated tokio
//! task. [`crate::host::Host`] handles send [`SwarmCommand`]s into it and
//! await the reply on a oneshot channel. Replies for dials, reservations and
//! routing queries are parked until the matching swarm event arrives.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    core::transport::ListenerId,
    identify, kad,
    multiaddr::Protocol,
    relay,
    swarm::{
        dial_opts::{DialOpts, PeerCondition},
        ConnectionId, DialError, SwarmEvent,
    },
    Multiaddr, PeerId, Swarm,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::address::PeerHandle;
use crate::behaviour::{TetherBehaviour, TetherEvent};
use crate::book::AddressBook;
use crate::circuit::{is_circuit, reservation_addr};
use crate::error::{BringUpError, ConnectError, ReserveError, RoutingError};

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub(crate) enum SwarmCommand {
    /// Establish a connection to a peer, resolving circuit addresses first.
    Connect {
        handle: PeerHandle,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    /// Ask a relay for a reservation. Replies with the circuit address
    /// other peers can dial.
    Reserve {
        relay: PeerHandle,
        reply: oneshot::Sender<Result<Multiaddr, ReserveError>>,
    },
    /// Run a Kademlia bootstrap query to completion.
    BootstrapRouting {
        reply: oneshot::Sender<Result<(), RoutingError>>,
    },
    /// Number of entries in the routing table.
    RoutingPeers {
        reply: oneshot::Sender<Result<usize, RoutingError>>,
    },
    ListenAddrs(oneshot::Sender<Vec<Multiaddr>>),
    ExternalAddrs(oneshot::Sender<Vec<Multiaddr>>),
    ConnectedPeers(oneshot::Sender<Vec<PeerId>>),
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// A transport listener opened during bring-up.
#[derive(Debug)]
struct Listener {
    id: ListenerId,
    requested: Multiaddr,
    primary: bool,
    addrs: Vec<Multiaddr>,
}

#[derive(Debug)]
struct PendingReservation {
    listener: ListenerId,
    addr: Multiaddr,
    reply: oneshot::Sender<Result<Multiaddr, ReserveError>>,
}

pub(crate) struct Driver {
    swarm: Swarm<TetherBehaviour>,
    book: AddressBook,
    /// Confirm listen addresses as external (public reachability).
    public: bool,
    listeners: Vec<Listener>,
    primary_failure: Option<BringUpError>,
    pending_dials: HashMap<ConnectionId, oneshot::Sender<Result<(), ConnectError>>>,
    pending_reservations: HashMap<PeerId, PendingReservation>,
    pending_bootstraps: HashMap<kad::QueryId, oneshot::Sender<Result<(), RoutingError>>>,
}

impl Driver {
    pub(crate) fn new(swarm: Swarm<TetherBehaviour>, public: bool) -> Self {
        Self {
            swarm,
            book: AddressBook::new(),
            public,
            listeners: Vec::new(),
            primary_failure: None,
            pending_dials: HashMap::new(),
            pending_reservations: HashMap::new(),
            pending_bootstraps: HashMap::new(),
        }
    }

    /// Open a bring-up listener.
    ///
    /// A primary listener that cannot bind is an error; a secondary one is
    /// logged and skipped.
    pub(crate) fn listen(&mut self, addr: Multiaddr, primary: bool) -> Result<(), BringUpError> {
        // libp2p-tcp listens with SO_REUSEPORT, so a held port would be
        // silently shared with the other process.
        if let Err(e) = claim_tcp_port(&addr) {
            if primary {
                error!(addr = %addr, error = %e, "Listen port unavailable");
                return Err(BringUpError::TransportBind {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
            warn!(addr = %addr, error = %e, "Skipping secondary listener");
            return Ok(());
        }

        match self.swarm.listen_on(addr.clone()) {
            Ok(id) => {
                debug!(addr = %addr, primary, "Listener opened");
                self.listeners.push(Listener {
                    id,
                    requested: addr,
                    primary,
                    addrs: Vec::new(),
                });
                Ok(())
            }
            Err(e) if primary => Err(BringUpError::TransportBind {
                addr: addr.to_string(),
                reason: error_chain(&e),
            }),
            Err(e) => {
                warn!(addr = %addr, error = %error_chain(&e), "Skipping secondary listener");
                Ok(())
            }
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drive the swarm until every open listener has reported an address,
    /// or `timeout` elapses.
    pub(crate) async fn await_listeners(&mut self, timeout: Duration) -> Result<(), BringUpError> {
        let ready = async {
            loop {
                if let Some(e) = self.primary_failure.take() {
                    return Err(e);
                }
                if self.listeners.iter().all(|l| !l.addrs.is_empty()) {
                    return Ok(());
                }
                let event = self.swarm.select_next_some().await;
                self.handle_event(event);
            }
        };

        match tokio::time::timeout(timeout, ready).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Not every listener reported an address in time"
                );
                Ok(())
            }
        }
    }

    /// Run the event loop until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<SwarmCommand>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }

        info!(peer_id = %self.swarm.local_peer_id(), "Swarm event loop terminated");
    }

    fn handle_command(&mut self, cmd: SwarmCommand) {
        match cmd {
            SwarmCommand::Connect { handle, reply } => self.connect(handle, reply),
            SwarmCommand::Reserve { relay, reply } => self.reserve(relay, reply),
            SwarmCommand::BootstrapRouting { reply } => self.bootstrap_routing(reply),
            SwarmCommand::RoutingPeers { reply } => {
                let count = match self.swarm.behaviour_mut().kademlia.as_mut() {
                    Some(kademlia) => Ok(kademlia.kbuckets().map(|b| b.num_entries()).sum::<usize>()),
                    None => Err(RoutingError::Disabled),
                };
                let _ = reply.send(count);
            }
            SwarmCommand::ListenAddrs(reply) => {
                let addrs = self
                    .listeners
                    .iter()
                    .flat_map(|l| l.addrs.iter().cloned())
                    .collect();
                let _ = reply.send(addrs);
            }
            SwarmCommand::ExternalAddrs(reply) => {
                let _ = reply.send(self.swarm.external_addresses().cloned().collect());
            }
            SwarmCommand::ConnectedPeers(reply) => {
                let _ = reply.send(self.swarm.connected_peers().copied().collect());
            }
            SwarmCommand::Shutdown => {}
        }
    }

    fn connect(&mut self, handle: PeerHandle, reply: oneshot::Sender<Result<(), ConnectError>>) {
        let peer_id = handle.id();
        if self.swarm.is_connected(&peer_id) {
            debug!(peer = %peer_id, "Already connected");
            let _ = reply.send(Ok(()));
            return;
        }

        self.book.learn(&handle);
        let mut addrs = self.book.resolve_handle(&handle);
        if addrs.is_empty() {
            addrs = self.book.addresses_of(&peer_id).to_vec();
        }
        if addrs.is_empty() {
            warn!(peer = %peer_id, "No dialable addresses for peer");
            let _ = reply.send(Err(ConnectError::NoAddresses));
            return;
        }

        debug!(peer = %peer_id, addrs = ?addrs, "Dialing peer");
        let opts = DialOpts::peer_id(peer_id)
            .addresses(addrs)
            .condition(PeerCondition::Always)
            .build();
        let connection_id = opts.connection_id();

        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(connection_id, reply);
            }
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "Dial failed");
                let _ = reply.send(Err(connect_error(&e)));
            }
        }
    }

    fn reserve(
        &mut self,
        relay: PeerHandle,
        reply: oneshot::Sender<Result<Multiaddr, ReserveError>>,
    ) {
        let addr = match reservation_addr(&relay) {
            Ok(addr) => addr,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        self.book.learn(&relay);

        match self.swarm.listen_on(addr.clone()) {
            Ok(listener) => {
                debug!(relay = %relay.id(), addr = %addr, "Requesting relay reservation");
                let pending = PendingReservation {
                    listener,
                    addr,
                    reply,
                };
                if let Some(previous) = self.pending_reservations.insert(relay.id(), pending) {
                    let _ = previous
                        .reply
                        .send(Err(ReserveError::Denied("superseded".to_string())));
                }
            }
            Err(e) => {
                let reason = error_chain(&e);
                warn!(relay = %relay.id(), addr = %addr, error = %reason, "Relay listen failed");
                let _ = reply.send(Err(ReserveError::Listen {
                    addr: addr.to_string(),
                    reason,
                }));
            }
        }
    }

    fn bootstrap_routing(&mut self, reply: oneshot::Sender<Result<(), RoutingError>>) {
        let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() else {
            let _ = reply.send(Err(RoutingError::Disabled));
            return;
        };
        match kademlia.bootstrap() {
            Ok(query_id) => {
                debug!(query = ?query_id, "Kademlia bootstrap started");
                self.pending_bootstraps.insert(query_id, reply);
            }
            Err(e) => {
                debug!(error = %e, "Kademlia bootstrap not started");
                let _ = reply.send(Err(RoutingError::NoKnownPeers));
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<TetherEvent>) {
        match event {
            SwarmEvent::Behaviour(TetherEvent::RelayClient(event)) => self.on_relay_client(event),

            SwarmEvent::Behaviour(TetherEvent::Relay(event)) => match event {
                relay::Event::ReservationReqAccepted { src_peer_id, renewed } => {
                    info!(peer = %src_peer_id, renewed, "Accepted relay reservation");
                }
                relay::Event::CircuitReqAccepted {
                    src_peer_id,
                    dst_peer_id,
                } => {
                    info!(src = %src_peer_id, dst = %dst_peer_id, "Relaying circuit");
                }
                relay::Event::CircuitClosed {
                    src_peer_id,
                    dst_peer_id,
                    error,
                } => {
                    debug!(
                        src = %src_peer_id,
                        dst = %dst_peer_id,
                        error = ?error,
                        "Relayed circuit closed"
                    );
                }
                other => debug!(event = ?other, "Relay server event"),
            },

            SwarmEvent::Behaviour(TetherEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id,
                result: kad::QueryResult::Bootstrap(result),
                step,
                ..
            })) => {
                let done = match result {
                    Ok(ok) => {
                        debug!(remaining = ok.num_remaining, "Kademlia bootstrap progressed");
                        step.last.then_some(Ok(()))
                    }
                    Err(e) => Some(Err(RoutingError::Failed(e.to_string()))),
                };
                if let Some(result) = done {
                    if let Some(reply) = self.pending_bootstraps.remove(&id) {
                        let _ = reply.send(result);
                    }
                }
            }

            SwarmEvent::Behaviour(TetherEvent::Kademlia(event)) => {
                debug!(event = ?event, "Kademlia event");
            }

            SwarmEvent::Behaviour(TetherEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    peer = %peer_id,
                    protocol = ?info.protocol_version,
                    "Identify: received info from peer"
                );
                for addr in info.listen_addrs.into_iter().filter(|a| !is_circuit(a)) {
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        kademlia.add_address(&peer_id, addr.clone());
                    }
                    self.book.learn_addr(peer_id, addr);
                }
            }

            SwarmEvent::Behaviour(TetherEvent::Identify(_)) | SwarmEvent::Behaviour(TetherEvent::Stream) => {}

            SwarmEvent::Behaviour(TetherEvent::Dcutr(event)) => {
                debug!(event = ?event, "DCUtR event");
            }

            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let addr = endpoint.get_remote_address().clone();
                if endpoint.is_dialer() && !is_circuit(&addr) {
                    self.book.learn_addr(peer_id, addr.clone());
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        kademlia.add_address(&peer_id, addr.clone());
                    }
                }
                info!(
                    peer = %peer_id,
                    addr = %addr,
                    relayed = is_circuit(&addr),
                    "Peer connected"
                );
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Ok(()));
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    info!(peer = %peer_id, "Peer disconnected");
                }
            }

            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(connect_error(&error)));
                }
            }

            SwarmEvent::IncomingConnectionError { error, .. } => {
                warn!(error = %error, "Incoming connection error");
            }

            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                if let Some(listener) = self.listeners.iter_mut().find(|l| l.id == listener_id) {
                    listener.addrs.push(address.clone());
                    if self.public && !is_circuit(&address) {
                        self.swarm.add_external_address(address.clone());
                    }
                    info!(addr = %address, "Listening on new address");
                } else {
                    info!(addr = %address, "Listening on relayed address");
                }
            }

            SwarmEvent::ExpiredListenAddr {
                listener_id,
                address,
            } => {
                if let Some(listener) = self.listeners.iter_mut().find(|l| l.id == listener_id) {
                    listener.addrs.retain(|a| a != &address);
                }
                if self.public {
                    self.swarm.remove_external_address(&address);
                }
                debug!(addr = %address, "Listen address expired");
            }

            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                let reason = match reason {
                    Ok(()) => "listener closed".to_string(),
                    Err(e) => error_chain(&e),
                };
                self.on_listener_failed(listener_id, reason);
            }

            SwarmEvent::ListenerError { listener_id, error } => {
                self.on_listener_failed(listener_id, error_chain(&error));
            }

            _ => {}
        }
    }

    fn on_relay_client(&mut self, event: relay::client::Event) {
        match event {
            relay::client::Event::ReservationReqAccepted {
                relay_peer_id,
                renewal,
                ..
            } => {
                info!(relay = %relay_peer_id, renewal, "Relay reservation accepted");
                if let Some(pending) = self.pending_reservations.remove(&relay_peer_id) {
                    let local = *self.swarm.local_peer_id();
                    let _ = pending.reply.send(Ok(pending.addr.with(Protocol::P2p(local))));
                }
            }
            relay::client::Event::InboundCircuitEstablished { src_peer_id, .. } => {
                info!(src = %src_peer_id, "Inbound relayed circuit established");
            }
            other => debug!(event = ?other, "Relay client event"),
        }
    }

    fn on_listener_failed(&mut self, listener_id: ListenerId, reason: String) {
        let relay = self
            .pending_reservations
            .iter()
            .find(|(_, p)| p.listener == listener_id)
            .map(|(relay, _)| *relay);
        if let Some(relay) = relay {
            if let Some(pending) = self.pending_reservations.remove(&relay) {
                warn!(relay = %relay, reason = %reason, "Relay reservation failed");
                let _ = pending.reply.send(Err(ReserveError::Denied(reason)));
            }
            return;
        }

        if let Some(pos) = self.listeners.iter().position(|l| l.id == listener_id) {
            let listener = self.listeners.remove(pos);
            if listener.primary && listener.addrs.is_empty() {
                error!(reason = %reason, "Primary listener failed");
                self.primary_failure = Some(BringUpError::TransportBind {
                    addr: listener.requested.to_string(),
                    reason,
                });
            } else {
                warn!(reason = %reason, "Listener closed");
            }
        }
    }
}

/// Bind and release a fixed TCP port without port reuse, so that a port
/// already held by another listener is reported instead of shared.
fn claim_tcp_port(addr: &Multiaddr) -> io::Result<()> {
    let mut ip = None;
    let mut port = None;
    for protocol in addr.iter() {
        match protocol {
            Protocol::Ip4(v4) => ip = Some(IpAddr::V4(v4)),
            Protocol::Ip6(v6) => ip = Some(IpAddr::V6(v6)),
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    match (ip, port) {
        (Some(ip), Some(port)) if port != 0 => {
            TcpListener::bind(SocketAddr::new(ip, port)).map(drop)
        }
        _ => Ok(()),
    }
}

/// Render an error with its sources. libp2p transport errors often carry
/// their detail only in `source()`.
fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut parts = Vec::new();
    let mut current = Some(e);
    while let Some(err) = current {
        let text = err.to_string();
        if !text.is_empty() && parts.last() != Some(&text) {
            parts.push(text);
        }
        current = err.source();
    }
    if parts.is_empty() {
        format!("{e:?}")
    } else {
        parts.join(": ")
    }
}

fn connect_error(e: &DialError) -> ConnectError {
    match e {
        DialError::NoAddresses => ConnectError::NoAddresses,
        other => ConnectError::Unreachable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_tcp_port_detects_held_port() {
        let held = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap();
        assert!(claim_tcp_port(&addr).is_err());

        drop(held);
        assert!(claim_tcp_port(&addr).is_ok());
    }

    #[test]
    fn test_claim_skips_ephemeral_and_udp() {
        assert!(claim_tcp_port(&"/ip4/127.0.0.1/tcp/0".parse().unwrap()).is_ok());
        assert!(claim_tcp_port(&"/ip4/127.0.0.1/udp/4001/quic-v1".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_error_chain_includes_source() {
        let inner = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        let err: libp2p::TransportError<io::Error> = libp2p::TransportError::Other(inner);
        assert_eq!(error_chain(&err), "address in use");
    }
}
