//! Composed libp2p `NetworkBehaviour` for Tether hosts.
//!
//! Every role carries the relay client, identify, DCUtR and the stream
//! behaviour. The relay server and Kademlia are toggled on or off by the
//! role policy.

use libp2p::{
    dcutr, identify,
    kad::{self, store::MemoryStore},
    relay,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
};

/// Composed network behaviour for Tether hosts.
///
/// Construction is handled by [`super::transport::build_swarm`] via
/// `SwarmBuilder`.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "TetherEvent")]
pub struct TetherBehaviour {
    /// Circuit relay v2 client: dial through relays and hold reservations
    pub relay_client: relay::client::Behaviour,
    /// Circuit relay v2 server, only for the relay role
    pub relay: Toggle<relay::Behaviour>,
    /// Distributed routing table; absent when routing is disabled
    pub kademlia: Toggle<kad::Behaviour<MemoryStore>>,
    pub identify: identify::Behaviour,
    /// Direct Connection Upgrade through Relay
    pub dcutr: dcutr::Behaviour,
    /// Raw application streams (the handshake protocol)
    pub stream: libp2p_stream::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum TetherEvent {
    RelayClient(relay::client::Event),
    Relay(relay::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
    Dcutr(dcutr::Event),
    /// The stream behaviour reports nothing through the swarm.
    Stream,
}

impl From<relay::client::Event> for TetherEvent {
    fn from(event: relay::client::Event) -> Self {
        TetherEvent::RelayClient(event)
    }
}

impl From<relay::Event> for TetherEvent {
    fn from(event: relay::Event) -> Self {
        TetherEvent::Relay(event)
    }
}

impl From<kad::Event> for TetherEvent {
    fn from(event: kad::Event) -> Self {
        TetherEvent::Kademlia(event)
    }
}

impl From<identify::Event> for TetherEvent {
    fn from(event: identify::Event) -> Self {
        TetherEvent::Identify(event)
    }
}

impl From<dcutr::Event> for TetherEvent {
    fn from(event: dcutr::Event) -> Self {
        TetherEvent::Dcutr(event)
    }
}

impl From<()> for TetherEvent {
    fn from(_: ()) -> Self {
        TetherEvent::Stream
    }
}
