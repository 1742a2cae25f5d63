//! Address book.
//!
//! Remembers the direct addresses learned for each peer (from handles the
//! host was asked to connect to, from outbound connections and from
//! identify). Canonical circuit addresses (`/p2p/<relay>/p2p-circuit/...`) carry
//! no relay transport and are expanded here before dialing.

use std::collections::HashMap;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::debug;

use crate::address::PeerHandle;
use crate::circuit::is_circuit;

#[derive(Debug, Default, Clone)]
pub struct AddressBook {
    known: HashMap<PeerId, Vec<Multiaddr>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the direct addresses of a handle.
    pub fn learn(&mut self, handle: &PeerHandle) {
        for addr in handle.addresses() {
            self.learn_addr(handle.id(), addr.clone());
        }
    }

    /// Remember a single direct address. Circuit addresses are ignored.
    pub fn learn_addr(&mut self, peer_id: PeerId, addr: Multiaddr) {
        if is_circuit(&addr) {
            return;
        }
        let addr = strip_peer_suffix(addr, peer_id);
        if addr.is_empty() {
            return;
        }
        let entry = self.known.entry(peer_id).or_default();
        if !entry.contains(&addr) {
            debug!(peer = %peer_id, addr = %addr, "Learned peer address");
            entry.push(addr);
        }
    }

    pub fn addresses_of(&self, peer_id: &PeerId) -> &[Multiaddr] {
        self.known.get(peer_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Turn `addr` into dialable addresses.
    ///
    /// An address that starts with `/p2p/<relay>` and contains a circuit is
    /// prefixed with every known direct address of the relay; an unknown
    /// relay yields nothing. Any other address is returned unchanged.
    pub fn resolve(&self, addr: &Multiaddr) -> Vec<Multiaddr> {
        match addr.iter().next() {
            Some(Protocol::P2p(relay)) if is_circuit(addr) => self
                .addresses_of(&relay)
                .iter()
                .map(|base| {
                    let mut full = base.clone();
                    for protocol in addr.iter() {
                        full.push(protocol);
                    }
                    full
                })
                .collect(),
            _ => vec![addr.clone()],
        }
    }

    /// Resolve every address of a handle.
    pub fn resolve_handle(&self, handle: &PeerHandle) -> Vec<Multiaddr> {
        handle
            .addresses()
            .iter()
            .flat_map(|addr| self.resolve(addr))
            .collect()
    }
}

fn strip_peer_suffix(mut addr: Multiaddr, peer_id: PeerId) -> Multiaddr {
    if let Some(Protocol::P2p(id)) = addr.iter().last() {
        if id == peer_id {
            addr.pop();
        }
    }
    addr
}
