//! Relay circuit address assembly.
//!
//! A relayed address reads "dial the relay, then ask it for a circuit to the
//! target": `<relay-addr>/p2p/<relay>/p2p-circuit/p2p/<target>`. Circuit
//! addresses are built immediately before each connection attempt and never
//! cached, since reservations on the relay expire.

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::{debug, info};

use crate::address::{with_peer_suffix, PeerHandle};
use crate::error::CircuitError;

/// Derive a handle for `target` that routes through `relay`.
///
/// The result carries exactly one address in canonical
/// `/p2p/<relay>/p2p-circuit/p2p/<target>` form. The relay's transport
/// address is intentionally left out; the host resolves it from the
/// addresses it learned when it connected to the relay.
pub fn assemble(relay: &PeerHandle, target: &PeerHandle) -> Result<PeerHandle, CircuitError> {
    let relay_addr = relay
        .addresses()
        .first()
        .ok_or(CircuitError::RelayHasNoAddress(relay.id()))?;

    if let Some(Protocol::P2p(other)) = relay_addr.iter().last() {
        if other != relay.id() {
            return Err(CircuitError::CircuitMismatch {
                expected: relay.id(),
                derived: other,
            });
        }
    }

    let marker = Multiaddr::empty()
        .with(Protocol::P2pCircuit)
        .with(Protocol::P2p(target.id()));

    let mut encapsulated = with_peer_suffix(relay_addr, relay.id());
    for protocol in marker.iter() {
        encapsulated.push(protocol);
    }

    let derived = circuit_destination(&encapsulated).ok_or(CircuitError::MissingDestination)?;
    if derived != target.id() {
        return Err(CircuitError::CircuitMismatch {
            expected: target.id(),
            derived,
        });
    }

    let canonical = Multiaddr::empty()
        .with(Protocol::P2p(relay.id()))
        .with(Protocol::P2pCircuit)
        .with(Protocol::P2p(derived));

    info!(
        relay = %relay.id(),
        target = %derived,
        via = %encapsulated,
        "Assembled relay circuit address"
    );
    debug!(addr = %canonical, "Canonical circuit address");

    Ok(PeerHandle::new(derived, vec![canonical]))
}

/// The peer a circuit address leads to: the last `/p2p` after the last
/// `/p2p-circuit`.
pub fn circuit_destination(addr: &Multiaddr) -> Option<PeerId> {
    let mut after_circuit = false;
    let mut destination = None;
    for protocol in addr.iter() {
        match protocol {
            Protocol::P2pCircuit => {
                after_circuit = true;
                destination = None;
            }
            Protocol::P2p(id) if after_circuit => destination = Some(id),
            _ => {}
        }
    }
    destination
}

pub fn is_circuit(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Listen address that asks `relay` for a reservation:
/// `<relay-addr>/p2p/<relay>/p2p-circuit`.
pub fn reservation_addr(relay: &PeerHandle) -> Result<Multiaddr, CircuitError> {
    let relay_addr = relay
        .addresses()
        .first()
        .ok_or(CircuitError::RelayHasNoAddress(relay.id()))?;
    Ok(with_peer_suffix(relay_addr, relay.id()).with(Protocol::P2pCircuit))
}

/// Addresses other peers can use to reach `local` through `relay`, one per
/// relay address.
pub fn advertised_addrs(relay: &PeerHandle, local: PeerId) -> Vec<Multiaddr> {
    relay
        .addresses()
        .iter()
        .filter(|addr| !is_circuit(addr))
        .map(|addr| {
            with_peer_suffix(addr, relay.id())
                .with(Protocol::P2pCircuit)
                .with(Protocol::P2p(local))
        })
        .collect()
}

/// Reject targets that are themselves infrastructure peers.
pub fn validate_target(
    target: PeerId,
    bootstrap: &[PeerHandle],
    relays: &[PeerHandle],
) -> Result<(), CircuitError> {
    let is_infrastructure = bootstrap
        .iter()
        .chain(relays.iter())
        .any(|handle| handle.id() == target);
    if is_infrastructure {
        return Err(CircuitError::InvalidTarget(target));
    }
    Ok(())
}
