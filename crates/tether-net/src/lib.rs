// Relay connectivity layer built on libp2p: address handling, relay
// circuits, bootstrap orchestration, role-aware hosts and the handshake.

pub mod address;
pub mod behaviour;
pub mod book;
pub mod bootstrap;
pub mod circuit;
pub mod error;
pub mod handshake;
pub mod host;
mod swarm;
pub mod transport;

use libp2p::StreamProtocol;
use tether_shared::constants::HANDSHAKE_PROTOCOL_ID;

/// Stream protocol the handshake runs on.
pub const HANDSHAKE_PROTOCOL: StreamProtocol = StreamProtocol::new(HANDSHAKE_PROTOCOL_ID);

pub use address::{load_handles, parse_batch, split_list, ParsedBatch, PeerHandle};
pub use behaviour::{TetherBehaviour, TetherEvent};
pub use book::AddressBook;
pub use bootstrap::{connect_all, connect_relay, BootstrapOutcome, ConnectPolicy, Dialer};
pub use circuit::{advertised_addrs, assemble, reservation_addr, validate_target};
pub use error::{
    AddressError, BringUpError, CircuitError, ConnectError, HandshakeError, Interrupted,
    ReserveError, RoutingError, StreamError,
};
pub use handshake::{request, respond, serve, HandshakeConfig, HandshakeOutcome};
pub use host::{bring_up, BringUpOptions, Host};
pub use transport::build_swarm;
