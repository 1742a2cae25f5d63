use libp2p::PeerId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Malformed address '{input}': {reason}")]
    Malformed { input: String, reason: String },

    #[error("Address '{input}' has no /p2p/<peer-id> component")]
    MissingPeerId { input: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("Relay {0} has no addresses")]
    RelayHasNoAddress(PeerId),

    #[error("Circuit address resolves to {derived}, expected {expected}")]
    CircuitMismatch { expected: PeerId, derived: PeerId },

    #[error("Circuit address has no destination peer")]
    MissingDestination,

    #[error("Peer {0} is a bootstrap or relay peer and cannot be a circuit target")]
    InvalidTarget(PeerId),
}

/// A bounded step that stopped before its future completed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("Timed out")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,
}

/// Failure to connect to a single peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No known addresses for peer")]
    NoAddresses,

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Host is shut down")]
    HostClosed,
}

impl From<Interrupted> for ConnectError {
    fn from(e: Interrupted) -> Self {
        match e {
            Interrupted::Timeout => ConnectError::Timeout,
            Interrupted::Cancelled => ConnectError::Cancelled,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    #[error("Relay refused to listen on {addr}: {reason}")]
    Listen { addr: String, reason: String },

    #[error("Reservation denied: {0}")]
    Denied(String),

    #[error("Host is shut down")]
    HostClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Routing is disabled for this role")]
    Disabled,

    #[error("Routing table has no known peers")]
    NoKnownPeers,

    #[error("Routing bootstrap failed: {0}")]
    Failed(String),

    #[error("Host is shut down")]
    HostClosed,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Remote does not support {0}")]
    UnsupportedProtocol(String),

    #[error("Protocol {0} already has a handler")]
    AlreadyRegistered(String),

    #[error("Stream IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BringUpError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to bind {addr}: {reason}")]
    TransportBind { addr: String, reason: String },
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Handshake IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(Vec<u8>),

    #[error("Handshake cancelled")]
    Cancelled,
}
