use std::time::Duration;

/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/tether/1.0.0";

/// Stream protocol for the request/reply handshake. Both ends must agree.
pub const HANDSHAKE_PROTOCOL_ID: &str = "/tether/handshake/1.0.0";

/// Request token written by the initiator
pub const HANDSHAKE_REQUEST: &[u8] = b"PING\n";

/// Reply token written by the responder
pub const HANDSHAKE_REPLY: &[u8] = b"PONG\n";

/// Read buffer size for handshake tokens
pub const HANDSHAKE_TOKEN_LEN: usize = 5;

/// Total reads the responder performs before abandoning a silent stream
pub const HANDSHAKE_MAX_ATTEMPTS: u32 = 5;

/// Pause between responder reads that hit end-of-stream
pub const HANDSHAKE_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound on a whole responder exchange, whatever the peer does
pub const HANDSHAKE_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed TCP port used by public roles when none is configured
pub const DEFAULT_LISTEN_PORT: u16 = 4001;

/// Per-peer bound on a single bootstrap connection attempt
pub const BOOTSTRAP_DIAL_TIMEOUT: Duration = Duration::from_secs(20);

/// How long bring-up waits for listeners to report their addresses
pub const LISTEN_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between routing table refreshes on routing servers
pub const ROUTING_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Idle timeout for swarm connections
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit duration granted by a relay running with unbounded limits
pub const UNBOUNDED_CIRCUIT_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);
