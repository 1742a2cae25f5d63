//! Node roles and the fixed configuration record each one maps to.
//!
//! A role is chosen once at start-up and never changes. Everything that
//! depends on it (listen set, reachability, relay service, routing mode) is
//! read from the [`RolePolicy`] returned by [`Role::policy`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseRoleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Bootstrap,
    Relay,
    NodeRunner,
    MobileClient,
}

/// Whether a node declares itself directly dialable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reachability {
    Public,
    Private,
}

/// Participation in the distributed routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    Server,
    Client,
    /// Dial-only, no routing table at all.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenTransport {
    Tcp,
    Quic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPort {
    /// The operator-configured port.
    Fixed,
    /// Let the OS choose.
    Ephemeral,
}

/// Which interfaces listeners bind to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenScope {
    #[default]
    All,
    Loopback,
}

/// One listen address, before the port and interface are filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenTemplate {
    pub family: IpFamily,
    pub transport: ListenTransport,
    pub port: ListenPort,
    /// A primary listener that fails to bind aborts bring-up; secondary
    /// listeners are skipped with a warning.
    pub primary: bool,
}

impl ListenTemplate {
    const fn new(family: IpFamily, transport: ListenTransport, port: ListenPort, primary: bool) -> Self {
        Self {
            family,
            transport,
            port,
            primary,
        }
    }

    /// Render the textual multiaddr for this template.
    pub fn render(&self, fixed_port: u16, scope: ListenScope) -> String {
        let ip = match (self.family, scope) {
            (IpFamily::V4, ListenScope::All) => "/ip4/0.0.0.0",
            (IpFamily::V4, ListenScope::Loopback) => "/ip4/127.0.0.1",
            (IpFamily::V6, ListenScope::All) => "/ip6/::",
            (IpFamily::V6, ListenScope::Loopback) => "/ip6/::1",
        };
        let port = match self.port {
            ListenPort::Fixed => fixed_port,
            ListenPort::Ephemeral => 0,
        };
        match self.transport {
            ListenTransport::Tcp => format!("{ip}/tcp/{port}"),
            ListenTransport::Quic => format!("{ip}/udp/{port}/quic-v1"),
        }
    }
}

const BOOTSTRAP_LISTEN: &[ListenTemplate] = &[ListenTemplate::new(
    IpFamily::V4,
    ListenTransport::Tcp,
    ListenPort::Fixed,
    true,
)];

const RELAY_LISTEN: &[ListenTemplate] = &[
    ListenTemplate::new(IpFamily::V4, ListenTransport::Tcp, ListenPort::Fixed, true),
    ListenTemplate::new(IpFamily::V6, ListenTransport::Tcp, ListenPort::Ephemeral, false),
];

const NODE_RUNNER_LISTEN: &[ListenTemplate] = &[
    ListenTemplate::new(IpFamily::V4, ListenTransport::Tcp, ListenPort::Ephemeral, false),
    ListenTemplate::new(IpFamily::V6, ListenTransport::Tcp, ListenPort::Ephemeral, false),
    ListenTemplate::new(IpFamily::V4, ListenTransport::Quic, ListenPort::Ephemeral, false),
    ListenTemplate::new(IpFamily::V6, ListenTransport::Quic, ListenPort::Ephemeral, false),
];

/// Configuration record a role resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub listen: &'static [ListenTemplate],
    pub reachability: Reachability,
    /// Serve relay circuits for other peers (with unbounded limits).
    pub relay_service: bool,
    pub routing: RoutingMode,
    /// A non-empty bootstrap list must yield at least one connection.
    pub requires_bootstrap: bool,
}

impl RolePolicy {
    pub fn listens(&self) -> bool {
        !self.listen.is_empty()
    }
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Bootstrap,
        Role::Relay,
        Role::NodeRunner,
        Role::MobileClient,
    ];

    pub fn policy(&self) -> RolePolicy {
        match self {
            Role::Bootstrap => RolePolicy {
                listen: BOOTSTRAP_LISTEN,
                reachability: Reachability::Public,
                relay_service: false,
                routing: RoutingMode::Server,
                requires_bootstrap: false,
            },
            Role::Relay => RolePolicy {
                listen: RELAY_LISTEN,
                reachability: Reachability::Public,
                relay_service: true,
                routing: RoutingMode::Server,
                requires_bootstrap: true,
            },
            Role::NodeRunner => RolePolicy {
                listen: NODE_RUNNER_LISTEN,
                reachability: Reachability::Private,
                relay_service: false,
                routing: RoutingMode::Client,
                requires_bootstrap: true,
            },
            Role::MobileClient => RolePolicy {
                listen: &[],
                reachability: Reachability::Private,
                relay_service: false,
                routing: RoutingMode::Disabled,
                requires_bootstrap: false,
            },
        }
    }

    /// First keyring slot of the range conventionally reserved for this role.
    pub fn default_key_index(&self) -> usize {
        match self {
            Role::Bootstrap => 0,
            Role::Relay => 3,
            Role::NodeRunner => 6,
            Role::MobileClient => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Bootstrap => "bootstrap",
            Role::Relay => "relay",
            Role::NodeRunner => "node-runner",
            Role::MobileClient => "mobile-client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bootstrap" | "boot" => Ok(Role::Bootstrap),
            "relay" => Ok(Role::Relay),
            "node-runner" | "noderunner" | "node_runner" => Ok(Role::NodeRunner),
            "mobile-client" | "mobileclient" | "mobile_client" | "mobile" => {
                Ok(Role::MobileClient)
            }
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}
