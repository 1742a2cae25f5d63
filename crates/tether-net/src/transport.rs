use libp2p::identity::Keypair;
use libp2p::{dcutr, identify, kad, noise, relay, tcp, yamux, Swarm, SwarmBuilder};
use tracing::info;

use tether_shared::constants::{
    IDLE_CONNECTION_TIMEOUT, PROTOCOL_VERSION, UNBOUNDED_CIRCUIT_DURATION,
};
use tether_shared::{RolePolicy, RoutingMode};

use crate::behaviour::TetherBehaviour;
use crate::error::BringUpError;

/// Build the swarm for a role: TCP + QUIC + DNS + relay client, with the
/// relay server and Kademlia enabled as the policy dictates.
pub fn build_swarm(
    keypair: Keypair,
    policy: &RolePolicy,
) -> Result<Swarm<TetherBehaviour>, BringUpError> {
    let policy = *policy;

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(config_error)?
        .with_quic()
        .with_dns()
        .map_err(config_error)?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(config_error)?
        .with_behaviour(|key, relay_client| {
            let local_peer_id = key.public().to_peer_id();

            let relay = policy
                .relay_service
                .then(|| relay::Behaviour::new(local_peer_id, unbounded_relay_config()));

            let kademlia = kad_mode(policy.routing).map(|mode| {
                let store = kad::store::MemoryStore::new(local_peer_id);
                let mut kademlia = kad::Behaviour::new(local_peer_id, store);
                kademlia.set_mode(Some(mode));
                kademlia
            });

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true);
            let identify = identify::Behaviour::new(identify_config);

            TetherBehaviour {
                relay_client,
                relay: relay.into(),
                kademlia: kademlia.into(),
                identify,
                dcutr: dcutr::Behaviour::new(local_peer_id),
                stream: libp2p_stream::Behaviour::new(),
            }
        })
        .map_err(config_error)?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        relay_service = policy.relay_service,
        routing = ?policy.routing,
        "Built Tether swarm with TCP + QUIC + Relay transport"
    );

    Ok(swarm)
}

/// Relay service settings with every resource limit lifted.
pub fn unbounded_relay_config() -> relay::Config {
    relay::Config {
        max_reservations: usize::MAX,
        max_reservations_per_peer: usize::MAX,
        max_circuits: usize::MAX,
        max_circuits_per_peer: usize::MAX,
        max_circuit_duration: UNBOUNDED_CIRCUIT_DURATION,
        max_circuit_bytes: u64::MAX,
        reservation_rate_limiters: Vec::new(),
        circuit_src_rate_limiters: Vec::new(),
        ..Default::default()
    }
}

fn kad_mode(routing: RoutingMode) -> Option<kad::Mode> {
    match routing {
        RoutingMode::Server => Some(kad::Mode::Server),
        RoutingMode::Client => Some(kad::Mode::Client),
        RoutingMode::Disabled => None,
    }
}

fn config_error(e: impl std::fmt::Display) -> BringUpError {
    BringUpError::Configuration(format!("swarm construction: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_shared::Role;

    #[test]
    fn test_unbounded_relay_config() {
        let config = unbounded_relay_config();
        assert_eq!(config.max_reservations, usize::MAX);
        assert_eq!(config.max_circuits_per_peer, usize::MAX);
        assert_eq!(config.max_circuit_bytes, u64::MAX);
        assert!(config.reservation_rate_limiters.is_empty());
        assert!(config.circuit_src_rate_limiters.is_empty());
    }

    #[test]
    fn test_kad_mode_per_role() {
        assert_eq!(kad_mode(Role::Bootstrap.policy().routing), Some(kad::Mode::Server));
        assert_eq!(kad_mode(Role::NodeRunner.policy().routing), Some(kad::Mode::Client));
        assert_eq!(kad_mode(Role::MobileClient.policy().routing), None);
    }

    #[tokio::test]
    async fn test_build_swarm_toggles_behaviours() {
        let relay = build_swarm(Keypair::generate_ed25519(), &Role::Relay.policy()).unwrap();
        assert!(relay.behaviour().relay.is_enabled());
        assert!(relay.behaviour().kademlia.is_enabled());

        let mobile =
            build_swarm(Keypair::generate_ed25519(), &Role::MobileClient.policy()).unwrap();
        assert!(!mobile.behaviour().relay.is_enabled());
        assert!(!mobile.behaviour().kademlia.is_enabled());
    }
}
