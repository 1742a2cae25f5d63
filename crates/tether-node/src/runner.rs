//! Start-up sequencing for every role.

use std::future::Future;

use anyhow::{bail, Context};
use libp2p::multiaddr::Protocol;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether_net::{
    advertised_addrs, assemble, bring_up, connect_all, connect_relay, request, serve,
    validate_target, BringUpOptions, ConnectPolicy, HandshakeConfig, Host, PeerHandle,
};
use tether_shared::constants::ROUTING_REFRESH_INTERVAL;
use tether_shared::{Keyring, Role, RoutingMode};

use crate::config::NodeConfig;

/// Bring the node up and run its role until `shutdown` fires.
///
/// Returns an error for every fatal condition; the caller turns that into a
/// non-zero exit status.
pub async fn run(config: NodeConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let keyring = match &config.keyring {
        Some(path) => Keyring::from_file(path).context("loading keyring")?,
        None => Keyring::embedded(),
    };
    let identity = keyring
        .identity(config.key_index)
        .context("selecting node identity")?;

    let host = bring_up(
        config.role,
        &identity,
        BringUpOptions {
            listen_port: config.port,
            scope: config.scope,
        },
    )
    .await
    .context("bringing up host")?;

    info!(peer_id = %host.peer_id(), role = %config.role, "Node is running");
    for addr in host.listen_addrs().await {
        info!("{}", addr.with(Protocol::P2p(host.peer_id())));
    }

    let policy = ConnectPolicy {
        cancel: shutdown.child_token(),
        ..Default::default()
    };
    join_overlay(&host, &config, &policy).await?;

    let result = match config.role {
        Role::Bootstrap => {
            tokio::spawn(refresh_routing(host.clone(), shutdown.clone()));
            shutdown.cancelled().await;
            Ok(())
        }
        Role::Relay => {
            spawn_responder(&host, &shutdown)?;
            tokio::spawn(refresh_routing(host.clone(), shutdown.clone()));
            shutdown.cancelled().await;
            Ok(())
        }
        Role::NodeRunner => {
            if let Some(relay) = &config.relay {
                advertise_through(&host, relay, &policy).await?;
            } else {
                warn!("No relay configured, node is reachable only directly");
            }
            spawn_responder(&host, &shutdown)?;
            shutdown.cancelled().await;
            Ok(())
        }
        Role::MobileClient => reach_target(&host, &config, &policy, &shutdown).await,
    };

    host.shutdown().await;
    info!("Node stopped");
    result
}

/// Connect to the bootstrap peers and, when at least one answered, bootstrap
/// the routing table.
async fn join_overlay(host: &Host, config: &NodeConfig, policy: &ConnectPolicy) -> anyhow::Result<()> {
    let role_policy = config.role.policy();

    if config.bootstrap.is_empty() {
        if role_policy.requires_bootstrap {
            warn!("No bootstrap peers configured, continuing without the overlay");
        }
        return Ok(());
    }

    let outcome = connect_all(host, &config.bootstrap, policy).await;
    for (peer, e) in &outcome.per_peer_errors {
        warn!(peer = %peer, error = %e, "Bootstrap peer unavailable");
    }

    if !outcome.succeeded_any() {
        if role_policy.requires_bootstrap {
            bail!(
                "failed to connect to any of {} bootstrap peers",
                config.bootstrap.len()
            );
        }
        return Ok(());
    }

    if role_policy.routing != RoutingMode::Disabled {
        match bounded(policy, "bootstrapping routing table", host.bootstrap_routing()).await {
            Ok(()) => info!("Routing table bootstrapped"),
            Err(e) => warn!(error = %format!("{e:#}"), "Routing bootstrap failed"),
        }
    }
    Ok(())
}

/// Await one start-up step under the policy's deadline and cancellation.
async fn bounded<T, E, F>(policy: &ConnectPolicy, what: &'static str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    policy.bounded(fut).await.context(what)?.context(what)
}

/// Periodically refresh the routing table and log its size.
async fn refresh_routing(host: Host, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(ROUTING_REFRESH_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = host.bootstrap_routing().await {
            warn!(error = %e, "Routing refresh failed");
        }
        match host.routing_peers().await {
            Ok(count) => info!(peers = count, "Routing table refreshed"),
            Err(e) => warn!(error = %e, "Routing table unavailable"),
        }
    }
}

fn spawn_responder(host: &Host, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let incoming = host.accept().context("registering handshake responder")?;
    tokio::spawn(serve(incoming, HandshakeConfig::default(), shutdown.child_token()));
    info!(protocol = %tether_net::HANDSHAKE_PROTOCOL, "Handshake responder registered");
    Ok(())
}

/// Reserve a slot on `relay` and log how this node can be reached.
async fn advertise_through(host: &Host, relay: &PeerHandle, policy: &ConnectPolicy) -> anyhow::Result<()> {
    connect_relay(host, relay, policy)
        .await
        .context("connecting to relay")?;
    let reserved = bounded(policy, "reserving relay circuit", host.reserve(relay)).await?;
    info!(addr = %reserved, "Relay reservation active");

    for addr in advertised_addrs(relay, host.peer_id()) {
        info!("Reachable via {addr}");
    }
    Ok(())
}

/// Reach the target node runner through the relay and run the handshake.
async fn reach_target(
    host: &Host,
    config: &NodeConfig,
    policy: &ConnectPolicy,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let (Some(relay), Some(target)) = (&config.relay, &config.target) else {
        warn!("Mobile client needs both --relay and --target, nothing to do");
        return Ok(());
    };

    validate_target(target.id(), &config.bootstrap, std::slice::from_ref(relay))
        .context("invalid target")?;
    connect_relay(host, relay, policy)
        .await
        .context("connecting to relay")?;

    let routed = assemble(relay, target).context("assembling relay circuit")?;
    bounded(policy, "connecting to target through relay", host.connect(&routed)).await?;

    let stream = bounded(policy, "opening handshake stream", host.open_stream(target.id())).await?;

    match bounded(policy, "handshake", request(stream, shutdown)).await {
        Ok(()) => {
            info!(peer = %target.id(), "Handshake completed");
            Ok(())
        }
        Err(e) => {
            error!(peer = %target.id(), error = %format!("{e:#}"), "Handshake failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use libp2p::PeerId;
    use tether_shared::ListenScope;

    fn config(role: Role, bootstrap: Vec<PeerHandle>) -> NodeConfig {
        NodeConfig {
            role,
            port: Some(0),
            key_index: role.default_key_index(),
            keyring: None,
            bootstrap,
            relay: None,
            target: None,
            scope: ListenScope::Loopback,
        }
    }

    fn policy() -> ConnectPolicy {
        ConnectPolicy {
            attempt_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// A peer on a loopback port nothing listens on.
    fn unreachable_peer() -> PeerHandle {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        PeerHandle::new(
            PeerId::random(),
            vec![format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap()],
        )
    }

    async fn start(config: &NodeConfig) -> Host {
        let identity = Keyring::embedded().identity(config.key_index).unwrap();
        bring_up(
            config.role,
            &identity,
            BringUpOptions {
                listen_port: config.port,
                scope: config.scope,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_required_bootstrap_with_no_connection_is_fatal() {
        let config = config(Role::Relay, vec![unreachable_peer(), unreachable_peer()]);
        let host = start(&config).await;

        let result = join_overlay(&host, &config, &policy()).await;
        assert!(result.is_err());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_bootstrap_list_continues() {
        let config = config(Role::NodeRunner, Vec::new());
        let host = start(&config).await;

        join_overlay(&host, &config, &policy()).await.unwrap();
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_optional_bootstrap_failure_continues() {
        let config = config(Role::Bootstrap, vec![unreachable_peer()]);
        let host = start(&config).await;

        join_overlay(&host, &config, &policy()).await.unwrap();
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_reachable_bootstrap_peer_is_enough() {
        let anchor_config = config(Role::Bootstrap, Vec::new());
        let anchor = start(&anchor_config).await;
        let anchor_handle = PeerHandle::new(anchor.peer_id(), anchor.listen_addrs().await);

        let config = config(Role::Relay, vec![unreachable_peer(), anchor_handle]);
        let host = start(&config).await;

        join_overlay(&host, &config, &policy()).await.unwrap();
        assert!(host.connected_peers().await.contains(&anchor.peer_id()));

        host.shutdown().await;
        anchor.shutdown().await;
    }

    #[tokio::test]
    async fn test_key_index_out_of_range_is_fatal() {
        let mut config = config(Role::MobileClient, Vec::new());
        config.key_index = 99;

        let result = run(config, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_step_returns_promptly() {
        let policy = policy();
        policy.cancel.cancel();

        let result: anyhow::Result<()> = bounded(
            &policy,
            "reserving relay circuit",
            std::future::pending::<Result<(), std::io::Error>>(),
        )
        .await;
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_mobile_client() {
        let relay_config = config(Role::Relay, Vec::new());
        let relay = start(&relay_config).await;
        let relay_handle = PeerHandle::new(relay.peer_id(), relay.listen_addrs().await);

        let mut config = config(Role::MobileClient, Vec::new());
        config.relay = Some(relay_handle);
        config.target = Some(PeerHandle::bare(
            Keyring::embedded().identity(6).unwrap().peer_id(),
        ));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), run(config, shutdown)).await;
        assert!(matches!(result, Ok(Err(_))));

        relay.shutdown().await;
    }
}
