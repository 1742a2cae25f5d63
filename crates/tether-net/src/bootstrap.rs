//! Bootstrap connection orchestration.
//!
//! Every bootstrap peer is attempted once, concurrently, and each attempt is
//! bounded by a timeout and a shared cancellation token. Failures are
//! collected per peer; one unreachable peer never stops the others.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use libp2p::PeerId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_shared::constants::BOOTSTRAP_DIAL_TIMEOUT;

use crate::address::PeerHandle;
use crate::error::{ConnectError, Interrupted};

/// Something that can establish a connection to a peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect(&self, peer: &PeerHandle) -> Result<(), ConnectError>;
}

#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Upper bound for a single connection attempt.
    pub attempt_timeout: Duration,
    pub cancel: CancellationToken,
}

impl ConnectPolicy {
    /// Run `fut` under this policy's deadline and cancellation token.
    pub async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            timed = tokio::time::timeout(self.attempt_timeout, fut) => {
                timed.map_err(|_| Interrupted::Timeout)
            }
        }
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: BOOTSTRAP_DIAL_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of one batch of bootstrap attempts.
#[derive(Debug, Default, Clone)]
pub struct BootstrapOutcome {
    /// Connected peers, in input order.
    pub succeeded: Vec<PeerId>,
    pub per_peer_errors: HashMap<PeerId, ConnectError>,
}

impl BootstrapOutcome {
    pub fn succeeded_any(&self) -> bool {
        !self.succeeded.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.per_peer_errors.len()
    }
}

/// Connect to every peer in `peers` and aggregate the results.
pub async fn connect_all<D>(dialer: &D, peers: &[PeerHandle], policy: &ConnectPolicy) -> BootstrapOutcome
where
    D: Dialer + ?Sized,
{
    let attempts = peers.iter().map(|peer| attempt(dialer, peer, policy));
    let results = join_all(attempts).await;

    let mut outcome = BootstrapOutcome::default();
    for (peer, result) in peers.iter().zip(results) {
        match result {
            Ok(()) => outcome.succeeded.push(peer.id()),
            Err(e) => {
                outcome.per_peer_errors.insert(peer.id(), e);
            }
        }
    }

    info!(
        connected = outcome.succeeded.len(),
        total = peers.len(),
        "connected to {} of {} bootstrap peers",
        outcome.succeeded.len(),
        peers.len()
    );
    outcome
}

/// Connect to a single relay before asking it for a reservation.
pub async fn connect_relay<D>(dialer: &D, relay: &PeerHandle, policy: &ConnectPolicy) -> Result<(), ConnectError>
where
    D: Dialer + ?Sized,
{
    let result = attempt(dialer, relay, policy).await;
    match &result {
        Ok(()) => info!(relay = %relay.id(), "Connected to relay"),
        Err(e) => warn!(relay = %relay, error = %e, "Failed to connect to relay"),
    }
    result
}

async fn attempt<D>(dialer: &D, peer: &PeerHandle, policy: &ConnectPolicy) -> Result<(), ConnectError>
where
    D: Dialer + ?Sized,
{
    debug!(peer = %peer, "Connecting");
    let result = match policy.bounded(dialer.connect(peer)).await {
        Ok(result) => result,
        Err(interrupted) => Err(interrupted.into()),
    };

    match &result {
        Ok(()) => debug!(peer = %peer.id(), "Connected"),
        Err(e) => warn!(peer = %peer, error = %e, "Failed to connect to peer"),
    }
    result
}
