//! Peer address parsing.
//!
//! Turns textual multiaddrs of the form `<transport>/p2p/<peer-id>` into
//! [`PeerHandle`] values. Batches tolerate blank entries and collect
//! malformed ones instead of aborting, because deployments routinely pass
//! heterogeneous and partly stale address lists.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::{debug, info, warn};

use crate::error::AddressError;

/// A peer identity plus the addresses it may be reached at.
///
/// `addresses` may be empty when only the identity is known. Handles are
/// values: derive new ones rather than mutating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    id: PeerId,
    addresses: Vec<Multiaddr>,
}

impl PeerHandle {
    pub fn new(id: PeerId, addresses: Vec<Multiaddr>) -> Self {
        Self { id, addresses }
    }

    /// A handle with an identity and no known location.
    pub fn bare(id: PeerId) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addresses(&self) -> &[Multiaddr] {
        &self.addresses
    }

    /// Parse `<transport>/p2p/<peer-id>`.
    ///
    /// The trailing `/p2p` component becomes the id; everything before it,
    /// if anything, becomes the single address.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(AddressError::Malformed {
                input: text.to_string(),
                reason: "empty address".to_string(),
            });
        }

        let mut addr: Multiaddr = input.parse().map_err(|e: libp2p::multiaddr::Error| {
            AddressError::Malformed {
                input: input.to_string(),
                reason: e.to_string(),
            }
        })?;

        match addr.pop() {
            Some(Protocol::P2p(id)) => {
                let addresses = if addr.is_empty() { Vec::new() } else { vec![addr] };
                Ok(Self { id, addresses })
            }
            _ => Err(AddressError::MissingPeerId {
                input: input.to_string(),
            }),
        }
    }

    /// Every address in canonical `<address>/p2p/<peer-id>` form.
    pub fn p2p_addrs(&self) -> Vec<Multiaddr> {
        self.addresses
            .iter()
            .map(|addr| with_peer_suffix(addr, self.id))
            .collect()
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addresses.first() {
            Some(addr) => write!(f, "{}", with_peer_suffix(addr, self.id)),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Append `/p2p/<id>` unless the address already ends with it.
pub(crate) fn with_peer_suffix(addr: &Multiaddr, id: PeerId) -> Multiaddr {
    match addr.iter().last() {
        Some(Protocol::P2p(existing)) if existing == id => addr.clone(),
        _ => addr.clone().with(Protocol::P2p(id)),
    }
}

/// Outcome of parsing a list of addresses.
#[derive(Debug, Default, Clone)]
pub struct ParsedBatch {
    pub handles: Vec<PeerHandle>,
    /// Input text and reason for every rejected entry, in input order.
    pub errors: Vec<(String, AddressError)>,
}

impl ParsedBatch {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse every entry, skipping blanks and collecting failures.
pub fn parse_batch<S: AsRef<str>>(texts: &[S]) -> ParsedBatch {
    let mut batch = ParsedBatch::default();

    for raw in texts {
        let text = raw.as_ref().trim();
        if text.is_empty() {
            continue;
        }
        match PeerHandle::parse(text) {
            Ok(handle) => {
                debug!(peer = %handle.id(), addr = %text, "Parsed peer address");
                batch.handles.push(handle);
            }
            Err(e) => {
                warn!(addr = %text, error = %e, "Skipping invalid peer address");
                batch.errors.push((text.to_string(), e));
            }
        }
    }

    batch
}

/// Split a comma-separated address list.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',').map(|s| s.trim().to_string()).collect()
}

/// Load peer addresses from a file, one per line.
///
/// Lines starting with `#` are ignored. Malformed lines are collected in the
/// batch; a missing or unreadable file is an error.
pub fn load_handles(path: &Path) -> io::Result<ParsedBatch> {
    let content = fs::read_to_string(path)?;

    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .collect();

    let batch = parse_batch(&lines);
    info!(
        count = batch.handles.len(),
        rejected = batch.errors.len(),
        path = %path.display(),
        "Loaded peer addresses"
    );
    Ok(batch)
}
