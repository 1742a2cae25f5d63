//! Fixed, ordered keyring of node identities.
//!
//! Each entry is the base64 (standard alphabet) form of a protobuf-encoded
//! libp2p private key. Indices are stable: the same keyring and index always
//! yield the same `PeerId`, which lets operators publish bootstrap and relay
//! addresses ahead of time.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use libp2p::identity::Keypair;
use libp2p::PeerId;

use crate::error::KeyringError;

/// Built-in deployment keyring.
///
/// Slots 0-2 belong to bootstrap nodes, 3-5 to relays and 6-8 to application
/// nodes. The split is a convention only; see [`crate::role::Role::default_key_index`].
const EMBEDDED_KEYS: [&str; 9] = [
    // bootstrap: 12D3KooWLr1gYejUTeriAsSu6roR2aQ423G3Q4fFTqzqSwTsMz9n
    "CAESQAA7xVQKsQ5VAC5ge+XsixR7YnDkzuHa4nrY8xWXGK3fo9yN1Eaiat9Vn1iwaVQDqTjywVP303ojVLxXcQ9ze4E=",
    // bootstrap: 12D3KooWBnext3VBZZuBwGn3YahAZjf49oqYckfx64VpzH6dyU1p
    "CAESQMCYbjRpXBDUnIpDyqY+mA3n7z9gF3CaggWTknd90LauHUcz8ldNtlUchFATmMSE1r/NMnSpEBbLvzWQKq3N45s=",
    // bootstrap: 12D3KooWDKYjXDDgSGzhEYWYtDvfP9pMtGNY1vnAwRsSp2CwCWHL
    "CAESQB1Y1Li0Wd4KcvMvbv5/+CTG79axzl3R8yTuzWOckMgmNAzZqxim5E/7e9mgd87FTMPQNHqiItqTFwHJeMxr0H8=",
    // relay: 12D3KooWRnBKUEkAEpsoCoEiuhxKBJ5j2Bdop6PGxFMvd4PwoevM
    "CAESQHMEeM3iNIIxNThxIfnuO5FJ0oUQJy8V7TFD80lGziBE7SuPw2wckCrFRihVDaw0e6PkDCwsh/6u3UgBxB3OTFo=",
    // relay: 12D3KooWRgSQnguL2DYkXUXqCLiRQ35PEX4eEH3havy2X18AVALd
    "CAESQP3Pu7TVp2RSVIZykj65/MDXm/eiTOfLGH3xCWQVmUoC67MkFWUEOd6QERl1Y4Xvi1Rt+d36UuaFXanT+hVUDAY=",
    // relay: 12D3KooWEDso33ti9KsKmD2g2egNmw6BXgch7V5vFz1TziuNYybo
    "CAESQDE2IToG5mWwzWEeXt3/OVbx9XyE743DTenPFUG8M06IQXSarkNhuxNEJisnWeuDvaoaM/fNJNMqhPR81NL3Pio=",
    // node: 12D3KooWNS4QQxwNURwoYoXmGjH9AQkagcGTjRUQT33P4i4FKQsi
    "CAESQFffsVM3eUXLozmXkBM2FSSVhEmo/Cq5RlXOAAaniTdCu3EQ6Zf7lQDasCj6IXyTihFQWZB+nmGFn/ZAA5y5egk=",
    // node: 12D3KooWJuteouY1d5SYFcAUAYDVPjFD8MUBgqsdjZfBkAecCS2Y
    "CAESQCSHrfyzNZkxwoNmXI1wx5Lvr6o4+kGxGepFH0AfYlKthyON+1hQRjLJQaBAQLrr1cfMHFFoC40X62DQIhL246U=",
    // node: 12D3KooWQaZ9Ppi8A2hcEspJhewfPqKjtXu4vx7FQPaUGnHXWpNL
    "CAESQDyiSqC9Jez8wKSQs74YJalAegamjVKHbnaN35pfe6Gk21WVgCzfvBdLVoRj8XXny/k1LtSOhPZWNz0rWKCOYpk=",
];

/// A node identity selected from the keyring.
#[derive(Clone)]
pub struct Identity {
    index: usize,
    keypair: Keypair,
    peer_id: PeerId,
}

impl Identity {
    /// Keyring slot this identity was loaded from.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The libp2p keypair, cloned for handing to a swarm builder.
    pub fn keypair(&self) -> Keypair {
        self.keypair.clone()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("index", &self.index)
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// Ordered, read-only set of encoded private keys.
#[derive(Debug, Clone)]
pub struct Keyring {
    entries: Vec<String>,
}

impl Keyring {
    /// The keyring compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            entries: EMBEDDED_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build a keyring from already-encoded entries.
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Load a keyring from a JSON array of encoded keys.
    ///
    /// Entries are only decoded on selection, so a malformed key is reported
    /// as `KeyDecodeFailure` for its own index rather than failing the load.
    pub fn from_file(path: &Path) -> Result<Self, KeyringError> {
        let file_error = |reason: String| KeyringError::File {
            path: path.to_path_buf(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let entries: Vec<String> =
            serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))?;

        if entries.is_empty() {
            return Err(file_error("keyring is empty".to_string()));
        }
        if let Some(pos) = entries.iter().position(|e| e.trim().is_empty()) {
            return Err(file_error(format!("entry {pos} is blank")));
        }

        Ok(Self {
            entries: entries.into_iter().map(|e| e.trim().to_string()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select the identity stored at `index`.
    pub fn identity(&self, index: usize) -> Result<Identity, KeyringError> {
        let encoded = self
            .entries
            .get(index)
            .ok_or(KeyringError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;

        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| KeyringError::KeyDecodeFailure {
                index,
                reason: format!("base64: {e}"),
            })?;

        let keypair =
            Keypair::from_protobuf_encoding(&bytes).map_err(|e| KeyringError::KeyDecodeFailure {
                index,
                reason: format!("protobuf: {e}"),
            })?;

        Ok(Identity {
            index,
            peer_id: keypair.public().to_peer_id(),
            keypair,
        })
    }

    /// Generate a fresh Ed25519 entry in keyring encoding.
    ///
    /// Returns the encoded key together with the `PeerId` it produces.
    pub fn generate_entry() -> Result<(String, PeerId), KeyringError> {
        let keypair = Keypair::generate_ed25519();
        let bytes = keypair
            .to_protobuf_encoding()
            .map_err(|e| KeyringError::KeyEncodeFailure(e.to_string()))?;
        Ok((STANDARD.encode(bytes), keypair.public().to_peer_id()))
    }
}

impl Default for Keyring {
    fn default() -> Self {
        Self::embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_identities_decode() {
        let keyring = Keyring::embedded();
        assert_eq!(keyring.len(), 9);
        for index in 0..keyring.len() {
            let identity = keyring.identity(index).unwrap();
            assert_eq!(identity.index(), index);
        }
    }

    #[test]
    fn test_embedded_peer_ids_are_the_published_ones() {
        let published = [
            "12D3KooWLr1gYejUTeriAsSu6roR2aQ423G3Q4fFTqzqSwTsMz9n",
            "12D3KooWBnext3VBZZuBwGn3YahAZjf49oqYckfx64VpzH6dyU1p",
            "12D3KooWDKYjXDDgSGzhEYWYtDvfP9pMtGNY1vnAwRsSp2CwCWHL",
            "12D3KooWRnBKUEkAEpsoCoEiuhxKBJ5j2Bdop6PGxFMvd4PwoevM",
            "12D3KooWRgSQnguL2DYkXUXqCLiRQ35PEX4eEH3havy2X18AVALd",
            "12D3KooWEDso33ti9KsKmD2g2egNmw6BXgch7V5vFz1TziuNYybo",
            "12D3KooWNS4QQxwNURwoYoXmGjH9AQkagcGTjRUQT33P4i4FKQsi",
            "12D3KooWJuteouY1d5SYFcAUAYDVPjFD8MUBgqsdjZfBkAecCS2Y",
            "12D3KooWQaZ9Ppi8A2hcEspJhewfPqKjtXu4vx7FQPaUGnHXWpNL",
        ];
        let keyring = Keyring::embedded();
        for (index, expected) in published.iter().enumerate() {
            let expected: PeerId = expected.parse().unwrap();
            assert_eq!(keyring.identity(index).unwrap().peer_id(), expected, "slot {index}");
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let keyring = Keyring::embedded();
        for index in 0..keyring.len() {
            let a = keyring.identity(index).unwrap();
            let b = keyring.identity(index).unwrap();
            assert_eq!(a.peer_id(), b.peer_id());
            assert_eq!(a.keypair().public(), b.keypair().public());
        }
    }

    #[test]
    fn test_identities_are_distinct() {
        let keyring = Keyring::embedded();
        let mut ids: Vec<PeerId> = (0..keyring.len())
            .map(|i| keyring.identity(i).unwrap().peer_id())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), keyring.len());
    }

    #[test]
    fn test_index_out_of_range() {
        let keyring = Keyring::embedded();
        for index in [9, 10, 1000, usize::MAX] {
            match keyring.identity(index) {
                Err(KeyringError::IndexOutOfRange { index: i, len }) => {
                    assert_eq!(i, index);
                    assert_eq!(len, 9);
                }
                other => panic!("expected IndexOutOfRange, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_malformed_entries_are_decode_failures() {
        let keyring = Keyring::from_entries(vec![
            "not base64 at all!".to_string(),
            STANDARD.encode(b"valid base64, not a key"),
        ]);
        assert!(matches!(
            keyring.identity(0),
            Err(KeyringError::KeyDecodeFailure { index: 0, .. })
        ));
        assert!(matches!(
            keyring.identity(1),
            Err(KeyringError::KeyDecodeFailure { index: 1, .. })
        ));
    }

    #[test]
    fn test_generated_entry_roundtrips() {
        let (encoded, peer_id) = Keyring::generate_entry().unwrap();
        let keyring = Keyring::from_entries(vec![encoded]);
        assert_eq!(keyring.identity(0).unwrap().peer_id(), peer_id);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        let (first, first_id) = Keyring::generate_entry().unwrap();
        let (second, _) = Keyring::generate_entry().unwrap();

        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", serde_json::to_string(&vec![first, second]).unwrap()).unwrap();
        drop(f);

        let keyring = Keyring::from_file(&path).unwrap();
        assert_eq!(keyring.len(), 2);
        assert_eq!(keyring.identity(0).unwrap().peer_id(), first_id);
    }

    #[test]
    fn test_load_rejects_empty_and_blank() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(matches!(
            Keyring::from_file(&empty),
            Err(KeyringError::File { .. })
        ));

        let blank = dir.path().join("blank.json");
        std::fs::write(&blank, r#"["   "]"#).unwrap();
        assert!(matches!(
            Keyring::from_file(&blank),
            Err(KeyringError::File { .. })
        ));

        assert!(matches!(
            Keyring::from_file(&dir.path().join("missing.json")),
            Err(KeyringError::File { .. })
        ));
    }
}
