//! Key generation for operator-supplied keyrings.

use anyhow::Context;
use tracing::info;

use tether_shared::Keyring;

/// Generate `count` fresh keys and render them as a JSON keyring, ready for
/// `--keyring`.
pub fn generate(count: usize) -> anyhow::Result<String> {
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let (entry, peer_id) = Keyring::generate_entry().context("generating key")?;
        info!(index, peer_id = %peer_id, "Generated key");
        entries.push(entry);
    }
    serde_json::to_string_pretty(&entries).context("encoding keyring")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keyring_loads() {
        let json = generate(3).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        std::fs::write(&path, &json).unwrap();

        let keyring = Keyring::from_file(&path).unwrap();
        assert_eq!(keyring.len(), 3);
        let ids: Vec<_> = (0..3)
            .map(|i| keyring.identity(i).unwrap().peer_id())
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }
}
