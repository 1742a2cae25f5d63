use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("Key index {index} out of range (keyring holds {len} keys)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Failed to decode key {index}: {reason}")]
    KeyDecodeFailure { index: usize, reason: String },

    #[error("Failed to encode key: {0}")]
    KeyEncodeFailure(String),

    #[error("Keyring file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role '{0}' (expected bootstrap, relay, node-runner or mobile-client)")]
pub struct ParseRoleError(pub String);
