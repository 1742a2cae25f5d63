// Identity keyring, node roles and shared constants.

pub mod constants;
pub mod error;
pub mod keyring;
pub mod role;

pub use error::{KeyringError, ParseRoleError};
pub use keyring::{Identity, Keyring};
pub use role::{ListenScope, Reachability, Role, RolePolicy, RoutingMode};
