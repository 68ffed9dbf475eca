//! Storage infrastructure: configuration and credential persistence.
//!
//! - **`config`** reads and writes `config.toml` from the platform config
//!   directory, with defaults for every missing key.
//! - **`credentials`** keeps the paired identity in `identity.toml` next to
//!   it, readable by the owner only.

pub mod config;
pub mod credentials;
