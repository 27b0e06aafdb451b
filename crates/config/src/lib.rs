//! Relay configuration: schema, file discovery, env substitution and
//! change notification.
//!
//! Config files: `rainbow.toml`, `rainbow.yaml`, `rainbow.yml` or
//! `rainbow.json`, searched in `./` then `~/.config/rainbow/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution anywhere in
//! the file.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
#[cfg(feature = "file-watcher")]
pub mod watcher;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, parse_config},
    schema::{BridgeEntry, ChannelEntry, RelayConfig},
};
