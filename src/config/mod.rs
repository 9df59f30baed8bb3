//! Node configuration
//!
//! Built-in defaults, overlaid by an optional TOML file, the `NODE_ADDRESS`
//! environment variable and finally command-line flags.

pub mod settings;

pub use settings::{ConfigOverrides, NodeConfig, DEFAULT_LISTEN_ADDR, NODE_ADDRESS_KEY};
