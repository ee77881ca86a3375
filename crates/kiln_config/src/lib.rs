//! Parsing and validation of `kiln.toml` and the `KILN_*` environment overlay.
//!
//! This crate reads the optional project configuration file, applies
//! environment overrides (cache isolation mode, cache root, toolchain paths,
//! backend selection), and produces a strongly-typed [`ProjectConfig`].

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use env::{apply_env, apply_process_env};
pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::{selected_backends, SelectedBackend};
pub use types::*;
