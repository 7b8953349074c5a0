//! Infrastructure layer for Probekit.
//!
//! Contains implementations of the repository traits defined in `probekit-core`
//! (SQLite checkpoint storage), the `config.toml` loader, and runtime wiring.

pub mod config;
pub mod runtime;
pub mod sqlite;
