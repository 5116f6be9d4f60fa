//! Infrastructure layer for Relay.
//!
//! Contains implementations of the store traits defined in `relay-core`:
//! SQLite storage with tokens encrypted at rest (AES-256-GCM), the OAuth2
//! refresh client, built-in action providers, inbound payload normalizers,
//! webhook signatures, and the `config.toml` loader.

pub mod config;
pub mod crypto;
pub mod normalize;
pub mod oauth;
pub mod provider;
pub mod sqlite;
