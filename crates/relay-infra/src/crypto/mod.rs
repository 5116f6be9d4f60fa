//! Cryptographic operations for Relay.
//!
//! - `vault`: AES-256-GCM encryption for credential tokens at rest
//! - `signature`: HMAC-SHA256 signing and verification for webhook bodies

pub mod signature;
pub mod vault;
