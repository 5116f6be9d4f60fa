//! Shared domain types for Relay.
//!
//! This crate contains the domain types used across the Relay platform:
//! workflows with their trigger/action pairs, inbound events, credentials,
//! dispatch reports, and the error taxonomy shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod value;
pub mod workflow;
