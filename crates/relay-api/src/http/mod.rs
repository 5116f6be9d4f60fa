//! HTTP/REST API layer for Relay.
//!
//! Axum-based API at `/api/v1/`: webhook and provider event ingestion plus
//! read-only workflow inspection, all in the envelope response format.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
