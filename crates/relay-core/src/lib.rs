//! Business logic and store trait definitions for Relay.
//!
//! This crate holds the trigger-to-action dispatch core: the workflow
//! matcher, template engine, credential resolver, action invoker, dispatch
//! engine, and scheduler. It defines the "ports" (store and provider traits)
//! that the infrastructure layer implements and depends only on
//! `relay-types` -- never on `relay-infra` or any database/IO crate.

pub mod credential;
pub mod dispatch;
pub mod invoker;
pub mod matcher;
pub mod repository;
pub mod scheduler;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;
