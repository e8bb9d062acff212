//! CMMN case execution engine.
//!
//! Case definitions are interpreted by an event-sourced engine: every command
//! runs a deterministic cascade that produces events, and replaying those
//! events rebuilds the case exactly.

pub mod config;
pub mod definition;
pub mod domain;
pub mod engine;
pub mod engine_paths;
pub mod event_store;
pub mod expression;
pub mod render;
pub mod structured_logger;

#[cfg(test)]
pub(crate) mod test_support;
