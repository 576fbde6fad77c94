//! Standalone federation node.
//!
//! Loads peer configuration, runs one real federated backend per peer and
//! exposes read-only status routes. The library half is shared by the
//! binary and the integration tests.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
