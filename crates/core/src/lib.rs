//! Shared types for the hivelink federation layer.
//!
//! Kept free of async and network dependencies so that every other
//! crate in the workspace can depend on it.

pub mod identity;
pub mod status;
pub mod types;
