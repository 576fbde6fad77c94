//! Per-process identity used to refuse self-federation.
//!
//! Every running instance reports its identity as `server_id` in the
//! session handshake. A peer answering with our own identity means we
//! are about to federate with ourselves, which would build an unbounded
//! proxy chain.

use std::fmt;

use uuid::Uuid;

/// Random identity generated once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceIdentity(Uuid);

impl InstanceIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap a known id (tests and fixed deployments).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Whether a `server_id` reported by a peer is this process.
    ///
    /// Comparison is on the parsed UUID so casing differences in the
    /// remote's formatting do not defeat the check.
    pub fn matches(&self, server_id: &str) -> bool {
        Uuid::parse_str(server_id.trim()).is_ok_and(|id| id == self.0)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
