/// Local backend record id, assigned by the backend registry.
pub type BackendId = i64;

/// Id of a sub-worker as reported by a remote peer.
pub type RemoteBackendId = i64;
