//! Topology reconciliation.
//!
//! Each pass lists the peer's sub-workers and diffs them against the
//! proxies this backend controls. Running workers without a proxy get
//! one, proxies whose worker is gone (or no longer running) are deleted,
//! and the aggregate feature and type sets are rebuilt from scratch and
//! published as a single [`RemoteSnapshot`].

use std::collections::{BTreeSet, HashSet};

use hivelink_core::status::BackendStatus;
use hivelink_core::types::RemoteBackendId;

use crate::backend::{BackendRole, FederatedBackend};
use crate::error::FederationError;
use crate::messages::{RemoteStatus, SubBackendDescriptor};

/// Aggregate view of the peer after a reconciliation pass.
///
/// Published whole; readers never observe a partially updated set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    /// Union of features over running sub-workers.
    pub features: BTreeSet<String>,
    /// Worker type names over running sub-workers.
    pub backend_types: BTreeSet<String>,
    /// Whether any sub-worker was still loading.
    pub any_loading: bool,
    /// Number of running sub-workers.
    pub backend_count: usize,
}

impl RemoteSnapshot {
    /// State before the first pass: nothing known, assumed still loading.
    pub fn initial() -> Self {
        Self {
            features: BTreeSet::new(),
            backend_types: BTreeSet::new(),
            any_loading: true,
            backend_count: 0,
        }
    }
}

/// Result of diffing one poll against the known proxy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Running workers with no proxy yet: `(remote id, max usages)`.
    pub create: Vec<(RemoteBackendId, u32)>,
    /// Running workers that already have a proxy.
    pub retain: Vec<(RemoteBackendId, u32)>,
    /// Proxies whose worker is no longer running.
    pub remove: Vec<RemoteBackendId>,
    /// Aggregates for this pass.
    pub snapshot: RemoteSnapshot,
}

/// Diff `descriptors` against the `known` proxy ids.
///
/// Pure; the caller applies the plan. A duplicated id is only counted
/// once, so an id never lands in both `create` and `remove`.
pub fn plan_reconciliation(
    descriptors: &[SubBackendDescriptor],
    known: &HashSet<RemoteBackendId>,
) -> ReconcilePlan {
    let mut remaining = known.clone();
    let mut seen = HashSet::new();
    let mut create = Vec::new();
    let mut retain = Vec::new();
    let mut features = BTreeSet::new();
    let mut backend_types = BTreeSet::new();
    let mut any_loading = false;

    for descriptor in descriptors {
        match descriptor.status {
            RemoteStatus::Running => {
                features.extend(descriptor.features.iter().cloned());
                backend_types.insert(descriptor.backend_type.clone());
                if !seen.insert(descriptor.id) {
                    continue;
                }
                let entry = (descriptor.id, descriptor.max_usage_count);
                if remaining.remove(&descriptor.id) {
                    retain.push(entry);
                } else {
                    create.push(entry);
                }
            }
            RemoteStatus::Loading => any_loading = true,
            RemoteStatus::Other => {}
        }
    }

    let mut remove: Vec<_> = remaining.into_iter().collect();
    remove.sort_unstable();

    ReconcilePlan {
        create,
        retain,
        remove,
        snapshot: RemoteSnapshot {
            features,
            backend_types,
            any_loading,
            backend_count: seen.len(),
        },
    }
}

impl FederatedBackend {
    /// Run one reconciliation pass under the session retry wrapper.
    pub async fn reconcile(&self) -> Result<(), FederationError> {
        self.run_with_session(|session| self.reconcile_pass(session))
            .await
    }

    /// One pass with an explicit session token, no retry.
    pub(crate) async fn reconcile_pass(&self, session: String) -> Result<(), FederationError> {
        let descriptors = self.link.transport().list_backends(&session).await?;

        match &self.role {
            BackendRole::Proxy(proxy) => {
                let Some(own) = descriptors
                    .iter()
                    .find(|d| d.id == proxy.linked_remote_id)
                else {
                    tracing::trace!(
                        backend_id = self.id,
                        remote_id = proxy.linked_remote_id,
                        "Remote worker not reported yet",
                    );
                    return Ok(());
                };

                let plan = plan_reconciliation(std::slice::from_ref(own), &HashSet::new());
                if own.status == RemoteStatus::Running {
                    self.set_max_usage_count(own.max_usage_count);
                }
                self.publish_snapshot(plan.snapshot);
            }
            BackendRole::Real(real) => {
                let mut proxies = real.proxies.lock().await;
                let known: HashSet<_> = proxies.keys().copied().collect();
                let mut plan = plan_reconciliation(&descriptors, &known);

                for (remote_id, max_usage_count) in plan.retain {
                    let Some(handle) = proxies.get(&remote_id) else {
                        continue;
                    };
                    if handle.backend.status() != BackendStatus::Errored {
                        handle.backend.set_max_usage_count(max_usage_count);
                        continue;
                    }

                    // Errored is terminal for the record, so replace it.
                    if let Some(stale) = proxies.remove(&remote_id) {
                        tracing::info!(
                            backend_id = self.id,
                            remote_id,
                            proxy_id = stale.id,
                            "Replacing errored proxy",
                        );
                        if let Err(e) = self.context.registry.delete_by_id(stale.id).await {
                            tracing::warn!(
                                backend_id = self.id,
                                proxy_id = stale.id,
                                error = %e,
                                "Failed to delete proxy",
                            );
                        }
                    }
                    plan.create.push((remote_id, max_usage_count));
                }

                for (remote_id, max_usage_count) in plan.create {
                    tracing::debug!(
                        backend_id = self.id,
                        remote_id,
                        "Adding proxy for remote backend",
                    );
                    let spec = self.proxy_spec(real, remote_id, max_usage_count);
                    match self.context.registry.create_proxy(spec).await {
                        Ok(handle) => {
                            proxies.insert(remote_id, handle);
                        }
                        Err(e) => {
                            tracing::warn!(
                                backend_id = self.id,
                                remote_id,
                                error = %e,
                                "Failed to create proxy, will retry next pass",
                            );
                        }
                    }
                }

                for remote_id in plan.remove {
                    let Some(handle) = proxies.remove(&remote_id) else {
                        continue;
                    };
                    tracing::debug!(
                        backend_id = self.id,
                        remote_id,
                        proxy_id = handle.id,
                        "Removing proxy for vanished remote backend",
                    );
                    if let Err(e) = self.context.registry.delete_by_id(handle.id).await {
                        tracing::warn!(
                            backend_id = self.id,
                            proxy_id = handle.id,
                            error = %e,
                            "Failed to delete proxy",
                        );
                    }
                }
                drop(proxies);

                self.publish_snapshot(plan.snapshot);
            }
        }

        Ok(())
    }
}
