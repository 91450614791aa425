//! Reconciliation pass for a single workload.
//!
//! A pass fetches the workload, lists its instances, issues one bounded
//! create or delete batch, recomputes status and commits it if it changed:
//!
//! ```text
//! fetch -> parse selector -> list -> diff -> execute -> compute status -> commit
//! ```
//!
//! Fetch, selector, list and commit failures end the pass and ask for a
//! retry. Batch failures are reported but the pass carries on so that
//! status reflects whatever did get applied. Passes for the same workload
//! are assumed to be serialized by whoever triggers them.

use std::sync::Arc;

use chrono::Utc;
use podset_reconcile::{
    calculate_status, classify_active, diff, owned_by, ConvergenceStatus, DiffKind, Instance,
    NamespacedName, ReplicaDiff, SelectorError, VictimPolicy, Workload, WorkloadStatus,
    BURST_REPLICAS,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::batch::{BatchError, BatchExecutor, BatchKind, BatchSummary};
use crate::committer::StatusCommitter;
use crate::events::{reason, EventRecorder, EventType};
use crate::store::{ClusterStore, StoreError, StoreResult};
use crate::template::{InstanceFactory, OwnerRefError};

/// Names generated per instance before a name collision counts as a failure.
const MAX_NAME_ATTEMPTS: u32 = 5;

/// Result type for reconciliation passes.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that end a pass early. Every variant asks for a retry.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch workload {key}: {source}")]
    Fetch {
        key: NamespacedName,
        #[source]
        source: StoreError,
    },

    #[error("invalid selector on workload {key}: {source}")]
    Selector {
        key: NamespacedName,
        #[source]
        source: SelectorError,
    },

    #[error("failed to list instances of workload {key}: {source}")]
    List {
        key: NamespacedName,
        #[source]
        source: StoreError,
    },

    #[error("failed to commit status of workload {key}: {source}")]
    Commit {
        key: NamespacedName,
        #[source]
        source: StoreError,
    },

    #[error("reconciliation of workload {key} cancelled")]
    Cancelled { key: NamespacedName },
}

impl ReconcileError {
    /// Returns true if retrying with unchanged input cannot succeed.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Selector { .. })
    }
}

/// Failure to apply the replica diff. Reported, never fatal to the pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplicaError {
    #[error(transparent)]
    Batch(BatchError),

    #[error("invalid controller reference: {0}")]
    OwnerRef(#[from] OwnerRefError),
}

/// Outcome of a pass that did not ask for a retry.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The workload no longer exists.
    WorkloadGone,

    /// The workload was reconciled.
    Reconciled(PassReport),
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::WorkloadGone => None,
            Self::Reconciled(report) => Some(report),
        }
    }
}

/// What a completed pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub diff: ReplicaDiff,

    /// Replica management was skipped because the workload is being deleted.
    pub skipped_replica_management: bool,

    pub replica_error: Option<ReplicaError>,
    pub status: WorkloadStatus,
    pub status_written: bool,
    pub convergence: ConvergenceStatus,
}

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Maximum creates or deletes issued per pass.
    pub burst_replicas: usize,

    /// How scale-down victims are chosen.
    pub victim_policy: VictimPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            burst_replicas: BURST_REPLICAS,
            victim_policy: VictimPolicy::default(),
        }
    }
}

/// Drives workloads toward their desired replica count.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    recorder: Arc<dyn EventRecorder>,
    committer: StatusCommitter,
    executor: BatchExecutor,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        recorder: Arc<dyn EventRecorder>,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            committer: StatusCommitter::new(Arc::clone(&store)),
            executor: BatchExecutor::new(shutdown),
            store,
            recorder,
            config,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// `Err` means the pass should be retried.
    #[instrument(skip_all, fields(workload = %key))]
    pub async fn reconcile(&self, key: &NamespacedName) -> ReconcileResult<PassOutcome> {
        debug!("Reconciling workload");

        let workload = match self.store.get_workload(key).await {
            Ok(workload) => workload,
            Err(e) if e.is_not_found() => {
                debug!("Workload not found, nothing to do");
                return Ok(PassOutcome::WorkloadGone);
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch workload");
                return Err(ReconcileError::Fetch {
                    key: key.clone(),
                    source: e,
                });
            }
        };

        let selector = workload.spec.selector.parse().map_err(|e| {
            warn!(error = %e, "Invalid workload selector");
            ReconcileError::Selector {
                key: key.clone(),
                source: e,
            }
        })?;

        let listed = self
            .store
            .list_instances(&workload.namespace, &selector)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to list instances");
                ReconcileError::List {
                    key: key.clone(),
                    source: e,
                }
            })?;
        let active = active_owned(&listed, workload.uid);

        let desired = workload.spec.replicas;
        let skipped_replica_management = workload.is_being_deleted();
        let (replica_diff, replica_error) = if skipped_replica_management {
            info!("Workload is being deleted, skipping replica management");
            (ReplicaDiff::NONE, None)
        } else {
            let replica_diff = diff(active.len(), desired as usize, self.config.burst_replicas);
            let replica_error = self.manage_replicas(&workload, &active, replica_diff).await?;
            (replica_diff, replica_error)
        };

        // Status reflects what is in the store after this pass's actions, not
        // the pre-action listing.
        let relisted = if replica_diff.is_none() {
            None
        } else {
            match self.store.list_instances(&workload.namespace, &selector).await {
                Ok(instances) => Some(instances),
                Err(e) => {
                    warn!(error = %e, "Failed to relist instances, using pre-action view");
                    None
                }
            }
        };
        let observed = match &relisted {
            Some(instances) => active_owned(instances, workload.uid),
            None => active,
        };

        let counts = calculate_status(&observed, workload.spec.min_ready_seconds, Utc::now());
        let outcome = self.committer.commit(workload, counts).await.map_err(|e| {
            warn!(error = %e, "Failed to commit status");
            ReconcileError::Commit {
                key: key.clone(),
                source: e,
            }
        })?;

        let report = PassReport {
            diff: replica_diff,
            skipped_replica_management,
            convergence: ConvergenceStatus::evaluate(desired, &counts, replica_error.is_some()),
            replica_error,
            status: outcome.workload().status,
            status_written: outcome.was_written(),
        };

        info!(
            desired,
            action = %report.diff.kind,
            amount = report.diff.amount,
            replicas = report.status.replicas,
            ready_replicas = report.status.ready_replicas,
            available_replicas = report.status.available_replicas,
            status_written = report.status_written,
            convergence = ?report.convergence,
            "Reconciliation pass complete"
        );

        Ok(PassOutcome::Reconciled(report))
    }

    async fn manage_replicas(
        &self,
        workload: &Workload,
        active: &[&Instance],
        replica_diff: ReplicaDiff,
    ) -> ReconcileResult<Option<ReplicaError>> {
        let need = workload.spec.replicas;
        let result = match replica_diff.kind {
            DiffKind::None => return Ok(None),
            DiffKind::Create => {
                info!(need, creating = replica_diff.amount, "Too few replicas");
                let factory = match InstanceFactory::new(
                    &workload.namespace,
                    &workload.spec.template,
                    &workload.spec.selector.match_labels,
                    workload.controller_ref(),
                ) {
                    Ok(factory) => factory,
                    Err(e) => {
                        warn!(error = %e, "Refusing to create instances");
                        return Ok(Some(e.into()));
                    }
                };

                let factory = Arc::new(factory);
                self.executor
                    .run(BatchKind::Create, replica_diff.amount, |_| {
                        let store = Arc::clone(&self.store);
                        let recorder = Arc::clone(&self.recorder);
                        let factory = Arc::clone(&factory);
                        async move { create_instance(store.as_ref(), recorder.as_ref(), &factory).await }
                    })
                    .await
            }
            DiffKind::Delete => {
                info!(need, deleting = replica_diff.amount, "Too many replicas");
                let victims: Vec<NamespacedName> = self
                    .config
                    .victim_policy
                    .select(active, replica_diff.amount)
                    .iter()
                    .map(|i| i.key())
                    .collect();

                self.executor
                    .run(BatchKind::Delete, victims.len(), |slot| {
                        let store = Arc::clone(&self.store);
                        let recorder = Arc::clone(&self.recorder);
                        let key = victims[slot].clone();
                        async move { delete_instance(store.as_ref(), recorder.as_ref(), key).await }
                    })
                    .await
            }
        };

        self.batch_outcome(workload.key(), result)
    }

    fn batch_outcome(
        &self,
        key: NamespacedName,
        result: Result<BatchSummary, BatchError>,
    ) -> ReconcileResult<Option<ReplicaError>> {
        match result {
            Ok(summary) => {
                debug!(
                    attempted = summary.attempted,
                    succeeded = summary.succeeded,
                    already_absent = summary.already_absent,
                    "Batch complete"
                );
                Ok(None)
            }
            Err(BatchError::Cancelled { .. }) => {
                info!("Shutdown signalled during batch, abandoning pass");
                Err(ReconcileError::Cancelled { key })
            }
            Err(e) => {
                warn!(error = %e, "Batch partially failed");
                Ok(Some(ReplicaError::Batch(e)))
            }
        }
    }
}

/// Active instances whose controller reference names `owner`.
fn active_owned(instances: &[Instance], owner: Uuid) -> Vec<&Instance> {
    classify_active(instances.iter().filter(|i| owned_by(i, owner)))
}

/// Create one instance, regenerating its name when it collides with an
/// existing one.
async fn create_instance(
    store: &dyn ClusterStore,
    recorder: &dyn EventRecorder,
    factory: &InstanceFactory,
) -> StoreResult<()> {
    let mut attempt = 1;
    loop {
        let instance = factory.build();
        let key = instance.key();
        match store.create_instance(instance).await {
            Ok(()) => {
                debug!(instance = %key, "Created instance");
                recorder.record(
                    &key,
                    EventType::Normal,
                    reason::SUCCESSFUL_CREATE,
                    &format!("Created instance {}", key.name),
                );
                return Ok(());
            }
            Err(StoreError::AlreadyExists { .. }) if attempt < MAX_NAME_ATTEMPTS => {
                debug!(instance = %key, attempt, "Generated name taken, retrying");
                attempt += 1;
            }
            Err(e) => {
                warn!(instance = %key, error = %e, "Failed to create instance");
                recorder.record(
                    &key,
                    EventType::Warning,
                    reason::FAILED_CREATE,
                    &format!("Error creating instance {}: {e}", key.name),
                );
                return Err(e);
            }
        }
    }
}

async fn delete_instance(
    store: &dyn ClusterStore,
    recorder: &dyn EventRecorder,
    key: NamespacedName,
) -> StoreResult<()> {
    match store.delete_instance(&key).await {
        Ok(()) => {
            debug!(instance = %key, "Deleted instance");
            recorder.record(
                &key,
                EventType::Normal,
                reason::SUCCESSFUL_DELETE,
                &format!("Deleted instance {}", key.name),
            );
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(instance = %key, "Instance has already been deleted");
            Err(e)
        }
        Err(e) => {
            warn!(instance = %key, error = %e, "Failed to delete instance");
            recorder.record(
                &key,
                EventType::Warning,
                reason::FAILED_DELETE,
                &format!("Error deleting instance {}: {e}", key.name),
            );
            Err(e)
        }
    }
}
