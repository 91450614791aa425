//! Controller background worker.
//!
//! Triggers reconciliation passes by polling: every workload is reconciled
//! on a periodic resync, and workloads whose pass asked for a retry are
//! reconciled again after an exponential backoff. Passes run one at a time,
//! so at most one pass per workload is in flight within this process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use podset_reconcile::{backoff, NamespacedName, RequeueBackoff, DEFAULT_RESYNC_INTERVAL};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::reconciler::{PassOutcome, ReconcileError, Reconciler};
use crate::shutdown;
use crate::store::ClusterStore;

/// Worker timing configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between full resyncs.
    pub resync_interval: Duration,

    /// How often due retries are checked.
    pub requeue_tick: Duration,

    /// First retry delay.
    pub requeue_base: Duration,

    /// Retry delay ceiling.
    pub requeue_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            requeue_tick: Duration::from_millis(250),
            requeue_base: backoff::DEFAULT_REQUEUE_BASE,
            requeue_max: backoff::DEFAULT_REQUEUE_MAX,
        }
    }
}

/// Statistics from a batch of passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub workloads_reconciled: usize,
    pub workloads_gone: usize,
    pub workloads_requeued: usize,
}

/// Outcome of a single triggered pass.
enum Triggered {
    Reconciled,
    Gone,
    Requeued,
    Stopped,
}

/// Worker that drives the reconciler.
pub struct ControllerWorker {
    reconciler: Reconciler,
    store: Arc<dyn ClusterStore>,
    config: WorkerConfig,
    backoff: RequeueBackoff,
}

impl ControllerWorker {
    pub fn new(reconciler: Reconciler, store: Arc<dyn ClusterStore>, config: WorkerConfig) -> Self {
        Self {
            backoff: RequeueBackoff::new(config.requeue_base, config.requeue_max),
            reconciler,
            store,
            config,
        }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip_all)]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting controller worker"
        );

        let mut resync = tokio::time::interval(self.config.resync_interval);
        let mut requeue = tokio::time::interval(self.config.requeue_tick);

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    let stats = self.resync(&mut shutdown).await;
                    debug!(
                        reconciled = stats.workloads_reconciled,
                        gone = stats.workloads_gone,
                        requeued = stats.workloads_requeued,
                        "Resync complete"
                    );
                }
                _ = requeue.tick() => {
                    self.retry_due(&mut shutdown).await;
                }
                _ = shutdown::signalled(&mut shutdown) => {
                    info!("Controller worker shutting down");
                    break;
                }
            }
        }
    }

    /// Reconcile every workload in the store once.
    pub async fn resync(&mut self, shutdown: &mut watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let workloads = match self.store.list_workloads().await {
            Ok(workloads) => workloads,
            Err(e) => {
                error!(error = %e, "Failed to list workloads for resync");
                return stats;
            }
        };

        let mut keys: Vec<NamespacedName> = workloads.iter().map(|w| w.key()).collect();
        keys.sort();
        self.backoff.retain(|key| keys.iter().any(|k| k.to_string() == key));

        for key in keys {
            match self.trigger(&key, shutdown).await {
                Triggered::Reconciled => stats.workloads_reconciled += 1,
                Triggered::Gone => stats.workloads_gone += 1,
                Triggered::Requeued => stats.workloads_requeued += 1,
                Triggered::Stopped => break,
            }
        }
        stats
    }

    /// Reconcile workloads whose retry is due.
    pub async fn retry_due(&mut self, shutdown: &mut watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        for raw in self.backoff.due(Instant::now()) {
            let key: NamespacedName = match raw.parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!(key = %raw, error = %e, "Dropping malformed requeue key");
                    self.backoff.clear(&raw);
                    continue;
                }
            };

            match self.trigger(&key, shutdown).await {
                Triggered::Reconciled => stats.workloads_reconciled += 1,
                Triggered::Gone => stats.workloads_gone += 1,
                Triggered::Requeued => stats.workloads_requeued += 1,
                Triggered::Stopped => break,
            }
        }
        stats
    }

    /// Number of consecutive failed passes recorded for a workload.
    pub fn failures(&self, key: &NamespacedName) -> u32 {
        self.backoff.failures(&key.to_string())
    }

    async fn trigger(
        &mut self,
        key: &NamespacedName,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Triggered {
        let result = tokio::select! {
            result = self.reconciler.reconcile(key) => result,
            _ = shutdown::signalled(shutdown) => return Triggered::Stopped,
        };

        let raw = key.to_string();
        match result {
            Ok(PassOutcome::WorkloadGone) => {
                self.backoff.clear(&raw);
                Triggered::Gone
            }
            Ok(PassOutcome::Reconciled(_)) => {
                self.backoff.clear(&raw);
                Triggered::Reconciled
            }
            Err(ReconcileError::Cancelled { .. }) => Triggered::Stopped,
            Err(e) => {
                let delay = self.backoff.record_failure(&raw);
                warn!(
                    workload = %key,
                    error = %e,
                    validation = e.is_validation(),
                    failures = self.backoff.failures(&raw),
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconciliation failed, requeueing"
                );
                Triggered::Requeued
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use podset_reconcile::{LabelSelector, Workload, WorkloadSpec, WorkloadStatus};
    use uuid::Uuid;

    use super::*;
    use crate::events::NoopRecorder;
    use crate::reconciler::ReconcilerConfig;
    use crate::store::{FaultPlan, InMemoryStore, StoreError};

    fn workload(name: &str, replicas: u32) -> Workload {
        Workload {
            namespace: "default".to_string(),
            name: name.to_string(),
            uid: Uuid::new_v4(),
            generation: 1,
            resource_version: 1,
            deletion_timestamp: None,
            spec: WorkloadSpec {
                replicas,
                selector: LabelSelector::from_labels(
                    [("app".to_string(), name.to_string())].into(),
                ),
                template: Default::default(),
                min_ready_seconds: 0,
            },
            status: WorkloadStatus::default(),
        }
    }

    fn worker(store: Arc<InMemoryStore>, config: WorkerConfig) -> ControllerWorker {
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(NoopRecorder),
            ReconcilerConfig::default(),
            shutdown::never(),
        );
        ControllerWorker::new(reconciler, store, config)
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            resync_interval: Duration::from_millis(20),
            requeue_tick: Duration::from_millis(5),
            requeue_base: Duration::from_millis(1),
            requeue_max: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert_eq!(config.requeue_base, Duration::from_millis(500));
        assert_eq!(config.requeue_max, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_resync_reconciles_every_workload() {
        let store = Arc::new(InMemoryStore::with_workloads(vec![
            workload("api", 2),
            workload("web", 3),
        ]));
        let mut worker = worker(store.clone(), fast_config());

        let stats = worker.resync(&mut shutdown::never()).await;
        assert_eq!(
            stats,
            WorkerStats {
                workloads_reconciled: 2,
                workloads_gone: 0,
                workloads_requeued: 0,
            }
        );
        assert_eq!(store.instances("default").await.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_pass_is_retried_after_backoff() {
        let web = workload("web", 1);
        let store = Arc::new(InMemoryStore::with_workloads(vec![web.clone()]));
        store.set_faults(FaultPlan {
            update_status: Some(StoreError::Unavailable("down".to_string())),
            ..Default::default()
        });
        let mut worker = worker(store.clone(), fast_config());
        let mut rx = shutdown::never();

        let stats = worker.resync(&mut rx).await;
        assert_eq!(stats.workloads_requeued, 1);
        assert_eq!(worker.failures(&web.key()), 1);

        store.set_faults(FaultPlan::default());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = worker.retry_due(&mut rx).await;
        assert_eq!(stats.workloads_reconciled, 1);
        assert_eq!(worker.failures(&web.key()), 0);
        assert_eq!(
            store.workload(&web.key()).await.unwrap().status.replicas,
            1
        );
    }

    #[tokio::test]
    async fn test_resync_forgets_deleted_workloads() {
        let web = workload("web", 1);
        let store = Arc::new(InMemoryStore::with_workloads(vec![web.clone()]));
        store.set_faults(FaultPlan {
            update_status: Some(StoreError::Unavailable("down".to_string())),
            ..Default::default()
        });
        let mut worker = worker(store.clone(), fast_config());
        let mut rx = shutdown::never();

        worker.resync(&mut rx).await;
        assert_eq!(worker.failures(&web.key()), 1);

        store.remove_workload(&web.key()).await;
        let stats = worker.resync(&mut rx).await;
        assert_eq!(stats, WorkerStats::default());
        assert_eq!(worker.failures(&web.key()), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::with_workloads(vec![workload("web", 2)]));
        let mut worker = worker(store.clone(), fast_config());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.instances("default").await.len(), 2);
    }
}
