//! In-memory cluster store for tests and development.
//!
//! Behaves like a real store where the controller can observe it: stable
//! list order, NotFound on double delete, optimistic concurrency on status
//! writes. Faults can be injected per primitive.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use podset_reconcile::{
    Instance, InstancePhase, NamespacedName, Readiness, Selector, Workload,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{ClusterStore, ObjectKind, StoreError, StoreResult};

/// Faults to inject into store primitives.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Error returned by `get_workload`.
    pub get: Option<StoreError>,

    /// Error returned by `list_instances`.
    pub list: Option<StoreError>,

    /// Error returned by `update_workload_status`.
    pub update_status: Option<StoreError>,

    /// Number of upcoming creates that fail with `Unavailable`.
    pub failing_creates: usize,

    /// Number of upcoming creates rejected with `AlreadyExists`, as if the
    /// generated name were taken.
    pub conflicting_creates: usize,

    /// Instance names whose delete fails with `Unavailable`.
    pub failing_deletes: BTreeSet<String>,

    /// Namespaces that refuse new instances.
    pub terminating_namespaces: BTreeSet<String>,

    /// Delay applied to every create and delete.
    pub latency: Option<Duration>,
}

/// Call counters, read with [`InMemoryStore::calls`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub deletes: usize,
    pub status_updates: usize,

    /// Highest number of creates and deletes observed in flight at once.
    pub max_in_flight: usize,
}

#[derive(Debug, Default)]
struct State {
    workloads: BTreeMap<NamespacedName, Workload>,

    /// Insertion order doubles as list order.
    instances: Vec<Instance>,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    lists: AtomicUsize,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    status_updates: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    faults: Mutex<FaultPlan>,
    counters: Counters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with workloads.
    pub fn with_workloads(workloads: Vec<Workload>) -> Self {
        let workloads = workloads.into_iter().map(|w| (w.key(), w)).collect();
        Self {
            state: RwLock::new(State {
                workloads,
                instances: Vec::new(),
            }),
            ..Default::default()
        }
    }

    /// Insert or replace a workload, bypassing concurrency checks.
    pub async fn put_workload(&self, workload: Workload) {
        self.state
            .write()
            .await
            .workloads
            .insert(workload.key(), workload);
    }

    /// Remove a workload.
    pub async fn remove_workload(&self, key: &NamespacedName) {
        self.state.write().await.workloads.remove(key);
    }

    /// Insert an instance as if another actor created it.
    pub async fn put_instance(&self, instance: Instance) {
        let mut state = self.state.write().await;
        let key = instance.key();
        state.instances.retain(|i| i.key() != key);
        state.instances.push(instance);
    }

    /// Current stored copy of a workload.
    pub async fn workload(&self, key: &NamespacedName) -> Option<Workload> {
        self.state.read().await.workloads.get(key).cloned()
    }

    /// All instances in a namespace, in list order.
    pub async fn instances(&self, namespace: &str) -> Vec<Instance> {
        self.state
            .read()
            .await
            .instances
            .iter()
            .filter(|i| i.namespace == namespace)
            .cloned()
            .collect()
    }

    /// Mark an instance running and ready (or not) as of now.
    pub async fn set_ready(&self, key: &NamespacedName, ready: bool) {
        self.update_instance(key, |instance| {
            instance.phase = InstancePhase::Running;
            instance.readiness = Some(Readiness {
                ready,
                last_transition_time: Utc::now(),
            });
        })
        .await;
    }

    pub async fn set_phase(&self, key: &NamespacedName, phase: InstancePhase) {
        self.update_instance(key, |instance| instance.phase = phase).await;
    }

    async fn update_instance<F>(&self, key: &NamespacedName, f: F)
    where
        F: FnOnce(&mut Instance),
    {
        let mut state = self.state.write().await;
        if let Some(instance) = state.instances.iter_mut().find(|i| &i.key() == key) {
            f(instance);
        }
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        *self.lock_faults() = faults;
    }

    /// Edit the fault plan in place.
    pub fn update_faults<F>(&self, f: F)
    where
        F: FnOnce(&mut FaultPlan),
    {
        f(&mut self.lock_faults());
    }

    pub fn calls(&self) -> StoreCalls {
        let c = &self.counters;
        StoreCalls {
            gets: c.gets.load(Ordering::SeqCst),
            lists: c.lists.load(Ordering::SeqCst),
            creates: c.creates.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
            status_updates: c.status_updates.load(Ordering::SeqCst),
            max_in_flight: c.max_in_flight.load(Ordering::SeqCst),
        }
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, FaultPlan> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter_mutation(&self) -> InFlight<'_> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.counters.in_flight);

        let latency = self.lock_faults().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn get_workload(&self, key: &NamespacedName) -> StoreResult<Workload> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lock_faults().get.clone() {
            return Err(err);
        }

        self.state
            .read()
            .await
            .workloads
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: ObjectKind::Workload,
                key: key.clone(),
            })
    }

    async fn list_workloads(&self) -> StoreResult<Vec<Workload>> {
        Ok(self.state.read().await.workloads.values().cloned().collect())
    }

    async fn list_instances(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> StoreResult<Vec<Instance>> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lock_faults().list.clone() {
            return Err(err);
        }

        Ok(self
            .state
            .read()
            .await
            .instances
            .iter()
            .filter(|i| i.namespace == namespace && selector.matches(&i.labels))
            .cloned()
            .collect())
    }

    async fn create_instance(&self, instance: Instance) -> StoreResult<()> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter_mutation().await;

        {
            let mut faults = self.lock_faults();
            if faults.terminating_namespaces.contains(&instance.namespace) {
                return Err(StoreError::NamespaceTerminating(instance.namespace.clone()));
            }
            if faults.conflicting_creates > 0 {
                faults.conflicting_creates -= 1;
                return Err(StoreError::AlreadyExists {
                    kind: ObjectKind::Instance,
                    key: instance.key(),
                });
            }
            if faults.failing_creates > 0 {
                faults.failing_creates -= 1;
                return Err(StoreError::Unavailable("injected create failure".to_string()));
            }
        }

        let mut state = self.state.write().await;
        let key = instance.key();
        if state.instances.iter().any(|i| i.key() == key) {
            return Err(StoreError::AlreadyExists {
                kind: ObjectKind::Instance,
                key,
            });
        }

        debug!(instance = %key, "Stored instance");
        state.instances.push(instance);
        Ok(())
    }

    async fn delete_instance(&self, key: &NamespacedName) -> StoreResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter_mutation().await;

        if self.lock_faults().failing_deletes.contains(&key.name) {
            return Err(StoreError::Unavailable("injected delete failure".to_string()));
        }

        let mut state = self.state.write().await;
        let before = state.instances.len();
        state.instances.retain(|i| &i.key() != key);
        if state.instances.len() == before {
            return Err(StoreError::NotFound {
                kind: ObjectKind::Instance,
                key: key.clone(),
            });
        }
        Ok(())
    }

    async fn update_workload_status(&self, workload: &Workload) -> StoreResult<Workload> {
        self.counters.status_updates.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lock_faults().update_status.clone() {
            return Err(err);
        }

        let key = workload.key();
        let mut state = self.state.write().await;
        let stored = state
            .workloads
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: ObjectKind::Workload,
                key: key.clone(),
            })?;

        if stored.resource_version != workload.resource_version {
            return Err(StoreError::Conflict {
                kind: ObjectKind::Workload,
                key,
                expected: workload.resource_version,
                actual: stored.resource_version,
            });
        }

        stored.status = workload.status;
        stored.resource_version += 1;
        Ok(stored.clone())
    }
}
