//! Cluster state store interface.
//!
//! The store owns workloads and instances. The controller reads them,
//! creates and deletes instances, and writes workload status with
//! optimistic concurrency.

mod memory;

use std::fmt;

use async_trait::async_trait;
use podset_reconcile::{Instance, NamespacedName, Selector, Workload};
use thiserror::Error;

pub use memory::{FaultPlan, InMemoryStore, StoreCalls};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Kind of object a store error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Workload,
    Instance,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workload => f.write_str("workload"),
            Self::Instance => f.write_str("instance"),
        }
    }
}

/// Errors returned by the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: ObjectKind, key: NamespacedName },

    /// Write rejected because the caller's copy is stale.
    #[error("conflict writing {kind} {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        kind: ObjectKind,
        key: NamespacedName,
        expected: u64,
        actual: u64,
    },

    /// An object with the same name already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ObjectKind, key: NamespacedName },

    /// The namespace is being torn down and refuses new objects.
    #[error("namespace {0} is terminating")]
    NamespaceTerminating(String),

    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other failure.
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Cluster state store primitives used by the controller.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a workload by key.
    async fn get_workload(&self, key: &NamespacedName) -> StoreResult<Workload>;

    /// List every workload. Drives periodic resync.
    async fn list_workloads(&self) -> StoreResult<Vec<Workload>>;

    /// List instances in a namespace matching a selector, in a stable order.
    async fn list_instances(&self, namespace: &str, selector: &Selector)
        -> StoreResult<Vec<Instance>>;

    /// Create an instance.
    async fn create_instance(&self, instance: Instance) -> StoreResult<()>;

    /// Delete an instance. Deleting an absent instance returns
    /// [`StoreError::NotFound`].
    async fn delete_instance(&self, key: &NamespacedName) -> StoreResult<()>;

    /// Persist the status block of a workload.
    ///
    /// Rejected with [`StoreError::Conflict`] if `workload.resource_version`
    /// is stale. Returns the stored record with its new resource version.
    async fn update_workload_status(&self, workload: &Workload) -> StoreResult<Workload>;
}
