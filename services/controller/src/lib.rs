//! PodSet Controller Library
//!
//! The controller keeps every workload's set of instances at the replica
//! count the workload asks for, and reports how many of those instances
//! exist, are ready, and are available.
//!
//! ## Architecture
//!
//! - **Worker**: Triggers passes on a periodic resync and on requeue backoff
//! - **Reconciler**: Runs one pass: classify, diff, act, compute status, commit
//! - **Batch Executor**: Fans out bounded create/delete batches concurrently
//! - **Status Committer**: Writes status only when it changed
//! - **Store**: Abstracts the cluster object store (in-memory in dev and tests)
//!
//! The decision logic itself (diffing, victim selection, status math) lives
//! in `podset-reconcile` and has no I/O.

pub mod batch;
pub mod committer;
pub mod config;
pub mod events;
pub mod reconciler;
pub mod shutdown;
pub mod store;
pub mod template;
pub mod worker;

// Re-export commonly used types
pub use batch::{BatchError, BatchExecutor, BatchKind, BatchSummary};
pub use committer::{CommitOutcome, StatusCommitter};
pub use events::{EventRecorder, MemoryRecorder, NoopRecorder, TracingRecorder};
pub use reconciler::{
    PassOutcome, PassReport, ReconcileError, Reconciler, ReconcilerConfig, ReplicaError,
};
pub use store::{ClusterStore, InMemoryStore, StoreError};
pub use worker::{ControllerWorker, WorkerConfig};
