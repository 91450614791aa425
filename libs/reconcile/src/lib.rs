//! Replica reconciliation primitives.
//!
//! This library holds the pure half of the replica controller: everything
//! that turns a workload and its observed instances into a decision, with no
//! I/O. Key concepts:
//!
//! - **Desired state**: the replica count on the workload.
//! - **Observed state**: the active instances owned by the workload.
//! - **Convergence**: issuing bounded create/delete batches until they match.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - A single pass never asks for more than the burst ceiling of operations
//! - `available_replicas <= ready_replicas <= replicas` for any derived status
//! - A status whose counts and observed generation already match is never
//!   written again

pub mod backoff;
pub mod classify;
pub mod diff;
pub mod model;
pub mod selector;
pub mod status;
pub mod victims;

pub use backoff::RequeueBackoff;
pub use classify::{classify_active, is_active, is_available, is_ready, owned_by};
pub use diff::{diff, DiffKind, ReplicaDiff, BURST_REPLICAS};
pub use model::{
    Instance, InstancePhase, InstanceTemplate, Labels, NamespacedName, OwnerReference, Readiness,
    Workload, WorkloadSpec, WorkloadStatus,
};
pub use selector::{LabelSelector, LabelSelectorRequirement, Selector, SelectorError};
pub use status::{calculate_status, needs_commit, ConvergenceStatus, ReplicaCounts};
pub use victims::{select_victims, DrainPriority, VictimPolicy};

/// Default interval between full resync passes.
pub const DEFAULT_RESYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
