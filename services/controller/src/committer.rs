//! Idempotent status commits.

use std::sync::Arc;

use podset_reconcile::{needs_commit, ReplicaCounts, Workload};
use tracing::debug;

use crate::store::{ClusterStore, StoreResult};

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Stored status already matched; nothing was written.
    Unchanged(Workload),

    /// Status was written; holds the stored record.
    Updated(Workload),
}

impl CommitOutcome {
    pub fn workload(&self) -> &Workload {
        match self {
            Self::Unchanged(w) | Self::Updated(w) => w,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Writes workload status only when it changes.
#[derive(Clone)]
pub struct StatusCommitter {
    store: Arc<dyn ClusterStore>,
}

impl StatusCommitter {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Persist `counts` as the workload's status, stamped with its current
    /// generation, unless the stored status already says the same.
    pub async fn commit(
        &self,
        mut workload: Workload,
        counts: ReplicaCounts,
    ) -> StoreResult<CommitOutcome> {
        if !needs_commit(&workload.status, workload.generation, &counts) {
            debug!(workload = %workload.key(), "Status unchanged, skipping write");
            return Ok(CommitOutcome::Unchanged(workload));
        }

        workload.status = counts.into_status(workload.generation);
        let updated = self.store.update_workload_status(&workload).await?;
        debug!(
            workload = %updated.key(),
            replicas = updated.status.replicas,
            ready_replicas = updated.status.ready_replicas,
            available_replicas = updated.status.available_replicas,
            observed_generation = updated.status.observed_generation,
            "Status committed"
        );
        Ok(CommitOutcome::Updated(updated))
    }
}

#[cfg(test)]
mod tests {
    use podset_reconcile::{LabelSelector, WorkloadSpec, WorkloadStatus};
    use uuid::Uuid;

    use super::*;
    use crate::store::{FaultPlan, InMemoryStore, StoreError};

    fn workload(generation: i64, status: WorkloadStatus) -> Workload {
        Workload {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: Uuid::new_v4(),
            generation,
            resource_version: 1,
            deletion_timestamp: None,
            spec: WorkloadSpec {
                replicas: 2,
                selector: LabelSelector::from_labels(
                    [("app".to_string(), "web".to_string())].into(),
                ),
                template: Default::default(),
                min_ready_seconds: 0,
            },
            status,
        }
    }

    const COUNTS: ReplicaCounts = ReplicaCounts {
        replicas: 2,
        ready_replicas: 1,
        available_replicas: 1,
    };

    #[tokio::test]
    async fn test_commit_writes_then_skips() {
        let store = Arc::new(InMemoryStore::with_workloads(vec![workload(
            3,
            WorkloadStatus::default(),
        )]));
        let committer = StatusCommitter::new(store.clone());

        let current = store.workload(&workload(3, Default::default()).key()).await.unwrap();
        let first = committer.commit(current, COUNTS).await.unwrap();
        assert!(first.was_written());
        assert_eq!(first.workload().status, COUNTS.into_status(3));

        let second = committer.commit(first.workload().clone(), COUNTS).await.unwrap();
        assert!(!second.was_written());
        assert_eq!(store.calls().status_updates, 1);
    }

    #[tokio::test]
    async fn test_generation_change_forces_write() {
        let stored = COUNTS.into_status(1);
        let store = Arc::new(InMemoryStore::with_workloads(vec![workload(2, stored)]));
        let committer = StatusCommitter::new(store.clone());

        let current = store.workload(&workload(2, stored).key()).await.unwrap();
        let outcome = committer.commit(current, COUNTS).await.unwrap();
        assert!(outcome.was_written());
        assert_eq!(outcome.workload().status.observed_generation, 2);
    }

    #[tokio::test]
    async fn test_store_error_is_returned() {
        let store = Arc::new(InMemoryStore::with_workloads(vec![workload(
            1,
            WorkloadStatus::default(),
        )]));
        store.set_faults(FaultPlan {
            update_status: Some(StoreError::Unavailable("down".to_string())),
            ..Default::default()
        });
        let committer = StatusCommitter::new(store.clone());

        let current = store.workload(&workload(1, Default::default()).key()).await.unwrap();
        let err = committer.commit(current, COUNTS).await.unwrap_err();
        assert_eq!(err, StoreError::Unavailable("down".to_string()));
    }
}
