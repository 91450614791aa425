//! Status derivation and the commit decision.
//!
//! Status is recomputed from observations on every pass and never merged in
//! place: [`calculate_status`] returns a fresh value and [`needs_commit`]
//! decides whether it differs from what is persisted.

use chrono::{DateTime, Utc};

use crate::classify::{is_available, is_ready};
use crate::model::{Instance, WorkloadStatus};

/// Replica counts derived from the active instance set.
///
/// Always satisfies `available_replicas <= ready_replicas <= replicas`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
}

impl ReplicaCounts {
    /// Attach the generation the counts were observed at.
    pub fn into_status(self, observed_generation: i64) -> WorkloadStatus {
        WorkloadStatus {
            replicas: self.replicas,
            ready_replicas: self.ready_replicas,
            available_replicas: self.available_replicas,
            observed_generation,
        }
    }

    fn matches(&self, status: &WorkloadStatus) -> bool {
        self.replicas == status.replicas
            && self.ready_replicas == status.ready_replicas
            && self.available_replicas == status.available_replicas
    }
}

/// Count replicas, ready replicas and available replicas among `active`.
///
/// Availability is judged at `now`, so the result is deterministic for a
/// fixed clock.
pub fn calculate_status(
    active: &[&Instance],
    min_ready_seconds: u32,
    now: DateTime<Utc>,
) -> ReplicaCounts {
    let mut ready = 0u32;
    let mut available = 0u32;
    for instance in active {
        if is_ready(instance) {
            ready += 1;
            if is_available(instance, min_ready_seconds, now) {
                available += 1;
            }
        }
    }

    ReplicaCounts {
        replicas: u32::try_from(active.len()).unwrap_or(u32::MAX),
        ready_replicas: ready,
        available_replicas: available,
    }
}

/// Returns true unless `counts` equal the stored status and the stored
/// status was observed at `generation`.
pub fn needs_commit(stored: &WorkloadStatus, generation: i64, counts: &ReplicaCounts) -> bool {
    !(counts.matches(stored) && stored.observed_generation == generation)
}

/// Convergence verdict for a workload after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Active count and availability match the desired count.
    Converged,

    /// Work remains but the last pass made no errors.
    Converging,

    /// The last pass failed to apply some of its actions.
    Degraded,
}

impl ConvergenceStatus {
    pub fn evaluate(desired: u32, counts: &ReplicaCounts, had_errors: bool) -> Self {
        if had_errors {
            Self::Degraded
        } else if counts.replicas == desired && counts.available_replicas == desired {
            Self::Converged
        } else {
            Self::Converging
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;
    use crate::model::{InstancePhase, Readiness};

    fn instance(readiness: Option<(bool, i64)>, now: DateTime<Utc>) -> Instance {
        Instance {
            namespace: "default".to_string(),
            name: format!("i-{}", Uuid::new_v4()),
            uid: Uuid::new_v4(),
            labels: Default::default(),
            owner_references: Vec::new(),
            phase: InstancePhase::Running,
            readiness: readiness.map(|(ready, secs_ago)| Readiness {
                ready,
                last_transition_time: now - Duration::seconds(secs_ago),
            }),
            creation_timestamp: now,
            spec: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_calculate_status_counts() {
        let now = Utc::now();
        let instances = vec![
            instance(Some((true, 60)), now),
            instance(Some((true, 1)), now),
            instance(Some((false, 60)), now),
            instance(None, now),
        ];
        let active: Vec<_> = instances.iter().collect();

        let counts = calculate_status(&active, 10, now);
        assert_eq!(
            counts,
            ReplicaCounts {
                replicas: 4,
                ready_replicas: 2,
                available_replicas: 1,
            }
        );

        let counts = calculate_status(&active, 0, now);
        assert_eq!(counts.available_replicas, 2);
    }

    #[test]
    fn test_needs_commit() {
        let stored = WorkloadStatus {
            replicas: 3,
            ready_replicas: 3,
            available_replicas: 3,
            observed_generation: 2,
        };
        let same = ReplicaCounts {
            replicas: 3,
            ready_replicas: 3,
            available_replicas: 3,
        };

        assert!(!needs_commit(&stored, 2, &same));
        assert!(needs_commit(&stored, 3, &same));
        assert!(needs_commit(
            &stored,
            2,
            &ReplicaCounts {
                ready_replicas: 2,
                available_replicas: 2,
                ..same
            }
        ));
    }

    #[test]
    fn test_convergence() {
        let counts = ReplicaCounts {
            replicas: 3,
            ready_replicas: 3,
            available_replicas: 3,
        };
        assert!(ConvergenceStatus::evaluate(3, &counts, false).is_converged());
        assert_eq!(
            ConvergenceStatus::evaluate(5, &counts, false),
            ConvergenceStatus::Converging
        );
        assert_eq!(
            ConvergenceStatus::evaluate(3, &counts, true),
            ConvergenceStatus::Degraded
        );
    }

    proptest! {
        #[test]
        fn prop_available_le_ready_le_replicas(
            specs in prop::collection::vec(
                prop::option::of((any::<bool>(), 0i64..120)),
                0..40,
            ),
            min_ready in 0u32..90,
        ) {
            let now = Utc::now();
            let instances: Vec<_> = specs.into_iter().map(|s| instance(s, now)).collect();
            let active: Vec<_> = instances.iter().collect();

            let counts = calculate_status(&active, min_ready, now);
            prop_assert!(counts.available_replicas <= counts.ready_replicas);
            prop_assert!(counts.ready_replicas <= counts.replicas);
            prop_assert_eq!(counts.replicas as usize, active.len());
        }
    }
}
