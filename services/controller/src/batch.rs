//! Bounded fan-out of create and delete operations.
//!
//! A batch spawns exactly `count` operations at once and waits for all of
//! them. The caller bounds `count` by the burst ceiling; the executor adds no
//! throttling of its own. Each operation writes only its own result slot, so
//! one failure never affects another operation. Partially applied batches
//! are not rolled back.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use crate::shutdown;
use crate::store::{StoreError, StoreResult};

/// Operation type of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Create,
    Delete,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Batch failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// At least one operation failed. `first` is the failure in the lowest
    /// slot; which failure that is carries no meaning.
    #[error("{failed} of {attempted} {kind} operations failed: {first}")]
    Partial {
        kind: BatchKind,
        attempted: usize,
        failed: usize,
        #[source]
        first: StoreError,
    },

    /// Shutdown was signalled before every operation finished.
    #[error("{kind} batch cancelled with {completed} of {attempted} operations finished")]
    Cancelled {
        kind: BatchKind,
        attempted: usize,
        completed: usize,
    },
}

/// Outcome of a batch in which every operation succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,

    /// Deletes whose target was already gone.
    pub already_absent: usize,
}

/// Runs batches of store operations concurrently.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    shutdown: watch::Receiver<bool>,
}

impl BatchExecutor {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }

    /// Run `op(slot)` for every slot in `0..count` concurrently.
    ///
    /// Returns once every operation has finished. For [`BatchKind::Delete`]
    /// a NotFound failure counts as success.
    pub async fn run<F, Fut>(
        &self,
        kind: BatchKind,
        count: usize,
        op: F,
    ) -> Result<BatchSummary, BatchError>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = StoreResult<()>> + Send + 'static,
    {
        if count == 0 {
            return Ok(BatchSummary::default());
        }

        let mut results: Vec<Option<StoreResult<()>>> = vec![None; count];
        let mut tasks = JoinSet::new();
        for slot in 0..count {
            let operation = op(slot);
            tasks.spawn(async move { (slot, operation.await) }.in_current_span());
        }
        debug!(%kind, count, "Batch started");

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((slot, result))) => results[slot] = Some(result),
                    Some(Err(e)) => warn!(%kind, error = %e, "Batch operation did not complete"),
                    None => break,
                },
                _ = shutdown::signalled(&mut shutdown) => {
                    let completed = results.iter().filter(|r| r.is_some()).count();
                    // In-flight operations may still land; nobody waits for them.
                    tasks.detach_all();
                    return Err(BatchError::Cancelled {
                        kind,
                        attempted: count,
                        completed,
                    });
                }
            }
        }

        summarize(kind, results)
    }
}

fn summarize(
    kind: BatchKind,
    results: Vec<Option<StoreResult<()>>>,
) -> Result<BatchSummary, BatchError> {
    let mut summary = BatchSummary {
        attempted: results.len(),
        ..Default::default()
    };
    let mut failed = 0;
    let mut first = None;

    for result in results {
        let err = match result {
            Some(Ok(())) => {
                summary.succeeded += 1;
                continue;
            }
            Some(Err(e)) if kind == BatchKind::Delete && e.is_not_found() => {
                summary.already_absent += 1;
                continue;
            }
            Some(Err(e)) => e,
            None => StoreError::Internal("operation did not complete".to_string()),
        };
        failed += 1;
        first.get_or_insert(err);
    }

    match first {
        None => Ok(summary),
        Some(first) => Err(BatchError::Partial {
            kind,
            attempted: summary.attempted,
            failed,
            first,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use podset_reconcile::NamespacedName;

    use super::*;
    use crate::store::ObjectKind;

    fn executor() -> BatchExecutor {
        BatchExecutor::new(shutdown::never())
    }

    fn not_found(slot: usize) -> StoreError {
        StoreError::NotFound {
            kind: ObjectKind::Instance,
            key: NamespacedName::new("default", format!("i{slot}")),
        }
    }

    #[tokio::test]
    async fn test_all_operations_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let summary = executor()
            .run(BatchKind::Create, 5, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            summary,
            BatchSummary {
                attempted: 5,
                succeeded: 5,
                already_absent: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_reported_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = executor()
            .run(BatchKind::Create, 6, |slot| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if slot % 3 == 0 {
                        Err(StoreError::Unavailable(format!("slot {slot}")))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            err,
            BatchError::Partial {
                kind: BatchKind::Create,
                attempted: 6,
                failed: 2,
                first: StoreError::Unavailable("slot 0".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let summary = executor()
            .run(BatchKind::Delete, 3, |slot| async move {
                if slot == 1 {
                    Ok(())
                } else {
                    Err(not_found(slot))
                }
            })
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.already_absent, 2);
    }

    #[tokio::test]
    async fn test_create_not_found_is_failure() {
        let err = executor()
            .run(BatchKind::Create, 1, |slot| async move { Err(not_found(slot)) })
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Partial { failed: 1, .. }));
    }

    #[tokio::test]
    async fn test_operations_run_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        executor()
            .run(BatchKind::Create, 4, |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panicking_operation_counts_as_failure() {
        let err = executor()
            .run(BatchKind::Delete, 2, |slot| async move {
                if slot == 0 {
                    panic!("operation panicked");
                }
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchError::Partial {
                failed: 1,
                first: StoreError::Internal(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_count_is_noop() {
        let summary = executor()
            .run(BatchKind::Delete, 0, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting() {
        let (tx, rx) = watch::channel(false);
        let executor = BatchExecutor::new(rx);

        let batch = tokio::spawn(async move {
            executor
                .run(BatchKind::Create, 3, |slot| async move {
                    if slot == 0 {
                        Ok(())
                    } else {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), batch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            result,
            Err(BatchError::Cancelled {
                kind: BatchKind::Create,
                attempted: 3,
                completed: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_operations_run_in_caller_span() {
        use tracing_subscriber::util::SubscriberInitExt;

        let _subscriber = tracing_subscriber::registry().set_default();
        let span = tracing::info_span!("reconcile", workload = "default/web");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        executor()
            .run(BatchKind::Delete, 3, |_| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(tracing::Span::current().id());
                    Ok(())
                }
            })
            .instrument(span.clone())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(span.id().is_some());
        assert!(seen.iter().all(|id| *id == span.id()));
    }
}
