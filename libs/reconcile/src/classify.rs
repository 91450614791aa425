//! Instance classification.
//!
//! Terminating instances stay active so that in-flight deletions are still
//! counted and do not trigger a replacement on the next pass.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::model::{Instance, InstancePhase};

/// Returns true if the instance has not reached a terminal phase.
pub fn is_active(instance: &Instance) -> bool {
    !matches!(
        instance.phase,
        InstancePhase::Succeeded | InstancePhase::Failed
    )
}

/// Keep only active instances, preserving input order.
pub fn classify_active<'a, I>(instances: I) -> Vec<&'a Instance>
where
    I: IntoIterator<Item = &'a Instance>,
{
    instances.into_iter().filter(|i| is_active(i)).collect()
}

/// Returns true if the instance's controller reference names `owner_uid`.
pub fn owned_by(instance: &Instance, owner_uid: Uuid) -> bool {
    instance
        .controller_ref()
        .is_some_and(|owner| owner.uid == owner_uid)
}

/// Returns true if the instance reports ready.
pub fn is_ready(instance: &Instance) -> bool {
    instance.readiness.is_some_and(|r| r.ready)
}

/// Returns true if the instance has been ready for at least
/// `min_ready_seconds` as of `now`.
pub fn is_available(instance: &Instance, min_ready_seconds: u32, now: DateTime<Utc>) -> bool {
    let Some(readiness) = instance.readiness else {
        return false;
    };
    if !readiness.ready {
        return false;
    }
    if min_ready_seconds == 0 {
        return true;
    }

    let min_ready = Duration::seconds(i64::from(min_ready_seconds));
    readiness
        .last_transition_time
        .checked_add_signed(min_ready)
        .is_some_and(|available_at| available_at <= now)
}
